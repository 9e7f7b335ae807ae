//! Contact validation for leads.
//!
//! Email and phone checks are local format/plausibility checks; the company
//! check probes the lead's website and falls back to a name-plausibility
//! check when no website is known or probing is disabled.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use tracing::debug;

use super::types::Lead;

/// Result of validating one lead's contact fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Whether the email address is well-formed.
    pub email_valid: bool,
    /// Whether the phone number is plausible.
    pub phone_valid: bool,
    /// Whether the company looks real (website reachable or plausible name).
    pub company_valid: bool,
}

/// Configuration for the lead validator.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Whether to probe websites over the network for the company check.
    pub check_websites: bool,
    /// Timeout for a single website probe.
    pub probe_timeout: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            check_websites: true,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Validates lead contact fields.
pub struct LeadValidator {
    config: ValidatorConfig,
    http_client: Client,
}

impl LeadValidator {
    /// Creates a validator with the given configuration.
    pub fn new(config: ValidatorConfig) -> Self {
        let http_client = Client::builder()
            .timeout(config.probe_timeout)
            .user_agent("leadforge/0.1 (business data verification)")
            .build()
            .expect("Failed to build HTTP client");

        Self {
            config,
            http_client,
        }
    }

    /// Validates a single lead's email, phone and company fields.
    pub async fn validate(&self, lead: &Lead) -> ValidationOutcome {
        let email_valid = lead
            .email
            .as_deref()
            .map(is_valid_email_format)
            .unwrap_or(false);

        let phone_valid = lead
            .phone
            .as_deref()
            .map(is_plausible_phone)
            .unwrap_or(false);

        let company_valid = self.validate_company(lead).await;

        debug!(
            lead_id = %lead.id,
            email_valid,
            phone_valid,
            company_valid,
            "Lead validated"
        );

        ValidationOutcome {
            email_valid,
            phone_valid,
            company_valid,
        }
    }

    /// Checks the company via its website, falling back to the name check.
    async fn validate_company(&self, lead: &Lead) -> bool {
        if self.config.check_websites {
            if let Some(website) = lead.website.as_deref() {
                if self.probe_website(website).await {
                    return true;
                }
            }
        }
        is_plausible_company_name(&lead.name)
    }

    /// Probes a website; 2xx/3xx counts as reachable.
    async fn probe_website(&self, website: &str) -> bool {
        let url = normalize_url(website);
        match self.http_client.get(&url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                (200..400).contains(&status)
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Website probe failed");
                false
            }
        }
    }
}

/// Checks whether a string is a well-formed email address.
pub fn is_valid_email_format(email: &str) -> bool {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("email regex is valid")
    });
    re.is_match(email.trim())
}

/// Checks whether a string looks like a usable phone number.
///
/// Accepts common formatting (spaces, dashes, parentheses, leading +) and
/// requires 10 to 15 digits.
pub fn is_plausible_phone(phone: &str) -> bool {
    static PHONE_RE: OnceLock<Regex> = OnceLock::new();
    let re = PHONE_RE.get_or_init(|| {
        Regex::new(r"^\+?[\d\s\-\(\)\.]+$").expect("phone regex is valid")
    });

    let trimmed = phone.trim();
    if trimmed.is_empty() || !re.is_match(trimmed) {
        return false;
    }
    let digits = trimmed.chars().filter(|c| c.is_ascii_digit()).count();
    (10..=15).contains(&digits)
}

/// Checks whether a company name is plausible on its own.
fn is_plausible_company_name(name: &str) -> bool {
    name.trim().len() > 2
}

/// Prepends https:// when the scheme is missing.
fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::places::PlaceRecord;
    use uuid::Uuid;

    fn lead_with(email: Option<&str>, phone: Option<&str>, name: &str) -> Lead {
        Lead::from_place(
            Uuid::new_v4(),
            PlaceRecord {
                place_id: "p1".to_string(),
                name: name.to_string(),
                address: None,
                city: None,
                state: None,
                postal_code: None,
                country: None,
                phone: phone.map(str::to_string),
                email: email.map(str::to_string),
                website: None,
                category: None,
                rating: None,
                reviews_count: None,
                latitude: None,
                longitude: None,
            },
        )
    }

    #[test]
    fn email_format_checks() {
        assert!(is_valid_email_format("info@example.com"));
        assert!(is_valid_email_format("first.last+tag@sub.example.co"));
        assert!(!is_valid_email_format("not-an-email"));
        assert!(!is_valid_email_format("missing@tld"));
        assert!(!is_valid_email_format("@example.com"));
        assert!(!is_valid_email_format(""));
    }

    #[test]
    fn phone_plausibility_checks() {
        assert!(is_plausible_phone("+1 512-555-0100"));
        assert!(is_plausible_phone("(512) 555-0100"));
        assert!(is_plausible_phone("5125550100"));
        assert!(!is_plausible_phone("555-0100")); // too few digits
        assert!(!is_plausible_phone("call us"));
        assert!(!is_plausible_phone(""));
    }

    #[test]
    fn url_normalization() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
    }

    #[tokio::test]
    async fn validation_without_network() {
        let validator = LeadValidator::new(ValidatorConfig {
            check_websites: false,
            ..Default::default()
        });

        let lead = lead_with(Some("info@acme.example"), Some("+1 512-555-0100"), "Acme");
        let outcome = validator.validate(&lead).await;
        assert!(outcome.email_valid);
        assert!(outcome.phone_valid);
        assert!(outcome.company_valid);

        let lead = lead_with(None, None, "Ok");
        let outcome = validator.validate(&lead).await;
        assert!(!outcome.email_valid);
        assert!(!outcome.phone_valid);
        assert!(!outcome.company_valid); // two-character name fails the fallback
    }
}
