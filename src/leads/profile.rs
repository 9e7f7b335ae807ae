//! Inference-based profile enrichment.
//!
//! Derives a company profile from fields the lead already carries instead of
//! scraping a social network. Confidence reflects how many fields backed the
//! inference.

use super::types::{InferredProfile, Lead};

/// Base confidence for a name-only inference.
const BASE_CONFIDENCE: f64 = 0.4;

/// Confidence added per supporting field (category, city, website).
const FIELD_CONFIDENCE: f64 = 0.15;

/// Infers a company profile from a lead's existing fields.
pub fn infer_profile(lead: &Lead) -> InferredProfile {
    let mut confidence = BASE_CONFIDENCE;
    if lead.category.is_some() {
        confidence += FIELD_CONFIDENCE;
    }
    if lead.city.is_some() {
        confidence += FIELD_CONFIDENCE;
    }
    if lead.website.is_some() {
        confidence += FIELD_CONFIDENCE;
    }

    InferredProfile {
        inferred: true,
        company_name: lead.name.clone(),
        industry: lead.category.clone(),
        location: lead.city.clone(),
        confidence,
        profile_url: lead.website.as_deref().map(derive_profile_url),
    }
}

/// Derives a likely public profile URL from the company website domain.
fn derive_profile_url(website: &str) -> String {
    let domain = website
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.")
        .split('/')
        .next()
        .unwrap_or(website);
    let slug: String = domain
        .split('.')
        .next()
        .unwrap_or(domain)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    format!("https://www.linkedin.com/company/{}", slug.to_lowercase())
}
