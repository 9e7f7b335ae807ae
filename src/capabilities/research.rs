//! Perplexity-backed company research client.
//!
//! Sends one chat-completion request per lead and folds the answer into a
//! `ResearchData` payload.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::leads::types::{Lead, ResearchData};

use super::{CapabilityError, CapabilityResult, CompanyResearcher};

/// Default API endpoint.
const PERPLEXITY_API_BASE: &str = "https://api.perplexity.ai";

/// Model used for research queries.
const RESEARCH_MODEL: &str = "sonar";

/// Client for the Perplexity chat-completions API.
pub struct PerplexityResearcher {
    api_key: String,
    http_client: Client,
    api_base: String,
}

impl PerplexityResearcher {
    /// Creates a new client with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http_client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("Failed to build HTTP client"),
            api_base: PERPLEXITY_API_BASE.to_string(),
        }
    }

    /// Overrides the API base URL (used to point at a test server).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn build_prompt(lead: &Lead) -> String {
        let mut prompt = format!(
            "Research the business '{}'",
            lead.name
        );
        if let Some(city) = &lead.city {
            prompt.push_str(&format!(" located in {}", city));
        }
        if let Some(category) = &lead.category {
            prompt.push_str(&format!(" (industry: {})", category));
        }
        if let Some(website) = &lead.website {
            prompt.push_str(&format!(", website {}", website));
        }
        prompt.push_str(
            ". Give a two-sentence company overview, one sentence of industry \
             insight, and up to three bullet points of notable challenges or \
             recent developments. Separate the three sections with blank lines.",
        );
        prompt
    }
}

#[async_trait]
impl CompanyResearcher for PerplexityResearcher {
    async fn research(&self, lead: &Lead) -> CapabilityResult<ResearchData> {
        let request = ChatRequest {
            model: RESEARCH_MODEL.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You are a precise business research assistant.".to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::build_prompt(lead),
                },
            ],
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CapabilityError::Http(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(CapabilityError::AuthRejected(format!(
                    "status {}",
                    response.status()
                )));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return Err(CapabilityError::RateLimited { retry_after });
            }
            status if status.is_server_error() => {
                return Err(CapabilityError::Unavailable(format!("status {}", status)));
            }
            status if !status.is_success() => {
                return Err(CapabilityError::Http(format!("status {}", status)));
            }
            _ => {}
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| CapabilityError::InvalidResponse("empty choices".to_string()))?;

        debug!(lead_id = %lead.id, chars = content.len(), "Research answer received");
        Ok(parse_research(content, RESEARCH_MODEL))
    }
}

/// Splits a sectioned answer into the research payload.
fn parse_research(content: &str, source: &str) -> ResearchData {
    let mut sections = content.split("\n\n").map(str::trim).filter(|s| !s.is_empty());

    let overview = sections.next().unwrap_or(content).to_string();
    let industry_insights = sections.next().unwrap_or_default().to_string();
    let highlights: Vec<String> = sections
        .next()
        .map(|block| {
            block
                .lines()
                .map(|line| line.trim_start_matches(['-', '*', ' ']).trim().to_string())
                .filter(|line| !line.is_empty())
                .collect()
        })
        .unwrap_or_default();

    ResearchData {
        overview,
        industry_insights,
        highlights,
        researched_at: Utc::now(),
        source: source.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::places::PlaceRecord;
    use uuid::Uuid;

    fn lead() -> Lead {
        Lead::from_place(
            Uuid::new_v4(),
            PlaceRecord {
                place_id: "p1".to_string(),
                name: "Acme Plumbing".to_string(),
                address: None,
                city: Some("Denver".to_string()),
                state: None,
                postal_code: None,
                country: None,
                phone: None,
                email: None,
                website: Some("https://acme.example".to_string()),
                category: Some("Plumber".to_string()),
                rating: None,
                reviews_count: None,
                latitude: None,
                longitude: None,
            },
        )
    }

    #[test]
    fn prompt_mentions_known_fields() {
        let prompt = PerplexityResearcher::build_prompt(&lead());
        assert!(prompt.contains("Acme Plumbing"));
        assert!(prompt.contains("Denver"));
        assert!(prompt.contains("Plumber"));
        assert!(prompt.contains("https://acme.example"));
    }

    #[test]
    fn parse_sectioned_answer() {
        let content = "Acme is a plumbing firm. It serves Denver.\n\n\
                       Plumbing demand is seasonal.\n\n\
                       - Hiring is tight\n- New competitor opened downtown";
        let data = parse_research(content, "sonar");

        assert!(data.overview.starts_with("Acme is a plumbing firm"));
        assert_eq!(data.industry_insights, "Plumbing demand is seasonal.");
        assert_eq!(
            data.highlights,
            vec!["Hiring is tight", "New competitor opened downtown"]
        );
        assert_eq!(data.source, "sonar");
    }

    #[test]
    fn parse_unstructured_answer_keeps_overview() {
        let data = parse_research("Just one blob of text.", "sonar");
        assert_eq!(data.overview, "Just one blob of text.");
        assert!(data.industry_insights.is_empty());
        assert!(data.highlights.is_empty());
    }
}
