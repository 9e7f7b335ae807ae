//! Anthropic-backed outreach message personalization.
//!
//! Asks the model for a JSON object containing a subject and body tailored to
//! one lead, enriched with research output when available.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::leads::types::{Lead, PersonalizedMessage};

use super::{CapabilityError, CapabilityResult, MessagePersonalizer};

/// Default API endpoint.
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";

/// Model used for message generation.
const PERSONALIZATION_MODEL: &str = "claude-sonnet-4-5";

/// API version header value required by the messages endpoint.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Template family recorded on generated messages.
const TEMPLATE: &str = "professional";

/// Client for the Anthropic messages API.
pub struct AnthropicPersonalizer {
    api_key: String,
    http_client: Client,
    api_base: String,
}

impl AnthropicPersonalizer {
    /// Creates a new client with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http_client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("Failed to build HTTP client"),
            api_base: ANTHROPIC_API_BASE.to_string(),
        }
    }

    /// Overrides the API base URL (used to point at a test server).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn build_prompt(lead: &Lead) -> String {
        let mut prompt = format!(
            "Write a short, professional cold outreach email to the business \
             '{}'",
            lead.name
        );
        if let Some(city) = &lead.city {
            prompt.push_str(&format!(" in {}", city));
        }
        if let Some(category) = &lead.category {
            prompt.push_str(&format!(", which operates in the {} space", category));
        }
        if let Some(research) = &lead.research {
            prompt.push_str(&format!(
                ". Context from research: {}",
                research.overview
            ));
        }
        prompt.push_str(
            ". Respond with a JSON object only, with exactly two string \
             fields: \"subject\" and \"body\".",
        );
        prompt
    }
}

#[async_trait]
impl MessagePersonalizer for AnthropicPersonalizer {
    async fn personalize(&self, lead: &Lead) -> CapabilityResult<PersonalizedMessage> {
        let request = MessagesRequest {
            model: PERSONALIZATION_MODEL.to_string(),
            max_tokens: 1024,
            messages: vec![MessageParam {
                role: "user".to_string(),
                content: Self::build_prompt(lead),
            }],
        };

        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
                return Err(CapabilityError::RateLimited { retry_after: None });
            }
            status if status.is_server_error() => {
                return Err(CapabilityError::Unavailable(format!("status {}", status)));
            }
            status if !status.is_success() => {
                return Err(CapabilityError::Http(format!("status {}", status)));
            }
            _ => {}
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        let text = body
            .content
            .iter()
            .find(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .ok_or_else(|| CapabilityError::InvalidResponse("no text block".to_string()))?;

        debug!(lead_id = %lead.id, chars = text.len(), "Personalization answer received");
        parse_message(text)
    }
}

/// Extracts the JSON message payload from the model's answer.
///
/// Models sometimes wrap JSON in code fences or prose; scan for the first
/// balanced object instead of trusting the whole answer.
fn parse_message(text: &str) -> CapabilityResult<PersonalizedMessage> {
    let json = extract_json_object(text)
        .ok_or_else(|| CapabilityError::InvalidResponse("no JSON object in answer".to_string()))?;
    let parsed: MessageJson = serde_json::from_str(json)?;

    if parsed.subject.trim().is_empty() || parsed.body.trim().is_empty() {
        return Err(CapabilityError::InvalidResponse(
            "empty subject or body".to_string(),
        ));
    }

    Ok(PersonalizedMessage {
        subject: parsed.subject,
        body: parsed.body,
        template: TEMPLATE.to_string(),
        created_at: Utc::now(),
    })
}

/// Finds the first balanced `{...}` span in a string.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<MessageParam>,
}

#[derive(Debug, Serialize)]
struct MessageParam {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessageJson {
    subject: String,
    body: String,
}
