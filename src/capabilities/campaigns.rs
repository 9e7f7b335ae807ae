//! Instantly-style campaign platform client.
//!
//! Creates a platform campaign once per run and pushes validated leads into
//! it. The platform deduplicates contacts by email, so retried submissions
//! are safe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::leads::types::Lead;

use super::{CampaignPlatform, CapabilityError, CapabilityResult};

/// Default API endpoint.
const INSTANTLY_API_BASE: &str = "https://api.instantly.ai/api/v2";

/// Client for the Instantly campaign API.
pub struct InstantlyClient {
    api_key: String,
    http_client: Client,
    api_base: String,
}

impl InstantlyClient {
    /// Creates a new client with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http_client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            api_base: INSTANTLY_API_BASE.to_string(),
        }
    }

    /// Overrides the API base URL (used to point at a test server).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn map_status(status: StatusCode) -> Option<CapabilityError> {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(
                CapabilityError::AuthRejected(format!("status {}", status)),
            ),
            StatusCode::TOO_MANY_REQUESTS => {
                Some(CapabilityError::RateLimited { retry_after: None })
            }
            status if status.is_server_error() => {
                Some(CapabilityError::Unavailable(format!("status {}", status)))
            }
            status if !status.is_success() => {
                Some(CapabilityError::Http(format!("status {}", status)))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl CampaignPlatform for InstantlyClient {
    async fn ensure_campaign(&self, name: &str, from_email: &str) -> CapabilityResult<String> {
        let request = CreateCampaignRequest {
            name: name.to_string(),
            from_email: from_email.to_string(),
        };

        let response = self
            .http_client
            .post(format!("{}/campaigns", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CapabilityError::Http(e.to_string()))?;

        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }

        let body: CreateCampaignResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        debug!(platform_campaign_id = %body.id, "Platform campaign ready");
        Ok(body.id)
    }

    async fn submit_lead(&self, platform_campaign_id: &str, lead: &Lead) -> CapabilityResult<()> {
        let email = lead.email.as_deref().ok_or_else(|| {
            CapabilityError::InvalidResponse("lead has no email to submit".to_string())
        })?;

        let request = AddLeadRequest {
            campaign: platform_campaign_id.to_string(),
            email: email.to_string(),
            company_name: lead.name.clone(),
            personalization: lead.message.as_ref().map(|m| m.body.clone()),
        };

        let response = self
            .http_client
            .post(format!("{}/leads", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CapabilityError::Http(e.to_string()))?;

        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }

        debug!(lead_id = %lead.id, campaign = platform_campaign_id, "Lead submitted");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CreateCampaignRequest {
    name: String,
    from_email: String,
}

#[derive(Debug, Deserialize)]
struct CreateCampaignResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct AddLeadRequest {
    campaign: String,
    email: String,
    company_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    personalization: Option<String>,
}
