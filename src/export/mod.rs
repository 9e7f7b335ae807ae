//! Lead export to CSV and JSON files.
//!
//! CSV rows carry a fixed column set: contact fields, directory metadata,
//! pipeline status, the three validation flags and the three enrichment
//! flags. Textual values are quoted; booleans render as bare true/false and
//! unknown tri-state flags render empty.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::leads::types::{Campaign, Lead};

/// Errors that can occur during export operations.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Unknown export format string.
    #[error("Invalid export format: {0}")]
    InvalidFormat(String),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated values with a header row.
    Csv,
    /// JSON document with metadata and full lead payloads.
    Json,
}

impl ExportFormat {
    /// Parses a format name.
    pub fn parse(s: &str) -> Result<Self, ExportError> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(ExportError::InvalidFormat(other.to_string())),
        }
    }

    /// File extension for the format.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

/// Fixed CSV column order.
const CSV_COLUMNS: [&str; 15] = [
    "name",
    "address",
    "phone",
    "email",
    "website",
    "category",
    "rating",
    "reviews_count",
    "status",
    "email_valid",
    "phone_valid",
    "company_valid",
    "linkedin_enriched",
    "research_completed",
    "message_personalized",
];

/// Writes campaign lead sets to files.
pub struct LeadExporter {
    output_dir: PathBuf,
}

impl LeadExporter {
    /// Creates an exporter writing into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Exports a campaign's leads, returning the written file path.
    pub fn export(
        &self,
        campaign: &Campaign,
        leads: &[Lead],
        format: ExportFormat,
    ) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.output_dir)?;

        let filename = format!(
            "leads_{}_{}.{}",
            campaign.id,
            Utc::now().format("%Y%m%d_%H%M%S"),
            format.extension()
        );
        let path = self.output_dir.join(filename);

        match format {
            ExportFormat::Csv => self.write_csv(&path, leads)?,
            ExportFormat::Json => self.write_json(&path, campaign, leads)?,
        }

        info!(path = %path.display(), count = leads.len(), "Exported leads");
        Ok(path)
    }

    fn write_csv(&self, path: &Path, leads: &[Lead]) -> Result<(), ExportError> {
        let mut out = String::new();
        out.push_str(&CSV_COLUMNS.join(","));
        out.push('\n');

        for lead in leads {
            let row = [
                quote(&lead.name),
                quote_opt(lead.address.as_deref()),
                quote_opt(lead.phone.as_deref()),
                quote_opt(lead.email.as_deref()),
                quote_opt(lead.website.as_deref()),
                quote_opt(lead.category.as_deref()),
                lead.rating.map(|r| r.to_string()).unwrap_or_default(),
                lead.reviews_count.map(|r| r.to_string()).unwrap_or_default(),
                quote(lead.status.as_str()),
                tri_state(lead.email_valid),
                tri_state(lead.phone_valid),
                tri_state(lead.company_valid),
                lead.linkedin_enriched().to_string(),
                lead.research_completed().to_string(),
                lead.message_personalized().to_string(),
            ];
            out.push_str(&row.join(","));
            out.push('\n');
        }

        fs::write(path, out)?;
        Ok(())
    }

    fn write_json(
        &self,
        path: &Path,
        campaign: &Campaign,
        leads: &[Lead],
    ) -> Result<(), ExportError> {
        let document = serde_json::json!({
            "metadata": {
                "campaign_id": campaign.id,
                "campaign_name": campaign.name,
                "exported_at": Utc::now(),
                "total_leads": leads.len(),
            },
            "leads": leads,
        });

        fs::write(path, serde_json::to_string_pretty(&document)?)?;
        Ok(())
    }
}

/// Quotes a textual CSV value, doubling embedded quotes.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Quotes an optional textual value; absent values render empty.
fn quote_opt(value: Option<&str>) -> String {
    value.map(quote).unwrap_or_default()
}

/// Renders a tri-state flag: unknown is empty, known is true/false.
fn tri_state(value: Option<bool>) -> String {
    value.map(|b| b.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::places::PlaceRecord;
    use crate::leads::types::{GenerationRequest, LeadStatus};
    use uuid::Uuid;

    fn sample() -> (Campaign, Vec<Lead>) {
        let campaign = Campaign::new(&GenerationRequest::new("dentists", "Austin, TX", 5));
        let mut lead = Lead::from_place(
            campaign.id,
            PlaceRecord {
                place_id: "p1".to_string(),
                name: "Bright \"Smile\" Dental".to_string(),
                address: Some("100 Congress Ave, Austin".to_string()),
                city: Some("Austin".to_string()),
                state: Some("TX".to_string()),
                postal_code: None,
                country: None,
                phone: Some("+1 512-555-0100".to_string()),
                email: Some("hi@smile.example".to_string()),
                website: None,
                category: Some("Dentist".to_string()),
                rating: Some(4.5),
                reviews_count: Some(10),
                latitude: None,
                longitude: None,
            },
        );
        lead.email_valid = Some(true);
        lead.phone_valid = Some(false);
        lead.advance_to(LeadStatus::Validated);
        (campaign, vec![lead])
    }

    #[test]
    fn format_parsing() {
        assert_eq!(ExportFormat::parse("csv").unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::parse("JSON").unwrap(), ExportFormat::Json);
        assert!(matches!(
            ExportFormat::parse("xlsx"),
            Err(ExportError::InvalidFormat(_))
        ));
    }

    #[test]
    fn csv_has_fixed_columns_and_quoting() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = LeadExporter::new(dir.path());
        let (campaign, leads) = sample();

        let path = exporter.export(&campaign, &leads, ExportFormat::Csv).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();

        assert_eq!(lines.next().unwrap(), CSV_COLUMNS.join(","));
        let row = lines.next().unwrap();
        // Embedded quotes doubled, textual fields quoted.
        assert!(row.starts_with("\"Bright \"\"Smile\"\" Dental\","));
        // Booleans are bare tokens, unknown tri-state renders empty.
        assert!(row.contains(",true,false,,false,false,false"));
        assert!(row.contains("\"validated\""));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn json_export_includes_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = LeadExporter::new(dir.path());
        let (campaign, leads) = sample();

        let path = exporter.export(&campaign, &leads, ExportFormat::Json).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert_eq!(doc["metadata"]["total_leads"], 1);
        assert_eq!(doc["leads"][0]["place_id"], "p1");
    }

    #[test]
    fn quoting_helpers() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a \"b\""), "\"a \"\"b\"\"\"");
        assert_eq!(quote_opt(None), "");
        assert_eq!(tri_state(Some(true)), "true");
        assert_eq!(tri_state(None), "");
    }
}
