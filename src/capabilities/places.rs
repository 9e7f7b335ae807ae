//! Google Places client for business discovery.
//!
//! Wraps the Places text-search and details endpoints. Text search is
//! paginated; each page of results is expanded with a details call so leads
//! carry phone, website and rating data from the start.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{CapabilityError, CapabilityResult, PlacesDirectory};

/// Base URL for the Places API.
const PLACES_API_BASE: &str = "https://maps.googleapis.com/maps/api/place";

/// Fields requested from the details endpoint.
const DETAIL_FIELDS: &str = "name,formatted_address,formatted_phone_number,website,\
rating,user_ratings_total,geometry,types";

/// Delay required before a `next_page_token` becomes valid.
const NEXT_PAGE_DELAY: Duration = Duration::from_secs(2);

/// A business record as returned by the places directory.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRecord {
    /// Stable identifier assigned by the directory.
    pub place_id: String,
    /// Business name.
    pub name: String,
    /// Full formatted address.
    pub address: Option<String>,
    /// City parsed from the address.
    pub city: Option<String>,
    /// State or region parsed from the address.
    pub state: Option<String>,
    /// Postal code parsed from the address.
    pub postal_code: Option<String>,
    /// Country parsed from the address.
    pub country: Option<String>,
    /// Formatted phone number.
    pub phone: Option<String>,
    /// Contact email; directories rarely provide one.
    pub email: Option<String>,
    /// Website URL.
    pub website: Option<String>,
    /// Primary business category.
    pub category: Option<String>,
    /// Aggregate rating.
    pub rating: Option<f64>,
    /// Number of reviews behind the rating.
    pub reviews_count: Option<i64>,
    /// Latitude.
    pub latitude: Option<f64>,
    /// Longitude.
    pub longitude: Option<f64>,
}

/// Client for the Google Places API.
pub struct GooglePlacesClient {
    api_key: String,
    http_client: Client,
    base_url: String,
}

impl GooglePlacesClient {
    /// Creates a new client with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http_client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: PLACES_API_BASE.to_string(),
        }
    }

    /// Overrides the API base URL (used to point at a test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Runs one page of text search.
    async fn search_page(
        &self,
        query: &str,
        location: &str,
        page_token: Option<&str>,
    ) -> CapabilityResult<TextSearchResponse> {
        let url = format!("{}/textsearch/json", self.base_url);
        let search_query = format!("{} in {}", query, location);

        let mut params = vec![("query", search_query.as_str()), ("key", self.api_key.as_str())];
        if let Some(token) = page_token {
            params.push(("pagetoken", token));
        }

        let response = self
            .http_client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| CapabilityError::Http(e.to_string()))?;

        let body: TextSearchResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        check_api_status(&body.status, body.error_message.as_deref())?;
        Ok(body)
    }

    /// Fetches detailed fields for one place.
    async fn place_details(&self, place_id: &str) -> CapabilityResult<Option<PlaceDetails>> {
        let url = format!("{}/details/json", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("place_id", place_id),
                ("key", self.api_key.as_str()),
                ("fields", DETAIL_FIELDS),
            ])
            .send()
            .await
            .map_err(|e| CapabilityError::Http(e.to_string()))?;

        let body: DetailsResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        if body.status == "NOT_FOUND" {
            return Ok(None);
        }
        check_api_status(&body.status, body.error_message.as_deref())?;
        Ok(body.result)
    }
}

#[async_trait]
impl PlacesDirectory for GooglePlacesClient {
    async fn search(
        &self,
        query: &str,
        location: &str,
        max_results: usize,
    ) -> CapabilityResult<Vec<PlaceRecord>> {
        info!(query, location, max_results, "Searching places directory");

        let mut summaries: Vec<PlaceSummary> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .search_page(query, location, page_token.as_deref())
                .await?;
            summaries.extend(page.results);
            debug!(total = summaries.len(), "Retrieved search page");

            if summaries.len() >= max_results {
                break;
            }
            match page.next_page_token {
                Some(token) => {
                    // The token is not immediately valid on Google's side.
                    tokio::time::sleep(NEXT_PAGE_DELAY).await;
                    page_token = Some(token);
                }
                None => break,
            }
        }
        summaries.truncate(max_results);

        let mut records = Vec::with_capacity(summaries.len());
        for summary in summaries {
            match self.place_details(&summary.place_id).await {
                Ok(Some(details)) => {
                    records.push(build_record(&summary.place_id, details));
                }
                Ok(None) => {
                    warn!(place_id = %summary.place_id, "Place vanished between search and details");
                }
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    // A single bad details call should not sink the whole
                    // collection; the summary still identifies the business.
                    warn!(place_id = %summary.place_id, error = %e, "Details fetch failed, keeping summary");
                    records.push(summary_record(summary));
                }
            }
        }

        info!(count = records.len(), "Collected business records");
        Ok(records)
    }
}

/// Maps a Places API status string to a capability error.
fn check_api_status(status: &str, error_message: Option<&str>) -> CapabilityResult<()> {
    let detail = || error_message.unwrap_or("no detail").to_string();
    match status {
        "OK" | "ZERO_RESULTS" => Ok(()),
        "REQUEST_DENIED" => Err(CapabilityError::AuthRejected(detail())),
        "OVER_QUERY_LIMIT" => Err(CapabilityError::RateLimited { retry_after: None }),
        "INVALID_REQUEST" => Err(CapabilityError::InvalidResponse(detail())),
        other => Err(CapabilityError::Unavailable(format!(
            "unexpected status {}: {}",
            other,
            detail()
        ))),
    }
}

/// Builds a full record from a details payload.
fn build_record(place_id: &str, details: PlaceDetails) -> PlaceRecord {
    let address = details.formatted_address.clone();
    let (city, state, postal_code, country) = address
        .as_deref()
        .map(parse_address)
        .unwrap_or((None, None, None, None));
    let (latitude, longitude) = details
        .geometry
        .as_ref()
        .map(|g| (Some(g.location.lat), Some(g.location.lng)))
        .unwrap_or((None, None));

    PlaceRecord {
        place_id: place_id.to_string(),
        name: details.name.unwrap_or_default(),
        address,
        city,
        state,
        postal_code,
        country,
        phone: details.formatted_phone_number,
        email: None,
        website: details.website,
        category: primary_category(&details.types),
        rating: details.rating,
        reviews_count: details.user_ratings_total,
        latitude,
        longitude,
    }
}

/// Builds a minimal record from a search summary when details failed.
fn summary_record(summary: PlaceSummary) -> PlaceRecord {
    let (city, state, postal_code, country) = summary
        .formatted_address
        .as_deref()
        .map(parse_address)
        .unwrap_or((None, None, None, None));

    PlaceRecord {
        place_id: summary.place_id,
        name: summary.name.unwrap_or_default(),
        address: summary.formatted_address,
        city,
        state,
        postal_code,
        country,
        phone: None,
        email: None,
        website: None,
        category: primary_category(&summary.types),
        rating: summary.rating,
        reviews_count: summary.user_ratings_total,
        latitude: None,
        longitude: None,
    }
}

/// Parses a formatted address into (city, state, postal_code, country).
///
/// Handles the common US shape "street, city, ST 12345, country"; other
/// shapes degrade to treating trailing components as city/country.
pub fn parse_address(address: &str) -> (Option<String>, Option<String>, Option<String>, Option<String>) {
    let parts: Vec<&str> = address.split(',').map(str::trim).collect();
    if parts.is_empty() {
        return (None, None, None, None);
    }

    let mut city = None;
    let mut state = None;
    let mut postal_code = None;
    let mut country = None;

    if parts.len() >= 2 {
        country = non_empty(parts[parts.len() - 1]);

        let state_zip = parts[parts.len() - 2];
        if let Some((st, zip)) = split_state_zip(state_zip) {
            state = Some(st);
            postal_code = Some(zip);
            if parts.len() >= 3 {
                city = non_empty(parts[parts.len() - 3]);
            }
        } else {
            city = non_empty(state_zip);
        }
    } else {
        city = non_empty(parts[0]);
    }

    (city, state, postal_code, country)
}

/// Splits "TX 78701" into its state and zip components.
fn split_state_zip(part: &str) -> Option<(String, String)> {
    let mut it = part.split_whitespace();
    let st = it.next()?;
    let zip = it.next()?;
    if it.next().is_some() {
        return None;
    }
    let state_ok = st.len() == 2 && st.chars().all(|c| c.is_ascii_uppercase());
    let zip_ok = zip.len() >= 5
        && zip
            .chars()
            .all(|c| c.is_ascii_digit() || c == '-');
    if state_ok && zip_ok {
        Some((st.to_string(), zip.to_string()))
    } else {
        None
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Picks the first non-generic type as the primary category.
pub fn primary_category(types: &[String]) -> Option<String> {
    const GENERIC: [&str; 4] = ["establishment", "point_of_interest", "premise", "subpremise"];

    types
        .iter()
        .find(|t| !GENERIC.contains(&t.as_str()))
        .or_else(|| types.first())
        .map(|t| title_case(t))
}

/// Formats "dental_clinic" as "Dental Clinic".
fn title_case(raw: &str) -> String {
    raw.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// Wire types for the Places API.

#[derive(Debug, Deserialize)]
struct TextSearchResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<PlaceSummary>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaceSummary {
    place_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    user_ratings_total: Option<i64>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    result: Option<PlaceDetails>,
}

#[derive(Debug, Deserialize)]
struct PlaceDetails {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    formatted_phone_number: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    user_ratings_total: Option<i64>,
    #[serde(default)]
    geometry: Option<Geometry>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_us_address() {
        let (city, state, zip, country) =
            parse_address("100 Congress Ave, Austin, TX 78701, USA");
        assert_eq!(city.as_deref(), Some("Austin"));
        assert_eq!(state.as_deref(), Some("TX"));
        assert_eq!(zip.as_deref(), Some("78701"));
        assert_eq!(country.as_deref(), Some("USA"));
    }

    #[test]
    fn parse_address_without_state_zip() {
        let (city, state, zip, country) = parse_address("1 High St, London, United Kingdom");
        assert_eq!(city.as_deref(), Some("London"));
        assert_eq!(state, None);
        assert_eq!(zip, None);
        assert_eq!(country.as_deref(), Some("United Kingdom"));
    }

    #[test]
    fn parse_single_component_address() {
        let (city, state, zip, country) = parse_address("Austin");
        assert_eq!(city.as_deref(), Some("Austin"));
        assert_eq!(state, None);
        assert_eq!(zip, None);
        assert_eq!(country, None);
    }

    #[test]
    fn primary_category_skips_generic_types() {
        let types = vec![
            "point_of_interest".to_string(),
            "establishment".to_string(),
            "dental_clinic".to_string(),
        ];
        assert_eq!(primary_category(&types).as_deref(), Some("Dental Clinic"));
    }

    #[test]
    fn primary_category_falls_back_to_first_type() {
        let types = vec!["establishment".to_string()];
        assert_eq!(primary_category(&types).as_deref(), Some("Establishment"));
        assert_eq!(primary_category(&[]), None);
    }

    #[test]
    fn api_status_mapping() {
        assert!(check_api_status("OK", None).is_ok());
        assert!(check_api_status("ZERO_RESULTS", None).is_ok());
        assert!(matches!(
            check_api_status("REQUEST_DENIED", Some("bad key")),
            Err(CapabilityError::AuthRejected(_))
        ));
        assert!(matches!(
            check_api_status("OVER_QUERY_LIMIT", None),
            Err(CapabilityError::RateLimited { .. })
        ));
        assert!(matches!(
            check_api_status("UNKNOWN_ERROR", None),
            Err(CapabilityError::Unavailable(_))
        ));
    }

    #[test]
    fn zip_splitting_rejects_non_us_shapes() {
        assert_eq!(
            split_state_zip("TX 78701"),
            Some(("TX".to_string(), "78701".to_string()))
        );
        assert_eq!(split_state_zip("Texas 78701"), None);
        assert_eq!(split_state_zip("London"), None);
        assert_eq!(
            split_state_zip("CA 94103-1234"),
            Some(("CA".to_string(), "94103-1234".to_string()))
        );
    }
}
