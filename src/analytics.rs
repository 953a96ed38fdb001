//! Core Reporting API access.
//!
//! `ReportQuery` is the immutable descriptor for one page request and
//! `ReportPage` is what comes back. The extractor only talks to the
//! `ReportSource` trait; `AnalyticsSource` is the live implementation over
//! the `google-analytics3` hub.

use async_trait::async_trait;
use google_analytics3::api::{GaData, Scope};
use google_analytics3::{hyper, hyper_rustls, Analytics, Error as ApiError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use crate::cfg::DateRange;
use crate::error::ExtractError;

/// Largest `max-results` the Core Reporting API accepts.
pub const MAX_RESULTS_LIMIT: usize = 10_000;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub type AnalyticsHub = Analytics<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

/// The fixed part of every query: what to measure and how to slice it.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct QuerySpec {
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
    pub sort: Option<String>,
    pub filters: Option<String>,
    // DEFAULT, FASTER or HIGHER_PRECISION
    pub sampling_level: Option<String>,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            metrics: [
                "ga:sessions",
                "ga:goalCompletionsAll",
                "ga:pageviews",
                "ga:uniquePageviews",
                "ga:bounceRate",
                "ga:goalConversionRateAll",
                "ga:entrances",
                "ga:avgTimeOnPage",
                "ga:exitRate",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            dimensions: vec!["ga:pagePath".to_string(), "ga:date".to_string()],
            sort: Some("-ga:sessions".to_string()),
            filters: None,
            sampling_level: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportQuery {
    property_id: String,
    range: DateRange,
    metrics: Vec<String>,
    dimensions: Vec<String>,
    sort: Option<String>,
    filters: Option<String>,
    sampling_level: Option<String>,
    offset: usize,
    max_results: usize,
}

impl ReportQuery {
    pub fn build(
        spec: &QuerySpec,
        property_id: &str,
        range: DateRange,
        offset: usize,
        max_results: usize,
    ) -> Result<Self, ExtractError> {
        if property_id.trim().is_empty() {
            return Err(ExtractError::QueryConstruction("property id is empty".into()));
        }
        if spec.metrics.is_empty() {
            return Err(ExtractError::QueryConstruction("at least one metric is required".into()));
        }
        if range.start > range.end {
            return Err(ExtractError::QueryConstruction(format!(
                "start date {} is after end date {}",
                range.start, range.end
            )));
        }
        if max_results == 0 || max_results > MAX_RESULTS_LIMIT {
            return Err(ExtractError::QueryConstruction(format!(
                "max results must be between 1 and {}, got {}",
                MAX_RESULTS_LIMIT, max_results
            )));
        }

        Ok(Self {
            property_id: property_id.trim().to_string(),
            range,
            metrics: spec.metrics.clone(),
            dimensions: spec.dimensions.clone(),
            sort: spec.sort.clone().filter(|s| !s.is_empty()),
            filters: spec.filters.clone().filter(|s| !s.is_empty()),
            sampling_level: spec.sampling_level.clone().filter(|s| !s.is_empty()),
            offset,
            max_results,
        })
    }

    pub fn ids(&self) -> String {
        if self.property_id.starts_with("ga:") {
            self.property_id.clone()
        } else {
            format!("ga:{}", self.property_id)
        }
    }

    pub fn property_id(&self) -> &str {
        &self.property_id
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    pub fn start_date(&self) -> String {
        self.range.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_date(&self) -> String {
        self.range.end.format(DATE_FORMAT).to_string()
    }

    pub fn metrics_param(&self) -> String {
        self.metrics.join(",")
    }

    pub fn dimensions_param(&self) -> Option<String> {
        if self.dimensions.is_empty() {
            None
        } else {
            Some(self.dimensions.join(","))
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// The API counts rows from 1.
    pub fn start_index(&self) -> usize {
        self.offset + 1
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportPage {
    pub total_results: usize,
    pub contains_sampled_data: bool,
    pub column_headers: Option<Vec<String>>,
    pub profile_name: Option<String>,
    pub rows: Vec<Vec<String>>,
}

impl From<GaData> for ReportPage {
    fn from(data: GaData) -> Self {
        let column_headers = data.column_headers.map(|headers| {
            headers
                .into_iter()
                .map(|h| h.name.unwrap_or_default())
                .collect()
        });
        Self {
            total_results: data.total_results.map_or(0, |t| t.max(0) as usize),
            contains_sampled_data: data.contains_sampled_data.unwrap_or(false),
            column_headers,
            profile_name: data.profile_info.and_then(|p| p.profile_name),
            rows: data.rows.unwrap_or_default(),
        }
    }
}

/// Anything that can answer a report query.
#[async_trait(?Send)]
pub trait ReportSource {
    async fn execute(&self, query: &ReportQuery) -> Result<ReportPage, ExtractError>;
}

pub struct AnalyticsSource {
    hub: AnalyticsHub,
}

impl AnalyticsSource {
    pub fn new(hub: AnalyticsHub) -> Self {
        Self { hub }
    }
}

#[async_trait(?Send)]
impl ReportSource for AnalyticsSource {
    async fn execute(&self, query: &ReportQuery) -> Result<ReportPage, ExtractError> {
        let ids = query.ids();
        let start_date = query.start_date();
        let end_date = query.end_date();
        let metrics = query.metrics_param();
        let start_index = i32::try_from(query.start_index()).map_err(|_| {
            ExtractError::QueryConstruction(format!("offset {} out of range", query.offset()))
        })?;

        debug!(property_id = query.property_id(), range = %query.range(), start_index,
               "Issuing Core Reporting query");

        let mut call = self
            .hub
            .data()
            .ga_get(&ids, &start_date, &end_date, &metrics)
            .start_index(start_index)
            .max_results(query.max_results() as i32)
            .add_scope(Scope::Readonly);
        if let Some(dimensions) = query.dimensions_param() {
            call = call.dimensions(&dimensions);
        }
        if let Some(sort) = &query.sort {
            call = call.sort(sort);
        }
        if let Some(filters) = &query.filters {
            call = call.filters(filters);
        }
        if let Some(level) = &query.sampling_level {
            call = call.sampling_level(level);
        }

        match call.doit().await {
            Ok((_, data)) => Ok(ReportPage::from(data)),
            Err(e) => Err(classify_api_error(e)),
        }
    }
}

pub fn classify_api_error(err: ApiError) -> ExtractError {
    match err {
        ApiError::MissingToken(e) => ExtractError::Reauthorize(e.to_string()),
        ApiError::Failure(response) => {
            let status = response.status();
            let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
            api_status_error(status.as_u16(), reason)
        }
        ApiError::BadRequest(body) => {
            let error = &body["error"];
            let status = error["code"].as_u64().and_then(|c| u16::try_from(c).ok()).unwrap_or(400);
            let reason = error["message"].as_str().unwrap_or("Bad Request").to_string();
            api_status_error(status, reason)
        }
        ApiError::FieldClash(field) => {
            ExtractError::QueryConstruction(format!("parameter {} given twice", field))
        }
        ApiError::JsonDecodeError(body, e) => {
            warn!(body_len = body.len(), "Could not decode report response");
            ExtractError::Transport(format!("undecodable response: {}", e))
        }
        ApiError::HttpError(e) => ExtractError::Transport(e.to_string()),
        other => ExtractError::Transport(other.to_string()),
    }
}

/// A 401 means the access token itself was rejected, which no other property can get past.
fn api_status_error(status: u16, reason: String) -> ExtractError {
    if status == 401 {
        ExtractError::Reauthorize(format!("{}: {}", status, reason))
    } else {
        ExtractError::Api { status, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use google_analytics3::api::{GaDataColumnHeaders, GaDataProfileInfo};

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2017, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2017, 1, 2).unwrap(),
        )
    }

    #[test]
    fn test_build_query_parameters() {
        let spec = QuerySpec {
            filters: Some("ga:dimension2==https://example.com/".into()),
            ..QuerySpec::default()
        };
        let query = ReportQuery::build(&spec, "119857637", range(), 10_000, 10_000).unwrap();

        assert_eq!(query.ids(), "ga:119857637");
        assert_eq!(query.start_date(), "2017-01-01");
        assert_eq!(query.end_date(), "2017-01-02");
        assert_eq!(query.start_index(), 10_001);
        assert_eq!(query.dimensions_param().as_deref(), Some("ga:pagePath,ga:date"));
        assert!(query.metrics_param().starts_with("ga:sessions,ga:goalCompletionsAll,"));
        assert_eq!(query.filters.as_deref(), Some("ga:dimension2==https://example.com/"));
    }

    #[test]
    fn test_prefixed_id_kept() {
        let query = ReportQuery::build(&QuerySpec::default(), "ga:42", range(), 0, 100).unwrap();
        assert_eq!(query.ids(), "ga:42");
        assert_eq!(query.start_index(), 1);
    }

    #[test]
    fn test_build_rejects_malformed_parameters() {
        let spec = QuerySpec::default();
        let backwards = DateRange::new(range().end, range().start);

        for result in [
            ReportQuery::build(&spec, "", range(), 0, 100),
            ReportQuery::build(&spec, "1", backwards, 0, 100),
            ReportQuery::build(&spec, "1", range(), 0, 0),
            ReportQuery::build(&spec, "1", range(), 0, MAX_RESULTS_LIMIT + 1),
            ReportQuery::build(&QuerySpec { metrics: vec![], ..spec.clone() }, "1", range(), 0, 100),
        ] {
            assert!(matches!(result, Err(ExtractError::QueryConstruction(_))));
        }
    }

    #[test]
    fn test_page_from_ga_data() {
        let data = GaData {
            total_results: Some(12_000),
            contains_sampled_data: Some(false),
            column_headers: Some(vec![
                GaDataColumnHeaders { name: Some("ga:pagePath".into()), ..Default::default() },
                GaDataColumnHeaders { name: Some("ga:sessions".into()), ..Default::default() },
            ]),
            profile_info: Some(GaDataProfileInfo {
                profile_name: Some("All Web Site Data".into()),
                ..Default::default()
            }),
            rows: Some(vec![vec!["/".into(), "10".into()]]),
            ..Default::default()
        };

        let page = ReportPage::from(data);
        assert_eq!(page.total_results, 12_000);
        assert!(!page.contains_sampled_data);
        assert_eq!(page.column_headers, Some(vec!["ga:pagePath".to_string(), "ga:sessions".to_string()]));
        assert_eq!(page.profile_name.as_deref(), Some("All Web Site Data"));
        assert_eq!(page.rows.len(), 1);
    }

    #[test]
    fn test_empty_ga_data_defaults() {
        let page = ReportPage::from(GaData::default());
        assert_eq!(page, ReportPage::default());
    }

    #[test]
    fn test_classify_missing_token_requires_reauthorization() {
        let err = ApiError::MissingToken(Box::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            "invalid_grant",
        )));
        let classified = classify_api_error(err);
        assert!(matches!(classified, ExtractError::Reauthorize(_)));
        assert!(classified.aborts_run());
    }

    #[test]
    fn test_classify_bad_request_carries_code_and_message() {
        let body = serde_json::json!({
            "error": { "code": 403, "message": "User does not have sufficient permissions for this profile." }
        });
        match classify_api_error(ApiError::BadRequest(body)) {
            ExtractError::Api { status, reason } => {
                assert_eq!(status, 403);
                assert!(reason.starts_with("User does not have"));
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_classify_http_failure_carries_status_and_reason() {
        let response = hyper::Response::builder()
            .status(503)
            .body(hyper::Body::empty())
            .unwrap();
        match classify_api_error(ApiError::Failure(response)) {
            ExtractError::Api { status, reason } => {
                assert_eq!(status, 503);
                assert_eq!(reason, "Service Unavailable");
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_classify_unauthorized_requires_reauthorization() {
        let body = serde_json::json!({
            "error": { "code": 401, "message": "Invalid Credentials" }
        });
        let classified = classify_api_error(ApiError::BadRequest(body));
        assert!(matches!(classified, ExtractError::Reauthorize(_)));
        assert!(classified.aborts_run());

        let response = hyper::Response::builder()
            .status(401)
            .body(hyper::Body::empty())
            .unwrap();
        assert!(classify_api_error(ApiError::Failure(response)).aborts_run());
    }

    #[test]
    fn test_classify_field_clash_is_query_error() {
        assert!(matches!(
            classify_api_error(ApiError::FieldClash("max-results")),
            ExtractError::QueryConstruction(_)
        ));
    }
}
