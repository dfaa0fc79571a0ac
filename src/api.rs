//! HTTP surface: request validation, pipeline invocation, response envelope.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::ToSchema;

use crate::ads::{Ad, SearchSession};
use crate::config::Config;
use crate::enrichment;
use crate::error::ScanError;
use crate::scanner;

pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
    pub config: Config,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    pub api_key: String,
    pub keyword: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_num_results")]
    pub num_results: usize,
}

fn default_location() -> String {
    "us".to_string()
}

fn default_num_results() -> usize {
    10
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    pub success: bool,
    pub keyword: String,
    pub ads: Vec<Ad>,
    pub timestamp: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serp_screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub debug_info: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse)),
    tag = "ads"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "adspy".to_string(),
        version: SERVICE_VERSION.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Search the results surface for sponsored ads and enrich them.
#[utoipa::path(
    post,
    path = "/search",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Scan finished (possibly degraded, see debug_info)", body = SearchResponse),
        (status = 401, description = "Invalid API key", body = SearchResponse),
    ),
    tag = "ads"
)]
pub async fn search_ads(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> (StatusCode, Json<SearchResponse>) {
    // Unauthorized keys fail the whole request before any browsing begins.
    if request.api_key != state.config.api_key {
        return (
            StatusCode::UNAUTHORIZED,
            Json(SearchResponse {
                success: false,
                keyword: request.keyword,
                ads: vec![],
                timestamp: chrono::Utc::now().to_rfc3339(),
                source: source_name(),
                serp_screenshot: None,
                error: Some(ScanError::Unauthorized.to_string()),
                debug_info: None,
            }),
        );
    }

    info!("🚀 Search request: '{}' ({})", request.keyword, request.location);
    let mut session = SearchSession::new(&request.keyword, &request.location);

    match run_pipeline(&state.config, &mut session, request.num_results).await {
        Ok(ads) => {
            info!("✅ Search finished: {} ads for '{}'", ads.len(), request.keyword);
            (
                StatusCode::OK,
                Json(SearchResponse {
                    success: true,
                    keyword: request.keyword,
                    ads,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    source: source_name(),
                    serp_screenshot: session.serp_screenshot.take(),
                    error: None,
                    debug_info: Some(session.trace.into_value()),
                }),
            )
        }
        Err(e) => {
            error!("❌ Search failed for '{}': {}", request.keyword, e);
            (
                StatusCode::OK,
                Json(SearchResponse {
                    success: false,
                    keyword: request.keyword,
                    ads: vec![],
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    source: source_name(),
                    serp_screenshot: session.serp_screenshot.take(),
                    error: Some(e.to_string()),
                    debug_info: Some(session.trace.into_value()),
                }),
            )
        }
    }
}

/// Scan, merge, bound, then enrich. Enrichment never fails the pipeline.
async fn run_pipeline(
    config: &Config,
    session: &mut SearchSession,
    num_results: usize,
) -> Result<Vec<Ad>, ScanError> {
    scanner::scan_sponsored_ads(config, session).await?;

    let ad_set = std::mem::take(&mut session.ads);
    let mut ads = ad_set.finalize();
    if num_results > 0 {
        ads.truncate(num_results);
    }
    session.trace.record("ads_after_processing", ads.len() as u64);

    enrichment::enrich_with_transparency(config, &mut ads, &mut session.trace).await;
    enrichment::capture_landing_screenshots(config, &mut ads, &mut session.trace).await;

    Ok(ads)
}

fn source_name() -> String {
    "headless_chrome".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request: SearchRequest =
            serde_json::from_str(r#"{"api_key": "k", "keyword": "widgets"}"#).unwrap();
        assert_eq!(request.location, "us");
        assert_eq!(request.num_results, 10);
    }

    #[test]
    fn test_response_omits_empty_optionals() {
        let response = SearchResponse {
            success: true,
            keyword: "widgets".to_string(),
            ads: vec![],
            timestamp: chrono::Utc::now().to_rfc3339(),
            source: source_name(),
            serp_screenshot: None,
            error: None,
            debug_info: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("serp_screenshot").is_none());
        assert_eq!(json["success"], serde_json::json!(true));
    }
}
