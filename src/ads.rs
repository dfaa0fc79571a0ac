//! Ad data model and per-request session state.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::aggregate::AdSet;

/// One sitelink shown below an ad's main headline.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
pub struct Sitelink {
    pub title: String,
    pub link: String,
}

/// Summary of one historical creative from the transparency lookup.
#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
pub struct CreativeSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_shown: Option<String>,
}

/// One discovered sponsored result, normalized across extraction strategies.
///
/// `title` and `link` are jointly required; everything else is best-effort.
/// `position` is only meaningful after the aggregator finalizes the merged set.
#[derive(Debug, Serialize, Deserialize, Clone, Default, ToSchema)]
pub struct Ad {
    /// 1-based rank in the final merged ordering.
    pub position: u32,
    /// Where on the results surface this ad was found: "top", "bottom" or "page_N".
    pub block_position: String,
    pub title: String,
    /// Resolved destination URL (never the search engine's own host).
    pub link: String,
    pub displayed_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertiser: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sitelinks: Vec<Sitelink>,
    /// 1-based pagination page that produced this ad.
    pub source_page: u32,

    // Enrichment fields, attached after the merge completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_creative_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertiser_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertiser_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub all_creatives: Vec<CreativeSummary>,
    /// Base64-encoded JPEG of the landing page, when capture succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing_page_screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_error: Option<String>,
}

// ============================================================================
// Debug Trace
// ============================================================================

/// Append-only diagnostic map carried through the whole pipeline.
///
/// The first write for a key wins; page-scoped entries carry the page number
/// in the key, so every stage can record freely without clobbering earlier
/// stages. Serialized verbatim into the response's `debug_info`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DebugTrace(serde_json::Map<String, serde_json::Value>);

impl DebugTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value under `key` unless the key was already written.
    pub fn record(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.0
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }

    /// Record a value scoped to a 1-based page number.
    pub fn record_page(&mut self, key: &str, page: u32, value: impl Into<serde_json::Value>) {
        self.record(&format!("{}_page_{}", key, page), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> serde_json::Value {
        serde_json::Value::Object(self.0)
    }
}

// ============================================================================
// Search Session
// ============================================================================

/// Ephemeral state for one `/search` request.
///
/// Created at request start, mutated only by the orchestrator, discarded after
/// the response is produced. Never persisted.
#[derive(Debug, Default)]
pub struct SearchSession {
    pub keyword: String,
    pub location: String,
    pub pages_scanned: u32,
    pub consecutive_empty_pages: u32,
    pub ads: AdSet,
    /// Base64 JPEG of the first results page, for the response envelope.
    pub serp_screenshot: Option<String>,
    pub trace: DebugTrace,
}

impl SearchSession {
    pub fn new(keyword: &str, location: &str) -> Self {
        let mut session = Self {
            keyword: keyword.to_string(),
            location: location.to_string(),
            ..Default::default()
        };
        session
            .trace
            .record("session_id", uuid::Uuid::new_v4().to_string());
        session
    }
}
