//! Post-merge enrichment: advertiser transparency creatives and landing-page
//! screenshots.
//!
//! Both passes are fully tolerant of per-item failure: a failed lookup or
//! capture leaves the ad intact (plus an error marker) and never aborts its
//! siblings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::stream::{self, StreamExt};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, Tab};
use reqwest::Url;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{info, warn};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::ads::{Ad, CreativeSummary, DebugTrace};
use crate::browser;
use crate::config::Config;

const MAX_TRANSPARENCY_DOMAINS: usize = 10;
const MAX_CREATIVES: usize = 5;
const TRANSPARENCY_CONCURRENCY: usize = 4;
const TRANSPARENCY_TIMEOUT: Duration = Duration::from_secs(15);
const SCREENSHOT_NAV_TIMEOUT: Duration = Duration::from_secs(20);
const SCREENSHOT_SETTLE: Duration = Duration::from_secs(3);

// ============================================================================
// Transparency enrichment
// ============================================================================

#[derive(Debug, Deserialize)]
struct TransparencyResponse {
    #[serde(default)]
    ad_creatives: Vec<RawCreative>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawCreative {
    pub image: Option<String>,
    pub format: Option<String>,
    pub advertiser_id: Option<String>,
    pub advertiser: Option<String>,
    pub last_shown: Option<String>,
}

/// Client for the external creative-history lookup, keyed by domain.
pub struct TransparencyClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TransparencyClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(TRANSPARENCY_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .transparency_api_url
            .as_ref()
            .map(|url| Self::new(url, config.transparency_api_key.clone()))
    }

    pub async fn lookup(&self, domain: &str) -> Result<Vec<RawCreative>> {
        let mut request = self.client.get(&self.base_url).query(&[("domain", domain)]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("transparency lookup failed: {}", response.status()));
        }

        let data: TransparencyResponse = response.json().await?;
        Ok(data.ad_creatives)
    }
}

/// Normalized advertiser domain for an ad: host of `link` minus any leading
/// `www.`, falling back to the displayed link.
pub fn advertiser_domain(ad: &Ad) -> Option<String> {
    host_from(&ad.link).or_else(|| host_from(&format!("https://{}", ad.displayed_link)))
}

fn host_from(url: &str) -> Option<String> {
    let host = Url::parse(url).ok()?.host_str()?.to_string();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Attach one domain's creative history to every ad sharing that domain.
pub fn apply_creatives(ads: &mut [Ad], domain: &str, creatives: &[RawCreative]) {
    let Some(top) = creatives.first() else {
        return;
    };

    for ad in ads.iter_mut() {
        if advertiser_domain(ad).as_deref() != Some(domain) {
            continue;
        }
        ad.ad_creative_image = top.image.clone();
        ad.advertiser_id = top.advertiser_id.clone();
        ad.advertiser_name = top.advertiser.clone();
        ad.all_creatives = creatives
            .iter()
            .take(MAX_CREATIVES)
            .map(|c| CreativeSummary {
                format: c.format.clone(),
                image: c.image.clone(),
                last_shown: c.last_shown.clone(),
            })
            .collect();
    }
}

/// Transparency pass: dedup advertiser domains, query each (bounded, with a
/// concurrency cap), attach creatives. Lookup failures are recorded in the
/// trace and never abort sibling lookups.
pub async fn enrich_with_transparency(config: &Config, ads: &mut [Ad], trace: &mut DebugTrace) {
    let Some(client) = TransparencyClient::from_config(config) else {
        trace.record("transparency_skipped", "no endpoint configured");
        return;
    };
    if ads.is_empty() {
        return;
    }

    // Unique domains in ad order, bounded.
    let mut domains: Vec<String> = Vec::new();
    for ad in ads.iter() {
        if let Some(domain) = advertiser_domain(ad) {
            if !domains.contains(&domain) {
                domains.push(domain);
            }
        }
        if domains.len() >= MAX_TRANSPARENCY_DOMAINS {
            break;
        }
    }
    trace.record("transparency_domains", domains.len() as u64);

    let client = &client;
    let results: Vec<(String, Result<Vec<RawCreative>>)> = stream::iter(domains)
        .map(|domain| async move {
            let result = client.lookup(&domain).await;
            (domain, result)
        })
        .buffer_unordered(TRANSPARENCY_CONCURRENCY)
        .collect()
        .await;

    let mut enriched = 0;
    for (domain, result) in results {
        match result {
            Ok(creatives) if !creatives.is_empty() => {
                apply_creatives(ads, &domain, &creatives);
                enriched += 1;
            }
            Ok(_) => {
                trace.record(&format!("transparency_empty_{}", domain), true);
            }
            Err(e) => {
                warn!("⚠️ Transparency lookup failed for {}: {}", domain, e);
                trace.record(&format!("transparency_error_{}", domain), e.to_string());
            }
        }
    }
    info!("🖼️ Transparency enrichment: {} domains with creatives", enriched);
}

// ============================================================================
// Landing-page screenshots
// ============================================================================

/// Capture a full-page screenshot of every ad's landing page.
///
/// Each capture gets its own short-lived tab, closed regardless of outcome.
/// Failures set `screenshot_error` on the one ad and move on.
pub async fn capture_landing_screenshots(config: &Config, ads: &mut [Ad], trace: &mut DebugTrace) {
    if ads.is_empty() {
        return;
    }

    let browser = match browser::acquire(config).await {
        Ok(browser) => browser,
        Err(e) => {
            warn!("⚠️ Screenshot browser unavailable: {}", e);
            trace.record("screenshot_browser_error", e.to_string());
            for ad in ads.iter_mut() {
                ad.screenshot_error = Some("screenshot browser unavailable".to_string());
            }
            return;
        }
    };

    let mut captured = 0u64;
    let mut failed = 0u64;

    for ad in ads.iter_mut() {
        if !ad.link.starts_with("http") {
            continue;
        }
        match capture_one(&browser, &ad.link).await {
            Ok(encoded) => {
                ad.landing_page_screenshot = Some(encoded);
                captured += 1;
            }
            Err(e) => {
                ad.screenshot_error = Some(e.to_string());
                failed += 1;
            }
        }
    }

    info!("📸 Landing screenshots: {} captured, {} failed", captured, failed);
    trace.record("screenshots_captured", captured);
    trace.record("screenshots_failed", failed);
}

async fn capture_one(browser: &Browser, url: &str) -> Result<String> {
    let tab = browser.new_tab()?;
    let result = navigate_and_capture(&tab, url).await;
    // Release the tab in every path; a leaked tab outlives the request.
    let _ = tab.close(true);
    result
}

async fn navigate_and_capture(tab: &Arc<Tab>, url: &str) -> Result<String> {
    tab.set_default_timeout(SCREENSHOT_NAV_TIMEOUT);
    tab.navigate_to(url)?;
    tab.wait_until_navigated()?;
    sleep(SCREENSHOT_SETTLE).await;

    let bytes = tab.capture_screenshot(CaptureScreenshotFormatOption::Jpeg, Some(85), None, true)?;
    Ok(BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad(link: &str, displayed: &str) -> Ad {
        Ad {
            title: format!("Ad for {}", link),
            link: link.to_string(),
            displayed_link: displayed.to_string(),
            ..Default::default()
        }
    }

    fn creative(image: &str) -> RawCreative {
        RawCreative {
            image: Some(image.to_string()),
            format: Some("image".to_string()),
            advertiser_id: Some("AR123".to_string()),
            advertiser: Some("Acme Inc".to_string()),
            last_shown: Some("2025-06-01".to_string()),
        }
    }

    #[test]
    fn test_advertiser_domain_strips_www() {
        let ad = ad("https://www.acme.example/landing?x=1", "");
        assert_eq!(advertiser_domain(&ad).as_deref(), Some("acme.example"));
    }

    #[test]
    fn test_advertiser_domain_falls_back_to_displayed_link() {
        let ad = ad("", "www.fallback.example");
        assert_eq!(advertiser_domain(&ad).as_deref(), Some("fallback.example"));
    }

    #[test]
    fn test_apply_creatives_targets_matching_domain_only() {
        let mut ads = vec![
            ad("https://acme.example/a", ""),
            ad("https://other.example/b", ""),
        ];
        let creatives: Vec<RawCreative> = (0..8).map(|i| creative(&format!("img{}", i))).collect();

        apply_creatives(&mut ads, "acme.example", &creatives);

        assert_eq!(ads[0].ad_creative_image.as_deref(), Some("img0"));
        assert_eq!(ads[0].advertiser_name.as_deref(), Some("Acme Inc"));
        assert_eq!(ads[0].all_creatives.len(), MAX_CREATIVES);
        assert!(ads[1].ad_creative_image.is_none());
        assert!(ads[1].all_creatives.is_empty());
    }

    #[tokio::test]
    async fn test_transparency_lookup_parses_creatives() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "ad_creatives": [
                { "image": "https://cdn.example/1.png", "format": "image",
                  "advertiser_id": "AR1", "advertiser": "Acme Inc", "last_shown": "2025-06-01" }
            ]
        });
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = TransparencyClient::new(&server.url(), None);
        let creatives = client.lookup("acme.example").await.unwrap();
        assert_eq!(creatives.len(), 1);
        assert_eq!(creatives[0].advertiser.as_deref(), Some("Acme Inc"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_lookup_never_drops_ads() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let mut config = Config::from_env();
        config.transparency_api_url = Some(server.url());
        config.transparency_api_key = None;

        let mut ads = vec![
            ad("https://acme.example/a", ""),
            ad("https://other.example/b", ""),
        ];
        let mut trace = DebugTrace::new();

        enrich_with_transparency(&config, &mut ads, &mut trace).await;

        // All ads survive; the failures land in the trace.
        assert_eq!(ads.len(), 2);
        assert!(ads.iter().all(|a| a.ad_creative_image.is_none()));
        assert!(trace.get("transparency_error_acme.example").is_some());
        assert!(trace.get("transparency_error_other.example").is_some());
    }

    #[tokio::test]
    async fn test_transparency_skipped_without_endpoint() {
        let mut config = Config::from_env();
        config.transparency_api_url = None;

        let mut ads = vec![ad("https://acme.example/a", "")];
        let mut trace = DebugTrace::new();
        enrich_with_transparency(&config, &mut ads, &mut trace).await;
        assert!(trace.get("transparency_skipped").is_some());
    }
}
