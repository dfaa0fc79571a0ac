//! Session orchestrator: drives one browsing session through the results
//! pages, feeding each rendered document to the strategy set and aggregator.
//!
//! Page processing is strictly sequential — later pages depend on the same
//! browsing context for cookie and rate-limit continuity. The per-page
//! extraction step is pure with respect to the page HTML, so everything below
//! `process_page` is testable without a browser.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::Tab;
use once_cell::sync::Lazy;
use scraper::Html;
use tokio::time::sleep;
use tracing::{info, warn};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::ads::SearchSession;
use crate::browser;
use crate::config::{matches_any, Config};
use crate::error::ScanError;
use crate::extract::extract_ad;
use crate::strategies::{SPONSOR_LABEL, STRATEGIES};

const NAV_RETRY_LIMIT: u32 = 3;
const NAV_RETRY_DELAY: Duration = Duration::from_secs(5);
const RESULTS_PER_PAGE: u32 = 10;

// ============================================================================
// Locations
// ============================================================================

#[derive(Debug, Clone)]
pub struct LocaleSettings {
    pub domain: &'static str,
    pub gl: &'static str,
    pub hl: &'static str,
}

static LOCATIONS: Lazy<HashMap<&'static str, LocaleSettings>> = Lazy::new(|| {
    let mut map = HashMap::new();
    let mut insert = |code, domain, gl, hl| {
        map.insert(code, LocaleSettings { domain, gl, hl });
    };
    insert("us", "google.com", "us", "en");
    insert("uk", "google.co.uk", "uk", "en");
    insert("ca", "google.ca", "ca", "en");
    insert("au", "google.com.au", "au", "en");
    insert("de", "google.de", "de", "de");
    insert("fr", "google.fr", "fr", "fr");
    insert("es", "google.es", "es", "es");
    insert("it", "google.it", "it", "it");
    insert("br", "google.com.br", "br", "pt");
    insert("mx", "google.com.mx", "mx", "es");
    insert("in", "google.co.in", "in", "en");
    insert("jp", "google.co.jp", "jp", "ja");
    map
});

/// Locale for a location code; unknown codes silently fall back to "us".
pub fn locale_for(location: &str) -> &'static LocaleSettings {
    LOCATIONS
        .get(location)
        .unwrap_or_else(|| LOCATIONS.get("us").unwrap())
}

pub fn build_results_url(loc: &LocaleSettings, keyword: &str, page_index: u32) -> String {
    format!(
        "https://www.{}/search?q={}&gl={}&hl={}&start={}",
        loc.domain,
        urlencoding::encode(keyword),
        loc.gl,
        loc.hl,
        page_index * RESULTS_PER_PAGE
    )
}

// ============================================================================
// Navigation failure classification
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum NavClass {
    /// The surface is throttling us: stop paging, keep what we have.
    RateLimited,
    /// Timeout/connection-class failure: worth retrying on the same page.
    Transient,
    /// Anything else: give up on this page (and the ones after it).
    Fatal,
}

pub fn classify_nav_error(message: &str, config: &Config) -> NavClass {
    if matches_any(message, &config.rate_limit_patterns) {
        NavClass::RateLimited
    } else if matches_any(message, &config.transient_patterns) {
        NavClass::Transient
    } else {
        NavClass::Fatal
    }
}

enum NavFailure {
    RateLimited(String),
    PageFailed(String),
}

async fn navigate_with_retry(tab: &Tab, url: &str, config: &Config) -> Result<(), NavFailure> {
    let mut last_error = String::new();

    for attempt in 1..=NAV_RETRY_LIMIT {
        let outcome = tab
            .navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map(|_| ());

        match outcome {
            Ok(()) => return Ok(()),
            Err(e) => {
                let message = e.to_string();
                match classify_nav_error(&message, config) {
                    NavClass::RateLimited => return Err(NavFailure::RateLimited(message)),
                    NavClass::Transient => {
                        warn!("⚠️ Navigation attempt {}/{} failed: {}", attempt, NAV_RETRY_LIMIT, message);
                        last_error = message;
                        if attempt < NAV_RETRY_LIMIT {
                            sleep(NAV_RETRY_DELAY).await;
                        }
                    }
                    NavClass::Fatal => return Err(NavFailure::PageFailed(message)),
                }
            }
        }
    }

    Err(NavFailure::PageFailed(last_error))
}

// ============================================================================
// Per-page extraction (pure over the page HTML)
// ============================================================================

/// Run every strategy over one rendered page, merge candidates into the
/// session and update the termination counters. Returns newly added ads.
pub fn process_page(html: &str, page_index: u32, session: &mut SearchSession) -> usize {
    let doc = Html::parse_document(html);
    let page = page_index + 1;

    let mut added = 0;
    for strategy in STRATEGIES {
        let hits = (strategy.find)(&doc);
        let candidates: Vec<_> = hits
            .into_iter()
            .filter_map(|hit| extract_ad(hit.element, page_index, hit.block_override))
            .collect();

        session
            .trace
            .record_page(&format!("{}_hits", strategy.name), page, candidates.len() as u64);
        added += session.ads.merge(candidates);
    }

    session.pages_scanned = page;
    if added == 0 {
        session.consecutive_empty_pages += 1;
    } else {
        session.consecutive_empty_pages = 0;
    }
    session
        .trace
        .record_page("new_ads", page, added as u64);

    added
}

/// Termination policy: page bound, ad-count ceiling, or two consecutive pages
/// that contributed nothing new (the result surface is exhausted).
pub fn should_stop(session: &SearchSession, config: &Config) -> bool {
    session.pages_scanned >= config.max_pages
        || session.ads.len() >= config.ad_target
        || session.consecutive_empty_pages >= 2
}

// ============================================================================
// Orchestration
// ============================================================================

/// Scan the results surface for sponsored ads, accumulating into `session`.
///
/// Returns `Err` only when nothing could be scanned at all (connection
/// failure, or fatal navigation before the first page). Every in-loop failure
/// degrades to partial results with the reason recorded in the trace.
pub async fn scan_sponsored_ads(config: &Config, session: &mut SearchSession) -> Result<(), ScanError> {
    let loc = locale_for(&session.location);
    info!("🔎 Scanning for sponsored ads: '{}' ({})", session.keyword, session.location);

    let browser = browser::acquire(config).await?;
    let tab = browser::prepare_tab(&browser).map_err(|e| ScanError::Connection {
        attempts: 1,
        message: e.to_string(),
    })?;

    // Visit the homepage first: picks up cookies and the consent interstitial
    // the way a real visitor would.
    let home_url = format!("https://www.{}", loc.domain);
    session.trace.record("homepage", home_url.clone());
    tab.navigate_to(&home_url)
        .and_then(|t| t.wait_until_navigated())
        .map_err(|e| ScanError::Navigation(e.to_string()))?;
    sleep(Duration::from_millis(1500 + (rand::random::<u64>() % 1500))).await;

    handle_consent(&tab, session).await;

    for page_index in 0..config.max_pages {
        let page = page_index + 1;
        let url = build_results_url(loc, &session.keyword, page_index);
        session.trace.record_page("url", page, url.clone());

        match navigate_with_retry(&tab, &url, config).await {
            Ok(()) => {}
            Err(NavFailure::RateLimited(message)) => {
                warn!("⚠️ Rate limited on page {}: keeping {} accumulated ads", page, session.ads.len());
                session.trace.record("rate_limited", message);
                break;
            }
            Err(NavFailure::PageFailed(message)) => {
                if page_index == 0 && session.ads.is_empty() {
                    return Err(ScanError::Navigation(message));
                }
                warn!("⚠️ Page {} navigation failed: {}", page, message);
                session.trace.record_page("navigation_error", page, message);
                break;
            }
        }

        // Mandatory settle: querying an unsettled document silently
        // undercounts ads rather than failing.
        settle_delay().await;

        let html = match tab.get_content() {
            Ok(html) => html,
            Err(e) => {
                warn!("⚠️ Could not read page {} content: {}", page, e);
                session.trace.record_page("content_error", page, e.to_string());
                break;
            }
        };

        // Blocked pages render as content, not navigation errors.
        if matches_any(&html, &config.rate_limit_patterns) {
            warn!("⚠️ Rate-limit signature in page {} content", page);
            session.trace.record("rate_limited", format!("signature match on page {}", page));
            break;
        }

        if page_index == 0 {
            capture_serp_debug(&tab, session);
        }

        let added = process_page(&html, page_index, session);
        info!("📄 Page {}: {} new ads ({} total)", page, added, session.ads.len());

        if should_stop(session, config) {
            break;
        }
    }

    session.trace.record("pages_scanned", session.pages_scanned as u64);
    session.trace.record("raw_ads_found", session.ads.len() as u64);
    Ok(())
}

/// Random 2-4s wait for client-side rendering to finish.
async fn settle_delay() {
    sleep(Duration::from_millis(2000 + (rand::random::<u64>() % 2000))).await;
}

/// Best-effort consent/interstitial handling: click the first visible button
/// from a bounded set of known patterns, tolerate total failure.
async fn handle_consent(tab: &Arc<Tab>, session: &mut SearchSession) {
    let result = tab.evaluate(
        r#"
        (() => {
            const selectors = [
                'button[id="L2AGLb"]',
                'button[id*="accept"]',
                'button[id*="agree"]',
                '[aria-label="Accept all"]',
                'form[action*="consent"] button',
            ];
            for (const selector of selectors) {
                const btn = document.querySelector(selector);
                if (btn && btn.offsetParent !== null) {
                    btn.click();
                    return "consent_clicked";
                }
            }
            return "no_consent";
        })();
        "#,
        false,
    );

    match result {
        Ok(remote) => {
            if let Some(serde_json::Value::String(outcome)) = remote.value {
                session.trace.record("consent", outcome.clone());
                if outcome == "consent_clicked" {
                    sleep(Duration::from_secs(2)).await;
                    let _ = tab.wait_until_navigated();
                }
            }
        }
        Err(e) => {
            session.trace.record("consent_error", e.to_string());
        }
    }
}

/// First-page diagnostics: viewport screenshot plus a body-text sample, so a
/// zero-ad response can be told apart from a blocked or empty page.
fn capture_serp_debug(tab: &Arc<Tab>, session: &mut SearchSession) {
    match tab.capture_screenshot(CaptureScreenshotFormatOption::Jpeg, Some(60), None, true) {
        Ok(bytes) => session.serp_screenshot = Some(BASE64.encode(bytes)),
        Err(e) => session.trace.record("serp_screenshot_error", e.to_string()),
    }

    if let Ok(remote) = tab.evaluate("document.body.innerText", false) {
        if let Some(serde_json::Value::String(body)) = remote.value {
            let sample: String = body.chars().take(1000).collect();
            session.trace.record("has_sponsored_text", body.contains(SPONSOR_LABEL));
            session.trace.record("page_text_sample", sample);
        }
    }
}
