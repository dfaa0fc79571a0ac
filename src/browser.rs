//! Browser session acquisition.
//!
//! The controllable browser is a collaborator: either a remote CDP endpoint
//! (`BROWSER_WS_URL`) or a locally launched headless Chrome. Acquisition is
//! retried a bounded number of times with a fixed backoff before the whole
//! operation fails.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tokio::time::sleep;
use tracing::warn;

use crate::config::Config;
use crate::error::ScanError;
use crate::stealth;

pub const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Acquire a browsing session, retrying connection failures.
pub async fn acquire(config: &Config) -> Result<Browser, ScanError> {
    let mut last_error = String::new();

    for attempt in 1..=CONNECT_ATTEMPTS {
        match open_session(config) {
            Ok(browser) => return Ok(browser),
            Err(e) => {
                warn!("⚠️ Browser session attempt {}/{} failed: {}", attempt, CONNECT_ATTEMPTS, e);
                last_error = e.to_string();
                if attempt < CONNECT_ATTEMPTS {
                    sleep(CONNECT_BACKOFF).await;
                }
            }
        }
    }

    Err(ScanError::Connection {
        attempts: CONNECT_ATTEMPTS,
        message: last_error,
    })
}

fn open_session(config: &Config) -> Result<Browser> {
    if let Some(ws_url) = &config.browser_ws_url {
        return Browser::connect(ws_url.clone());
    }

    let user_agent = stealth::random_user_agent();
    let ua_arg = format!("--user-agent={}", user_agent);

    let args = vec![
        OsStr::new("--disable-blink-features=AutomationControlled"),
        OsStr::new("--no-sandbox"),
        OsStr::new("--disable-dev-shm-usage"),
        OsStr::new("--disable-infobars"),
        OsStr::new("--disable-background-networking"),
        OsStr::new("--disable-extensions"),
        OsStr::new("--no-first-run"),
        OsStr::new("--disable-gpu"),
        OsStr::new("--incognito"),
        OsStr::new("--headless=new"),
        OsStr::new(&ua_arg),
    ];

    Browser::new(LaunchOptions {
        headless: false, // modern headless mode is passed via args
        window_size: Some((1920, 1080)),
        args,
        ..Default::default()
    })
}

/// Open a tab with the stealth script armed for every subsequent navigation.
pub fn prepare_tab(browser: &Browser) -> Result<Arc<Tab>> {
    let tab = browser.new_tab()?;

    tab.call_method(
        headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument {
            source: stealth::get_stealth_script().to_string(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        },
    )?;

    Ok(tab)
}
