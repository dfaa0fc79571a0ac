//! Decoding of search-engine redirect/indirection URLs.
//!
//! Ad clicks and some organic results go through the engine's own click
//! trackers; the true destination rides in a query parameter. Malformed input
//! always degrades to "return the input unchanged".

use reqwest::Url;

// Destination parameter names in priority order. Ad-click parameters first.
const AD_CLICK_PARAMS: &[&str] = &["adurl", "dest", "url"];
const GENERIC_REDIRECT_PARAMS: &[&str] = &["url", "q"];

/// True when the href is an engine click-tracker rather than a direct link.
pub fn is_redirect_url(href: &str) -> bool {
    href.contains("/aclk") || (href.contains("google.") && href.contains("/url?"))
}

/// Resolve a possibly-indirected href to its destination URL.
///
/// Returns the input unchanged when it is not a known redirect shape or when
/// it cannot be parsed at all.
pub fn resolve_redirect(href: &str) -> String {
    let parsed = match parse_lenient(href) {
        Some(url) => url,
        None => return href.to_string(),
    };

    let candidates: &[&str] = if parsed.path().contains("/aclk") {
        AD_CLICK_PARAMS
    } else if parsed.path().starts_with("/url") {
        GENERIC_REDIRECT_PARAMS
    } else {
        return href.to_string();
    };

    let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
    for name in candidates {
        if let Some((_, value)) = pairs.iter().find(|(key, _)| key == name) {
            if !value.is_empty() {
                return value.clone();
            }
        }
    }

    href.to_string()
}

/// Parse an href that may be page-relative ("/aclk?adurl=..." is common in
/// the live DOM) by joining it against the engine origin.
fn parse_lenient(href: &str) -> Option<Url> {
    if let Ok(url) = Url::parse(href) {
        return Some(url);
    }
    Url::parse("https://www.google.com").ok()?.join(href).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ad_click_redirect_resolves_adurl() {
        let href = "https://www.google.com/aclk?sa=l&ai=xyz&adurl=https://example.com/x";
        assert_eq!(resolve_redirect(href), "https://example.com/x");
    }

    #[test]
    fn test_ad_click_params_are_tried_in_priority_order() {
        let href = "https://www.googleadservices.com/pagead/aclk?url=https://second.example/&adurl=https://first.example/";
        assert_eq!(resolve_redirect(href), "https://first.example/");
    }

    #[test]
    fn test_generic_redirect_resolves_q_param() {
        let href = "https://www.google.com/url?q=https://example.org/page&sa=U";
        assert_eq!(resolve_redirect(href), "https://example.org/page");
    }

    #[test]
    fn test_relative_ad_click_href() {
        let href = "/aclk?sa=l&adurl=https%3A%2F%2Fexample.com%2Flanding";
        assert_eq!(resolve_redirect(href), "https://example.com/landing");
    }

    #[test]
    fn test_non_redirect_is_unchanged() {
        let href = "https://example.com/products?color=red";
        assert_eq!(resolve_redirect(href), href);
    }

    #[test]
    fn test_malformed_input_is_unchanged() {
        assert_eq!(resolve_redirect(""), "");
        assert_eq!(resolve_redirect("not a url at all"), "not a url at all");
        assert_eq!(resolve_redirect("http://"), "http://");
    }

    #[test]
    fn test_redirect_without_known_param_is_unchanged() {
        let href = "https://www.google.com/aclk?sa=l&ai=xyz";
        assert_eq!(resolve_redirect(href), href);
    }
}
