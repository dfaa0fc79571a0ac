//! Field extraction: one candidate DOM element in, one normalized Ad out.
//!
//! Every optional field is best-effort: a sub-selector missing on this
//! rollout's markup simply leaves the field empty. Only a missing
//! headline+link pair invalidates the whole candidate.

use reqwest::Url;
use scraper::{ElementRef, Selector};

use crate::ads::{Ad, Sitelink};
use crate::redirect::{is_redirect_url, resolve_redirect};
use crate::strategies::SPONSOR_LABEL;

const MIN_DESCRIPTION_LEN: usize = 30;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_SITELINK_TEXT: usize = 50;
const MAX_SITELINKS: usize = 6;
const MAX_ADVERTISER_LEN: usize = 40;
const MAX_LABEL_TEXT_LEN: usize = 100;

/// Extract a normalized Ad from one candidate element, or nothing.
pub fn extract_ad(element: ElementRef, page_index: u32, block_override: Option<&str>) -> Option<Ad> {
    let (headline_href, title) = find_headline(element)?;
    let link = resolve_redirect(&headline_href);

    if link.is_empty() || title.is_empty() {
        return None;
    }
    // Self-links back into the engine are navigation chrome, not ads.
    if is_engine_link(&link) {
        return None;
    }

    let block_position = match block_override {
        Some(block) => block.to_string(),
        None if page_index == 0 => "top".to_string(),
        None => format!("page_{}", page_index + 1),
    };

    Some(Ad {
        position: 0, // assigned by the aggregator after the merge completes
        block_position,
        displayed_link: find_displayed_link(element).unwrap_or_else(|| host_of(&link)),
        advertiser: find_advertiser(element, &title),
        description: find_description(element, &title),
        sitelinks: find_sitelinks(element, &headline_href, &title),
        title,
        link,
        source_page: page_index + 1,
        ..Default::default()
    })
}

/// True when the URL points back into the search engine's own domain.
pub fn is_engine_link(link: &str) -> bool {
    match Url::parse(link) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("");
            let host = host.strip_prefix("www.").unwrap_or(host);
            host.starts_with("google.")
        }
        Err(_) => link.contains("google.com"),
    }
}

// ============================================================================
// Ordered-fallback field extraction
// ============================================================================

/// Try CSS sub-selectors in priority order, returning the first candidate for
/// which `pick` yields a value. The recurring "several sub-selectors, first
/// success wins" pattern lives here instead of nested branching.
fn first_match<'a, T>(
    element: ElementRef<'a>,
    selectors: &[&str],
    pick: impl Fn(ElementRef<'a>) -> Option<T>,
) -> Option<T> {
    for css in selectors {
        let sel = Selector::parse(css).unwrap();
        for candidate in element.select(&sel) {
            if let Some(value) = pick(candidate) {
                return Some(value);
            }
        }
    }
    None
}

/// Locate the headline anchor: explicit ad-link attribute, then an anchor
/// wrapping a heading, then the first outbound anchor. Returns (href, title).
fn find_headline(element: ElementRef) -> Option<(String, String)> {
    // Container strategies hand us the anchor itself.
    if element.value().name() == "a" {
        if let Some(found) = headline_from_anchor(element) {
            return Some(found);
        }
    }

    first_match(element, &["a[data-rw]"], headline_from_anchor)
        .or_else(|| {
            first_match(element, &["a[href]"], |a| {
                let h3_sel = Selector::parse("h3").unwrap();
                a.select(&h3_sel).next()?;
                headline_from_anchor(a)
            })
        })
        .or_else(|| first_match(element, &["a[href^='http']"], headline_from_anchor))
}

fn headline_from_anchor(anchor: ElementRef) -> Option<(String, String)> {
    let href = anchor.value().attr("href")?.trim().to_string();
    if href.is_empty() {
        return None;
    }

    let h3_sel = Selector::parse("h3").unwrap();
    let title = anchor
        .select(&h3_sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| element_text(anchor));

    if title.is_empty() {
        return None;
    }
    Some((href, title))
}

/// The human-readable URL shown in the ad (cite-style elements).
fn find_displayed_link(element: ElementRef) -> Option<String> {
    first_match(
        element,
        &["cite", "span.VuuXrf", "[data-dtld]", ".Zu0yb"],
        |el| {
            let text = element_text(el);
            if text.is_empty() {
                return None;
            }
            Some(text)
        },
    )
}

/// Short label-like advertiser/site name distinct from the title.
fn find_advertiser(element: ElementRef, title: &str) -> Option<String> {
    first_match(element, &["span.VuuXrf"], |el| {
        let text = element_text(el);
        if text.is_empty() || text == title || text.chars().count() >= MAX_ADVERTISER_LEN {
            return None;
        }
        Some(text)
    })
    .or_else(|| {
        first_match(element, &["[role='text']"], |el| {
            let text = element_text(el);
            if text.is_empty() || text == title || text.chars().count() >= MAX_LABEL_TEXT_LEN {
                return None;
            }
            Some(text)
        })
    })
}

/// First text block long enough to be a real description. Short strings are
/// noise; blocks containing the sponsorship label are chrome.
fn find_description(element: ElementRef, title: &str) -> Option<String> {
    first_match(element, &[".VwiC3b", "[data-sncf]", "div.Va3FIb"], |el| {
        let text = element_text(el);
        if text.chars().count() < MIN_DESCRIPTION_LEN || text == title || text.contains(SPONSOR_LABEL)
        {
            return None;
        }
        Some(text.chars().take(MAX_DESCRIPTION_LEN).collect())
    })
}

/// Every outbound anchor other than the headline, deduplicated by text and
/// capped. Engine-host hrefs are skipped unless they are ad-click redirects.
fn find_sitelinks(element: ElementRef, headline_href: &str, title: &str) -> Vec<Sitelink> {
    let anchor_sel = Selector::parse("a[href]").unwrap();

    let mut sitelinks: Vec<Sitelink> = Vec::new();
    for anchor in element.select(&anchor_sel) {
        let href = anchor.value().attr("href").unwrap_or("").trim();
        let text = element_text(anchor);

        if href.is_empty() || text.is_empty() || href == headline_href {
            continue;
        }
        if text == title || text.chars().count() > MAX_SITELINK_TEXT {
            continue;
        }
        if href.contains("google.com") && !is_redirect_url(href) {
            continue;
        }

        let link = resolve_redirect(href);
        if link.is_empty() || is_engine_link(&link) {
            continue;
        }
        if sitelinks.iter().any(|sl| sl.title == text) {
            continue;
        }

        sitelinks.push(Sitelink { title: text, link });
        if sitelinks.len() >= MAX_SITELINKS {
            break;
        }
    }
    sitelinks
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn host_of(link: &str) -> String {
    Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    const AD_CARD: &str = r#"<html><body>
        <div id="ad">
            <span>Sponsored</span>
            <span class="VuuXrf">Acme Widgets</span>
            <cite>www.acme-widgets.com</cite>
            <a data-rw="1" href="https://www.google.com/aclk?adurl=https://acme-widgets.com/buy">
                <h3>Premium Widgets - Free Shipping On All Orders</h3>
            </a>
            <div class="VwiC3b">Shop the widest selection of widgets online with next day delivery and a lifetime guarantee.</div>
            <a href="https://acme-widgets.com/deals">Current Deals</a>
            <a href="https://acme-widgets.com/reviews">Customer Reviews</a>
        </div>
    </body></html>"#;

    fn ad_element(doc: &Html) -> ElementRef<'_> {
        let sel = Selector::parse("#ad").unwrap();
        doc.select(&sel).next().unwrap()
    }

    #[test]
    fn test_extracts_full_ad_record() {
        let doc = Html::parse_document(AD_CARD);
        let ad = extract_ad(ad_element(&doc), 0, None).unwrap();

        assert_eq!(ad.title, "Premium Widgets - Free Shipping On All Orders");
        assert_eq!(ad.link, "https://acme-widgets.com/buy");
        assert_eq!(ad.displayed_link, "www.acme-widgets.com");
        assert_eq!(ad.advertiser.as_deref(), Some("Acme Widgets"));
        assert!(ad.description.as_deref().unwrap().starts_with("Shop the widest"));
        assert_eq!(ad.block_position, "top");
        assert_eq!(ad.source_page, 1);
        assert_eq!(ad.sitelinks.len(), 2);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let doc = Html::parse_document(AD_CARD);
        let first = extract_ad(ad_element(&doc), 0, None).unwrap();
        let second = extract_ad(ad_element(&doc), 0, None).unwrap();
        assert_eq!(serde_json::to_value(&first).unwrap(), serde_json::to_value(&second).unwrap());
    }

    #[test]
    fn test_rejects_self_link_candidates() {
        let html = r#"<html><body><div id="ad">
            <a href="https://www.google.com/search?q=widgets"><h3>More widget results</h3></a>
        </div></body></html>"#;
        let doc = Html::parse_document(html);
        assert!(extract_ad(ad_element(&doc), 0, None).is_none());
    }

    #[test]
    fn test_rejects_candidate_without_headline() {
        let html = r#"<html><body><div id="ad"><span>Sponsored</span><p>no links here</p></div></body></html>"#;
        let doc = Html::parse_document(html);
        assert!(extract_ad(ad_element(&doc), 0, None).is_none());
    }

    #[test]
    fn test_short_description_is_dropped() {
        let html = r#"<html><body><div id="ad">
            <a href="https://example.com/"><h3>Example headline</h3></a>
            <div class="VwiC3b">Too short.</div>
        </div></body></html>"#;
        let doc = Html::parse_document(html);
        let ad = extract_ad(ad_element(&doc), 0, None).unwrap();
        assert!(ad.description.is_none());
    }

    #[test]
    fn test_displayed_link_falls_back_to_host() {
        let html = r#"<html><body><div id="ad">
            <a href="https://shop.example.net/page"><h3>Example headline</h3></a>
        </div></body></html>"#;
        let doc = Html::parse_document(html);
        let ad = extract_ad(ad_element(&doc), 0, None).unwrap();
        assert_eq!(ad.displayed_link, "shop.example.net");
    }

    #[test]
    fn test_sitelinks_are_capped_and_never_the_title() {
        let mut links = String::new();
        for i in 0..10 {
            links.push_str(&format!(
                r#"<a href="https://example.com/sl{}">Sitelink {}</a>"#,
                i, i
            ));
        }
        let html = format!(
            r#"<html><body><div id="ad">
                <a href="https://example.com/"><h3>Example headline</h3></a>
                <a href="https://example.com/dupe">Example headline</a>
                {}
            </div></body></html>"#,
            links
        );
        let doc = Html::parse_document(&html);
        let ad = extract_ad(ad_element(&doc), 0, None).unwrap();
        assert_eq!(ad.sitelinks.len(), 6);
        assert!(ad.sitelinks.iter().all(|sl| sl.title != ad.title));
    }

    #[test]
    fn test_sitelinks_dedup_by_title() {
        let html = r#"<html><body><div id="ad">
            <a href="https://example.com/"><h3>Example headline</h3></a>
            <a href="https://example.com/a">Deals</a>
            <a href="https://example.com/b">Deals</a>
        </div></body></html>"#;
        let doc = Html::parse_document(html);
        let ad = extract_ad(ad_element(&doc), 0, None).unwrap();
        assert_eq!(ad.sitelinks.len(), 1);
        assert_eq!(ad.sitelinks[0].link, "https://example.com/a");
    }

    #[test]
    fn test_block_position_for_later_pages() {
        let doc = Html::parse_document(AD_CARD);
        let ad = extract_ad(ad_element(&doc), 1, None).unwrap();
        assert_eq!(ad.block_position, "page_2");
        assert_eq!(ad.source_page, 2);

        let ad = extract_ad(ad_element(&doc), 0, Some("bottom")).unwrap();
        assert_eq!(ad.block_position, "bottom");
    }

    #[test]
    fn test_container_anchor_is_its_own_headline() {
        let html = r#"<html><body>
            <a id="ad" data-rw="1" href="https://example.com/landing">Visit Example Today</a>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let ad = extract_ad(ad_element(&doc), 0, Some("top")).unwrap();
        assert_eq!(ad.title, "Visit Example Today");
        assert_eq!(ad.link, "https://example.com/landing");
        assert!(ad.sitelinks.is_empty());
    }
}
