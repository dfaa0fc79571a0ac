//! Ordered set of DOM-query strategies for locating sponsored-ad candidates.
//!
//! The engine's ad markup drifts between rollouts (class names, ARIA roles,
//! data attributes), so candidates are located by several independent
//! strategies and unioned. Deduplication is the aggregator's job, not ours:
//! a later strategy re-finding an ad a different way is expected.
//!
//! Strategies are data, not branching. Adding a fourth entry to `STRATEGIES`
//! requires no change to the extractor, aggregator or orchestrator.

use scraper::{ElementRef, Html, Selector};

/// Visible label the engine places above paid results.
pub const SPONSOR_LABEL: &str = "Sponsored";

// Text blocks longer than this are result containers, not individual ad cards.
const MAX_AD_CARD_TEXT: usize = 1500;

/// One candidate element located by a strategy, with an optional
/// block-position override (container strategies know top from bottom).
pub struct StrategyHit<'a> {
    pub element: ElementRef<'a>,
    pub block_override: Option<&'static str>,
}

/// An independent extraction strategy: a name plus a pure document query.
pub struct AdStrategy {
    pub name: &'static str,
    pub find: for<'a> fn(&'a Html) -> Vec<StrategyHit<'a>>,
}

/// Evaluation order is fixed and meaningful: earlier strategies win dedup
/// priority in the aggregator.
pub static STRATEGIES: &[AdStrategy] = &[
    AdStrategy {
        name: "sponsored_label",
        find: find_sponsored_label,
    },
    AdStrategy {
        name: "ad_markers",
        find: find_ad_markers,
    },
    AdStrategy {
        name: "ad_containers",
        find: find_ad_containers,
    },
];

/// Strategy 1: divs whose visible text carries the sponsorship label.
///
/// Size-bounded so we pick up ad cards rather than whole-page containers that
/// merely mention the label somewhere, and required to hold at least one link.
fn find_sponsored_label(doc: &Html) -> Vec<StrategyHit<'_>> {
    let div_sel = Selector::parse("div").unwrap();
    let link_sel = Selector::parse("a[href]").unwrap();

    let mut hits = Vec::new();
    for element in doc.select(&div_sel) {
        let text: String = element.text().collect();
        if text.chars().count() > MAX_AD_CARD_TEXT {
            continue;
        }
        if !text.contains(SPONSOR_LABEL) {
            continue;
        }
        if element.select(&link_sel).next().is_none() {
            continue;
        }
        hits.push(StrategyHit {
            element,
            block_override: None,
        });
    }
    hits
}

/// Strategy 2: known ad-marking attributes and classes.
///
/// Several alternative selectors are tried independently since the markup
/// varies by rollout; any of them matching is a candidate.
fn find_ad_markers(doc: &Html) -> Vec<StrategyHit<'_>> {
    let selectors = [
        "[data-text-ad='1']",
        ".uEierd",
        ".commercial-unit-desktop-top",
    ];

    let mut hits = Vec::new();
    for css in selectors {
        let sel = Selector::parse(css).unwrap();
        for element in doc.select(&sel) {
            hits.push(StrategyHit {
                element,
                block_override: None,
            });
        }
    }
    hits
}

/// Strategy 3: anchors inside the known top/bottom ad container ids.
fn find_ad_containers(doc: &Html) -> Vec<StrategyHit<'_>> {
    let anchor_sel = Selector::parse("a[data-rw]").unwrap();
    let fallback_sel = Selector::parse("[data-dtld]").unwrap();

    let mut hits = Vec::new();
    for (css, block) in [("#tads", "top"), ("#tadsb", "bottom")] {
        let container_sel = Selector::parse(css).unwrap();
        for container in doc.select(&container_sel) {
            let text: String = container.text().collect();
            // A real ad container is either labeled or nearly empty chrome.
            if !text.contains(SPONSOR_LABEL) && text.chars().count() >= 50 {
                continue;
            }
            let mut anchors: Vec<ElementRef> = container.select(&anchor_sel).collect();
            if anchors.is_empty() {
                anchors = container.select(&fallback_sel).collect();
            }
            for element in anchors {
                hits.push(StrategyHit {
                    element,
                    block_override: Some(block),
                });
            }
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sponsored_label_finds_labeled_card() {
        let html = Html::parse_document(
            r#"<html><body>
                <div id="card"><span>Sponsored</span>
                    <a href="https://example.com/">Buy widgets</a>
                </div>
                <div id="mention">Sponsored content policies are described here.</div>
            </body></html>"#,
        );
        let hits = find_sponsored_label(&html);
        // The card (and its labeled ancestors) match; the link-less mention never does.
        assert!(!hits.is_empty());
        for hit in &hits {
            let text: String = hit.element.text().collect();
            assert!(text.contains("Buy widgets"));
        }
    }

    #[test]
    fn test_sponsored_label_rejects_oversized_containers() {
        let filler = "organic result text ".repeat(100);
        let html = Html::parse_document(&format!(
            r#"<html><body><div>Sponsored <a href="https://example.com/">ad</a>{}</div></body></html>"#,
            filler
        ));
        assert!(find_sponsored_label(&html).is_empty());
    }

    #[test]
    fn test_ad_markers_match_each_selector_variant() {
        let html = Html::parse_document(
            r#"<html><body>
                <div data-text-ad="1"><a href="https://a.example/">A</a></div>
                <div class="uEierd"><a href="https://b.example/">B</a></div>
                <div class="commercial-unit-desktop-top"><a href="https://c.example/">C</a></div>
            </body></html>"#,
        );
        assert_eq!(find_ad_markers(&html).len(), 3);
    }

    #[test]
    fn test_ad_containers_yield_block_overrides() {
        let html = Html::parse_document(
            r#"<html><body>
                <div id="tads">Sponsored
                    <a data-rw="x" href="https://top.example/">Top ad</a>
                </div>
                <div id="tadsb">Sponsored
                    <a data-rw="y" href="https://bottom.example/">Bottom ad</a>
                </div>
            </body></html>"#,
        );
        let hits = find_ad_containers(&html);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].block_override, Some("top"));
        assert_eq!(hits[1].block_override, Some("bottom"));
    }

    #[test]
    fn test_strategies_tolerate_empty_document() {
        let html = Html::parse_document("<html><body><p>nothing here</p></body></html>");
        for strategy in STRATEGIES {
            assert!((strategy.find)(&html).is_empty());
        }
    }
}
