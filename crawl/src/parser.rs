use crawl_core::Source;
use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_matching_root(document: &Html, candidates: &[&str]) -> ElementRef<'_> {
    for candidate in candidates {
        if let Ok(selector) = Selector::parse(candidate) {
            if let Some(el) = document.select(&selector).next() {
                return el;
            }
        }
    }
    document.root_element()
}

fn stripped_ids(root: ElementRef<'_>, strip_selectors: &str) -> HashSet<NodeId> {
    let mut ids = HashSet::new();
    if let Ok(selector) = Selector::parse(strip_selectors) {
        for el in root.select(&selector) {
            ids.insert(el.id());
        }
    }
    ids
}

fn is_stripped(el: &ElementRef<'_>, stripped: &HashSet<NodeId>) -> bool {
    el.ancestors().any(|a| stripped.contains(&a.id()))
}

/// Walks `content_selector` matches under `root`, dropping anything inside
/// `strip_selectors`, under `min_len` characters, or rejected by
/// `extra_filter`; deduplicates case-insensitively while keeping the first
/// occurrence's order.
fn extract_paragraphs(
    root: ElementRef<'_>,
    content_selector: &str,
    strip_selectors: &str,
    min_len: usize,
    extra_filter: impl Fn(&str) -> bool,
) -> String {
    let stripped = stripped_ids(root, strip_selectors);
    let selector = match Selector::parse(content_selector) {
        Ok(s) => s,
        Err(_) => return String::new(),
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for el in root.select(&selector) {
        if is_stripped(&el, &stripped) {
            continue;
        }
        let text = normalize_ws(&el.text().collect::<Vec<_>>().join(" "));
        if text.chars().count() < min_len {
            continue;
        }
        if !extra_filter(&text) {
            continue;
        }
        let key = text.to_lowercase();
        if seen.insert(key) {
            out.push(text);
        }
    }

    out.join("\n")
}

const ENCYCLOPEDIA_STRIP: &str =
    "table, div.navbox, div.infobox, div.reflist, div.mw-editsection, \
     sup.reference, span.mw-editsection, div#toc, div.thumb, ol.references, ul.gallery";
const ARTICLE_SITE_STRIP: &str = "script, style, noscript, header, footer, form, aside";
const BLOG_SITE_STRIP: &str = "script, style, noscript, header, footer, form, aside";

fn parse_encyclopedia(raw_html: &str) -> String {
    let document = Html::parse_document(raw_html);
    let root = first_matching_root(&document, &["div.mw-parser-output", "div#mw-content-text"]);
    extract_paragraphs(root, "p, h2, h3, li", ENCYCLOPEDIA_STRIP, 40, |_| true)
}

fn parse_article_site(raw_html: &str) -> String {
    let document = Html::parse_document(raw_html);
    let root = first_matching_root(&document, &["article", "[itemprop=\"articleBody\"]", "main"]);
    extract_paragraphs(root, "p, h1, h2, h3, li", ARTICLE_SITE_STRIP, 40, |_| true)
}

fn parse_blog_site(raw_html: &str) -> String {
    let document = Html::parse_document(raw_html);
    let root = first_matching_root(&document, &["article", "main"]);
    extract_paragraphs(root, "p, h1, h2, h3, li", BLOG_SITE_STRIP, 30, |text| {
        let lower = text.to_lowercase();
        !(lower.contains("подпис") && lower.contains("телег"))
    })
}

/// Pure dispatch from source tag to the matching text extractor. No I/O:
/// the two-phase encyclopedia fetch is a worker-side pre-step, not part of
/// this registry.
pub fn parse(source: Source, raw_payload: &str) -> String {
    match source {
        Source::Encyclopedia => parse_encyclopedia(raw_payload),
        Source::ArticleSite => parse_article_site(raw_payload),
        Source::BlogSite => parse_blog_site(raw_payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encyclopedia_drops_short_fragments_and_dedups() {
        let html = r#"<html><body><div class="mw-parser-output">
            <p>Short.</p>
            <p>This is a long enough paragraph to survive the forty character cutoff easily.</p>
            <p>THIS IS A LONG ENOUGH PARAGRAPH TO SURVIVE THE FORTY CHARACTER CUTOFF EASILY.</p>
            <div class="navbox"><p>This paragraph lives inside a navbox and must be stripped entirely.</p></div>
        </div></body></html>"#;
        let text = parse_encyclopedia(html);
        assert_eq!(
            text,
            "This is a long enough paragraph to survive the forty character cutoff easily."
        );
    }

    #[test]
    fn article_site_prefers_article_tag_and_strips_aside() {
        let html = r#"<html><body>
            <aside><p>This aside paragraph is long enough but must still be stripped away.</p></aside>
            <article><p>This article paragraph is long enough to be kept in the final output.</p></article>
        </body></html>"#;
        let text = parse_article_site(html);
        assert_eq!(
            text,
            "This article paragraph is long enough to be kept in the final output."
        );
    }

    #[test]
    fn blog_site_uses_thirty_char_minimum_and_drops_subscribe_cta() {
        let html = r#"<html><body><main>
            <p>Short post.</p>
            <p>Подпишись на наш телеграм канал прямо сейчас, это важно для всех.</p>
            <p>This blog paragraph clears thirty characters easily.</p>
        </main></body></html>"#;
        let text = parse_blog_site(html);
        assert_eq!(text, "This blog paragraph clears thirty characters easily.");
    }

    #[test]
    fn falls_back_to_whole_document_when_no_container_matches() {
        let html = "<html><body><p>A paragraph with more than forty characters of real content.</p></body></html>";
        let text = parse_encyclopedia(html);
        assert_eq!(text, "A paragraph with more than forty characters of real content.");
    }
}
