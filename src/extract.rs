//! HTML title/description/content/link extraction.

use scraper::{Html, Selector};
use url::Url;

use crate::url_canon;

const MAX_TITLE: usize = 500;
const MAX_DESCRIPTION: usize = 1000;
const MAX_CONTENT: usize = 50_000;

const SKIP_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico",
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
    ".zip", ".rar", ".tar", ".gz", ".7z",
    ".mp3", ".mp4", ".avi", ".mov", ".wmv",
    ".css", ".js", ".json", ".xml",
    ".exe", ".dmg", ".apk",
    ".woff", ".woff2", ".ttf",
];

/// Extracted page content plus outbound links, already canonicalized and
/// deduplicated.
pub struct Extracted {
    pub title: String,
    pub description: String,
    pub content: String,
    pub links: Vec<String>,
}

/// Returns `true` if `url`'s path has an extension the crawler must never
/// fetch.
pub fn should_skip(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Parses `html` (already fetched from `final_url`, i.e. post-redirect) and
/// extracts title, description, content and outbound links.
pub fn extract(html: &str, final_url: &Url) -> Extracted {
    let document = Html::parse_document(html);

    let title = text_of(&document, "title")
        .unwrap_or_default()
        .chars()
        .take(MAX_TITLE)
        .collect::<String>();

    let description = meta_content(&document, "description")
        .unwrap_or_default()
        .chars()
        .take(MAX_DESCRIPTION)
        .collect::<String>();

    let content = body_text(&document)
        .chars()
        .take(MAX_CONTENT)
        .collect::<String>();

    let links = extract_links(&document, final_url);

    Extracted {
        title,
        description,
        content,
        links,
    }
}

fn text_of(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document.select(&sel).next().map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
}

fn meta_content(document: &Html, name: &str) -> Option<String> {
    let sel = Selector::parse(&format!(r#"meta[name="{name}"]"#)).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
}

const SKIP_TAGS: &[&str] = &["script", "style", "nav", "footer", "header", "aside"];

fn body_text(document: &Html) -> String {
    let body_sel = Selector::parse("body").unwrap();
    let Some(body) = document.select(&body_sel).next() else {
        return String::new();
    };

    let mut words = Vec::new();
    collect_text(body, &mut words);
    normalize_whitespace(&words.join(" "))
}

fn collect_text(el: scraper::ElementRef, out: &mut Vec<String>) {
    let tag = el.value().name();
    if SKIP_TAGS.contains(&tag) {
        return;
    }
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        } else if let Some(child_el) = scraper::ElementRef::wrap(child) {
            collect_text(child_el, out);
        }
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_links(document: &Html, base: &Url) -> Vec<String> {
    let Ok(sel) = Selector::parse("a") else {
        return vec![];
    };
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for el in document.select(&sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let trimmed = href.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some(canonical) = url_canon::resolve_and_canonicalize(base, href) else {
            continue;
        };
        let Ok(parsed) = Url::parse(&canonical) else {
            continue;
        };
        if should_skip(&parsed) {
            continue;
        }
        if seen.insert(canonical.clone()) {
            links.push(canonical);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/page").unwrap()
    }

    #[test]
    fn extracts_title_description_and_content() {
        let html = r#"
            <html>
              <head>
                <title>Hello World</title>
                <meta name="description" content="A test page">
              </head>
              <body>
                <nav>Skip this nav text</nav>
                <p>Real content goes here.</p>
                <footer>Skip this footer text</footer>
              </body>
            </html>
        "#;
        let extracted = extract(html, &base());
        assert_eq!(extracted.title, "Hello World");
        assert_eq!(extracted.description, "A test page");
        assert!(extracted.content.contains("Real content goes here."));
        assert!(!extracted.content.contains("Skip this nav text"));
        assert!(!extracted.content.contains("Skip this footer text"));
    }

    #[test]
    fn links_are_resolved_canonicalized_and_deduped() {
        let html = r#"
            <html><body>
              <a href="/a">A</a>
              <a href="/a">A again</a>
              <a href="https://example.com/a/">A trailing slash</a>
              <a href="image.jpg">skip me</a>
              <a href="javascript:void(0)">skip me too</a>
            </body></html>
        "#;
        let extracted = extract(html, &base());
        assert_eq!(extracted.links, vec!["https://example.com/a".to_string()]);
    }

    #[test]
    fn empty_and_fragment_only_hrefs_are_ignored() {
        let html = r#"
            <html><body>
              <a href="">empty</a>
              <a href="#section">fragment only</a>
              <a href="#">bare fragment</a>
            </body></html>
        "#;
        let extracted = extract(html, &base());
        assert!(extracted.links.is_empty());
    }

    #[test]
    fn truncates_overlong_fields() {
        let long_title = format!("<title>{}</title>", "x".repeat(600));
        let html = format!("<html><head>{long_title}</head><body></body></html>");
        let extracted = extract(&html, &base());
        assert_eq!(extracted.title.chars().count(), MAX_TITLE);
    }
}
