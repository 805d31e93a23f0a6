//! Structural splitting for markdown and HTML
//!
//! Splits at heading boundaries; each section remembers its nearest heading
//! so chunks can carry it as metadata.

use scraper::{ElementRef, Html};

/// A heading-delimited span of a document
pub(crate) struct Section {
    pub heading: Option<String>,
    pub body: String,
}

/// Split markdown at `#`/`##`/`###` headings. The heading line itself moves
/// into metadata; the body is everything until the next heading.
pub(crate) fn markdown_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section {
        heading: None,
        body: String::new(),
    };

    for line in text.lines() {
        if let Some(heading) = heading_text(line) {
            if !current.body.trim().is_empty() {
                sections.push(current);
            }
            current = Section {
                heading: Some(heading),
                body: String::new(),
            };
        } else {
            current.body.push_str(line);
            current.body.push('\n');
        }
    }
    if !current.body.trim().is_empty() {
        sections.push(current);
    }
    sections
}

fn heading_text(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    for prefix in ["# ", "## ", "### "] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return Some(rest.trim().to_string());
        }
    }
    None
}

/// Split HTML at `<h1>`–`<h3>` elements. Text inside `script`/`style` is
/// ignored; heading text becomes the section label.
pub(crate) fn html_sections(html: &str) -> Vec<Section> {
    let document = Html::parse_document(html);
    let mut sections = Vec::new();
    let mut current = Section {
        heading: None,
        body: String::new(),
    };

    for node in document.tree.root().descendants() {
        if let Some(element) = node.value().as_element() {
            if is_heading(element.name()) {
                if !current.body.trim().is_empty() {
                    sections.push(current);
                }
                let heading = ElementRef::wrap(node)
                    .map(|el| el.text().collect::<String>().trim().to_string())
                    .filter(|t| !t.is_empty());
                current = Section {
                    heading,
                    body: String::new(),
                };
            }
            continue;
        }

        if let scraper::Node::Text(text) = node.value() {
            let skip = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .map_or(false, |el| is_heading(el.name()) || is_non_content(el.name()))
            });
            if skip {
                continue;
            }
            let fragment: &str = text;
            if !fragment.trim().is_empty() {
                if !current.body.is_empty() && !current.body.ends_with(char::is_whitespace) {
                    current.body.push(' ');
                }
                current.body.push_str(fragment.trim());
            }
        }
    }

    if !current.body.trim().is_empty() {
        sections.push(current);
    }
    sections
}

fn is_heading(name: &str) -> bool {
    matches!(name, "h1" | "h2" | "h3")
}

fn is_non_content(name: &str) -> bool {
    matches!(name, "script" | "style" | "head" | "noscript")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_sections_track_nearest_heading() {
        let text = "Preamble before any heading.\n\n# One\nbody one\n\n## Two\nbody two\nmore two\n";
        let sections = markdown_sections(text);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].heading, None);
        assert!(sections[0].body.contains("Preamble"));
        assert_eq!(sections[1].heading.as_deref(), Some("One"));
        assert_eq!(sections[2].heading.as_deref(), Some("Two"));
        assert!(sections[2].body.contains("more two"));
    }

    #[test]
    fn deep_headings_stay_in_the_body() {
        let text = "# Top\n#### Not a split point\ncontent\n";
        let sections = markdown_sections(text);
        assert_eq!(sections.len(), 1);
        assert!(sections[0].body.contains("Not a split point"));
    }

    #[test]
    fn html_sections_skip_script_and_heading_text() {
        let html = r#"<html><head><title>t</title></head><body>
            <h1>Start</h1><p>visible</p>
            <script>var hidden = 1;</script>
            <h2>Next</h2><p>also visible</p>
        </body></html>"#;
        let sections = html_sections(html);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading.as_deref(), Some("Start"));
        assert!(sections[0].body.contains("visible"));
        assert!(!sections[0].body.contains("hidden"));
        assert!(!sections[0].body.contains("Start"));
        assert_eq!(sections[1].heading.as_deref(), Some("Next"));
    }

    #[test]
    fn html_text_before_first_heading_is_kept() {
        let html = "<body><p>intro</p><h1>Later</h1><p>tail</p></body>";
        let sections = html_sections(html);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading, None);
        assert!(sections[0].body.contains("intro"));
    }
}
