//! Page perception: turns the live DOM into a bounded snapshot.

use anyhow::Result;
use serde_json::Value;

use super::dom::{Document, NodeId};
use super::session::PageSession;
use super::{clip, selectors};
use crate::types::{ElementDescriptor, FormSummary, PageMetrics, PageSnapshot};

const INTERACTIVE: &str = "input, textarea, select, button, a[href], [role=button], [role=link]";
const LOADING_INDICATORS: &str = "[aria-busy=true], [class*=loading], [class*=spinner], \
                                  [class*=skeleton], [id*=loading], [id*=spinner]";
const TEXT_CONTAINERS: &str = "p, li, td, article, span";
const BOT_MARKERS: &[&str] = &[
    "robot",
    "captcha",
    "unusual traffic",
    "verify you are human",
    "are you a human",
];

const MAX_ELEMENTS: usize = 40;
const MAX_HEADINGS: usize = 15;
const MAX_TEXT_CONTAINERS: usize = 30;
const MAX_ELEMENT_TEXT: usize = 80;
const MAX_CONTAINER_TEXT: usize = 200;
const MIN_CONTAINER_TEXT: usize = 20;

/// What one perception pass saw.
#[derive(Debug, Clone)]
pub struct Observation {
    pub snapshot: PageSnapshot,
    pub document: Document,
    pub text_containers: Vec<String>,
    pub bot_check_suspected: bool,
}

impl Observation {
    /// Snapshot plus text containers, in the shape the governor filters.
    pub fn to_prompt_value(&self) -> Value {
        let mut value = serde_json::to_value(&self.snapshot).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert(
                "textContainers".to_string(),
                Value::from(self.text_containers.clone()),
            );
        }
        value
    }
}

pub async fn observe(session: &dyn PageSession) -> Result<Observation> {
    let dom = session.dom().await?;
    let url = session.current_url().await?;
    let title = session.title().await.unwrap_or_default();
    let ready_state = session
        .ready_state()
        .await
        .unwrap_or_else(|_| "complete".to_string());

    Ok(observe_document(Document::new(&dom), url, title, ready_state))
}

pub fn observe_document(
    document: Document,
    url: String,
    title: String,
    ready_state: String,
) -> Observation {
    let bot_check_suspected = looks_like_bot_check(&title, &document);
    let snapshot = PageSnapshot {
        elements: interactive_elements(&document),
        headings: headings(&document),
        forms: forms(&document),
        metrics: metrics(&document),
        url,
        title,
        ready_state,
    };

    Observation {
        text_containers: text_containers(&document),
        snapshot,
        document,
        bot_check_suspected,
    }
}

fn is_hidden(doc: &Document, id: NodeId) -> bool {
    doc.attr(id, "hidden").is_some()
        || doc.attr(id, "aria-hidden") == Some("true")
        || (doc.tag(id) == "input" && doc.attr(id, "type") == Some("hidden"))
        || doc
            .attr(id, "style")
            .is_some_and(|s| s.replace(' ', "").contains("display:none"))
}

/// Inputs first, then buttons, then links.
fn element_priority(doc: &Document, id: NodeId) -> u8 {
    let role = doc.attr(id, "role");
    match doc.tag(id) {
        "input" if matches!(doc.attr(id, "type"), Some("submit" | "button")) => 1,
        "input" | "textarea" | "select" => 0,
        "button" => 1,
        _ if role == Some("button") => 1,
        _ => 2,
    }
}

fn element_text(doc: &Document, id: NodeId) -> String {
    let text = doc.text_content(id);
    let text = if text.is_empty() {
        doc.attr(id, "aria-label")
            .or_else(|| doc.attr(id, "value"))
            .or_else(|| doc.attr(id, "title"))
            .unwrap_or("")
            .to_string()
    } else {
        text
    };
    clip(&text, MAX_ELEMENT_TEXT)
}

fn interactive_elements(doc: &Document) -> Vec<ElementDescriptor> {
    let mut ranked: Vec<(u8, NodeId)> = doc
        .query_all(INTERACTIVE)
        .into_iter()
        .filter(|&id| !is_hidden(doc, id))
        .map(|id| (element_priority(doc, id), id))
        .collect();
    ranked.sort_by_key(|&(priority, id)| (priority, id));

    let mut elements = Vec::new();
    for (priority, id) in ranked {
        if elements.len() >= MAX_ELEMENTS {
            break;
        }
        // Only selectors that resolve on this page are offered to the model.
        let Some(selector) = selectors::selector_for(doc, id) else {
            continue;
        };
        elements.push(ElementDescriptor {
            selector,
            tag: doc.tag(id).to_string(),
            element_type: doc.attr(id, "type").map(str::to_string),
            text: element_text(doc, id),
            placeholder: doc.attr(id, "placeholder").map(str::to_string),
            href: doc.attr(id, "href").map(str::to_string),
            role: doc.attr(id, "role").map(str::to_string),
            priority,
        });
    }
    elements
}

fn headings(doc: &Document) -> Vec<String> {
    doc.query_all("h1, h2, h3")
        .into_iter()
        .map(|id| clip(&doc.text_content(id), MAX_ELEMENT_TEXT))
        .filter(|text| !text.is_empty())
        .take(MAX_HEADINGS)
        .collect()
}

fn forms(doc: &Document) -> Vec<FormSummary> {
    doc.query_all("form")
        .into_iter()
        .map(|form| {
            let inputs = doc
                .query_within(form, "input, textarea, select")
                .into_iter()
                .filter(|&id| !is_hidden(doc, id))
                .filter_map(|id| {
                    doc.attr(id, "name")
                        .or_else(|| doc.attr(id, "id"))
                        .or_else(|| doc.attr(id, "placeholder"))
                        .map(str::to_string)
                })
                .collect();

            FormSummary {
                selector: selectors::selector_for(doc, form)
                    .unwrap_or_else(|| selectors::nth_of_type_path(doc, form)),
                action: doc.attr(form, "action").map(str::to_string),
                method: doc.attr(form, "method").map(str::to_ascii_lowercase),
                inputs,
            }
        })
        .collect()
}

fn metrics(doc: &Document) -> PageMetrics {
    PageMetrics {
        links: doc.count("a[href]"),
        buttons: doc.count("button, [role=button], input[type=submit]"),
        inputs: doc.count("input, textarea, select"),
        forms: doc.count("form"),
        has_loading_indicator: has_loading_indicator(doc),
    }
}

pub fn has_loading_indicator(doc: &Document) -> bool {
    doc.query_all(LOADING_INDICATORS)
        .into_iter()
        .any(|id| !is_hidden(doc, id))
}

fn text_containers(doc: &Document) -> Vec<String> {
    let mut seen = Vec::new();
    for id in doc.query_all(TEXT_CONTAINERS) {
        let text = doc.text_content(id);
        if text.chars().count() < MIN_CONTAINER_TEXT {
            continue;
        }
        let text = clip(&text, MAX_CONTAINER_TEXT);
        if !seen.contains(&text) {
            seen.push(text);
        }
        if seen.len() >= MAX_TEXT_CONTAINERS {
            break;
        }
    }
    seen
}

/// Scans the title and leading body text for bot-wall markers.
pub fn looks_like_bot_check(title: &str, doc: &Document) -> bool {
    let body: String = doc.text_content(doc.root()).chars().take(2000).collect();
    let haystack = format!("{} {}", title, body).to_lowercase();
    BOT_MARKERS.iter().any(|marker| haystack.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::dom::DomNode;

    fn page() -> Document {
        Document::new(
            &DomNode::element("body").children([
                DomNode::element("h1").text("Search results"),
                DomNode::element("a").attr("href", "/home").text("Home"),
                DomNode::element("form")
                    .attr("action", "/search")
                    .attr("method", "GET")
                    .children([
                        DomNode::element("input")
                            .attr("name", "q")
                            .attr("placeholder", "Search"),
                        DomNode::element("input").attr("type", "hidden").attr("name", "token"),
                        DomNode::element("button").attr("type", "submit").text("Go"),
                    ]),
                DomNode::element("div").attr("role", "button").attr("class", "menu").text("Menu"),
                DomNode::element("p").text("Wireless earbuds with 24 hour battery life"),
                DomNode::element("div").attr("class", "spinner"),
            ]),
        )
    }

    fn observe_page() -> Observation {
        observe_document(
            page(),
            "https://shop.test/search".to_string(),
            "Results".to_string(),
            "complete".to_string(),
        )
    }

    #[test]
    fn test_elements_prioritized_and_resolvable() {
        let observation = observe_page();
        let elements = &observation.snapshot.elements;
        let tags: Vec<&str> = elements.iter().map(|e| e.tag.as_str()).collect();
        assert_eq!(tags, vec!["input", "button", "div", "a"]);

        for element in elements {
            assert_eq!(
                observation.document.count(&element.selector),
                1,
                "{} should resolve uniquely",
                element.selector
            );
        }
        assert_eq!(elements[0].selector, "input[name=\"q\"]");
        assert_eq!(elements[0].placeholder.as_deref(), Some("Search"));
    }

    #[test]
    fn test_headings_forms_and_metrics() {
        let snapshot = observe_page().snapshot;
        assert_eq!(snapshot.headings, vec!["Search results"]);
        assert_eq!(snapshot.forms.len(), 1);
        assert_eq!(snapshot.forms[0].inputs, vec!["q"]);
        assert_eq!(snapshot.forms[0].method.as_deref(), Some("get"));
        assert_eq!(snapshot.metrics.links, 1);
        assert_eq!(snapshot.metrics.forms, 1);
        assert!(snapshot.metrics.has_loading_indicator);
    }

    #[test]
    fn test_prompt_value_carries_text_containers() {
        let value = observe_page().to_prompt_value();
        assert_eq!(
            value["textContainers"][0],
            "Wireless earbuds with 24 hour battery life"
        );
        assert_eq!(value["url"], "https://shop.test/search");
    }

    #[test]
    fn test_bot_check_detection() {
        let wall = Document::new(
            &DomNode::element("body").child(DomNode::element("p").text("Please complete the CAPTCHA")),
        );
        assert!(looks_like_bot_check("Shop", &wall));
        assert!(looks_like_bot_check("Are you a robot?", &page()));
        assert!(!looks_like_bot_check("Results", &page()));
    }

    #[test]
    fn test_element_cap() {
        let links = (0..60).map(|i| {
            DomNode::element("a")
                .attr("href", format!("/p/{}", i))
                .attr("id", format!("link-{}", i))
                .text(format!("Item {}", i))
        });
        let doc = Document::new(&DomNode::element("body").children(links));
        let observation = observe_document(doc, String::new(), String::new(), "complete".into());
        assert_eq!(observation.snapshot.elements.len(), MAX_ELEMENTS);
        assert_eq!(observation.snapshot.metrics.links, 60);
    }
}
