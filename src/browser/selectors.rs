//! Stable selector generation.
//!
//! Candidates are tried in priority order and each one is checked against
//! the document; only a selector resolving to exactly the target element is
//! returned.

use super::dom::{Document, NodeId};

const STABLE_DATA_ATTRS: &[&str] = &[
    "data-testid",
    "data-test-id",
    "data-test",
    "data-qa",
    "data-cy",
    "data-id",
    "data-component-type",
    "data-asin",
];

const NAMED_TAGS: &[&str] = &["input", "select", "textarea", "button", "form"];

const MAX_CLASSES_CONSIDERED: usize = 4;

pub fn is_css_ident(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn quotable(value: &str) -> bool {
    !value.is_empty() && !value.contains('"') && !value.contains('\\')
}

/// Filters out generated class names that change between page loads.
fn is_stable_class(class: &str) -> bool {
    let digits = class.chars().filter(|c| c.is_ascii_digit()).count();
    is_css_ident(class)
        && class.len() <= 40
        && digits <= 3
        && !["css-", "sc-", "jsx-", "emotion-"]
            .iter()
            .any(|prefix| class.starts_with(prefix))
}

/// Candidate selectors for `id`, highest priority first. Unvalidated.
pub fn candidates(doc: &Document, id: NodeId) -> Vec<String> {
    let tag = doc.tag(id).to_string();
    let mut out = Vec::new();

    if let Some(element_id) = doc.attr(id, "id").filter(|v| quotable(v)) {
        if is_css_ident(element_id) {
            out.push(format!("#{}", element_id));
        } else {
            out.push(format!("[id=\"{}\"]", element_id));
        }
    }

    for attr in STABLE_DATA_ATTRS {
        if let Some(value) = doc.attr(id, attr).filter(|v| quotable(v)) {
            out.push(format!("[{}=\"{}\"]", attr, value));
            out.push(format!("{}[{}=\"{}\"]", tag, attr, value));
        }
    }

    if NAMED_TAGS.contains(&tag.as_str()) {
        if let Some(name) = doc.attr(id, "name").filter(|v| quotable(v)) {
            out.push(format!("{}[name=\"{}\"]", tag, name));
        }
    }

    let classes: Vec<&str> = doc
        .classes(id)
        .into_iter()
        .filter(|c| is_stable_class(c))
        .take(MAX_CLASSES_CONSIDERED)
        .collect();
    for class in &classes {
        out.push(format!("{}.{}", tag, class));
    }
    for (i, first) in classes.iter().enumerate() {
        for second in &classes[i + 1..] {
            out.push(format!("{}.{}.{}", tag, first, second));
        }
    }
    if classes.len() > 2 {
        out.push(format!("{}.{}", tag, classes.join(".")));
    }

    out.push(nth_of_type_path(doc, id));
    out
}

/// `anchor > tag:nth-of-type(n) > ...` down to `id`, anchored at the nearest
/// ancestor with a usable id, or at the document root.
pub fn nth_of_type_path(doc: &Document, id: NodeId) -> String {
    let mut segments = Vec::new();
    let mut current = id;

    loop {
        if current != id {
            if let Some(anchor) = doc.attr(current, "id").filter(|v| is_css_ident(v)) {
                segments.push(format!("#{}", anchor));
                break;
            }
        }

        match doc.parent(current) {
            Some(parent) => {
                segments.push(format!(
                    "{}:nth-of-type({})",
                    doc.tag(current),
                    doc.nth_of_type(current)
                ));
                current = parent;
            }
            None => {
                segments.push(doc.tag(current).to_string());
                break;
            }
        }
    }

    segments.reverse();
    segments.join(" > ")
}

/// True when `selector` resolves to exactly `id` and nothing else.
pub fn resolves_to(doc: &Document, selector: &str, id: NodeId) -> bool {
    let matches = doc.query_all(selector);
    matches.len() == 1 && matches[0] == id
}

/// First validated candidate for `id`.
pub fn selector_for(doc: &Document, id: NodeId) -> Option<String> {
    candidates(doc, id)
        .into_iter()
        .find(|selector| resolves_to(doc, selector, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::dom::DomNode;

    fn doc() -> Document {
        Document::new(
            &DomNode::element("body").children([
                DomNode::element("input").attr("id", "search-box").attr("name", "q"),
                DomNode::element("input").attr("name", "zip"),
                DomNode::element("button")
                    .attr("data-testid", "submit")
                    .attr("class", "btn primary"),
                DomNode::element("button").attr("class", "btn secondary"),
                DomNode::element("div").attr("id", "list").children([
                    DomNode::element("a").attr("class", "css-1x2y3z").text("A"),
                    DomNode::element("a").attr("class", "css-1x2y3z").text("B"),
                ]),
                DomNode::element("span").attr("id", "weird:id"),
                DomNode::element("p").attr("class", "note highlighted"),
                DomNode::element("p").attr("class", "note"),
            ]),
        )
    }

    fn find(doc: &Document, selector: &str, index: usize) -> NodeId {
        doc.query_all(selector)[index]
    }

    #[test]
    fn test_id_wins() {
        let doc = doc();
        let input = find(&doc, "input", 0);
        assert_eq!(selector_for(&doc, input).unwrap(), "#search-box");
    }

    #[test]
    fn test_data_attribute_before_class() {
        let doc = doc();
        let button = find(&doc, "button", 0);
        assert_eq!(selector_for(&doc, button).unwrap(), "[data-testid=\"submit\"]");
    }

    #[test]
    fn test_name_for_inputs() {
        let doc = doc();
        let zip = find(&doc, "input", 1);
        assert_eq!(selector_for(&doc, zip).unwrap(), "input[name=\"zip\"]");
    }

    #[test]
    fn test_minimal_unique_class_combination() {
        let doc = doc();
        let secondary = find(&doc, "button", 1);
        assert_eq!(selector_for(&doc, secondary).unwrap(), "button.secondary");

        let highlighted = find(&doc, "p", 0);
        assert_eq!(selector_for(&doc, highlighted).unwrap(), "p.highlighted");
    }

    #[test]
    fn test_nth_of_type_fallback_anchored_on_id() {
        let doc = doc();
        let second = find(&doc, "a", 1);
        let selector = selector_for(&doc, second).unwrap();
        assert_eq!(selector, "#list > a:nth-of-type(2)");
    }

    #[test]
    fn test_non_ident_id_is_attribute_quoted() {
        let doc = doc();
        let span = find(&doc, "span", 0);
        assert_eq!(selector_for(&doc, span).unwrap(), "[id=\"weird:id\"]");
    }

    #[test]
    fn test_every_element_gets_a_resolving_selector() {
        let doc = doc();
        for id in 0..doc.len() {
            let selector = selector_for(&doc, id).expect("selector");
            assert!(resolves_to(&doc, &selector, id), "{} for node {}", selector, id);
        }
    }

    #[test]
    fn test_stable_class_filter() {
        assert!(is_stable_class("product-card"));
        assert!(!is_stable_class("css-1x2y3z"));
        assert!(!is_stable_class("a1b2c3d4"));
        assert!(!is_stable_class("md:flex"));
    }
}
