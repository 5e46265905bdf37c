//! Generic selector-driven scraper for repeating item lists.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::dom::{Document, NodeId};
use super::{clip, resolve_url};

/// Item container selectors, most specific first.
const CONTAINER_SELECTORS: &[&str] = &[
    "[data-component-type=s-search-result]",
    "[data-testid*=product-card]",
    "[data-testid*=product]",
    "[itemtype*=Product]",
    ".product-card",
    ".product-item",
    ".product-tile",
    ".search-result",
    ".result-item",
    ".s-result-item",
    ".listing-item",
    ".product",
    ".item",
    ".card",
];

const HEURISTIC_CANDIDATES: &str = "div, li, article, section";
const HEADINGS: &str = "h1, h2, h3, h4, h5";
const MAX_ITEMS: usize = 50;
const MAX_FIELD_TEXT: usize = 200;

static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([$€£¥₹])\s?(\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:\.\d{1,2})?)").unwrap()
});
static PRICE_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:\.\d{1,2})?)\s?(USD|EUR|GBP|INR|JPY)\b")
        .unwrap()
});
static RATING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d(?:\.\d{1,2})?)\s*(?:/\s*5\b|out of 5|stars?\b|★)").unwrap()
});
static REVIEWS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:,\d{3})+|\d+)\s*(?:customer\s+)?(?:reviews?|ratings?)\b").unwrap()
});

/// Explicit field to selector mapping supplied with an `extract` action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping(pub BTreeMap<String, String>);

impl FieldMapping {
    /// Accepts a JSON object or a `field: selector; field: selector` string.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if raw.starts_with('{') {
            let map: Map<String, Value> = serde_json::from_str(raw).ok()?;
            let fields: BTreeMap<String, String> = map
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k, s.trim().to_string())))
                .filter(|(_, s)| !s.is_empty())
                .collect();
            return (!fields.is_empty()).then_some(Self(fields));
        }

        let fields: BTreeMap<String, String> = raw
            .split(';')
            .filter_map(|pair| {
                let (field, selector) = pair.split_once(':')?;
                let (field, selector) = (field.trim(), selector.trim());
                (!field.is_empty() && !selector.is_empty())
                    .then(|| (field.to_string(), selector.to_string()))
            })
            .collect();
        (!fields.is_empty()).then_some(Self(fields))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub items: Vec<Map<String, Value>>,
    pub container_selector: Option<String>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn to_value(&self) -> Value {
        json!({
            "extractedData": self.items,
            "itemCount": self.items.len(),
            "containerSelector": self.container_selector,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Price {
    pub display: String,
    pub value: f64,
    pub currency: String,
}

fn number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

pub fn parse_price(text: &str) -> Option<Price> {
    if let Some(caps) = PRICE_RE.captures(text) {
        return Some(Price {
            display: caps[0].replace(' ', ""),
            value: number(&caps[2])?,
            currency: caps[1].to_string(),
        });
    }
    let caps = PRICE_CODE_RE.captures(text)?;
    Some(Price {
        display: caps[0].to_string(),
        value: number(&caps[1])?,
        currency: caps[2].to_string(),
    })
}

pub fn parse_rating(text: &str) -> Option<f64> {
    let caps = RATING_RE.captures(text)?;
    number(&caps[1]).filter(|r| (0.0..=5.0).contains(r))
}

pub fn parse_review_count(text: &str) -> Option<u64> {
    let caps = REVIEWS_RE.captures(text)?;
    caps[1].replace(',', "").parse().ok()
}

/// Text plus the accessible labels that ratings are often hidden in.
fn searchable_text(doc: &Document, scope: NodeId) -> String {
    let mut text = doc.text_content(scope);
    for id in std::iter::once(scope).chain(doc.descendants(scope)) {
        for attr in ["aria-label", "title"] {
            if let Some(label) = doc.attr(id, attr) {
                text.push(' ');
                text.push_str(label);
            }
        }
    }
    text
}

fn usable_href(href: &str) -> bool {
    let href = href.trim();
    !href.is_empty() && !href.starts_with('#') && !href.starts_with("javascript:")
}

fn is_link_field(field: &str) -> bool {
    matches!(field, "link" | "url" | "href")
}

pub struct Extractor<'a> {
    doc: &'a Document,
    page_url: &'a str,
}

impl<'a> Extractor<'a> {
    pub fn new(doc: &'a Document, page_url: &'a str) -> Self {
        Self { doc, page_url }
    }

    /// Runs extraction with an optional explicit container selector and mapping.
    pub fn extract(&self, container: Option<&str>, mapping: Option<&FieldMapping>) -> ExtractionResult {
        let (containers, selector) = self.locate_containers(container);

        let items = containers
            .into_iter()
            .filter_map(|id| self.extract_item(id, mapping))
            .take(MAX_ITEMS)
            .collect();

        ExtractionResult {
            items,
            container_selector: selector,
        }
    }

    fn locate_containers(&self, explicit: Option<&str>) -> (Vec<NodeId>, Option<String>) {
        let explicit = explicit.map(str::trim).filter(|s| !s.is_empty());
        for selector in explicit.into_iter().chain(CONTAINER_SELECTORS.iter().copied()) {
            let found = self.doc.query_all(selector);
            if !found.is_empty() {
                return (self.outermost(found), Some(selector.to_string()));
            }
        }
        (self.heuristic_containers(), None)
    }

    /// Drops matches nested inside another match of the same selector.
    fn outermost(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        nodes
            .iter()
            .copied()
            .filter(|&id| !nodes.iter().any(|&other| self.doc.is_ancestor(other, id)))
            .collect()
    }

    /// Innermost elements that carry a title together with a price or link.
    fn heuristic_containers(&self) -> Vec<NodeId> {
        let doc = self.doc;
        let candidates: Vec<NodeId> = doc
            .query_all(HEURISTIC_CANDIDATES)
            .into_iter()
            .filter(|&id| {
                let titled = doc.query_first_within(id, HEADINGS).is_some();
                let linked = doc.query_first_within(id, "a[href]").is_some();
                let priced = parse_price(&doc.text_content(id)).is_some();
                (titled || linked) && (priced || (titled && linked))
            })
            .collect();

        candidates
            .iter()
            .copied()
            .filter(|&id| !candidates.iter().any(|&other| doc.is_ancestor(id, other)))
            .collect()
    }

    fn text_of(&self, id: NodeId) -> Option<String> {
        let text = clip(&self.doc.text_content(id), MAX_FIELD_TEXT);
        (!text.is_empty()).then_some(text)
    }

    fn link_of(&self, id: NodeId) -> Option<String> {
        let doc = self.doc;
        let anchor = if doc.tag(id) == "a" {
            Some(id)
        } else {
            doc.query_within(id, "a[href]")
                .into_iter()
                .find(|&a| doc.attr(a, "href").is_some_and(usable_href))
        }?;
        let href = doc.attr(anchor, "href").filter(|h| usable_href(h))?;
        resolve_url(self.page_url, href.trim())
    }

    fn title_of(&self, scope: NodeId) -> Option<String> {
        let doc = self.doc;
        if let Some(heading) = doc.query_first_within(scope, HEADINGS) {
            if let Some(text) = self.text_of(heading) {
                return Some(text);
            }
        }
        let anchor_text = doc
            .query_within(scope, "a[href]")
            .into_iter()
            .filter_map(|a| self.text_of(a))
            .max_by_key(|text| text.chars().count());
        if anchor_text.is_some() {
            return anchor_text;
        }
        doc.query_first_within(scope, "[class*=title], [class*=name]")
            .and_then(|id| self.text_of(id))
    }

    fn extract_item(&self, scope: NodeId, mapping: Option<&FieldMapping>) -> Option<Map<String, Value>> {
        let mut item = Map::new();

        match mapping {
            Some(mapping) => {
                for (field, selector) in &mapping.0 {
                    let Some(target) = self.doc.query_first_within(scope, selector) else {
                        continue;
                    };
                    let value = if is_link_field(field) {
                        self.link_of(target)
                    } else {
                        self.text_of(target)
                    };
                    if let Some(value) = value {
                        if field.contains("price") {
                            self.insert_price(&mut item, &value);
                        } else {
                            item.insert(field.clone(), Value::String(value));
                        }
                    }
                }
            }
            None => self.extract_heuristic(scope, &mut item),
        }

        let substantive = item.iter().any(|(key, value)| match value {
            Value::String(s) => s.trim().chars().count() >= 2 || key == "price",
            Value::Null => false,
            _ => true,
        });
        substantive.then_some(item)
    }

    fn extract_heuristic(&self, scope: NodeId, item: &mut Map<String, Value>) {
        let doc = self.doc;
        if let Some(title) = self.title_of(scope) {
            item.insert("title".to_string(), Value::String(title));
        }

        let heading_link = doc
            .query_first_within(scope, HEADINGS)
            .and_then(|heading| self.link_of(heading));
        if let Some(link) = heading_link.or_else(|| self.link_of(scope)) {
            item.insert("link".to_string(), Value::String(link));
        }

        let price_text = doc
            .query_first_within(scope, "[class*=price]")
            .map(|id| doc.text_content(id))
            .filter(|text| parse_price(text).is_some())
            .unwrap_or_else(|| doc.text_content(scope));
        self.insert_price(item, &price_text);

        let text = searchable_text(doc, scope);
        if let Some(rating) = parse_rating(&text) {
            item.insert("rating".to_string(), json!(rating));
        }
        if let Some(reviews) = parse_review_count(&text) {
            item.insert("reviewCount".to_string(), json!(reviews));
        }
    }

    fn insert_price(&self, item: &mut Map<String, Value>, text: &str) {
        if let Some(price) = parse_price(text) {
            item.insert("price".to_string(), Value::String(price.display));
            item.insert("priceValue".to_string(), json!(price.value));
            item.insert("currency".to_string(), Value::String(price.currency));
        }
    }
}
