//! In-memory browser engine serving fixed DOM trees.
//!
//! Links navigate between registered pages, forms submit as GET with their
//! named inputs, and every action is logged so tests can assert on it.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::dom::{Document, DomNode, NodeId};
use super::resolve_url;
use super::session::{BrowserEngine, Fingerprint, PageSession};

#[derive(Debug, Clone)]
struct PageDef {
    title: String,
    dom: DomNode,
}

#[derive(Clone, Default)]
pub struct StaticEngine {
    pages: Arc<RwLock<HashMap<String, PageDef>>>,
    log: Arc<Mutex<Vec<String>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    fail_open: bool,
}

impl StaticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, title: &str, dom: DomNode) -> Self {
        self.pages.write().unwrap().insert(
            normalize(url),
            PageDef {
                title: title.to_string(),
                dom,
            },
        );
        self
    }

    /// Engine whose `open` always fails, as when no browser can be launched.
    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn action_log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserEngine for StaticEngine {
    fn name(&self) -> &str {
        "static"
    }

    async fn open(&self, _fingerprint: &Fingerprint) -> Result<Box<dyn PageSession>> {
        if self.fail_open {
            return Err(anyhow!("Failed to launch browser"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StaticPage {
            engine: self.clone(),
            state: Mutex::new(PageState::default()),
        }))
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    title: String,
    dom: DomNode,
    scroll_y: i64,
}

pub struct StaticPage {
    engine: StaticEngine,
    state: Mutex<PageState>,
}

fn normalize(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Preorder lookup matching [`Document`] node ids.
fn node_at_mut(root: &mut DomNode, target: NodeId) -> Option<&mut DomNode> {
    fn walk<'a>(node: &'a mut DomNode, target: NodeId, next: &mut NodeId) -> Option<&'a mut DomNode> {
        if *next == target {
            return Some(node);
        }
        *next += 1;
        for child in node.children.iter_mut() {
            if let Some(found) = walk(child, target, next) {
                return Some(found);
            }
        }
        None
    }
    let mut next = 0;
    walk(root, target, &mut next)
}

impl StaticPage {
    fn record(&self, entry: String) {
        self.engine.log.lock().unwrap().push(entry);
    }

    fn load(&self, url: &str) -> Result<()> {
        let page = self
            .engine
            .pages
            .read()
            .unwrap()
            .get(&normalize(url))
            .cloned()
            .ok_or_else(|| anyhow!("net::ERR_NAME_NOT_RESOLVED at {}", url))?;

        let mut state = self.state.lock().unwrap();
        state.url = url.to_string();
        state.title = page.title;
        state.dom = page.dom;
        state.scroll_y = 0;
        Ok(())
    }

    fn locate(&self, selector: &str) -> Result<(Document, NodeId, String)> {
        let state = self.state.lock().unwrap();
        let doc = Document::new(&state.dom);
        let id = doc
            .query_all(selector)
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No element matches selector {}", selector))?;
        Ok((doc, id, state.url.clone()))
    }

    /// GET submission of the form enclosing `id`, if any.
    fn form_target(doc: &Document, id: NodeId, base: &str) -> Option<String> {
        let mut current = Some(id);
        while let Some(node) = current {
            if doc.tag(node) == "form" {
                let action = doc.attr(node, "action").unwrap_or("");
                let mut url = reqwest::Url::parse(&resolve_url(base, action)?).ok()?;
                let pairs: Vec<(&str, &str)> = doc
                    .query_within(node, "input[name], textarea[name], select[name]")
                    .into_iter()
                    .filter_map(|input| Some((doc.attr(input, "name")?, doc.attr(input, "value")?)))
                    .collect();
                if !pairs.is_empty() {
                    url.query_pairs_mut().extend_pairs(pairs);
                }
                return Some(url.to_string());
            }
            current = doc.parent(node);
        }
        None
    }
}

#[async_trait]
impl PageSession for StaticPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.record(format!("goto {}", url));
        self.load(url)
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().title.clone())
    }

    async fn ready_state(&self) -> Result<String> {
        Ok("complete".to_string())
    }

    async fn dom(&self) -> Result<DomNode> {
        Ok(self.state.lock().unwrap().dom.clone())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.record(format!("click {}", selector));
        let (doc, id, base) = self.locate(selector)?;

        let tag = doc.tag(id);
        let is_submit = tag == "button" && doc.attr(id, "type").unwrap_or("submit") == "submit"
            || tag == "input" && doc.attr(id, "type") == Some("submit");

        let destination = if tag == "a" {
            doc.attr(id, "href").and_then(|href| resolve_url(&base, href))
        } else if is_submit {
            Self::form_target(&doc, id, &base)
        } else {
            None
        };

        match destination {
            Some(url) => self.load(&url),
            None => Ok(()),
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.record(format!("fill {} {}", selector, value));
        let (_, id, _) = self.locate(selector)?;
        let mut state = self.state.lock().unwrap();
        let node = node_at_mut(&mut state.dom, id)
            .ok_or_else(|| anyhow!("Element vanished before fill: {}", selector))?;
        node.attributes.insert("value".to_string(), value.to_string());
        Ok(())
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<()> {
        self.record(format!("scroll {}", delta_y));
        self.state.lock().unwrap().scroll_y += delta_y;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.engine.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
