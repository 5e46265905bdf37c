#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wayfarer::browser::{
    BrowserAgent, BrowserEngine, DomNode, Fingerprint, PageSession, StaticEngine,
};
use wayfarer::config::{BrowserAgentConfig, DispatcherConfig};
use wayfarer::executors::{ExecutorRegistry, WebAgentExecutor};
use wayfarer::governor::ContentGovernor;
use wayfarer::providers::{Message, MockLLMProvider, ModelGateway};
use wayfarer::storage::InMemoryTaskHistory;
use wayfarer::Dispatcher;

pub const SEARCH_URL: &str = "https://example.com/search?q=wireless+earbuds";

pub fn system(messages: &[Message]) -> &str {
    &messages[0].content
}

pub fn user(messages: &[Message]) -> &str {
    &messages[1].content
}

pub fn gateway<F>(responder: F) -> Arc<ModelGateway>
where
    F: Fn(&[Message]) -> anyhow::Result<String> + Send + Sync + 'static,
{
    Arc::new(ModelGateway::new(
        Arc::new(MockLLMProvider::from_fn(responder)),
        ContentGovernor::default(),
    ))
}

pub fn fast_browser_config() -> BrowserAgentConfig {
    BrowserAgentConfig {
        max_iterations: 8,
        settle_ms: 0,
        anti_bot_wait_ms: 0,
        action_timeout_ms: 50,
        page_load_timeout_ms: 500,
        ..BrowserAgentConfig::default()
    }
}

pub fn product_card(i: usize) -> DomNode {
    DomNode::element("div").attr("class", "product-card").children([
        DomNode::element("h2").child(
            DomNode::element("a")
                .attr("href", format!("/p/{}", i))
                .text(format!("Wireless Earbuds Model {}", i)),
        ),
        DomNode::element("span")
            .attr("class", "price")
            .text(format!("${}.99", 20 + i)),
        DomNode::element("span").text(format!("4.{} out of 5 stars", i % 10)),
        DomNode::element("span").text(format!("{} reviews", 100 + i)),
    ])
}

pub fn listing_page(n: usize) -> DomNode {
    DomNode::element("body").children([
        DomNode::element("h1").text("Search results"),
        DomNode::element("div")
            .attr("id", "results")
            .children((0..n).map(product_card)),
    ])
}

pub fn shop_engine(items: usize) -> StaticEngine {
    StaticEngine::new().with_page(SEARCH_URL, "Search results", listing_page(items))
}

pub fn browser_agent(engine: StaticEngine, gateway: Arc<ModelGateway>) -> Arc<BrowserAgent> {
    Arc::new(BrowserAgent::new(
        Arc::new(engine),
        gateway,
        fast_browser_config(),
    ))
}

pub fn web_dispatcher(engine: StaticEngine, gateway: Arc<ModelGateway>) -> Dispatcher {
    let agent = browser_agent(engine, gateway.clone());
    let mut registry = ExecutorRegistry::with_defaults(None);
    registry.register(Arc::new(WebAgentExecutor::new(agent)));
    Dispatcher::new(
        Arc::new(registry),
        gateway,
        Arc::new(InMemoryTaskHistory::new()),
        DispatcherConfig::default(),
    )
}

/// `StaticEngine` pages that lose their DOM after a number of reads or
/// respond slowly to clicks.
#[derive(Clone)]
pub struct FaultyEngine {
    inner: StaticEngine,
    dom_reads_allowed: Option<usize>,
    click_delay_ms: u64,
}

impl FaultyEngine {
    pub fn new(inner: StaticEngine) -> Self {
        Self {
            inner,
            dom_reads_allowed: None,
            click_delay_ms: 0,
        }
    }

    pub fn fail_dom_after(mut self, reads: usize) -> Self {
        self.dom_reads_allowed = Some(reads);
        self
    }

    pub fn slow_clicks(mut self, delay_ms: u64) -> Self {
        self.click_delay_ms = delay_ms;
        self
    }
}

#[async_trait]
impl BrowserEngine for FaultyEngine {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn open(&self, fingerprint: &Fingerprint) -> anyhow::Result<Box<dyn PageSession>> {
        let inner = self.inner.open(fingerprint).await?;
        Ok(Box::new(FaultyPage {
            inner,
            dom_reads: AtomicUsize::new(0),
            dom_reads_allowed: self.dom_reads_allowed,
            click_delay_ms: self.click_delay_ms,
        }))
    }
}

struct FaultyPage {
    inner: Box<dyn PageSession>,
    dom_reads: AtomicUsize,
    dom_reads_allowed: Option<usize>,
    click_delay_ms: u64,
}

#[async_trait]
impl PageSession for FaultyPage {
    async fn goto(&self, url: &str) -> anyhow::Result<()> {
        self.inner.goto(url).await
    }

    async fn current_url(&self) -> anyhow::Result<String> {
        self.inner.current_url().await
    }

    async fn title(&self) -> anyhow::Result<String> {
        self.inner.title().await
    }

    async fn ready_state(&self) -> anyhow::Result<String> {
        self.inner.ready_state().await
    }

    async fn dom(&self) -> anyhow::Result<DomNode> {
        let read = self.dom_reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.dom_reads_allowed.map_or(false, |allowed| read > allowed) {
            anyhow::bail!("Target closed");
        }
        self.inner.dom().await
    }

    async fn click(&self, selector: &str) -> anyhow::Result<()> {
        if self.click_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.click_delay_ms)).await;
        }
        self.inner.click(selector).await
    }

    async fn fill(&self, selector: &str, value: &str) -> anyhow::Result<()> {
        self.inner.fill(selector, value).await
    }

    async fn scroll_by(&self, delta_y: i64) -> anyhow::Result<()> {
        self.inner.scroll_by(delta_y).await
    }

    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.inner.close().await
    }
}
