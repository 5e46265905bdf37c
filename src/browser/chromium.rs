//! Chromium engine over the DevTools protocol.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;

use super::dom::DomNode;
use super::session::{BrowserEngine, Fingerprint, PageSession};

/// Serializes `document.body` into the [`DomNode`] shape.
///
/// The walk stops after `MAX_NODES` elements, so a selector that is unique in
/// the snapshot can still match more nodes on a large page. `click` and
/// `fill` count live matches before acting.
const CAPTURE_DOM_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'SVG', 'TEMPLATE', 'IFRAME']);
  const MAX_NODES = 6000;
  const MAX_DEPTH = 40;
  let budget = MAX_NODES;
  const walk = (el, depth) => {
    budget -= 1;
    const attributes = {};
    for (const attr of el.attributes) {
      if (attr.value.length <= 300) attributes[attr.name] = attr.value;
    }
    if ((el.tagName === 'INPUT' || el.tagName === 'TEXTAREA') && el.value) {
      attributes.value = el.value;
    }
    let text = '';
    const children = [];
    for (const child of el.childNodes) {
      if (child.nodeType === Node.TEXT_NODE) {
        text += child.textContent;
      } else if (child.nodeType === Node.ELEMENT_NODE && !SKIP.has(child.tagName.toUpperCase())
                 && budget > 0 && depth < MAX_DEPTH) {
        children.push(walk(child, depth + 1));
      }
    }
    return { tag: el.tagName.toLowerCase(), attributes, text: text.replace(/\s+/g, ' ').trim(), children };
  };
  return document.body ? walk(document.body, 0) : { tag: 'body', attributes: {}, text: '', children: [] };
})()
"#;

const LAUNCH_ARGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-popup-blocking",
    "--no-first-run",
    "--no-default-browser-check",
    "--mute-audio",
];

/// Launches one Chromium process per session.
pub struct ChromiumEngine {
    headless: bool,
}

impl ChromiumEngine {
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn open(&self, fingerprint: &Fingerprint) -> Result<Box<dyn PageSession>> {
        let mut builder = BrowserConfig::builder()
            .window_size(fingerprint.viewport_width, fingerprint.viewport_height)
            .args(LAUNCH_ARGS.iter().copied())
            .arg(format!("--lang={}", fingerprint.locale));
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(|e| anyhow!("browser config error: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch chromium")?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                events.abort();
                return Err(anyhow!("Failed to open page: {}", err));
            }
        };

        let mut agent = SetUserAgentOverrideParams::new(fingerprint.user_agent.clone());
        agent.accept_language = Some(fingerprint.accept_language.clone());
        if let Err(err) = page.set_user_agent(agent).await {
            log::warn!("Could not override user agent: {}", err);
        }

        let headers = fingerprint.header_map();
        if !headers.is_empty() {
            let params =
                SetExtraHttpHeadersParams::new(Headers::new(serde_json::Value::Object(headers)));
            if let Err(err) = page.execute(params).await {
                log::warn!("Could not set extra headers: {}", err);
            }
        }

        Ok(Box::new(ChromiumPage {
            browser,
            page,
            events,
        }))
    }
}

pub struct ChromiumPage {
    browser: Browser,
    page: Page,
    events: JoinHandle<()>,
}

impl ChromiumPage {
    /// First live match for `selector`, warning when it is not unique.
    async fn first_match(&self, selector: &str) -> Result<Element> {
        let mut matches = self.page.find_elements(selector).await?;
        if matches.len() > 1 {
            log::warn!(
                "Selector {} matches {} elements on the page; using the first",
                selector,
                matches.len()
            );
        }
        if matches.is_empty() {
            return Err(anyhow!("No element matches {}", selector));
        }
        Ok(matches.swap_remove(0))
    }
}

#[async_trait]
impl PageSession for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await.with_context(|| format!("navigation to {} failed", url))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn ready_state(&self) -> Result<String> {
        Ok(self
            .page
            .evaluate("document.readyState")
            .await?
            .into_value::<String>()?)
    }

    async fn dom(&self) -> Result<DomNode> {
        Ok(self
            .page
            .evaluate(CAPTURE_DOM_JS)
            .await?
            .into_value::<DomNode>()?)
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.first_match(selector).await?.click().await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let element = self.first_match(selector).await?;
        element.click().await?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await?;
        element.type_str(value).await?;
        Ok(())
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<()> {
        self.page
            .evaluate(format!("window.scrollBy(0, {})", delta_y))
            .await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumPage {
            mut browser,
            page,
            events,
        } = *self;

        if let Err(err) = page.close().await {
            log::debug!("Page close failed: {}", err);
        }
        let closed = browser.close().await;
        let _ = browser.wait().await;
        events.abort();
        closed.map(|_| ()).map_err(|e| anyhow!("Failed to close browser: {}", e))
    }
}
