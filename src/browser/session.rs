use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::dom::DomNode;

/// Browser identity presented to sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: String,
    pub locale: String,
    pub accept_language: String,
    pub extra_headers: Vec<(String, String)>,
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self {
            viewport_width: 1366,
            viewport_height: 768,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            locale: "en-US".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            extra_headers: vec![
                (
                    "Accept".to_string(),
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
                ),
                ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
            ],
        }
    }
}

impl Fingerprint {
    /// Extra request headers as a CDP header object. Blank names are
    /// skipped and a repeated name keeps its last value.
    pub fn header_map(&self) -> Map<String, Value> {
        self.extra_headers
            .iter()
            .filter(|(name, _)| !name.trim().is_empty())
            .map(|(name, value)| (name.trim().to_string(), Value::String(value.clone())))
            .collect()
    }
}

/// Launches isolated page sessions.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, fingerprint: &Fingerprint) -> Result<Box<dyn PageSession>>;
}

/// One page inside its own browser context.
///
/// Owned by a single agent run and closed on every exit path.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    /// `document.readyState`: `loading`, `interactive` or `complete`.
    async fn ready_state(&self) -> Result<String>;

    async fn dom(&self) -> Result<DomNode>;

    async fn click(&self, selector: &str) -> Result<()>;

    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    async fn scroll_by(&self, delta_y: i64) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers_are_sent() {
        let headers = Fingerprint::default().header_map();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["Upgrade-Insecure-Requests"], "1");
        assert!(headers["Accept"].as_str().unwrap().starts_with("text/html"));
    }

    #[test]
    fn test_header_map_skips_blank_and_keeps_last() {
        let fingerprint = Fingerprint {
            extra_headers: vec![
                ("DNT".to_string(), "0".to_string()),
                (" ".to_string(), "ignored".to_string()),
                ("DNT".to_string(), "1".to_string()),
            ],
            ..Fingerprint::default()
        };
        let headers = fingerprint.header_map();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["DNT"], "1");
    }
}
