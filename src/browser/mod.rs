pub mod actions;
pub mod agent;
#[cfg(feature = "chromium")]
pub mod chromium;
pub mod decision;
pub mod dom;
pub mod extraction;
pub mod perception;
pub mod selectors;
pub mod session;
pub mod state;
pub mod static_page;

pub use agent::{BrowserAgent, RunOutcome};
#[cfg(feature = "chromium")]
pub use chromium::ChromiumEngine;
pub use dom::{Document, DomNode};
pub use extraction::{ExtractionResult, Extractor, FieldMapping};
pub use perception::Observation;
pub use session::{BrowserEngine, Fingerprint, PageSession};
pub use state::{RunEvent, RunMachine, RunState};
pub use static_page::StaticEngine;

/// Resolves `href` against `base`; `None` for unparseable input.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    if let Ok(absolute) = reqwest::Url::parse(href) {
        return Some(absolute.to_string());
    }
    let base = reqwest::Url::parse(base).ok()?;
    base.join(href).ok().map(|url| url.to_string())
}

/// Truncates to `max_chars` characters, appending an ellipsis when cut.
pub(crate) fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
