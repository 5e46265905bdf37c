use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Local,
    Cloud,
}

impl Backend {
    pub fn as_str(&self) -> &str {
        match self {
            Backend::Local => "local",
            Backend::Cloud => "cloud",
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "ollama" => Ok(Backend::Local),
            "cloud" => Ok(Backend::Cloud),
            _ => Err(format!("Unknown backend '{}'. Valid options: local, cloud", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub governor: GovernorConfig,
    pub browser: BrowserAgentConfig,
    pub dispatcher: DispatcherConfig,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            governor: GovernorConfig::default(),
            browser: BrowserAgentConfig::default(),
            dispatcher: DispatcherConfig::default(),
            port: 3000,
        }
    }
}

/// Model backend selection and per-backend defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub backend: Backend,
    pub cloud_api_keys: Vec<String>,
    pub cloud_base_url: String,
    pub cloud_model: String,
    pub local_base_url: String,
    pub local_model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub context_length: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            cloud_api_keys: Vec::new(),
            cloud_base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            cloud_model: "gemini-2.0-flash".to_string(),
            local_base_url: "http://localhost:11434".to_string(),
            local_model: "llama3.1".to_string(),
            max_output_tokens: 2048,
            temperature: 0.3,
            context_length: 32768,
        }
    }
}

/// Limits applied by the content governor before every model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Maximum content length in characters.
    pub max_content_length: usize,
    pub max_tokens_per_request: usize,
    pub enable_chunking: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_content_length: 40_000,
            max_tokens_per_request: 12_000,
            enable_chunking: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserAgentConfig {
    pub max_iterations: usize,
    /// Confidence a model must report before a claimed completion is accepted.
    pub completion_threshold: f32,
    pub page_load_timeout_ms: u64,
    pub action_timeout_ms: u64,
    /// Pause after navigation before the first snapshot.
    pub settle_ms: u64,
    /// Extra pause when the page looks like a bot check.
    pub anti_bot_wait_ms: u64,
    /// Stop as soon as an extract action yields at least one item.
    pub complete_on_extraction: bool,
    /// Consecutive unparseable decisions tolerated before summarizing.
    pub max_malformed_decisions: usize,
    pub headless: bool,
}

impl Default for BrowserAgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            completion_threshold: 0.75,
            page_load_timeout_ms: 30_000,
            action_timeout_ms: 10_000,
            settle_ms: 1_500,
            anti_bot_wait_ms: 3_000,
            complete_on_extraction: true,
            max_malformed_decisions: 3,
            headless: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub max_depth: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { max_depth: 5 }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Loads a TOML file, then lets environment variables override it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(backend) = env_var("WAYFARER_BACKEND").and_then(|b| b.parse::<Backend>().ok()) {
            self.gateway.backend = backend;
        }

        let keys = cloud_keys_from_env();
        if !keys.is_empty() {
            self.gateway.cloud_api_keys = keys;
        }

        if let Some(v) = env_var("WAYFARER_CLOUD_BASE_URL") {
            self.gateway.cloud_base_url = v;
        }
        if let Some(v) = env_var("WAYFARER_CLOUD_MODEL") {
            self.gateway.cloud_model = v;
        }
        if let Some(v) = env_var("WAYFARER_LOCAL_BASE_URL") {
            self.gateway.local_base_url = v;
        }
        if let Some(v) = env_var("WAYFARER_LOCAL_MODEL") {
            self.gateway.local_model = v;
        }
        if let Some(v) = env_parse("WAYFARER_MAX_OUTPUT_TOKENS") {
            self.gateway.max_output_tokens = v;
        }
        if let Some(v) = env_parse("WAYFARER_TEMPERATURE") {
            self.gateway.temperature = v;
        }
        if let Some(v) = env_parse("WAYFARER_CONTEXT_LENGTH") {
            self.gateway.context_length = v;
        }

        if let Some(v) = env_parse("WAYFARER_MAX_CONTENT_LENGTH") {
            self.governor.max_content_length = v;
        }
        if let Some(v) = env_parse("WAYFARER_MAX_TOKENS_PER_REQUEST") {
            self.governor.max_tokens_per_request = v;
        }
        if let Some(v) = env_var("WAYFARER_ENABLE_CHUNKING") {
            self.governor.enable_chunking = parse_flag(&v);
        }

        if let Some(v) = env_parse("WAYFARER_BROWSER_MAX_ITERATIONS") {
            self.browser.max_iterations = v;
        }
        if let Some(v) = env_parse("WAYFARER_COMPLETION_THRESHOLD") {
            self.browser.completion_threshold = v;
        }
        if let Some(v) = env_parse("WAYFARER_PAGE_LOAD_TIMEOUT_MS") {
            self.browser.page_load_timeout_ms = v;
        }
        if let Some(v) = env_parse("WAYFARER_ACTION_TIMEOUT_MS") {
            self.browser.action_timeout_ms = v;
        }
        if let Some(v) = env_var("WAYFARER_HEADLESS") {
            self.browser.headless = parse_flag(&v);
        }

        if let Some(v) = env_parse("WAYFARER_MAX_DEPTH") {
            self.dispatcher.max_depth = v;
        }
        if let Some(v) = env_parse("WAYFARER_PORT") {
            self.port = v;
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Collects keys from the comma list and the numbered `_1.._N` variables.
fn cloud_keys_from_env() -> Vec<String> {
    let mut keys: Vec<String> = env_var("WAYFARER_CLOUD_API_KEYS")
        .map(|list| {
            list.split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        })
        .unwrap_or_default();

    for i in 1.. {
        match env_var(&format!("WAYFARER_CLOUD_API_KEY_{}", i)) {
            Some(key) => {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            None => break,
        }
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.backend, Backend::Local);
        assert_eq!(config.browser.max_iterations, 8);
        assert_eq!(config.dispatcher.max_depth, 5);
        assert!((config.browser.completion_threshold - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("cloud".parse::<Backend>(), Ok(Backend::Cloud));
        assert_eq!(" Local ".parse::<Backend>(), Ok(Backend::Local));
        assert_eq!("ollama".parse::<Backend>(), Ok(Backend::Local));
        assert!("other".parse::<Backend>().unwrap_err().contains("Unknown backend"));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_from_file_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
port = 8080

[gateway]
backend = "cloud"
cloud_api_keys = ["k1", "k2"]

[browser]
max_iterations = 4
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.gateway.backend, Backend::Cloud);
        assert_eq!(config.gateway.cloud_api_keys.len(), 2);
        assert_eq!(config.browser.max_iterations, 4);
        assert_eq!(config.governor.max_content_length, 40_000);
    }

    #[test]
    fn test_from_file_missing() {
        assert!(Config::from_file("/nonexistent/wayfarer.toml").is_err());
    }
}
