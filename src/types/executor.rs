use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus {
    Implemented,
    Planned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Text,
    /// Absolute http(s) URL.
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn text(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: ParamKind::Text,
        }
    }

    pub fn url(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: ParamKind::Url,
        }
    }

    /// Returns a reason when `value` does not satisfy this parameter.
    pub fn check(&self, value: Option<&serde_json::Value>) -> Option<String> {
        let text = match value.and_then(|v| v.as_str()).map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Some(format!("{} is missing", self.name)),
        };

        match self.kind {
            ParamKind::Text => None,
            ParamKind::Url => match reqwest::Url::parse(text) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => None,
                _ => Some(format!("{} is not an absolute http(s) URL", self.name)),
            },
        }
    }
}

/// Static registry entry the router reasons over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorDescriptor {
    pub name: String,
    pub description: String,
    pub required_params: Vec<ParamSpec>,
    pub optional_params: Vec<ParamSpec>,
    pub capabilities: Vec<String>,
    pub examples: Vec<String>,
    pub status: ExecutorStatus,
}

impl ExecutorDescriptor {
    pub fn is_implemented(&self) -> bool {
        self.status == ExecutorStatus::Implemented
    }

    pub fn required_names(&self) -> Vec<&str> {
        self.required_params.iter().map(|p| p.name.as_str()).collect()
    }

    /// Names of required params that are absent or malformed in `params`.
    pub fn missing_params(&self, params: &serde_json::Map<String, serde_json::Value>) -> Vec<String> {
        self.required_params
            .iter()
            .filter(|spec| spec.check(params.get(&spec.name)).is_some())
            .map(|spec| spec.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> ExecutorDescriptor {
        ExecutorDescriptor {
            name: "WebAgent".to_string(),
            description: "Browses".to_string(),
            required_params: vec![
                ParamSpec::url("url", "Start page"),
                ParamSpec::text("task", "What to do"),
            ],
            optional_params: vec![],
            capabilities: vec![],
            examples: vec![],
            status: ExecutorStatus::Implemented,
        }
    }

    #[test]
    fn test_missing_params_detects_absent_and_blank() {
        let params = json!({"url": "https://example.com", "task": "  "});
        let missing = descriptor().missing_params(params.as_object().unwrap());
        assert_eq!(missing, vec!["task".to_string()]);
    }

    #[test]
    fn test_url_param_requires_http_scheme() {
        let spec = ParamSpec::url("url", "");
        assert!(spec.check(Some(&json!("https://example.com/a"))).is_none());
        assert!(spec.check(Some(&json!("ftp://example.com"))).is_some());
        assert!(spec.check(Some(&json!("example.com"))).is_some());
        assert!(spec.check(None).is_some());
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let value = serde_json::to_value(descriptor()).unwrap();
        assert!(value.get("requiredParams").is_some());
        assert_eq!(value["status"], "implemented");
    }
}
