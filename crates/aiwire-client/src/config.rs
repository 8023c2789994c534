use aiwire_core::{AiwireError, AiwireResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "AIWIRE_API_KEY";
/// Environment variable overriding the base URL.
pub const ENV_BASE_URL: &str = "AIWIRE_BASE_URL";
/// Environment variable holding the organization id.
pub const ENV_ORGANIZATION: &str = "AIWIRE_ORGANIZATION";
/// Environment variable holding the project id.
pub const ENV_PROJECT: &str = "AIWIRE_PROJECT";

/// Connection settings for [`Client`](crate::Client).
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bearer token.
    #[serde(default)]
    pub api_key: String,
    /// API root, e.g. `https://api.openai.com/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as `OpenAI-Organization` when set.
    #[serde(default)]
    pub organization: Option<String>,
    /// Sent as `OpenAI-Project` when set.
    #[serde(default)]
    pub project: Option<String>,
    /// TCP and TLS connect deadline.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Whole-request deadline for non-streaming calls. Streams are bounded
    /// by their cancellation token instead.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Consecutive undecodable frames tolerated before a stream fails.
    #[serde(default = "default_max_consecutive_skips")]
    pub max_consecutive_skips: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_max_consecutive_skips() -> usize {
    aiwire_stream::DEFAULT_MAX_CONSECUTIVE_SKIPS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            organization: None,
            project: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_consecutive_skips: default_max_consecutive_skips(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("project", &self.project)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_consecutive_skips", &self.max_consecutive_skips)
            .finish()
    }
}

impl ClientConfig {
    /// Config with defaults and the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Points the client at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Reads the `AIWIRE_*` environment variables.
    pub fn from_env() -> AiwireResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AiwireResult<Self> {
        let mut config = Self::default();
        config.apply_lookup(&lookup, true);
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file. Missing fields take their defaults and a missing
    /// key is taken from `AIWIRE_API_KEY`.
    pub fn load(path: impl AsRef<Path>) -> AiwireResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AiwireError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_lookup(&|name: &str| std::env::var(name).ok(), false);
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML without validating.
    pub fn from_toml_str(text: &str) -> AiwireResult<Self> {
        toml::from_str(text).map_err(|e| AiwireError::Config(format!("invalid config: {e}")))
    }

    fn apply_lookup(&mut self, lookup: &dyn Fn(&str) -> Option<String>, overwrite: bool) {
        let present = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if self.api_key.is_empty() || overwrite {
            if let Some(key) = present(ENV_API_KEY) {
                self.api_key = key;
            }
        }
        if !overwrite {
            return;
        }
        if let Some(url) = present(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(org) = present(ENV_ORGANIZATION) {
            self.organization = Some(org);
        }
        if let Some(project) = present(ENV_PROJECT) {
            self.project = Some(project);
        }
    }

    /// Rejects configs that cannot produce a working client.
    pub fn validate(&self) -> AiwireResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(AiwireError::Config(format!(
                "api_key is empty; set it in the config file or via {ENV_API_KEY}"
            )));
        }
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(AiwireError::Config("base_url is empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AiwireError::Config(format!(
                "base_url must be an http(s) URL, got {url}"
            )));
        }
        if self.max_consecutive_skips == 0 {
            return Err(AiwireError::Config(
                "max_consecutive_skips must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Absolute URL of an API path such as `/chat/completions`.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
