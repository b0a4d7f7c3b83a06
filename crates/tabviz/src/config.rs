use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tabviz_llm::LlmProvider;

pub const DEFAULT_CACHE_PATH: &str = "tabviz-cache.sqlite";
pub const MEMORY_CACHE: &str = ":memory:";
pub const DEFAULT_TTL_HOURS: u64 = 24;

/// Which oracle answers extraction calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderChoice {
    Local,
    Remote(LlmProvider),
}

impl ProviderChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderChoice::Local => "local",
            ProviderChoice::Remote(provider) => provider.as_str(),
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            ProviderChoice::Local => "local",
            ProviderChoice::Remote(provider) => provider.default_model(),
        }
    }
}

impl FromStr for ProviderChoice {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        if raw.trim().eq_ignore_ascii_case("local") {
            return Ok(ProviderChoice::Local);
        }
        raw.parse::<LlmProvider>().map(ProviderChoice::Remote)
    }
}

/// How the orchestrator picks between the canonical and free-form oracle calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionMode {
    /// Free-form first, then one canonical pass if the result looks like the schema.
    #[default]
    Auto,
    /// Always believe the file follows the schema.
    Canonical,
    /// Never attempt the canonical variant.
    Generic,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMode::Auto => "auto",
            ExtractionMode::Canonical => "canonical",
            ExtractionMode::Generic => "generic",
        }
    }
}

impl FromStr for ExtractionMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "auto" => Ok(ExtractionMode::Auto),
            "canonical" | "household" => Ok(ExtractionMode::Canonical),
            "generic" => Ok(ExtractionMode::Generic),
            other => Err(anyhow!("unknown extraction mode {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CacheLocation {
    Memory,
    Sqlite(PathBuf),
}

impl CacheLocation {
    pub fn parse(raw: &str) -> Self {
        if raw.trim() == MEMORY_CACHE {
            CacheLocation::Memory
        } else {
            CacheLocation::Sqlite(PathBuf::from(raw))
        }
    }
}

#[derive(Debug, Clone)]
pub struct TabvizConfig {
    pub provider: ProviderChoice,
    pub model: String,
    pub cache: CacheLocation,
    pub cache_ttl: Duration,
    pub mode: ExtractionMode,
}

impl TabvizConfig {
    pub fn from_env() -> Result<Self> {
        let provider_name = env::var("TABVIZ_PROVIDER").unwrap_or_else(|_| "local".to_string());
        let provider: ProviderChoice = provider_name.parse()?;
        let model = env::var("TABVIZ_MODEL").ok();
        let cache = env::var("TABVIZ_CACHE").unwrap_or_else(|_| DEFAULT_CACHE_PATH.to_string());
        let ttl_hours = env::var("TABVIZ_CACHE_TTL_HOURS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TTL_HOURS);
        let mode = match env::var("TABVIZ_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => ExtractionMode::default(),
        };
        Ok(Self {
            provider,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            cache: CacheLocation::parse(&cache),
            cache_ttl: Duration::from_secs(ttl_hours * 60 * 60),
            mode,
        })
    }

    /// Applies CLI overrides. A new provider without an explicit model resets
    /// the model to that provider's default.
    pub fn with_overrides(
        mut self,
        provider: Option<ProviderChoice>,
        model: Option<String>,
        mode: Option<ExtractionMode>,
        cache: Option<String>,
    ) -> Self {
        if let Some(provider) = provider {
            if provider != self.provider && model.is_none() {
                self.model = provider.default_model().to_string();
            }
            self.provider = provider;
        }
        if let Some(model) = model {
            self.model = model;
        }
        if let Some(mode) = mode {
            self.mode = mode;
        }
        if let Some(cache) = cache {
            self.cache = CacheLocation::parse(&cache);
        }
        self
    }
}
