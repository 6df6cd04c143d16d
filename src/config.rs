//! Configuration structures and loading logic for the control unit.

use crate::dispatch::DispatchStrategy;
use crate::error::ControlError;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, trace};
use url::Url;

// Constants used for defaults
const DEFAULT_PORT: u16 = 5500;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
const DEFAULT_REGISTRY_URL: &str = "http://localhost:8500";
const DEFAULT_CATALOG_URL: &str = "http://localhost:7500";
const DEFAULT_LLM_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "phi4-reasoning:14b";
const SELF_REGISTRATION_KEY: &str = "POST /register";
const REASONING_DELIMITER: &str = "</think>";

// --- Configuration Structs ---

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Where live services and their catalog entries come from.
#[derive(Clone, Debug, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    /// Operation every service exposes for its own registration; never planned.
    #[serde(default = "default_self_registration_key")]
    pub self_registration_key: String,
    #[serde(default)]
    pub endpoint_rewrite: Option<EndpointRewrite>,
}

/// Replaces an endpoint URL prefix, for services that advertise an address
/// the control unit cannot reach directly.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EndpointRewrite {
    pub from: String,
    pub to: String,
}

impl EndpointRewrite {
    pub fn apply(&self, endpoint: &str) -> String {
        match endpoint.strip_prefix(self.from.as_str()) {
            Some(rest) => format!("{}{}", self.to, rest),
            None => endpoint.to_string(),
        }
    }
}

/// Completion backend section
#[derive(Clone, Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Marker closing the model's reasoning section, if it emits one.
    #[serde(default = "default_reasoning_delimiter")]
    pub reasoning_delimiter: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Parallel,
    Sequential,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_mode")]
    pub mode: DispatchMode,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

impl DispatchConfig {
    pub fn strategy(&self) -> DispatchStrategy {
        match self.mode {
            DispatchMode::Sequential => DispatchStrategy::Sequential,
            DispatchMode::Parallel => DispatchStrategy::Parallel {
                max_in_flight: self.max_in_flight.max(1),
            },
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScratchConfig {
    /// Parent of the per-request upload directories.
    #[serde(default = "default_scratch_root")]
    pub root: PathBuf,
}

/// Configuration for the control unit
#[derive(Clone, Debug, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub scratch: ScratchConfig,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // Path to the config file (for reference)
    #[serde(skip)]
    pub config_file_path: Option<String>,
}

// --- Default Functions ---

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_registry_url() -> String {
    DEFAULT_REGISTRY_URL.to_string()
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_self_registration_key() -> String {
    SELF_REGISTRATION_KEY.to_string()
}

fn default_llm_url() -> String {
    DEFAULT_LLM_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_num_ctx() -> u32 {
    8192
}

fn default_llm_timeout_secs() -> u64 {
    300
}

fn default_reasoning_delimiter() -> String {
    REASONING_DELIMITER.to_string()
}

fn default_dispatch_mode() -> DispatchMode {
    DispatchMode::Parallel
}

fn default_max_in_flight() -> usize {
    8
}

fn default_task_timeout_secs() -> u64 {
    5
}

fn default_scratch_root() -> PathBuf {
    std::env::temp_dir().join("control-unit-scratch")
}

fn default_request_timeout_secs() -> u64 {
    600
}

// --- Default Implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            catalog_url: default_catalog_url(),
            self_registration_key: default_self_registration_key(),
            endpoint_rewrite: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            num_ctx: default_num_ctx(),
            timeout_secs: default_llm_timeout_secs(),
            reasoning_delimiter: default_reasoning_delimiter(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: default_dispatch_mode(),
            max_in_flight: default_max_in_flight(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: default_scratch_root(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            discovery: DiscoveryConfig::default(),
            llm: LlmConfig::default(),
            dispatch: DispatchConfig::default(),
            scratch: ScratchConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            config_file_path: None,
        }
    }
}

// --- Config Loading Logic ---

impl ControlConfig {
    /// Load configuration from a TOML file
    #[tracing::instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Loading configuration from file.");
        let config_str = fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow!("Failed to read config file: {}", e))?;
        trace!(content_len = config_str.len(), "Read config file content.");

        let mut config: ControlConfig = toml::from_str(&config_str)
            .map_err(|e| anyhow!("Failed to parse config file: {}", e))?;

        config.config_file_path = Some(path.as_ref().display().to_string());
        debug!("Configuration loaded successfully from file.");
        Ok(config)
    }

    /// Defaults, then the optional file, then the environment; validated.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Environment variables win over the file, matching how the services
    /// are deployed (one env file per container).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REGISTRY_URL") {
            info!(%url, "Using registry URL from environment variable.");
            self.discovery.registry_url = url;
        }
        if let Some(url) = lookup("CATALOG_URL") {
            info!(%url, "Using catalog URL from environment variable.");
            self.discovery.catalog_url = url;
        }
        if let Some(url) = lookup("OLLAMA_API_URL") {
            info!(%url, "Using completion backend URL from environment variable.");
            self.llm.base_url = url;
        }
        if let Some(dir) = lookup("CONTROL_SCRATCH_DIR") {
            info!(%dir, "Using scratch root from environment variable.");
            self.scratch.root = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        for (name, value) in [
            ("discovery.registry_url", &self.discovery.registry_url),
            ("discovery.catalog_url", &self.discovery.catalog_url),
            ("llm.base_url", &self.llm.base_url),
        ] {
            Url::parse(value).map_err(|e| {
                ControlError::ConfigError(format!("{} '{}' is not a valid URL: {}", name, value, e))
            })?;
        }
        if self.dispatch.task_timeout_secs == 0 {
            return Err(ControlError::ConfigError(
                "dispatch.task_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
