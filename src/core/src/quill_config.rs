use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::paths::quill_config_path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    pub debug: DebugConfig,
    pub approvals: ApprovalsConfig,
    pub snapshots: SnapshotsConfig,
    pub tools: ToolsConfig,
    pub artifacts: ArtifactsConfig,
    pub web: WebConfig,
}

impl QuillConfig {
    pub fn load() -> Result<Self, String> {
        let path = quill_config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| format!("read config.toml: {e}"))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| format!("parse config.toml: {e}"))
    }

    pub fn config_path() -> Result<PathBuf, String> {
        quill_config_path()
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.enabled || crate::debug_enabled()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// Every side effect waits for a human decision.
    #[default]
    Ask,
    /// Gates resolve to `apply` as soon as they open.
    AutoApply,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApprovalsConfig {
    pub policy: ApprovalPolicy,
    /// Unanswered gates resolve as a rejection after this many seconds.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotsConfig {
    /// Folder inside the document store holding one record per snapshot.
    pub dir: String,
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            dir: ".quill/snapshots".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Serialize snapshot-then-mutate for the same path across pipelines.
    pub lock_paths: bool,
    pub providers: HashMap<String, ToolProviderConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolProviderConfig {
    pub enabled: Option<bool>,
    pub allow_tools: Vec<String>,
    pub deny_tools: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub commands_dir: String,
    pub skills_dir: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            commands_dir: ".quill/commands".to_string(),
            skills_dir: ".quill/skills".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub search: WebSearchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_results: usize,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.search.brave.com/res/v1/web/search".to_string(),
            api_key: String::new(),
            api_key_env: "BRAVE_API_KEY".to_string(),
            timeout_secs: 15,
            max_results: 5,
        }
    }
}

impl WebSearchConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        let configured = self.api_key.trim();
        if !configured.is_empty() {
            return Some(configured.to_string());
        }
        std::env::var(&self.api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}
