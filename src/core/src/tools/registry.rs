use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::quill_config::{ToolProviderConfig, ToolsConfig};

use super::{artifact, documents, question, web, Tool, ToolContext};

pub trait ToolProvider: Send + Sync {
    fn id(&self) -> &'static str;
    fn tools(&self, ctx: ToolContext) -> Vec<Arc<dyn Tool>>;
}

/// Model-facing definition of one enabled tool.
#[derive(Debug, Clone, Serialize)]
pub struct ListedTool {
    pub provider_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Clone)]
struct ProvidedTool {
    provider_id: String,
    tool: Arc<dyn Tool>,
}

/// Enabled tools, looked up by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<ProvidedTool>,
}

impl ToolSet {
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|entry| entry.tool.name() == name)
            .map(|entry| entry.tool.clone())
    }

    /// Definitions handed to the model alongside the transcript.
    pub fn definitions(&self) -> Vec<ListedTool> {
        self.tools
            .iter()
            .map(|entry| ListedTool {
                provider_id: entry.provider_id.clone(),
                name: entry.tool.name().to_string(),
                description: entry.tool.description().to_string(),
                input_schema: entry.tool.parameters().schema.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub struct DocumentsToolProvider;

impl ToolProvider for DocumentsToolProvider {
    fn id(&self) -> &'static str {
        "documents"
    }

    fn tools(&self, ctx: ToolContext) -> Vec<Arc<dyn Tool>> {
        vec![
            documents::read_tool(ctx.clone()),
            documents::list_tool(ctx.clone()),
            documents::search_tool(ctx.clone()),
            documents::write_tool(ctx),
        ]
    }
}

pub struct ArtifactsToolProvider;

impl ToolProvider for ArtifactsToolProvider {
    fn id(&self) -> &'static str {
        "artifacts"
    }

    fn tools(&self, ctx: ToolContext) -> Vec<Arc<dyn Tool>> {
        vec![artifact::create_artifact_tool(ctx)]
    }
}

pub struct InteractionToolProvider;

impl ToolProvider for InteractionToolProvider {
    fn id(&self) -> &'static str {
        "interaction"
    }

    fn tools(&self, _ctx: ToolContext) -> Vec<Arc<dyn Tool>> {
        vec![question::ask_user_tool()]
    }
}

pub struct WebToolProvider;

impl ToolProvider for WebToolProvider {
    fn id(&self) -> &'static str {
        "web"
    }

    fn tools(&self, ctx: ToolContext) -> Vec<Arc<dyn Tool>> {
        vec![web::web_search_tool(ctx)]
    }
}

pub struct ToolRegistry {
    providers: Vec<Arc<dyn ToolProvider>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            providers: vec![
                Arc::new(DocumentsToolProvider),
                Arc::new(ArtifactsToolProvider),
                Arc::new(InteractionToolProvider),
                Arc::new(WebToolProvider),
            ],
        }
    }

    /// Registry with no built-in providers.
    pub fn empty() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build_tools(&self, ctx: ToolContext, config: &ToolsConfig) -> Result<ToolSet, String> {
        Ok(ToolSet {
            tools: self.collect_tools(ctx, config)?,
        })
    }

    fn validate_provider_overrides(&self, config: &ToolsConfig) -> Result<(), String> {
        let known: HashSet<&str> = self.providers.iter().map(|provider| provider.id()).collect();
        for (provider_id, override_cfg) in &config.providers {
            if known.contains(provider_id.as_str()) {
                continue;
            }
            let controls_enabled = override_cfg.enabled.unwrap_or(false)
                || !override_cfg.allow_tools.is_empty()
                || !override_cfg.deny_tools.is_empty();
            if controls_enabled {
                return Err(format!(
                    "unknown tool provider `{provider_id}` in tools.providers config"
                ));
            }
        }
        Ok(())
    }

    fn validate_tool_overrides(
        &self,
        provider_id: &str,
        override_cfg: Option<&ToolProviderConfig>,
        tools: &[Arc<dyn Tool>],
    ) -> Result<(), String> {
        let Some(override_cfg) = override_cfg else {
            return Ok(());
        };
        let available: HashSet<&str> = tools.iter().map(|tool| tool.name()).collect();
        for tool_name in &override_cfg.allow_tools {
            if !available.contains(tool_name.as_str()) {
                return Err(format!(
                    "unknown tool `{tool_name}` in tools.providers.{provider_id}.allow_tools"
                ));
            }
        }
        for tool_name in &override_cfg.deny_tools {
            if !available.contains(tool_name.as_str()) {
                return Err(format!(
                    "unknown tool `{tool_name}` in tools.providers.{provider_id}.deny_tools"
                ));
            }
        }
        Ok(())
    }

    fn collect_tools(
        &self,
        ctx: ToolContext,
        config: &ToolsConfig,
    ) -> Result<Vec<ProvidedTool>, String> {
        self.validate_provider_overrides(config)?;
        let mut tools = Vec::new();
        let mut seen_names: HashMap<String, String> = HashMap::new();
        for provider in &self.providers {
            let override_cfg = config.providers.get(provider.id());
            if !provider_enabled(override_cfg) {
                continue;
            }
            let provider_tools = provider.tools(ctx.clone());
            self.validate_tool_overrides(provider.id(), override_cfg, &provider_tools)?;
            for tool in provider_tools {
                if !tool_allowed(tool.name(), override_cfg) {
                    continue;
                }
                if let Some(existing) =
                    seen_names.insert(tool.name().to_string(), provider.id().to_string())
                {
                    return Err(format!(
                        "tool name conflict `{}` between providers `{existing}` and `{}`",
                        tool.name(),
                        provider.id()
                    ));
                }
                tools.push(ProvidedTool {
                    provider_id: provider.id().to_string(),
                    tool,
                });
            }
        }
        Ok(tools)
    }
}

fn provider_enabled(override_cfg: Option<&ToolProviderConfig>) -> bool {
    override_cfg.and_then(|cfg| cfg.enabled).unwrap_or(true)
}

fn tool_allowed(tool_name: &str, override_cfg: Option<&ToolProviderConfig>) -> bool {
    let Some(override_cfg) = override_cfg else {
        return true;
    };
    let in_allow_list = if override_cfg.allow_tools.is_empty() {
        true
    } else {
        override_cfg
            .allow_tools
            .iter()
            .any(|name| name == tool_name)
    };
    in_allow_list && !override_cfg.deny_tools.iter().any(|name| name == tool_name)
}
