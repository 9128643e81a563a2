use std::sync::Arc;

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::quill_config::ArtifactsConfig;
use crate::resource::{self, join_path};

use super::{
    MutationPlan, ParsedToolArgs, Tool, ToolContext, ToolParameters, ToolPlan,
    CREATE_ARTIFACT_TOOL,
};

const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ArtifactKind {
    /// A reusable prompt, `<commands_dir>/<name>.md`.
    Command,
    /// A skill folder, `<skills_dir>/<name>/SKILL.md`.
    Skill,
}

#[derive(Debug, Deserialize)]
struct ArtifactArgs {
    kind: ArtifactKind,
    name: String,
    #[serde(default)]
    description: String,
    body: String,
}

struct CreateArtifactTool {
    artifacts: ArtifactsConfig,
    params: ToolParameters,
}

pub fn create_artifact_tool(ctx: ToolContext) -> Arc<dyn Tool> {
    let params = ToolParameters::object()
        .string_enum("kind", "Artifact kind", &["command", "skill"], true)
        .string("name", "Slug: lowercase letters, digits, '-' or '_'", true)
        .string("description", "One-line summary shown in pickers", false)
        .string("body", "Markdown body of the artifact", true)
        .build();
    Arc::new(CreateArtifactTool {
        artifacts: ctx.artifacts,
        params,
    })
}

impl Tool for CreateArtifactTool {
    fn name(&self) -> &str {
        CREATE_ARTIFACT_TOOL
    }

    fn description(&self) -> &str {
        "Create a slash command or skill file from a template"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.params
    }

    fn plan(&self, args: &ParsedToolArgs) -> CoreResult<ToolPlan> {
        let parsed: ArtifactArgs = args.deserialize()?;
        let name = validate_name(&parsed.name)?;
        if parsed.body.trim().is_empty() {
            return Err(CoreError::Validation("body must not be empty".into()));
        }
        let description = parsed.description.trim();
        let (path, content) = match parsed.kind {
            ArtifactKind::Command => (
                join_path(
                    &resource::normalize_path(&self.artifacts.commands_dir)?,
                    &format!("{name}.md"),
                ),
                render_command(description, &parsed.body),
            ),
            ArtifactKind::Skill => (
                join_path(
                    &resource::normalize_path(&self.artifacts.skills_dir)?,
                    &format!("{name}/SKILL.md"),
                ),
                render_skill(name, description, &parsed.body),
            ),
        };
        let label = match parsed.kind {
            ArtifactKind::Command => "command",
            ArtifactKind::Skill => "skill",
        };
        Ok(ToolPlan::Mutation(MutationPlan {
            summary: format!("Create {label} `{name}` at {path}"),
            path,
            content,
        }))
    }
}

fn validate_name(raw: &str) -> CoreResult<&str> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(CoreError::Validation("name required".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid {
        return Err(CoreError::Validation(format!(
            "name `{name}` may only contain lowercase letters, digits, '-' or '_'"
        )));
    }
    Ok(name)
}

fn front_matter(fields: &[(&str, &str)]) -> String {
    let mut out = String::from("---\n");
    for (key, value) in fields {
        if value.is_empty() {
            continue;
        }
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&value.replace('\n', " "));
        out.push('\n');
    }
    out.push_str("---\n\n");
    out
}

fn render_command(description: &str, body: &str) -> String {
    let mut out = front_matter(&[("description", description)]);
    out.push_str(body.trim_end());
    out.push('\n');
    out
}

fn render_skill(name: &str, description: &str, body: &str) -> String {
    let mut out = front_matter(&[("name", name), ("description", description)]);
    out.push_str(body.trim_end());
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quill_config::WebSearchConfig;
    use crate::resource::MemoryResourceStore;

    fn tool() -> Arc<dyn Tool> {
        create_artifact_tool(ToolContext {
            documents: Arc::new(MemoryResourceStore::new()),
            artifacts: ArtifactsConfig::default(),
            web: WebSearchConfig::default(),
        })
    }

    fn plan(raw: &str) -> CoreResult<MutationPlan> {
        let args = ParsedToolArgs::from_raw(raw)?;
        match tool().plan(&args)? {
            ToolPlan::Mutation(plan) => Ok(plan),
            _ => panic!("expected a mutation plan"),
        }
    }

    #[test]
    fn command_lands_in_commands_dir() {
        let plan = plan(
            r#"{"kind":"command","name":"summarize","description":"Summarize a note","body":"Summarize $ARGUMENTS\n"}"#,
        )
        .unwrap();
        assert_eq!(plan.path, ".quill/commands/summarize.md");
        assert_eq!(
            plan.content,
            "---\ndescription: Summarize a note\n---\n\nSummarize $ARGUMENTS\n"
        );
    }

    #[test]
    fn skill_gets_its_own_folder() {
        let plan = plan(r#"{"kind":"skill","name":"tidy-notes","body":"Steps"}"#).unwrap();
        assert_eq!(plan.path, ".quill/skills/tidy-notes/SKILL.md");
        assert!(plan.content.starts_with("---\nname: tidy-notes\n---\n"));
    }

    #[test]
    fn bad_names_and_kinds_are_rejected() {
        assert!(plan(r#"{"kind":"command","name":"../x","body":"b"}"#).is_err());
        assert!(plan(r#"{"kind":"command","name":"Upper","body":"b"}"#).is_err());
        assert!(plan(r#"{"kind":"macro","name":"x","body":"b"}"#).is_err());
        assert!(plan(r#"{"kind":"skill","name":"x","body":"  "}"#).is_err());
    }
}
