use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

use super::{ParsedToolArgs, QuestionPlan, Tool, ToolParameters, ToolPlan, ASK_USER_TOOL};

const MAX_OPTIONS: usize = 10;

struct AskUserTool {
    params: ToolParameters,
}

pub fn ask_user_tool() -> Arc<dyn Tool> {
    let params = ToolParameters::object()
        .string("question", "Question to put to the user", true)
        .string_array("options", "Suggested answers to pick from", false)
        .build();
    Arc::new(AskUserTool { params })
}

impl Tool for AskUserTool {
    fn name(&self) -> &str {
        ASK_USER_TOOL
    }

    fn description(&self) -> &str {
        "Ask the user a question and wait for the answer"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.params
    }

    fn plan(&self, args: &ParsedToolArgs) -> CoreResult<ToolPlan> {
        let question = args.require_string("question")?.trim().to_string();
        let options: Vec<String> = args
            .get_string_list("options")?
            .unwrap_or_default()
            .into_iter()
            .map(|option| option.trim().to_string())
            .filter(|option| !option.is_empty())
            .collect();
        if options.len() > MAX_OPTIONS {
            return Err(CoreError::Validation(format!(
                "at most {MAX_OPTIONS} options are allowed"
            )));
        }
        Ok(ToolPlan::Question(QuestionPlan { question, options }))
    }
}
