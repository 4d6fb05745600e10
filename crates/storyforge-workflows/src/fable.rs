//! The fable workflow: analyze a classic fable, brainstorm, write a micro-fable,
//! loop through human review, then format and illustrate the result.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{info, warn};

use storyforge_core::config::WorkflowConfig;
use storyforge_core::error::{Result, StoryforgeError};
use storyforge_core::traits::ModelService;
use storyforge_engine::graph::FieldRouter;
use storyforge_engine::{
    GraphBuilder, Node, NodeContext, NodeOutcome, RevisionGovernor, StoryState, WorkflowGraph,
    END,
};

use crate::keys::*;
use crate::prompts;
use crate::text::{parse_json, parse_scenes, word_count};
use crate::types::to_value;

pub const FABLE_WORKFLOW: &str = "fable";

/// The only tool the main agent knows how to dispatch to.
pub const AESOP_TOOL: &str = "aesop_tool";

/// Node that suspends for human review.
pub const HUMAN_REVIEW: &str = "human_review";

/// Resume input fields understood by the review node.
pub const REVIEW_ACTION: &str = "action";
pub const REVIEW_NOTES: &str = "notes";

/// A reviewer's verdict on the current fable.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewDecision {
    Approve,
    Reject { notes: String },
}

impl ReviewDecision {
    /// Resume input for [`RunController::resume_run`](storyforge_engine::RunController::resume_run).
    pub fn into_state(self) -> StoryState {
        match self {
            Self::Approve => StoryState::new().with(REVIEW_ACTION, "approve"),
            Self::Reject { notes } => StoryState::new()
                .with(REVIEW_ACTION, "reject")
                .with(REVIEW_NOTES, notes),
        }
    }
}

pub fn tool_router() -> FieldRouter {
    FieldRouter::new(TOOL_TO_CALL, &[AESOP_TOOL], AESOP_TOOL)
}

pub fn build_fable_workflow(
    model: Arc<dyn ModelService>,
    config: &WorkflowConfig,
) -> Result<WorkflowGraph> {
    let governor = RevisionGovernor::new(
        HUMAN_APPROVED,
        REVISION_COUNT,
        u64::from(config.fable_max_revisions),
    );
    let step = |system: &'static str, kind: StepKind| ModelStep {
        model: model.clone(),
        system,
        kind,
    };

    GraphBuilder::new(FABLE_WORKFLOW)
        .node_with_tool("main_agent", "main_agent", MainAgent)
        .node_with_tool("analyze_fable", AESOP_TOOL, step(prompts::ANALYZE_SYSTEM, StepKind::Analyze))
        .node_with_tool("brainstorm", AESOP_TOOL, step(prompts::BRAINSTORM_SYSTEM, StepKind::Brainstorm))
        .node_with_tool("generate", AESOP_TOOL, step(prompts::GENERATE_SYSTEM, StepKind::Generate))
        .interruptible_node(HUMAN_REVIEW, HUMAN_REVIEW, HumanReview)
        .node_with_tool("revise", AESOP_TOOL, step(prompts::REVISE_SYSTEM, StepKind::Revise))
        .node_with_tool("approval_gate", HUMAN_REVIEW, governor.marker())
        .node_with_tool("format_output", "formatter", step(prompts::FORMAT_SYSTEM, StepKind::Format))
        .node_with_tool("image_prompts", "image_prompter", step(prompts::IMAGE_SYSTEM, StepKind::Images))
        .conditional_edges("main_agent", tool_router(), &[(AESOP_TOOL, "analyze_fable")])
        .edge("analyze_fable", "brainstorm")
        .edge("brainstorm", "generate")
        .edge("generate", HUMAN_REVIEW)
        .conditional_edges(
            HUMAN_REVIEW,
            governor,
            &[
                (RevisionGovernor::FORWARD, "approval_gate"),
                (RevisionGovernor::RETRY, "revise"),
            ],
        )
        .edge("revise", HUMAN_REVIEW)
        .edge("approval_gate", "format_output")
        .edge("format_output", "image_prompts")
        .edge("image_prompts", END)
        .entry("main_agent")
        .build()
}

/// Validates the request and picks the tool that handles it.
struct MainAgent;

impl Node for MainAgent {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        let fable = state.get_str(FABLE);
        let outcome = if fable.trim().is_empty() {
            Err(StoryforgeError::node("main_agent", "no fable text supplied"))
        } else {
            info!(tool = AESOP_TOOL, words = word_count(fable), "Dispatching fable request");
            Ok(NodeOutcome::Continue(
                StoryState::new().with(TOOL_TO_CALL, AESOP_TOOL).with(
                    PROCESSING_REQUEST,
                    json!({
                        "user_intent": state.get_str(USER_MESSAGE),
                        "fable_text": fable,
                    }),
                ),
            ))
        };
        Box::pin(async move { outcome })
    }

    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        Some(&[TOOL_TO_CALL, PROCESSING_REQUEST])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    Analyze,
    Brainstorm,
    Generate,
    Revise,
    Format,
    Images,
}

/// One model-backed step of the fable pipeline.
struct ModelStep {
    model: Arc<dyn ModelService>,
    system: &'static str,
    kind: StepKind,
}

impl ModelStep {
    fn user_prompt(&self, state: &StoryState) -> String {
        let fable = state.get_str(FABLE);
        let intent = state.get_str(USER_MESSAGE);
        match self.kind {
            StepKind::Analyze => format!(
                "Analyze this fable.\n\nFABLE:\n{}\n\nREADER REQUEST: {}",
                fable, intent
            ),
            StepKind::Brainstorm => format!(
                "Brainstorm a modern retelling.\n\nORIGINAL FABLE:\n{}\n\nANALYSIS:\n{}\n\nREADER REQUEST: {}",
                fable,
                state.get_object(ANALYSIS),
                intent
            ),
            StepKind::Generate => format!(
                "Write the micro-fable.\n\nORIGINAL FABLE:\n{}\n\nANALYSIS:\n{}\n\nBRAINSTORM:\n{}\n\nREADER REQUEST: {}",
                fable,
                state.get_object(ANALYSIS),
                state.get_object(BRAINSTORM),
                intent
            ),
            StepKind::Revise => format!(
                "Revise this micro-fable.\n\nCURRENT FABLE:\n{}\n\nREVIEWER FEEDBACK: {}\n\nMORAL: {}",
                state.get_str(STORY),
                state.get_str(FEEDBACK),
                moral(state)
            ),
            StepKind::Format => format!(
                "Format this fable for publication.\n\nFABLE:\n{}\n\nORIGINAL FABLE:\n{}\n\nBRAINSTORM:\n{}",
                state.get_str(STORY),
                fable,
                state.get_object(BRAINSTORM)
            ),
            StepKind::Images => format!(
                "Write the image prompts for this fable.\n\nFABLE:\n{}",
                state.get_str(STORY)
            ),
        }
    }

    /// Map the model's answer (or failure) to this step's partial state.
    fn apply(&self, state: &StoryState, reply: Result<String>) -> Result<StoryState> {
        let partial = match self.kind {
            StepKind::Analyze => {
                let text = reply.unwrap_or_else(|e| {
                    warn!(error = %e, "Fable analysis failed");
                    String::new()
                });
                let analysis = parse_object(&text, "fable analysis").unwrap_or_else(|| {
                    json!({"moral": text, "characters": [], "structure": {}, "symbols": []})
                });
                StoryState::new().with(ANALYSIS, analysis)
            }
            StepKind::Brainstorm => {
                let text = reply.unwrap_or_else(|e| {
                    warn!(error = %e, "Brainstorm failed");
                    String::new()
                });
                let ideas = parse_object(&text, "brainstorm").unwrap_or_else(|| {
                    json!({"moral_approaches": text, "variations": [], "character_ideas": [], "imagery": []})
                });
                StoryState::new().with(BRAINSTORM, ideas)
            }
            StepKind::Generate => {
                let story = reply?;
                StoryState::new()
                    .with(STORY, story.trim())
                    .with(REVISION_COUNT, 0u64)
            }
            StepKind::Revise => {
                let story = reply?;
                StoryState::new()
                    .with(STORY, story.trim())
                    .with(REVISION_COUNT, state.get_u64(REVISION_COUNT) + 1)
            }
            StepKind::Format => {
                let formatted = reply.unwrap_or_else(|e| {
                    warn!(error = %e, "Formatting failed, publishing the approved text as is");
                    state.get_str(STORY).to_string()
                });
                StoryState::new().with(FINAL_STORY, formatted.trim())
            }
            StepKind::Images => {
                let text = reply.unwrap_or_else(|e| {
                    warn!(error = %e, "Image prompt request failed, using the fable as one scene");
                    state.get_str(STORY).to_string()
                });
                StoryState::new().with(IMAGE_PROMPTS, to_value(&parse_scenes(&text)))
            }
        };
        Ok(partial)
    }
}

impl Node for ModelStep {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let user = self.user_prompt(state);
            let reply = ctx.invoke(self.model.as_ref(), self.system, &user).await;
            let partial = self.apply(state, reply)?;
            info!(node = %ctx.node(), keys = partial.len(), "Fable step done");
            Ok(NodeOutcome::Continue(partial))
        })
    }

    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        let keys: &'static [&'static str] = match self.kind {
            StepKind::Analyze => &[ANALYSIS],
            StepKind::Brainstorm => &[BRAINSTORM],
            StepKind::Generate | StepKind::Revise => &[STORY, REVISION_COUNT],
            StepKind::Format => &[FINAL_STORY],
            StepKind::Images => &[IMAGE_PROMPTS],
        };
        Some(keys)
    }
}

fn parse_object(text: &str, what: &str) -> Option<Value> {
    parse_json::<Value>(text, what).filter(Value::is_object)
}

fn moral(state: &StoryState) -> String {
    match state.get_object(ANALYSIS).get("moral") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Suspends with the current draft and maps the reviewer's verdict back
/// into the state.
struct HumanReview;

impl Node for HumanReview {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        let story = state.get_str(STORY);
        let payload = json!({
            "story": story,
            "review_count": state.get_u64(REVISION_COUNT),
            "word_count": word_count(story),
            "moral": moral(state),
            "feedback": state.get_str(FEEDBACK),
        });
        info!(review_count = state.get_u64(REVISION_COUNT), "Awaiting human review");
        Box::pin(async move { Ok(NodeOutcome::Suspend(payload)) })
    }

    fn resume(&self, _state: &StoryState, input: StoryState) -> Result<StoryState> {
        match input.get_str(REVIEW_ACTION) {
            "approve" => Ok(StoryState::new().with(HUMAN_APPROVED, true)),
            "reject" => Ok(StoryState::new()
                .with(HUMAN_APPROVED, false)
                .with(FEEDBACK, input.get_str(REVIEW_NOTES))),
            other => Err(StoryforgeError::resume_rejected(
                HUMAN_REVIEW,
                format!("unknown review action '{}', expected approve or reject", other),
            )),
        }
    }

    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        Some(&[HUMAN_APPROVED, FEEDBACK])
    }
}
