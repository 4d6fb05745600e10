//! The story workflow: genre dispatch, optional historical research, outline,
//! draft/critique loop, style pass.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use storyforge_core::config::WorkflowConfig;
use storyforge_core::error::{Result, StoryforgeError};
use storyforge_core::traits::{ModelService, ResearchService};
use storyforge_engine::graph::FieldRouter;
use storyforge_engine::{
    GraphBuilder, Node, NodeContext, NodeOutcome, RevisionGovernor, StoryState, WorkflowGraph,
    END,
};

use crate::keys::*;
use crate::prompts;
use crate::text::{
    assign_times, chapter_count, fallback_outline, parse_json, parse_lines, split_styled,
    split_title, word_target,
};
use crate::types::{read_list, to_value, Chapter, Evaluation, ResearchResult};

pub const STORY_WORKFLOW: &str = "story";

pub const HISTORICAL: &str = "Historical";
pub const TERROR: &str = "Terror";
pub const MORAL: &str = "Moral & Reflection";

/// Collaborators the story nodes call.
#[derive(Clone)]
pub struct StoryServices {
    /// Drafting, outlining and styling.
    pub model: Arc<dyn ModelService>,
    /// Critique and research questions.
    pub reasoning: Arc<dyn ModelService>,
    pub research: Option<Arc<dyn ResearchService>>,
}

/// Genre dispatch. Missing or unknown genres take the Moral & Reflection path.
pub fn genre_router() -> FieldRouter {
    FieldRouter::new(GENRE, &[HISTORICAL, TERROR, MORAL], MORAL)
}

pub fn build_story_workflow(
    services: &StoryServices,
    config: &WorkflowConfig,
) -> Result<WorkflowGraph> {
    let governor = RevisionGovernor::new(
        CRITIC_APPROVED,
        REVISION_COUNT,
        u64::from(config.story_max_revisions),
    );

    GraphBuilder::new(STORY_WORKFLOW)
        .node_with_tool("intake", "story_router", Intake)
        .node_with_tool(
            "generate_questions",
            "research_tool",
            QuestionGenerator {
                model: services.reasoning.clone(),
                limit: config.research_question_limit,
            },
        )
        .node_with_tool(
            "research",
            "research_tool",
            Researcher {
                research: services.research.clone(),
            },
        )
        .node_with_tool(
            "outline",
            "story_builder",
            Outliner {
                model: services.model.clone(),
            },
        )
        .node_with_tool(
            "draft",
            "story_builder",
            Drafter {
                model: services.model.clone(),
            },
        )
        .node_with_tool(
            "critique",
            "critic",
            Critic {
                model: services.reasoning.clone(),
            },
        )
        .node_with_tool("approval_gate", "critic", governor.marker())
        .node_with_tool(
            "style",
            "style_adapter",
            StyleAdapter {
                model: services.model.clone(),
            },
        )
        .conditional_edges(
            "intake",
            genre_router(),
            &[
                (HISTORICAL, "generate_questions"),
                (TERROR, "outline"),
                (MORAL, "outline"),
            ],
        )
        .edge("generate_questions", "research")
        .edge("research", "outline")
        .edge("outline", "draft")
        .edge("draft", "critique")
        .conditional_edges(
            "critique",
            governor,
            &[
                (RevisionGovernor::FORWARD, "approval_gate"),
                (RevisionGovernor::RETRY, "draft"),
            ],
        )
        .edge("approval_gate", "style")
        .edge("style", END)
        .entry("intake")
        .build()
}

fn genre_label(state: &StoryState) -> &str {
    match state.get_str(GENRE) {
        "" => MORAL,
        g => g,
    }
}

fn research_text(state: &StoryState) -> String {
    let results: Vec<ResearchResult> = read_list(state, RESEARCH_RESULTS);
    results
        .iter()
        .map(|r| format!("RESEARCH ON {}:\n{}", r.question.to_uppercase(), r.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Checks the request before any model is called.
struct Intake;

impl Node for Intake {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        let outcome = if state.get_str(PROMPT).trim().is_empty() {
            Err(StoryforgeError::node("intake", "story prompt is empty"))
        } else {
            info!(genre = %genre_label(state), length = %state.get_str(LENGTH), "Story request accepted");
            Ok(NodeOutcome::unchanged())
        };
        Box::pin(async move { outcome })
    }

    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        Some(&[])
    }
}

struct QuestionGenerator {
    model: Arc<dyn ModelService>,
    limit: usize,
}

impl Node for QuestionGenerator {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let prompt = state.get_str(PROMPT);
            let user = format!(
                "Generate at most {} research questions for a historical story.\n\nSTORY PROMPT: {}",
                self.limit, prompt
            );
            let mut questions = match ctx.invoke(self.model.as_ref(), prompts::QUESTIONS_SYSTEM, &user).await {
                Ok(text) => parse_lines(&text, self.limit),
                Err(e) => {
                    warn!(error = %e, "Question generation failed, researching the prompt itself");
                    Vec::new()
                }
            };
            if questions.is_empty() {
                questions.push(prompt.to_string());
            }
            info!(count = questions.len(), "Research questions ready");
            Ok(NodeOutcome::Continue(
                StoryState::new().with(RESEARCH_QUESTIONS, questions),
            ))
        })
    }

    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        Some(&[RESEARCH_QUESTIONS])
    }
}

struct Researcher {
    research: Option<Arc<dyn ResearchService>>,
}

impl Node for Researcher {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let mut results = Vec::new();
            for question in state.get_string_list(RESEARCH_QUESTIONS) {
                let outcome = match &self.research {
                    Some(service) => service.search(&question).await,
                    None => Err(StoryforgeError::Research(
                        "no research service configured".to_string(),
                    )),
                };
                let result = match outcome {
                    Ok(answer) => ResearchResult {
                        question,
                        answer: answer.answer,
                        citations: answer.citations,
                    },
                    Err(e) => {
                        warn!(question = %question, error = %e, "Research failed, recording error as answer");
                        ResearchResult {
                            question,
                            answer: format!("Research failed: {}", e),
                            citations: Vec::new(),
                        }
                    }
                };
                results.push(result);
            }
            info!(count = results.len(), "Research complete");
            Ok(NodeOutcome::Continue(
                StoryState::new().with(RESEARCH_RESULTS, to_value(&results)),
            ))
        })
    }

    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        Some(&[RESEARCH_RESULTS])
    }
}

struct Outliner {
    model: Arc<dyn ModelService>,
}

impl Node for Outliner {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let length = state.get_str(LENGTH);
            let count = chapter_count(length);
            let user = format!(
                "Create a chapter outline.\n\nUSER REQUEST: {}\nGENRE: {}\nSTORY LENGTH: {} (about {} chapters)\n\nRESEARCH:\n{}",
                state.get_str(PROMPT),
                genre_label(state),
                length,
                count,
                research_text(state)
            );

            let parsed = match ctx.invoke(self.model.as_ref(), prompts::OUTLINE_SYSTEM, &user).await {
                Ok(text) => parse_json::<Vec<Chapter>>(&text, "chapter outline"),
                Err(e) => {
                    warn!(error = %e, "Outline request failed, using placeholder outline");
                    None
                }
            };
            let chapters = match parsed {
                Some(mut chapters) if !chapters.is_empty() => {
                    assign_times(&mut chapters, length);
                    chapters
                }
                _ => fallback_outline(length),
            };
            info!(chapters = chapters.len(), "Outline ready");
            Ok(NodeOutcome::Continue(
                StoryState::new().with(CHAPTERS, to_value(&chapters)),
            ))
        })
    }

    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        Some(&[CHAPTERS])
    }
}

/// Writes the first draft, then one revision per critique loop. The
/// revision counter stays 0 for the first draft and counts revisions after.
/// Only this node writes the counter, so its presence marks a revision even
/// when the previous draft came back empty.
struct Drafter {
    model: Arc<dyn ModelService>,
}

impl Node for Drafter {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let is_revision = state.contains(REVISION_COUNT);
            let revision = if is_revision {
                state.get_u64(REVISION_COUNT) + 1
            } else {
                0
            };

            let chapters: Vec<Chapter> = read_list(state, CHAPTERS);
            let outline = chapters
                .iter()
                .enumerate()
                .map(|(i, c)| format!("Chapter {}: {} - {}", i + 1, c.title, c.description))
                .collect::<Vec<_>>()
                .join("\n");

            let mut user = format!(
                "Write a complete {} story.\n\nUSER REQUEST: {}\nSTYLE: {}\nTARGET WORD COUNT: {} words\n\nSTORY OUTLINE:\n{}",
                genre_label(state).to_lowercase(),
                state.get_str(PROMPT),
                state.get_str(STYLE),
                word_target(state.get_str(LENGTH)),
                outline
            );
            let research = research_text(state);
            if !research.is_empty() {
                user.push_str(&format!("\n\nRESEARCH:\n{}", research));
            }
            if is_revision {
                user.push_str(&format!(
                    "\n\nPREVIOUS DRAFT:\n{}\n\nFEEDBACK TO ADDRESS: {}",
                    state.get_str(STORY),
                    state.get_str(FEEDBACK)
                ));
            }

            let text = ctx
                .invoke(self.model.as_ref(), prompts::DRAFT_SYSTEM, &user)
                .await?;
            let (title, story) = split_title(&text, "Untitled");
            info!(revision, title = %title, "Draft written");

            Ok(NodeOutcome::Continue(
                StoryState::new()
                    .with(TITLE, title)
                    .with(STORY, story)
                    .with(REVISION_COUNT, revision),
            ))
        })
    }

    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        Some(&[TITLE, STORY, REVISION_COUNT])
    }
}

struct Critic {
    model: Arc<dyn ModelService>,
}

impl Node for Critic {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let user = format!(
                "Evaluate this draft.\n\nTITLE: {}\nREVISION: {}\nUSER REQUEST: {}\nSTYLE REQUESTED: {}\n\nSTORY DRAFT:\n{}\n\nRESEARCH USED:\n{}",
                state.get_str(TITLE),
                state.get_u64(REVISION_COUNT),
                state.get_str(PROMPT),
                state.get_str(STYLE),
                state.get_str(STORY),
                research_text(state)
            );

            let evaluation = match ctx.invoke(self.model.as_ref(), prompts::CRITIC_SYSTEM, &user).await {
                Ok(text) => parse_json::<Evaluation>(&text, "critic evaluation"),
                Err(e) => {
                    warn!(error = %e, "Critic unavailable, treating draft as not approved");
                    None
                }
            }
            .unwrap_or_else(Evaluation::fallback);

            info!(
                approved = evaluation.approved,
                revision = state.get_u64(REVISION_COUNT),
                "Draft evaluated"
            );
            Ok(NodeOutcome::Continue(
                StoryState::new()
                    .with(CRITIC_APPROVED, evaluation.approved)
                    .with(FEEDBACK, evaluation.feedback.clone())
                    .with(EVALUATION, to_value(&evaluation)),
            ))
        })
    }

    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        Some(&[CRITIC_APPROVED, FEEDBACK, EVALUATION])
    }
}

struct StyleAdapter {
    model: Arc<dyn ModelService>,
}

impl Node for StyleAdapter {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let style = state.get_str(STYLE);
            let title = state.get_str(TITLE);
            let story = state.get_str(STORY);
            let system = format!(
                "{}\n\nSTYLE GUIDANCE:\n{}",
                prompts::STYLE_SYSTEM,
                prompts::style_guidance(style)
            );
            let user = format!(
                "Adapt this story to the \"{}\" style. Return the complete styled story.\n\nTITLE: {}\n\nSTORY:\n{}",
                style, title, story
            );

            let (final_title, final_story) = match ctx.invoke(self.model.as_ref(), &system, &user).await {
                Ok(text) => split_styled(&text, title),
                Err(e) => {
                    warn!(error = %e, "Style pass failed, keeping the approved draft");
                    (title.to_string(), story.to_string())
                }
            };
            info!(title = %final_title, "Story styled");

            Ok(NodeOutcome::Continue(
                StoryState::new()
                    .with(FINAL_TITLE, final_title)
                    .with(FINAL_STORY, final_story),
            ))
        })
    }

    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        Some(&[FINAL_TITLE, FINAL_STORY])
    }
}
