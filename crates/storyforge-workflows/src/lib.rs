//! StoryForge workflows.
//!
//! Two graphs run on the engine: the genre-routed story pipeline with its
//! critic loop, and the fable pipeline with a human review loop.

pub mod fable;
pub mod keys;
pub mod prompts;
pub mod story;
pub mod text;
pub mod types;

use std::sync::Arc;

use storyforge_core::config::WorkflowConfig;
use storyforge_core::error::Result;
use storyforge_engine::WorkflowGraph;

pub use fable::{build_fable_workflow, ReviewDecision, FABLE_WORKFLOW};
pub use story::{build_story_workflow, StoryServices, STORY_WORKFLOW};
pub use types::{Chapter, Evaluation, FableRequest, ImagePrompt, ResearchResult, StoryRequest};

/// Both workflow graphs, built once and shared by every run.
#[derive(Clone)]
pub struct Workflows {
    pub story: Arc<WorkflowGraph>,
    pub fable: Arc<WorkflowGraph>,
}

impl Workflows {
    pub fn build(services: &StoryServices, config: &WorkflowConfig) -> Result<Self> {
        Ok(Self {
            story: Arc::new(build_story_workflow(services, config)?),
            fable: Arc::new(build_fable_workflow(services.model.clone(), config)?),
        })
    }

    /// Look up a graph by the workflow name stored in its checkpoints.
    pub fn by_name(&self, name: &str) -> Option<Arc<WorkflowGraph>> {
        match name {
            STORY_WORKFLOW => Some(self.story.clone()),
            FABLE_WORKFLOW => Some(self.fable.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyforge_test_utils::MockModel;

    #[test]
    fn test_by_name() {
        let model: Arc<dyn storyforge_core::traits::ModelService> =
            Arc::new(MockModel::constant("x"));
        let services = StoryServices {
            model: model.clone(),
            reasoning: model,
            research: None,
        };
        let workflows = Workflows::build(&services, &WorkflowConfig::default()).unwrap();
        assert_eq!(workflows.by_name("fable").unwrap().entry(), "main_agent");
        assert_eq!(workflows.by_name("story").unwrap().entry(), "intake");
        assert!(workflows.by_name("poem").is_none());
    }
}
