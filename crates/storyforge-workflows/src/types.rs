use serde::{Deserialize, Serialize};
use serde_json::Value;

use storyforge_engine::StoryState;

use crate::keys;

/// One chapter of a story outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Start offset as `MM:00`.
    #[serde(default)]
    pub time: String,
}

/// One answered research question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// Structured critic output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default)]
    pub scores: Value,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub approved: bool,
}

impl Evaluation {
    /// Used when the critic's answer cannot be parsed. Never approves.
    pub fn fallback() -> Self {
        Self {
            scores: Value::Object(Default::default()),
            strengths: vec!["Good effort overall".to_string()],
            weaknesses: vec!["Needs some refinement".to_string()],
            feedback: "Revise for accuracy and narrative flow.".to_string(),
            approved: false,
        }
    }
}

/// Illustration prompt for one scene of a fable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePrompt {
    pub scene_number: u32,
    pub title: String,
    pub description: String,
    pub story_part: u8,
}

/// Caller input for the story workflow.
#[derive(Debug, Clone, Default)]
pub struct StoryRequest {
    pub prompt: String,
    pub genre: String,
    pub length: String,
    pub style: String,
}

impl StoryRequest {
    pub fn into_state(self) -> StoryState {
        StoryState::new()
            .with(keys::PROMPT, self.prompt)
            .with(keys::GENRE, self.genre)
            .with(keys::LENGTH, self.length)
            .with(keys::STYLE, self.style)
    }
}

/// Caller input for the fable workflow.
#[derive(Debug, Clone, Default)]
pub struct FableRequest {
    pub fable: String,
    pub user_message: String,
}

impl FableRequest {
    pub fn into_state(self) -> StoryState {
        StoryState::new()
            .with(keys::FABLE, self.fable)
            .with(keys::USER_MESSAGE, self.user_message)
    }
}

/// Decode a list field written by a workflow node, skipping malformed entries.
pub fn read_list<T: serde::de::DeserializeOwned>(state: &StoryState, key: &str) -> Vec<T> {
    state
        .get_list(key)
        .iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect()
}

/// Encode a list for storage in the state record.
pub fn to_value<T: Serialize>(items: &T) -> Value {
    serde_json::to_value(items).unwrap_or(Value::Null)
}
