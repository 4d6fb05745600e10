//! State record field names shared by both workflows.

// Caller input.
pub const PROMPT: &str = "prompt";
pub const GENRE: &str = "genre";
pub const LENGTH: &str = "length";
pub const STYLE: &str = "style";
pub const FABLE: &str = "fable";
pub const USER_MESSAGE: &str = "user_message";

// Accumulated along the way.
pub const RESEARCH_QUESTIONS: &str = "research_questions";
pub const RESEARCH_RESULTS: &str = "research_results";
pub const CHAPTERS: &str = "chapters";
pub const REVISION_COUNT: &str = "revision_count";
pub const CRITIC_APPROVED: &str = "critic_approved";
pub const HUMAN_APPROVED: &str = "human_approved";
pub const FEEDBACK: &str = "feedback";
pub const EVALUATION: &str = "evaluation";
pub const TOOL_TO_CALL: &str = "tool_to_call";
pub const PROCESSING_REQUEST: &str = "processing_request";
pub const ANALYSIS: &str = "analysis";
pub const BRAINSTORM: &str = "brainstorm";

// Output.
pub const TITLE: &str = "title";
pub const STORY: &str = "story";
pub const FINAL_TITLE: &str = "final_title";
pub const FINAL_STORY: &str = "final_story";
pub const IMAGE_PROMPTS: &str = "image_prompts";
