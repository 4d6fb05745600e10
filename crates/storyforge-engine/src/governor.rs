//! Bounded revision loops.
//!
//! A [`RevisionGovernor`] sits on the edge after a quality gate (critic or
//! human review). It routes forward when the gate passed, back to the
//! revision node while revisions remain, and forward anyway once the
//! counter reaches the threshold.

use futures::future::BoxFuture;
use tracing::{debug, warn};

use storyforge_core::error::Result;

use crate::graph::{Node, NodeContext, NodeOutcome, Router, StoryState};

/// Key written by [`ApprovalMarker`].
pub const FORCED_APPROVAL_KEY: &str = "forced_approval";

/// What the governor decided for the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorDecision {
    Approved,
    Retry,
    /// Threshold reached without approval.
    ForcedApproval,
}

#[derive(Debug, Clone)]
pub struct RevisionGovernor {
    gate_field: String,
    counter_field: String,
    max_revisions: u64,
}

impl RevisionGovernor {
    /// Branch key for moving on past the gate.
    pub const FORWARD: &'static str = "forward";
    /// Branch key for another revision pass.
    pub const RETRY: &'static str = "retry";

    pub fn new(
        gate_field: impl Into<String>,
        counter_field: impl Into<String>,
        max_revisions: u64,
    ) -> Self {
        Self {
            gate_field: gate_field.into(),
            counter_field: counter_field.into(),
            max_revisions,
        }
    }

    pub fn max_revisions(&self) -> u64 {
        self.max_revisions
    }

    pub fn decide(&self, state: &StoryState) -> GovernorDecision {
        if state.get_bool(&self.gate_field) {
            GovernorDecision::Approved
        } else if state.get_u64(&self.counter_field) < self.max_revisions {
            GovernorDecision::Retry
        } else {
            GovernorDecision::ForcedApproval
        }
    }

    /// Node for the forward branch that records whether approval was forced.
    pub fn marker(&self) -> ApprovalMarker {
        ApprovalMarker {
            governor: self.clone(),
        }
    }
}

impl Router for RevisionGovernor {
    fn route(&self, state: &StoryState) -> String {
        let decision = self.decide(state);
        let count = state.get_u64(&self.counter_field);
        match decision {
            GovernorDecision::Approved => {
                debug!(gate = %self.gate_field, count, "Gate passed");
                Self::FORWARD.to_string()
            }
            GovernorDecision::Retry => {
                debug!(gate = %self.gate_field, count, max = self.max_revisions, "Revision requested");
                Self::RETRY.to_string()
            }
            GovernorDecision::ForcedApproval => {
                warn!(
                    gate = %self.gate_field,
                    count,
                    max = self.max_revisions,
                    "Revision limit reached, forcing approval"
                );
                Self::FORWARD.to_string()
            }
        }
    }

    fn outcomes(&self) -> Option<Vec<String>> {
        Some(vec![Self::FORWARD.to_string(), Self::RETRY.to_string()])
    }
}

/// Writes `forced_approval` for the governor it was created from.
pub struct ApprovalMarker {
    governor: RevisionGovernor,
}

impl Node for ApprovalMarker {
    fn execute<'a>(
        &'a self,
        state: &'a StoryState,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        let forced = self.governor.decide(state) == GovernorDecision::ForcedApproval;
        Box::pin(async move {
            Ok(NodeOutcome::Continue(
                StoryState::new().with(FORCED_APPROVAL_KEY, forced),
            ))
        })
    }

    fn owned_keys(&self) -> Option<&'static [&'static str]> {
        Some(&[FORCED_APPROVAL_KEY])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> RevisionGovernor {
        RevisionGovernor::new("critic_approved", "revision_count", 3)
    }

    fn state(approved: bool, count: u64) -> StoryState {
        StoryState::new()
            .with("critic_approved", approved)
            .with("revision_count", count)
    }

    #[test]
    fn test_approved_goes_forward() {
        assert_eq!(governor().route(&state(true, 0)), RevisionGovernor::FORWARD);
        assert_eq!(governor().decide(&state(true, 3)), GovernorDecision::Approved);
    }

    #[test]
    fn test_rejected_retries_below_threshold() {
        for count in 0..3 {
            assert_eq!(governor().route(&state(false, count)), RevisionGovernor::RETRY);
        }
    }

    #[test]
    fn test_threshold_forces_forward() {
        assert_eq!(governor().route(&state(false, 3)), RevisionGovernor::FORWARD);
        assert_eq!(
            governor().decide(&state(false, 7)),
            GovernorDecision::ForcedApproval
        );
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        assert_eq!(governor().decide(&StoryState::new()), GovernorDecision::Retry);
        let never = RevisionGovernor::new("ok", "n", 0);
        assert_eq!(never.decide(&StoryState::new()), GovernorDecision::ForcedApproval);
    }

    #[tokio::test]
    async fn marker_records_forced_approval() {
        let marker = governor().marker();
        let ctx = NodeContext::new(storyforge_core::types::RunId::new(), "mark");

        for (s, expected) in [(state(false, 3), true), (state(true, 1), false)] {
            match marker.execute(&s, &ctx).await.unwrap() {
                NodeOutcome::Continue(partial) => {
                    assert_eq!(partial.get_bool(FORCED_APPROVAL_KEY), expected)
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
    }
}
