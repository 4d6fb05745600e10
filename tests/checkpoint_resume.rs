use std::sync::Arc;

use storyforge_core::config::WorkflowConfig;
use storyforge_core::traits::ModelService;
use storyforge_engine::{
    CheckpointStatus, CheckpointStore, JsonlMetricsSink, RunController, SqliteCheckpointStore,
};
use storyforge_test_utils::{temp_dir, MockModel, RecordingMetrics};
use storyforge_workflows::keys::{FINAL_STORY, REVISION_COUNT};
use storyforge_workflows::{build_fable_workflow, FableRequest, ReviewDecision};

fn fable_model() -> Arc<dyn ModelService> {
    Arc::new(MockModel::routed(
        vec![
            ("fable analyst", r#"{"moral": "Look before you leap"}"#),
            ("brainstorming partner", r#"{"takeaway_phrase": "Read the fine print"}"#),
            ("micro-fable writer", "A goat signed a contract without reading it."),
            ("fable editor", "A goat signed, then read, then regretted."),
            ("formatter", "A goat signed, then read, then regretted.\n\nRead the fine print."),
            ("prompt engineer", "SCENE 1: Contract\nA goat with a pen."),
        ],
        "unexpected",
    ))
}

fn controller(store: Arc<dyn CheckpointStore>) -> RunController {
    let graph = build_fable_workflow(fable_model(), &WorkflowConfig::default()).unwrap();
    RunController::new(Arc::new(graph), store, Arc::new(RecordingMetrics::new()))
}

fn request() -> FableRequest {
    FableRequest {
        fable: "The fox and the goat in the well.".into(),
        user_message: "Set it in an office".into(),
    }
}

#[tokio::test]
async fn suspended_run_survives_reopening_the_database() {
    let (_guard, dir) = temp_dir();
    let db = dir.join("checkpoints.db");

    let run_id = {
        let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open(&db).unwrap());
        let result = controller(store).start_run(request().into_state()).await.unwrap();
        assert!(!result.is_completed());
        result.run_id().clone()
    };

    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open(&db).unwrap());
    let checkpoint = store.load(&run_id).unwrap().expect("checkpoint persisted");
    assert_eq!(checkpoint.status, CheckpointStatus::Suspended);
    assert_eq!(checkpoint.workflow, "fable");
    assert_eq!(checkpoint.pending_node, "human_review");

    let run = controller(store.clone());
    let again = run
        .resume_run(
            &run_id,
            ReviewDecision::Reject {
                notes: "Show the regret".into(),
            }
            .into_state(),
        )
        .await
        .unwrap()
        .into_suspended()
        .unwrap();
    assert_eq!(again.state.get_u64(REVISION_COUNT), 1);

    let done = run
        .resume_run(&run_id, ReviewDecision::Approve.into_state())
        .await
        .unwrap()
        .into_completed()
        .unwrap();
    assert!(done.state.get_str(FINAL_STORY).contains("fine print"));
    assert!(store.load(&run_id).unwrap().is_none());
}

#[tokio::test]
async fn invalid_review_action_keeps_checkpoint() {
    let (_guard, dir) = temp_dir();
    let store: Arc<dyn CheckpointStore> =
        Arc::new(SqliteCheckpointStore::open(&dir.join("cp.db")).unwrap());
    let run = controller(store.clone());

    let run_id = run
        .start_run(request().into_state())
        .await
        .unwrap()
        .run_id()
        .clone();
    let before = store.load(&run_id).unwrap().unwrap();

    let bad = storyforge_engine::StoryState::new().with("action", "shrug");
    assert!(run.resume_run(&run_id, bad).await.is_err());

    let after = store.load(&run_id).unwrap().unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn metrics_log_written_per_run() {
    let (_guard, dir) = temp_dir();
    let sink = Arc::new(JsonlMetricsSink::new(dir.clone()));
    let graph = build_fable_workflow(fable_model(), &WorkflowConfig::default()).unwrap();
    let run = RunController::new(
        Arc::new(graph),
        Arc::new(storyforge_engine::MemoryCheckpointStore::new()),
        sink.clone(),
    );

    let result = run.start_run(request().into_state()).await.unwrap();
    let log = std::fs::read_to_string(sink.log_path(result.run_id())).unwrap();
    let events: Vec<serde_json::Value> = log
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(events.first().unwrap()["event"], "run_started");
    assert_eq!(events.last().unwrap()["event"], "run_ended");
    assert!(events
        .iter()
        .any(|e| e["event"] == "node_executed" && e["node"] == "analyze_fable"));
}
