//! 旅程模拟端到端：用 ScriptedModelClient 驱动完整的三阶段运行

use pathfinder::config::AppConfig;
use pathfinder::llm::{ScriptedModelClient, ToolCallRequest, ToolChoice};
use pathfinder::memory::JourneyPhase;
use pathfinder::pipelines::simulate::{RECORD_PHASE_COMPLETION, SEND_QUERY};
use pathfinder::pipelines::{run_simulation, PipelineContext, RunStatus, SimulationRequest};
use pathfinder::steps::{FinishReason, StepEvent};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn send_query(id: &str, query: &str, phase: &str) -> Vec<ToolCallRequest> {
    vec![ToolCallRequest::new(id, SEND_QUERY, json!({"query": query, "phase": phase}))]
}

fn record(id: &str, phase: &str) -> Vec<ToolCallRequest> {
    vec![ToolCallRequest::new(
        id,
        RECORD_PHASE_COMPLETION,
        json!({"phase": phase, "insightsGathered": [format!("{phase} insight")]}),
    )]
}

fn full_journey(prefix: &str) -> ScriptedModelClient {
    ScriptedModelClient::new()
        .with_step(send_query("1", &format!("{prefix} basics"), "discovery"))
        .with_step(record("2", "discovery"))
        .with_step(send_query("3", &format!("{prefix} compared"), "consideration"))
        .with_step(record("4", "consideration"))
        .with_step(send_query("5", &format!("buy {prefix}"), "activation"))
        .with_step(record("6", "activation"))
        .with_final_text("should never be requested")
}

fn request(persona: &str, query: &str) -> SimulationRequest {
    SimulationRequest {
        persona: persona.into(),
        initial_query: query.into(),
        ..SimulationRequest::default()
    }
}

#[tokio::test]
async fn test_full_journey_stops_on_activation() {
    let model = full_journey("chef knives");
    let config = AppConfig::default();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let ctx = PipelineContext::new(&model, &config, CancellationToken::new()).with_event_tx(&tx);

    let report = run_simulation(&ctx, request("Home cook upgrading their kitchen", "best chef knife"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(
        report.finish,
        FinishReason::StopCondition {
            condition: "activation_recorded".into()
        }
    );
    assert_eq!(report.steps.len(), 6);

    let result = report.result.unwrap();
    assert!(result.all_phases_complete);
    assert_eq!(
        result.phases_completed,
        vec![JourneyPhase::Discovery, JourneyPhase::Consideration, JourneyPhase::Activation]
    );
    assert_eq!(result.journey.previous_queries.len(), 3);

    let choices = model.recorded_choices();
    assert_eq!(choices.len(), 6);
    assert!(choices.iter().all(|c| *c == ToolChoice::Required));

    drop(ctx);
    drop(tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(StepEvent::RunStarted { max_steps: 15, .. })));
    assert!(matches!(events.last(), Some(StepEvent::Finished { .. })));
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_state() {
    let first = full_journey("knives");
    let second = full_journey("running shoes");
    let config = AppConfig::default();
    let ctx_a = PipelineContext::new(&first, &config, CancellationToken::new());
    let ctx_b = PipelineContext::new(&second, &config, CancellationToken::new());

    let (a, b) = tokio::join!(
        run_simulation(&ctx_a, request("Home cook", "chef knife")),
        run_simulation(&ctx_b, request("Marathon runner", "trail shoes")),
    );
    let a = a.unwrap().result.unwrap();
    let b = b.unwrap().result.unwrap();

    assert_eq!(a.journey.previous_queries[0], "knives basics");
    assert_eq!(b.journey.previous_queries[0], "running shoes basics");
    assert!(a.journey.previous_queries.iter().all(|q| !q.contains("shoes")));
}

#[tokio::test]
async fn test_skipping_a_phase_does_not_complete_the_run() {
    let model = ScriptedModelClient::new()
        .with_step(send_query("1", "knives", "discovery"))
        .with_step(record("2", "activation"))
        .with_final_text("giving up");
    let mut config = AppConfig::default();
    config.simulation.max_steps = 3;
    let ctx = PipelineContext::new(&model, &config, CancellationToken::new());

    let report = run_simulation(&ctx, request("Home cook", "chef knife")).await.unwrap();

    assert_eq!(report.status, RunStatus::Incomplete);
    assert!(report.result.is_none());
    assert_eq!(report.finish, FinishReason::StepLimit { max_steps: 3 });
    let rejected = &report.steps[1].invocations[0].output;
    assert_eq!(rejected["completed"], false);
    assert_eq!(rejected["nextPhase"], "discovery");
    assert_eq!(report.accumulated["phasesCompleted"], json!([]));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let model = full_journey("knives");
    let config = AppConfig::default();
    let token = CancellationToken::new();
    token.cancel();
    let ctx = PipelineContext::new(&model, &config, token);

    let report = run_simulation(&ctx, request("Home cook", "chef knife")).await.unwrap();

    assert_eq!(report.finish, FinishReason::Cancelled);
    assert_eq!(report.status, RunStatus::Incomplete);
    assert!(report.steps.is_empty());
    assert!(model.recorded_choices().is_empty());
}
