use std::sync::Arc;

use serde_json::json;
use shipyard_types::error::{RepositoryError, ScopeError};
use shipyard_types::event::{EventKind, KeptnEvent, ResultType, StatusType};
use shipyard_types::sequence::{LatestEvent, SequenceState, TaskEvent, TaskOutcome};

use super::*;
use crate::dispatch::leadership::AlwaysLeader;
use crate::dispatch::sequence_dispatcher::QueueSequenceDispatcher;
use crate::repository::sequence_execution::SequenceExecutionFilter;
use crate::test_support::*;

type TestController = ShipyardController<
    InMemoryEventRepository,
    InMemorySequenceExecutionRepository,
    StaticShipyardRetriever,
    RecordingEventDispatcher,
    QueueSequenceDispatcher<InMemorySequenceExecutionRepository, InMemorySequenceQueue>,
>;

struct Harness {
    controller: TestController,
    events: Arc<InMemoryEventRepository>,
    executions: Arc<InMemorySequenceExecutionRepository>,
    queue: Arc<InMemorySequenceQueue>,
    dispatcher: Arc<RecordingEventDispatcher>,
    hook: Arc<RecordingHook>,
}

fn harness_with(yaml: &str) -> Harness {
    let events = Arc::new(InMemoryEventRepository::default());
    let executions = Arc::new(InMemorySequenceExecutionRepository::default());
    let queue = Arc::new(InMemorySequenceQueue::default());
    let dispatcher = Arc::new(RecordingEventDispatcher::default());
    let hook = Arc::new(RecordingHook::default());
    let sequences = Arc::new(QueueSequenceDispatcher::new(
        executions.clone(),
        queue.clone(),
        Arc::new(AlwaysLeader),
    ));

    let controller = ShipyardController::new(
        events.clone(),
        executions.clone(),
        Arc::new(StaticShipyardRetriever::new().with_yaml("sockshop", yaml)),
        dispatcher.clone(),
        sequences,
        SequenceHooks::new().observe(hook.clone()),
    );

    Harness {
        controller,
        events,
        executions,
        queue,
        dispatcher,
        hook,
    }
}

fn harness() -> Harness {
    harness_with(SHIPYARD)
}

fn finished_report(source: &str, result: ResultType) -> TaskEvent {
    TaskEvent::Finished {
        source: source.to_string(),
        outcome: TaskOutcome {
            result,
            status: StatusType::Succeeded,
            properties: json!({}),
        },
    }
}

impl Harness {
    fn triggered(&self, task: &str) -> KeptnEvent {
        self.dispatcher
            .last_of_type(&format!("sh.keptn.event.{task}.triggered"))
            .unwrap_or_else(|| panic!("{task}.triggered was not emitted"))
    }

    /// Start and finish the last triggered `task` from a single source.
    async fn complete(&self, task: &str, result: &str, status: &str) {
        let triggered = self.triggered(task);
        self.controller
            .handle_incoming_event(task_started(task, &triggered, "executor"))
            .await
            .unwrap();
        self.controller
            .handle_incoming_event(task_finished(task, &triggered, "executor", result, status, json!({})))
            .await
            .unwrap();
    }

    fn execution_for(&self, keptn_context: &str, stage: &str) -> shipyard_types::sequence::SequenceExecution {
        self.executions
            .all()
            .into_iter()
            .find(|e| e.scope.keptn_context == keptn_context && e.scope.stage == stage)
            .unwrap()
    }
}

// ---------------------------------------------------------------------------
// Opening sequences
// ---------------------------------------------------------------------------

#[tokio::test]
async fn triggered_sequence_starts_first_task() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();

    assert_eq!(h.dispatcher.event_types(), vec!["sh.keptn.event.deployment.triggered"]);
    assert!(!h.dispatcher.skipped_queue(0));

    let triggered = h.triggered("deployment");
    assert_eq!(triggered.shkeptncontext, "ctx-1");
    assert_eq!(triggered.gitcommitid, "c1");
    assert_eq!(triggered.source, shipyard_types::event::CONTROLLER_SOURCE);
    assert_eq!(triggered.data["service"], "carts");
    assert_eq!(triggered.data["deployment"]["deploymentstrategy"], "direct");
    assert_eq!(triggered.data["configurationChange"]["values"]["image"], "carts:0.12.1");

    let execution = h.execution_for("ctx-1", "dev");
    assert_eq!(execution.state(), SequenceState::Started);
    assert_eq!(execution.current_triggered_id(), Some(triggered.id.as_str()));
    assert_eq!(h.queue.len(), 0);
    assert_eq!(h.events.count(EventKind::Triggered), 2);
}

#[tokio::test]
async fn task_properties_accumulate_into_next_task() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();

    let deployment = h.triggered("deployment");
    h.controller
        .handle_incoming_event(task_started("deployment", &deployment, "helm-service"))
        .await
        .unwrap();
    h.controller
        .handle_incoming_event(task_finished(
            "deployment",
            &deployment,
            "helm-service",
            "pass",
            "succeeded",
            json!({"deployment": {
                "deploymentURIsPublic": ["http://carts.a", "http://carts.b"],
                "deploymentURIsLocal": ["carts:80", "carts.dev:80"]
            }}),
        ))
        .await
        .unwrap();

    let test = h.triggered("test");
    assert_eq!(test.data["deployment"]["deploymentURIsPublic"].as_array().unwrap().len(), 3);
    assert_eq!(test.data["deployment"]["deploymentURIsLocal"].as_array().unwrap().len(), 2);
    assert_eq!(test.data["test"]["teststrategy"], "functional");
    assert!(test.data.get("result").is_none());
    assert!(test.data.get("status").is_none());

    let execution = h.execution_for("ctx-1", "dev");
    assert_eq!(execution.status.previous_tasks.len(), 1);
    assert_eq!(execution.current_triggered_id(), Some(test.id.as_str()));
    // Triggered and started entries of the resolved task are dropped.
    assert_eq!(h.events.count(EventKind::Started), 0);
}

#[tokio::test]
async fn invalid_shipyard_rejects_opening_without_queueing() {
    let h = harness_with("apiVersion: spec.keptn.sh/0.1.0\nkind: Shipyard\nmetadata:\n  name: x\nspec:\n  stages: []\n");
    let opening = sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1");
    h.controller.handle_incoming_event(opening.clone()).await.unwrap();

    assert_eq!(h.dispatcher.event_types(), vec!["sh.keptn.event.dev.artifact-delivery.finished"]);
    assert!(h.dispatcher.skipped_queue(0));
    let finished = h.dispatcher.events().remove(0);
    assert_eq!(finished.triggeredid, opening.id);
    assert_eq!(finished.data["status"], "errored");
    assert_eq!(finished.data["result"], "fail");
    assert!(h.executions.all().is_empty());
    assert_eq!(h.queue.len(), 0);
}

#[tokio::test]
async fn unknown_sequence_rejects_opening() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "canary", "carts", "ctx-1"))
        .await
        .unwrap();

    assert_eq!(h.dispatcher.event_types(), vec!["sh.keptn.event.dev.canary.finished"]);
    assert!(h.executions.all().is_empty());
}

#[tokio::test]
async fn empty_service_is_rejected() {
    let h = harness();
    let err = h
        .controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "", "ctx-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Validation(_)));
    assert!(h.dispatcher.events().is_empty());
}

#[tokio::test]
async fn missing_stage_is_invalid_scope() {
    let h = harness();
    let event = KeptnEvent::new(
        "sh.keptn.event.dev.artifact-delivery.triggered",
        json!({"project": "sockshop", "service": "carts"}),
    )
    .with_context("ctx-1");
    let err = h.controller.handle_incoming_event(event).await.unwrap_err();
    assert!(matches!(err, ControllerError::InvalidScope(ScopeError::Missing("stage"))));
}

#[tokio::test]
async fn malformed_event_type_is_rejected() {
    let h = harness();
    let event = KeptnEvent::new("com.example.something", json!({})).with_context("ctx-1");
    let err = h.controller.handle_incoming_event(event).await.unwrap_err();
    assert!(matches!(err, ControllerError::InvalidEventType(_)));
}

#[tokio::test]
async fn second_sequence_in_occupied_slot_collides() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();

    let err = h
        .controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::ScopeCollision { .. }));

    // Another service is a different slot.
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "orders", "ctx-3"))
        .await
        .unwrap();

    h.controller
        .cancel_sequence(SequenceCancellation {
            keptn_context: "ctx-1".to_string(),
            project: "sockshop".to_string(),
            stage: None,
        })
        .await
        .unwrap();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-2"))
        .await
        .unwrap();
    assert_eq!(h.execution_for("ctx-2", "dev").state(), SequenceState::Started);
}

#[tokio::test]
async fn failed_first_task_emit_withdraws_opening() {
    let h = harness();
    h.dispatcher.fail_sends(true);
    let err = h
        .controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Dispatch(_)));
    assert!(h.executions.all().is_empty());
    assert_eq!(h.queue.len(), 0);
    assert_eq!(h.events.count(EventKind::Triggered), 0);

    // The slot is free for the next opening.
    h.dispatcher.fail_sends(false);
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-2"))
        .await
        .unwrap();
    assert_eq!(h.execution_for("ctx-2", "dev").state(), SequenceState::Started);
    assert_eq!(h.dispatcher.event_types(), vec!["sh.keptn.event.deployment.triggered"]);
}

#[tokio::test]
async fn store_failure_on_start_withdraws_opening() {
    let h = harness();
    h.executions.fail_updates(true);
    let err = h
        .controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Store(RepositoryError::Connection)));
    assert!(h.executions.all().is_empty());
    assert_eq!(h.queue.len(), 0);
    assert!(h.dispatcher.events().is_empty());

    h.executions.fail_updates(false);
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-2"))
        .await
        .unwrap();
    assert_eq!(h.execution_for("ctx-2", "dev").state(), SequenceState::Started);
}

// ---------------------------------------------------------------------------
// Task correlation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_triggered_id_is_not_found() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();

    let stray = KeptnEvent::new(
        "sh.keptn.event.deployment.triggered",
        json!({"project": "sockshop", "stage": "dev", "service": "carts"}),
    )
    .with_context("ctx-1");
    let err = h
        .controller
        .handle_incoming_event(task_finished("deployment", &stray, "helm", "pass", "succeeded", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::SequenceNotFound));
}

#[tokio::test]
async fn empty_triggered_id_is_rejected() {
    let h = harness();
    let event = KeptnEvent::new(
        "sh.keptn.event.deployment.started",
        json!({"project": "sockshop", "stage": "dev", "service": "carts"}),
    )
    .with_context("ctx-1");
    let err = h.controller.handle_incoming_event(event).await.unwrap_err();
    assert!(matches!(err, ControllerError::Validation(_)));
}

#[tokio::test]
async fn task_waits_for_every_started_source() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();
    let deployment = h.triggered("deployment");

    for source in ["helm-service", "jmeter-service"] {
        h.controller
            .handle_incoming_event(task_started("deployment", &deployment, source))
            .await
            .unwrap();
    }
    h.controller
        .handle_incoming_event(task_finished(
            "deployment",
            &deployment,
            "helm-service",
            "pass",
            "succeeded",
            json!({"helm": {"release": "carts-1"}}),
        ))
        .await
        .unwrap();
    assert!(h.dispatcher.last_of_type("sh.keptn.event.test.triggered").is_none());

    h.controller
        .handle_incoming_event(task_finished(
            "deployment",
            &deployment,
            "jmeter-service",
            "warning",
            "succeeded",
            json!({"jmeter": {"runs": 3}}),
        ))
        .await
        .unwrap();

    let test = h.triggered("test");
    assert_eq!(test.data["helm"]["release"], "carts-1");
    assert_eq!(test.data["jmeter"]["runs"], 3);

    let execution = h.execution_for("ctx-1", "dev");
    let completed = &execution.status.previous_tasks[0];
    assert_eq!(completed.result, ResultType::Warning);
    assert_eq!(completed.status, StatusType::Succeeded);
}

#[tokio::test]
async fn duplicate_finished_from_same_source_is_ignored() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();
    let deployment = h.triggered("deployment");

    for source in ["helm-service", "jmeter-service"] {
        h.controller
            .handle_incoming_event(task_started("deployment", &deployment, source))
            .await
            .unwrap();
    }
    for _ in 0..2 {
        h.controller
            .handle_incoming_event(task_finished(
                "deployment",
                &deployment,
                "helm-service",
                "pass",
                "succeeded",
                json!({}),
            ))
            .await
            .unwrap();
    }
    assert!(h.dispatcher.last_of_type("sh.keptn.event.test.triggered").is_none());
}

#[tokio::test]
async fn finished_without_started_resolves_task() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();
    let deployment = h.triggered("deployment");

    h.controller
        .handle_incoming_event(task_finished("deployment", &deployment, "helm", "pass", "succeeded", json!({})))
        .await
        .unwrap();
    assert!(h.dispatcher.last_of_type("sh.keptn.event.test.triggered").is_some());
}

#[tokio::test]
async fn duplicate_started_during_resolution_still_progresses() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();
    let deployment = h.triggered("deployment");
    let started = task_started("deployment", &deployment, "helm");
    h.controller.handle_incoming_event(started.clone()).await.unwrap();

    // The finished report is recorded but not yet acted on.
    let finished = task_finished("deployment", &deployment, "helm", "pass", "succeeded", json!({}));
    let resolved = h
        .executions
        .append_task_event(&deployment.id, &finished_report("helm", ResultType::Pass), &LatestEvent::from(&finished))
        .await
        .unwrap()
        .unwrap();
    assert!(resolved.is_current_task_resolved());

    h.controller.handle_incoming_event(started).await.unwrap();
    h.controller.on_task_resolved(resolved).await.unwrap();

    let test = h.triggered("test");
    let execution = h.execution_for("ctx-1", "dev");
    assert_eq!(execution.status.previous_tasks.len(), 1);
    assert_eq!(execution.current_triggered_id(), Some(test.id.as_str()));
}

#[tokio::test]
async fn concurrent_report_during_resolution_is_retried() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();
    let deployment = h.triggered("deployment");

    let helm = task_finished("deployment", &deployment, "helm", "pass", "succeeded", json!({}));
    let resolved = h
        .executions
        .append_task_event(&deployment.id, &finished_report("helm", ResultType::Pass), &LatestEvent::from(&helm))
        .await
        .unwrap()
        .unwrap();
    let jmeter = task_finished("deployment", &deployment, "jmeter", "warning", "succeeded", json!({}));
    h.executions
        .append_task_event(
            &deployment.id,
            &finished_report("jmeter", ResultType::Warning),
            &LatestEvent::from(&jmeter),
        )
        .await
        .unwrap()
        .unwrap();

    h.controller.on_task_resolved(resolved).await.unwrap();

    let test = h.triggered("test");
    let execution = h.execution_for("ctx-1", "dev");
    assert_eq!(execution.current_triggered_id(), Some(test.id.as_str()));
    assert_eq!(execution.status.previous_tasks[0].result, ResultType::Warning);
}

#[tokio::test]
async fn resolution_already_progressed_is_not_repeated() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();
    let deployment = h.triggered("deployment");

    let finished = task_finished("deployment", &deployment, "helm", "pass", "succeeded", json!({}));
    let resolved = h
        .executions
        .append_task_event(&deployment.id, &finished_report("helm", ResultType::Pass), &LatestEvent::from(&finished))
        .await
        .unwrap()
        .unwrap();

    h.controller.on_task_resolved(resolved.clone()).await.unwrap();
    h.controller.on_task_resolved(resolved).await.unwrap();

    let triggered_tests = h
        .dispatcher
        .event_types()
        .into_iter()
        .filter(|t| t == "sh.keptn.event.test.triggered")
        .count();
    assert_eq!(triggered_tests, 1);
    assert_eq!(h.execution_for("ctx-1", "dev").status.previous_tasks.len(), 1);
}

#[tokio::test]
async fn failed_emit_during_progression_is_retried_on_redelivery() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();
    let deployment = h.triggered("deployment");
    let finished = task_finished("deployment", &deployment, "helm", "pass", "succeeded", json!({}));

    h.dispatcher.fail_sends(true);
    let err = h
        .controller
        .handle_incoming_event(finished.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Dispatch(_)));

    let execution = h.execution_for("ctx-1", "dev");
    assert_eq!(execution.current_triggered_id(), Some(deployment.id.as_str()));
    assert!(execution.is_current_task_resolved());
    assert!(execution.status.previous_tasks.is_empty());

    h.dispatcher.fail_sends(false);
    h.controller.handle_incoming_event(finished).await.unwrap();
    let test = h.triggered("test");
    assert_eq!(
        h.execution_for("ctx-1", "dev").current_triggered_id(),
        Some(test.id.as_str())
    );
}

// ---------------------------------------------------------------------------
// Progression and follow-up sequences
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_result_skips_remaining_tasks() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();

    h.complete("deployment", "pass", "succeeded").await;
    h.complete("test", "fail", "succeeded").await;

    let finished = h
        .dispatcher
        .last_of_type("sh.keptn.event.dev.artifact-delivery.finished")
        .unwrap();
    assert_eq!(finished.data["result"], "fail");
    assert_eq!(finished.data["status"], "succeeded");
    assert!(h.dispatcher.last_of_type("sh.keptn.event.evaluation.triggered").is_none());

    // A failed delivery opens rollback, not hardening.
    assert!(h.dispatcher.last_of_type("sh.keptn.event.rollback.triggered").is_some());
    assert!(
        h.dispatcher
            .last_of_type("sh.keptn.event.hardening.artifact-delivery.triggered")
            .is_none()
    );
    assert_eq!(h.hook.finished.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn errored_task_finishes_sequence_and_triggers_rollback() {
    let h = harness();
    let opening = sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1");
    h.controller.handle_incoming_event(opening.clone()).await.unwrap();

    h.complete("deployment", "fail", "errored").await;

    assert_eq!(
        h.dispatcher.event_types(),
        vec![
            "sh.keptn.event.deployment.triggered",
            "sh.keptn.event.dev.artifact-delivery.finished",
            "sh.keptn.event.dev.rollback.triggered",
            "sh.keptn.event.rollback.triggered",
        ]
    );

    let finished = h.dispatcher.events()[1].clone();
    assert_eq!(finished.triggeredid, opening.id);
    assert_eq!(finished.data["status"], "errored");
    assert_eq!(finished.data["result"], "fail");
    assert!(h.dispatcher.skipped_queue(1));
    assert!(h.dispatcher.skipped_queue(2));

    // Same stage keeps the commit id.
    let rollback = h.dispatcher.events()[2].clone();
    assert_eq!(rollback.gitcommitid, "c1");
    assert_eq!(rollback.shkeptncontext, "ctx-1");

    let executions = h.executions.all();
    assert_eq!(executions.len(), 2);
    assert_eq!(executions[0].state(), SequenceState::Finished);
    assert_eq!(executions[1].sequence.name, "rollback");
    assert_eq!(executions[1].state(), SequenceState::Started);
    // The follow-up is keyed by its announcement.
    assert_eq!(executions[1].scope.triggered_id, rollback.id);
    assert_eq!(h.queue.len(), 0);
}

#[tokio::test]
async fn successful_delivery_promotes_with_latest_commit() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();

    for task in ["deployment", "test", "evaluation", "release"] {
        h.complete(task, "pass", "succeeded").await;
    }
    let finished = h
        .dispatcher
        .last_of_type("sh.keptn.event.dev.artifact-delivery.finished")
        .unwrap();
    assert_eq!(finished.data["result"], "pass");
    assert_eq!(finished.gitcommitid, "c1");

    let promoted = h
        .dispatcher
        .last_of_type("sh.keptn.event.hardening.artifact-delivery.triggered")
        .unwrap();
    assert_eq!(promoted.gitcommitid, LATEST_COMMIT_ID);
    assert_eq!(promoted.data["stage"], "hardening");
    assert_eq!(promoted.data["configurationChange"]["values"]["image"], "carts:0.12.1");
    assert!(h.dispatcher.last_of_type("sh.keptn.event.dev.rollback.triggered").is_none());

    let hardening = h.execution_for("ctx-1", "hardening");
    assert_eq!(hardening.state(), SequenceState::Started);
    assert_eq!(hardening.scope.git_commit_id, LATEST_COMMIT_ID);
    assert_eq!(h.triggered("deployment").data["stage"], "hardening");
}

#[tokio::test]
async fn follow_up_into_busy_slot_is_skipped() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("hardening", "artifact-delivery", "carts", "ctx-0"))
        .await
        .unwrap();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();

    for task in ["deployment", "test", "evaluation", "release"] {
        h.complete(task, "pass", "succeeded").await;
    }

    assert_eq!(h.execution_for("ctx-1", "dev").state(), SequenceState::Finished);
    assert!(
        h.dispatcher
            .last_of_type("sh.keptn.event.hardening.artifact-delivery.triggered")
            .is_none()
    );
    assert!(
        h.executions
            .all()
            .iter()
            .all(|e| !(e.scope.keptn_context == "ctx-1" && e.scope.stage == "hardening"))
    );
}

#[tokio::test]
async fn sequence_without_tasks_finishes_immediately() {
    let yaml = r#"
apiVersion: spec.keptn.sh/0.2.3
kind: Shipyard
metadata:
  name: empty
spec:
  stages:
    - name: dev
      sequences:
        - name: noop
          tasks: []
"#;
    let h = harness_with(yaml);
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "noop", "carts", "ctx-1"))
        .await
        .unwrap();

    assert_eq!(h.dispatcher.event_types(), vec!["sh.keptn.event.dev.noop.finished"]);
    assert_eq!(h.execution_for("ctx-1", "dev").state(), SequenceState::Finished);
}

// ---------------------------------------------------------------------------
// Timeout and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_finishes_sequence_as_errored() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();
    let deployment = h.triggered("deployment");

    h.controller
        .timeout_sequence(SequenceTimeout {
            keptn_context: "ctx-1".to_string(),
            last_event: deployment.clone(),
        })
        .await
        .unwrap();

    let finished = h
        .dispatcher
        .last_of_type("sh.keptn.event.dev.artifact-delivery.finished")
        .unwrap();
    assert_eq!(finished.data["status"], "errored");
    assert_eq!(finished.data["result"], "fail");
    assert_eq!(h.execution_for("ctx-1", "dev").state(), SequenceState::TimedOut);
    assert_eq!(h.hook.timed_out.lock().unwrap()[0].id, deployment.id);
    assert!(h.hook.finished.lock().unwrap().is_empty());

    // A late finished event no longer matches anything.
    let err = h
        .controller
        .handle_incoming_event(task_finished("deployment", &deployment, "helm", "pass", "succeeded", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::SequenceNotFound));
}

#[tokio::test]
async fn timeout_hook_fires_when_send_fails() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();
    let deployment = h.triggered("deployment");

    h.dispatcher.fail_sends(true);
    let err = h
        .controller
        .timeout_sequence(SequenceTimeout {
            keptn_context: "ctx-1".to_string(),
            last_event: deployment,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Dispatch(_)));
    assert_eq!(h.hook.timed_out.lock().unwrap().len(), 1);
    assert_eq!(h.execution_for("ctx-1", "dev").state(), SequenceState::TimedOut);
}

#[tokio::test]
async fn timeout_for_stale_event_is_ignored() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();

    let stale = KeptnEvent::new("sh.keptn.event.deployment.triggered", json!({})).with_context("ctx-1");
    h.controller
        .timeout_sequence(SequenceTimeout {
            keptn_context: "ctx-1".to_string(),
            last_event: stale,
        })
        .await
        .unwrap();
    assert_eq!(h.execution_for("ctx-1", "dev").state(), SequenceState::Started);
    assert!(h.hook.timed_out.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancel_started_sequence_emits_aborted() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();

    h.controller
        .cancel_sequence(SequenceCancellation {
            keptn_context: "ctx-1".to_string(),
            project: "sockshop".to_string(),
            stage: Some("dev".to_string()),
        })
        .await
        .unwrap();

    let finished = h
        .dispatcher
        .last_of_type("sh.keptn.event.dev.artifact-delivery.finished")
        .unwrap();
    assert_eq!(finished.data["status"], "aborted");
    assert_eq!(h.execution_for("ctx-1", "dev").state(), SequenceState::Aborted);
    assert_eq!(h.hook.aborted.lock().unwrap().len(), 1);
    assert!(h.hook.finished.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancel_unknown_context_notifies_once() {
    let h = harness();
    h.controller
        .cancel_sequence(SequenceCancellation {
            keptn_context: "nope".to_string(),
            project: "sockshop".to_string(),
            stage: Some("dev".to_string()),
        })
        .await
        .unwrap();

    let aborted = h.hook.aborted.lock().unwrap();
    assert_eq!(aborted.len(), 1);
    assert_eq!(aborted[0].keptn_context, "nope");
    assert_eq!(aborted[0].stage, "dev");
    assert!(h.dispatcher.events().is_empty());
}

#[tokio::test]
async fn cancel_queued_sequence_survives_queue_failure() {
    let executions = Arc::new(InMemorySequenceExecutionRepository::default());
    let dispatcher = Arc::new(RecordingEventDispatcher::default());
    let sequences = Arc::new(FailingRemoveSequenceDispatcher::default());
    let hook = Arc::new(RecordingHook::default());
    let controller = ShipyardController::new(
        Arc::new(InMemoryEventRepository::default()),
        executions.clone(),
        Arc::new(StaticShipyardRetriever::new().with_yaml("sockshop", SHIPYARD)),
        dispatcher.clone(),
        sequences.clone(),
        SequenceHooks::new().observe(hook.clone()),
    );

    controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();
    assert_eq!(sequences.added.lock().unwrap().len(), 1);
    assert_eq!(executions.all()[0].state(), SequenceState::Queued);

    controller
        .cancel_sequence(SequenceCancellation {
            keptn_context: "ctx-1".to_string(),
            project: "sockshop".to_string(),
            stage: None,
        })
        .await
        .unwrap();

    assert_eq!(executions.all()[0].state(), SequenceState::Aborted);
    assert!(dispatcher.events().is_empty());
    assert_eq!(hook.aborted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn lost_update_race_skips_transition() {
    let h = harness();
    h.controller
        .handle_incoming_event(sequence_triggered("dev", "artifact-delivery", "carts", "ctx-1"))
        .await
        .unwrap();

    let filter = SequenceExecutionFilter {
        keptn_context: Some("ctx-1".to_string()),
        ..Default::default()
    };
    let mut stale = h.executions.get(&filter).await.unwrap().remove(0);
    stale.version -= 1;
    stale.finish(SequenceState::Aborted);
    assert!(!h.controller.save(&mut stale).await.unwrap());
    assert_eq!(h.execution_for("ctx-1", "dev").state(), SequenceState::Started);
}
