//! End-to-end tests of the per-task state machine.


use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use flowlite_worker::context::{ExecutionStatus, Property};
use flowlite_worker::plugin::TaskAlertInfo;
use flowlite_worker::reporter::MessageKind;
use test_harness::{
    assert_eventually, test_context, FixtureBuilder, InMemoryStorage, ScriptedChannel, TaskScript,
};

#[tokio::test]
async fn test_dry_run_reports_result_only() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript::default()));
    let telemetry = channel.telemetry.clone();
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let mut ctx = test_context(42);
    ctx.dry_run = true;
    let runner = fixture.runner(ctx);

    runner.run().await;

    let kinds = fixture.sender.kinds();
    assert_eq!(kinds, vec![MessageKind::TaskExecuteResult]);

    let reported = fixture.sender.last_context().unwrap();
    assert_eq!(
        reported.current_execution_status,
        ExecutionStatus::Success
    );
    assert_eq!(reported.start_time, reported.end_time);
    assert!(reported.start_time.is_some());

    // no plugin was invoked and the context cache was evicted
    assert_eq!(telemetry.created.load(Ordering::SeqCst), 0);
    assert!(fixture.cache.get(42).is_none());
}

#[tokio::test]
async fn test_successful_run_reports_running_then_result() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript {
        process_id: 4242,
        app_ids: "application_1".to_string(),
        ..Default::default()
    }));
    let telemetry = channel.telemetry.clone();
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let runner = fixture.runner(test_context(1));
    runner.run().await;

    let kinds = fixture.sender.kinds();
    assert_eq!(
        kinds,
        vec![
            MessageKind::TaskExecuteRunning,
            MessageKind::TaskExecuteResult
        ]
    );
    assert_eq!(telemetry.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(telemetry.handle_calls.load(Ordering::SeqCst), 1);

    let result = fixture.sender.last_context().unwrap();
    assert_eq!(result.current_execution_status, ExecutionStatus::Success);
    assert_eq!(result.process_id, 4242);
    assert_eq!(result.app_ids, "application_1");
    assert_eq!(result.task_app_id, "100_1");
    assert!(!result.task_log_name.is_empty());
    assert!(result.end_time.unwrap() >= result.start_time.unwrap());
    assert!(fixture.cache.get(1).is_none());
}

#[tokio::test]
async fn test_running_is_reported_before_handle_runs() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript::default()));
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let runner = fixture.runner(test_context(2));
    runner.run().await;

    let running = fixture
        .sender
        .contexts_of(MessageKind::TaskExecuteRunning)
        .pop()
        .unwrap();
    assert_eq!(
        running.current_execution_status,
        ExecutionStatus::RunningExecution
    );
    // the RUNNING snapshot was taken before the plugin produced its outcome
    assert!(running.end_time.is_none());
}

#[tokio::test]
async fn test_unknown_plugin_fails_and_cleans_work_directory() {
    let fixture = FixtureBuilder::new().build();

    let work_dir = tempfile::tempdir().unwrap();
    let mut ctx = test_context(3);
    ctx.task_type = "DOES_NOT_EXIST".to_string();
    ctx.execute_path = work_dir.path().to_string_lossy().to_string();
    let runner = fixture.runner(ctx);

    runner.run().await;

    let kinds = fixture.sender.kinds();
    assert_eq!(
        kinds,
        vec![
            MessageKind::TaskExecuteRunning,
            MessageKind::TaskExecuteResult
        ]
    );
    let result = fixture.sender.last_context().unwrap();
    assert_eq!(result.current_execution_status, ExecutionStatus::Failure);
    assert!(result.end_time.is_some());
    assert!(!work_dir.path().exists());
    assert!(fixture.cache.get(3).is_none());
}

#[tokio::test]
async fn test_missing_resource_with_storage_disabled_fails_fast() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript::default()));
    let telemetry = channel.telemetry.clone();
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let mut ctx = test_context(4);
    ctx.resources
        .insert("a.sh".to_string(), "tenantA".to_string());
    let runner = fixture.runner(ctx);

    runner.run().await;

    let result = fixture.sender.last_context().unwrap();
    assert_eq!(result.current_execution_status, ExecutionStatus::Failure);
    // staging failed before any plugin was created
    assert_eq!(telemetry.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resources_are_staged_into_work_directory() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript::default()));
    let storage = Arc::new(InMemoryStorage::with_file("tenantA", "a.sh", "echo staged"));
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .storage(storage)
        .build();

    let work_dir = tempfile::tempdir().unwrap();
    let mut ctx = test_context(5);
    ctx.execute_path = work_dir.path().to_string_lossy().to_string();
    ctx.resources
        .insert("a.sh".to_string(), "tenantA".to_string());
    let staged_path = work_dir.path().join("a.sh");

    let runner = fixture.runner(ctx);
    runner.run().await;

    let result = fixture.sender.last_context().unwrap();
    assert_eq!(result.current_execution_status, ExecutionStatus::Success);
    // cleanup removed the whole work directory, staged file included
    assert!(!staged_path.exists());
    assert!(!work_dir.path().exists());
}

#[tokio::test]
async fn test_handle_failure_reports_failure_and_cancels_once() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript {
        fail_handle: true,
        ..Default::default()
    }));
    let telemetry = channel.telemetry.clone();
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let runner = fixture.runner(test_context(6));
    runner.run().await;

    let result = fixture.sender.last_context().unwrap();
    assert_eq!(result.current_execution_status, ExecutionStatus::Failure);
    assert!(result.end_time.is_some());
    assert_eq!(telemetry.cancel_calls.load(Ordering::SeqCst), 1);
    assert!(fixture.cache.get(6).is_none());
}

#[tokio::test]
async fn test_init_failure_still_reports_result() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript {
        fail_init: true,
        ..Default::default()
    }));
    let telemetry = channel.telemetry.clone();
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let runner = fixture.runner(test_context(7));
    runner.run().await;

    let result = fixture.sender.last_context().unwrap();
    assert_eq!(result.current_execution_status, ExecutionStatus::Failure);
    assert_eq!(telemetry.handle_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_external_kill_during_handle() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript {
        block_until_cancel: true,
        ..Default::default()
    }));
    let telemetry = channel.telemetry.clone();
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let runner = fixture.runner(test_context(8));
    let running = runner.clone();
    let join = tokio::spawn(async move { running.run().await });

    // wait until the task is inside handle, then kill from outside the slot
    let handle_started = telemetry.clone();
    assert_eventually(
        || {
            let telemetry = handle_started.clone();
            async move { telemetry.handle_calls.load(Ordering::SeqCst) == 1 }
        },
        Duration::from_secs(5),
        "task never reached handle",
    )
    .await;

    runner.kill().await;
    join.await.unwrap();

    assert_eq!(telemetry.cancel_calls.load(Ordering::SeqCst), 1);
    let result = fixture.sender.last_context().unwrap();
    assert_eq!(result.current_execution_status, ExecutionStatus::Failure);
}

#[tokio::test]
async fn test_kill_is_idempotent() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript {
        block_until_cancel: true,
        ..Default::default()
    }));
    let telemetry = channel.telemetry.clone();
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let runner = fixture.runner(test_context(9));
    let running = runner.clone();
    let join = tokio::spawn(async move { running.run().await });

    let handle_started = telemetry.clone();
    assert_eventually(
        || {
            let telemetry = handle_started.clone();
            async move { telemetry.handle_calls.load(Ordering::SeqCst) == 1 }
        },
        Duration::from_secs(5),
        "task never reached handle",
    )
    .await;

    runner.kill().await;
    runner.kill().await;
    join.await.unwrap();

    assert_eq!(telemetry.cancel_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_kill_before_run_reports_failure() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript::default()));
    let telemetry = channel.telemetry.clone();
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let runner = fixture.runner(test_context(14));

    // the kill lands while no task instance exists yet
    runner.kill().await;
    runner.run().await;

    let kinds = fixture.sender.kinds();
    assert_eq!(
        kinds,
        vec![
            MessageKind::TaskExecuteRunning,
            MessageKind::TaskExecuteResult
        ]
    );
    let result = fixture.sender.last_context().unwrap();
    assert_eq!(result.current_execution_status, ExecutionStatus::Failure);
    // the plugin was never created, let alone executed
    assert_eq!(telemetry.created.load(Ordering::SeqCst), 0);
    assert_eq!(telemetry.handle_calls.load(Ordering::SeqCst), 0);
    assert!(fixture.cache.get(14).is_none());
}

#[tokio::test]
async fn test_var_pool_round_trip() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript {
        push_var: Some(Property::new("produced", "by-task")),
        ..Default::default()
    }));
    let telemetry = channel.telemetry.clone();
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let mut ctx = test_context(10);
    ctx.var_pool = Some(
        serde_json::to_string(&vec![Property::new("inherited", "from-upstream")]).unwrap(),
    );
    let runner = fixture.runner(ctx);
    runner.run().await;

    // the inbound pool reached the plugin before handle
    let seeded = telemetry.seeded_vars.lock().unwrap().clone();
    assert_eq!(seeded.len(), 1);
    assert_eq!(seeded[0].prop, "inherited");
    assert_eq!(seeded[0].value, "from-upstream");

    // and the outbound pool was serialized back into the context
    let result = fixture.sender.last_context().unwrap();
    let pool: Vec<Property> = serde_json::from_str(result.var_pool.as_deref().unwrap()).unwrap();
    assert_eq!(pool.len(), 2);
    assert!(pool.iter().any(|p| p.prop == "inherited"));
    assert!(pool.iter().any(|p| p.prop == "produced"));
}

#[tokio::test]
async fn test_alert_is_forwarded_with_success_strategy() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript {
        need_alert: true,
        alert: Some(TaskAlertInfo {
            alert_group_id: 11,
            title: "done".to_string(),
            content: "all good".to_string(),
        }),
        ..Default::default()
    }));
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let runner = fixture.runner(test_context(11));
    runner.run().await;

    let alerts = fixture.alerts.alerts.lock().unwrap().clone();
    assert_eq!(alerts.len(), 1);
    let (group, title, _content, strategy) = &alerts[0];
    assert_eq!(*group, 11);
    assert_eq!(title, "done");
    assert_eq!(*strategy, 1);
}

#[tokio::test]
async fn test_develop_mode_keeps_work_directory() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript::default()));
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .develop_mode()
        .build();

    let work_dir = tempfile::tempdir().unwrap();
    let mut ctx = test_context(12);
    ctx.execute_path = work_dir.path().to_string_lossy().to_string();
    let runner = fixture.runner(ctx);

    runner.run().await;

    assert!(work_dir.path().exists());
}

#[tokio::test]
async fn test_defined_params_reach_the_result_context() {
    let channel = Arc::new(ScriptedChannel::new(TaskScript::default()));
    let fixture = FixtureBuilder::new()
        .channel("SCRIPTED", channel)
        .build();

    let mut ctx = test_context(13);
    ctx.global_params = Some(
        serde_json::to_string(&vec![Property::new("region", "eu-west-1")]).unwrap(),
    );
    let runner = fixture.runner(ctx);
    runner.run().await;

    let result = fixture.sender.last_context().unwrap();
    assert_eq!(
        result.defined_params.get("region").map(String::as_str),
        Some("eu-west-1")
    );
}
