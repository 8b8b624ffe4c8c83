
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mpi_provisioner::error::ProvisionError;
use mpi_provisioner::controller::teardown_workload;
use mpi_provisioner::scheduler::{CascadePolicy, DeleteOptions, MemberPhase, MemberStatus};
use mpi_provisioner::Teardown;
use test_harness::{
    all_pending, all_running, failed, pending, running, test_controller, test_job, write_template,
    FakeScheduler, Poll,
};

fn is_peer_line(line: &str) -> bool {
    match line.split_once(" slots=") {
        Some((addr, slots)) => {
            !addr.is_empty()
                && !addr.contains(char::is_whitespace)
                && !slots.is_empty()
                && slots.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_nodes_ready_on_first_poll() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let scheduler = Arc::new(FakeScheduler::new());
    scheduler.script_label(
        "mpi-a",
        [Poll::Members(vec![
            running("mpi-a-0", "10.0.0.1"),
            running("mpi-a-1", "10.0.0.2"),
            running("mpi-a-2", "10.0.0.3"),
        ])],
    );
    let controller = test_controller(scheduler.clone(), &template, Duration::from_secs(30));
    let job = test_job("a", dir.path(), 3, 2);

    let provisioned = controller
        .provision(&job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provisioned.hostfile, dir.path().join("hostfile"));
    assert_eq!(provisioned.rounds, 1);
    let content = fs::read_to_string(&provisioned.hostfile).unwrap();
    assert_eq!(
        content,
        "10.0.0.1 slots=2\n10.0.0.2 slots=2\n10.0.0.3 slots=2\n"
    );
    assert_eq!(content.lines().count(), provisioned.members.len());
    assert!(content.lines().all(is_peer_line));

    let created = scheduler.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "mpi-a");
    assert_eq!(provisioned.workload_spec, dir.path().join("mpi-nodes.yaml"));
    let rendered = fs::read_to_string(&provisioned.workload_spec).unwrap();
    assert!(rendered.contains("name: mpi-a"));
    assert!(rendered.contains("replicas: 3"));
    assert_eq!(rendered, created[0].document);
    assert_eq!(scheduler.queried_labels(), vec!["mpi-a".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_provision_succeeds_after_two_rounds() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let scheduler = Arc::new(FakeScheduler::with_script([
        Poll::Members(all_pending(2)),
        Poll::Members(all_running(2)),
    ]));
    let controller = test_controller(scheduler.clone(), &template, Duration::from_secs(30));

    let provisioned = controller
        .provision(&test_job("b", dir.path(), 2, 1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provisioned.rounds, 2);
    assert_eq!(scheduler.polls(), 2);
    assert!(scheduler.queried_labels().iter().all(|l| l == "mpi-b"));
    assert_eq!(
        fs::read_to_string(dir.path().join("hostfile")).unwrap(),
        "10.0.0.1 slots=1\n10.0.0.2 slots=1\n"
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_member_aborts_provision_without_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let scheduler = Arc::new(FakeScheduler::with_script([
        Poll::Members(vec![pending("c-0"), pending("c-1")]),
        Poll::Members(vec![running("c-0", "10.0.0.1"), failed("c-1")]),
    ]));
    let controller = test_controller(scheduler.clone(), &template, Duration::from_secs(60));

    let err = controller
        .provision(&test_job("c", dir.path(), 2, 1), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::MemberFailed { ref member, .. } if member == "c-1"));
    assert!(!dir.path().join("hostfile").exists());
    // Rendered spec and workload stay behind for the caller to tear down.
    assert!(dir.path().join("mpi-nodes.yaml").exists());
    assert!(scheduler.exists("mpi-c"));
    assert!(scheduler.deleted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_aborts_provision_with_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let scheduler = Arc::new(FakeScheduler::steady(vec![
        running("d-0", "10.0.0.1"),
        pending("d-1"),
    ]));
    let controller = test_controller(scheduler.clone(), &template, Duration::from_secs(4));

    let err = controller
        .provision(&test_job("d", dir.path(), 2, 1), &CancellationToken::new())
        .await
        .unwrap_err();

    let snapshot = err.snapshot().expect("timeout carries a snapshot");
    assert!(matches!(err, ProvisionError::ReadinessTimeout { .. }));
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[1].phase, MemberPhase::Pending);
    assert!(!dir.path().join("hostfile").exists());
    assert!(!controller.is_in_flight("mpi-d"));
}

#[tokio::test(start_paused = true)]
async fn test_running_member_without_address_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let scheduler = Arc::new(FakeScheduler::steady(vec![
        running("e-0", "10.0.0.1"),
        MemberStatus::new("e-1", MemberPhase::Running, None),
    ]));
    let controller = test_controller(scheduler, &template, Duration::from_secs(30));

    let err = controller
        .provision(&test_job("e", dir.path(), 2, 1), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::MissingAddress { ref member, .. } if member == "e-1"));
    assert!(!dir.path().join("hostfile").exists());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_label_rejected_while_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let other_dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let scheduler = Arc::new(FakeScheduler::steady(all_pending(1)));
    let controller = Arc::new(test_controller(
        scheduler.clone(),
        &template,
        Duration::from_secs(600),
    ));
    let cancel = CancellationToken::new();

    let first = {
        let controller = controller.clone();
        let cancel = cancel.clone();
        let job = test_job("f", dir.path(), 1, 1);
        tokio::spawn(async move { controller.provision(&job, &cancel).await })
    };

    while !controller.is_in_flight("mpi-f") {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let duplicate = test_job("f2", other_dir.path(), 1, 1).with_label("mpi-f");
    let err = controller
        .provision(&duplicate, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Validation(ref msg) if msg.contains("mpi-f")));
    assert!(!other_dir.path().join("mpi-nodes.yaml").exists());

    cancel.cancel();
    let first = first.await.unwrap();
    assert!(matches!(first, Err(ProvisionError::Cancelled { .. })));
    assert!(!controller.is_in_flight("mpi-f"));
    assert_eq!(scheduler.created().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_labels_provision_concurrently() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let template = write_template(dir_a.path());
    let scheduler = Arc::new(FakeScheduler::new());
    scheduler.script_label("mpi-ga", [Poll::Members(vec![running("ga-0", "10.1.0.1")])]);
    scheduler.script_label(
        "mpi-gb",
        [
            Poll::Members(vec![pending("gb-0")]),
            Poll::Members(vec![running("gb-0", "10.2.0.1")]),
        ],
    );
    let controller = test_controller(scheduler.clone(), &template, Duration::from_secs(30));
    let cancel = CancellationToken::new();

    let job_a = test_job("ga", dir_a.path(), 1, 1);
    let job_b = test_job("gb", dir_b.path(), 1, 1);
    let (a, b) = tokio::join!(
        controller.provision(&job_a, &cancel),
        controller.provision(&job_b, &cancel)
    );

    assert_eq!(a.unwrap().rounds, 1);
    assert_eq!(b.unwrap().rounds, 2);
    assert_eq!(
        fs::read_to_string(dir_a.path().join("hostfile")).unwrap(),
        "10.1.0.1 slots=1\n"
    );
    assert_eq!(
        fs::read_to_string(dir_b.path().join("hostfile")).unwrap(),
        "10.2.0.1 slots=1\n"
    );
    assert_eq!(scheduler.created().len(), 2);

    let queried = scheduler.queried_labels();
    assert_eq!(queried.iter().filter(|l| *l == "mpi-ga").count(), 1);
    assert_eq!(queried.iter().filter(|l| *l == "mpi-gb").count(), 2);
    assert_eq!(queried.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let scheduler = Arc::new(FakeScheduler::steady(all_running(1)));
    let controller = test_controller(scheduler.clone(), &template, Duration::from_secs(30));

    controller
        .provision(&test_job("h", dir.path(), 1, 1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(controller.teardown("h", "mpi-h").await.unwrap(), Teardown::Deleted);
    assert_eq!(
        controller.teardown("h", "mpi-h").await.unwrap(),
        Teardown::AlreadyAbsent
    );

    let deleted = scheduler.deleted();
    assert_eq!(deleted.len(), 2);
    assert_eq!(deleted[0].0, "mpi-h");
    assert_eq!(deleted[0].1.grace_period, Duration::from_secs(5));
    assert_eq!(deleted[0].1.cascade, CascadePolicy::Foreground);
    // The hostfile is not removed by teardown.
    assert!(dir.path().join("hostfile").exists());
}

#[tokio::test]
async fn test_standalone_teardown_uses_given_options() {
    let scheduler = FakeScheduler::new();
    scheduler.add_existing("mpi-t");
    let options = DeleteOptions {
        grace_period: Duration::from_secs(30),
        cascade: CascadePolicy::Foreground,
    };

    let outcome = teardown_workload(&scheduler, "t", "mpi-t", options).await.unwrap();
    assert_eq!(outcome, Teardown::Deleted);
    assert_eq!(
        teardown_workload(&scheduler, "t", "mpi-t", options).await.unwrap(),
        Teardown::AlreadyAbsent
    );

    let deleted = scheduler.deleted();
    assert_eq!(deleted.len(), 2);
    assert!(deleted.iter().all(|(name, opts)| name == "mpi-t" && *opts == options));
}

#[tokio::test]
async fn test_invalid_job_never_reaches_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let scheduler = Arc::new(FakeScheduler::new());
    let controller = test_controller(scheduler.clone(), &template, Duration::from_secs(30));

    let err = controller
        .provision(&test_job("i", dir.path(), 0, 1), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Validation(_)));
    assert!(scheduler.created().is_empty());
    assert_eq!(scheduler.polls(), 0);
    assert!(!dir.path().join("mpi-nodes.yaml").exists());
}

#[tokio::test]
async fn test_missing_template_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(FakeScheduler::new());
    let controller = test_controller(
        scheduler.clone(),
        &dir.path().join("missing.yaml"),
        Duration::from_secs(30),
    );

    let err = controller
        .provision(&test_job("j", dir.path(), 1, 1), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::TemplateRead { .. }));
    assert!(scheduler.created().is_empty());
}

#[tokio::test]
async fn test_missing_working_dir_is_write_error() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let scheduler = Arc::new(FakeScheduler::new());
    let controller = test_controller(scheduler.clone(), &template, Duration::from_secs(30));

    let err = controller
        .provision(
            &test_job("k", &dir.path().join("absent"), 1, 1),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::TemplateWrite { .. }));
    assert!(scheduler.created().is_empty());
}

#[tokio::test]
async fn test_create_failure_is_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let scheduler = Arc::new(FakeScheduler::steady(all_running(1)));
    scheduler.fail_create_with("connection refused");
    let controller = test_controller(scheduler.clone(), &template, Duration::from_secs(30));

    let err = controller
        .provision(&test_job("l", dir.path(), 1, 1), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(scheduler.polls(), 0);
    assert!(!controller.is_in_flight("mpi-l"));
}

#[tokio::test(start_paused = true)]
async fn test_label_reusable_after_failed_provision() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let scheduler = Arc::new(FakeScheduler::with_script([
        Poll::Members(vec![failed("m-0")]),
        Poll::Members(all_running(1)),
    ]));
    let controller = test_controller(scheduler.clone(), &template, Duration::from_secs(30));
    let job = test_job("m", dir.path(), 1, 1);

    assert!(controller
        .provision(&job, &CancellationToken::new())
        .await
        .is_err());
    assert_eq!(controller.teardown("m", "mpi-m").await.unwrap(), Teardown::Deleted);

    let provisioned = controller
        .provision(&job, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(provisioned.members.len(), 1);
    assert_eq!(scheduler.created().len(), 2);
}
