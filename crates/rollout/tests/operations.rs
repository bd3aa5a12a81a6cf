mod common;

use awskit::{InstanceState, JournalEntry, MockCloud};
use common::{RecordingRunner, orchestrator, seed_group, web, worker};
use rollout::naming::TAG_ROLLING;
use rollout::{DeployRequest, Error};

/// Journal positions of calls to `operation`.
fn call_positions(journal: &[JournalEntry], operation: &str) -> Vec<usize> {
    journal
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            JournalEntry::Call { operation: op, .. } if op == operation => Some(i),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Rolls
// ============================================================================

#[test]
fn roll_never_drops_below_running_capacity() {
    let mock = MockCloud::new();
    seed_group(&mock, "worker", 3);
    let application = worker(&mock);
    mock.clear_journal();

    orchestrator(&mock, RecordingRunner::new())
        .deploy(&application, &DeployRequest::default())
        .unwrap();

    let history = mock.running_history("worker");
    assert!(!history.is_empty());
    assert!(history.iter().all(|&running| running >= 3), "{history:?}");

    // Old instances leave only after the new ones were seen in service
    let journal = mock.journal();
    let last_health_check = *call_positions(&journal, "describe-instance-health")
        .last()
        .unwrap();
    let terminations: Vec<usize> = journal
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            JournalEntry::Event(event)
                if event.starts_with("terminate ") && event.ends_with(" worker") =>
            {
                Some(i)
            }
            _ => None,
        })
        .collect();
    assert_eq!(terminations.len(), 3);
    assert!(terminations.iter().all(|&i| i > last_health_check));
}

#[test]
fn regenerate_replaces_every_instance() {
    let mock = MockCloud::new();
    let old = seed_group(&mock, "web", 3);

    let report = orchestrator(&mock, RecordingRunner::new())
        .regenerate(&web())
        .unwrap();
    assert_eq!(report.old_instances, old);
    assert_eq!(report.new_instances.len(), 3);
    assert_eq!(report.launch_configuration.as_deref(), Some("web-2024-01-01-1"));

    for id in &old {
        assert_eq!(mock.instance_snapshot(id).unwrap().state, InstanceState::Terminated);
    }
    let group = mock.group_snapshot("web").unwrap();
    assert_eq!(group.desired_capacity, 3);
    assert_eq!(group.max_size, 6);
    assert!(group.tag(TAG_ROLLING).is_none());
    assert_eq!(mock.registered_instances("web-lb").len(), 3);
}

// ============================================================================
// Maintenance and recovery
// ============================================================================

#[test]
fn maintenance_suspends_until_switched_off() {
    let mock = MockCloud::new();
    seed_group(&mock, "web", 2);
    let runner = RecordingRunner::new();
    let orchestrator = orchestrator(&mock, runner.clone());

    orchestrator.maintenance(&web(), true).unwrap();
    assert!(!mock.group_snapshot("web").unwrap().suspended_processes.is_empty());
    assert_eq!(mock.call_count("resume-processes"), 0);

    orchestrator.maintenance(&web(), false).unwrap();
    assert!(mock.group_snapshot("web").unwrap().suspended_processes.is_empty());

    let commands = runner.commands();
    assert_eq!(commands.len(), 2);
    assert!(commands[0].starts_with("maintenance on ec2-"));
    assert!(commands[1].starts_with("maintenance off ec2-"));
}

#[test]
fn failed_maintenance_hook_resumes_processes() {
    let mock = MockCloud::new();
    seed_group(&mock, "web", 2);

    let err = orchestrator(&mock, RecordingRunner::exiting(2))
        .maintenance(&web(), true)
        .unwrap_err();
    assert!(matches!(err, Error::MaintenanceHookFailed { status: 2, .. }));
    assert_eq!(mock.call_count("resume-processes"), 1);
    assert!(mock.group_snapshot("web").unwrap().suspended_processes.is_empty());
}

#[test]
fn resume_recovers_a_suspended_group() {
    let mock = MockCloud::new();
    let orchestrator = orchestrator(&mock, RecordingRunner::new());
    assert!(!orchestrator.resume(&web()).unwrap());

    seed_group(&mock, "web", 1);
    orchestrator.maintenance(&web(), true).unwrap();
    assert!(orchestrator.resume(&web()).unwrap());
    assert!(mock.group_snapshot("web").unwrap().suspended_processes.is_empty());
}

// ============================================================================
// Status and cleanup
// ============================================================================

#[test]
fn status_reflects_a_deploy() {
    let mock = MockCloud::new();
    seed_group(&mock, "web", 2);
    let orchestrator = orchestrator(&mock, RecordingRunner::new());
    let report = orchestrator.deploy(&web(), &DeployRequest::default()).unwrap();

    let status = orchestrator.status(&web(), 5).unwrap();
    assert_eq!(status.launch_configuration, Some(report.launch_configuration));
    assert_eq!(status.load_balancers, "web-lb");
    assert!(status.suspended_processes.is_empty());
    assert!(status.rolling.is_none());
    assert!(status.activities.len() <= 5);
}

#[test]
fn cleanup_after_two_deploys() {
    let mock = MockCloud::new();
    seed_group(&mock, "web", 2);
    let orchestrator = orchestrator(&mock, RecordingRunner::new());
    orchestrator.deploy(&web(), &DeployRequest::default()).unwrap();
    let live = orchestrator.deploy(&web(), &DeployRequest::default()).unwrap();

    let before = orchestrator.list_configurations(&web()).unwrap();
    assert_eq!(before.len(), 3);
    assert_eq!(before[0].1.name, "web-2024-01-01-1");
    assert_eq!(before[2].1.name, live.launch_configuration);

    let candidates = orchestrator.cleanup_candidates(&web(), 1).unwrap();
    mock.clear_journal();
    let report = orchestrator.cleanup(&web(), 1).unwrap();
    assert_eq!(report.deleted, candidates);
    assert_eq!(report.deleted.len(), 2);
    assert_eq!(report.kept, vec![live.launch_configuration.clone()]);
    assert!(report.image_failures.is_empty());

    for (_, config) in &before[..2] {
        assert!(mock.image_snapshot(&config.image_id).is_none());
    }
    assert!(mock.image_snapshot(&live.image_id).is_some());
    assert_eq!(mock.launch_configuration_names(), vec![live.launch_configuration]);

    let journal = mock.journal();
    let deregistered = call_positions(&journal, "deregister-image");
    let deleted = call_positions(&journal, "delete-launch-configuration");
    assert_eq!(deregistered.len(), 2);
    assert_eq!(deleted.len(), 2);
    assert!(deregistered[0] < deleted[0]);
    assert!(deregistered[1] < deleted[1]);
}
