use backup_operator::{crd::Phase, events::reasons, tasks::retention};
use common::{at, TestCluster, NS};
use serde_json::json;
use test_context::test_context;

mod common;

fn keep(ctx: &TestCluster, keep_last: Option<u32>) {
    let retention = keep_last.map(|x| json!({ "keepLast": x }));
    ctx.add_policy(
        "nightly",
        json!({
            "schedule": "0 2 * * *",
            "target": { "pvcName": "postgres-data" },
            "retention": retention,
        }),
    );
}

fn sorted_names(ctx: &TestCluster) -> Vec<String> {
    let mut names = ctx.backup_names();
    names.sort();
    names
}

#[test_context(TestCluster)]
#[tokio::test]
async fn without_keep_last_nothing_is_deleted(ctx: &mut TestCluster) {
    keep(ctx, None);
    for day in 1..=5 {
        let name = format!("nightly-{day}");
        ctx.add_backup(NS, &name, "nightly", Some(Phase::Completed), at(day, 2, 0, 0));
    }

    let deleted = retention::cleanup(&ctx.policy("nightly"), &ctx.ctx).await.unwrap();

    assert_eq!(deleted, 0);
    assert_eq!(ctx.cluster.backups.len(), 5);
    assert!(ctx.cluster.events.events().is_empty());
}

#[test_context(TestCluster)]
#[tokio::test]
async fn keeps_newest_completed_backups(ctx: &mut TestCluster) {
    keep(ctx, Some(2));
    // Inserted out of order; age comes from the creation timestamp.
    ctx.add_backup(NS, "nightly-3", "nightly", Some(Phase::Completed), at(3, 2, 0, 0));
    ctx.add_backup(NS, "nightly-1", "nightly", Some(Phase::Completed), at(1, 2, 0, 0));
    ctx.add_backup(NS, "nightly-4", "nightly", Some(Phase::Completed), at(4, 2, 0, 0));
    ctx.add_backup(NS, "nightly-2", "nightly", Some(Phase::Completed), at(2, 2, 0, 0));
    ctx.add_backup(NS, "nightly-0-failed", "nightly", Some(Phase::Failed), at(1, 0, 0, 0));
    ctx.add_backup(NS, "nightly-5-running", "nightly", Some(Phase::Running), at(5, 2, 0, 0));
    ctx.add_backup(NS, "weekly-1", "weekly", Some(Phase::Completed), at(1, 0, 0, 0));
    ctx.add_backup("other", "nightly-elsewhere", "nightly", Some(Phase::Completed), at(1, 0, 0, 0));

    let deleted = retention::cleanup(&ctx.policy("nightly"), &ctx.ctx).await.unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(
        sorted_names(ctx),
        vec![
            "nightly-0-failed",
            "nightly-3",
            "nightly-4",
            "nightly-5-running",
            "nightly-elsewhere",
            "weekly-1",
        ]
    );

    let events = ctx.cluster.events.with_reason(reasons::CLEANUP_TRIGGERED);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].note.as_deref(), Some("Deleted 2 old backups (keepLast=2)"));
    assert_eq!(events[0].name.as_deref(), Some("nightly"));
}

#[test_context(TestCluster)]
#[tokio::test]
async fn at_or_below_keep_last_is_a_no_op(ctx: &mut TestCluster) {
    keep(ctx, Some(3));
    for day in 1..=3 {
        let name = format!("nightly-{day}");
        ctx.add_backup(NS, &name, "nightly", Some(Phase::Completed), at(day, 2, 0, 0));
    }

    let deleted = retention::cleanup(&ctx.policy("nightly"), &ctx.ctx).await.unwrap();

    assert_eq!(deleted, 0);
    assert_eq!(ctx.cluster.backups.len(), 3);
    assert!(ctx.cluster.events.events().is_empty());
}

#[test_context(TestCluster)]
#[tokio::test]
async fn failed_deletes_are_skipped(ctx: &mut TestCluster) {
    keep(ctx, Some(1));
    for day in 1..=4 {
        let name = format!("nightly-{day}");
        ctx.add_backup(NS, &name, "nightly", Some(Phase::Completed), at(day, 2, 0, 0));
    }
    ctx.cluster.backups.fail_delete("nightly-2");

    let deleted = retention::cleanup(&ctx.policy("nightly"), &ctx.ctx).await.unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(sorted_names(ctx), vec!["nightly-2", "nightly-4"]);
    let events = ctx.cluster.events.with_reason(reasons::CLEANUP_TRIGGERED);
    assert_eq!(events[0].note.as_deref(), Some("Deleted 2 old backups (keepLast=1)"));
}

#[test_context(TestCluster)]
#[tokio::test]
async fn no_event_when_every_delete_fails(ctx: &mut TestCluster) {
    keep(ctx, Some(1));
    ctx.add_backup(NS, "nightly-1", "nightly", Some(Phase::Completed), at(1, 2, 0, 0));
    ctx.add_backup(NS, "nightly-2", "nightly", Some(Phase::Completed), at(2, 2, 0, 0));
    ctx.cluster.backups.fail_delete("nightly-1");

    let deleted = retention::cleanup(&ctx.policy("nightly"), &ctx.ctx).await.unwrap();

    assert_eq!(deleted, 0);
    assert_eq!(ctx.cluster.backups.len(), 2);
    assert!(ctx.cluster.events.events().is_empty());
}

#[test_context(TestCluster)]
#[tokio::test]
async fn repeated_cleanup_converges(ctx: &mut TestCluster) {
    keep(ctx, Some(2));
    for day in 1..=4 {
        let name = format!("nightly-{day}");
        ctx.add_backup(NS, &name, "nightly", Some(Phase::Completed), at(day, 2, 0, 0));
    }

    assert_eq!(retention::cleanup(&ctx.policy("nightly"), &ctx.ctx).await.unwrap(), 2);
    assert_eq!(retention::cleanup(&ctx.policy("nightly"), &ctx.ctx).await.unwrap(), 0);
    assert_eq!(sorted_names(ctx), vec!["nightly-3", "nightly-4"]);
    assert_eq!(ctx.cluster.events.with_reason(reasons::CLEANUP_TRIGGERED).len(), 1);
}
