use starter_data::db::open_db_in_memory;
use starter_data::{
    starter_registry, AuditOperation, AuditTrail, Company, CompanyAudit, DataError, DbContext,
    EntityState, Repository, Tracked,
};
use std::future::{poll_fn, Future};
use std::sync::Arc;
use std::task::Poll;

fn open_context() -> DbContext {
    DbContext::new(open_db_in_memory().unwrap(), Arc::new(starter_registry()))
}

#[tokio::test]
async fn commit_async_writes_rows_and_audits() {
    let mut ctx = open_context();
    let key = ctx.add(Company::new("Async Inc"));
    assert_eq!(ctx.commit_async(Some("alice")).await.unwrap(), 1);

    let id = ctx.entity(key).unwrap().id.unwrap();
    assert_eq!(ctx.state(key), EntityState::Unchanged);

    ctx.entity_mut(key).unwrap().name = "Async Corp".to_string();
    assert_eq!(ctx.commit_async(Some("bob")).await.unwrap(), 0);

    let history = AuditTrail::new(&ctx).history::<CompanyAudit>(id).unwrap();
    let operations: Vec<AuditOperation> =
        history.iter().map(|row| row.audit.operation).collect();
    assert_eq!(
        operations,
        vec![AuditOperation::Insert, AuditOperation::Update]
    );
    assert_eq!(history[1].audit.row_version, 2);
    assert_eq!(history[1].audit.logged_user_name.as_deref(), Some("bob"));
}

#[tokio::test]
async fn commit_async_without_changes_is_a_no_op() {
    let mut ctx = open_context();
    assert_eq!(ctx.commit_async(None).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commit_async_failure_keeps_tracker_state() {
    let mut ctx = open_context();
    let key = ctx.add(Company::new(""));

    let err = ctx.commit_async(Some("alice")).await.unwrap_err();
    assert!(matches!(err, DataError::Validation(_)));
    assert_eq!(ctx.state(key), EntityState::Added);
    assert_eq!(AuditTrail::new(&ctx).count::<CompanyAudit>().unwrap(), 0);
}

fn add_companies(ctx: &mut DbContext, count: usize) -> Vec<Tracked<Company>> {
    (0..count)
        .map(|index| ctx.add(Company::new(format!("Company {index}"))))
        .collect()
}

/// Starts a commit, polls it once and drops it mid-flight.
async fn abandon_commit(ctx: &mut DbContext) {
    let mut commit = Box::pin(ctx.commit_async(Some("alice")));
    poll_fn(|cx| Poll::Ready(commit.as_mut().poll(cx).is_ready())).await;
}

fn assert_inserted_once(ctx: &mut DbContext, keys: &[Tracked<Company>]) {
    for key in keys {
        assert_eq!(ctx.state(*key), EntityState::Unchanged);
        assert_eq!(ctx.entity(*key).unwrap().row_version, 1);
    }
    assert_eq!(
        Repository::<Company>::new(ctx).get_all().unwrap().len(),
        keys.len()
    );
    let audits = AuditTrail::new(ctx).all::<CompanyAudit>().unwrap();
    assert_eq!(audits.len(), keys.len());
    assert!(audits
        .iter()
        .all(|row| row.audit.operation == AuditOperation::Insert));
}

#[tokio::test]
async fn dropped_commit_is_folded_in_before_next_commit() {
    let mut ctx = open_context();
    let keys = add_companies(&mut ctx, 500);

    abandon_commit(&mut ctx).await;

    assert_eq!(ctx.commit(Some("alice")).unwrap(), 0);
    assert_inserted_once(&mut ctx, &keys);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_commit_is_awaited_by_next_async_commit() {
    let mut ctx = open_context();
    let keys = add_companies(&mut ctx, 500);

    abandon_commit(&mut ctx).await;

    assert_eq!(ctx.commit_async(Some("alice")).await.unwrap(), 0);
    assert_inserted_once(&mut ctx, &keys);
}

#[tokio::test]
async fn find_after_dropped_commit_reuses_tracked_entity() {
    let mut ctx = open_context();
    let keys = add_companies(&mut ctx, 50);

    abandon_commit(&mut ctx).await;

    let first = keys[0];
    // The first tracked insert receives the first rowid.
    assert_eq!(ctx.find::<Company>(1).unwrap(), Some(first));
    assert_eq!(ctx.entity(first).unwrap().id, Some(1));
    assert!(!ctx.has_changes());
}
