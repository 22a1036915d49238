use starter_data::db::open_db_in_memory;
use starter_data::{
    starter_registry, AuditTrail, Company, CompanyAudit, DataError, DbContext, EntityState,
    Repository,
};
use std::sync::Arc;

fn open_context() -> DbContext {
    DbContext::new(open_db_in_memory().unwrap(), Arc::new(starter_registry()))
}

fn seed_company(ctx: &mut DbContext, name: &str) -> i64 {
    let key = ctx.add(Company::new(name));
    ctx.commit(Some("seed")).unwrap();
    ctx.entity(key).unwrap().id.unwrap()
}

#[test]
fn find_returns_same_handle_for_same_identity() {
    let mut ctx = open_context();
    let id = seed_company(&mut ctx, "Acme");

    let mut other = DbContext::new(open_db_in_memory().unwrap(), Arc::new(starter_registry()));
    assert!(other.find::<Company>(id).unwrap().is_none());

    let first = ctx.find::<Company>(id).unwrap().unwrap();
    let second = ctx.find::<Company>(id).unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(ctx.state(first), EntityState::Unchanged);
}

#[test]
fn loaded_entity_changes_are_detected_on_commit() {
    let mut ctx = open_context();
    let id = seed_company(&mut ctx, "Acme");

    let fresh = DbContext::new(open_db_in_memory().unwrap(), Arc::new(starter_registry()));
    assert!(!fresh.has_changes());

    let key = ctx.find::<Company>(id).unwrap().unwrap();
    assert!(!ctx.has_changes());
    ctx.entity_mut(key).unwrap().address = Some("1 Main St".to_string());
    assert!(ctx.has_changes());

    ctx.commit(Some("bob")).unwrap();
    assert!(!ctx.has_changes());
    assert_eq!(ctx.state(key), EntityState::Unchanged);
    assert_eq!(ctx.entity(key).unwrap().row_version, 2);
}

#[test]
fn attach_rejects_missing_and_duplicate_identity() {
    let mut ctx = open_context();
    let id = seed_company(&mut ctx, "Acme");

    let err = ctx.attach(Company::new("No id")).unwrap_err();
    assert!(matches!(err, DataError::InvalidArgument(_)));

    let persisted = Repository::<Company>::new(&mut ctx)
        .get_by_id(id)
        .unwrap()
        .unwrap();
    let err = ctx.attach(persisted).unwrap_err();
    assert!(matches!(err, DataError::InvalidArgument(_)));
}

#[test]
fn update_of_detached_entity_is_written_and_audited() {
    let mut seed_ctx = open_context();
    let id = seed_company(&mut seed_ctx, "Acme");
    let mut company = Repository::<Company>::new(&mut seed_ctx)
        .get_by_id(id)
        .unwrap()
        .unwrap();
    company.phone = Some("555-0100".to_string());

    let key = seed_ctx.update(company).unwrap();
    assert_eq!(seed_ctx.state(key), EntityState::Modified);
    seed_ctx.commit(Some("erin")).unwrap();

    let history = AuditTrail::new(&seed_ctx)
        .history::<CompanyAudit>(id)
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].phone.as_deref(), Some("555-0100"));
    assert_eq!(history[1].audit.row_version, 2);
}

#[test]
fn removing_added_entity_detaches_without_writes() {
    let mut ctx = open_context();
    let key = ctx.add(Company::new("Never saved"));
    ctx.remove(key).unwrap();

    assert!(ctx.is_detached(key));
    assert!(!ctx.has_changes());
    assert_eq!(ctx.commit(Some("alice")).unwrap(), 0);
    assert_eq!(AuditTrail::new(&ctx).count::<CompanyAudit>().unwrap(), 0);

    let err = ctx.remove(key).unwrap_err();
    assert!(matches!(err, DataError::NotTracked("Company")));
    let err = ctx.set_modified(key).unwrap_err();
    assert!(matches!(err, DataError::NotTracked("Company")));
}

#[test]
fn entity_staged_for_deletion_is_not_found() {
    let mut ctx = open_context();
    let id = seed_company(&mut ctx, "Acme");

    let key = ctx.find::<Company>(id).unwrap().unwrap();
    ctx.remove(key).unwrap();
    assert!(ctx.find::<Company>(id).unwrap().is_none());

    ctx.commit(None).unwrap();
    assert!(ctx.is_detached(key));
    assert!(ctx.find::<Company>(id).unwrap().is_none());
}

#[test]
fn set_modified_keeps_added_state() {
    let mut ctx = open_context();
    let key = ctx.add(Company::new("Fresh"));
    ctx.set_modified(key).unwrap();
    assert_eq!(ctx.state(key), EntityState::Added);
    assert_eq!(ctx.commit(None).unwrap(), 1);
}
