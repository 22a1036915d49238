//! CLI smoke entry point.
//!
//! Runs one insert/update/delete cycle for a company against the configured
//! store and prints the resulting audit trail.
//!
//! Usage: `starter_cli [config.json]`

use starter_data::{
    AuditTrail, Company, CompanyAudit, CompanyRepository, DataConfig, DataError, DataResult,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("starter_cli error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> DataResult<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => DataConfig::load(path)?,
        None => DataConfig::default(),
    };
    config.init_logging()?;

    println!("starter_data version={}", starter_data::core_version());
    let mut ctx = config.open_context()?;

    let key = CompanyRepository::new(&mut ctx)
        .crud()
        .add(Company::new("Acme"));
    ctx.commit(Some("alice"))?;
    let id = ctx
        .entity(key)
        .and_then(|company| company.id)
        .ok_or_else(|| DataError::InvalidData("company id not assigned".to_string()))?;

    if let Some(company) = ctx.entity_mut(key) {
        company.name = "Acme Corp".to_string();
    }
    ctx.commit(Some("bob"))?;

    ctx.remove(key)?;
    ctx.commit(Some("carol"))?;

    for record in AuditTrail::new(&ctx).history::<CompanyAudit>(id)? {
        println!(
            "audit_id={} operation={} row_version={} name={} user={}",
            record.audit_id,
            record.audit.operation,
            record.audit.row_version,
            record.name.as_deref().unwrap_or("-"),
            record.audit.logged_user_name.as_deref().unwrap_or("-"),
        );
    }
    log::info!("event=cli_smoke module=cli status=ok company_id={id}");
    Ok(())
}
