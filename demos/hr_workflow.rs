//! End-to-end walkthrough: seed a tenant, open a salary adjustment, approve
//! it, then run the due sweep once the effective date has passed.
//!
//!     RUST_LOG=info cargo run --example hr_workflow

use change_approval::access::{Actor, Role, TenantAccess};
use change_approval::request::{ChangeSet, RequestDraft};
use change_approval::service::ChangeService;
use change_approval::store::{PageRequest, RequestFilter, WorkflowStore};
use change_approval::subject::{EmployeeRecord, NamedRef, RefKind, TimeStamp};
use change_approval::utils::new_uuid_to_bech32;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("hr_workflow.db"))?);

    // seed what the CRUD layer would normally own
    let store = WorkflowStore::new(db.clone());
    let tenant_id = new_uuid_to_bech32("co_")?;
    let department_id = new_uuid_to_bech32("dept_")?;
    let position_id = new_uuid_to_bech32("pos_")?;
    let employee_id = new_uuid_to_bech32("emp_")?;

    store.put_reference(RefKind::Company, &NamedRef::new(tenant_id.clone(), "Acme Retail"))?;
    store.put_reference(
        RefKind::Department,
        &NamedRef::new(department_id.clone(), "Store Operations"),
    )?;
    store.put_reference(
        RefKind::Position,
        &NamedRef::new(position_id.clone(), "Area Supervisor"),
    )?;
    store.put_employee(
        &EmployeeRecord::new(
            employee_id.clone(),
            "Sari Wulandari",
            tenant_id.clone(),
            department_id,
            position_id,
        )
        .set_salary(10_000_000),
    )?;

    let service = ChangeService::new(db);
    let requester = Actor::new(new_uuid_to_bech32("user_")?, Role::Staff);
    let approver = Actor::new(new_uuid_to_bech32("user_")?, Role::Approver);

    // propose a raise effective tomorrow
    let effective = TimeStamp::from(chrono::Utc::now() + chrono::Duration::days(1));
    let request = service.submit_request(
        RequestDraft {
            subject_id: employee_id.clone(),
            tenant_id: tenant_id.clone(),
            effective_date: effective.clone(),
            proposed: ChangeSet::SalaryAdjustment {
                new_salary: 15_000_000,
            },
        },
        &requester,
    )?;
    println!(
        "opened {} ({}), deltas: {:?}",
        request.id, request.status, request.computed_deltas
    );

    let request = service.approve_request(&request.id, &approver, Some("budgeted".into()))?;
    println!("approved by {:?}", request.approved_by);

    // nothing is due yet
    let today = TimeStamp::new();
    println!(
        "due today: {}",
        service.list_due_for_application(None, &today)?.len()
    );

    // the scheduler comes around after the effective date
    let later = TimeStamp::from(chrono::Utc::now() + chrono::Duration::days(2));
    let report = service.apply_due(&approver, &later)?;
    println!(
        "sweep applied {} request(s), skipped {}",
        report.applied.len(),
        report.skipped.len()
    );

    let applied = service.get_request(&request.id)?;
    let subject = store.employee(&employee_id)?.expect("employee vanished");
    println!(
        "request is now {}, subject salary {} -> {}",
        applied.status, applied.previous_state.salary, subject.salary
    );

    let access = TenantAccess::new(vec![tenant_id.clone()]);
    let page = service.list_requests(
        &tenant_id,
        &access,
        &RequestFilter::default(),
        &PageRequest::default(),
    )?;
    println!("tenant has {} request(s) on file", page.total);

    for entry in service.audit_trail(&request.id)? {
        println!("  audit #{} {} by {}", entry.seq, entry.action, entry.actor);
    }
    println!(
        "audit chain intact: {}",
        service.verify_audit_trail(&request.id)?
    );

    Ok(())
}
