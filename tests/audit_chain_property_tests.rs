//! Property-based tests for the audit hash chain.
//!
//! Every transition appends one entry whose `prev_hash` is the sha256 of
//! its predecessor, with the chain head stored on the request record.
//! These tests check the linkage invariants over generated entry sequences
//! (pure, no database) and then confirm that real workflow runs produce
//! chains that verify.

use change_approval::access::{Actor, Role};
use change_approval::audit::{self, AuditAction, AuditEntry};
use change_approval::request::{ChangeSet, RequestDraft, RequestPatch, RequestStatus};
use change_approval::service::ChangeService;
use change_approval::store::WorkflowStore;
use change_approval::subject::{EmployeeRecord, NamedRef, RefKind, TimeStamp};
use change_approval::utils::new_uuid_to_bech32;
use proptest::prelude::*;

// PROPERTY TEST STRATEGIES

fn action_strategy() -> impl Strategy<Value = AuditAction> {
    prop_oneof![
        Just(AuditAction::Submit),
        Just(AuditAction::Update),
        Just(AuditAction::Approve),
        Just(AuditAction::Reject),
        Just(AuditAction::Cancel),
        Just(AuditAction::Apply),
        Just(AuditAction::Delete),
    ]
}

fn entry_strategy() -> impl Strategy<Value = AuditEntry> {
    (any::<u32>(), action_strategy()).prop_map(|(n, action)| {
        AuditEntry::new(
            "req_chain_test".to_string(),
            format!("user_{n}"),
            action,
            Some(RequestStatus::Pending),
            RequestStatus::Pending,
            TimeStamp::new(),
        )
        .with_note((n % 3 == 0).then(|| format!("note {n}")))
    })
}

/// Link raw entries the way the service does: contiguous sequence numbers,
/// each carrying the hash of its predecessor.
fn link(entries: Vec<AuditEntry>) -> Vec<AuditEntry> {
    let mut prev: Option<String> = None;
    let mut chained = Vec::with_capacity(entries.len());
    for (index, mut entry) in entries.into_iter().enumerate() {
        entry.seq = index as u64;
        entry.prev_hash = prev.clone();
        let (hash, _) = entry.build().expect("hashing an entry cannot fail here");
        prev = Some(hash);
        chained.push(entry);
    }
    chained
}

// PROPERTY TESTS
proptest! {
    /// Property: a properly linked chain of any length verifies
    #[test]
    fn prop_linked_chains_verify(entries in prop::collection::vec(entry_strategy(), 0..=12)) {
        let chained = link(entries);
        prop_assert!(audit::verify_chain(&chained).expect("verification"));
    }

    /// Property: dropping any entry with a successor breaks the chain (a
    /// truncated tail is caught by the chain head on the request instead)
    #[test]
    fn prop_removing_an_entry_breaks_the_chain(
        entries in prop::collection::vec(entry_strategy(), 2..=10),
        victim_seed in any::<usize>(),
    ) {
        let mut chained = link(entries);
        let victim = victim_seed % (chained.len() - 1);
        chained.remove(victim);
        prop_assert!(!audit::verify_chain(&chained).expect("verification"));
    }

    /// Property: tampering with any entry that has a successor is caught,
    /// because the successor's prev_hash no longer matches
    #[test]
    fn prop_tampering_before_the_tail_is_caught(
        entries in prop::collection::vec(entry_strategy(), 2..=10),
        victim_seed in any::<usize>(),
    ) {
        let mut chained = link(entries);
        // anything but the final entry; the tail is pinned by the chain
        // head on the request record instead
        let victim = victim_seed % (chained.len() - 1);
        chained[victim].actor = "user_forger".to_string();
        prop_assert!(!audit::verify_chain(&chained).expect("verification"));
    }

    /// Property: reordering two adjacent entries breaks verification
    #[test]
    fn prop_reordering_breaks_the_chain(
        entries in prop::collection::vec(entry_strategy(), 2..=10),
        victim_seed in any::<usize>(),
    ) {
        let mut chained = link(entries);
        let index = victim_seed % (chained.len() - 1);
        chained.swap(index, index + 1);
        prop_assert!(!audit::verify_chain(&chained).expect("verification"));
    }
}

// WORKFLOW-PRODUCED CHAINS

struct Fixture {
    _dir: tempfile::TempDir,
    service: ChangeService,
    tenant_id: String,
    employee_id: String,
    requester: Actor,
    approver: Actor,
}

fn fixture(db_name: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = std::sync::Arc::new(sled::open(dir.path().join(db_name)).unwrap());
    let store = WorkflowStore::new(db.clone());

    let tenant_id = new_uuid_to_bech32("co_").unwrap();
    let department_id = new_uuid_to_bech32("dept_").unwrap();
    let position_id = new_uuid_to_bech32("pos_").unwrap();
    let employee_id = new_uuid_to_bech32("emp_").unwrap();

    store
        .put_reference(RefKind::Company, &NamedRef::new(tenant_id.clone(), "Acme"))
        .unwrap();
    store
        .put_reference(
            RefKind::Department,
            &NamedRef::new(department_id.clone(), "Engineering"),
        )
        .unwrap();
    store
        .put_reference(
            RefKind::Position,
            &NamedRef::new(position_id.clone(), "Engineer"),
        )
        .unwrap();
    store
        .put_employee(
            &EmployeeRecord::new(
                employee_id.clone(),
                "Sari",
                tenant_id.clone(),
                department_id,
                position_id,
            )
            .set_salary(10_000_000),
        )
        .unwrap();

    Fixture {
        service: ChangeService::new(db),
        tenant_id,
        employee_id,
        requester: Actor::new(new_uuid_to_bech32("user_").unwrap(), Role::Staff),
        approver: Actor::new(new_uuid_to_bech32("user_").unwrap(), Role::Approver),
        _dir: dir,
    }
}

#[test]
fn full_lifecycle_writes_one_entry_per_transition() {
    let fx = fixture("lifecycle_chain.db");

    let request = fx
        .service
        .submit_request(
            RequestDraft {
                subject_id: fx.employee_id.clone(),
                tenant_id: fx.tenant_id.clone(),
                effective_date: TimeStamp::new(),
                proposed: ChangeSet::SalaryAdjustment {
                    new_salary: 12_000_000,
                },
            },
            &fx.requester,
        )
        .unwrap();

    fx.service
        .update_request(
            &request.id,
            RequestPatch {
                effective_date: None,
                change_set: Some(ChangeSet::SalaryAdjustment {
                    new_salary: 12_500_000,
                }),
            },
            &fx.requester,
        )
        .unwrap();
    fx.service
        .approve_request(&request.id, &fx.approver, Some("fine".into()))
        .unwrap();
    let as_of = TimeStamp::from(chrono::Utc::now() + chrono::Duration::days(1));
    fx.service
        .apply_request(&request.id, &fx.approver, &as_of)
        .unwrap();

    let trail = fx.service.audit_trail(&request.id).unwrap();
    let actions: Vec<AuditAction> = trail.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::Submit,
            AuditAction::Update,
            AuditAction::Approve,
            AuditAction::Apply,
        ]
    );
    for (index, entry) in trail.iter().enumerate() {
        assert_eq!(entry.seq, index as u64);
    }
    assert!(audit::verify_chain(&trail).unwrap());
    assert!(fx.service.verify_audit_trail(&request.id).unwrap());

    // the apply entry records the post-mutation subject values
    let apply_entry = trail.last().unwrap();
    let after = apply_entry.subject_after.as_ref().unwrap();
    assert_eq!(after.salary, 12_500_000);

    // the chain head on the request pins the final entry
    let stored = fx.service.get_request(&request.id).unwrap();
    let (tail_hash, _) = apply_entry.build().unwrap();
    assert_eq!(stored.last_audit_hash.as_deref(), Some(tail_hash.as_str()));
    assert_eq!(stored.audit_seq, trail.len() as u64);
}

#[test]
fn rejection_chain_verifies_and_stops() {
    let fx = fixture("rejection_chain.db");

    let request = fx
        .service
        .submit_request(
            RequestDraft {
                subject_id: fx.employee_id.clone(),
                tenant_id: fx.tenant_id.clone(),
                effective_date: TimeStamp::new(),
                proposed: ChangeSet::SalaryAdjustment {
                    new_salary: 12_000_000,
                },
            },
            &fx.requester,
        )
        .unwrap();
    fx.service
        .reject_request(&request.id, &fx.approver, "budget frozen")
        .unwrap();

    let trail = fx.service.audit_trail(&request.id).unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[1].action, AuditAction::Reject);
    assert_eq!(trail[1].note.as_deref(), Some("budget frozen"));
    assert_eq!(trail[1].before_status, Some(RequestStatus::Pending));
    assert_eq!(trail[1].after_status, RequestStatus::Rejected);
    assert!(fx.service.verify_audit_trail(&request.id).unwrap());

    // a failed transition leaves no trace: the losing approve writes nothing
    let late_approve = fx.service.approve_request(&request.id, &fx.approver, None);
    assert!(late_approve.is_err());
    assert_eq!(fx.service.audit_trail(&request.id).unwrap().len(), 2);
}
