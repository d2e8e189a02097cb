//! Service layer API for the change-request workflow
//!
//! Every transition runs as one serializable sled transaction conditioned on
//! the request's current status, and writes its audit entry in that same
//! transaction. Concurrent callers race on the commit: the loser re-runs,
//! observes the committed status and gets `InvalidTransition` (or
//! `AlreadyApplied` for duplicate applies) instead of a double transition.

use crate::access::{Actor, TenantAccess};
use crate::audit::{self, AuditAction, AuditEntry};
use crate::error::WorkflowError;
use crate::request::{
    ChangeRequest, ChangeSet, RequestDraft, RequestPatch, RequestStatus,
};
use crate::snapshot::{self, ProposedNames, RefNames};
use crate::store::{
    self, Page, PageRequest, RequestFilter, WorkflowStore,
};
use crate::subject::{EmployeeRecord, RefKind, TimeStamp};
use crate::utils::new_uuid_to_bech32;
use chrono::Utc;
use log::{debug, info, warn};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a sweep run did: request ids applied, and skipped ids with the error
/// that sidelined each (a concurrent sweep's `AlreadyApplied` lands here).
#[derive(Debug, Default)]
pub struct SweepReport {
    pub applied: Vec<String>,
    pub skipped: Vec<(String, WorkflowError)>,
}

pub struct ChangeService {
    store: WorkflowStore,
}

type TxResult<T> = Result<T, ConflictableTransactionError<WorkflowError>>;

fn tx_abort<T>(e: WorkflowError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(e))
}

fn tx_encode<T: minicbor::Encode<()>>(value: T) -> TxResult<Vec<u8>> {
    minicbor::to_vec(value)
        .map_err(|e| ConflictableTransactionError::Abort(WorkflowError::Codec(e.to_string())))
}

fn tx_decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> TxResult<T> {
    minicbor::decode(bytes)
        .map_err(|e| ConflictableTransactionError::Abort(WorkflowError::Codec(e.to_string())))
}

fn run_tx<T>(result: Result<T, TransactionError<WorkflowError>>) -> Result<T, WorkflowError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(WorkflowError::Storage(e)),
    }
}

fn load_active(tx: &TransactionalTree, key: &[u8], id: &str) -> TxResult<ChangeRequest> {
    let raw = match tx.get(key)? {
        Some(raw) => raw,
        None => return tx_abort(WorkflowError::NotFound(id.to_string())),
    };
    let request: ChangeRequest = tx_decode(&raw)?;
    if !request.is_active() {
        return tx_abort(WorkflowError::NotFound(id.to_string()));
    }
    Ok(request)
}

/// Extend the request's audit chain inside the transaction: stamp the next
/// sequence number and the previous hash, persist the entry, advance the
/// head on the request.
fn chain_entry(
    tx: &TransactionalTree,
    request: &mut ChangeRequest,
    mut entry: AuditEntry,
) -> TxResult<()> {
    entry.seq = request.audit_seq;
    entry.prev_hash = request.last_audit_hash.clone();
    let (hash, bytes) = entry
        .build()
        .map_err(ConflictableTransactionError::Abort)?;
    tx.insert(store::audit_key(&request.id, entry.seq), bytes)?;
    request.audit_seq += 1;
    request.last_audit_hash = Some(hash);
    Ok(())
}

impl ChangeService {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self {
            store: WorkflowStore::new(db),
        }
    }

    /// Open a request: capture the subject's current state, resolve every
    /// referenced display name, compute the deltas, persist as `pending`.
    pub fn submit_request(
        &self,
        draft: RequestDraft,
        requester: &Actor,
    ) -> Result<ChangeRequest, WorkflowError> {
        draft.proposed.validate()?;
        if draft.subject_id.is_empty() || draft.tenant_id.is_empty() {
            return Err(WorkflowError::Validation(
                "subject and tenant are required".into(),
            ));
        }

        let employee = self
            .store
            .employee(&draft.subject_id)?
            .ok_or_else(|| WorkflowError::SubjectNotFound(draft.subject_id.clone()))?;
        if employee.company_id != draft.tenant_id {
            return Err(WorkflowError::Validation(format!(
                "subject {} does not belong to tenant {}",
                draft.subject_id, draft.tenant_id
            )));
        }

        let names = self.resolve_employee_names(&employee)?;
        let proposed_names = self.resolve_proposed_names(&draft.proposed)?;
        let previous_state = snapshot::capture(&employee, &names);
        let computed_deltas = snapshot::compute_deltas(&previous_state, &draft.proposed);
        let previous_digest = snapshot::digest(&previous_state)?;

        let id = new_uuid_to_bech32("req_")?;
        let now = TimeStamp::new();
        let request = ChangeRequest {
            id: id.clone(),
            subject_id: draft.subject_id.clone(),
            tenant_id: draft.tenant_id.clone(),
            kind: draft.proposed.kind(),
            effective_date: draft.effective_date.clone(),
            previous_state,
            previous_digest,
            proposed_state: draft.proposed.clone(),
            proposed_names,
            computed_deltas,
            status: RequestStatus::Pending,
            requested_by: requester.id.clone(),
            requested_at: now.clone(),
            approved_by: None,
            approved_at: None,
            approval_notes: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            is_applied: false,
            applied_at: None,
            deleted_at: None,
            audit_seq: 0,
            last_audit_hash: None,
        };

        let key = store::request_key(&id);
        let created = run_tx(self.store.db().transaction(|tx| {
            if tx.get(key.as_slice())?.is_some() {
                return tx_abort(WorkflowError::Validation(format!(
                    "request id collision: {id}"
                )));
            }
            let mut fresh = request.clone();
            let entry = AuditEntry::new(
                fresh.id.clone(),
                requester.id.clone(),
                AuditAction::Submit,
                None,
                RequestStatus::Pending,
                TimeStamp::new(),
            );
            chain_entry(tx, &mut fresh, entry)?;
            tx.insert(key.as_slice(), tx_encode(&fresh)?)?;
            Ok(fresh)
        }))?;

        info!(
            "request {} opened: {} for subject {} in tenant {}",
            created.id, created.kind, created.subject_id, created.tenant_id
        );
        Ok(created)
    }

    /// Edit a pending request. Only the effective date and the proposed
    /// change set are editable; the patch type cannot express the snapshot,
    /// the deltas or the status.
    pub fn update_request(
        &self,
        request_id: &str,
        patch: RequestPatch,
        actor: &Actor,
    ) -> Result<ChangeRequest, WorkflowError> {
        if patch.is_empty() {
            return Err(WorkflowError::Validation("patch contains no changes".into()));
        }
        let resolved = match &patch.change_set {
            Some(change) => {
                change.validate()?;
                Some(self.resolve_proposed_names(change)?)
            }
            None => None,
        };

        let key = store::request_key(request_id);
        let updated = run_tx(self.store.db().transaction(|tx| {
            let mut request = load_active(tx, &key, request_id)?;
            if request.status != RequestStatus::Pending {
                return tx_abort(WorkflowError::InvalidTransition {
                    action: "update",
                    status: request.status,
                });
            }
            if let (Some(change), Some(names)) = (&patch.change_set, &resolved) {
                if change.kind() != request.kind {
                    return tx_abort(WorkflowError::Validation(format!(
                        "a {} request cannot be repurposed as {}",
                        request.kind,
                        change.kind()
                    )));
                }
                request.proposed_state = change.clone();
                request.proposed_names = names.clone();
            }
            if let Some(date) = &patch.effective_date {
                request.effective_date = date.clone();
            }
            let entry = AuditEntry::new(
                request.id.clone(),
                actor.id.clone(),
                AuditAction::Update,
                Some(RequestStatus::Pending),
                RequestStatus::Pending,
                TimeStamp::new(),
            );
            chain_entry(tx, &mut request, entry)?;
            tx.insert(key.as_slice(), tx_encode(&request)?)?;
            Ok(request)
        }))?;

        info!("request {} updated by {}", request_id, actor.id);
        Ok(updated)
    }

    pub fn approve_request(
        &self,
        request_id: &str,
        approver: &Actor,
        notes: Option<String>,
    ) -> Result<ChangeRequest, WorkflowError> {
        if !approver.can_decide() {
            return Err(WorkflowError::Unauthorized {
                actor: approver.id.clone(),
                action: "approve",
            });
        }

        let key = store::request_key(request_id);
        let approved = run_tx(self.store.db().transaction(|tx| {
            let mut request = load_active(tx, &key, request_id)?;
            if request.status != RequestStatus::Pending {
                return tx_abort(WorkflowError::InvalidTransition {
                    action: "approve",
                    status: request.status,
                });
            }
            let now = TimeStamp::new();
            request.status = RequestStatus::Approved;
            request.approved_by = Some(approver.id.clone());
            request.approved_at = Some(now.clone());
            request.approval_notes = notes.clone();
            let entry = AuditEntry::new(
                request.id.clone(),
                approver.id.clone(),
                AuditAction::Approve,
                Some(RequestStatus::Pending),
                RequestStatus::Approved,
                now,
            )
            .with_note(notes.clone());
            chain_entry(tx, &mut request, entry)?;
            tx.insert(key.as_slice(), tx_encode(&request)?)?;
            Ok(request)
        }))?;

        info!("request {} approved by {}", request_id, approver.id);
        Ok(approved)
    }

    pub fn reject_request(
        &self,
        request_id: &str,
        approver: &Actor,
        reason: &str,
    ) -> Result<ChangeRequest, WorkflowError> {
        if !approver.can_decide() {
            return Err(WorkflowError::Unauthorized {
                actor: approver.id.clone(),
                action: "reject",
            });
        }
        if reason.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "a rejection reason is required".into(),
            ));
        }

        let key = store::request_key(request_id);
        let rejected = run_tx(self.store.db().transaction(|tx| {
            let mut request = load_active(tx, &key, request_id)?;
            if request.status != RequestStatus::Pending {
                return tx_abort(WorkflowError::InvalidTransition {
                    action: "reject",
                    status: request.status,
                });
            }
            let now = TimeStamp::new();
            request.status = RequestStatus::Rejected;
            request.rejected_by = Some(approver.id.clone());
            request.rejected_at = Some(now.clone());
            request.rejection_reason = Some(reason.to_string());
            let entry = AuditEntry::new(
                request.id.clone(),
                approver.id.clone(),
                AuditAction::Reject,
                Some(RequestStatus::Pending),
                RequestStatus::Rejected,
                now,
            )
            .with_note(Some(reason.to_string()));
            chain_entry(tx, &mut request, entry)?;
            tx.insert(key.as_slice(), tx_encode(&request)?)?;
            Ok(request)
        }))?;

        info!("request {} rejected by {}", request_id, approver.id);
        Ok(rejected)
    }

    /// Requester withdrawal. Admins may cancel on a requester's behalf.
    pub fn cancel_request(
        &self,
        request_id: &str,
        actor: &Actor,
    ) -> Result<ChangeRequest, WorkflowError> {
        let key = store::request_key(request_id);
        let cancelled = run_tx(self.store.db().transaction(|tx| {
            let mut request = load_active(tx, &key, request_id)?;
            if actor.id != request.requested_by && !actor.is_admin() {
                return tx_abort(WorkflowError::Unauthorized {
                    actor: actor.id.clone(),
                    action: "cancel",
                });
            }
            if request.status != RequestStatus::Pending {
                return tx_abort(WorkflowError::InvalidTransition {
                    action: "cancel",
                    status: request.status,
                });
            }
            request.status = RequestStatus::Cancelled;
            let entry = AuditEntry::new(
                request.id.clone(),
                actor.id.clone(),
                AuditAction::Cancel,
                Some(RequestStatus::Pending),
                RequestStatus::Cancelled,
                TimeStamp::new(),
            );
            chain_entry(tx, &mut request, entry)?;
            tx.insert(key.as_slice(), tx_encode(&request)?)?;
            Ok(request)
        }))?;

        info!("request {} cancelled by {}", request_id, actor.id);
        Ok(cancelled)
    }

    /// Soft delete. Pending-only; the row disappears from active queries
    /// but stays on disk with its audit trail.
    pub fn delete_request(
        &self,
        request_id: &str,
        actor: &Actor,
    ) -> Result<(), WorkflowError> {
        let key = store::request_key(request_id);
        run_tx(self.store.db().transaction(|tx| {
            let mut request = load_active(tx, &key, request_id)?;
            if actor.id != request.requested_by && !actor.is_admin() {
                return tx_abort(WorkflowError::Unauthorized {
                    actor: actor.id.clone(),
                    action: "delete",
                });
            }
            if request.status != RequestStatus::Pending {
                return tx_abort(WorkflowError::InvalidTransition {
                    action: "delete",
                    status: request.status,
                });
            }
            let now = TimeStamp::new();
            request.deleted_at = Some(now.clone());
            let entry = AuditEntry::new(
                request.id.clone(),
                actor.id.clone(),
                AuditAction::Delete,
                Some(RequestStatus::Pending),
                RequestStatus::Pending,
                now,
            );
            chain_entry(tx, &mut request, entry)?;
            tx.insert(key.as_slice(), tx_encode(&request)?)?;
            Ok(())
        }))?;

        info!("request {} soft-deleted by {}", request_id, actor.id);
        Ok(())
    }

    /// The deferred mutation. `as_of` is the scheduler's clock reading; the
    /// transition to `applied` and the subject write commit together, so a
    /// duplicate invocation finds `is_applied` already set and gets
    /// `AlreadyApplied` without touching the subject again.
    pub fn apply_request(
        &self,
        request_id: &str,
        actor: &Actor,
        as_of: &TimeStamp<Utc>,
    ) -> Result<ChangeRequest, WorkflowError> {
        let key = store::request_key(request_id);
        let applied = run_tx(self.store.db().transaction(|tx| {
            let mut request = load_active(tx, &key, request_id)?;
            if request.is_applied || request.status == RequestStatus::Applied {
                return tx_abort(WorkflowError::AlreadyApplied(request.id));
            }
            if request.status != RequestStatus::Approved {
                return tx_abort(WorkflowError::InvalidTransition {
                    action: "apply",
                    status: request.status,
                });
            }
            if request.effective_date > *as_of {
                return tx_abort(WorkflowError::NotYetEffective {
                    id: request.id.clone(),
                    effective: request.effective_date.clone(),
                });
            }

            let emp_key = store::employee_key(&request.subject_id);
            let raw = match tx.get(emp_key.as_slice())? {
                Some(raw) => raw,
                None => return tx_abort(WorkflowError::SubjectNotFound(request.subject_id)),
            };
            let mut employee: EmployeeRecord = tx_decode(&raw)?;
            request.proposed_state.apply_to(&mut employee);
            tx.insert(emp_key.as_slice(), tx_encode(&employee)?)?;

            let now = TimeStamp::new();
            request.status = RequestStatus::Applied;
            request.is_applied = true;
            request.applied_at = Some(now.clone());
            let subject_after = snapshot::project(
                &request.previous_state,
                &request.proposed_state,
                &request.proposed_names,
            );
            let entry = AuditEntry::new(
                request.id.clone(),
                actor.id.clone(),
                AuditAction::Apply,
                Some(RequestStatus::Approved),
                RequestStatus::Applied,
                now,
            )
            .with_subject_after(subject_after);
            chain_entry(tx, &mut request, entry)?;
            tx.insert(key.as_slice(), tx_encode(&request)?)?;
            Ok(request)
        }))?;

        info!(
            "request {} applied to subject {}",
            request_id, applied.subject_id
        );
        Ok(applied)
    }

    /// Approved, unapplied and due on or before `as_of`, effective date
    /// ascending. Intended to be driven by an external scheduler.
    pub fn list_due_for_application(
        &self,
        tenant_id: Option<&str>,
        as_of: &TimeStamp<Utc>,
    ) -> Result<Vec<ChangeRequest>, WorkflowError> {
        self.store.list_due(tenant_id, as_of)
    }

    /// Apply everything due, sequentially within each tenant (tenants in
    /// deterministic id order). Skips are reported, not raised; overlapping
    /// sweep runs lose individual races as `AlreadyApplied` skips.
    pub fn apply_due(
        &self,
        actor: &Actor,
        as_of: &TimeStamp<Utc>,
    ) -> Result<SweepReport, WorkflowError> {
        let due = self.store.list_due(None, as_of)?;
        let mut by_tenant: BTreeMap<String, Vec<ChangeRequest>> = BTreeMap::new();
        for request in due {
            by_tenant
                .entry(request.tenant_id.clone())
                .or_default()
                .push(request);
        }

        let mut report = SweepReport::default();
        for (tenant_id, batch) in by_tenant {
            debug!("sweeping {} due request(s) for tenant {tenant_id}", batch.len());
            for request in batch {
                match self.apply_request(&request.id, actor, as_of) {
                    Ok(_) => report.applied.push(request.id),
                    Err(e) => {
                        warn!("sweep skipped request {}: {e}", request.id);
                        report.skipped.push((request.id, e));
                    }
                }
            }
        }
        Ok(report)
    }

    pub fn get_request(&self, request_id: &str) -> Result<ChangeRequest, WorkflowError> {
        self.store
            .request(request_id)?
            .ok_or_else(|| WorkflowError::NotFound(request_id.to_string()))
    }

    /// Tenant-scoped listing gated by the caller's accessible-tenant set; a
    /// tenant outside the set yields an empty page rather than an error.
    pub fn list_requests(
        &self,
        tenant_id: &str,
        access: &TenantAccess,
        filter: &RequestFilter,
        page: &PageRequest,
    ) -> Result<Page<ChangeRequest>, WorkflowError> {
        if !access.allows(tenant_id) {
            debug!("tenant {tenant_id} outside caller access set");
            return Ok(Page::empty(*page));
        }
        self.store.list_by_tenant(tenant_id, filter, page)
    }

    pub fn subject_requests(
        &self,
        subject_id: &str,
    ) -> Result<Vec<ChangeRequest>, WorkflowError> {
        self.store.list_by_subject(subject_id)
    }

    pub fn requests_with_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<ChangeRequest>, WorkflowError> {
        self.store.list_by_status(status)
    }

    /// Advisory pre-approval check: errors with `ConflictingChangeExists`
    /// when another approved-but-unapplied request would mutate any of the
    /// same subject fields. Callers decide whether to block on it.
    pub fn ensure_no_conflicting_change(
        &self,
        request_id: &str,
    ) -> Result<(), WorkflowError> {
        let request = self.get_request(request_id)?;
        for other in self.store.list_by_subject(&request.subject_id)? {
            if other.id == request.id {
                continue;
            }
            if other.status == RequestStatus::Approved
                && !other.is_applied
                && other.proposed_state.overlaps(&request.proposed_state)
            {
                return Err(WorkflowError::ConflictingChangeExists {
                    subject_id: request.subject_id.clone(),
                    conflicting_id: other.id,
                });
            }
        }
        Ok(())
    }

    pub fn audit_trail(&self, request_id: &str) -> Result<Vec<AuditEntry>, WorkflowError> {
        self.store.audit_entries(request_id)
    }

    pub fn verify_audit_trail(&self, request_id: &str) -> Result<bool, WorkflowError> {
        let entries = self.store.audit_entries(request_id)?;
        audit::verify_chain(&entries)
    }

    fn resolve_employee_names(
        &self,
        employee: &EmployeeRecord,
    ) -> Result<RefNames, WorkflowError> {
        let grade_name = match &employee.grade_id {
            Some(id) => Some(self.display_or_id(RefKind::Grade, id)?),
            None => None,
        };
        Ok(RefNames {
            company_name: self.display_or_id(RefKind::Company, &employee.company_id)?,
            department_name: self.display_or_id(RefKind::Department, &employee.department_id)?,
            position_name: self.display_or_id(RefKind::Position, &employee.position_id)?,
            grade_name,
        })
    }

    // a dangling reference on the employee record degrades to the raw id;
    // reference integrity is the CRUD layer's problem, not this one's
    fn display_or_id(&self, kind: RefKind, id: &str) -> Result<String, WorkflowError> {
        match self.store.reference_name(kind, id)? {
            Some(name) => Ok(name),
            None => {
                warn!("unresolved {kind} reference {id}, falling back to id");
                Ok(id.to_string())
            }
        }
    }

    fn resolve_proposed_names(&self, change: &ChangeSet) -> Result<ProposedNames, WorkflowError> {
        let mut names = ProposedNames::default();
        if let Some(id) = change.new_position_id() {
            names.position_name = Some(self.require_name(RefKind::Position, id)?);
        }
        if let Some(id) = change.new_department_id() {
            names.department_name = Some(self.require_name(RefKind::Department, id)?);
        }
        if let Some(id) = change.new_grade_id() {
            names.grade_name = Some(self.require_name(RefKind::Grade, id)?);
        }
        Ok(names)
    }

    // proposing a move into an entity that does not exist is a caller error
    fn require_name(&self, kind: RefKind, id: &str) -> Result<String, WorkflowError> {
        self.store
            .reference_name(kind, id)?
            .ok_or_else(|| WorkflowError::Validation(format!("unknown {kind} id: {id}")))
    }
}
