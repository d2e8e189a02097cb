//! Change requests and the typed change sets they carry

use crate::error::WorkflowError;
use crate::snapshot::{self, ChangeDeltas, ProposedNames, SubjectSnapshot};
use crate::subject::{EmployeeRecord, EmploymentStatus, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Applied,
    #[n(4)]
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Rejected | RequestStatus::Applied | RequestStatus::Cancelled
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Applied => "applied",
            RequestStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    #[n(0)]
    Promotion,
    #[n(1)]
    Transfer,
    #[n(2)]
    SalaryAdjustment,
    #[n(3)]
    DepartmentChange,
    #[n(4)]
    StatusChange,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Promotion => "promotion",
            ChangeKind::Transfer => "transfer",
            ChangeKind::SalaryAdjustment => "salary_adjustment",
            ChangeKind::DepartmentChange => "department_change",
            ChangeKind::StatusChange => "status_change",
        };
        f.write_str(label)
    }
}

/// Subject fields a change set can touch. Used by the conflict advisory to
/// decide whether two proposals overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectField {
    Position,
    Department,
    Grade,
    Salary,
    Status,
}

/// The proposed change, one variant per change kind. Each variant carries
/// exactly the fields that kind may touch; anything not present is left
/// untouched on the subject when the request is applied.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum ChangeSet {
    #[n(0)]
    Promotion {
        #[n(0)]
        new_position_id: String,
        #[n(1)]
        new_grade_id: Option<String>,
        #[n(2)]
        new_salary: Option<u64>,
    },
    #[n(1)]
    Transfer {
        #[n(0)]
        new_department_id: String,
        #[n(1)]
        new_position_id: Option<String>,
    },
    #[n(2)]
    SalaryAdjustment {
        #[n(0)]
        new_salary: u64,
    },
    #[n(3)]
    DepartmentChange {
        #[n(0)]
        new_department_id: String,
    },
    #[n(4)]
    StatusChange {
        #[n(0)]
        new_status: EmploymentStatus,
    },
}

impl ChangeSet {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeSet::Promotion { .. } => ChangeKind::Promotion,
            ChangeSet::Transfer { .. } => ChangeKind::Transfer,
            ChangeSet::SalaryAdjustment { .. } => ChangeKind::SalaryAdjustment,
            ChangeSet::DepartmentChange { .. } => ChangeKind::DepartmentChange,
            ChangeSet::StatusChange { .. } => ChangeKind::StatusChange,
        }
    }

    /// The salary this change proposes, if it proposes one.
    pub fn proposed_salary(&self) -> Option<u64> {
        match self {
            ChangeSet::Promotion { new_salary, .. } => *new_salary,
            ChangeSet::SalaryAdjustment { new_salary } => Some(*new_salary),
            _ => None,
        }
    }

    pub fn new_position_id(&self) -> Option<&str> {
        match self {
            ChangeSet::Promotion {
                new_position_id, ..
            } => Some(new_position_id),
            ChangeSet::Transfer {
                new_position_id, ..
            } => new_position_id.as_deref(),
            _ => None,
        }
    }

    pub fn new_department_id(&self) -> Option<&str> {
        match self {
            ChangeSet::Transfer {
                new_department_id, ..
            }
            | ChangeSet::DepartmentChange { new_department_id } => Some(new_department_id),
            _ => None,
        }
    }

    pub fn new_grade_id(&self) -> Option<&str> {
        match self {
            ChangeSet::Promotion { new_grade_id, .. } => new_grade_id.as_deref(),
            _ => None,
        }
    }

    /// The subject fields this change would mutate when applied.
    pub fn touched_fields(&self) -> Vec<SubjectField> {
        let mut fields = Vec::new();
        if self.new_position_id().is_some() {
            fields.push(SubjectField::Position);
        }
        if self.new_department_id().is_some() {
            fields.push(SubjectField::Department);
        }
        if self.new_grade_id().is_some() {
            fields.push(SubjectField::Grade);
        }
        if self.proposed_salary().is_some() {
            fields.push(SubjectField::Salary);
        }
        if matches!(self, ChangeSet::StatusChange { .. }) {
            fields.push(SubjectField::Status);
        }
        fields
    }

    pub fn overlaps(&self, other: &ChangeSet) -> bool {
        let theirs = other.touched_fields();
        self.touched_fields().iter().any(|f| theirs.contains(f))
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        match self {
            ChangeSet::Promotion {
                new_position_id,
                new_salary,
                ..
            } => {
                if new_position_id.is_empty() {
                    return Err(WorkflowError::Validation(
                        "promotion requires a target position".into(),
                    ));
                }
                if *new_salary == Some(0) {
                    return Err(WorkflowError::Validation(
                        "proposed salary is set to zero".into(),
                    ));
                }
            }
            ChangeSet::Transfer {
                new_department_id, ..
            }
            | ChangeSet::DepartmentChange { new_department_id } => {
                if new_department_id.is_empty() {
                    return Err(WorkflowError::Validation(
                        "transfer requires a target department".into(),
                    ));
                }
            }
            ChangeSet::SalaryAdjustment { new_salary } => {
                if *new_salary == 0 {
                    return Err(WorkflowError::Validation(
                        "proposed salary is set to zero".into(),
                    ));
                }
            }
            ChangeSet::StatusChange { .. } => {}
        }
        Ok(())
    }

    /// Write only the proposed fields onto the subject. Fields the proposal
    /// does not carry are left as they are.
    pub fn apply_to(&self, employee: &mut EmployeeRecord) {
        match self {
            ChangeSet::Promotion {
                new_position_id,
                new_grade_id,
                new_salary,
            } => {
                employee.position_id = new_position_id.clone();
                if let Some(grade) = new_grade_id {
                    employee.grade_id = Some(grade.clone());
                }
                if let Some(salary) = new_salary {
                    employee.salary = *salary;
                }
            }
            ChangeSet::Transfer {
                new_department_id,
                new_position_id,
            } => {
                employee.department_id = new_department_id.clone();
                if let Some(position) = new_position_id {
                    employee.position_id = position.clone();
                }
            }
            ChangeSet::SalaryAdjustment { new_salary } => {
                employee.salary = *new_salary;
            }
            ChangeSet::DepartmentChange { new_department_id } => {
                employee.department_id = new_department_id.clone();
            }
            ChangeSet::StatusChange { new_status } => {
                employee.status = *new_status;
            }
        }
    }
}

/// The central workflow entity. `previous_state`, `previous_digest` and
/// `computed_deltas` are written once at creation; `audit_seq` and
/// `last_audit_hash` are the head of the request's audit chain.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct ChangeRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub subject_id: String,
    #[n(2)]
    pub tenant_id: String,
    #[n(3)]
    pub kind: ChangeKind,
    #[n(4)]
    pub effective_date: TimeStamp<Utc>,
    #[n(5)]
    pub previous_state: SubjectSnapshot,
    #[n(6)]
    pub previous_digest: String,
    #[n(7)]
    pub proposed_state: ChangeSet,
    #[n(8)]
    pub proposed_names: ProposedNames,
    #[n(9)]
    pub computed_deltas: ChangeDeltas,
    #[n(10)]
    pub status: RequestStatus,
    #[n(11)]
    pub requested_by: String,
    #[n(12)]
    pub requested_at: TimeStamp<Utc>,
    #[n(13)]
    pub approved_by: Option<String>,
    #[n(14)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(15)]
    pub approval_notes: Option<String>,
    #[n(16)]
    pub rejected_by: Option<String>,
    #[n(17)]
    pub rejected_at: Option<TimeStamp<Utc>>,
    #[n(18)]
    pub rejection_reason: Option<String>,
    #[n(19)]
    pub is_applied: bool,
    #[n(20)]
    pub applied_at: Option<TimeStamp<Utc>>,
    #[n(21)]
    pub deleted_at: Option<TimeStamp<Utc>>,
    #[n(22)]
    pub audit_seq: u64,
    #[n(23)]
    pub last_audit_hash: Option<String>,
}

impl ChangeRequest {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Recompute the snapshot digest and compare against the one taken at
    /// creation. A mismatch means the write-once snapshot was altered.
    pub fn verify_previous_state(&self) -> Result<bool, WorkflowError> {
        Ok(snapshot::digest(&self.previous_state)? == self.previous_digest)
    }
}

/// What a caller supplies to open a request.
#[derive(Debug, Clone)]
pub struct RequestDraft {
    pub subject_id: String,
    pub tenant_id: String,
    pub effective_date: TimeStamp<Utc>,
    pub proposed: ChangeSet,
}

/// The only fields an edit may touch. The snapshot, deltas and status are
/// not representable here; they belong to the transition methods alone.
#[derive(Debug, Clone, Default)]
pub struct RequestPatch {
    pub effective_date: Option<TimeStamp<Utc>>,
    pub change_set: Option<ChangeSet>,
}

impl RequestPatch {
    pub fn is_empty(&self) -> bool {
        self.effective_date.is_none() && self.change_set.is_none()
    }
}
