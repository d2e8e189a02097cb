//! Point-in-time subject snapshots and proposal deltas
//!
//! Everything here is pure: given the same subject record, resolved names
//! and proposed change, the outputs are identical. Writes happen elsewhere.

use crate::error::WorkflowError;
use crate::request::ChangeSet;
use crate::subject::{EmployeeRecord, EmploymentStatus};

/// A fully-denormalized capture of the subject at proposal time. Ids and
/// display names are both stored so the record stays readable after the
/// referenced entities are renamed or deleted.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SubjectSnapshot {
    #[n(0)]
    pub employee_id: String,
    #[n(1)]
    pub employee_name: String,
    #[n(2)]
    pub company_id: String,
    #[n(3)]
    pub company_name: String,
    #[n(4)]
    pub department_id: String,
    #[n(5)]
    pub department_name: String,
    #[n(6)]
    pub position_id: String,
    #[n(7)]
    pub position_name: String,
    #[n(8)]
    pub grade_id: Option<String>,
    #[n(9)]
    pub grade_name: Option<String>,
    #[n(10)]
    pub salary: u64,
    #[n(11)]
    pub status: EmploymentStatus,
}

/// Display names for the entities a proposal references, resolved when the
/// request is created and never re-resolved afterwards.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposedNames {
    #[n(0)]
    pub position_name: Option<String>,
    #[n(1)]
    pub department_name: Option<String>,
    #[n(2)]
    pub grade_name: Option<String>,
}

/// Numeric differences derived once at proposal time. `salary_delta_pct` is
/// `None` when the old salary is zero or the proposal carries no salary.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq)]
pub struct ChangeDeltas {
    #[n(0)]
    pub salary_delta: Option<i64>,
    #[n(1)]
    pub salary_delta_pct: Option<f64>,
}

/// Resolved display names for the fields currently on the employee record.
#[derive(Debug, Clone)]
pub struct RefNames {
    pub company_name: String,
    pub department_name: String,
    pub position_name: String,
    pub grade_name: Option<String>,
}

pub fn capture(employee: &EmployeeRecord, names: &RefNames) -> SubjectSnapshot {
    SubjectSnapshot {
        employee_id: employee.id.clone(),
        employee_name: employee.name.clone(),
        company_id: employee.company_id.clone(),
        company_name: names.company_name.clone(),
        department_id: employee.department_id.clone(),
        department_name: names.department_name.clone(),
        position_id: employee.position_id.clone(),
        position_name: names.position_name.clone(),
        grade_id: employee.grade_id.clone(),
        grade_name: names.grade_name.clone(),
        salary: employee.salary,
        status: employee.status,
    }
}

/// Project the post-application state from the previous snapshot and the
/// proposal. Names come from `ProposedNames`, so the projection reflects
/// what was true at proposal time regardless of when it is computed.
pub fn project(
    previous: &SubjectSnapshot,
    change: &ChangeSet,
    names: &ProposedNames,
) -> SubjectSnapshot {
    let mut next = previous.clone();
    if let Some(position_id) = change.new_position_id() {
        next.position_id = position_id.to_string();
        next.position_name = names
            .position_name
            .clone()
            .unwrap_or_else(|| position_id.to_string());
    }
    if let Some(department_id) = change.new_department_id() {
        next.department_id = department_id.to_string();
        next.department_name = names
            .department_name
            .clone()
            .unwrap_or_else(|| department_id.to_string());
    }
    if let Some(grade_id) = change.new_grade_id() {
        next.grade_id = Some(grade_id.to_string());
        next.grade_name = Some(
            names
                .grade_name
                .clone()
                .unwrap_or_else(|| grade_id.to_string()),
        );
    }
    if let Some(salary) = change.proposed_salary() {
        next.salary = salary;
    }
    if let ChangeSet::StatusChange { new_status } = change {
        next.status = *new_status;
    }
    next
}

pub fn compute_deltas(previous: &SubjectSnapshot, change: &ChangeSet) -> ChangeDeltas {
    let proposed = change.proposed_salary();
    let salary_delta = proposed.map(|new| new as i64 - previous.salary as i64);
    let salary_delta_pct = match (proposed, previous.salary) {
        (Some(_), 0) => None,
        (Some(new), old) => Some((new as f64 - old as f64) / old as f64 * 100.0),
        (None, _) => None,
    };
    ChangeDeltas {
        salary_delta,
        salary_delta_pct,
    }
}

// the digest is what makes the write-once snapshot checkable later
pub fn digest(snapshot: &SubjectSnapshot) -> Result<String, WorkflowError> {
    let cbor = minicbor::to_vec(snapshot).map_err(|e| WorkflowError::Codec(e.to_string()))?;
    Ok(sha256::digest(&cbor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_salary(salary: u64) -> SubjectSnapshot {
        SubjectSnapshot {
            employee_id: "emp_1".into(),
            employee_name: "Sari".into(),
            company_id: "co_1".into(),
            company_name: "Acme".into(),
            department_id: "dept_1".into(),
            department_name: "Engineering".into(),
            position_id: "pos_1".into(),
            position_name: "Engineer".into(),
            grade_id: Some("grade_3".into()),
            grade_name: Some("Grade III".into()),
            salary,
            status: EmploymentStatus::Active,
        }
    }

    #[test]
    fn salary_delta_and_percentage() {
        let previous = snapshot_with_salary(10_000_000);
        let change = ChangeSet::SalaryAdjustment {
            new_salary: 12_000_000,
        };

        let deltas = compute_deltas(&previous, &change);
        assert_eq!(deltas.salary_delta, Some(2_000_000));
        assert_eq!(deltas.salary_delta_pct, Some(20.0));
    }

    #[test]
    fn zero_previous_salary_leaves_percentage_unset() {
        let previous = snapshot_with_salary(0);
        let change = ChangeSet::SalaryAdjustment {
            new_salary: 5_000_000,
        };

        let deltas = compute_deltas(&previous, &change);
        assert_eq!(deltas.salary_delta, Some(5_000_000));
        assert_eq!(deltas.salary_delta_pct, None);
    }

    #[test]
    fn non_salary_change_has_no_deltas() {
        let previous = snapshot_with_salary(10_000_000);
        let change = ChangeSet::DepartmentChange {
            new_department_id: "dept_2".into(),
        };

        let deltas = compute_deltas(&previous, &change);
        assert_eq!(deltas.salary_delta, None);
        assert_eq!(deltas.salary_delta_pct, None);
    }

    #[test]
    fn projection_uses_proposal_time_names() {
        let previous = snapshot_with_salary(10_000_000);
        let change = ChangeSet::Transfer {
            new_department_id: "dept_2".into(),
            new_position_id: None,
        };
        let names = ProposedNames {
            department_name: Some("Platform".into()),
            ..ProposedNames::default()
        };

        let next = project(&previous, &change, &names);
        assert_eq!(next.department_id, "dept_2");
        assert_eq!(next.department_name, "Platform");
        // untouched fields carry over
        assert_eq!(next.position_id, previous.position_id);
        assert_eq!(next.salary, previous.salary);
    }

    #[test]
    fn digest_is_stable() {
        let snapshot = snapshot_with_salary(10_000_000);
        let first = digest(&snapshot).unwrap();
        let second = digest(&snapshot).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }
}
