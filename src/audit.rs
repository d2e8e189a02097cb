//! Hash-chained audit entries, one per workflow transition
//!
//! Each entry records who did what, the statuses either side of the
//! transition, and the sha256 of the previous entry. The chain head lives on
//! the request record, so extending the chain and flipping status are the
//! same conditional write.

use crate::error::WorkflowError;
use crate::request::RequestStatus;
use crate::snapshot::SubjectSnapshot;
use crate::subject::TimeStamp;
use chrono::Utc;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    #[n(0)]
    Submit,
    #[n(1)]
    Update,
    #[n(2)]
    Approve,
    #[n(3)]
    Reject,
    #[n(4)]
    Cancel,
    #[n(5)]
    Apply,
    #[n(6)]
    Delete,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuditAction::Submit => "submit",
            AuditAction::Update => "update",
            AuditAction::Approve => "approve",
            AuditAction::Reject => "reject",
            AuditAction::Cancel => "cancel",
            AuditAction::Apply => "apply",
            AuditAction::Delete => "delete",
        };
        f.write_str(label)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    #[n(0)]
    pub seq: u64,
    #[n(1)]
    pub request_id: String,
    #[n(2)]
    pub actor: String,
    #[n(3)]
    pub action: AuditAction,
    #[n(4)]
    pub before_status: Option<RequestStatus>,
    #[n(5)]
    pub after_status: RequestStatus,
    #[n(6)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(7)]
    pub note: Option<String>,
    #[n(8)]
    pub subject_after: Option<SubjectSnapshot>,
    #[n(9)]
    pub prev_hash: Option<String>,
}

impl AuditEntry {
    pub fn new(
        request_id: impl Into<String>,
        actor: impl Into<String>,
        action: AuditAction,
        before_status: Option<RequestStatus>,
        after_status: RequestStatus,
        recorded_at: TimeStamp<Utc>,
    ) -> Self {
        Self {
            seq: 0,
            request_id: request_id.into(),
            actor: actor.into(),
            action,
            before_status,
            after_status,
            recorded_at,
            note: None,
            subject_after: None,
            prev_hash: None,
        }
    }
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
    pub fn with_subject_after(mut self, snapshot: SubjectSnapshot) -> Self {
        self.subject_after = Some(snapshot);
        self
    }

    pub fn build(&self) -> Result<(String, Vec<u8>), WorkflowError> {
        let cbor = minicbor::to_vec(self).map_err(|e| WorkflowError::Codec(e.to_string()))?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

/// Walk the chain: sequence numbers must be contiguous from zero and every
/// entry's `prev_hash` must equal the recomputed hash of its predecessor.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<bool, WorkflowError> {
    let mut prev: Option<String> = None;
    for (index, entry) in entries.iter().enumerate() {
        if entry.seq != index as u64 {
            return Ok(false);
        }
        if entry.prev_hash != prev {
            return Ok(false);
        }
        let (hash, _) = entry.build()?;
        prev = Some(hash);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_encoding() {
        let original = AuditEntry::new(
            "req_1",
            "user_1",
            AuditAction::Approve,
            Some(RequestStatus::Pending),
            RequestStatus::Approved,
            TimeStamp::new(),
        )
        .with_note(Some("looks right".into()));

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: AuditEntry = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn chain_of_one_verifies() {
        let entry = AuditEntry::new(
            "req_1",
            "user_1",
            AuditAction::Submit,
            None,
            RequestStatus::Pending,
            TimeStamp::new(),
        );
        assert!(verify_chain(&[entry]).unwrap());
    }

    #[test]
    fn broken_linkage_fails_verification() {
        let first = AuditEntry::new(
            "req_1",
            "user_1",
            AuditAction::Submit,
            None,
            RequestStatus::Pending,
            TimeStamp::new(),
        );
        let mut second = AuditEntry::new(
            "req_1",
            "user_2",
            AuditAction::Approve,
            Some(RequestStatus::Pending),
            RequestStatus::Approved,
            TimeStamp::new(),
        );
        second.seq = 1;
        second.prev_hash = Some("not the real hash".into());

        assert!(!verify_chain(&[first, second]).unwrap());
    }
}
