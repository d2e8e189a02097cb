//! Sled-backed persistence for requests, subjects, references and audit
//! entries. Everything lives in the default tree under prefixed keys so a
//! single transaction can cover a request, its subject and its audit entry.

use crate::audit::AuditEntry;
use crate::error::WorkflowError;
use crate::request::{ChangeKind, ChangeRequest, RequestStatus};
use crate::subject::{EmployeeRecord, NamedRef, RefKind, TimeStamp};
use chrono::Utc;
use log::debug;
use std::sync::Arc;

pub(crate) fn request_key(id: &str) -> Vec<u8> {
    format!("req/{id}").into_bytes()
}
pub(crate) fn employee_key(id: &str) -> Vec<u8> {
    format!("emp/{id}").into_bytes()
}
pub(crate) fn reference_key(kind: RefKind, id: &str) -> Vec<u8> {
    format!("ref/{}/{id}", kind.key_prefix()).into_bytes()
}
// zero-padded so lexicographic key order is sequence order
pub(crate) fn audit_key(request_id: &str, seq: u64) -> Vec<u8> {
    format!("audit/{request_id}/{seq:08}").into_bytes()
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: T) -> Result<Vec<u8>, WorkflowError> {
    minicbor::to_vec(value).map_err(|e| WorkflowError::Codec(e.to_string()))
}

pub(crate) fn decode<T: for<'b> minicbor::Decode<'b, ()>>(
    bytes: &[u8],
) -> Result<T, WorkflowError> {
    minicbor::decode(bytes).map_err(|e| WorkflowError::Codec(e.to_string()))
}

/// Offset-based page request. Limits are clamped to `MAX_PAGE_SIZE`.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

pub const MAX_PAGE_SIZE: usize = 200;

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 20,
        }
    }
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
    fn clamped_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }
}

/// One page of results plus the total count, both produced by the same scan
/// so `total_pages` and `items` agree with each other. The scan itself is
/// not a frozen snapshot of the tree; a concurrent writer can shift totals
/// by the time the caller reads them.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    pub fn empty(page: PageRequest) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            offset: page.offset,
            limit: page.clamped_limit(),
        }
    }
    pub fn total_pages(&self) -> usize {
        if self.limit == 0 {
            0
        } else {
            self.total.div_ceil(self.limit)
        }
    }
}

/// Filters for tenant-scoped request listings. `include_deleted` widens the
/// query to soft-deleted rows; every other path sees active records only.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub kind: Option<ChangeKind>,
    pub subject_id: Option<String>,
    pub effective_on_or_before: Option<TimeStamp<Utc>>,
    pub include_deleted: bool,
}

impl RequestFilter {
    fn matches(&self, request: &ChangeRequest) -> bool {
        if !self.include_deleted && !request.is_active() {
            return false;
        }
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if request.kind != kind {
                return false;
            }
        }
        if let Some(subject_id) = &self.subject_id {
            if &request.subject_id != subject_id {
                return false;
            }
        }
        if let Some(bound) = &self.effective_on_or_before {
            if request.effective_date > *bound {
                return false;
            }
        }
        true
    }
}

/// Handle over an externally-constructed sled database. Cloning shares the
/// underlying `Arc`.
#[derive(Clone)]
pub struct WorkflowStore {
    db: Arc<sled::Db>,
}

impl WorkflowStore {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    // -- seeding, owned by the external CRUD layer in production --

    pub fn put_employee(&self, employee: &EmployeeRecord) -> Result<(), WorkflowError> {
        self.db
            .insert(employee_key(&employee.id), encode(employee)?)?;
        Ok(())
    }

    pub fn put_reference(&self, kind: RefKind, entity: &NamedRef) -> Result<(), WorkflowError> {
        self.db
            .insert(reference_key(kind, &entity.id), encode(entity)?)?;
        Ok(())
    }

    // -- reference reads --

    pub fn employee(&self, id: &str) -> Result<Option<EmployeeRecord>, WorkflowError> {
        match self.db.get(employee_key(id))? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn reference_name(&self, kind: RefKind, id: &str) -> Result<Option<String>, WorkflowError> {
        match self.db.get(reference_key(kind, id))? {
            Some(raw) => {
                let entity: NamedRef = decode(&raw)?;
                Ok(Some(entity.name))
            }
            None => Ok(None),
        }
    }

    // -- request reads --

    /// Raw lookup, soft-deleted rows included.
    pub fn request_any(&self, id: &str) -> Result<Option<ChangeRequest>, WorkflowError> {
        match self.db.get(request_key(id))? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Lookup as every active query sees it: soft-deleted rows are absent.
    pub fn request(&self, id: &str) -> Result<Option<ChangeRequest>, WorkflowError> {
        Ok(self.request_any(id)?.filter(ChangeRequest::is_active))
    }

    fn scan_requests(&self) -> Result<Vec<ChangeRequest>, WorkflowError> {
        let mut requests = Vec::new();
        for item in self.db.scan_prefix(b"req/") {
            let (_, raw) = item?;
            requests.push(decode(&raw)?);
        }
        Ok(requests)
    }

    pub fn list_by_subject(&self, subject_id: &str) -> Result<Vec<ChangeRequest>, WorkflowError> {
        let mut requests: Vec<ChangeRequest> = self
            .scan_requests()?
            .into_iter()
            .filter(|r| r.is_active() && r.subject_id == subject_id)
            .collect();
        sort_newest_first(&mut requests);
        Ok(requests)
    }

    pub fn list_by_status(&self, status: RequestStatus) -> Result<Vec<ChangeRequest>, WorkflowError> {
        let mut requests: Vec<ChangeRequest> = self
            .scan_requests()?
            .into_iter()
            .filter(|r| r.is_active() && r.status == status)
            .collect();
        sort_newest_first(&mut requests);
        Ok(requests)
    }

    /// Tenant-scoped listing. The page slice and the total come from one
    /// pass over the same scan.
    pub fn list_by_tenant(
        &self,
        tenant_id: &str,
        filter: &RequestFilter,
        page: &PageRequest,
    ) -> Result<Page<ChangeRequest>, WorkflowError> {
        let mut matches: Vec<ChangeRequest> = self
            .scan_requests()?
            .into_iter()
            .filter(|r| r.tenant_id == tenant_id && filter.matches(r))
            .collect();
        sort_newest_first(&mut matches);

        let total = matches.len();
        let limit = page.clamped_limit();
        let items: Vec<ChangeRequest> =
            matches.into_iter().skip(page.offset).take(limit).collect();
        debug!("tenant {tenant_id}: {total} matching requests, returning {}", items.len());

        Ok(Page {
            items,
            total,
            offset: page.offset,
            limit,
        })
    }

    /// Approved, unapplied, due on or before `as_of`, effective date
    /// ascending. This is the sweep's work list.
    pub fn list_due(
        &self,
        tenant_id: Option<&str>,
        as_of: &TimeStamp<Utc>,
    ) -> Result<Vec<ChangeRequest>, WorkflowError> {
        let mut due: Vec<ChangeRequest> = self
            .scan_requests()?
            .into_iter()
            .filter(|r| {
                r.is_active()
                    && r.status == RequestStatus::Approved
                    && !r.is_applied
                    && r.effective_date <= *as_of
                    && tenant_id.is_none_or(|t| r.tenant_id == t)
            })
            .collect();
        due.sort_by(|a, b| {
            a.effective_date
                .cmp(&b.effective_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(due)
    }

    // -- audit reads --

    pub fn audit_entries(&self, request_id: &str) -> Result<Vec<AuditEntry>, WorkflowError> {
        let prefix = format!("audit/{request_id}/");
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, raw) = item?;
            entries.push(decode(&raw)?);
        }
        Ok(entries)
    }
}

fn sort_newest_first(requests: &mut [ChangeRequest]) {
    requests.sort_by(|a, b| {
        b.requested_at
            .cmp(&a.requested_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
