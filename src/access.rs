//! Actor identity and tenant visibility, supplied by the external
//! authorization layer on every call. The workflow never resolves roles or
//! company access lists itself.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Staff,
    Approver,
    Admin,
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
    pub fn can_decide(&self) -> bool {
        matches!(self.role, Role::Approver | Role::Admin)
    }
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// The opaque set of tenant ids the caller may see. A query for a tenant
/// outside the set returns empty results, never an error.
#[derive(Debug, Clone, Default)]
pub struct TenantAccess(Vec<String>);

impl TenantAccess {
    pub fn new(tenant_ids: Vec<String>) -> Self {
        Self(tenant_ids)
    }
    pub fn allows(&self, tenant_id: &str) -> bool {
        self.0.iter().any(|id| id == tenant_id)
    }
}
