//! Admin console data layer: records, forms, mutations and the console facade.

/// Form state bound to controller outcomes.
pub mod form;
/// Records exchanged with the backend.
pub mod model;
/// Cache-reconciling mutations on list and profile keys.
pub mod mutations;
/// Request bodies and their validation rules.
pub mod requests;
/// Session-scoped entry point for every screen.
pub mod service;

/// Query keys used by the console.
pub mod keys {
    use crate::types::QueryKey;

    use super::model::{Role, UserId};

    /// Signed-in session.
    pub fn session() -> QueryKey {
        QueryKey::new("session")
    }

    /// Profile of user `id`.
    pub fn profile(id: UserId) -> QueryKey {
        QueryKey::new("userProfile").with(id)
    }

    /// User management list.
    pub fn users() -> QueryKey {
        QueryKey::new("users")
    }

    /// Password formatter rules.
    pub fn formatters() -> QueryKey {
        QueryKey::new("passwordFormatters")
    }

    /// Dashboard counters for `role`.
    pub fn dashboard(role: Role) -> QueryKey {
        QueryKey::new("dashboard").with(role.as_str())
    }
}
