//! Storage seams used by the identity services.
//!
//! Every backend must report a violated uniqueness constraint as
//! [`StoreError::UniqueViolation`] naming the key, separately from generic
//! failures, so callers can turn a lost create race into an update.

use async_trait::async_trait;

use crate::models::audit_log::AuditLog;
use crate::models::role::Role;
use crate::models::user::{NewUser, User};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    SubjectId,
    Email,
    Handle,
    RoleName,
    Other,
}

impl std::fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UniqueKey::SubjectId => "subject_id",
            UniqueKey::Email => "email",
            UniqueKey::Handle => "handle",
            UniqueKey::RoleName => "role_name",
            UniqueKey::Other => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated on {0}")]
    UniqueViolation(UniqueKey),

    #[error("record not found")]
    NotFound,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(ref db_err) if db_err.code().as_deref() == Some("23505") => {
                StoreError::UniqueViolation(unique_key_for(db_err.constraint()))
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

/// Maps constraint names from the migrations onto the key they guard.
pub fn unique_key_for(constraint: Option<&str>) -> UniqueKey {
    match constraint {
        Some("users_pkey") => UniqueKey::SubjectId,
        Some("users_email_key") => UniqueKey::Email,
        Some("users_handle_key") => UniqueKey::Handle,
        Some("roles_name_lower_key") => UniqueKey::RoleName,
        _ => UniqueKey::Other,
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_subject(&self, subject_id: &str) -> StoreResult<Option<User>>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn find_by_handle(&self, handle: &str) -> StoreResult<Option<User>>;

    async fn create_user(&self, user: &NewUser) -> StoreResult<User>;

    /// Writes `user` over the stored row, keyed by its subject id, and returns
    /// the row as stored.
    ///
    /// `user` may come from a stale read. The write never moves the lifecycle
    /// backwards, never clears a non-null profile column and never rewinds
    /// `last_login_at`; the stored value wins in each of those cases.
    async fn update_user(&self, user: &User) -> StoreResult<User>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Case-insensitive lookup.
    async fn find_role(&self, name: &str) -> StoreResult<Option<Role>>;

    async fn create_role(&self, name: &str) -> StoreResult<Role>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditLog) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_constraints_map_to_keys() {
        assert_eq!(unique_key_for(Some("users_pkey")), UniqueKey::SubjectId);
        assert_eq!(unique_key_for(Some("users_email_key")), UniqueKey::Email);
        assert_eq!(unique_key_for(Some("users_handle_key")), UniqueKey::Handle);
        assert_eq!(unique_key_for(Some("something_else")), UniqueKey::Other);
        assert_eq!(unique_key_for(None), UniqueKey::Other);
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::NotFound
        ));
    }
}
