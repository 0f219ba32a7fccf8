//! In-process backend with the same uniqueness guarantees as the SQL schema.
//! Used by the test-suite and for running the service without PostgreSQL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::database::store::{
    AuditSink, IdentityStore, RoleStore, StoreError, StoreResult, UniqueKey,
};
use crate::models::audit_log::AuditLog;
use crate::models::role::Role;
use crate::models::user::{NewUser, User};
use crate::utils::time::now;

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    roles: Vec<Role>,
    audit: Vec<AuditLog>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    audit_down: AtomicBool,
    audit_written: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent audit append fail, simulating an unreachable sink.
    pub fn set_audit_down(&self, down: bool) {
        self.audit_down.store(down, Ordering::SeqCst);
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn users(&self) -> Vec<User> {
        self.lock().users.values().cloned().collect()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.lock().roles.clone()
    }

    pub fn audit_records(&self) -> Vec<AuditLog> {
        self.lock().audit.clone()
    }

    /// Waits until at least `count` audit records have landed.
    pub async fn wait_for_audit(&self, count: usize) -> Vec<AuditLog> {
        let wait = async {
            loop {
                let notified = self.audit_written.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                {
                    let state = self.lock();
                    if state.audit.len() >= count {
                        return state.audit.clone();
                    }
                }
                notified.await;
            }
        };
        match tokio::time::timeout(Duration::from_secs(5), wait).await {
            Ok(records) => records,
            Err(_) => self.audit_records(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_unique(state: &State, user: &User) -> StoreResult<()> {
        for other in state.users.values() {
            if other.subject_id == user.subject_id {
                continue;
            }
            if user.email.is_some() && other.email == user.email {
                return Err(StoreError::UniqueViolation(UniqueKey::Email));
            }
            if other.handle == user.handle {
                return Err(StoreError::UniqueViolation(UniqueKey::Handle));
            }
        }
        Ok(())
    }

    /// Same column rules as the SQL `UPDATE` in the Postgres store.
    fn merge_update(existing: &User, incoming: &User) -> User {
        let newer_login = match (existing.last_login_at, incoming.last_login_at) {
            (Some(stored), Some(at)) => at >= stored,
            (None, _) => true,
            (Some(_), None) => false,
        };
        User {
            subject_id: existing.subject_id.clone(),
            email: incoming.email.clone().or_else(|| existing.email.clone()),
            handle: incoming.handle.clone(),
            display_name: incoming.display_name.clone().or_else(|| existing.display_name.clone()),
            family_name: incoming.family_name.clone().or_else(|| existing.family_name.clone()),
            phone: incoming.phone.clone().or_else(|| existing.phone.clone()),
            birth_date: incoming.birth_date.or(existing.birth_date),
            role_id: incoming.role_id.or(existing.role_id),
            role_name: None,
            lifecycle_state: existing.lifecycle_state.max(incoming.lifecycle_state),
            is_active: existing.is_active,
            last_login_at: existing.last_login_at.max(incoming.last_login_at),
            last_login_ip: if newer_login {
                incoming.last_login_ip.clone().or_else(|| existing.last_login_ip.clone())
            } else {
                existing.last_login_ip.clone()
            },
            created_at: existing.created_at,
            updated_at: now(),
        }
    }

    fn with_role_name(state: &State, mut user: User) -> User {
        user.role_name = user
            .role_id
            .and_then(|id| state.roles.iter().find(|r| r.id == id))
            .map(|r| r.name.clone());
        user
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_by_subject(&self, subject_id: &str) -> StoreResult<Option<User>> {
        Ok(self.lock().users.get(subject_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_handle(&self, handle: &str) -> StoreResult<Option<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.handle == handle)
            .cloned())
    }

    async fn create_user(&self, new_user: &NewUser) -> StoreResult<User> {
        let mut state = self.lock();
        if state.users.contains_key(&new_user.subject_id) {
            return Err(StoreError::UniqueViolation(UniqueKey::SubjectId));
        }
        let ts = now();
        let user = User {
            subject_id: new_user.subject_id.clone(),
            email: Some(new_user.email.clone()),
            handle: new_user.handle.clone(),
            display_name: new_user.display_name.clone(),
            family_name: new_user.family_name.clone(),
            phone: new_user.phone.clone(),
            birth_date: new_user.birth_date,
            role_id: new_user.role_id,
            role_name: None,
            lifecycle_state: new_user.lifecycle_state,
            is_active: true,
            last_login_at: new_user.last_login_at,
            last_login_ip: new_user.last_login_ip.clone(),
            created_at: ts,
            updated_at: ts,
        };
        Self::check_unique(&state, &user)?;
        let user = Self::with_role_name(&state, user);
        state.users.insert(user.subject_id.clone(), user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let mut state = self.lock();
        let Some(existing) = state.users.get(&user.subject_id) else {
            return Err(StoreError::NotFound);
        };
        let updated = Self::merge_update(existing, user);
        Self::check_unique(&state, &updated)?;
        let updated = Self::with_role_name(&state, updated);
        state.users.insert(updated.subject_id.clone(), updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn find_role(&self, name: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .lock()
            .roles
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn create_role(&self, name: &str) -> StoreResult<Role> {
        let mut state = self.lock();
        if state.roles.iter().any(|r| r.name.eq_ignore_ascii_case(name)) {
            return Err(StoreError::UniqueViolation(UniqueKey::RoleName));
        }
        let role = Role {
            id: state.roles.len() as i32 + 1,
            name: name.to_string(),
        };
        state.roles.push(role.clone());
        Ok(role)
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, record: &AuditLog) -> StoreResult<()> {
        if self.audit_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit sink is down".to_string()));
        }
        self.lock().audit.push(record.clone());
        self.audit_written.notify_waiters();
        Ok(())
    }
}
