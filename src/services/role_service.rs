use std::sync::Arc;

use crate::database::store::{RoleStore, StoreError};
use crate::error::Result;
use crate::models::role::{normalize_role_name, Role, DEFAULT_ROLE};

/// Get-or-create resolution of role names.
#[derive(Clone)]
pub struct RoleService {
    store: Arc<dyn RoleStore>,
}

impl RoleService {
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self { store }
    }

    pub async fn resolve_role(&self, name: Option<&str>) -> Result<Role> {
        let name = name
            .and_then(normalize_role_name)
            .unwrap_or_else(|| DEFAULT_ROLE.to_string());

        if let Some(role) = self.store.find_role(&name).await? {
            return Ok(role);
        }

        match self.store.create_role(&name).await {
            Ok(role) => {
                tracing::info!(role = %role.name, role_id = role.id, "Created role on first use");
                Ok(role)
            }
            // Lost a concurrent create; the winner's row is the answer.
            Err(StoreError::UniqueViolation(_)) => self
                .store
                .find_role(&name)
                .await?
                .ok_or_else(|| StoreError::NotFound.into()),
            Err(e) => Err(e.into()),
        }
    }
}
