use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const DEFAULT_ROLE: &str = "USER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: i32,
    pub name: String,
}

/// Uppercased, trimmed role name; `None` for blank input.
pub fn normalize_role_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}
