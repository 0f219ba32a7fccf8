use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};

use crate::database::store::{
    AuditSink, IdentityStore, RoleStore, StoreError, StoreResult,
};
use crate::models::audit_log::AuditLog;
use crate::models::role::Role;
use crate::models::user::{LifecycleState, NewUser, User};

const USER_COLUMNS: &str = r#"
    u.subject_id, u.email, u.handle, u.display_name, u.family_name, u.phone, u.birth_date,
    u.role_id, r.name AS role_name, u.lifecycle_state, u.is_active, u.last_login_at,
    u.last_login_ip, u.created_at, u.updated_at
"#;

#[derive(Debug, FromRow)]
struct UserRow {
    subject_id: String,
    email: Option<String>,
    handle: String,
    display_name: Option<String>,
    family_name: Option<String>,
    phone: Option<String>,
    birth_date: Option<NaiveDate>,
    role_id: Option<i32>,
    role_name: Option<String>,
    lifecycle_state: Option<i16>,
    is_active: bool,
    last_login_at: Option<DateTime<Utc>>,
    last_login_ip: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> StoreResult<Self> {
        let lifecycle_state = LifecycleState::from_code(row.lifecycle_state)
            .map_err(|e| StoreError::Corrupt(format!("user {}: {}", row.subject_id, e)))?;
        Ok(User {
            subject_id: row.subject_id,
            email: row.email,
            handle: row.handle,
            display_name: row.display_name,
            family_name: row.family_name,
            phone: row.phone,
            birth_date: row.birth_date,
            role_id: row.role_id,
            role_name: row.role_name,
            lifecycle_state,
            is_active: row.is_active,
            last_login_at: row.last_login_at,
            last_login_ip: row.last_login_ip,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL backend for users, roles and the audit trail.
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, predicate: &str, value: &str) -> StoreResult<Option<User>> {
        let sql = format!(
            "SELECT {} FROM users u LEFT JOIN roles r ON r.id = u.role_id WHERE {} LIMIT 1",
            USER_COLUMNS, predicate
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_subject(&self, subject_id: &str) -> StoreResult<Option<User>> {
        self.find_one("u.subject_id = $1", subject_id).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_one("u.email = $1", email).await
    }

    async fn find_by_handle(&self, handle: &str) -> StoreResult<Option<User>> {
        self.find_one("u.handle = $1", handle).await
    }

    async fn create_user(&self, user: &NewUser) -> StoreResult<User> {
        let sql = format!(
            r#"
            WITH u AS (
                INSERT INTO users (
                    subject_id, email, handle, display_name, family_name, phone, birth_date,
                    role_id, lifecycle_state, last_login_at, last_login_ip
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING *
            )
            SELECT {} FROM u LEFT JOIN roles r ON r.id = u.role_id
            "#,
            USER_COLUMNS
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.subject_id)
            .bind(&user.email)
            .bind(&user.handle)
            .bind(&user.display_name)
            .bind(&user.family_name)
            .bind(&user.phone)
            .bind(user.birth_date)
            .bind(user.role_id)
            .bind(user.lifecycle_state.code())
            .bind(user.last_login_at)
            .bind(&user.last_login_ip)
            .fetch_one(&self.pool)
            .await?;
        User::try_from(row)
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let sql = format!(
            r#"
            WITH u AS (
                UPDATE users
                SET email = COALESCE($2, email),
                    handle = $3,
                    display_name = COALESCE($4, display_name),
                    family_name = COALESCE($5, family_name),
                    phone = COALESCE($6, phone),
                    birth_date = COALESCE($7, birth_date),
                    role_id = COALESCE($8, role_id),
                    lifecycle_state = CASE
                        WHEN COALESCE(lifecycle_state, 0) > COALESCE($9, 0) THEN lifecycle_state
                        ELSE $9
                    END,
                    last_login_at = GREATEST(last_login_at, $10),
                    last_login_ip = CASE
                        WHEN last_login_at IS NULL OR $10 >= last_login_at THEN COALESCE($11, last_login_ip)
                        ELSE last_login_ip
                    END,
                    updated_at = NOW()
                WHERE subject_id = $1
                RETURNING *
            )
            SELECT {} FROM u LEFT JOIN roles r ON r.id = u.role_id
            "#,
            USER_COLUMNS
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.subject_id)
            .bind(&user.email)
            .bind(&user.handle)
            .bind(&user.display_name)
            .bind(&user.family_name)
            .bind(&user.phone)
            .bind(user.birth_date)
            .bind(user.role_id)
            .bind(user.lifecycle_state.code())
            .bind(user.last_login_at)
            .bind(&user.last_login_ip)
            .fetch_one(&self.pool)
            .await?;
        User::try_from(row)
    }
}

#[async_trait]
impl RoleStore for PgIdentityStore {
    async fn find_role(&self, name: &str) -> StoreResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, name FROM roles WHERE lower(name) = lower($1) ORDER BY id LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }

    async fn create_role(&self, name: &str) -> StoreResult<Role> {
        let role = sqlx::query_as::<_, Role>("INSERT INTO roles (name) VALUES ($1) RETURNING id, name")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(role)
    }
}

#[async_trait]
impl AuditSink for PgIdentityStore {
    async fn append(&self, record: &AuditLog) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, user_id, action, affected_table, description, previous_data, current_data,
                user_agent, endpoint, client_ip, status, processing_time_ms, created_at, digest
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(record.action.as_str())
        .bind(&record.affected_table)
        .bind(&record.description)
        .bind(&record.previous_data)
        .bind(&record.current_data)
        .bind(&record.user_agent)
        .bind(&record.endpoint)
        .bind(&record.client_ip)
        .bind(record.status.as_str())
        .bind(record.processing_time_ms)
        .bind(record.created_at)
        .bind(&record.digest)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
