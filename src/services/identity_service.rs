//! Identity reconciliation: turns verified provider assertions into local
//! user records and drives the account lifecycle
//! `Unverified -> EmailVerifiedIncomplete -> Complete`.
//!
//! No locks are taken here. Uniqueness of subject id, email and handle is
//! enforced by the store; a create that loses a race is re-read and carried
//! on as an update.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use validator::{ValidationError, ValidationErrors};

use crate::database::store::{IdentityStore, StoreError, UniqueKey};
use crate::dto::auth_dto::{
    AuthOperationResult, CompleteProfileData, RegisterProfile, RequestContext, UserRole,
};
use crate::error::{Error, Result};
use crate::models::audit_log::AuditAction;
use crate::models::user::{LifecycleState, NewUser, User, UserView};
use crate::services::audit_service::{AuditEntry, AuditService};
use crate::services::role_service::RoleService;
use crate::utils::assertion::{AssertionVerifier, VerifiedClaims};
use crate::utils::time::{now, parse_birth_date};
use crate::utils::validation::{
    default_handle, disambiguate_handle, normalize_email, parse_phone, sanitize_string,
};

const MAX_CREATE_ATTEMPTS: usize = 3;

enum Creation {
    Created(User),
    /// The insert collided with a row that already holds the subject id or email.
    Existing(User),
}

#[derive(Debug, Default)]
struct ProfileFields {
    display_name: Option<String>,
    family_name: Option<String>,
    phone: Option<String>,
    birth_date: Option<NaiveDate>,
}

impl ProfileFields {
    fn parse(
        display_name: Option<&str>,
        family_name: Option<&str>,
        phone: Option<&str>,
        birth_date: Option<&str>,
    ) -> Result<Self> {
        let phone = match sanitize_string(phone) {
            Some(raw) => Some(parse_phone(&raw).map_err(|e| field_error("phone", e))?),
            None => None,
        };
        let birth_date = match sanitize_string(birth_date) {
            Some(raw) => Some(parse_birth_date(&raw).map_err(|_| {
                field_error("birth_date", ValidationError::new("birth_date_invalid"))
            })?),
            None => None,
        };
        Ok(Self {
            display_name: sanitize_string(display_name),
            family_name: sanitize_string(family_name),
            phone,
            birth_date,
        })
    }
}

fn field_error(field: &'static str, error: ValidationError) -> Error {
    let mut errors = ValidationErrors::new();
    errors.add(field, error);
    Error::Validation(errors)
}

#[derive(Clone)]
pub struct IdentityService {
    verifier: Arc<dyn AssertionVerifier>,
    users: Arc<dyn IdentityStore>,
    roles: RoleService,
    audit: AuditService,
}

impl IdentityService {
    pub fn new(
        verifier: Arc<dyn AssertionVerifier>,
        users: Arc<dyn IdentityStore>,
        roles: RoleService,
        audit: AuditService,
    ) -> Self {
        Self {
            verifier,
            users,
            roles,
            audit,
        }
    }

    pub fn audit(&self) -> &AuditService {
        &self.audit
    }

    /// Login with a provider assertion, creating the user on first sight.
    ///
    /// A first login or a verification observed on this call is persisted
    /// before the email-verified gate runs, so a rejected call still lets the
    /// next one converge.
    pub async fn login(&self, id_token: &str, ctx: &RequestContext) -> Result<AuthOperationResult> {
        let started = Instant::now();
        let claims = self.verifier.verify(id_token).await?;

        let (mut user, created, previous) = match self.find_by_subject_or_email(&claims).await? {
            Some(user) => {
                let previous = UserView::from(&user);
                (user, false, Some(previous))
            }
            None => match self.create_from_claims(&claims, ctx).await? {
                Creation::Created(user) => (user, true, None),
                Creation::Existing(user) => {
                    let previous = UserView::from(&user);
                    (user, false, Some(previous))
                }
            },
        };

        if !created
            && claims.email_verified
            && user.lifecycle_state == LifecycleState::Unverified
            && user.advance_to(LifecycleState::EmailVerifiedIncomplete)
        {
            user = self.save(&user).await?;
            tracing::info!(subject_id = %user.subject_id, "Email verification observed during login");
        }

        let action = if created {
            AuditAction::AuthRegisterOauth
        } else {
            AuditAction::AuthLogin
        };

        if !claims.email_verified {
            tracing::warn!(subject_id = %user.subject_id, created, "Login rejected: email not verified");
            self.audit.record(
                AuditEntry::new(action)
                    .user(user.subject_id.clone())
                    .description(format!(
                        "Login rejected for {}: email not verified",
                        display_key(&user)
                    ))
                    .previous(previous.as_ref())
                    .current(Some(&UserView::from(&user)))
                    .request(ctx)
                    .failed()
                    .elapsed_since(started),
            );
            return Err(Error::EmailNotVerified);
        }

        if !created {
            self.refresh_from_claims(&mut user, &claims).await?;
            user.touch_login(now(), ctx.ip.as_deref());
            user = self.save(&user).await?;
        }

        let view = UserView::from(&user);
        let description = if created {
            format!("Automatic OAuth registration of user {}", display_key(&user))
        } else {
            format!("Login of user {}", display_key(&user))
        };
        self.audit.record(
            AuditEntry::new(action)
                .user(user.subject_id.clone())
                .description(description)
                .previous(previous.as_ref())
                .current(Some(&view))
                .request(ctx)
                .elapsed_since(started),
        );

        Ok(Self::result(&user, view, created))
    }

    /// Creates or updates the caller's record from explicit profile data.
    /// Registration never advances the lifecycle.
    pub async fn register(
        &self,
        id_token: &str,
        profile: &RegisterProfile,
        ctx: &RequestContext,
    ) -> Result<AuthOperationResult> {
        let started = Instant::now();
        let claims = self.verifier.verify(id_token).await?;

        if let Some(requested) = sanitize_string(profile.subject_id.as_deref()) {
            if requested != claims.subject_id {
                return Err(Error::SubjectMismatch);
            }
        }

        let email = normalize_email(profile.email.as_deref())
            .or_else(|| claims.email.clone())
            .ok_or(Error::MissingEmail)?;
        let fields = ProfileFields::parse(
            profile.display_name.as_deref(),
            profile.family_name.as_deref(),
            profile.phone.as_deref(),
            profile.birth_date.as_deref(),
        )?;
        let requested_handle = sanitize_string(profile.handle.as_deref()).map(|h| h.to_lowercase());

        let by_subject = self.users.find_by_subject(&claims.subject_id).await?;
        if let Some(owner) = self.users.find_by_email(&email).await? {
            if owner.subject_id != claims.subject_id {
                tracing::warn!(
                    subject_id = %claims.subject_id,
                    owner = %owner.subject_id,
                    "Registration rejected: email belongs to another subject"
                );
                return Err(Error::EmailAlreadyRegistered);
            }
        }
        if let Some(handle) = &requested_handle {
            if let Some(owner) = self.users.find_by_handle(handle).await? {
                if owner.subject_id != claims.subject_id {
                    return Err(Error::HandleTaken(handle.clone()));
                }
            }
        }

        let role = self
            .roles
            .resolve_role(profile.role.map(UserRole::as_str))
            .await?;

        let (user, previous, created) = match by_subject {
            Some(existing) => {
                let previous = UserView::from(&existing);
                let user = self
                    .apply_registration(existing, &email, requested_handle, fields, &claims, role.id, ctx)
                    .await?;
                (user, Some(previous), false)
            }
            None => {
                let explicit_handle = requested_handle.is_some();
                let new_user = NewUser {
                    subject_id: claims.subject_id.clone(),
                    handle: requested_handle
                        .clone()
                        .unwrap_or_else(|| default_handle(&email)),
                    email: email.clone(),
                    display_name: fields.display_name.clone().or_else(|| claims.display_name.clone()),
                    family_name: fields.family_name.clone(),
                    phone: fields.phone.clone().or_else(|| claims.phone_number.clone()),
                    birth_date: fields.birth_date,
                    role_id: Some(role.id),
                    lifecycle_state: LifecycleState::Unverified,
                    last_login_at: Some(now()),
                    last_login_ip: ctx.ip.clone(),
                };
                match self.insert_user(new_user, explicit_handle).await? {
                    Creation::Created(user) => (user, None, true),
                    Creation::Existing(existing) if existing.subject_id == claims.subject_id => {
                        let previous = UserView::from(&existing);
                        let user = self
                            .apply_registration(existing, &email, requested_handle, fields, &claims, role.id, ctx)
                            .await?;
                        (user, Some(previous), false)
                    }
                    Creation::Existing(_) => return Err(Error::EmailAlreadyRegistered),
                }
            }
        };

        if created {
            tracing::info!(subject_id = %user.subject_id, "Registered new user");
        }

        let view = UserView::from(&user);
        let (action, description) = if created {
            (
                AuditAction::AuthRegister,
                format!("Registration of user {}", display_key(&user)),
            )
        } else {
            (
                AuditAction::AuthRegisterUpdate,
                format!("Registration update for {}", display_key(&user)),
            )
        };
        self.audit.record(
            AuditEntry::new(action)
                .user(user.subject_id.clone())
                .description(description)
                .previous(previous.as_ref())
                .current(Some(&view))
                .request(ctx)
                .elapsed_since(started),
        );

        Ok(Self::result(&user, view, created))
    }

    /// Supplies the profile of an email-verified account and marks it complete.
    pub async fn complete_profile(
        &self,
        id_token: &str,
        data: &CompleteProfileData,
        ctx: &RequestContext,
    ) -> Result<AuthOperationResult> {
        let started = Instant::now();
        let claims = self.verifier.verify(id_token).await?;

        let mut user = self
            .users
            .find_by_subject(&claims.subject_id)
            .await?
            .ok_or(Error::UserNotFound)?;

        if user.lifecycle_state != LifecycleState::EmailVerifiedIncomplete {
            return Err(Error::InvalidProfileState);
        }

        let fields = ProfileFields::parse(
            Some(&data.display_name),
            data.family_name.as_deref(),
            data.phone.as_deref(),
            data.birth_date.as_deref(),
        )?;
        let display_name = fields
            .display_name
            .ok_or_else(|| field_error("display_name", ValidationError::new("required")))?;

        let previous = UserView::from(&user);
        user.display_name = Some(display_name);
        user.family_name = fields.family_name.or(user.family_name);
        user.phone = fields.phone.or(user.phone);
        user.birth_date = fields.birth_date.or(user.birth_date);

        if !user.advance_to(LifecycleState::Complete) {
            return Err(Error::InvalidProfileState);
        }
        user.touch_login(now(), ctx.ip.as_deref());
        let user = self.save(&user).await?;
        tracing::info!(subject_id = %user.subject_id, "Profile completed");

        let view = UserView::from(&user);
        self.audit.record(
            AuditEntry::new(AuditAction::AuthCompleteProfile)
                .user(user.subject_id.clone())
                .description(format!("Profile completed for {}", display_key(&user)))
                .previous(Some(&previous))
                .current(Some(&view))
                .request(ctx)
                .elapsed_since(started),
        );

        Ok(Self::result(&user, view, false))
    }

    /// Read-only view of the caller's record.
    pub async fn current_user(&self, id_token: &str) -> Result<UserView> {
        let claims = self.verifier.verify(id_token).await?;
        let user = self
            .users
            .find_by_subject(&claims.subject_id)
            .await?
            .ok_or(Error::UserNotFound)?;
        Ok(UserView::from(&user))
    }

    async fn find_by_subject_or_email(&self, claims: &VerifiedClaims) -> Result<Option<User>> {
        if let Some(user) = self.users.find_by_subject(&claims.subject_id).await? {
            return Ok(Some(user));
        }
        match &claims.email {
            Some(email) => Ok(self.users.find_by_email(email).await?),
            None => Ok(None),
        }
    }

    async fn create_from_claims(
        &self,
        claims: &VerifiedClaims,
        ctx: &RequestContext,
    ) -> Result<Creation> {
        let email = claims.email.clone().ok_or(Error::MissingEmail)?;
        let role = self.roles.resolve_role(None).await?;
        let lifecycle_state = if claims.email_verified {
            LifecycleState::EmailVerifiedIncomplete
        } else {
            LifecycleState::Unverified
        };

        let new_user = NewUser {
            subject_id: claims.subject_id.clone(),
            handle: default_handle(&email),
            email,
            display_name: None,
            family_name: None,
            phone: None,
            birth_date: None,
            role_id: Some(role.id),
            lifecycle_state,
            last_login_at: Some(now()),
            last_login_ip: ctx.ip.clone(),
        };
        let creation = self.insert_user(new_user, false).await?;
        if let Creation::Created(user) = &creation {
            tracing::info!(
                subject_id = %user.subject_id,
                lifecycle_state = ?user.lifecycle_state,
                "Created user on first login"
            );
        }
        Ok(creation)
    }

    /// Inserts `new_user`, resolving uniqueness conflicts:
    /// a taken subject id or email yields the existing row, a taken default
    /// handle is retried with a suffix derived from the subject id.
    async fn insert_user(&self, mut new_user: NewUser, explicit_handle: bool) -> Result<Creation> {
        let base_handle = new_user.handle.clone();
        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            match self.users.create_user(&new_user).await {
                Ok(user) => return Ok(Creation::Created(user)),
                Err(StoreError::UniqueViolation(UniqueKey::Handle)) => {
                    if explicit_handle {
                        return Err(Error::HandleTaken(new_user.handle));
                    }
                    new_user.handle = disambiguate_handle(&base_handle, &new_user.subject_id, attempt);
                    tracing::debug!(handle = %new_user.handle, "Default handle taken, retrying");
                }
                Err(StoreError::UniqueViolation(key)) => {
                    tracing::debug!(subject_id = %new_user.subject_id, %key, "Lost create race, re-reading");
                    if let Some(user) = self.users.find_by_subject(&new_user.subject_id).await? {
                        return Ok(Creation::Existing(user));
                    }
                    if let Some(user) = self.users.find_by_email(&new_user.email).await? {
                        return Ok(Creation::Existing(user));
                    }
                    return Err(StoreError::UniqueViolation(key).into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::HandleTaken(new_user.handle))
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_registration(
        &self,
        mut user: User,
        email: &str,
        requested_handle: Option<String>,
        fields: ProfileFields,
        claims: &VerifiedClaims,
        role_id: i32,
        ctx: &RequestContext,
    ) -> Result<User> {
        user.email = Some(email.to_string());
        if let Some(handle) = requested_handle {
            user.handle = handle;
        }
        user.display_name = fields
            .display_name
            .or_else(|| claims.display_name.clone())
            .or(user.display_name);
        user.family_name = fields.family_name.or(user.family_name);
        user.phone = fields
            .phone
            .or_else(|| claims.phone_number.clone())
            .or(user.phone);
        user.birth_date = fields.birth_date.or(user.birth_date);
        user.role_id = Some(role_id);
        user.touch_login(now(), ctx.ip.as_deref());
        self.save(&user).await
    }

    async fn refresh_from_claims(&self, user: &mut User, claims: &VerifiedClaims) -> Result<()> {
        if let Some(email) = &claims.email {
            if user.email.as_deref() != Some(email.as_str()) {
                match self.users.find_by_email(email).await? {
                    Some(owner) if owner.subject_id != user.subject_id => {
                        tracing::warn!(
                            subject_id = %user.subject_id,
                            owner = %owner.subject_id,
                            "Claimed email belongs to another subject; keeping stored email"
                        );
                    }
                    _ => user.email = Some(email.clone()),
                }
            }
        }
        if let Some(name) = &claims.display_name {
            user.display_name = Some(name.clone());
        }
        if let Some(phone) = &claims.phone_number {
            user.phone = Some(phone.clone());
        }
        Ok(())
    }

    async fn save(&self, user: &User) -> Result<User> {
        match self.users.update_user(user).await {
            Ok(user) => Ok(user),
            Err(StoreError::UniqueViolation(UniqueKey::Email)) => Err(Error::EmailAlreadyRegistered),
            Err(StoreError::UniqueViolation(UniqueKey::Handle)) => {
                Err(Error::HandleTaken(user.handle.clone()))
            }
            Err(StoreError::NotFound) => Err(Error::UserNotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn result(user: &User, view: UserView, created: bool) -> AuthOperationResult {
        AuthOperationResult {
            user: view,
            created,
            role_id: user.role_id,
            lifecycle_state: user.lifecycle_state,
        }
    }
}

fn display_key(user: &User) -> &str {
    user.email.as_deref().unwrap_or(&user.subject_id)
}
