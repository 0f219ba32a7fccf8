use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Progress of an account through verification and profile completion.
///
/// Stored as a nullable small integer: `NULL` for unverified, `2` once the
/// provider has confirmed the email, `3` once the profile is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unverified,
    EmailVerifiedIncomplete,
    Complete,
}

impl LifecycleState {
    pub fn from_code(code: Option<i16>) -> Result<Self, String> {
        match code {
            None => Ok(Self::Unverified),
            Some(2) => Ok(Self::EmailVerifiedIncomplete),
            Some(3) => Ok(Self::Complete),
            Some(other) => Err(format!("unknown lifecycle state code {}", other)),
        }
    }

    pub fn code(self) -> Option<i16> {
        match self {
            Self::Unverified => None,
            Self::EmailVerifiedIncomplete => Some(2),
            Self::Complete => Some(3),
        }
    }

    /// Only single forward steps are legal.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (Self::Unverified, Self::EmailVerifiedIncomplete)
                | (Self::EmailVerifiedIncomplete, Self::Complete)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub subject_id: String,
    pub email: Option<String>,
    pub handle: String,
    pub display_name: Option<String>,
    pub family_name: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub role_id: Option<i32>,
    pub role_name: Option<String>,
    pub lifecycle_state: LifecycleState,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Moves the record one lifecycle step forward.
    pub fn advance_to(&mut self, next: LifecycleState) -> bool {
        if !self.lifecycle_state.can_transition_to(next) {
            return false;
        }
        if next == LifecycleState::Complete && (self.display_name.is_none() || self.email.is_none())
        {
            return false;
        }
        self.lifecycle_state = next;
        true
    }

    pub fn touch_login(&mut self, at: DateTime<Utc>, ip: Option<&str>) {
        self.last_login_at = Some(at);
        if let Some(ip) = ip {
            self.last_login_ip = Some(ip.to_string());
        }
    }
}

/// Row written on first sight of a subject id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub subject_id: String,
    pub email: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub family_name: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub role_id: Option<i32>,
    pub lifecycle_state: LifecycleState,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
}

/// Public shape of a reconciled user, also used for audit snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserView {
    pub id: String,
    pub email: Option<String>,
    pub handle: String,
    pub display_name: Option<String>,
    pub family_name: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub role: Option<String>,
    pub lifecycle_state: LifecycleState,
    pub active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.subject_id.clone(),
            email: user.email.clone(),
            handle: user.handle.clone(),
            display_name: user.display_name.clone(),
            family_name: user.family_name.clone(),
            phone: user.phone.clone(),
            birth_date: user.birth_date,
            role: user.role_name.as_ref().map(|r| r.to_uppercase()),
            lifecycle_state: user.lifecycle_state,
            active: user.is_active,
            last_login_at: user.last_login_at,
            last_login_ip: user.last_login_ip.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(state: LifecycleState) -> User {
        let now = Utc::now();
        User {
            subject_id: "u1".into(),
            email: Some("a@x.com".into()),
            handle: "a".into(),
            display_name: None,
            family_name: None,
            phone: None,
            birth_date: None,
            role_id: Some(1),
            role_name: Some("user".into()),
            lifecycle_state: state,
            is_active: true,
            last_login_at: None,
            last_login_ip: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn lifecycle_codes_round_trip_through_storage_representation() {
        for state in [
            LifecycleState::Unverified,
            LifecycleState::EmailVerifiedIncomplete,
            LifecycleState::Complete,
        ] {
            assert_eq!(LifecycleState::from_code(state.code()), Ok(state));
        }
        assert!(LifecycleState::from_code(Some(0)).is_err());
    }

    #[test]
    fn lifecycle_never_moves_backwards_or_skips() {
        use LifecycleState::*;
        assert!(Unverified.can_transition_to(EmailVerifiedIncomplete));
        assert!(EmailVerifiedIncomplete.can_transition_to(Complete));
        assert!(!Unverified.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(EmailVerifiedIncomplete));
        assert!(!Complete.can_transition_to(Complete));
    }

    #[test]
    fn completion_requires_display_name() {
        let mut u = user(LifecycleState::EmailVerifiedIncomplete);
        assert!(!u.advance_to(LifecycleState::Complete));
        u.display_name = Some("Ana".into());
        assert!(u.advance_to(LifecycleState::Complete));
        assert_eq!(u.lifecycle_state, LifecycleState::Complete);
    }

    #[test]
    fn view_uppercases_role_name() {
        let view = UserView::from(&user(LifecycleState::Unverified));
        assert_eq!(view.role.as_deref(), Some("USER"));
        assert_eq!(view.id, "u1");
    }

    #[test]
    fn touch_login_keeps_previous_ip_when_unknown() {
        let mut u = user(LifecycleState::Complete);
        u.last_login_ip = Some("10.0.0.1".into());
        u.touch_login(Utc::now(), None);
        assert_eq!(u.last_login_ip.as_deref(), Some("10.0.0.1"));
        assert!(u.last_login_at.is_some());
    }
}
