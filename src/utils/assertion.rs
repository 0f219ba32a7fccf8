use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::{AssertionAlgorithm, Config};
use crate::error::{Error, Result};
use crate::utils::validation::{
    normalize_email, parse_phone, sanitize_string, truncate_chars, MAX_EMAIL_CHARS,
    MAX_NAME_CHARS,
};

/// Claim set extracted from a provider assertion after signature checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    pub subject_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
}

/// Raw token body as issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderClaims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl TryFrom<ProviderClaims> for VerifiedClaims {
    type Error = Error;

    fn try_from(claims: ProviderClaims) -> Result<Self> {
        let subject_id = sanitize_string(Some(&claims.sub))
            .ok_or_else(|| Error::InvalidAssertion("assertion has no subject".to_string()))?;
        Ok(Self {
            subject_id,
            // An address too long to store is treated as absent.
            email: normalize_email(claims.email.as_deref())
                .filter(|e| e.chars().count() <= MAX_EMAIL_CHARS),
            email_verified: claims.email_verified.unwrap_or(false),
            display_name: sanitize_string(claims.name.as_deref())
                .map(|name| truncate_chars(name, MAX_NAME_CHARS)),
            // An unparsable phone from the provider is dropped, not fatal.
            phone_number: claims
                .phone_number
                .as_deref()
                .and_then(|p| parse_phone(p).ok()),
        })
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssertionVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedClaims>;
}

/// Verifies provider-signed JWT assertions against a configured key.
pub struct JwtAssertionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAssertionVerifier {
    pub fn new(
        algorithm: AssertionAlgorithm,
        key: &str,
        issuer: &str,
        audience: &str,
        leeway_secs: u64,
    ) -> Result<Self> {
        let (key, algorithm) = match algorithm {
            AssertionAlgorithm::Hs256 => (DecodingKey::from_secret(key.as_bytes()), Algorithm::HS256),
            AssertionAlgorithm::Rs256 => (
                DecodingKey::from_rsa_pem(key.as_bytes())
                    .map_err(|e| Error::Config(format!("Invalid ASSERTION_KEY: {}", e)))?,
                Algorithm::RS256,
            ),
        };
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.leeway = leeway_secs;
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        Ok(Self { key, validation })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.assertion_algorithm,
            &config.assertion_key,
            &config.assertion_issuer,
            &config.assertion_audience,
            config.assertion_leeway_secs,
        )
    }
}

#[async_trait]
impl AssertionVerifier for JwtAssertionVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedClaims> {
        let data = decode::<ProviderClaims>(token.trim(), &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Assertion rejected");
            Error::InvalidAssertion(e.to_string())
        })?;
        VerifiedClaims::try_from(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "provider-secret";

    fn verifier() -> JwtAssertionVerifier {
        JwtAssertionVerifier::new(AssertionAlgorithm::Hs256, SECRET, "issuer", "catalog", 0)
            .expect("verifier")
    }

    fn token(claims: &ProviderClaims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims() -> ProviderClaims {
        ProviderClaims {
            sub: "u1".into(),
            exp: (chrono::Utc::now().timestamp() + 600) as usize,
            iat: None,
            iss: Some("issuer".into()),
            aud: Some("catalog".into()),
            email: Some(" A@X.com ".into()),
            email_verified: Some(true),
            name: Some("Ana".into()),
            phone_number: Some("not a phone".into()),
        }
    }

    #[tokio::test]
    async fn accepts_valid_assertion_and_normalizes_claims() {
        let verified = verifier().verify(&token(&claims(), SECRET)).await.unwrap();
        assert_eq!(verified.subject_id, "u1");
        assert_eq!(verified.email.as_deref(), Some("a@x.com"));
        assert!(verified.email_verified);
        assert_eq!(verified.phone_number, None);
    }

    #[tokio::test]
    async fn rejects_wrong_signature_audience_and_expiry() {
        let v = verifier();
        assert!(matches!(
            v.verify(&token(&claims(), "other")).await,
            Err(Error::InvalidAssertion(_))
        ));

        let mut wrong_aud = claims();
        wrong_aud.aud = Some("someone-else".into());
        assert!(matches!(
            v.verify(&token(&wrong_aud, SECRET)).await,
            Err(Error::InvalidAssertion(_))
        ));

        let mut expired = claims();
        expired.exp = (chrono::Utc::now().timestamp() - 600) as usize;
        assert!(matches!(
            v.verify(&token(&expired, SECRET)).await,
            Err(Error::InvalidAssertion(_))
        ));

        assert!(matches!(
            v.verify("garbage").await,
            Err(Error::InvalidAssertion(_))
        ));
    }

    #[tokio::test]
    async fn oversized_claims_are_cut_or_dropped() {
        let mut c = claims();
        c.name = Some("N".repeat(150));
        c.email = Some(format!("{}@x.com", "e".repeat(300)));
        let verified = verifier().verify(&token(&c, SECRET)).await.unwrap();
        assert_eq!(
            verified.display_name.map(|n| n.chars().count()),
            Some(MAX_NAME_CHARS)
        );
        assert_eq!(verified.email, None);
    }

    #[tokio::test]
    async fn missing_verification_flag_means_unverified() {
        let mut c = claims();
        c.email_verified = None;
        let verified = verifier().verify(&token(&c, SECRET)).await.unwrap();
        assert!(!verified.email_verified);
    }
}
