use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionAlgorithm {
    Hs256,
    Rs256,
}

impl std::str::FromStr for AssertionAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::Hs256),
            "RS256" => Ok(Self::Rs256),
            other => Err(format!("unsupported algorithm {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub assertion_algorithm: AssertionAlgorithm,
    pub assertion_key: String,
    pub assertion_issuer: String,
    pub assertion_audience: String,
    pub assertion_leeway_secs: u64,
    pub auth_rps: u32,
    pub audit_signing_key: Option<String>,
    pub trust_proxy_headers: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            db_max_connections: get_env_parse_or("DB_MAX_CONNECTIONS", 20)?,
            assertion_algorithm: get_env_parse_or("ASSERTION_ALGORITHM", AssertionAlgorithm::Rs256)?,
            assertion_key: get_env("ASSERTION_KEY")?,
            assertion_issuer: get_env("ASSERTION_ISSUER")?,
            assertion_audience: get_env("ASSERTION_AUDIENCE")?,
            assertion_leeway_secs: get_env_parse_or("ASSERTION_LEEWAY_SECS", 30)?,
            auth_rps: get_env_parse_or("AUTH_RPS", 20)?,
            audit_signing_key: env::var("AUDIT_SIGNING_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            trust_proxy_headers: get_env_parse_or("TRUST_PROXY_HEADERS", false)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}
