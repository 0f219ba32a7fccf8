pub mod audit_service;
pub mod identity_service;
pub mod role_service;
