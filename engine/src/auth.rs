//! Authentication methods the handshake can negotiate. Only `Trust` is
//! implemented; SCRAM/JWT are stubbed behind the same trait so the
//! dispatch call site never needs to change when they land.

use async_trait::async_trait;
use common::err::{CResult, CoreError};

#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub user: String,
    pub database: String,
    /// Raw bytes of whatever credential the client sent with the
    /// handshake (password, SCRAM first message, JWT, …).
    pub credential: Vec<u8>,
}

#[async_trait]
pub trait AuthMethod: Send + Sync {
    /// Name as it would appear in a SASL/auth-method negotiation.
    fn name(&self) -> &'static str;

    async fn authenticate(&self, request: &AuthRequest) -> CResult<()>;
}

/// Accepts any credential unconditionally. The only method actually
/// wired into the engine's default construction.
#[derive(Debug, Default)]
pub struct Trust;

#[async_trait]
impl AuthMethod for Trust {
    fn name(&self) -> &'static str {
        "Trust"
    }

    async fn authenticate(&self, _request: &AuthRequest) -> CResult<()> {
        Ok(())
    }
}

/// Not implemented: negotiating this method always fails authentication.
#[derive(Debug, Default)]
pub struct ScramSha256;

#[async_trait]
impl AuthMethod for ScramSha256 {
    fn name(&self) -> &'static str {
        "SCRAM-SHA-256"
    }

    async fn authenticate(&self, _request: &AuthRequest) -> CResult<()> {
        Err(CoreError::AuthenticationError(
            "SCRAM-SHA-256 is not implemented".to_string(),
        ))
    }
}

/// Not implemented: negotiating this method always fails authentication.
#[derive(Debug, Default)]
pub struct Jwt;

#[async_trait]
impl AuthMethod for Jwt {
    fn name(&self) -> &'static str {
        "JWT"
    }

    async fn authenticate(&self, _request: &AuthRequest) -> CResult<()> {
        Err(CoreError::AuthenticationError("JWT is not implemented".to_string()))
    }
}

/// System template databases (`edgedb`, `postgres`, …) are never granted
/// direct client access regardless of auth method (§7 `AccessError`).
pub fn check_database_access(database: &str) -> CResult<()> {
    const SYSTEM_DATABASES: &[&str] = &["edgedb", "postgres", "template0", "template1"];
    if SYSTEM_DATABASES.contains(&database) {
        return Err(CoreError::AccessError(format!(
            "access to system database {database:?} is not allowed"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(user: &str, database: &str) -> AuthRequest {
        AuthRequest {
            user: user.to_string(),
            database: database.to_string(),
            credential: vec![],
        }
    }

    #[tokio::test]
    async fn trust_accepts_any_credential() {
        let result = Trust.authenticate(&req("alice", "main")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn scram_and_jwt_are_not_implemented() {
        assert!(ScramSha256.authenticate(&req("alice", "main")).await.is_err());
        assert!(Jwt.authenticate(&req("alice", "main")).await.is_err());
    }

    #[test]
    fn system_database_access_is_denied() {
        assert!(check_database_access("edgedb").is_err());
        assert!(check_database_access("main").is_ok());
    }
}
