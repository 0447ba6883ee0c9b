//! Pluggable credential validation for the meta channel's `AUTH` message
//! (§6: "*AuthValidator*: `(id, token) -> async-result(Auth | failure)`").

use async_trait::async_trait;

/// Validates an `AUTH` request and, on success, produces the identity the
/// session authenticates as. Failure must be silent apart from a warning
/// and must never result in an `AUTHED` reply (§6).
#[async_trait]
pub trait AuthValidator: Send + Sync {
    type Identity: Send + Sync + Clone + 'static;

    async fn validate(&self, source: &str, token: &str) -> Option<Self::Identity>;
}

/// A validator that accepts every request and authenticates as `()`.
/// Useful for tests and for deployments that gate access entirely at the
/// transport layer (e.g. mTLS).
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllValidator;

#[async_trait]
impl AuthValidator for AllowAllValidator {
    type Identity = ();

    async fn validate(&self, _source: &str, _token: &str) -> Option<()> {
        Some(())
    }
}
