//! Access-control hooks (§4.4): `canSubscribe`/`canRead`/`canWrite`/
//! `canCreate`, each defaulting to system-only, built around an
//! `AuthResult`/`AuthContext`/`AccessControl` trio.

use std::fmt;

use conduit_common::path::Path;

/// The outcome of an access-control check. Unlike a bare `bool`, a denial
/// carries a human-readable cause for logging (§7: access violations are
/// reported as warnings, never surfaced to the client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Authorized,
    Denied(String),
}

impl AuthResult {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthResult::Authorized)
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        AuthResult::Denied(reason.into())
    }
}

impl fmt::Display for AuthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthResult::Authorized => write!(f, "authorized"),
            AuthResult::Denied(reason) => write!(f, "denied: {reason}"),
        }
    }
}

/// The authenticated identity a session carries, plus whether it is the
/// system authority — the one identity every default access-control hook
/// permits (§4.4 "the default chain always permits the system authority").
#[derive(Debug, Clone)]
pub struct AuthContext<Identity> {
    pub identity: Option<Identity>,
    pub is_system: bool,
}

impl<Identity> AuthContext<Identity> {
    pub fn system() -> Self {
        Self {
            identity: None,
            is_system: true,
        }
    }

    pub fn user(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            is_system: false,
        }
    }
}

/// Access-control hooks for one object type. Every method defaults to
/// system-only; an object type overrides whichever checks its semantics
/// require (§4.4). `path` is the target instance's own path — since
/// [`crate::metadata::ObjectTypeMeta`] (and its `access` hooks) is shared
/// by value across every instance of a type, a policy that depends on
/// *which* instance is being addressed (e.g. "only the owning user may
/// read their own object") recovers that from `path`'s trailing key
/// rather than from any per-instance state.
pub trait AccessControl<Identity>: Send + Sync {
    fn can_subscribe(&self, _path: &Path, auth: &AuthContext<Identity>) -> AuthResult {
        default_system_only(auth)
    }

    fn can_read(&self, _path: &Path, _prop: u16, auth: &AuthContext<Identity>) -> AuthResult {
        default_system_only(auth)
    }

    fn can_write(&self, _path: &Path, _prop: u16, auth: &AuthContext<Identity>) -> AuthResult {
        default_system_only(auth)
    }

    fn can_create(&self, _path: &Path, _prop: u16, auth: &AuthContext<Identity>) -> AuthResult {
        default_system_only(auth)
    }
}

fn default_system_only<Identity>(auth: &AuthContext<Identity>) -> AuthResult {
    if auth.is_system {
        AuthResult::Authorized
    } else {
        AuthResult::Denied("system authority required".to_string())
    }
}

/// An `AccessControl` that uses every default (system-only) hook
/// unchanged; the registry's fallback when an object type builder does
/// not supply its own hooks.
pub struct SystemOnly;

impl<Identity> AccessControl<Identity> for SystemOnly {}

/// An `AccessControl` that permits everyone; useful for public object
/// types (e.g. a chat room's message table) and in tests.
pub struct AllowAll;

impl<Identity> AccessControl<Identity> for AllowAll {
    fn can_subscribe(&self, _path: &Path, _auth: &AuthContext<Identity>) -> AuthResult {
        AuthResult::Authorized
    }
    fn can_read(&self, _path: &Path, _prop: u16, _auth: &AuthContext<Identity>) -> AuthResult {
        AuthResult::Authorized
    }
    fn can_write(&self, _path: &Path, _prop: u16, _auth: &AuthContext<Identity>) -> AuthResult {
        AuthResult::Authorized
    }
    fn can_create(&self, _path: &Path, _prop: u16, _auth: &AuthContext<Identity>) -> AuthResult {
        AuthResult::Authorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct User(String);

    #[test]
    fn default_hooks_deny_non_system() {
        struct Defaults;
        impl AccessControl<User> for Defaults {}

        let hooks = Defaults;
        let system = AuthContext::<User>::system();
        let guest = AuthContext::user(User("alice".into()));
        let path = Path::root().child("users");

        assert!(hooks.can_subscribe(&path, &system).is_authorized());
        assert!(!hooks.can_subscribe(&path, &guest).is_authorized());
        assert!(!hooks.can_read(&path, 0, &guest).is_authorized());
    }

    #[test]
    fn allow_all_permits_everyone() {
        let hooks = AllowAll;
        let guest = AuthContext::user(User("bob".into()));
        let path = Path::root().child("rooms");
        assert!(hooks.can_write(&path, 3, &guest).is_authorized());
    }
}
