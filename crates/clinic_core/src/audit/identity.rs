//! Acting-identity providers consumed by the auditor.

use std::sync::{Arc, RwLock};

/// Source of the currently authenticated actor.
pub trait IdentityProvider {
    /// Returns the signed-in actor name, or `None` when nobody is signed in.
    fn current_actor(&self) -> Option<String>;
}

/// Nobody is ever signed in; entries fall back to the system actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentityProvider for SystemIdentity {
    fn current_actor(&self) -> Option<String> {
        None
    }
}

/// Fixed actor, for batch jobs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity(pub String);

impl StaticIdentity {
    pub fn new(actor: impl Into<String>) -> Self {
        Self(actor.into())
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_actor(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Shared session slot written by the login layer.
///
/// Clones share the slot, so the login layer can keep one handle while units
/// of work read another.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    actor: Arc<RwLock<Option<String>>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, actor: impl Into<String>) {
        if let Ok(mut slot) = self.actor.write() {
            *slot = Some(actor.into());
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut slot) = self.actor.write() {
            slot.take();
        }
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_actor(&self) -> Option<String> {
        self.actor.read().ok().and_then(|slot| slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentityProvider, SessionIdentity};

    #[test]
    fn session_clones_share_sign_in_state() {
        let login = SessionIdentity::new();
        let reader = login.clone();
        assert_eq!(reader.current_actor(), None);

        login.sign_in("dr.lopez");
        assert_eq!(reader.current_actor().as_deref(), Some("dr.lopez"));

        login.sign_out();
        assert_eq!(reader.current_actor(), None);
    }
}
