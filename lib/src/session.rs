//! Credential providers.
//!
//! The pipeline never reaches for ambient session state. Whoever builds the
//! client hands in a [`Session`], which is asked for a bearer token right
//! before each request.

use std::sync::{Arc, RwLock};

pub trait Session: Send + Sync {
    /// Current bearer token, `None` if the user is not logged in.
    fn bearer(&self) -> Option<String>;
}

/// Session backed by a token that can be swapped at runtime, e.g. after
/// a re-login.
#[derive(Clone, Debug, Default)]
pub struct StaticSession {
    token: Arc<RwLock<Option<String>>>,
}

impl StaticSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(Some(token.into()))),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn set(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

impl Session for StaticSession {
    fn bearer(&self) -> Option<String> {
        let token = match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        // blank tokens count as logged out
        token.filter(|t| !t.trim().is_empty())
    }
}

impl<S: Session + ?Sized> Session for Arc<S> {
    fn bearer(&self) -> Option<String> {
        (**self).bearer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_and_clear() {
        let session = StaticSession::new("abc");
        assert_eq!(session.bearer().as_deref(), Some("abc"));

        session.set(Some("  ".to_string()));
        assert_eq!(session.bearer(), None);

        session.set(None);
        assert_eq!(session.bearer(), None);
        assert_eq!(StaticSession::anonymous().bearer(), None);
    }
}
