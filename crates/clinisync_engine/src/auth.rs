//! Authentication collaborator.
//!
//! The engine does not manage sessions. It only asks whether replay may
//! proceed and wants to hear when a session is re-established, so a drain
//! paused on an authentication failure can resume.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Callback invoked after re-authentication.
pub type ReauthCallback = Box<dyn Fn() + Send + Sync>;

/// Gate for replay based on the session state.
pub trait AuthProvider: Send + Sync {
    /// Returns true if requests can currently be authenticated.
    fn is_authenticated(&self) -> bool;

    /// Registers a callback fired whenever a session is re-established.
    fn on_reauthenticated(&self, callback: ReauthCallback);
}

/// In-process session flag with sign-in notifications.
pub struct SessionAuth {
    authenticated: AtomicBool,
    callbacks: Mutex<Vec<ReauthCallback>>,
}

impl SessionAuth {
    /// Creates a signed-out session.
    pub fn new() -> Self {
        Self {
            authenticated: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Creates a signed-in session.
    pub fn signed_in() -> Self {
        let auth = Self::new();
        auth.authenticated.store(true, Ordering::SeqCst);
        auth
    }

    /// Marks the session as established and notifies listeners.
    pub fn sign_in(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
        info!("Session established");
        for callback in self.callbacks.lock().iter() {
            callback();
        }
    }

    /// Marks the session as expired.
    pub fn sign_out(&self) {
        if self.authenticated.swap(false, Ordering::SeqCst) {
            info!("Session ended");
        }
    }
}

impl Default for SessionAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAuth")
            .field("authenticated", &self.authenticated.load(Ordering::SeqCst))
            .field("callbacks", &self.callbacks.lock().len())
            .finish()
    }
}

impl AuthProvider for SessionAuth {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn on_reauthenticated(&self, callback: ReauthCallback) {
        self.callbacks.lock().push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn sign_in_fires_callbacks() {
        let auth = SessionAuth::new();
        assert!(!auth.is_authenticated());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        auth.on_reauthenticated(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        auth.sign_in();
        assert!(auth.is_authenticated());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        auth.sign_out();
        assert!(!auth.is_authenticated());
        auth.sign_in();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn signed_in_session() {
        assert!(SessionAuth::signed_in().is_authenticated());
    }
}
