use std::sync::{
    Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::{AuthState, CredentialError, CredentialStore};

/// Process-local credential storage. Nothing survives a restart, so every
/// start after a restart is a fresh pairing.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: Mutex<Option<AuthState>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
    fail_loads: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: AuthState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    /// Make subsequent saves fail with an I/O error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent loads fail with an I/O error.
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Option<AuthState> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Option<AuthState>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<AuthState>, CredentialError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(CredentialError::io(
                "<memory>",
                std::io::Error::other("load disabled"),
            ));
        }
        Ok(self.current())
    }

    fn save(&self, state: &AuthState) -> Result<(), CredentialError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CredentialError::io(
                "<memory>",
                std::io::Error::other("save disabled"),
            ));
        }
        *self.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self.lock() = None;
        Ok(())
    }
}
