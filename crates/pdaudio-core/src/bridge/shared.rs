//! SharedBridge - the single lock domain around a DSP engine instance
//!
//! Block processing on the mixer thread and control messages from any other
//! thread both go through [`SharedBridge::with`], so the engine is never
//! mutated mid-block. Teardown takes the bridge out of the slot; every later
//! access sees `None`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct SharedBridge<B> {
    inner: Arc<Mutex<Option<B>>>,
}

impl<B> SharedBridge<B> {
    pub fn new(bridge: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(bridge))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<B>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access, or return `None` once the bridge is gone
    pub fn with<R>(&self, f: impl FnOnce(&mut B) -> R) -> Option<R> {
        self.lock().as_mut().map(f)
    }

    /// Remove the bridge from the lock domain
    pub fn take(&self) -> Option<B> {
        self.lock().take()
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_none()
    }
}

impl<B> Clone for SharedBridge<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
