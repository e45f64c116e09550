//! ControlSurface - thread-safe command entry points into the DSP engine
//!
//! Cheap to clone and safe to hand to any thread (UI, network, MIDI). Every
//! call takes the same lock as the mixer's block processing, so a message is
//! never applied in the middle of a block. After the engine is closed every
//! call fails with [`EngineError::Closed`].

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bridge::{Atom, BridgeMessage, Dispatcher, DspBridge, PatchHandle, Receiver, SharedBridge};
use crate::engine::{EngineError, EngineResult, ErrorKind, ErrorState};

pub struct ControlSurface<B> {
    bridge: SharedBridge<B>,
    dispatcher: Arc<Mutex<Dispatcher>>,
    errors: Arc<ErrorState>,
}

impl<B> Clone for ControlSurface<B> {
    fn clone(&self) -> Self {
        Self {
            bridge: self.bridge.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            errors: Arc::clone(&self.errors),
        }
    }
}

impl<B: DspBridge> ControlSurface<B> {
    pub(crate) fn new(bridge: SharedBridge<B>, errors: Arc<ErrorState>) -> Self {
        Self {
            bridge,
            dispatcher: Arc::new(Mutex::new(Dispatcher::new())),
            errors,
        }
    }

    fn dispatcher(&self) -> MutexGuard<'_, Dispatcher> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failed result in the last-error slot and pass it on
    fn record<T>(&self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(e) = &result {
            self.errors.record(e.kind());
        }
        result
    }

    /// Run a bridge call under the DSP lock, mapping a released bridge to `Closed`
    fn call<T>(
        &self,
        f: impl FnOnce(&mut B) -> Result<T, crate::bridge::BridgeError>,
    ) -> EngineResult<T> {
        let result = match self.bridge.with(f) {
            Some(r) => r.map_err(EngineError::from),
            None => Err(EngineError::Closed),
        };
        self.record(result)
    }

    /// Open `name` from `dir`
    pub fn open_patch(&self, name: &str, dir: impl AsRef<Path>) -> EngineResult<PatchHandle> {
        let dir = dir.as_ref();
        let handle = self.call(|b| b.open_patch(name, dir))?;
        log::info!("Opened patch {:?} ($0 = {})", handle.path, handle.id);
        Ok(handle)
    }

    pub fn close_patch(&self, handle: &PatchHandle) -> EngineResult<()> {
        self.call(|b| b.close_patch(handle))?;
        log::info!("Closed patch {:?}", handle.path);
        Ok(())
    }

    pub fn add_search_path(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        self.call(|b| b.add_search_path(path))
    }

    /// Returns `Ok(false)` when no such receiver exists
    pub fn send_bang(&self, receiver: &str) -> EngineResult<bool> {
        self.call(|b| b.send_bang(receiver))
    }

    pub fn send_float(&self, receiver: &str, value: f32) -> EngineResult<bool> {
        self.call(|b| b.send_float(receiver, value))
    }

    pub fn send_symbol(&self, receiver: &str, value: &str) -> EngineResult<bool> {
        self.call(|b| b.send_symbol(receiver, value))
    }

    pub fn send_list(&self, receiver: &str, atoms: &[Atom]) -> EngineResult<bool> {
        self.call(|b| b.send_list(receiver, atoms))
    }

    pub fn send_message(&self, receiver: &str, selector: &str, atoms: &[Atom]) -> EngineResult<bool> {
        self.call(|b| b.send_message(receiver, selector, atoms))
    }

    /// Send the reserved `pd dsp 0|1` message
    pub fn set_dsp_enabled(&self, enabled: bool) -> EngineResult<bool> {
        self.call(|b| b.set_dsp_enabled(enabled))
    }

    /// Route messages sent to `source` to `receiver`
    ///
    /// The source is bound on the engine when it gains its first subscriber.
    pub fn subscribe(&self, source: &str, receiver: Arc<dyn Receiver>) -> EngineResult<()> {
        let mut dispatcher = self.dispatcher();
        let first = dispatcher.subscribe(source, Arc::clone(&receiver));
        if first {
            if let Err(e) = self.call(|b| b.bind(source)) {
                dispatcher.unsubscribe(source, &receiver);
                return Err(e);
            }
            log::debug!("Bound source '{}'", source);
        }
        Ok(())
    }

    /// Stop routing `source` to `receiver`, unbinding it after the last subscriber
    pub fn unsubscribe(&self, source: &str, receiver: &Arc<dyn Receiver>) -> EngineResult<()> {
        let last = self.dispatcher().unsubscribe(source, receiver);
        if last {
            self.call(|b| {
                b.unbind(source);
                Ok(())
            })?;
            log::debug!("Unbound source '{}'", source);
        }
        Ok(())
    }

    /// Drop every subscription and unbind all sources
    pub fn unsubscribe_all(&self) {
        let sources = self.dispatcher().unsubscribe_all();
        self.bridge.with(|b| {
            for source in &sources {
                b.unbind(source);
            }
        });
    }

    /// Deliver pending engine messages to subscribers
    ///
    /// Messages are collected under the DSP lock and dispatched after it is
    /// released, so receivers may call back into this surface.
    pub fn poll_messages(&self) -> EngineResult<usize> {
        let mut pending: Vec<BridgeMessage> = Vec::new();
        self.call(|b| {
            b.drain_messages(&mut |msg| pending.push(msg));
            Ok(())
        })?;

        let dispatcher = self.dispatcher();
        for message in &pending {
            dispatcher.dispatch(message);
        }
        Ok(pending.len())
    }

    /// Most recently recorded error, not cleared by reading
    pub fn last_error(&self) -> ErrorKind {
        self.errors.last()
    }

    pub fn is_closed(&self) -> bool {
        self.bridge.is_released()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ToneBridge, LEVEL_SOURCE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn surface() -> ControlSurface<ToneBridge> {
        let mut bridge = ToneBridge::new();
        bridge.init(0, 2, 44100).unwrap();
        ControlSurface::new(SharedBridge::new(bridge), Arc::new(ErrorState::new()))
    }

    #[derive(Default)]
    struct LevelCounter {
        floats: AtomicUsize,
    }

    impl Receiver for LevelCounter {
        fn on_float(&self, _source: &str, _value: f32) {
            self.floats.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_send_reports_receiver_existence() {
        let control = surface();
        assert!(control.send_float("freq", 220.0).unwrap());
        assert!(!control.send_float("no-such-receiver", 1.0).unwrap());
        assert!(control.send_symbol("wave", "saw").unwrap());
        assert!(control.set_dsp_enabled(true).unwrap());
    }

    #[test]
    fn test_missing_patch_records_patch_load() {
        let control = surface();
        let dir = tempfile::tempdir().unwrap();
        let err = control.open_patch("missing.yaml", dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PatchLoad);
        assert_eq!(control.last_error(), ErrorKind::PatchLoad);
    }

    #[test]
    fn test_released_bridge_is_closed() {
        let control = surface();
        let clone = control.clone();
        assert!(control.bridge.take().is_some());

        assert!(clone.is_closed());
        assert!(matches!(clone.send_bang("freq"), Err(EngineError::Closed)));
        assert_eq!(clone.last_error(), ErrorKind::EngineClosed);
    }

    #[test]
    fn test_subscribe_and_poll() {
        let control = surface();
        let counter = Arc::new(LevelCounter::default());
        let receiver: Arc<dyn Receiver> = counter.clone();

        // Nothing bound yet
        assert_eq!(control.poll_messages().unwrap(), 0);

        control.subscribe(LEVEL_SOURCE, Arc::clone(&receiver)).unwrap();
        control.subscribe(LEVEL_SOURCE, Arc::clone(&receiver)).unwrap();
        assert!(control.poll_messages().unwrap() >= 1);
        assert_eq!(counter.floats.load(Ordering::SeqCst), 1);

        control.unsubscribe(LEVEL_SOURCE, &receiver).unwrap();
        control.poll_messages().unwrap();
        assert_eq!(counter.floats.load(Ordering::SeqCst), 1);
    }
}
