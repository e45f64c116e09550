//! Dispatcher - fans engine messages out to subscribed receivers
//!
//! The dispatcher only tracks subscriptions. Binding and unbinding sources on
//! the engine is left to the caller, guided by the return values: a source is
//! bound when it gains its first subscriber and unbound when it loses its last.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Atom, BridgeMessage};

/// Application-side handler for engine messages
///
/// All handlers default to doing nothing.
pub trait Receiver: Send + Sync {
    fn on_print(&self, _text: &str) {}
    fn on_bang(&self, _source: &str) {}
    fn on_float(&self, _source: &str, _value: f32) {}
    fn on_symbol(&self, _source: &str, _value: &str) {}
    fn on_list(&self, _source: &str, _atoms: &[Atom]) {}
    fn on_message(&self, _source: &str, _selector: &str, _atoms: &[Atom]) {}
}

// Identity by allocation, ignoring the vtable half of the fat pointer
fn same_receiver(a: &Arc<dyn Receiver>, b: &Arc<dyn Receiver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const u8,
        Arc::as_ptr(b) as *const u8,
    )
}

/// Multimap from source name to receivers
#[derive(Default)]
pub struct Dispatcher {
    subscriptions: HashMap<String, Vec<Arc<dyn Receiver>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `receiver` to `source`
    ///
    /// Returns `true` when `source` had no subscribers before (bind it).
    /// Subscribing the same receiver twice is a no-op.
    pub fn subscribe(&mut self, source: &str, receiver: Arc<dyn Receiver>) -> bool {
        let receivers = self.subscriptions.entry(source.to_string()).or_default();
        let first = receivers.is_empty();
        if !receivers.iter().any(|r| same_receiver(r, &receiver)) {
            receivers.push(receiver);
        }
        first
    }

    /// Remove `receiver` from `source`
    ///
    /// Returns `true` when that left `source` without subscribers (unbind it).
    pub fn unsubscribe(&mut self, source: &str, receiver: &Arc<dyn Receiver>) -> bool {
        let Some(receivers) = self.subscriptions.get_mut(source) else {
            return false;
        };
        let before = receivers.len();
        receivers.retain(|r| !same_receiver(r, receiver));
        if receivers.len() == before {
            return false;
        }
        if receivers.is_empty() {
            self.subscriptions.remove(source);
            return true;
        }
        false
    }

    /// Drop every subscription, returning the sources to unbind
    pub fn unsubscribe_all(&mut self) -> Vec<String> {
        self.subscriptions.drain().map(|(source, _)| source).collect()
    }

    pub fn is_subscribed(&self, source: &str) -> bool {
        self.subscriptions.contains_key(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }

    /// Deliver one message
    ///
    /// Console output goes to every distinct receiver once; everything else
    /// to the receivers of its source.
    pub fn dispatch(&self, message: &BridgeMessage) {
        match message {
            BridgeMessage::Print(text) => {
                let mut seen: Vec<&Arc<dyn Receiver>> = Vec::new();
                for receiver in self.subscriptions.values().flatten() {
                    if seen.iter().any(|r| same_receiver(r, receiver)) {
                        continue;
                    }
                    seen.push(receiver);
                    receiver.on_print(text);
                }
            }
            BridgeMessage::Bang { source } => {
                for r in self.receivers(source) {
                    r.on_bang(source);
                }
            }
            BridgeMessage::Float { source, value } => {
                for r in self.receivers(source) {
                    r.on_float(source, *value);
                }
            }
            BridgeMessage::Symbol { source, value } => {
                for r in self.receivers(source) {
                    r.on_symbol(source, value);
                }
            }
            BridgeMessage::List { source, atoms } => {
                for r in self.receivers(source) {
                    r.on_list(source, atoms);
                }
            }
            BridgeMessage::Message {
                source,
                selector,
                atoms,
            } => {
                for r in self.receivers(source) {
                    r.on_message(source, selector, atoms);
                }
            }
        }
    }

    fn receivers(&self, source: &str) -> impl Iterator<Item = &Arc<dyn Receiver>> {
        self.subscriptions.get(source).into_iter().flatten()
    }
}
