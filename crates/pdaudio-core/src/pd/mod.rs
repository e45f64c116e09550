//! Pure Data engine via libpd-rs
//!
//! [`PdBridge`] runs one libpd instance behind the [`DspBridge`] trait:
//!
//! - `process_block` maps onto `process_short` / `process_float` depending on
//!   the buffer format
//! - patches are opened from a directory and identified by their `$0`
//! - console output is routed into `log` and forwarded as
//!   [`BridgeMessage::Print`]
//! - bound sources (`[s name]` in a patch) arrive through a bounded queue
//!   drained by `drain_messages`
//!
//! [`DspBridge`]: crate::bridge::DspBridge
//! [`BridgeMessage::Print`]: crate::bridge::BridgeMessage::Print

mod bridge;

pub use bridge::PdBridge;
