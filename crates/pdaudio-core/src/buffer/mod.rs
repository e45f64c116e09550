//! Fixed-capacity sample buffers and the double-buffer slot pair
//!
//! Buffers are allocated once when the engine is created and are never
//! resized afterwards. Ownership moves between the mixer thread and the
//! platform port by value: a buffer handed to the port is simply absent
//! from its [`DoubleBuffer`] slot until the driver gives it back.
//!
//! ```text
//!              hand_off()                 enqueue_output()
//!  ┌──────────────┐  ───────────────►  ┌──────────────────┐
//!  │ DoubleBuffer │                    │ PlatformAudioPort│
//!  │  [Some, -]   │  ◄───────────────  │  (driver owns)   │
//!  └──────────────┘   reclaim()        └──────────────────┘
//!                       ▲                        │
//!                       └── ReadySignal ◄────────┘ output_consumed()
//! ```

mod double;
mod sample;

pub use double::DoubleBuffer;
pub use sample::{f32_to_i16, i16_to_f32, BufferId, SampleBuffer, Samples};
