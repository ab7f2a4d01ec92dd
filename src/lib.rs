//! # myo-rs
//!
//! Async Rust protocol layer for the Thalmic Labs Myo armband over
//! Bluetooth Low Energy: command encoding, notification decoding, and a
//! session state machine that sequences them against a BLE transport.
//!
//! The core is transport-agnostic.  It drives any [`transport::BleTransport`];
//! [`myo_client::BtleTransport`] is the bundled btleplug implementation.
//!
//! ## Quick start
//!
//! ```no_run
//! use myo_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let device = MyoClient::new(MyoClientConfig::default()).find_first().await?;
//!     let myo = device.into_myo();
//!     let mut rx = myo.events();
//!
//!     myo.connect().await?;
//!     myo.arm(StreamModes::all()).await?;
//!
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             MyoEvent::Emg { channel, sample } => println!("{channel:?}: {:?}", sample.values),
//!             e if e.is_terminal() => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`device`] | The [`device::Myo`] facade: commands, reads, consumers |
//! | [`session`] | Connection state machine and command serialization |
//! | [`dispatcher`] | Notification decoding and per-channel fan-out |
//! | [`registry`] | Logical channels and discovery-time validation |
//! | [`protocol`] | GATT UUIDs, opcodes, scale divisors, [`protocol::Command`] |
//! | [`parse`] | Byte-to-value decoders for every notification and read |
//! | [`types`] | Modes, samples and events |
//! | [`transport`] | The BLE transport trait |
//! | [`myo_client`] | btleplug scanning and transport |
//! | [`error`] | Error types |

pub mod device;
pub mod dispatcher;
pub mod error;
pub mod myo_client;
pub mod parse;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Client ────────────────────────────────────────────────────────────────
    pub use crate::device::Myo;
    pub use crate::myo_client::{BtleTransport, MyoClient, MyoClientConfig, MyoDevice};
    pub use crate::session::{SessionState, Timeouts};

    // ── Events and data types ─────────────────────────────────────────────────
    pub use crate::types::{
        BatteryLevel, ClassifierEvent, ClassifierMode, EmgMode, EmgSample, FirmwareInfo,
        FirmwareVersion, ImuMode, ImuSample, MotionEvent, MyoEvent, Pose, ProcessedEmg, Rgb,
        SleepMode, StreamModes, UnlockType, VibrationStep, VibrationType,
    };

    // ── Errors and channels ───────────────────────────────────────────────────
    pub use crate::error::{DecodeError, MyoError};
    pub use crate::registry::Channel;
}
