//! GATT UUIDs, payload sizes, scale divisors, and the command encoder for
//! Myo armbands.
//!
//! Vendor UUIDs live in the Myo namespace
//! `d506XXXX-a904-deb9-4748-2c7f4a124842`; battery level and device name use
//! the Bluetooth SIG base UUID.

use uuid::Uuid;

use crate::error::MyoError;
use crate::types::{
    ClassifierMode, EmgMode, ImuMode, Rgb, SleepMode, UnlockType, UserActionType, VibrationStep,
    VibrationType,
};

const fn myo_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0xd5060000_a904_deb9_4748_2c7f4a124842 | ((short as u128) << 96))
}

const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0x00000000_0000_1000_8000_00805f9b34fb | ((short as u128) << 96))
}

// ── Services ──────────────────────────────────────────────────────────────────

/// Control service, advertised by every Myo.  Used as the scan filter.
pub const CONTROL_SERVICE: Uuid = myo_uuid(0x0001);
pub const IMU_SERVICE: Uuid = myo_uuid(0x0002);
pub const CLASSIFIER_SERVICE: Uuid = myo_uuid(0x0003);
pub const EMG_PROCESSED_SERVICE: Uuid = myo_uuid(0x0004);
pub const EMG_DATA_SERVICE: Uuid = myo_uuid(0x0005);
pub const BATTERY_SERVICE: Uuid = sig_uuid(0x180f);

// ── Characteristics ───────────────────────────────────────────────────────────

/// Firmware info (serial, unlock pose, classifier, SKU).  Read-only.
pub const INFO_CHARACTERISTIC: Uuid = myo_uuid(0x0101);

/// Firmware version and hardware revision.  Read-only.
pub const FIRMWARE_CHARACTERISTIC: Uuid = myo_uuid(0x0201);

/// Command channel.  The host writes opcode-prefixed frames, see
/// [`Command::encode`].
pub const COMMAND_CHARACTERISTIC: Uuid = myo_uuid(0x0401);

/// IMU data: quaternion, accelerometer, gyroscope, 50 Hz.
pub const IMU_CHARACTERISTIC: Uuid = myo_uuid(0x0402);

/// Motion events (taps).
pub const MOTION_CHARACTERISTIC: Uuid = myo_uuid(0x0502);

/// Classifier events.  Delivered as indications.
pub const CLASSIFIER_CHARACTERISTIC: Uuid = myo_uuid(0x0103);

/// Processed EMG activation, 50 Hz.
pub const EMG_PROCESSED_CHARACTERISTIC: Uuid = myo_uuid(0x0104);

/// EMG data characteristics.  Each carries two 8-electrode frames per
/// notification; the band rotates through all four, so subscribe to every
/// one of them to get the full 200 Hz stream.
pub const EMG_CHARACTERISTICS: [Uuid; 4] = [
    myo_uuid(0x0105),
    myo_uuid(0x0205),
    myo_uuid(0x0305),
    myo_uuid(0x0405),
];

/// Standard battery level characteristic.
pub const BATTERY_CHARACTERISTIC: Uuid = sig_uuid(0x2a19);

/// Standard device name characteristic.
pub const DEVICE_NAME_CHARACTERISTIC: Uuid = sig_uuid(0x2a00);

// ── Payload sizes ─────────────────────────────────────────────────────────────

pub const EMG_PAYLOAD_LEN: usize = 16;
pub const EMG_PROCESSED_PAYLOAD_LEN: usize = 17;
pub const IMU_PAYLOAD_LEN: usize = 20;
pub const CLASSIFIER_PAYLOAD_LEN: usize = 3;
pub const MOTION_PAYLOAD_LEN: usize = 3;
pub const BATTERY_PAYLOAD_LEN: usize = 1;
pub const FIRMWARE_PAYLOAD_LEN: usize = 8;
pub const INFO_PAYLOAD_LEN: usize = 20;

// ── Fixed-point divisors ──────────────────────────────────────────────────────

/// Orientation quaternion components: raw / 16384.
pub const ORIENTATION_SCALE: f32 = 16384.0;

/// Accelerometer, g: raw / 2048.
pub const ACCELEROMETER_SCALE: f32 = 2048.0;

/// Gyroscope, deg/s: raw / 16.
pub const GYROSCOPE_SCALE: f32 = 16.0;

// ── Classifier / motion tags ──────────────────────────────────────────────────

pub(crate) mod classifier_tag {
    pub const ARM_SYNCED: u8 = 0x01;
    pub const ARM_UNSYNCED: u8 = 0x02;
    pub const POSE: u8 = 0x03;
    pub const UNLOCKED: u8 = 0x04;
    pub const LOCKED: u8 = 0x05;
    pub const SYNC_FAILED: u8 = 0x06;
}

pub(crate) mod motion_tag {
    pub const TAP: u8 = 0x00;
}

// ── Commands ──────────────────────────────────────────────────────────────────

mod opcode {
    pub const SET_MODE: u8 = 0x01;
    pub const VIBRATE: u8 = 0x03;
    pub const DEEP_SLEEP: u8 = 0x04;
    pub const SET_LED: u8 = 0x06;
    pub const VIBRATE_PATTERN: u8 = 0x07;
    pub const SET_SLEEP_MODE: u8 = 0x09;
    pub const UNLOCK: u8 = 0x0a;
    pub const USER_ACTION: u8 = 0x0b;
}

/// Maximum number of steps in an extended vibration pattern.
pub const VIBRATION_PATTERN_STEPS: usize = 6;

/// A validated extended vibration pattern of at most
/// [`VIBRATION_PATTERN_STEPS`] steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VibrationPattern {
    steps: Vec<VibrationStep>,
}

impl VibrationPattern {
    pub fn new(steps: &[VibrationStep]) -> Result<Self, MyoError> {
        if steps.len() > VIBRATION_PATTERN_STEPS {
            return Err(MyoError::InvalidCommandArgument(format!(
                "vibration pattern has {} steps, at most {VIBRATION_PATTERN_STEPS} allowed",
                steps.len()
            )));
        }
        Ok(Self {
            steps: steps.to_vec(),
        })
    }

    pub fn steps(&self) -> &[VibrationStep] {
        &self.steps
    }
}

/// An outbound command for the command characteristic.
///
/// Every value of this type is valid: arguments that can be out of range
/// (raw mode bytes, pattern length) are checked when the argument types are
/// constructed, so [`Command::encode`] cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetMode {
        emg: EmgMode,
        imu: ImuMode,
        classifier: ClassifierMode,
    },
    Vibrate(VibrationType),
    VibratePattern(VibrationPattern),
    SetSleepMode(SleepMode),
    /// Power down until plugged into USB.  There is no wake-up over BLE.
    DeepSleep,
    SetLed {
        logo: Rgb,
        status: Rgb,
    },
    Unlock(UnlockType),
    UserAction(UserActionType),
    /// Mode preset enabling every data stream the band offers.
    RequestExtendedData,
}

impl Command {
    /// The mode-setting command that turns every stream off.
    pub fn disable_all() -> Self {
        Command::SetMode {
            emg: EmgMode::None,
            imu: ImuMode::None,
            classifier: ClassifierMode::Disabled,
        }
    }

    /// Encode into the wire frame `[opcode, payload_len, payload…]`.
    ///
    /// ```
    /// # use myo_rs::protocol::Command;
    /// # use myo_rs::types::VibrationType;
    /// assert_eq!(Command::Vibrate(VibrationType::Short).encode(), [0x03, 0x01, 0x01]);
    /// assert_eq!(Command::DeepSleep.encode(), [0x04, 0x00]);
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::SetMode {
                emg,
                imu,
                classifier,
            } => vec![
                opcode::SET_MODE,
                3,
                emg.wire(),
                imu.wire(),
                classifier.wire(),
            ],
            Command::RequestExtendedData => vec![
                opcode::SET_MODE,
                3,
                EmgMode::EmgRaw.wire(),
                ImuMode::All.wire(),
                ClassifierMode::Enabled.wire(),
            ],
            Command::Vibrate(kind) => vec![opcode::VIBRATE, 1, kind.wire()],
            Command::VibratePattern(pattern) => {
                // The length byte is 20 on the wire although only 18 payload
                // bytes follow; the firmware expects exactly this frame.
                let mut frame = Vec::with_capacity(2 + VIBRATION_PATTERN_STEPS * 3);
                frame.extend_from_slice(&[opcode::VIBRATE_PATTERN, 20]);
                for i in 0..VIBRATION_PATTERN_STEPS {
                    let step = pattern.steps.get(i).copied().unwrap_or(VibrationStep {
                        duration_ms: 0,
                        strength: 0,
                    });
                    frame.extend_from_slice(&step.duration_ms.to_le_bytes());
                    frame.push(step.strength);
                }
                frame
            }
            Command::SetSleepMode(mode) => vec![opcode::SET_SLEEP_MODE, 1, mode.wire()],
            Command::DeepSleep => vec![opcode::DEEP_SLEEP, 0],
            Command::SetLed { logo, status } => vec![
                opcode::SET_LED,
                6,
                logo.r,
                logo.g,
                logo.b,
                status.r,
                status.g,
                status.b,
            ],
            Command::Unlock(kind) => vec![opcode::UNLOCK, 1, kind.wire()],
            Command::UserAction(kind) => vec![opcode::USER_ACTION, 1, kind.wire()],
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetMode { .. } => "set_mode",
            Command::Vibrate(_) => "vibrate",
            Command::VibratePattern(_) => "vibrate_pattern",
            Command::SetSleepMode(_) => "set_sleep_mode",
            Command::DeepSleep => "deep_sleep",
            Command::SetLed { .. } => "set_led",
            Command::Unlock(_) => "unlock",
            Command::UserAction(_) => "user_action",
            Command::RequestExtendedData => "request_extended_data",
        }
    }
}
