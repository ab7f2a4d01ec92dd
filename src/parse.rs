//! Binary decoders for Myo notification and read payloads.
//!
//! All functions here are pure: they take a payload slice and return either a
//! fully-formed value or a [`DecodeError`], never a partial result.  Every
//! payload has a fixed size, so a length mismatch is always an error.
//!
//! | Function | Channel | Layout |
//! |---|---|---|
//! | [`decode_emg`] | EMG data 0–3 | 16 × i8, two frames of 8 |
//! | [`decode_emg_processed`] | processed EMG | 8 × u16 LE + pad |
//! | [`decode_imu`] | IMU | 10 × i16 LE: quat ÷ 16384, accel ÷ 2048, gyro ÷ 16 |
//! | [`decode_classifier`] | classifier | tag + 2 bytes |
//! | [`decode_motion`] | motion | tag + direction + count |
//! | [`decode_battery`] | battery | u8 percent |
//! | [`decode_firmware_version`] | firmware | 4 × u16 LE |
//! | [`decode_firmware_info`] | info | `serial[6] u16 u8×5 pad[7]` |

use crate::error::DecodeError;
use crate::protocol::{
    classifier_tag, motion_tag, ACCELEROMETER_SCALE, BATTERY_PAYLOAD_LEN, CLASSIFIER_PAYLOAD_LEN,
    EMG_PAYLOAD_LEN, EMG_PROCESSED_PAYLOAD_LEN, FIRMWARE_PAYLOAD_LEN, GYROSCOPE_SCALE,
    IMU_PAYLOAD_LEN, INFO_PAYLOAD_LEN, MOTION_PAYLOAD_LEN, ORIENTATION_SCALE,
};
use crate::types::{
    Arm, BatteryLevel, ClassifierEvent, ClassifierModelType, EmgSample, FirmwareInfo,
    FirmwareVersion, HardwareRev, ImuSample, LockState, MotionEvent, Pose, ProcessedEmg,
    Quaternion, Sku, SyncResult, XDirection, XyzSample,
};

/// Borrow `data` as a fixed-size array or report the length mismatch.
fn fixed<'a, const N: usize>(
    data: &'a [u8],
    payload: &'static str,
) -> Result<&'a [u8; N], DecodeError> {
    data.try_into().map_err(|_| DecodeError::Length {
        payload,
        expected: N,
        actual: data.len(),
    })
}

fn read_i16_le(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn known<T>(value: Option<T>, field: &'static str, raw: u8) -> Result<T, DecodeError> {
    value.ok_or(DecodeError::UnknownValue {
        field,
        value: raw as u16,
    })
}

// ── EMG ───────────────────────────────────────────────────────────────────────

/// Decode an EMG notification into its two frames, oldest first.
///
/// The returned samples carry sequence numbers 0 and 1; the dispatcher
/// rebases them onto the channel's running count.
///
/// ```
/// # use myo_rs::parse::decode_emg;
/// let payload: Vec<u8> = (0..16).map(|i| (i as i8 - 8) as u8).collect();
/// let (first, second) = decode_emg(&payload).unwrap();
/// assert_eq!(first.values, [-8, -7, -6, -5, -4, -3, -2, -1]);
/// assert_eq!(second.values, [0, 1, 2, 3, 4, 5, 6, 7]);
/// ```
pub fn decode_emg(data: &[u8]) -> Result<(EmgSample, EmgSample), DecodeError> {
    let raw = fixed::<EMG_PAYLOAD_LEN>(data, "EMG")?;
    let frame = |offset: usize| {
        let mut values = [0i8; 8];
        for (dst, &src) in values.iter_mut().zip(&raw[offset..offset + 8]) {
            *dst = src as i8;
        }
        values
    };
    Ok((
        EmgSample {
            sequence: 0,
            values: frame(0),
        },
        EmgSample {
            sequence: 1,
            values: frame(8),
        },
    ))
}

/// Decode a processed-EMG notification: eight u16 LE activations and one
/// trailing pad byte.
pub fn decode_emg_processed(data: &[u8]) -> Result<ProcessedEmg, DecodeError> {
    let raw = fixed::<EMG_PROCESSED_PAYLOAD_LEN>(data, "processed EMG")?;
    let mut values = [0u16; 8];
    for (i, v) in values.iter_mut().enumerate() {
        *v = read_u16_le(raw, i * 2);
    }
    Ok(ProcessedEmg { values })
}

// ── IMU ───────────────────────────────────────────────────────────────────────

/// Decode an IMU notification.
///
/// Ten little-endian i16 values: orientation `w x y z`, accelerometer
/// `x y z`, gyroscope `x y z`.  Each group has its own divisor
/// ([`ORIENTATION_SCALE`], [`ACCELEROMETER_SCALE`], [`GYROSCOPE_SCALE`]).
pub fn decode_imu(data: &[u8]) -> Result<ImuSample, DecodeError> {
    let raw = fixed::<IMU_PAYLOAD_LEN>(data, "IMU")?;
    let value = |index: usize, scale: f32| read_i16_le(raw, index * 2) as f32 / scale;
    let xyz = |first: usize, scale: f32| XyzSample {
        x: value(first, scale),
        y: value(first + 1, scale),
        z: value(first + 2, scale),
    };

    Ok(ImuSample {
        orientation: Quaternion {
            w: value(0, ORIENTATION_SCALE),
            x: value(1, ORIENTATION_SCALE),
            y: value(2, ORIENTATION_SCALE),
            z: value(3, ORIENTATION_SCALE),
        },
        accelerometer: xyz(4, ACCELEROMETER_SCALE),
        gyroscope: xyz(7, GYROSCOPE_SCALE),
    })
}

// ── Classifier / motion ───────────────────────────────────────────────────────

/// Poses travel as u16; firmware reports "unknown" as either 0xff or 0xffff.
fn pose(value: u16, field: &'static str) -> Result<Pose, DecodeError> {
    if value == 0xffff {
        return Ok(Pose::Unknown);
    }
    u8::try_from(value)
        .ok()
        .and_then(Pose::from_wire)
        .ok_or(DecodeError::UnknownValue { field, value })
}

/// Decode a classifier event: a tag byte followed by two payload bytes.
///
/// | Tag | Event | Payload |
/// |---|---|---|
/// | 0x01 | arm synced | arm, x-direction |
/// | 0x02 | arm unsynced | ignored |
/// | 0x03 | pose | u16 LE pose |
/// | 0x04 / 0x05 | unlocked / locked | ignored |
/// | 0x06 | sync failed | reason |
pub fn decode_classifier(data: &[u8]) -> Result<ClassifierEvent, DecodeError> {
    let raw = fixed::<CLASSIFIER_PAYLOAD_LEN>(data, "classifier")?;
    let event = match raw[0] {
        classifier_tag::ARM_SYNCED => ClassifierEvent::ArmSynced {
            arm: known(Arm::from_wire(raw[1]), "arm", raw[1])?,
            x_direction: known(XDirection::from_wire(raw[2]), "x direction", raw[2])?,
        },
        classifier_tag::ARM_UNSYNCED => ClassifierEvent::ArmUnsynced,
        classifier_tag::POSE => {
            let value = read_u16_le(raw, 1);
            ClassifierEvent::PoseChange(pose(value, "pose")?)
        }
        classifier_tag::UNLOCKED => ClassifierEvent::UnlockedState(LockState::Unlocked),
        classifier_tag::LOCKED => ClassifierEvent::UnlockedState(LockState::Locked),
        classifier_tag::SYNC_FAILED => ClassifierEvent::SyncFailed(known(
            SyncResult::from_wire(raw[1]),
            "sync result",
            raw[1],
        )?),
        tag => {
            return Err(DecodeError::UnknownValue {
                field: "classifier event type",
                value: tag as u16,
            })
        }
    };
    Ok(event)
}

/// Decode a motion event.  Tap is the only type the firmware sends.
pub fn decode_motion(data: &[u8]) -> Result<MotionEvent, DecodeError> {
    let raw = fixed::<MOTION_PAYLOAD_LEN>(data, "motion")?;
    match raw[0] {
        motion_tag::TAP => Ok(MotionEvent::Tap {
            direction: raw[1],
            count: raw[2],
        }),
        tag => Err(DecodeError::UnknownValue {
            field: "motion event type",
            value: tag as u16,
        }),
    }
}

// ── Battery and device reads ──────────────────────────────────────────────────

/// Decode the battery level: one unsigned byte, 0–100.
pub fn decode_battery(data: &[u8]) -> Result<BatteryLevel, DecodeError> {
    let raw = fixed::<BATTERY_PAYLOAD_LEN>(data, "battery")?;
    if raw[0] > 100 {
        return Err(DecodeError::BatteryOutOfRange(raw[0]));
    }
    Ok(BatteryLevel(raw[0]))
}

/// Decode the firmware characteristic: major, minor, patch, hardware rev.
pub fn decode_firmware_version(data: &[u8]) -> Result<FirmwareVersion, DecodeError> {
    let raw = fixed::<FIRMWARE_PAYLOAD_LEN>(data, "firmware version")?;
    let rev = read_u16_le(raw, 6);
    let hardware_rev = u8::try_from(rev)
        .ok()
        .and_then(HardwareRev::from_wire)
        .ok_or(DecodeError::UnknownValue {
            field: "hardware revision",
            value: rev,
        })?;
    Ok(FirmwareVersion {
        major: read_u16_le(raw, 0),
        minor: read_u16_le(raw, 2),
        patch: read_u16_le(raw, 4),
        hardware_rev,
    })
}

/// Decode the info characteristic.
///
/// Layout: serial number (6 bytes), unlock pose (u16 LE), active classifier
/// type, active classifier index, has-custom-classifier flag,
/// stream-indicating flag, SKU, 7 reserved bytes.
pub fn decode_firmware_info(data: &[u8]) -> Result<FirmwareInfo, DecodeError> {
    let raw = fixed::<INFO_PAYLOAD_LEN>(data, "firmware info")?;
    let mut serial_number = [0u8; 6];
    serial_number.copy_from_slice(&raw[..6]);

    let unlock_pose = pose(read_u16_le(raw, 6), "unlock pose")?;

    Ok(FirmwareInfo {
        serial_number,
        unlock_pose,
        active_classifier_type: known(
            ClassifierModelType::from_wire(raw[8]),
            "classifier model type",
            raw[8],
        )?,
        active_classifier_index: raw[9],
        has_custom_classifier: raw[10] != 0,
        stream_indicating: raw[11] != 0,
        sku: known(Sku::from_wire(raw[12]), "SKU", raw[12])?,
    })
}

/// Decode the GAP device name.
pub fn decode_name(data: &[u8]) -> Result<String, DecodeError> {
    String::from_utf8(data.to_vec()).map_err(|_| DecodeError::InvalidName)
}
