//! Domain types: device modes, decoded samples, and the events delivered to
//! consumers.

use crate::error::{DecodeError, MyoError};
use crate::registry::Channel;

// ── Wire enums ────────────────────────────────────────────────────────────────

/// Declares a `#[repr(u8)]` enum whose discriminants are the raw wire values,
/// together with `from_wire` and a validating `TryFrom<u8>`.
///
/// `TryFrom` is the construction path for caller-supplied raw values and
/// reports [`MyoError::InvalidCommandArgument`]; decoders use `from_wire`.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl $name {
            /// Map a raw wire byte to a variant, `None` for unknown values.
            pub fn from_wire(value: u8) -> Option<Self> {
                match value {
                    $( $value => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// The raw wire byte for this variant.
            pub fn wire(self) -> u8 {
                self as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = MyoError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                Self::from_wire(value).ok_or_else(|| {
                    MyoError::InvalidCommandArgument(format!(
                        "{value:#04x} is not a valid {}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

wire_enum! {
    /// EMG streaming mode.
    pub enum EmgMode {
        /// No EMG data.
        None = 0x00,
        /// Undocumented 50 Hz rectified, smoothed activation values on the
        /// processed-EMG characteristic.
        Filtered = 0x01,
        /// Filtered EMG on the four EMG data characteristics (200 Hz).
        Emg = 0x02,
        /// Unfiltered EMG on the four EMG data characteristics.
        EmgRaw = 0x03,
    }
}

wire_enum! {
    /// IMU streaming mode.
    pub enum ImuMode {
        /// No IMU data or motion events.
        None = 0x00,
        /// Orientation, accelerometer and gyroscope streams.
        Data = 0x01,
        /// Motion events (taps) only.
        Events = 0x02,
        /// Data streams and motion events.
        All = 0x03,
        /// Raw data streams.
        Raw = 0x04,
    }
}

wire_enum! {
    /// On-board gesture classifier mode.
    pub enum ClassifierMode {
        /// Disable and reset the classifier.
        Disabled = 0x00,
        /// Send pose and arm-sync events.
        Enabled = 0x01,
    }
}

wire_enum! {
    /// Preset vibration lengths.
    pub enum VibrationType {
        None = 0x00,
        Short = 0x01,
        Medium = 0x02,
        Long = 0x03,
    }
}

wire_enum! {
    /// Sleep behaviour after inactivity.
    pub enum SleepMode {
        /// Sleep after a period of inactivity.
        Normal = 0x00,
        /// Never sleep while connected.
        NeverSleep = 0x01,
    }
}

wire_enum! {
    /// Unlock behaviour. `Lock` forces an immediate re-lock.
    pub enum UnlockType {
        Lock = 0x00,
        /// Unlock now and re-lock after a fixed timeout.
        Timed = 0x01,
        /// Unlock until a lock command is received.
        Hold = 0x02,
    }
}

wire_enum! {
    /// Acknowledgement of a recognised user action.
    pub enum UserActionType {
        Single = 0x00,
    }
}

wire_enum! {
    /// Poses recognised by the on-board classifier.
    pub enum Pose {
        Rest = 0x00,
        Fist = 0x01,
        WaveIn = 0x02,
        WaveOut = 0x03,
        FingersSpread = 0x04,
        DoubleTap = 0x05,
        Unknown = 0xff,
    }
}

wire_enum! {
    /// Arm the band is worn on.
    pub enum Arm {
        Right = 0x01,
        Left = 0x02,
        Unknown = 0xff,
    }
}

wire_enum! {
    /// Direction of the band's +x axis relative to the arm.
    pub enum XDirection {
        Wrist = 0x01,
        Elbow = 0x02,
        Unknown = 0xff,
    }
}

wire_enum! {
    /// Outcome of a failed sync gesture.
    pub enum SyncResult {
        FailedTooHard = 0x01,
    }
}

wire_enum! {
    /// Hardware revision reported by the firmware characteristic.
    pub enum HardwareRev {
        Unknown = 0x00,
        /// Myo Alpha.
        RevC = 0x01,
        RevD = 0x02,
    }
}

wire_enum! {
    /// Retail SKU, `Unknown` on old firmware.
    pub enum Sku {
        Unknown = 0x00,
        BlackMyo = 0x01,
        WhiteMyo = 0x02,
    }
}

wire_enum! {
    /// Classifier model currently loaded.
    pub enum ClassifierModelType {
        Builtin = 0x00,
        Custom = 0x01,
    }
}

// ── Stream configuration ──────────────────────────────────────────────────────

/// The modes requested when arming a session.
///
/// Each enabled mode implies one or more notification channels; see
/// [`StreamModes::channels`].  `battery` is not a device mode: it only
/// subscribes to battery-level notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamModes {
    pub emg: EmgMode,
    pub imu: ImuMode,
    pub classifier: ClassifierMode,
    pub battery: bool,
}

impl Default for StreamModes {
    fn default() -> Self {
        Self {
            emg: EmgMode::None,
            imu: ImuMode::None,
            classifier: ClassifierMode::Disabled,
            battery: false,
        }
    }
}

impl StreamModes {
    /// Everything on: raw EMG, all IMU streams, classifier and battery.
    pub fn all() -> Self {
        Self {
            emg: EmgMode::EmgRaw,
            imu: ImuMode::All,
            classifier: ClassifierMode::Enabled,
            battery: true,
        }
    }

    /// Notification channels that must be subscribed for these modes, in
    /// subscription order.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels = Vec::new();
        match self.emg {
            EmgMode::None => {}
            EmgMode::Filtered => channels.push(Channel::EmgProcessed),
            EmgMode::Emg | EmgMode::EmgRaw => channels.extend(Channel::EMG_DATA),
        }
        match self.imu {
            ImuMode::None => {}
            ImuMode::Data | ImuMode::Raw => channels.push(Channel::ImuData),
            ImuMode::Events => channels.push(Channel::MotionEvent),
            ImuMode::All => {
                channels.push(Channel::ImuData);
                channels.push(Channel::MotionEvent);
            }
        }
        if self.classifier == ClassifierMode::Enabled {
            channels.push(Channel::ClassifierEvent);
        }
        if self.battery {
            channels.push(Channel::BatteryLevel);
        }
        channels
    }
}

// ── LED and vibration arguments ───────────────────────────────────────────────

/// An RGB colour for the logo or status LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// One step of an extended vibration pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VibrationStep {
    /// Step length in milliseconds.
    pub duration_ms: u16,
    /// Motor strength, 0 = off, 255 = full speed.
    pub strength: u8,
}

// ── Samples ───────────────────────────────────────────────────────────────────

/// One EMG frame: a signed 8-bit reading per electrode.
///
/// Each EMG notification carries two consecutive frames.  `sequence` counts
/// frames on the characteristic the frame arrived on, starting at 0 when the
/// session is armed; within a notification the first frame gets the lower
/// number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmgSample {
    pub sequence: u64,
    pub values: [i8; 8],
}

/// Processed (rectified, smoothed) EMG activation, one value per electrode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedEmg {
    pub values: [u16; 8],
}

/// A unit quaternion, `w` first as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// A single 3-axis measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct XyzSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One IMU notification.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuSample {
    /// Orientation quaternion (raw / 16384).
    pub orientation: Quaternion,
    /// Acceleration in g (raw / 2048).
    pub accelerometer: XyzSample,
    /// Angular rate in deg/s (raw / 16).
    pub gyroscope: XyzSample,
}

/// Lock state reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
}

/// An event from the on-board classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierEvent {
    ArmSynced { arm: Arm, x_direction: XDirection },
    ArmUnsynced,
    PoseChange(Pose),
    UnlockedState(LockState),
    SyncFailed(SyncResult),
}

/// A motion event detected by the IMU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionEvent {
    Tap { direction: u8, count: u8 },
}

/// Battery charge in percent (0–100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BatteryLevel(pub u8);

impl BatteryLevel {
    pub fn percent(self) -> u8 {
        self.0
    }
}

/// Firmware version from the firmware characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub hardware_rev: HardwareRev,
}

/// Device parameters from the info characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub serial_number: [u8; 6],
    /// Pose interpreted as the unlock gesture.
    pub unlock_pose: Pose,
    pub active_classifier_type: ClassifierModelType,
    pub active_classifier_index: u8,
    pub has_custom_classifier: bool,
    /// Set when the band streams with indications instead of notifications.
    pub stream_indicating: bool,
    pub sku: Sku,
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Everything a consumer can receive from a [`crate::device::Myo`].
///
/// Data variants are delivered only to consumers registered for the channel
/// they arrived on.  `Malformed` goes to the consumers of the offending
/// channel; the lifecycle variants go to every consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum MyoEvent {
    /// One EMG frame from the given EMG data channel.
    Emg { channel: Channel, sample: EmgSample },
    EmgProcessed(ProcessedEmg),
    Imu(ImuSample),
    Classifier(ClassifierEvent),
    Motion(MotionEvent),
    Battery(BatteryLevel),
    /// A notification on `channel` could not be decoded.  The stream goes on.
    Malformed { channel: Channel, error: DecodeError },
    /// Connected and discovered; the string is the peripheral's identifier.
    Connected(String),
    /// The session ended, either on request or because the link dropped.
    Disconnected,
    /// The link dropped while a command write was in flight; whether that
    /// command reached the device is unknown.
    Faulted(String),
}

impl MyoEvent {
    /// `true` for the variants that end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MyoEvent::Disconnected | MyoEvent::Faulted(_))
    }
}
