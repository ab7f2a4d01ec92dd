//! Logical channels and the validated channel → characteristic mapping of a
//! connected armband.

use std::collections::{BTreeMap, HashSet};

use log::{debug, info};
use uuid::Uuid;

use crate::error::MyoError;
use crate::protocol::{
    BATTERY_CHARACTERISTIC, CLASSIFIER_CHARACTERISTIC, COMMAND_CHARACTERISTIC,
    DEVICE_NAME_CHARACTERISTIC, EMG_CHARACTERISTICS, EMG_PROCESSED_CHARACTERISTIC,
    FIRMWARE_CHARACTERISTIC, IMU_CHARACTERISTIC, INFO_CHARACTERISTIC, MOTION_CHARACTERISTIC,
};
use crate::transport::GattService;

/// A logical protocol channel, each bound to one fixed characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Command,
    EmgData0,
    EmgData1,
    EmgData2,
    EmgData3,
    ImuData,
    ClassifierEvent,
    BatteryLevel,
    MotionEvent,
    EmgProcessed,
    DeviceInfo,
    FirmwareVersion,
    DeviceName,
}

impl Channel {
    /// Channels every armband must expose.
    pub const REQUIRED: [Channel; 8] = [
        Channel::Command,
        Channel::EmgData0,
        Channel::EmgData1,
        Channel::EmgData2,
        Channel::EmgData3,
        Channel::ImuData,
        Channel::ClassifierEvent,
        Channel::BatteryLevel,
    ];

    /// Channels used when present; firmware variants may omit them.
    pub const OPTIONAL: [Channel; 5] = [
        Channel::MotionEvent,
        Channel::EmgProcessed,
        Channel::DeviceInfo,
        Channel::FirmwareVersion,
        Channel::DeviceName,
    ];

    pub const EMG_DATA: [Channel; 4] = [
        Channel::EmgData0,
        Channel::EmgData1,
        Channel::EmgData2,
        Channel::EmgData3,
    ];

    /// The characteristic UUID this channel is bound to.
    pub fn uuid(self) -> Uuid {
        match self {
            Channel::Command => COMMAND_CHARACTERISTIC,
            Channel::EmgData0 => EMG_CHARACTERISTICS[0],
            Channel::EmgData1 => EMG_CHARACTERISTICS[1],
            Channel::EmgData2 => EMG_CHARACTERISTICS[2],
            Channel::EmgData3 => EMG_CHARACTERISTICS[3],
            Channel::ImuData => IMU_CHARACTERISTIC,
            Channel::ClassifierEvent => CLASSIFIER_CHARACTERISTIC,
            Channel::BatteryLevel => BATTERY_CHARACTERISTIC,
            Channel::MotionEvent => MOTION_CHARACTERISTIC,
            Channel::EmgProcessed => EMG_PROCESSED_CHARACTERISTIC,
            Channel::DeviceInfo => INFO_CHARACTERISTIC,
            Channel::FirmwareVersion => FIRMWARE_CHARACTERISTIC,
            Channel::DeviceName => DEVICE_NAME_CHARACTERISTIC,
        }
    }

    pub fn is_required(self) -> bool {
        Self::REQUIRED.contains(&self)
    }

    pub fn is_emg_data(self) -> bool {
        Self::EMG_DATA.contains(&self)
    }

    /// Reverse lookup over the fixed table.
    pub fn from_uuid(uuid: Uuid) -> Option<Channel> {
        Self::REQUIRED
            .iter()
            .chain(Self::OPTIONAL.iter())
            .copied()
            .find(|c| c.uuid() == uuid)
    }
}

/// The channels a connected peripheral actually exposes.
///
/// Only constructed through [`CharacteristicRegistry::discover`], which
/// guarantees every [`Channel::REQUIRED`] entry is present.  Immutable once
/// built; a new session discovers a new registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRegistry {
    present: BTreeMap<Channel, Uuid>,
}

impl CharacteristicRegistry {
    /// Validate a peripheral's discovered services.
    ///
    /// Characteristics are matched by UUID regardless of the service they
    /// were found under.  Fails with [`MyoError::DeviceIncompatible`] naming
    /// every missing required channel.
    pub fn discover(services: &[GattService]) -> Result<Self, MyoError> {
        let exposed: HashSet<Uuid> = services
            .iter()
            .flat_map(|s| s.characteristics.iter().copied())
            .collect();
        debug!(
            "registry: {} service(s), {} characteristic(s)",
            services.len(),
            exposed.len()
        );

        let missing: Vec<Channel> = Channel::REQUIRED
            .iter()
            .copied()
            .filter(|c| !exposed.contains(&c.uuid()))
            .collect();
        if !missing.is_empty() {
            return Err(MyoError::DeviceIncompatible { missing });
        }

        let present: BTreeMap<Channel, Uuid> = Channel::REQUIRED
            .iter()
            .chain(Channel::OPTIONAL.iter())
            .copied()
            .filter(|c| exposed.contains(&c.uuid()))
            .map(|c| (c, c.uuid()))
            .collect();

        let optional = present.keys().filter(|c| !c.is_required()).count();
        info!("registry: all required channels present, {optional} optional");
        Ok(Self { present })
    }

    /// UUID for `channel`, or [`MyoError::ChannelUnavailable`] for an
    /// optional channel this device lacks.
    pub fn uuid(&self, channel: Channel) -> Result<Uuid, MyoError> {
        self.present
            .get(&channel)
            .copied()
            .ok_or(MyoError::ChannelUnavailable(channel))
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.present.contains_key(&channel)
    }

    /// The channel a notification UUID belongs to, if this device has it.
    pub fn channel_for(&self, uuid: Uuid) -> Option<Channel> {
        Channel::from_uuid(uuid).filter(|c| self.present.contains_key(c))
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.present.keys().copied()
    }
}
