//! The public entry point: one armband behind a [`BleTransport`].
//!
//! `Myo` composes the session state machine, the command encoder and the
//! notification dispatcher.  Register consumers at any time; they only see
//! data while the session is streaming on their channel.
//!
//! ```no_run
//! # async fn demo(transport: impl myo_rs::transport::BleTransport) -> myo_rs::error::Result<()> {
//! use myo_rs::device::Myo;
//! use myo_rs::types::{StreamModes, VibrationType};
//!
//! let myo = Myo::new(transport);
//! myo.on_imu(|sample| println!("{:?}", sample.orientation));
//! myo.connect().await?;
//! myo.arm(StreamModes::all()).await?;
//! myo.vibrate(VibrationType::Short).await?;
//! # Ok(()) }
//! ```

use std::sync::Arc;

use log::info;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::dispatcher::{Consumer, ConsumerId};
use crate::error::Result;
use crate::parse::{decode_battery, decode_firmware_info, decode_firmware_version, decode_name};
use crate::protocol::{Command, VibrationPattern};
use crate::registry::Channel;
use crate::session::{Session, SessionState, Timeouts};
use crate::transport::BleTransport;
use crate::types::{
    BatteryLevel, ClassifierEvent, ClassifierMode, EmgMode, EmgSample, FirmwareInfo,
    FirmwareVersion, ImuMode, ImuSample, MotionEvent, MyoEvent, ProcessedEmg, Rgb, SleepMode,
    StreamModes, UnlockType, UserActionType, VibrationStep, VibrationType,
};

/// Channels that can carry notifications.
const NOTIFY_CHANNELS: [Channel; 9] = [
    Channel::EmgData0,
    Channel::EmgData1,
    Channel::EmgData2,
    Channel::EmgData3,
    Channel::ImuData,
    Channel::ClassifierEvent,
    Channel::BatteryLevel,
    Channel::MotionEvent,
    Channel::EmgProcessed,
];

type EventSinks = Arc<Mutex<Vec<mpsc::UnboundedSender<MyoEvent>>>>;

/// A Myo armband.
pub struct Myo<T: BleTransport> {
    session: Session<T>,
    /// Receivers handed out by `events()`, fed by one dispatcher consumer.
    sinks: EventSinks,
}

impl<T: BleTransport> Myo<T> {
    pub fn new(transport: T) -> Self {
        Self::with_timeouts(transport, Timeouts::default())
    }

    pub fn with_timeouts(transport: T, timeouts: Timeouts) -> Self {
        let session = Session::new(transport, timeouts);
        let sinks = EventSinks::default();
        let fan_out = Arc::clone(&sinks);
        session.dispatcher().subscribe_many(
            &NOTIFY_CHANNELS,
            Arc::new(move |event: &MyoEvent| {
                fan_out.lock().retain(|tx| tx.send(event.clone()).is_ok());
            }),
        );
        Self { session, sinks }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Modes of the current stream, all off unless streaming.
    pub fn modes(&self) -> StreamModes {
        self.session.modes()
    }

    /// Whether the connected band exposes `channel`.
    pub fn has_channel(&self, channel: Channel) -> bool {
        self.session
            .registry()
            .is_some_and(|registry| registry.contains(channel))
    }

    pub fn transport(&self) -> &T {
        self.session.transport()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    pub async fn connect(&self) -> Result<()> {
        self.session.connect().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    /// Subscribe the channels `modes` needs and start streaming.
    pub async fn arm(&self, modes: StreamModes) -> Result<()> {
        self.session.arm(modes).await
    }

    /// Stop streaming and release every subscription.
    pub async fn disarm(&self) -> Result<()> {
        self.session.disarm().await
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Write a raw mode command.
    ///
    /// This does not change subscriptions; use [`Myo::arm`] to stream.
    pub async fn set_mode(
        &self,
        emg: EmgMode,
        imu: ImuMode,
        classifier: ClassifierMode,
    ) -> Result<()> {
        self.session
            .write_command(&Command::SetMode {
                emg,
                imu,
                classifier,
            })
            .await
    }

    pub async fn vibrate(&self, kind: VibrationType) -> Result<()> {
        self.session.write_command(&Command::Vibrate(kind)).await
    }

    /// Play up to six (duration, strength) steps.
    pub async fn vibrate_pattern(&self, steps: &[VibrationStep]) -> Result<()> {
        let pattern = VibrationPattern::new(steps)?;
        self.session
            .write_command(&Command::VibratePattern(pattern))
            .await
    }

    /// Power the band down.  It only wakes again over USB.
    pub async fn deep_sleep(&self) -> Result<()> {
        info!("myo: sending deep sleep");
        self.session.write_command(&Command::DeepSleep).await
    }

    pub async fn set_led(&self, logo: Rgb, status: Rgb) -> Result<()> {
        self.session
            .write_command(&Command::SetLed { logo, status })
            .await
    }

    pub async fn set_sleep_mode(&self, mode: SleepMode) -> Result<()> {
        self.session.write_command(&Command::SetSleepMode(mode)).await
    }

    pub async fn unlock(&self, kind: UnlockType) -> Result<()> {
        self.session.write_command(&Command::Unlock(kind)).await
    }

    pub async fn user_action(&self, kind: UserActionType) -> Result<()> {
        self.session.write_command(&Command::UserAction(kind)).await
    }

    pub async fn request_extended_data(&self) -> Result<()> {
        self.session
            .write_command(&Command::RequestExtendedData)
            .await
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub async fn read_battery(&self) -> Result<BatteryLevel> {
        let raw = self.session.read(Channel::BatteryLevel).await?;
        Ok(decode_battery(&raw)?)
    }

    pub async fn read_firmware_version(&self) -> Result<FirmwareVersion> {
        let raw = self.session.read(Channel::FirmwareVersion).await?;
        Ok(decode_firmware_version(&raw)?)
    }

    pub async fn read_device_info(&self) -> Result<FirmwareInfo> {
        let raw = self.session.read(Channel::DeviceInfo).await?;
        Ok(decode_firmware_info(&raw)?)
    }

    pub async fn read_name(&self) -> Result<String> {
        let raw = self.session.read(Channel::DeviceName).await?;
        Ok(decode_name(&raw)?)
    }

    // ── Consumers ─────────────────────────────────────────────────────────────
    //
    // The typed `on_*` handlers see decoded values only.  Malformed payloads
    // and lifecycle events reach consumers registered with `subscribe` or
    // through `events()`.

    /// Register a raw consumer on `channels`.
    pub fn subscribe<F>(&self, channels: &[Channel], consumer: F) -> ConsumerId
    where
        F: Fn(&MyoEvent) + Send + Sync + 'static,
    {
        self.session
            .dispatcher()
            .subscribe_many(channels, Arc::new(consumer))
    }

    /// Remove every consumer of `channel`, including the feed of
    /// [`Myo::events`] receivers.
    pub fn unsubscribe(&self, channel: Channel) -> usize {
        self.session.dispatcher().unsubscribe(channel)
    }

    pub fn remove_consumer(&self, id: ConsumerId) {
        self.session.dispatcher().remove(id)
    }

    /// EMG frames from all four EMG data channels.
    pub fn on_emg<F>(&self, handler: F) -> ConsumerId
    where
        F: Fn(Channel, EmgSample) + Send + Sync + 'static,
    {
        self.typed(&Channel::EMG_DATA, move |event| {
            if let MyoEvent::Emg { channel, sample } = event {
                handler(*channel, *sample);
            }
        })
    }

    pub fn on_imu<F>(&self, handler: F) -> ConsumerId
    where
        F: Fn(ImuSample) + Send + Sync + 'static,
    {
        self.typed(&[Channel::ImuData], move |event| {
            if let MyoEvent::Imu(sample) = event {
                handler(*sample);
            }
        })
    }

    pub fn on_classifier_event<F>(&self, handler: F) -> ConsumerId
    where
        F: Fn(ClassifierEvent) + Send + Sync + 'static,
    {
        self.typed(&[Channel::ClassifierEvent], move |event| {
            if let MyoEvent::Classifier(classifier) = event {
                handler(*classifier);
            }
        })
    }

    pub fn on_battery<F>(&self, handler: F) -> ConsumerId
    where
        F: Fn(BatteryLevel) + Send + Sync + 'static,
    {
        self.typed(&[Channel::BatteryLevel], move |event| {
            if let MyoEvent::Battery(level) = event {
                handler(*level);
            }
        })
    }

    pub fn on_motion<F>(&self, handler: F) -> ConsumerId
    where
        F: Fn(MotionEvent) + Send + Sync + 'static,
    {
        self.typed(&[Channel::MotionEvent], move |event| {
            if let MyoEvent::Motion(motion) = event {
                handler(*motion);
            }
        })
    }

    pub fn on_emg_processed<F>(&self, handler: F) -> ConsumerId
    where
        F: Fn(ProcessedEmg) + Send + Sync + 'static,
    {
        self.typed(&[Channel::EmgProcessed], move |event| {
            if let MyoEvent::EmgProcessed(emg) = event {
                handler(*emg);
            }
        })
    }

    fn typed<F>(&self, channels: &[Channel], filter: F) -> ConsumerId
    where
        F: Fn(&MyoEvent) + Send + Sync + 'static,
    {
        let consumer: Consumer = Arc::new(filter);
        self.session.dispatcher().subscribe_many(channels, consumer)
    }

    /// Every event from every channel, including malformed payloads and the
    /// lifecycle events, as an unbounded channel.
    ///
    /// A dropped receiver is forgotten on the next event.
    pub fn events(&self) -> mpsc::UnboundedReceiver<MyoEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sinks = self.sinks.lock();
        sinks.retain(|tx| !tx.is_closed());
        sinks.push(tx);
        rx
    }

    /// Number of live [`Myo::events`] receivers.
    pub fn event_receivers(&self) -> usize {
        let mut sinks = self.sinks.lock();
        sinks.retain(|tx| !tx.is_closed());
        sinks.len()
    }

    /// Consumers registered on `channel`, counting the `events()` feed as one.
    pub fn consumer_count(&self, channel: Channel) -> usize {
        self.session.dispatcher().consumer_count(channel)
    }
}
