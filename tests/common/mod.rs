//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use myo_rs::error::TransportError;
use myo_rs::protocol::{
    BATTERY_SERVICE, CLASSIFIER_SERVICE, COMMAND_CHARACTERISTIC, CONTROL_SERVICE,
    EMG_DATA_SERVICE, IMU_SERVICE,
};
use myo_rs::registry::Channel;
use myo_rs::transport::{BleTransport, GattService, TransportEvent};
use myo_rs::types::MyoEvent;

pub const PERIPHERAL_ID: &str = "fake-myo";

/// One call the session made on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Connect,
    Discover,
    Events,
    Write(Uuid, Vec<u8>),
    Read(Uuid),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Disconnect,
}

/// Knobs a test turns before (or while) driving the session.
#[derive(Default)]
pub struct Script {
    pub connect_error: Option<TransportError>,
    pub connect_delay: Option<Duration>,
    pub services: Vec<GattService>,
    pub subscribe_error: Option<(Uuid, TransportError)>,
    pub subscribe_delay: Option<Duration>,
    pub write_error: Option<TransportError>,
    pub write_delay: Option<Duration>,
    /// Writes park here until the test calls `release_writes`.
    pub write_gate: Option<Arc<Notify>>,
    pub reads: HashMap<Uuid, Vec<u8>>,
}

#[derive(Default)]
struct FakeState {
    ops: Mutex<Vec<Op>>,
    script: Mutex<Script>,
    events: Mutex<Option<UnboundedSender<TransportEvent>>>,
    writes_active: Mutex<usize>,
    max_writes_active: Mutex<usize>,
}

pub struct FakeTransport {
    state: Arc<FakeState>,
}

/// The test's side of a [`FakeTransport`].
#[derive(Clone)]
pub struct FakeHandle {
    state: Arc<FakeState>,
}

/// A fake exposing every channel an armband can have.
pub fn fake() -> (FakeTransport, FakeHandle) {
    fake_with(full_services())
}

pub fn fake_with(services: Vec<GattService>) -> (FakeTransport, FakeHandle) {
    let state = Arc::new(FakeState::default());
    state.script.lock().services = services;
    (
        FakeTransport {
            state: Arc::clone(&state),
        },
        FakeHandle { state },
    )
}

/// Every required and optional channel.
pub fn full_services() -> Vec<GattService> {
    let mut channels = Channel::REQUIRED.to_vec();
    channels.extend(Channel::OPTIONAL);
    services_for(&channels)
}

/// Every channel except `missing`.
pub fn services_without(missing: &[Channel]) -> Vec<GattService> {
    let mut channels = Channel::REQUIRED.to_vec();
    channels.extend(Channel::OPTIONAL);
    channels.retain(|c| !missing.contains(c));
    services_for(&channels)
}

fn services_for(channels: &[Channel]) -> Vec<GattService> {
    let service = |uuid, members: &[Channel]| GattService {
        uuid,
        characteristics: channels
            .iter()
            .filter(|c| members.contains(c))
            .map(|c| c.uuid())
            .collect(),
    };
    vec![
        service(
            CONTROL_SERVICE,
            &[
                Channel::Command,
                Channel::DeviceInfo,
                Channel::FirmwareVersion,
                Channel::DeviceName,
            ],
        ),
        service(IMU_SERVICE, &[Channel::ImuData, Channel::MotionEvent]),
        service(CLASSIFIER_SERVICE, &[Channel::ClassifierEvent]),
        service(
            EMG_DATA_SERVICE,
            &[
                Channel::EmgData0,
                Channel::EmgData1,
                Channel::EmgData2,
                Channel::EmgData3,
                Channel::EmgProcessed,
            ],
        ),
        service(BATTERY_SERVICE, &[Channel::BatteryLevel]),
    ]
}

impl FakeHandle {
    pub fn script(&self) -> parking_lot::MutexGuard<'_, Script> {
        self.state.script.lock()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.ops.lock().clone()
    }

    pub fn clear_ops(&self) {
        self.state.ops.lock().clear();
    }

    /// Command frames written so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write(uuid, data) if uuid == COMMAND_CHARACTERISTIC => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn subscribed(&self) -> Vec<Uuid> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Subscribe(uuid) => Some(uuid),
                _ => None,
            })
            .collect()
    }

    pub fn unsubscribed(&self) -> Vec<Uuid> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Unsubscribe(uuid) => Some(uuid),
                _ => None,
            })
            .collect()
    }

    pub fn max_concurrent_writes(&self) -> usize {
        *self.state.max_writes_active.lock()
    }

    /// Push a notification as if the peripheral sent it.
    pub fn notify(&self, channel: Channel, value: &[u8]) {
        if let Some(tx) = self.state.events.lock().as_ref() {
            let _ = tx.unbounded_send(TransportEvent::Notification {
                uuid: channel.uuid(),
                value: value.to_vec(),
            });
        }
    }

    /// Report link loss.
    pub fn drop_link(&self) {
        if let Some(tx) = self.state.events.lock().take() {
            let _ = tx.unbounded_send(TransportEvent::Disconnected);
        }
    }

    /// Park every following write until `release_writes`.
    pub fn hold_writes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.script().write_gate = Some(Arc::clone(&gate));
        gate
    }
}

impl FakeState {
    fn record(&self, op: Op) {
        self.ops.lock().push(op);
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.state.record(Op::Connect);
        let (delay, error) = {
            let script = self.state.script.lock();
            (script.connect_delay, script.connect_error.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        error.map_or(Ok(()), Err)
    }

    async fn discover_services(&self) -> Result<Vec<GattService>, TransportError> {
        self.state.record(Op::Discover);
        Ok(self.state.script.lock().services.clone())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), TransportError> {
        self.state.record(Op::Write(characteristic, data.to_vec()));
        {
            let mut active = self.state.writes_active.lock();
            *active += 1;
            let mut max = self.state.max_writes_active.lock();
            *max = (*max).max(*active);
        }
        let (delay, gate) = {
            let script = self.state.script.lock();
            (script.write_delay, script.write_gate.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(gate) = gate {
            gate.notified().await;
        }
        *self.state.writes_active.lock() -= 1;
        self.state
            .script
            .lock()
            .write_error
            .clone()
            .map_or(Ok(()), Err)
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        self.state.record(Op::Read(characteristic));
        self.state
            .script
            .lock()
            .reads
            .get(&characteristic)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(characteristic))
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        self.state.record(Op::Subscribe(characteristic));
        let (delay, error) = {
            let script = self.state.script.lock();
            let error = script
                .subscribe_error
                .as_ref()
                .filter(|(uuid, _)| *uuid == characteristic)
                .map(|(_, e)| e.clone());
            (script.subscribe_delay, error)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        error.map_or(Ok(()), Err)
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        self.state.record(Op::Unsubscribe(characteristic));
        Ok(())
    }

    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError> {
        self.state.record(Op::Events);
        let (tx, rx) = unbounded();
        *self.state.events.lock() = Some(tx);
        Ok(rx.boxed())
    }

    fn peripheral_id(&self) -> String {
        PERIPHERAL_ID.to_string()
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state.record(Op::Disconnect);
        self.state.events.lock().take();
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Yield to the runtime until `cond` holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Drain whatever is queued on an event receiver.
pub fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<MyoEvent>) -> Vec<MyoEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn emg_payload(first: i8, second: i8) -> Vec<u8> {
    let mut payload = vec![first as u8; 8];
    payload.extend(vec![second as u8; 8]);
    payload
}

pub fn imu_payload(values: [i16; 10]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
