//! btleplug-backed discovery and transport.
//!
//! [`MyoClient`] scans for armbands and hands back [`MyoDevice`] handles;
//! [`BtleTransport`] drives one of them behind the [`BleTransport`] trait so
//! it can be plugged into [`crate::device::Myo`].

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::device::Myo;
use crate::error::TransportError;
use crate::protocol::CONTROL_SERVICE;
use crate::transport::{BleTransport, GattService, TransportEvent};

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::NotConnected => TransportError::NotConnected,
            other => TransportError::Backend(other.to_string()),
        }
    }
}

// ── MyoDevice ─────────────────────────────────────────────────────────────────

/// An armband found during a scan.
#[derive(Clone, Debug)]
pub struct MyoDevice {
    /// Advertised name (`"Myo"` unless the owner renamed it).
    pub name: String,
    /// Platform BLE identifier.
    /// • macOS / Windows — a UUID string
    /// • Linux — a Bluetooth MAC address (`AA:BB:CC:DD:EE:FF`)
    pub id: String,
    pub(crate) peripheral: Peripheral,
    /// The adapter that discovered this device, watched for disconnects.
    pub(crate) adapter: Adapter,
}

impl MyoDevice {
    /// Wrap this device in a transport, not yet connected.
    pub fn into_transport(self) -> BtleTransport {
        BtleTransport::new(self)
    }

    /// Shorthand for `Myo::new(self.into_transport())`.
    pub fn into_myo(self) -> Myo<BtleTransport> {
        Myo::new(self.into_transport())
    }
}

// ── MyoClientConfig ───────────────────────────────────────────────────────────

/// Configuration for [`MyoClient`].
#[derive(Debug, Clone)]
pub struct MyoClientConfig {
    /// BLE scan duration in seconds before giving up. Default: `15`.
    pub scan_timeout_secs: u64,
    /// Match devices whose advertised name starts with this string.
    ///
    /// Devices advertising the armband's control service match regardless
    /// of name, so renamed bands are still found.  Default: `"Myo"`.
    pub name_prefix: String,
}

impl Default for MyoClientConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 15,
            name_prefix: "Myo".into(),
        }
    }
}

// ── MyoClient ─────────────────────────────────────────────────────────────────

/// Scanner for Myo armbands on the first Bluetooth adapter.
pub struct MyoClient {
    config: MyoClientConfig,
}

impl MyoClient {
    pub fn new(config: MyoClientConfig) -> Self {
        Self { config }
    }

    /// Scan for `config.scan_timeout_secs` and return every armband seen.
    pub async fn scan_all(&self) -> Result<Vec<MyoDevice>> {
        let adapter = first_adapter().await?;

        info!(
            "scan_all: scanning for {} s …",
            self.config.scan_timeout_secs
        );
        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(Duration::from_secs(self.config.scan_timeout_secs)).await;
        adapter.stop_scan().await.ok();

        let mut found = vec![];
        for p in adapter.peripherals().await? {
            if let Some(name) = self.matching_name(&p).await {
                let id = p.id().to_string();
                info!("scan_all: found {name}  id={id}");
                found.push(MyoDevice {
                    name,
                    id,
                    peripheral: p,
                    adapter: adapter.clone(),
                });
            }
        }
        info!("scan_all: {} device(s) found", found.len());
        Ok(found)
    }

    /// Return the first armband that shows up, without waiting out the full
    /// scan window.
    pub async fn find_first(&self) -> Result<MyoDevice> {
        let adapter = first_adapter().await?;
        let timeout_secs = self.config.scan_timeout_secs;

        info!("Scanning for Myo armbands (timeout: {timeout_secs} s) …");
        adapter.start_scan(ScanFilter::default()).await?;

        let found = tokio::time::timeout(Duration::from_secs(timeout_secs), async {
            loop {
                let peripherals = adapter.peripherals().await.unwrap_or_default();
                for p in peripherals {
                    if let Some(name) = self.matching_name(&p).await {
                        return (p, name);
                    }
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
        .await;
        adapter.stop_scan().await.ok();

        let (peripheral, name) = found
            .map_err(|_| anyhow!("Timed out scanning for a Myo armband after {timeout_secs} s"))?;
        let id = peripheral.id().to_string();
        info!("Found device: {name}  id={id}");
        Ok(MyoDevice {
            name,
            id,
            peripheral,
            adapter,
        })
    }

    async fn matching_name(&self, p: &Peripheral) -> Option<String> {
        let props = p.properties().await.ok().flatten()?;
        let advertises_control = props.services.contains(&CONTROL_SERVICE);
        match props.local_name {
            Some(name) if advertises_control || name.starts_with(&self.config.name_prefix) => {
                Some(name)
            }
            None if advertises_control => Some("Myo".into()),
            _ => None,
        }
    }
}

async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
    wait_powered_on(&adapter).await;
    Ok(adapter)
}

/// CBCentralManager starts in an "unknown" state and silently ignores scans
/// until it reports poweredOn.
#[cfg(target_os = "macos")]
async fn wait_powered_on(adapter: &Adapter) {
    use btleplug::api::CentralState;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match adapter.adapter_state().await {
            Ok(CentralState::PoweredOn) => {
                info!("macOS: adapter is PoweredOn");
                break;
            }
            Ok(state) => {
                if tokio::time::Instant::now() >= deadline {
                    warn!("macOS: adapter still in state {state:?} after 3 s, proceeding anyway");
                    break;
                }
                debug!("macOS: adapter state = {state:?}, waiting…");
            }
            Err(e) => {
                warn!("macOS: adapter_state() error: {e}");
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[cfg(not(target_os = "macos"))]
async fn wait_powered_on(_adapter: &Adapter) {}

// ── BtleTransport ─────────────────────────────────────────────────────────────

/// [`BleTransport`] over a btleplug peripheral.
pub struct BtleTransport {
    name: String,
    id: String,
    peripheral: Peripheral,
    adapter: Adapter,
    /// Filled by `discover_services`.
    characteristics: Mutex<BTreeSet<Characteristic>>,
    /// Adapter events subscribed before the link comes up, so a disconnect
    /// right after `connect` is not missed.
    central_events: Mutex<Option<BoxStream<'static, CentralEvent>>>,
}

impl BtleTransport {
    pub fn new(device: MyoDevice) -> Self {
        Self {
            name: device.name,
            id: device.id,
            peripheral: device.peripheral,
            adapter: device.adapter,
            characteristics: Mutex::new(BTreeSet::new()),
            central_events: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.characteristics
            .lock()
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl BleTransport for BtleTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        match self.adapter.events().await {
            Ok(events) => *self.central_events.lock() = Some(events),
            Err(e) => warn!("Disconnect watcher: could not subscribe to adapter events: {e}"),
        }
        self.peripheral.connect().await?;

        // BlueZ reports the connection before the remote GATT cache is
        // populated; discovering too early returns an empty service set.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        info!("{}: link up", self.name);
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<GattService>, TransportError> {
        self.peripheral.discover_services().await?;
        *self.characteristics.lock() = self.peripheral.characteristics();

        let services: Vec<GattService> = self
            .peripheral
            .services()
            .into_iter()
            .map(|s| GattService {
                uuid: s.uuid,
                characteristics: s.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect();
        info!(
            "{}: {} service(s) discovered",
            self.name,
            services.len()
        );
        Ok(services)
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), TransportError> {
        let c = self.find(characteristic)?;
        self.peripheral
            .write(&c, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        let c = self.find(characteristic)?;
        Ok(self.peripheral.read(&c).await?)
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let c = self.find(characteristic)?;
        self.peripheral.subscribe(&c).await?;
        debug!("{}: subscribed {characteristic}", self.name);
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let c = self.find(characteristic)?;
        self.peripheral.unsubscribe(&c).await?;
        Ok(())
    }

    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError> {
        // The notification stream closes when the link drops.
        let notifications = self
            .peripheral
            .notifications()
            .await?
            .map(|n| TransportEvent::Notification {
                uuid: n.uuid,
                value: n.value,
            })
            .chain(stream::once(async { TransportEvent::Disconnected }));

        // The adapter's DeviceDisconnected usually fires sooner.
        let peripheral_id = self.peripheral.id();
        let central_events = self.central_events.lock().take();
        let disconnects = match central_events {
            Some(events) => events
                .filter_map(move |event| {
                    let lost = matches!(
                        &event,
                        CentralEvent::DeviceDisconnected(id) if *id == peripheral_id
                    );
                    async move { lost.then_some(TransportEvent::Disconnected) }
                })
                .boxed(),
            None => stream::pending::<TransportEvent>().boxed(),
        };

        Ok(stream::select(notifications, disconnects).boxed())
    }

    fn peripheral_id(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
