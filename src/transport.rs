//! The BLE transport seam.
//!
//! The session never touches a BLE stack directly; it drives one connected
//! peripheral through [`BleTransport`].  [`crate::myo_client::BtleTransport`]
//! implements it over btleplug, and tests substitute a scripted fake.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::TransportError;

/// One GATT service and the UUIDs of its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Something the peripheral pushed to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A notification or indication value.
    Notification { uuid: Uuid, value: Vec<u8> },
    /// The link dropped without us asking.
    Disconnected,
}

/// A single peripheral's link, as seen by the protocol layer.
///
/// Every method resolves once the underlying stack acknowledges the
/// operation: `write` after the write response, `subscribe` after the CCCD
/// write.  Implementations need not serialize writes themselves.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// Establish the link.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Run GATT discovery and report what the peripheral exposes.
    async fn discover_services(&self) -> Result<Vec<GattService>, TransportError>;

    /// Write with response.
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), TransportError>;

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError>;

    /// Enable notifications (or indications) on a characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;

    /// Stream of notifications and link-loss events for this peripheral.
    ///
    /// Called once per session right after discovery.  Notification order
    /// within one characteristic must match delivery order.
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError>;

    /// A stable identifier for logs and `Connected` events.
    fn peripheral_id(&self) -> String;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
