use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::characteristic::Characteristic;
use crate::device::Device;
use crate::service::{Service, ServiceId};
use crate::Result;

pub type HostEventStream = Pin<Box<dyn Stream<Item = HostEvent> + Send>>;

/// Events pushed by the Bluetooth host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    ServiceAdded(Service),
    ServiceRemoved(Service),
    ServiceChanged(Service),
    /// Fired after reads, notifications and indications. The characteristic carries the new
    /// value.
    CharacteristicValueChanged(Characteristic),
}

/// The Bluetooth host API the monitor is driven by.
///
/// Implementations do the actual GATT work. Calls may complete in any order, and a call that
/// never completes only stalls the continuation that issued it.
#[async_trait]
pub trait Host: Send + Sync + 'static {
    async fn known_devices(&self) -> Result<Vec<Device>>;

    async fn device(&self, address: &str) -> Result<Device>;

    /// GATT services of the device with the given address.
    async fn services(&self, address: &str) -> Result<Vec<Service>>;

    async fn characteristics(&self, service: &ServiceId) -> Result<Vec<Characteristic>>;

    /// Subscribe to host events. Each call returns an independent stream.
    fn events(&self) -> HostEventStream;
}
