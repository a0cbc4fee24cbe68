//! [`Host`] implementation on top of `btleplug`.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic as BtleCharacteristic, Manager as _,
    Peripheral as _, ScanFilter, Service as BtleService, ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use stream_cancel::{Trigger, Valved};
use tokio::sync::broadcast::{self, Sender};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::characteristic::{Characteristic, CharacteristicId};
use crate::common::services::HEART_RATE;
use crate::device::Device;
use crate::host::{Host, HostEvent, HostEventStream};
use crate::service::{Service, ServiceId};
use crate::{Error, Result};

pub struct HostConfig {
    /// Index of the Bluetooth adapter to use. The first found adapter is used by default.
    adapter_index: usize,
    /// Peripherals whose advertised services pass this filter are connected to when seen.
    connect_filter: Option<Box<dyn Fn(&[Uuid]) -> bool + Send + Sync>>,
    /// Whether to start scanning right away.
    scan: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            connect_filter: Some(Box::new(|uuids| uuids.contains(&HEART_RATE))),
            scan: true,
        }
    }
}

impl HostConfig {
    /// Index of bluetooth adapter to use
    pub fn adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Connect to advertising peripherals whose service UUIDs pass the filter
    pub fn connect_when(mut self, func: impl Fn(&[Uuid]) -> bool + Send + Sync + 'static) -> Self {
        self.connect_filter = Some(Box::new(func));
        self
    }

    /// Never connect on advertisement; only connect when services are requested
    pub fn no_auto_connect(mut self) -> Self {
        self.connect_filter = None;
        self
    }

    pub fn scan(mut self, scan: bool) -> Self {
        self.scan = scan;
        self
    }
}

/// What was last seen of a service, used to tell added, changed and removed services apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServiceSnapshot {
    pub(crate) service: Service,
    pub(crate) characteristics: Vec<Uuid>,
}

#[derive(Default)]
struct State {
    /// Services last seen per device address.
    services: HashMap<String, Vec<ServiceSnapshot>>,
    /// Latest value per characteristic.
    values: HashMap<CharacteristicId, Vec<u8>>,
    /// Subscribed characteristics by device address and characteristic UUID.
    subscribed: HashMap<(String, Uuid), Characteristic>,
    /// Notification forwarding task per device. Dropping an entry stops its task.
    forwarding: HashMap<String, Forwarder>,
    last_forwarder: u64,
}

struct Forwarder {
    id: u64,
    _stopper: Trigger,
}

impl State {
    fn service(&self, id: &ServiceId) -> Option<Service> {
        self.services
            .values()
            .flatten()
            .find(|snapshot| &snapshot.service.id == id)
            .map(|snapshot| snapshot.service.clone())
    }
}

struct Shared {
    state: Mutex<State>,
    event_sender: Sender<HostEvent>,
}

impl Shared {
    /// Records the services of a device and announces what changed.
    fn observe(&self, address: &str, services: Vec<ServiceSnapshot>) {
        let events = {
            let mut state = self.state.lock().unwrap();
            let previous = state.services.remove(address).unwrap_or_default();
            let events = diff_services(&previous, &services);
            state.services.insert(address.to_string(), services);
            events
        };

        for event in events {
            self.event_sender.send(event).ok();
        }
    }

    fn is_forwarding(&self, address: &str) -> bool {
        self.state.lock().unwrap().forwarding.contains_key(address)
    }

    /// Registers the forwarding task of a device, stopping any previous one. Returns the id
    /// the task reports back with when its stream ends.
    fn track_forwarder(&self, address: &str, stopper: Trigger) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.last_forwarder += 1;
        let id = state.last_forwarder;
        state.forwarding.insert(
            address.to_string(),
            Forwarder {
                id,
                _stopper: stopper,
            },
        );
        id
    }

    fn forwarder_ended(&self, address: &str, id: u64) {
        let mut state = self.state.lock().unwrap();
        if state
            .forwarding
            .get(address)
            .map_or(false, |forwarder| forwarder.id == id)
        {
            state.forwarding.remove(address);
        }
    }

    /// Forgets a device that went away and announces its services as removed.
    ///
    /// Stops forwarding its notifications and drops the values cached for it, so a later
    /// connection starts from scratch.
    fn forget(&self, address: &str) {
        let removed = {
            let mut state = self.state.lock().unwrap();
            let stale = state
                .subscribed
                .iter()
                .filter(|((device, _), _)| device == address)
                .map(|(_, characteristic)| characteristic.id.clone())
                .collect::<Vec<_>>();
            for id in &stale {
                state.values.remove(id);
            }
            state.subscribed.retain(|(device, _), _| device != address);
            state.forwarding.remove(address);
            state.services.remove(address).unwrap_or_default()
        };

        for snapshot in removed {
            self.event_sender
                .send(HostEvent::ServiceRemoved(snapshot.service))
                .ok();
        }
    }
}

pub(crate) fn diff_services(
    previous: &[ServiceSnapshot],
    current: &[ServiceSnapshot],
) -> Vec<HostEvent> {
    let mut events = Vec::new();

    for old in previous {
        if !current.iter().any(|new| new.service.id == old.service.id) {
            events.push(HostEvent::ServiceRemoved(old.service.clone()));
        }
    }

    for new in current {
        match previous.iter().find(|old| old.service.id == new.service.id) {
            None => events.push(HostEvent::ServiceAdded(new.service.clone())),
            Some(old) if old.characteristics != new.characteristics => {
                events.push(HostEvent::ServiceChanged(new.service.clone()))
            }
            Some(_) => {}
        }
    }

    events
}

fn service_id(address: &str, uuid: Uuid) -> ServiceId {
    ServiceId::new(format!("{}/{}", address, uuid))
}

fn characteristic_id(service: &ServiceId, uuid: Uuid) -> CharacteristicId {
    CharacteristicId::new(format!("{}/{}", service, uuid))
}

fn snapshot(address: &str, service: &BtleService) -> ServiceSnapshot {
    ServiceSnapshot {
        service: Service::new(service_id(address, service.uuid), service.uuid, address),
        characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
    }
}

async fn to_device(peripheral: &Peripheral) -> Device {
    let name = peripheral
        .properties()
        .await
        .ok()
        .flatten()
        .and_then(|props| props.local_name);

    Device::new(peripheral.address().to_string(), name)
}

/// Connects if needed and returns the GATT services of the peripheral.
async fn discover(peripheral: &Peripheral) -> Result<Vec<BtleService>> {
    if !peripheral.is_connected().await? {
        peripheral.connect().await?;
    }

    let mut services = peripheral.services();
    if services.is_empty() {
        peripheral.discover_services().await?;
        services = peripheral.services();
    }

    Ok(services.into_iter().collect())
}

/// A [`Host`] backed by a local Bluetooth adapter.
pub struct BtleHost {
    _manager: Manager,
    adapter: Adapter,
    shared: Arc<Shared>,
    _listener: Trigger,
}

impl BtleHost {
    pub async fn new(config: HostConfig) -> Result<Self> {
        let manager = Manager::new().await?;
        let mut adapters = manager.adapters().await?;

        if config.adapter_index >= adapters.len() {
            return Err(Error::AdapterNotFound(config.adapter_index));
        }

        let adapter = adapters.swap_remove(config.adapter_index);

        log::trace!("Using adapter: {:?}", adapter);

        let (event_sender, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            event_sender,
        });

        let (listener, events) = Valved::new(adapter.events().await?);

        if config.scan {
            log::info!("Starting the scan");
            adapter.start_scan(ScanFilter::default()).await?;
        }

        let ctx = HostContext {
            adapter: adapter.clone(),
            shared: shared.clone(),
            connect_filter: config.connect_filter,
            connecting: Arc::new(Mutex::new(HashSet::new())),
        };

        tokio::spawn(async move {
            ctx.listen(events).await;
        });

        Ok(Self {
            _manager: manager,
            adapter,
            shared,
            _listener: listener,
        })
    }

    pub async fn stop_scan(&self) -> Result<()> {
        Ok(self.adapter.stop_scan().await?)
    }

    async fn peripheral(&self, address: &str) -> Result<Peripheral> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|peripheral| peripheral.address().to_string() == address)
            .ok_or_else(|| Error::DeviceNotFound(address.to_string()))
    }

    /// Subscribes to a characteristic and makes sure the device's notifications are forwarded.
    async fn subscribe(
        &self,
        peripheral: &Peripheral,
        btle_characteristic: &BtleCharacteristic,
        characteristic: &Characteristic,
    ) -> Result<()> {
        let address = peripheral.address().to_string();
        let key = (address.clone(), characteristic.uuid);

        let subscribed = self.shared.state.lock().unwrap().subscribed.contains_key(&key);
        if !subscribed {
            log::debug!("Subscribing to {}", characteristic.id);
            peripheral.subscribe(btle_characteristic).await?;
            self.shared
                .state
                .lock()
                .unwrap()
                .subscribed
                .insert(key, characteristic.clone());
        }

        if !self.shared.is_forwarding(&address) {
            let (stopper, notifications) = Valved::new(peripheral.notifications().await?);
            let id = self.shared.track_forwarder(&address, stopper);
            tokio::spawn(forward_notifications(
                address,
                id,
                notifications,
                self.shared.clone(),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl Host for BtleHost {
    async fn known_devices(&self) -> Result<Vec<Device>> {
        let mut devices = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            devices.push(to_device(&peripheral).await);
        }
        Ok(devices)
    }

    async fn device(&self, address: &str) -> Result<Device> {
        let peripheral = self.peripheral(address).await?;
        Ok(to_device(&peripheral).await)
    }

    async fn services(&self, address: &str) -> Result<Vec<Service>> {
        let peripheral = self.peripheral(address).await?;
        let snapshots = discover(&peripheral)
            .await?
            .iter()
            .map(|service| snapshot(address, service))
            .collect::<Vec<_>>();

        let services = snapshots
            .iter()
            .map(|snapshot| snapshot.service.clone())
            .collect();
        self.shared.observe(address, snapshots);

        Ok(services)
    }

    async fn characteristics(&self, id: &ServiceId) -> Result<Vec<Characteristic>> {
        let service = self
            .shared
            .state
            .lock()
            .unwrap()
            .service(id)
            .ok_or_else(|| Error::ServiceNotFound(id.clone()))?;

        let peripheral = self.peripheral(&service.device_address).await?;
        let btle_service = discover(&peripheral)
            .await?
            .into_iter()
            .find(|btle_service| btle_service.uuid == service.uuid)
            .ok_or_else(|| Error::ServiceNotFound(id.clone()))?;

        let mut characteristics = Vec::new();
        for btle_characteristic in &btle_service.characteristics {
            let mut characteristic = Characteristic::new(
                characteristic_id(&service.id, btle_characteristic.uuid),
                btle_characteristic.uuid,
                service.id.clone(),
            );

            if btle_characteristic
                .properties
                .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
            {
                if let Err(e) = self
                    .subscribe(&peripheral, btle_characteristic, &characteristic)
                    .await
                {
                    log::warn!("Could not subscribe to {}: {}", characteristic.id, e);
                }
            }

            characteristic.value = self
                .shared
                .state
                .lock()
                .unwrap()
                .values
                .get(&characteristic.id)
                .cloned();
            characteristics.push(characteristic);
        }

        Ok(characteristics)
    }

    fn events(&self) -> HostEventStream {
        let receiver = self.shared.event_sender.subscribe();
        Box::pin(BroadcastStream::new(receiver).filter_map(|x| async move { x.ok() }))
    }
}

async fn forward_notifications(
    address: String,
    id: u64,
    mut notifications: Valved<Pin<Box<dyn Stream<Item = ValueNotification> + Send>>>,
    shared: Arc<Shared>,
) {
    while let Some(notification) = notifications.next().await {
        let characteristic = {
            let mut state = shared.state.lock().unwrap();
            let Some(characteristic) = state
                .subscribed
                .get(&(address.clone(), notification.uuid))
                .cloned()
            else {
                continue;
            };
            state
                .values
                .insert(characteristic.id.clone(), notification.value.clone());
            characteristic.with_value(notification.value)
        };

        shared
            .event_sender
            .send(HostEvent::CharacteristicValueChanged(characteristic))
            .ok();
    }

    log::debug!("Notifications of {} ended", address);
    shared.forwarder_ended(&address, id);
}

struct HostContext {
    adapter: Adapter,
    shared: Arc<Shared>,
    connect_filter: Option<Box<dyn Fn(&[Uuid]) -> bool + Send + Sync>>,
    /// Devices that we are currently connecting to
    connecting: Arc<Mutex<HashSet<PeripheralId>>>,
}

impl HostContext {
    async fn listen(self, mut events: Valved<Pin<Box<dyn Stream<Item = CentralEvent> + Send>>>) {
        while let Some(event) = events.next().await {
            match event {
                CentralEvent::DeviceDiscovered(peripheral_id)
                | CentralEvent::DeviceUpdated(peripheral_id) => {
                    self.on_device_advertised(peripheral_id).await;
                }
                CentralEvent::DeviceConnected(peripheral_id) => {
                    self.on_device_connected(peripheral_id).await;
                }
                CentralEvent::DeviceDisconnected(peripheral_id) => {
                    self.on_device_disconnected(peripheral_id).await;
                }
                _ => {}
            }
        }

        log::info!("Host event listener was stopped.");
    }

    async fn on_device_advertised(&self, peripheral_id: PeripheralId) {
        let Some(connect_filter) = self.connect_filter.as_ref() else {
            return;
        };
        if self.connecting.lock().unwrap().contains(&peripheral_id) {
            return;
        }

        let Ok(peripheral) = self.adapter.peripheral(&peripheral_id).await else {
            return;
        };
        let advertised = match peripheral.properties().await {
            Ok(Some(props)) => props.services,
            _ => return,
        };
        if !connect_filter(&advertised) || peripheral.is_connected().await.unwrap_or(false) {
            return;
        }

        if self.connecting.lock().unwrap().insert(peripheral_id.clone()) {
            log::debug!("Connecting to device {}", peripheral.address());

            // Connect in another task, so we can keep handling other devices meanwhile.
            let connecting = self.connecting.clone();
            tokio::spawn(async move {
                if let Err(e) = peripheral.connect().await {
                    log::warn!("Could not connect to {}: {:?}", peripheral.address(), e);

                    connecting.lock().unwrap().remove(&peripheral.id());
                }
            });
        }
    }

    async fn on_device_connected(&self, peripheral_id: PeripheralId) {
        self.connecting.lock().unwrap().remove(&peripheral_id);

        let Ok(peripheral) = self.adapter.peripheral(&peripheral_id).await else {
            return;
        };
        let address = peripheral.address().to_string();
        log::trace!("Device connected: {}", address);

        match discover(&peripheral).await {
            Ok(services) => {
                let snapshots = services
                    .iter()
                    .map(|service| snapshot(&address, service))
                    .collect();
                self.shared.observe(&address, snapshots);
            }
            Err(e) => log::warn!("Could not discover services of {}: {}", address, e),
        }
    }

    async fn on_device_disconnected(&self, peripheral_id: PeripheralId) {
        self.connecting.lock().unwrap().remove(&peripheral_id);

        if let Ok(peripheral) = self.adapter.peripheral(&peripheral_id).await {
            log::trace!("Device disconnected: {}", peripheral.address());

            self.shared.forget(&peripheral.address().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::characteristics::{BODY_SENSOR_LOCATION, HEART_RATE_MEASUREMENT};

    fn hr_snapshot(characteristics: Vec<Uuid>) -> ServiceSnapshot {
        ServiceSnapshot {
            service: Service::new(service_id("AA", HEART_RATE), HEART_RATE, "AA"),
            characteristics,
        }
    }

    #[test]
    fn test_ids_are_scoped_by_device() {
        let a = service_id("AA", HEART_RATE);
        let b = service_id("BB", HEART_RATE);
        assert_ne!(a, b);
        assert_ne!(
            characteristic_id(&a, HEART_RATE_MEASUREMENT),
            characteristic_id(&b, HEART_RATE_MEASUREMENT)
        );
    }

    #[test]
    fn test_diff_added_and_removed() {
        let snapshot = hr_snapshot(vec![HEART_RATE_MEASUREMENT]);

        assert_eq!(
            diff_services(&[], &[snapshot.clone()]),
            vec![HostEvent::ServiceAdded(snapshot.service.clone())]
        );
        assert_eq!(
            diff_services(&[snapshot.clone()], &[]),
            vec![HostEvent::ServiceRemoved(snapshot.service.clone())]
        );
        assert!(diff_services(&[snapshot.clone()], &[snapshot]).is_empty());
    }

    #[test]
    fn test_diff_changed_characteristics() {
        let before = hr_snapshot(vec![HEART_RATE_MEASUREMENT]);
        let after = hr_snapshot(vec![HEART_RATE_MEASUREMENT, BODY_SENSOR_LOCATION]);

        assert_eq!(
            diff_services(&[before], &[after.clone()]),
            vec![HostEvent::ServiceChanged(after.service)]
        );
    }

    #[test]
    fn test_forget_announces_removal() {
        let (event_sender, mut receiver) = broadcast::channel(8);
        let shared = Shared {
            state: Mutex::new(State::default()),
            event_sender,
        };
        let snapshot = hr_snapshot(vec![HEART_RATE_MEASUREMENT]);

        shared.observe("AA", vec![snapshot.clone()]);
        assert_eq!(
            receiver.try_recv().ok(),
            Some(HostEvent::ServiceAdded(snapshot.service.clone()))
        );
        assert!(shared.state.lock().unwrap().service(&snapshot.service.id).is_some());

        shared.forget("AA");
        assert_eq!(
            receiver.try_recv().ok(),
            Some(HostEvent::ServiceRemoved(snapshot.service.clone()))
        );
        assert!(shared.state.lock().unwrap().service(&snapshot.service.id).is_none());
    }

    #[test]
    fn test_forget_stops_forwarding_and_drops_values() {
        let (event_sender, _receiver) = broadcast::channel(8);
        let shared = Shared {
            state: Mutex::new(State::default()),
            event_sender,
        };
        let service = service_id("AA", HEART_RATE);
        let characteristic = Characteristic::new(
            characteristic_id(&service, HEART_RATE_MEASUREMENT),
            HEART_RATE_MEASUREMENT,
            service,
        );
        {
            let mut state = shared.state.lock().unwrap();
            state.subscribed.insert(
                ("AA".to_string(), HEART_RATE_MEASUREMENT),
                characteristic.clone(),
            );
            state.values.insert(characteristic.id.clone(), vec![0x00, 60]);
        }

        let (stopper, mut notifications) = Valved::new(futures::stream::pending::<()>());
        shared.track_forwarder("AA", stopper);
        assert!(shared.is_forwarding("AA"));

        shared.forget("AA");

        assert!(!shared.is_forwarding("AA"));
        assert_eq!(futures::executor::block_on(notifications.next()), None);
        let state = shared.state.lock().unwrap();
        assert!(state.values.get(&characteristic.id).is_none());
        assert!(state.subscribed.is_empty());
    }

    #[test]
    fn test_ended_forwarder_leaves_newer_one() {
        let (event_sender, _receiver) = broadcast::channel(8);
        let shared = Shared {
            state: Mutex::new(State::default()),
            event_sender,
        };

        let (first_stopper, mut first) = Valved::new(futures::stream::pending::<()>());
        let first_id = shared.track_forwarder("AA", first_stopper);
        let (second_stopper, _second) = Valved::new(futures::stream::pending::<()>());
        let second_id = shared.track_forwarder("AA", second_stopper);
        assert_ne!(first_id, second_id);

        // Replacing a forwarder stops the previous one.
        assert_eq!(futures::executor::block_on(first.next()), None);

        shared.forwarder_ended("AA", first_id);
        assert!(shared.is_forwarding("AA"));

        shared.forwarder_ended("AA", second_id);
        assert!(!shared.is_forwarding("AA"));
    }
}
