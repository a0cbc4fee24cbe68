//! The selection state machine.
//!
//! The [`Controller`] never talks to the host itself. Every host interaction is returned as a
//! [`Request`], and its outcome comes back later as an [`Event`] that names the device or
//! service it was issued for. Outcomes whose context has moved on in the meantime (another
//! device picked, another service selected) are dropped when they arrive, so any number of
//! requests may be in flight and complete in any order.

use crate::characteristic::Characteristic;
use crate::common::characteristics::{BODY_SENSOR_LOCATION, HEART_RATE_MEASUREMENT};
use crate::decoder::{self, BodySensorLocation};
use crate::device::Device;
use crate::host::HostEvent;
use crate::presenter::Presenter;
use crate::registry::DeviceRegistry;
use crate::service::{Service, ServiceId};
use crate::session::Session;
use crate::Result;

/// Why a device is being looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLookup {
    /// A Heart Rate service appeared on a device that is not registered yet.
    Register,
    /// A Heart Rate service disappeared from a registered device.
    Sweep,
}

/// Why a device's services are being enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceLookup {
    /// Startup scan of a device the host already knew about.
    Discover(Device),
    /// The user picked this device.
    Select,
    /// Checking whether a registered device still has a Heart Rate service.
    Sweep,
}

/// A host call the controller needs made on its behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    KnownDevices,
    Device {
        address: String,
        purpose: DeviceLookup,
    },
    Services {
        address: String,
        purpose: ServiceLookup,
    },
    Characteristics(ServiceId),
}

/// Input to the [`Controller`].
#[derive(Debug)]
pub enum Event {
    /// The user picked a device, or cleared the selection.
    DeviceSelected(Option<String>),
    Host(HostEvent),
    KnownDevices(Result<Vec<Device>>),
    Device {
        address: String,
        purpose: DeviceLookup,
        result: Result<Device>,
    },
    Services {
        address: String,
        purpose: ServiceLookup,
        result: Result<Vec<Service>>,
    },
    Characteristics {
        service: ServiceId,
        result: Result<Vec<Characteristic>>,
    },
}

impl From<HostEvent> for Event {
    fn from(event: HostEvent) -> Self {
        Event::Host(event)
    }
}

pub struct Controller<P> {
    session: Session,
    registry: DeviceRegistry,
    presenter: P,
    /// Address of the device the user picked last, while its services are being fetched.
    selected_device: Option<String>,
}

impl<P: Presenter> Controller<P> {
    pub fn new(presenter: P) -> Self {
        Self {
            session: Session::new(),
            registry: DeviceRegistry::new(),
            presenter,
            selected_device: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    /// Resets the display and, if asked to, requests the devices the host already knows.
    pub fn start(&mut self, discover_known_devices: bool) -> Vec<Request> {
        let mut requests = self.select_service(None);
        self.presenter.device_list_changed(self.registry.view());
        if discover_known_devices {
            requests.push(Request::KnownDevices);
        }
        requests
    }

    pub fn teardown(&mut self) {
        self.selected_device = None;
        self.session.teardown();
        self.presenter.fields_cleared();
    }

    pub fn handle(&mut self, event: Event) -> Vec<Request> {
        match event {
            Event::DeviceSelected(address) => self.on_device_selected(address),
            Event::Host(HostEvent::ServiceAdded(service)) => self.on_service_added(service),
            Event::Host(HostEvent::ServiceRemoved(service)) => self.on_service_removed(service),
            Event::Host(HostEvent::ServiceChanged(service)) => self.on_service_changed(service),
            Event::Host(HostEvent::CharacteristicValueChanged(characteristic)) => {
                self.on_value_changed(characteristic);
                Vec::new()
            }
            Event::KnownDevices(result) => self.on_known_devices(result),
            Event::Device {
                address,
                purpose,
                result,
            } => self.on_device(address, purpose, result),
            Event::Services {
                address,
                purpose,
                result,
            } => self.on_services(address, purpose, result),
            Event::Characteristics { service, result } => {
                self.on_characteristics(service, result);
                Vec::new()
            }
        }
    }

    fn select_service(&mut self, service: Option<Service>) -> Vec<Request> {
        self.presenter.fields_cleared();

        let request = match &service {
            Some(service) => {
                log::info!("GATT service selected: {}", service.id);
                vec![Request::Characteristics(service.id.clone())]
            }
            None => {
                log::info!("No service selected.");
                Vec::new()
            }
        };

        self.session.select_service(service);
        request
    }

    fn on_device_selected(&mut self, address: Option<String>) -> Vec<Request> {
        self.selected_device = address.clone();

        match address {
            Some(address) => vec![Request::Services {
                address,
                purpose: ServiceLookup::Select,
            }],
            None => self.select_service(None),
        }
    }

    fn on_service_added(&mut self, service: Service) -> Vec<Request> {
        if !service.is_heart_rate() {
            return Vec::new();
        }

        log::info!("New Heart Rate service added: {}", service.id);
        if self.registry.contains(&service.device_address) {
            return Vec::new();
        }

        vec![Request::Device {
            address: service.device_address,
            purpose: DeviceLookup::Register,
        }]
    }

    fn on_service_removed(&mut self, service: Service) -> Vec<Request> {
        if !service.is_heart_rate() {
            return Vec::new();
        }

        log::info!("Heart Rate service removed: {}", service.id);

        let mut requests = Vec::new();
        if self.session.is_selected(&service.id) {
            log::info!("The selected service disappeared!");
            requests.extend(self.select_service(None));
        }

        if self.registry.contains(&service.device_address) {
            requests.push(Request::Device {
                address: service.device_address,
                purpose: DeviceLookup::Sweep,
            });
        }
        requests
    }

    fn on_service_changed(&mut self, service: Service) -> Vec<Request> {
        if !self.session.is_selected(&service.id) {
            return Vec::new();
        }

        log::info!("The selected service has changed");
        self.select_service(Some(service))
    }

    fn on_known_devices(&mut self, result: Result<Vec<Device>>) -> Vec<Request> {
        match result {
            Ok(devices) => devices
                .into_iter()
                .map(|device| Request::Services {
                    address: device.address.clone(),
                    purpose: ServiceLookup::Discover(device),
                })
                .collect(),
            Err(e) => {
                log::warn!("Could not list known devices: {}", e);
                Vec::new()
            }
        }
    }

    fn on_device(
        &mut self,
        address: String,
        purpose: DeviceLookup,
        result: Result<Device>,
    ) -> Vec<Request> {
        let device = match result {
            Ok(device) => device,
            Err(e) => {
                log::warn!("Could not look up device {}: {}", address, e);
                return Vec::new();
            }
        };

        match purpose {
            DeviceLookup::Register => {
                self.registry.on_service_observed(&device);
                self.presenter.device_list_changed(self.registry.view());
                Vec::new()
            }
            DeviceLookup::Sweep => vec![Request::Services {
                address: device.address,
                purpose: ServiceLookup::Sweep,
            }],
        }
    }

    fn on_services(
        &mut self,
        address: String,
        purpose: ServiceLookup,
        result: Result<Vec<Service>>,
    ) -> Vec<Request> {
        match purpose {
            ServiceLookup::Discover(device) => {
                match result {
                    Ok(services) if services.iter().any(Service::is_heart_rate) => {
                        self.registry.on_service_observed(&device);
                        self.presenter.device_list_changed(self.registry.view());
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("Could not list services of {}: {}", address, e),
                }
                Vec::new()
            }
            ServiceLookup::Select => {
                if self.selected_device.as_deref() != Some(address.as_str()) {
                    log::debug!("Ignoring services of {}, no longer selected", address);
                    return Vec::new();
                }

                match result {
                    Ok(services) => {
                        let service = services.into_iter().filter(Service::is_heart_rate).last();
                        self.select_service(service)
                    }
                    Err(e) => {
                        log::warn!("Could not list services of {}: {}", address, e);
                        self.select_service(None)
                    }
                }
            }
            ServiceLookup::Sweep => {
                let still_present = match result {
                    Ok(services) => services.iter().any(Service::is_heart_rate),
                    Err(e) => {
                        log::warn!("Could not list services of {}: {}", address, e);
                        false
                    }
                };

                if !still_present && self.registry.on_service_no_longer_present(&address) {
                    self.presenter.device_list_changed(self.registry.view());
                }
                Vec::new()
            }
        }
    }

    fn on_characteristics(&mut self, service: ServiceId, result: Result<Vec<Characteristic>>) {
        if !self.session.is_selected(&service) {
            log::debug!("Ignoring characteristics of {}, no longer selected", service);
            return;
        }

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                log::warn!("Could not list characteristics of {}: {}", service, e);
                return;
            }
        };

        if characteristics.is_empty() {
            log::info!("Service has no characteristics: {}", service);
            return;
        }

        // When a characteristic appears more than once, the last one wins.
        let mut location = None;
        let mut measurement = None;
        for characteristic in characteristics {
            if characteristic.uuid == HEART_RATE_MEASUREMENT {
                measurement = Some(characteristic);
            } else if characteristic.uuid == BODY_SENSOR_LOCATION {
                location = Some(characteristic);
            }
        }

        if let Some(characteristic) = location {
            if self.session.bind_body_sensor_location(characteristic) {
                self.update_body_sensor_location();
            }
        }

        if let Some(characteristic) = measurement {
            log::info!(
                "Setting Heart Rate Measurement Characteristic: {}",
                characteristic.id
            );
            if self.session.bind(characteristic) {
                self.update_measurement();
            }
        }
    }

    fn on_value_changed(&mut self, characteristic: Characteristic) {
        let uuid = characteristic.uuid;
        if self.session.refresh(characteristic).is_none() {
            return;
        }

        if uuid == HEART_RATE_MEASUREMENT {
            log::debug!("Heart Rate Measurement value changed");
            self.update_measurement();
        } else if uuid == BODY_SENSOR_LOCATION {
            self.update_body_sensor_location();
        }
    }

    fn update_measurement(&mut self) {
        let result = {
            let Some(characteristic) = self.session.bound_characteristic() else {
                log::debug!("No Heart Rate Measurement Characteristic selected");
                return;
            };
            let Some(value) = characteristic.value.as_deref() else {
                log::debug!("No Heart Rate Measurement value received yet");
                return;
            };
            decoder::decode(value, self.session.cumulative_energy())
        };

        match result {
            Ok((measurement, cumulative)) => {
                self.session.retain_energy(cumulative);
                self.presenter.heart_rate(measurement.heart_rate);
                self.presenter
                    .sensor_contact(Some(measurement.sensor_contact));
                self.presenter.energy_expended(measurement.energy_expended);
                self.presenter.rr_interval(measurement.rr_interval);
            }
            Err(e) => log::warn!("Invalid Heart Rate Measurement value: {}", e),
        }
    }

    fn update_body_sensor_location(&mut self) {
        let Some(value) = self
            .session
            .body_sensor_location()
            .and_then(|characteristic| characteristic.value.as_deref())
        else {
            return;
        };

        match BodySensorLocation::decode(value) {
            Ok(location) => self.presenter.body_sensor_location(Some(location)),
            Err(e) => log::warn!("Invalid Body Sensor Location value: {}", e),
        }
    }
}
