use crate::characteristic::{Characteristic, CharacteristicId};
use crate::common::characteristics::{BODY_SENSOR_LOCATION, HEART_RATE_MEASUREMENT};
use crate::service::{Service, ServiceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unselected,
    ServiceSelected,
    Bound,
}

/// The selected Heart Rate service and the characteristics bound from it.
///
/// A measurement characteristic can only be bound while the service it belongs to is
/// selected, and every selection change unbinds it and forgets the retained energy total.
#[derive(Debug, Default)]
pub struct Session {
    selected_service: Option<Service>,
    measurement: Option<Characteristic>,
    body_sensor_location: Option<Characteristic>,
    cumulative_energy: Option<u16>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        match (&self.selected_service, &self.measurement) {
            (None, _) => SessionState::Unselected,
            (Some(_), None) => SessionState::ServiceSelected,
            (Some(_), Some(_)) => SessionState::Bound,
        }
    }

    pub fn selected_service(&self) -> Option<&Service> {
        self.selected_service.as_ref()
    }

    pub fn is_selected(&self, service: &ServiceId) -> bool {
        self.selected_service
            .as_ref()
            .map_or(false, |selected| &selected.id == service)
    }

    pub fn bound_characteristic(&self) -> Option<&Characteristic> {
        self.measurement.as_ref()
    }

    pub fn body_sensor_location(&self) -> Option<&Characteristic> {
        self.body_sensor_location.as_ref()
    }

    pub fn cumulative_energy(&self) -> Option<u16> {
        self.cumulative_energy
    }

    pub fn retain_energy(&mut self, cumulative: Option<u16>) {
        self.cumulative_energy = cumulative;
    }

    pub fn select_service(&mut self, service: Option<Service>) {
        self.selected_service = service;
        self.measurement = None;
        self.body_sensor_location = None;
        self.cumulative_energy = None;
    }

    /// Binds a Heart Rate Measurement characteristic of the selected service.
    ///
    /// Returns `false` and leaves the session untouched if the characteristic is not a
    /// measurement characteristic of the currently selected service.
    pub fn bind(&mut self, characteristic: Characteristic) -> bool {
        if characteristic.uuid != HEART_RATE_MEASUREMENT || !self.is_selected(&characteristic.service)
        {
            return false;
        }
        self.measurement = Some(characteristic);
        true
    }

    pub fn bind_body_sensor_location(&mut self, characteristic: Characteristic) -> bool {
        if characteristic.uuid != BODY_SENSOR_LOCATION || !self.is_selected(&characteristic.service)
        {
            return false;
        }
        self.body_sensor_location = Some(characteristic);
        true
    }

    /// Replaces the bound characteristic whose identity matches with its updated copy.
    pub fn refresh(&mut self, characteristic: Characteristic) -> Option<&Characteristic> {
        let slot = [&mut self.measurement, &mut self.body_sensor_location]
            .into_iter()
            .find(|slot| is_same(slot.as_ref(), &characteristic.id))?;
        *slot = Some(characteristic);
        slot.as_ref()
    }

    pub fn teardown(&mut self) {
        self.select_service(None);
    }
}

fn is_same(bound: Option<&Characteristic>, id: &CharacteristicId) -> bool {
    bound.map_or(false, |bound| &bound.id == id)
}
