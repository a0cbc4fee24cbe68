use tokio::sync::broadcast::Sender;

use crate::decoder::{BodySensorLocation, SensorContact};
use crate::registry::DeviceList;

/// A change to what the user should be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayUpdate {
    /// All measurement fields should be blanked.
    FieldsCleared,
    HeartRate(u16),
    SensorContact(Option<SensorContact>),
    EnergyExpended(Option<u16>),
    RrInterval(Option<u16>),
    BodySensorLocation(Option<BodySensorLocation>),
    DeviceList(DeviceList),
}

/// Receives display updates from a [`Controller`](crate::Controller).
pub trait Presenter {
    fn present(&mut self, update: DisplayUpdate);

    fn fields_cleared(&mut self) {
        self.present(DisplayUpdate::FieldsCleared);
    }

    fn heart_rate(&mut self, bpm: u16) {
        self.present(DisplayUpdate::HeartRate(bpm));
    }

    fn sensor_contact(&mut self, status: Option<SensorContact>) {
        self.present(DisplayUpdate::SensorContact(status));
    }

    fn energy_expended(&mut self, kilojoules: Option<u16>) {
        self.present(DisplayUpdate::EnergyExpended(kilojoules));
    }

    fn rr_interval(&mut self, rr: Option<u16>) {
        self.present(DisplayUpdate::RrInterval(rr));
    }

    fn body_sensor_location(&mut self, location: Option<BodySensorLocation>) {
        self.present(DisplayUpdate::BodySensorLocation(location));
    }

    fn device_list_changed(&mut self, devices: DeviceList) {
        self.present(DisplayUpdate::DeviceList(devices));
    }
}

impl Presenter for Vec<DisplayUpdate> {
    fn present(&mut self, update: DisplayUpdate) {
        self.push(update);
    }
}

impl Presenter for Sender<DisplayUpdate> {
    fn present(&mut self, update: DisplayUpdate) {
        // Nobody listening is not an error.
        self.send(update).ok();
    }
}
