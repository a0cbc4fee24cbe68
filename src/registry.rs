use crate::device::Device;

/// A device offered for selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub address: String,
    pub name: String,
}

/// Snapshot of the registry handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceList {
    NoDevices,
    Devices(Vec<DeviceEntry>),
}

impl DeviceList {
    pub fn is_empty(&self) -> bool {
        matches!(self, DeviceList::NoDevices)
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        match self {
            DeviceList::NoDevices => &[],
            DeviceList::Devices(entries) => entries,
        }
    }
}

/// Devices that expose a Heart Rate service, in discovery order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Vec<DeviceEntry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.iter().any(|entry| entry.address == address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts the device, or renames it in place if it is already registered.
    pub fn on_service_observed(&mut self, device: &Device) {
        let name = device.display_name().to_string();

        match self
            .entries
            .iter_mut()
            .find(|entry| entry.address == device.address)
        {
            Some(entry) => entry.name = name,
            None => {
                log::info!("Found device with Heart Rate service: {}", device.address);
                self.entries.push(DeviceEntry {
                    address: device.address.clone(),
                    name,
                });
            }
        }
    }

    /// Removes the device. Returns whether it was registered.
    ///
    /// Callers are expected to have confirmed that the device no longer exposes a Heart Rate
    /// service before calling this.
    pub fn on_service_no_longer_present(&mut self, address: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.address != address);

        let removed = self.entries.len() != before;
        if removed {
            log::info!("Removing device: {}", address);
        }
        removed
    }

    pub fn view(&self) -> DeviceList {
        if self.entries.is_empty() {
            DeviceList::NoDevices
        } else {
            DeviceList::Devices(self.entries.clone())
        }
    }
}
