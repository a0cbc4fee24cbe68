use std::fmt;

use uuid::Uuid;

use crate::common::services::HEART_RATE;

/// Opaque, stable identity of a GATT service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A GATT service exposed by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: ServiceId,
    pub uuid: Uuid,
    pub device_address: String,
}

impl Service {
    pub fn new(id: ServiceId, uuid: Uuid, device_address: impl Into<String>) -> Self {
        Self {
            id,
            uuid,
            device_address: device_address.into(),
        }
    }

    #[inline]
    pub fn is_heart_rate(&self) -> bool {
        self.uuid == HEART_RATE
    }
}
