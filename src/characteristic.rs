use std::fmt;

use uuid::Uuid;

use crate::service::ServiceId;

/// Opaque, stable identity of a GATT characteristic instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicId(String);

impl CharacteristicId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A GATT characteristic together with the latest value the host has seen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub id: CharacteristicId,
    pub uuid: Uuid,
    pub service: ServiceId,
    /// `None` until the first read or notification arrives.
    pub value: Option<Vec<u8>>,
}

impl Characteristic {
    pub fn new(id: CharacteristicId, uuid: Uuid, service: ServiceId) -> Self {
        Self {
            id,
            uuid,
            service,
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }
}
