use crate::service::ServiceId;

/// A result type hardwired to use [`Error`] as its default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the Bluetooth host.
///
/// None of these are fatal to a [`Monitor`](crate::Monitor): the operation that hit one is
/// logged and treated as if the queried resource were absent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
    #[error("no bluetooth adapter at index {0}")]
    AdapterNotFound(usize),
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("service {0} not found")]
    ServiceNotFound(ServiceId),
    #[error("{0}")]
    Other(String),
}
