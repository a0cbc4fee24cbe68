//! BLE heart rate monitor client.
//!
//! Tracks the devices that expose a Heart Rate service, lets the user select one, and decodes
//! the Heart Rate Measurement notifications it streams into display updates.
//!
//! ## Usage
//!
//! Here is an example on how to print heart rate updates of the first device found:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use hrmon::{BtleHost, DisplayUpdate, HostConfig, Monitor, MonitorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hrmon::Error> {
//!     pretty_env_logger::init();
//!
//!     let host = Arc::new(BtleHost::new(HostConfig::default()).await?);
//!
//!     let mut monitor = Monitor::new(MonitorConfig::default());
//!     let mut updates = monitor.update_stream();
//!     monitor.start(host);
//!
//!     while let Some(update) = updates.next().await {
//!         match update {
//!             DisplayUpdate::DeviceList(devices) => {
//!                 let first = devices.entries().first().map(|entry| entry.address.clone());
//!                 monitor.select_device(first);
//!             }
//!             DisplayUpdate::HeartRate(bpm) => println!("{} BPM", bpm),
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//!```
//!
//! Decoding can also be used on its own:
//!
//! ```rust
//! let (measurement, energy) = hrmon::decoder::decode(&[0x09, 60, 0x10, 0x00], None).unwrap();
//! assert_eq!(measurement.heart_rate, 60);
//! assert_eq!(energy, Some(16));
//! ```

#![warn(clippy::all, future_incompatible, nonstandard_style, rust_2018_idioms)]

pub use btle::{BtleHost, HostConfig};
pub use characteristic::{Characteristic, CharacteristicId};
pub use controller::{Controller, DeviceLookup, Event, Request, ServiceLookup};
pub use device::Device;
pub use error::{Error, Result};
pub use host::{Host, HostEvent, HostEventStream};
pub use monitor::{Monitor, MonitorConfig};
pub use presenter::{DisplayUpdate, Presenter};
pub use registry::{DeviceEntry, DeviceList, DeviceRegistry};
pub use service::{Service, ServiceId};
pub use session::{Session, SessionState};

mod btle;
mod characteristic;
mod controller;
mod device;
mod error;
mod host;
mod monitor;
mod presenter;
mod registry;
mod service;
mod session;

pub mod common;
pub mod decoder;
