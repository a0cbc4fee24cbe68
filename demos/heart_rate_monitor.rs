//! This example waits for a device with a Heart Rate service, selects it and prints the
//! measurements it streams. A device address may be given as a command line argument to
//! select that device instead of the first one found.

use std::sync::Arc;

use futures::StreamExt;
use hrmon::{BtleHost, DisplayUpdate, Error, HostConfig, Monitor, MonitorConfig};

#[tokio::main]
async fn main() -> Result<(), Error> {
    pretty_env_logger::init();

    let wanted = std::env::args().nth(1);

    let host = Arc::new(BtleHost::new(HostConfig::default()).await?);

    let mut monitor = Monitor::new(MonitorConfig::default());
    let mut updates = monitor.update_stream();
    monitor.start(host);

    let mut selected = None;

    while let Some(update) = updates.next().await {
        match update {
            DisplayUpdate::DeviceList(devices) => {
                for entry in devices.entries() {
                    println!("Device: {} ({})", entry.name, entry.address);
                }

                let pick = devices
                    .entries()
                    .iter()
                    .find(|entry| wanted.as_ref().map_or(true, |wanted| &entry.address == wanted))
                    .map(|entry| entry.address.clone());

                if pick != selected {
                    selected = pick.clone();
                    monitor.select_device(pick);
                }
            }
            DisplayUpdate::FieldsCleared => println!("-"),
            DisplayUpdate::HeartRate(bpm) => println!("Heart rate: {} BPM", bpm),
            DisplayUpdate::SensorContact(Some(contact)) => println!("Sensor contact: {:?}", contact),
            DisplayUpdate::EnergyExpended(Some(kj)) => println!("Energy expended: {} kJ", kj),
            DisplayUpdate::RrInterval(Some(rr)) => println!("RR-interval: {}/1024 s", rr),
            DisplayUpdate::BodySensorLocation(Some(location)) => {
                println!("Body sensor location: {:?}", location)
            }
            _ => {}
        }
    }

    Ok(())
}
