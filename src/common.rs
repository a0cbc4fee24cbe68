//! Bluetooth SIG assigned numbers used by the heart rate profile.

pub mod services {
    use btleplug::api::bleuuid::uuid_from_u16;
    use uuid::Uuid;

    pub const HEART_RATE: Uuid = uuid_from_u16(0x180D);
}

pub mod characteristics {
    use btleplug::api::bleuuid::uuid_from_u16;
    use uuid::Uuid;

    pub const HEART_RATE_MEASUREMENT: Uuid = uuid_from_u16(0x2A37);
    pub const BODY_SENSOR_LOCATION: Uuid = uuid_from_u16(0x2A38);
    pub const HEART_RATE_CONTROL_POINT: Uuid = uuid_from_u16(0x2A39);
}
