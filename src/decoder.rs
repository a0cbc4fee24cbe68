//! Decoding of Heart Rate Measurement and Body Sensor Location characteristic values.
//!
//! A Heart Rate Measurement value is laid out as follows (all multi-byte fields little-endian):
//!
//! | field            | size    | present when                   |
//! |------------------|---------|--------------------------------|
//! | flags            | 1       | always                         |
//! | heart rate       | 1 or 2  | always, width from flags bit 0 |
//! | energy expended  | 2       | flags bit 3                    |
//! | RR-interval      | 2       | flags bit 4                    |

use std::time::Duration;

const FORMAT_U16: u8 = 1 << 0;
const SENSOR_CONTACT_SHIFT: u8 = 1;
const SENSOR_CONTACT_MASK: u8 = 0b11;
const ENERGY_EXPENDED_PRESENT: u8 = 1 << 3;
const RR_INTERVAL_PRESENT: u8 = 1 << 4;

/// RR-interval values are expressed in units of 1/1024 second.
const RR_INTERVAL_RESOLUTION: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("value is too short for the heart rate field")]
    TooShort,
    #[error("value is too short for the energy expended field")]
    TruncatedEnergy,
    #[error("RR-interval field has an unexpected length")]
    MalformedRR,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartRateFormat {
    U8,
    U16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorContact {
    NotSupported,
    NotDetected,
    Detected,
}

impl SensorContact {
    fn from_bits(bits: u8) -> Self {
        match bits & SENSOR_CONTACT_MASK {
            0 | 1 => SensorContact::NotSupported,
            2 => SensorContact::NotDetected,
            3 => SensorContact::Detected,
            _ => unreachable!("sensor contact status is a 2-bit field"),
        }
    }
}

/// The flags byte at the start of every measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub format: HeartRateFormat,
    pub sensor_contact: SensorContact,
    pub energy_expended_present: bool,
    pub rr_interval_present: bool,
}

impl From<u8> for Flags {
    fn from(flags: u8) -> Self {
        Self {
            format: if flags & FORMAT_U16 != 0 {
                HeartRateFormat::U16
            } else {
                HeartRateFormat::U8
            },
            sensor_contact: SensorContact::from_bits(flags >> SENSOR_CONTACT_SHIFT),
            energy_expended_present: flags & ENERGY_EXPENDED_PRESENT != 0,
            rr_interval_present: flags & RR_INTERVAL_PRESENT != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartRateMeasurement {
    pub flags: Flags,
    /// Beats per minute.
    pub heart_rate: u16,
    pub sensor_contact: SensorContact,
    /// Cumulative energy in kilojoules. Carries the last reported value when this payload
    /// omitted the field.
    pub energy_expended: Option<u16>,
    /// First RR-interval of the payload, in 1/1024 s.
    pub rr_interval: Option<u16>,
}

impl HeartRateMeasurement {
    /// The RR-interval converted to a [`Duration`].
    pub fn rr_interval_duration(&self) -> Option<Duration> {
        self.rr_interval.map(|rr| {
            Duration::from_micros(u64::from(rr) * 1_000_000 / u64::from(RR_INTERVAL_RESOLUTION))
        })
    }
}

fn read_u16_le(value: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([value[offset], value[offset + 1]])
}

/// Decodes a Heart Rate Measurement value.
///
/// Energy expended is only reported intermittently by sensors, so the caller passes in the
/// last cumulative value it retained. The returned cumulative value is the one to retain for
/// the next call: the payload's value when present, otherwise `previous_energy` unchanged.
///
/// Only the first RR-interval is decoded, and the payload must end right after it.
pub fn decode(
    value: &[u8],
    previous_energy: Option<u16>,
) -> Result<(HeartRateMeasurement, Option<u16>), DecodeError> {
    if value.len() < 2 {
        return Err(DecodeError::TooShort);
    }

    let flags = Flags::from(value[0]);

    let heart_rate_end = match flags.format {
        HeartRateFormat::U8 => 2,
        HeartRateFormat::U16 => 3,
    };
    if value.len() < heart_rate_end {
        return Err(DecodeError::TooShort);
    }

    let heart_rate = match flags.format {
        HeartRateFormat::U8 => u16::from(value[1]),
        HeartRateFormat::U16 => read_u16_le(value, 1),
    };
    log::trace!("{:?} heart rate: {}", flags.format, heart_rate);

    let mut next = heart_rate_end;

    let mut energy_expended = None;
    if flags.energy_expended_present {
        if value.len() < next + 2 {
            return Err(DecodeError::TruncatedEnergy);
        }
        energy_expended = Some(read_u16_le(value, next));
        next += 2;
    }

    let mut rr_interval = None;
    if flags.rr_interval_present {
        if value.len() != next + 2 {
            return Err(DecodeError::MalformedRR);
        }
        rr_interval = Some(read_u16_le(value, next));
    }

    let cumulative = energy_expended.or(previous_energy);

    Ok((
        HeartRateMeasurement {
            flags,
            heart_rate,
            sensor_contact: flags.sensor_contact,
            energy_expended: cumulative,
            rr_interval,
        },
        cumulative,
    ))
}

/// Where on the body a sensor is worn, as reported by the Body Sensor Location characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySensorLocation {
    Other,
    Chest,
    Wrist,
    Finger,
    Hand,
    EarLobe,
    Foot,
    Reserved(u8),
}

impl BodySensorLocation {
    pub fn decode(value: &[u8]) -> Result<Self, DecodeError> {
        let code = *value.first().ok_or(DecodeError::TooShort)?;
        Ok(match code {
            0 => BodySensorLocation::Other,
            1 => BodySensorLocation::Chest,
            2 => BodySensorLocation::Wrist,
            3 => BodySensorLocation::Finger,
            4 => BodySensorLocation::Hand,
            5 => BodySensorLocation::EarLobe,
            6 => BodySensorLocation::Foot,
            code => BodySensorLocation::Reserved(code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_heart_rate() {
        let (m, energy) = decode(&[0x00, 60], None).unwrap();
        assert_eq!(m.heart_rate, 60);
        assert_eq!(m.flags.format, HeartRateFormat::U8);
        assert_eq!(m.sensor_contact, SensorContact::NotSupported);
        assert_eq!(m.energy_expended, None);
        assert_eq!(m.rr_interval, None);
        assert_eq!(energy, None);
    }

    #[test]
    fn test_u16_heart_rate() {
        let (m, _) = decode(&[0x01, 0x4B, 0x00], None).unwrap();
        assert_eq!(m.heart_rate, 75);
        assert_eq!(m.flags.format, HeartRateFormat::U16);

        let (m, _) = decode(&[0x01, 0x2C, 0x01], None).unwrap();
        assert_eq!(m.heart_rate, 300);
    }

    #[test]
    fn test_energy_expended_is_retained() {
        let (m, energy) = decode(&[0x09, 60, 0x10, 0x00], None).unwrap();
        assert_eq!(m.heart_rate, 60);
        assert_eq!(m.energy_expended, Some(16));
        assert_eq!(energy, Some(16));

        let (m, energy) = decode(&[0x00, 62], energy).unwrap();
        assert_eq!(m.heart_rate, 62);
        assert_eq!(m.energy_expended, Some(16));
        assert_eq!(energy, Some(16));

        let (m, energy) = decode(&[0x08, 63, 0x20, 0x00], energy).unwrap();
        assert_eq!(m.energy_expended, Some(32));
        assert_eq!(energy, Some(32));
    }

    #[test]
    fn test_rr_interval() {
        let (m, _) = decode(&[0x10, 60, 0x00, 0x04], None).unwrap();
        assert_eq!(m.rr_interval, Some(1024));
        assert_eq!(m.rr_interval_duration(), Some(Duration::from_secs(1)));

        let (m, energy) = decode(&[0x18, 72, 0x07, 0x00, 0x00, 0x02], None).unwrap();
        assert_eq!(m.heart_rate, 72);
        assert_eq!(m.energy_expended, Some(7));
        assert_eq!(m.rr_interval, Some(512));
        assert_eq!(energy, Some(7));
    }

    #[test]
    fn test_too_short() {
        assert_eq!(decode(&[], None), Err(DecodeError::TooShort));
        assert_eq!(decode(&[0x00], None), Err(DecodeError::TooShort));
        assert_eq!(decode(&[0x01, 0x4B], None), Err(DecodeError::TooShort));
    }

    #[test]
    fn test_truncated_energy() {
        assert_eq!(decode(&[0x08, 60], None), Err(DecodeError::TruncatedEnergy));
        assert_eq!(
            decode(&[0x08, 60, 0x10], Some(3)),
            Err(DecodeError::TruncatedEnergy)
        );
    }

    #[test]
    fn test_energy_allows_trailing_bytes() {
        let (m, _) = decode(&[0x08, 60, 0x10, 0x00, 0xFF], None).unwrap();
        assert_eq!(m.energy_expended, Some(16));
    }

    #[test]
    fn test_malformed_rr_requires_exact_length() {
        assert_eq!(
            decode(&[0x11, 0x00, 0x00], None),
            Err(DecodeError::MalformedRR)
        );
        assert_eq!(
            decode(&[0x10, 60, 0x00], None),
            Err(DecodeError::MalformedRR)
        );
        // A second RR-interval is not accepted.
        assert_eq!(
            decode(&[0x10, 60, 0x00, 0x04, 0x00, 0x04], None),
            Err(DecodeError::MalformedRR)
        );
    }

    #[test]
    fn test_sensor_contact_codes() {
        let contact = |flags: u8| decode(&[flags, 60], None).unwrap().0.sensor_contact;

        assert_eq!(contact(0b000), SensorContact::NotSupported);
        assert_eq!(contact(0b010), SensorContact::NotSupported);
        assert_eq!(contact(0b100), SensorContact::NotDetected);
        assert_eq!(contact(0b110), SensorContact::Detected);
    }

    #[test]
    fn test_body_sensor_location() {
        assert_eq!(BodySensorLocation::decode(&[1]), Ok(BodySensorLocation::Chest));
        assert_eq!(BodySensorLocation::decode(&[6]), Ok(BodySensorLocation::Foot));
        assert_eq!(
            BodySensorLocation::decode(&[0x42]),
            Ok(BodySensorLocation::Reserved(0x42))
        );
        assert_eq!(BodySensorLocation::decode(&[]), Err(DecodeError::TooShort));
    }
}
