use bitflags::bitflags;
use serde::Serialize;
use strum_macros::Display;
use thiserror::Error;
use tracing::instrument;

bitflags! {
    /// Flags byte at the start of every Heart Rate Measurement value.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct MeasurementFlags: u8 {
        /// Heart rate is a 16-bit value instead of an 8-bit one.
        const RATE_U16 = 0b0000_0001;
        /// Sensor reports skin contact. Only meaningful with `CONTACT_SUPPORTED`.
        const CONTACT_DETECTED = 0b0000_0010;
        /// Sensor supports contact detection.
        const CONTACT_SUPPORTED = 0b0000_0100;
        /// An energy expended field follows the heart rate.
        const ENERGY_EXPENDED = 0b0000_1000;
        /// RR intervals fill the rest of the value.
        const RR_INTERVALS = 0b0001_0000;
    }
}

/// Skin-contact status reported by the sensor.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorContact {
    #[strum(to_string = "not supported")]
    NotSupported,
    #[strum(to_string = "detected")]
    ContactDetected,
    #[strum(to_string = "not detected")]
    NoContact,
}

/// Measurement field that a truncated value ran out of bytes for.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum MeasurementField {
    #[strum(to_string = "flags")]
    Flags,
    #[strum(to_string = "heart rate")]
    HeartRate,
    #[strum(to_string = "energy expended")]
    EnergyExpended,
}

/// Errors returned while decoding a Heart Rate Measurement value.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum MeasurementDecodeError {
    #[error(
        "measurement truncated reading {field}: needed {needed} byte(s) at the cursor, {available} available"
    )]
    Truncated {
        field: MeasurementField,
        needed: usize,
        available: usize,
    },
}

/// One decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct HeartRateMeasurement {
    heart_rate_bpm: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    sensor_contact: Option<SensorContact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    energy_expended: Option<u16>,
    rr_intervals: Vec<u16>,
}

impl HeartRateMeasurement {
    /// Heart rate in beats per minute, widened from the 8- or 16-bit source field.
    #[must_use]
    pub fn heart_rate_bpm(&self) -> u16 {
        self.heart_rate_bpm
    }

    /// Contact status, present only when the sensor supports contact detection.
    #[must_use]
    pub fn sensor_contact(&self) -> Option<SensorContact> {
        self.sensor_contact
    }

    /// Accumulated energy expended, as transmitted (the profile defines the unit as kilojoules).
    #[must_use]
    pub fn energy_expended(&self) -> Option<u16> {
        self.energy_expended
    }

    /// RR intervals in units of 1/1024 second, in transmission order.
    #[must_use]
    pub fn rr_intervals(&self) -> &[u16] {
        &self.rr_intervals
    }

    /// RR intervals converted to milliseconds.
    #[must_use]
    pub fn rr_intervals_ms(&self) -> Vec<f64> {
        self.rr_intervals
            .iter()
            .map(|interval| f64::from(*interval) * 1000.0 / 1024.0)
            .collect()
    }
}

/// Decodes raw Heart Rate Measurement characteristic values.
pub struct MeasurementDecoder;

impl MeasurementDecoder {
    /// Decodes one characteristic value.
    ///
    /// Reserved flag bits are ignored. A trailing odd byte in the RR-interval
    /// region is discarded.
    ///
    /// ```
    /// let reading = hrm::MeasurementDecoder::decode(&[0x00, 0x48])?;
    /// assert_eq!(72, reading.heart_rate_bpm());
    /// assert!(reading.rr_intervals().is_empty());
    /// # Ok::<(), hrm::MeasurementDecodeError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`MeasurementDecodeError::Truncated`] when the value ends before a
    /// field its flags announce.
    #[instrument(skip(payload), level = "trace", fields(payload_len = payload.len()))]
    pub fn decode(payload: &[u8]) -> Result<HeartRateMeasurement, MeasurementDecodeError> {
        let mut cursor = Cursor::new(payload);
        let flags = MeasurementFlags::from_bits_retain(cursor.read_u8(MeasurementField::Flags)?);

        let heart_rate_bpm = if flags.contains(MeasurementFlags::RATE_U16) {
            cursor.read_u16_le(MeasurementField::HeartRate)?
        } else {
            u16::from(cursor.read_u8(MeasurementField::HeartRate)?)
        };

        let sensor_contact = if !flags.contains(MeasurementFlags::CONTACT_SUPPORTED) {
            None
        } else if flags.contains(MeasurementFlags::CONTACT_DETECTED) {
            Some(SensorContact::ContactDetected)
        } else {
            Some(SensorContact::NoContact)
        };

        let energy_expended = if flags.contains(MeasurementFlags::ENERGY_EXPENDED) {
            Some(cursor.read_u16_le(MeasurementField::EnergyExpended)?)
        } else {
            None
        };

        let rr_intervals = if flags.contains(MeasurementFlags::RR_INTERVALS) {
            cursor
                .remaining()
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect()
        } else {
            Vec::new()
        };

        Ok(HeartRateMeasurement {
            heart_rate_bpm,
            sensor_contact,
            energy_expended,
            rr_intervals,
        })
    }
}

struct Cursor<'a> {
    payload: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, offset: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.payload[self.offset..]
    }

    fn take<const N: usize>(
        &mut self,
        field: MeasurementField,
    ) -> Result<[u8; N], MeasurementDecodeError> {
        let remaining = self.remaining();
        let Some(bytes) = remaining.first_chunk::<N>() else {
            return Err(MeasurementDecodeError::Truncated {
                field,
                needed: N,
                available: remaining.len(),
            });
        };
        self.offset += N;
        Ok(*bytes)
    }

    fn read_u8(&mut self, field: MeasurementField) -> Result<u8, MeasurementDecodeError> {
        let [value] = self.take::<1>(field)?;
        Ok(value)
    }

    fn read_u16_le(&mut self, field: MeasurementField) -> Result<u16, MeasurementDecodeError> {
        Ok(u16::from_le_bytes(self.take::<2>(field)?))
    }
}
