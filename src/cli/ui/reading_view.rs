use std::fmt::{self, Display, Formatter};

use crate::measurement::{HeartRateMeasurement, MeasurementDecodeError, SensorContact};
use crate::utils::{format_hex, format_rr_intervals};

use super::painter::Painter;
use super::table::Table;

fn contact_label(reading: &HeartRateMeasurement) -> String {
    reading
        .sensor_contact()
        .unwrap_or(SensorContact::NotSupported)
        .to_string()
}

fn energy_label(reading: &HeartRateMeasurement) -> String {
    match reading.energy_expended() {
        Some(energy) => format!("{energy} kJ"),
        None => "-".to_string(),
    }
}

/// Renders one decoded reading as a key-value table.
pub(crate) struct ReadingView<'a> {
    reading: &'a HeartRateMeasurement,
    painter: &'a Painter,
}

impl<'a> ReadingView<'a> {
    pub(crate) fn new(reading: &'a HeartRateMeasurement, painter: &'a Painter) -> Self {
        Self { reading, painter }
    }
}

impl Display for ReadingView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("heart_rate", self.painter.bpm(self.reading.heart_rate_bpm())),
                (
                    "sensor_contact",
                    self.painter.value(contact_label(self.reading)),
                ),
                (
                    "energy_expended",
                    self.painter.value(energy_label(self.reading)),
                ),
                (
                    "rr_intervals",
                    self.painter
                        .value(format_rr_intervals(&self.reading.rr_intervals_ms())),
                ),
            ],
        );
        write!(f, "{table}")
    }
}

/// Renders one streamed reading as a single line.
pub(crate) struct ReadingLineView<'a> {
    index: usize,
    reading: &'a HeartRateMeasurement,
    painter: &'a Painter,
}

impl<'a> ReadingLineView<'a> {
    pub(crate) fn new(
        index: usize,
        reading: &'a HeartRateMeasurement,
        painter: &'a Painter,
    ) -> Self {
        Self {
            index,
            reading,
            painter,
        }
    }
}

impl Display for ReadingLineView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let index_label = self.painter.muted(format!("[{:04}]", self.index));
        write!(
            f,
            "{index_label} {} {} {} {}",
            self.painter.bpm(self.reading.heart_rate_bpm()),
            self.painter
                .muted(format!("contact={}", contact_label(self.reading))),
            self.painter
                .muted(format!("energy={}", energy_label(self.reading))),
            self.painter.muted(format!(
                "rr={}",
                format_rr_intervals(&self.reading.rr_intervals_ms())
            )),
        )
    }
}

/// Renders a notification that failed to decode.
pub(crate) struct RejectedLineView<'a> {
    payload: &'a [u8],
    error: &'a MeasurementDecodeError,
    painter: &'a Painter,
}

impl<'a> RejectedLineView<'a> {
    pub(crate) fn new(
        payload: &'a [u8],
        error: &'a MeasurementDecodeError,
        painter: &'a Painter,
    ) -> Self {
        Self {
            payload,
            error,
            painter,
        }
    }
}

impl Display for RejectedLineView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.painter.error("[skip]"),
            self.painter.muted(format!("raw={}", format_hex(self.payload))),
            self.painter.warning(self.error.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;
    use crate::measurement::MeasurementDecoder;

    fn decode(payload: &[u8]) -> HeartRateMeasurement {
        MeasurementDecoder::decode(payload).expect("payload should decode")
    }

    #[test]
    fn line_view_shows_every_field() {
        let reading = decode(&[0x1E, 0x4A, 0x2C, 0x01, 0x84, 0x03]);
        let painter = Painter::new(false);
        let view = ReadingLineView::new(7, &reading, &painter);
        assert_snapshot!(
            view.to_string(),
            @"[0007] 74 bpm contact=detected energy=300 kJ rr=878.9 ms"
        );
    }

    #[test]
    fn line_view_marks_missing_contact_support() {
        let reading = decode(&[0x00, 0x48]);
        let painter = Painter::new(false);
        let view = ReadingLineView::new(1, &reading, &painter);
        assert_snapshot!(
            view.to_string(),
            @"[0001] 72 bpm contact=not supported energy=- rr=-"
        );
    }

    #[test]
    fn table_view_lists_fields() {
        let reading = decode(&[0x16, 0x48, 0x00, 0x04]);
        let rendered = ReadingView::new(&reading, &Painter::new(false)).to_string();

        assert!(rendered.contains("72 bpm"), "{rendered}");
        assert!(rendered.contains("detected"), "{rendered}");
        assert!(rendered.contains("1000.0 ms"), "{rendered}");
    }

    #[test]
    fn rejected_view_shows_raw_bytes_and_reason() {
        let payload = [0x01, 0x48];
        let error = MeasurementDecoder::decode(&payload).expect_err("value is truncated");
        let rendered = RejectedLineView::new(&payload, &error, &Painter::new(false)).to_string();

        assert!(rendered.starts_with("[skip] raw=01 48 "), "{rendered}");
        assert!(rendered.contains("heart rate"), "{rendered}");
    }
}
