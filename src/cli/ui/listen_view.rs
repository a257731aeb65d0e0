use std::fmt::{self, Display, Formatter};

use crate::hw::{DeviceIdentity, GattProfile, ListenStopReason, ListenSummary};
use crate::protocol::{self, GattId};

use super::device_view::DeviceView;
use super::painter::Painter;
use super::table::Table;

fn attribute_label(id: GattId, painter: &Painter) -> String {
    let metadata = protocol::gatt_metadata(id);
    format!(
        "{} {}",
        painter.value(metadata.name()),
        painter.muted(format!(
            "({} 0x{:04X})",
            metadata.kind(),
            metadata.assigned_number()
        ))
    )
}

/// Renders the output printed once a sensor is connected.
pub(crate) struct ListenReadyView<'a> {
    device: &'a DeviceIdentity,
    profile: GattProfile,
    painter: &'a Painter,
}

impl<'a> ListenReadyView<'a> {
    pub(crate) fn new(
        device: &'a DeviceIdentity,
        profile: GattProfile,
        painter: &'a Painter,
    ) -> Self {
        Self {
            device,
            profile,
            painter,
        }
    }
}

impl Display for ListenReadyView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let session_table = Table::key_value(
            self.painter,
            vec![
                (
                    "service",
                    attribute_label(self.profile.service(), self.painter),
                ),
                (
                    "listening_on",
                    attribute_label(self.profile.characteristic(), self.painter),
                ),
            ],
        );
        let device = DeviceView::new(self.device, self.painter);

        write!(f, "{}", self.painter.heading("Connected sensor:"))?;
        write!(f, "\n{device}")?;
        writeln!(f)?;
        write!(f, "\n{}", self.painter.heading("Listen session:"))?;
        write!(f, "\n{session_table}")
    }
}

/// Renders the listen session summary.
pub(crate) struct ListenSummaryView<'a> {
    summary: &'a ListenSummary,
    painter: &'a Painter,
}

impl<'a> ListenSummaryView<'a> {
    pub(crate) fn new(summary: &'a ListenSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for ListenSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let reason = self.summary.stop_reason().to_string();
        let stop_reason = match self.summary.stop_reason() {
            ListenStopReason::ReachedLimit(_) => self.painter.success(reason),
            ListenStopReason::Interrupted | ListenStopReason::PeerDisconnected => {
                self.painter.warning(reason)
            }
        };
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Stopped:"),
            stop_reason,
            self.painter.value(format!(
                "- received {} reading(s), rejected {} notification(s)",
                self.summary.received_readings(),
                self.summary.rejected_notifications()
            ))
        )
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn device() -> DeviceIdentity {
        DeviceIdentity::new(
            "hci0".into(),
            "AA:BB:CC".into(),
            Some("Polar H10".into()),
            Some(-43),
        )
    }

    #[test]
    fn ready_view_names_the_subscribed_characteristic() {
        let dev = device();
        let painter = Painter::new(false);
        let rendered = ListenReadyView::new(&dev, GattProfile::HEART_RATE, &painter).to_string();

        assert!(rendered.starts_with("Connected sensor:"), "{rendered}");
        assert!(rendered.contains("Heart Rate (service 0x180D)"), "{rendered}");
        assert!(
            rendered.contains("Heart Rate Measurement (characteristic 0x2A37)"),
            "{rendered}"
        );
    }

    #[rstest]
    #[case::reached_limit(
        ListenStopReason::ReachedLimit(10),
        "Stopped: reached reading limit (10) - received 10 reading(s), rejected 1 notification(s)"
    )]
    #[case::interrupted(
        ListenStopReason::Interrupted,
        "Stopped: interrupted by user - received 10 reading(s), rejected 1 notification(s)"
    )]
    #[case::peer_disconnected(
        ListenStopReason::PeerDisconnected,
        "Stopped: device disconnected - received 10 reading(s), rejected 1 notification(s)"
    )]
    fn summary_renders_stop_reason(#[case] stop_reason: ListenStopReason, #[case] expected: &str) {
        let summary = ListenSummary::new(Some(device()), 10, 1, stop_reason);
        let painter = Painter::new(false);
        assert_eq!(expected, ListenSummaryView::new(&summary, &painter).to_string());
    }

    #[test]
    fn summary_line_snapshot() {
        let summary = ListenSummary::new(None, 0, 0, ListenStopReason::Interrupted);
        let painter = Painter::new(false);
        assert_snapshot!(
            ListenSummaryView::new(&summary, &painter).to_string(),
            @"Stopped: interrupted by user - received 0 reading(s), rejected 0 notification(s)"
        );
    }
}
