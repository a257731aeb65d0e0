/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    let mut rendered = String::with_capacity(bytes.len().saturating_mul(3));
    for (index, value) in bytes.iter().enumerate() {
        if index > 0 {
            rendered.push(' ');
        }
        rendered.push_str(&hex::encode_upper([*value]));
    }
    rendered
}

/// Formats an optional RSSI for terminal output.
pub(crate) fn format_rssi(rssi: Option<i16>) -> String {
    match rssi {
        Some(value) => format!("{value} dBm"),
        None => "-".to_string(),
    }
}

/// Formats RR intervals in milliseconds with one decimal place.
pub(crate) fn format_rr_intervals(intervals_ms: &[f64]) -> String {
    if intervals_ms.is_empty() {
        return "-".to_string();
    }

    let rendered: Vec<String> = intervals_ms
        .iter()
        .map(|value| format!("{value:.1}"))
        .collect();
    format!("{} ms", rendered.join(", "))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn format_hex_handles_empty_payload() {
        assert_eq!("<empty>", format_hex(&[]));
    }

    #[test]
    fn format_hex_formats_uppercase_pairs() {
        assert_eq!("16 48 00 A1 FF", format_hex(&[0x16, 0x48, 0x00, 0xA1, 0xFF]));
    }

    #[rstest]
    #[case(None, "-")]
    #[case(Some(-43), "-43 dBm")]
    fn format_rssi_renders_unit(#[case] rssi: Option<i16>, #[case] expected: &str) {
        assert_eq!(expected, format_rssi(rssi));
    }

    #[rstest]
    #[case(&[], "-")]
    #[case(&[1000.0], "1000.0 ms")]
    #[case(&[878.906_25, 849.609_375], "878.9, 849.6 ms")]
    fn format_rr_intervals_rounds_to_one_decimal(
        #[case] intervals_ms: &[f64],
        #[case] expected: &str,
    ) {
        assert_eq!(expected, format_rr_intervals(intervals_ms));
    }
}
