use qrcode::{QrCode, render::unicode::Dense1x2, types::QrError};

/// Render a pairing code as a block of half-height unicode cells, light on
/// dark so it scans from a typical dark terminal.
pub fn render_terminal(code: &str) -> Result<String, QrError> {
    let qr = QrCode::new(code.as_bytes())?;
    Ok(qr
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
