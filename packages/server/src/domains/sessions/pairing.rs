use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use qrcode::render::svg;
use qrcode::QrCode;

const MIN_SIZE: u32 = 256;

/// Render a raw pairing payload as a scannable QR code, returned as an
/// SVG data URL the UI can drop straight into an `<img>`.
pub fn encode_pairing_artifact(payload: &str) -> Result<String> {
    let svg = QrCode::new(payload.as_bytes())
        .context("pairing payload does not fit in a QR code")?
        .render::<svg::Color>()
        .min_dimensions(MIN_SIZE, MIN_SIZE)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();

    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg)))
}
