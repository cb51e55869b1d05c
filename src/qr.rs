//! Terminal rendering of WhatsApp pairing QR codes.

use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;
use tracing::{info, warn};

use crate::error::{RelayError, Result};

/// Render a QR payload as unicode half-blocks.
pub fn render(payload: &str) -> Result<String> {
    if payload.trim().is_empty() {
        return Err(RelayError::Transport("QR payload is empty".into()));
    }
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| RelayError::Transport(format!("failed to encode QR payload: {}", e)))?;
    Ok(code.render::<Dense1x2>().quiet_zone(true).build())
}

/// Print a pairing QR code to stderr for the operator.
pub fn display(payload: &str) {
    info!("WhatsApp pairing required, scan the QR code with WhatsApp > Linked Devices");
    match render(payload) {
        Ok(rendered) => {
            eprintln!();
            eprintln!("{}", rendered);
            eprintln!();
        }
        Err(e) => warn!("Failed to render pairing QR in terminal: {}", e),
    }
}
