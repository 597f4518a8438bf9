//! Deterministic generated cover
//!
//! Colors come from a SHA-256 of the track identity so the same track always
//! gets the same cover.

use sha2::{Digest, Sha256};
use sono_common::{ArtworkKind, ArtworkSource, TrackMetadata};

pub const PLACEHOLDER_CONFIDENCE: f32 = 0.1;
pub const PLACEHOLDER_MIME: &str = "image/svg+xml";

fn seed(metadata: &TrackMetadata, file_name: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(metadata.artist.as_bytes());
    hasher.update(b"|");
    hasher.update(metadata.album.as_bytes());
    hasher.update(b"|");
    hasher.update(metadata.title.as_bytes());
    hasher.update(b"|");
    hasher.update(file_name.as_bytes());
    hasher.finalize().into()
}

fn initials(text: &str) -> String {
    text.split_whitespace()
        .filter_map(|word| word.chars().find(|c| c.is_alphanumeric()))
        .take(2)
        .flat_map(char::to_uppercase)
        .collect()
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// SVG cover for a track
pub fn render_svg(metadata: &TrackMetadata, file_name: &str) -> String {
    let seed = seed(metadata, file_name);
    let hue = u16::from_be_bytes([seed[0], seed[1]]) % 360;
    let hue2 = (hue + 40 + u16::from(seed[2]) % 80) % 360;
    let angle = u16::from(seed[3]) % 360;

    let label = initials(&metadata.title);
    let label = if label.is_empty() { "♪".to_string() } else { escape_xml(&label) };

    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="500" height="500" viewBox="0 0 500 500">"#,
            r#"<defs><linearGradient id="g" gradientTransform="rotate({angle} 0.5 0.5)">"#,
            r#"<stop offset="0" stop-color="hsl({hue},65%,45%)"/>"#,
            r#"<stop offset="1" stop-color="hsl({hue2},70%,25%)"/>"#,
            r#"</linearGradient></defs>"#,
            r#"<rect width="500" height="500" fill="url(#g)"/>"#,
            r##"<text x="250" y="290" font-family="sans-serif" font-size="140" text-anchor="middle" fill="#ffffff" fill-opacity="0.85">{label}</text>"##,
            r#"</svg>"#
        ),
        angle = angle,
        hue = hue,
        hue2 = hue2,
        label = label
    )
}

pub fn placeholder_artwork(metadata: &TrackMetadata, file_name: &str) -> ArtworkSource {
    ArtworkSource::new(
        ArtworkKind::Placeholder,
        render_svg(metadata, file_name).into_bytes(),
        PLACEHOLDER_MIME,
        PLACEHOLDER_CONFIDENCE,
    )
}
