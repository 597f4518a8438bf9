//! Artist/album/title guessed from "Artist - Album - Title" style file names

use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFileName {
    pub artist: String,
    pub album: Option<String>,
    pub title: String,
}

impl ParsedFileName {
    /// Release title to search for; singles fall back to the track title
    pub fn release(&self) -> &str {
        self.album.as_deref().unwrap_or(&self.title)
    }
}

/// Parse "Artist - Album - Title" or "Artist - Title"
///
/// A leading track number segment ("01 - Artist - Title") is skipped.
pub fn parse_file_name(file_name: &str) -> Option<ParsedFileName> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;

    let mut parts: Vec<&str> = stem
        .split(" - ")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if parts.len() >= 3 && parts[0].chars().all(|c| c.is_ascii_digit()) {
        parts.remove(0);
    }

    match parts.as_slice() {
        [artist, title] => Some(ParsedFileName {
            artist: artist.to_string(),
            album: None,
            title: title.to_string(),
        }),
        [artist, album, rest @ ..] if !rest.is_empty() => Some(ParsedFileName {
            artist: artist.to_string(),
            album: Some(album.to_string()),
            title: rest.join(" - "),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_part_name() {
        let parsed = parse_file_name("Daft Punk - Homework - Around the World.mp3").unwrap();
        assert_eq!(parsed.artist, "Daft Punk");
        assert_eq!(parsed.album.as_deref(), Some("Homework"));
        assert_eq!(parsed.title, "Around the World");
        assert_eq!(parsed.release(), "Homework");
    }

    #[test]
    fn test_two_part_name_uses_title_as_release() {
        let parsed = parse_file_name("Radiohead - Creep.flac").unwrap();
        assert_eq!(parsed.artist, "Radiohead");
        assert!(parsed.album.is_none());
        assert_eq!(parsed.release(), "Creep");
    }

    #[test]
    fn test_track_number_prefix_is_skipped() {
        let parsed = parse_file_name("03 - Boards of Canada - Roygbiv.ogg").unwrap();
        assert_eq!(parsed.artist, "Boards of Canada");
        assert_eq!(parsed.title, "Roygbiv");
    }

    #[test]
    fn test_unparseable_names() {
        assert!(parse_file_name("track01.mp3").is_none());
        assert!(parse_file_name(" - .mp3").is_none());
    }
}
