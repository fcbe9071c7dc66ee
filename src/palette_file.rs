//! Forced palette resources.
//!
//! A forced palette is a plain text list of colors that must appear verbatim
//! in the output palette. One entry per line, `r,g,b` or `r,g,b,a` with
//! decimal values in `0..=255`. Blank lines and lines starting with `#` are
//! skipped. At most 256 entries are read.

use std::fs;
use std::path::Path;

use crate::color::{Color, premultiply};
use crate::error::QuantizeError;

/// Maximum number of entries a palette image can index.
pub const MAX_PALETTE_ENTRIES: usize = 256;

/// Colors that must be preserved in the output palette, as straight RGBA.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForcedPalette {
    colors: Vec<Color>,
}

impl ForcedPalette {
    /// Build from straight colors. Entries past 256 are dropped.
    pub fn new(mut colors: Vec<Color>) -> Self {
        colors.truncate(MAX_PALETTE_ENTRIES);
        Self { colors }
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// True when the palette already fills every available slot.
    pub fn is_full(&self) -> bool {
        self.colors.len() == MAX_PALETTE_ENTRIES
    }

    /// The colors as they compare against a premultiplied raster.
    pub fn premultiplied(&self) -> Vec<Color> {
        self.colors.iter().map(|&c| premultiply(c)).collect()
    }
}

/// Parse a palette resource. `origin` names the resource in error messages.
pub fn parse_palette(text: &str, origin: &str) -> Result<ForcedPalette, QuantizeError> {
    let mut colors = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if colors.len() == MAX_PALETTE_ENTRIES {
            log::warn!(
                "{origin}: palette holds more than {MAX_PALETTE_ENTRIES} entries, ignoring the rest"
            );
            break;
        }
        let color = parse_entry(line).ok_or_else(|| QuantizeError::MalformedPalette {
            origin: origin.to_owned(),
            line: i + 1,
            content: raw.to_owned(),
        })?;
        colors.push(color);
    }
    Ok(ForcedPalette { colors })
}

/// Read and parse a palette resource from disk.
pub fn load_palette(path: impl AsRef<Path>) -> Result<ForcedPalette, QuantizeError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| QuantizeError::PaletteIo {
        path: path.to_path_buf(),
        source,
    })?;
    parse_palette(&text, &path.display().to_string())
}

fn parse_entry(line: &str) -> Option<Color> {
    let mut values = [255u8; 4];
    let mut n = 0;
    for field in line.split(',') {
        if n == 4 {
            return None;
        }
        values[n] = field.trim().parse().ok()?;
        n += 1;
    }
    if n < 3 {
        return None;
    }
    Some(Color::new(values[0], values[1], values[2], values[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rgb_and_rgba() {
        let p = parse_palette("255,0,0\n0, 255, 0, 128\n", "test").unwrap();
        assert_eq!(
            p.colors(),
            &[Color::new(255, 0, 0, 255), Color::new(0, 255, 0, 128)]
        );
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let p = parse_palette("# palette\n\n1,2,3\r\n   \n#4,5,6\n7,8,9,10", "test").unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.colors()[1], Color::new(7, 8, 9, 10));
    }

    #[test]
    fn reports_line_and_content() {
        let err = parse_palette("1,2,3\n# ok\nred,green,blue\n", "pal.txt").unwrap_err();
        match err {
            QuantizeError::MalformedPalette {
                origin,
                line,
                content,
            } => {
                assert_eq!(origin, "pal.txt");
                assert_eq!(line, 3);
                assert_eq!(content, "red,green,blue");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_arity_and_range() {
        assert!(parse_palette("1,2\n", "t").is_err());
        assert!(parse_palette("1,2,3,4,5\n", "t").is_err());
        assert!(parse_palette("1,2,256\n", "t").is_err());
        assert!(parse_palette("-1,2,3\n", "t").is_err());
    }

    #[test]
    fn stops_at_256_entries() {
        let text: String = (0..300).map(|i| format!("{},0,0\n", i % 256)).collect();
        let p = parse_palette(&text, "t").unwrap();
        assert_eq!(p.len(), 256);
        assert!(p.is_full());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_palette("/nonexistent/mapquant/palette.txt").unwrap_err();
        assert!(matches!(err, QuantizeError::PaletteIo { .. }));
    }

    #[test]
    fn premultiplied_scales_translucent_only() {
        let p = ForcedPalette::new(vec![
            Color::new(200, 100, 0, 255),
            Color::new(200, 100, 0, 0),
        ]);
        assert_eq!(
            p.premultiplied(),
            vec![Color::new(200, 100, 0, 255), Color::new(0, 0, 0, 0)]
        );
    }
}
