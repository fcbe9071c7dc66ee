use rgb::RGB8;

use crate::color::{Color, rescale_channel, unpremultiply};
use crate::error::QuantizeError;

/// A quantized palette in quantizer space.
///
/// Entries use channel values in `[0, maxval]`. The first `forced.len()`
/// entries come from a forced palette; `forced` keeps their straight 8-bit
/// values so they can be written verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<Color>,
    maxval: u8,
    forced: Vec<Color>,
}

impl Palette {
    /// Build a palette from quantizer output at the given maxval.
    pub fn new(entries: Vec<Color>, maxval: u8) -> Self {
        Self {
            entries,
            maxval,
            forced: Vec::new(),
        }
    }

    /// Build a palette whose leading entries are forced colors.
    ///
    /// `forced` holds the straight 8-bit colors; `forced_scaled` holds the same
    /// colors as they compare against pixels in quantizer space.
    pub fn with_forced(
        forced: Vec<Color>,
        forced_scaled: Vec<Color>,
        quantized: Vec<Color>,
        maxval: u8,
    ) -> Self {
        debug_assert_eq!(forced.len(), forced_scaled.len());
        let mut entries = forced_scaled;
        entries.extend(quantized);
        Self {
            entries,
            maxval,
            forced,
        }
    }

    /// Palette entries in quantizer order and space.
    pub fn entries(&self) -> &[Color] {
        &self.entries
    }

    pub fn maxval(&self) -> u8 {
        self.maxval
    }

    /// Number of palette entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the palette is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_opaque(&self, x: usize) -> bool {
        match self.forced.get(x) {
            Some(straight) => straight.a == 255,
            None => self.entries[x].a == self.maxval,
        }
    }

    /// Straight 8-bit color of entry `x` as it is written to the output.
    fn output_color(&self, x: usize, premultiplied: bool) -> Color {
        if let Some(&straight) = self.forced.get(x) {
            return straight;
        }
        let c = self.entries[x];
        let c = if self.maxval < 255 {
            Color::new(
                rescale_channel(c.r, self.maxval, 255),
                rescale_channel(c.g, self.maxval, 255),
                rescale_channel(c.b, self.maxval, 255),
                rescale_channel(c.a, self.maxval, 255),
            )
        } else {
            c
        };
        if premultiplied { unpremultiply(c) } else { c }
    }
}

/// A palette reordered so that translucent entries form a prefix.
///
/// Entries `< transparent_count` have alpha below maxval; the rest are opaque,
/// so the transparency table only needs `transparent_count` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemappedPalette {
    rgb: Vec<RGB8>,
    alpha: Vec<u8>,
    quantized: Vec<Color>,
    remap: Vec<u8>,
    transparent_count: usize,
}

impl RemappedPalette {
    /// Straight RGB entries in output order.
    pub fn rgb(&self) -> &[RGB8] {
        &self.rgb
    }

    /// Alpha of every entry in output order (opaque entries are 255).
    pub fn alpha(&self) -> &[u8] {
        &self.alpha
    }

    /// The transparency table: alpha of the translucent prefix only.
    pub fn alpha_table(&self) -> &[u8] {
        &self.alpha[..self.transparent_count]
    }

    /// Straight RGBA entries in output order.
    pub fn rgba(&self) -> Vec<Color> {
        self.rgb
            .iter()
            .zip(&self.alpha)
            .map(|(c, &a)| Color::new(c.r, c.g, c.b, a))
            .collect()
    }

    /// Entries in output order but still in quantizer space.
    pub fn quantized(&self) -> &[Color] {
        &self.quantized
    }

    /// Maps a quantizer index to its output index.
    pub fn remap_table(&self) -> &[u8] {
        &self.remap
    }

    pub fn transparent_count(&self) -> usize {
        self.transparent_count
    }

    pub fn len(&self) -> usize {
        self.rgb.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rgb.is_empty()
    }
}

/// Reorder a palette so that opaque entries are contiguous at the end.
///
/// Opaque entries take indices counting down from the last slot, translucent
/// ones counting up from zero; the opaque run therefore comes out reversed.
/// Colors are rescaled to 8 bits when `maxval < 255`, and un-premultiplied
/// when the source raster is premultiplied.
pub fn remap_for_transparency(
    palette: &Palette,
    premultiplied: bool,
) -> Result<RemappedPalette, QuantizeError> {
    let n = palette.len();
    if n > 256 {
        return Err(QuantizeError::InternalConsistency(
            "palette holds more than 256 entries",
        ));
    }

    let mut remap = vec![0u8; n];
    let mut top_idx = n as isize - 1;
    let mut bot_idx = 0isize;
    for (x, slot) in remap.iter_mut().enumerate() {
        if palette.is_opaque(x) {
            *slot = top_idx as u8;
            top_idx -= 1;
        } else {
            *slot = bot_idx as u8;
            bot_idx += 1;
        }
    }

    // Top and bottom indices should have just crossed paths.
    if bot_idx != top_idx + 1 {
        return Err(QuantizeError::InternalConsistency(
            "opaque and translucent palette indices do not meet",
        ));
    }

    let mut rgb = vec![RGB8::new(0, 0, 0); n];
    let mut alpha = vec![255u8; n];
    let mut quantized = vec![Color::new(0, 0, 0, 0); n];
    for x in 0..n {
        let to = remap[x] as usize;
        let c = palette.output_color(x, premultiplied);
        rgb[to] = RGB8::new(c.r, c.g, c.b);
        alpha[to] = c.a;
        quantized[to] = palette.entries[x];
    }

    let transparent_count = bot_idx as usize;
    if alpha[transparent_count..].iter().any(|&a| a != 255) {
        return Err(QuantizeError::InternalConsistency(
            "opaque palette suffix carries alpha below 255",
        ));
    }

    log::debug!("palette remap: {n} entries, {transparent_count} translucent");

    Ok(RemappedPalette {
        rgb,
        alpha,
        quantized,
        remap,
        transparent_count,
    })
}

/// Bit depth needed to index a palette of `len` entries.
pub fn bit_depth_for(len: usize) -> u8 {
    match len {
        0..=2 => 1,
        3..=4 => 2,
        5..=16 => 4,
        _ => 8,
    }
}
