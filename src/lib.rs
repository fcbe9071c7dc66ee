//! Median-cut quantization of RGBA rasters into palette-mode PNG images.

#![forbid(unsafe_code)]

pub mod color;
pub mod encoder;
pub mod error;
pub mod histogram;
pub mod median_cut;
pub mod palette;
pub mod palette_file;
pub mod png;
pub mod remap;

pub use color::Color;
pub use encoder::{EncoderState, Interlace, PaletteEncoder, PaletteHeader, PaletteSink};
pub use error::{EncodeError, QuantizeError};
pub use palette_file::{ForcedPalette, load_palette, parse_palette};
pub use png::PngWriter;
pub use remap::NearestColorMapper;

use std::borrow::Cow;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use imgref::ImgRef;
use rgb::RGB8;

use histogram::{HistogramOverflow, MAX_HISTOGRAM_COLORS};
use palette::{Palette, RemappedPalette};

/// Forced palette resource read when `PALETTE_FORCE` is set without `PALETTE`.
pub const DEFAULT_PALETTE_PATH: &str = "palette.txt";

/// Smallest usable histogram capacity: at maxval 1 at most 16 colors exist.
const MIN_HISTOGRAM_COLORS: usize = 16;

/// Configuration for palette quantization and PNG output.
#[derive(Debug, Clone)]
pub struct QuantizeConfig {
    /// Maximum number of palette colors (1..=256). 0 is only valid with a
    /// forced palette and means "use the forced palette as-is".
    pub max_colors: u32,
    /// Write Adam7 interlaced output.
    pub interlace: bool,
    /// zlib level 0..=9. `None` uses the zlib default.
    pub compression: Option<u32>,
    /// Colors that must appear verbatim in the palette.
    pub forced_palette: Option<ForcedPalette>,
    /// Input pixels carry premultiplied alpha.
    pub premultiplied: bool,
    /// Distinct colors the histogram may hold before the image is coarsened.
    pub histogram_capacity: usize,
    /// `tEXt` Software value. `None` writes the crate default.
    pub software: Option<String>,
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            max_colors: 256,
            interlace: false,
            compression: None,
            forced_palette: None,
            premultiplied: true,
            histogram_capacity: MAX_HISTOGRAM_COLORS,
            software: None,
        }
    }
}

impl QuantizeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_colors(mut self, n: u32) -> Self {
        self.max_colors = n;
        self
    }

    pub fn interlace(mut self, interlace: bool) -> Self {
        self.interlace = interlace;
        self
    }

    pub fn compression(mut self, level: u32) -> Self {
        self.compression = Some(level);
        self
    }

    pub fn forced_palette(mut self, palette: ForcedPalette) -> Self {
        self.forced_palette = Some(palette);
        self
    }

    pub fn premultiplied(mut self, premultiplied: bool) -> Self {
        self.premultiplied = premultiplied;
        self
    }

    pub fn histogram_capacity(mut self, capacity: usize) -> Self {
        self.histogram_capacity = capacity;
        self
    }

    pub fn software(mut self, software: impl Into<String>) -> Self {
        self.software = Some(software.into());
        self
    }

    /// Build a config from map-file output format options.
    ///
    /// Recognized keys (case-insensitive): `QUANTIZE_COLORS`, `INTERLACE`,
    /// `COMPRESSION` (`-1` for the zlib default), `PALETTE_FORCE` and
    /// `PALETTE` (defaults to [`DEFAULT_PALETTE_PATH`]). With a forced palette
    /// `QUANTIZE_COLORS` defaults to 0, otherwise to 256. Unknown keys are
    /// ignored.
    pub fn from_format_options<I, K, V>(options: I) -> Result<Self, QuantizeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        let mut colors = None;
        let mut force_palette = false;
        let mut palette_path = None;

        for (key, value) in options {
            let key = key.as_ref().trim();
            let value = value.as_ref().trim();
            let invalid = || QuantizeError::InvalidOption {
                key: key.to_owned(),
                value: value.to_owned(),
            };
            match key.to_ascii_uppercase().as_str() {
                "QUANTIZE_COLORS" => {
                    let n: u32 = value.parse().map_err(|_| invalid())?;
                    if n > 256 {
                        return Err(invalid());
                    }
                    colors = Some(n);
                }
                "INTERLACE" => config.interlace = is_truthy(value),
                "COMPRESSION" => {
                    let level: i32 = value.parse().map_err(|_| invalid())?;
                    config.compression = match level {
                        -1 => None,
                        0..=9 => Some(level as u32),
                        _ => return Err(invalid()),
                    };
                }
                "PALETTE_FORCE" => force_palette = is_truthy(value),
                "PALETTE" => palette_path = Some(value.to_owned()),
                other => log::debug!("ignoring format option {other}"),
            }
        }

        if force_palette {
            let path = palette_path.unwrap_or_else(|| DEFAULT_PALETTE_PATH.to_owned());
            config.forced_palette = Some(load_palette(path)?);
        }
        config.max_colors = colors.unwrap_or(if force_palette { 0 } else { 256 });
        Ok(config)
    }

    fn interlace_mode(&self) -> Interlace {
        if self.interlace {
            Interlace::Adam7
        } else {
            Interlace::None
        }
    }

    fn forced(&self) -> Option<&ForcedPalette> {
        self.forced_palette.as_ref().filter(|p| !p.is_empty())
    }

    fn validate(&self) -> Result<(), QuantizeError> {
        if self.max_colors > 256 || (self.max_colors == 0 && self.forced().is_none()) {
            return Err(QuantizeError::InvalidMaxColors(self.max_colors));
        }
        match self.compression {
            Some(level) if level > 9 => Err(QuantizeError::InvalidCompression(level)),
            _ => Ok(()),
        }
    }

    fn png_writer<W: Write>(&self, writer: W) -> PngWriter<W> {
        let png = PngWriter::new(writer, self.compression);
        match &self.software {
            Some(software) => png.software(Some(software.clone())),
            None => png,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    ["ON", "YES", "1", "TRUE"]
        .iter()
        .any(|v| value.eq_ignore_ascii_case(v))
}

/// Quantization result.
#[derive(Debug)]
pub struct QuantizeResult {
    palette: RemappedPalette,
    indices: Vec<u8>,
    maxval: u8,
    width: usize,
    height: usize,
}

impl QuantizeResult {
    /// Straight RGBA palette entries in output order.
    pub fn palette_rgba(&self) -> Vec<Color> {
        self.palette.rgba()
    }

    pub fn palette_rgb(&self) -> &[RGB8] {
        self.palette.rgb()
    }

    /// Alpha of the translucent palette prefix, suitable for a PNG `tRNS` chunk.
    pub fn alpha_table(&self) -> &[u8] {
        self.palette.alpha_table()
    }

    /// Number of leading palette entries that are not fully opaque.
    pub fn transparent_count(&self) -> usize {
        self.palette.transparent_count()
    }

    /// Get the palette index for each pixel.
    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    /// Number of colors in the palette.
    pub fn palette_len(&self) -> usize {
        self.palette.len()
    }

    /// Palette entries in output order, in the scale the quantizer ran at.
    pub fn quantized_palette(&self) -> &[Color] {
        self.palette.quantized()
    }

    /// Channel maximum the quantizer ran at; below 255 when the image had to
    /// be coarsened.
    pub fn scaling_maxval(&self) -> u8 {
        self.maxval
    }

    /// Bits per index in the encoded image.
    pub fn bit_depth(&self) -> u8 {
        palette::bit_depth_for(self.palette.len())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Encode as a palette PNG using the output settings of `config`.
    pub fn write_png<W: Write>(
        &self,
        writer: W,
        config: &QuantizeConfig,
    ) -> Result<W, QuantizeError> {
        let interlace = config.interlace_mode();
        let mut encoder = begin_png(
            config.png_writer(writer),
            &self.palette,
            self.width,
            self.height,
            interlace,
        )?;
        match interlace {
            Interlace::Adam7 => encoder.write_whole(&self.indices)?,
            Interlace::None => {
                for row in self.indices.chunks(self.width) {
                    encoder.write_row(row)?;
                }
            }
        }
        Ok(encoder.finish()?.into_inner())
    }
}

/// Quantize an image to at most `config.max_colors` colors.
pub fn quantize(
    img: ImgRef<'_, Color>,
    config: &QuantizeConfig,
) -> Result<QuantizeResult, QuantizeError> {
    let pixels = contiguous(img)?;
    quantize_cow(pixels, img.width(), img.height(), config)
}

/// Quantize a tightly packed pixel buffer.
pub fn quantize_pixels(
    pixels: &[Color],
    width: usize,
    height: usize,
    config: &QuantizeConfig,
) -> Result<QuantizeResult, QuantizeError> {
    validate_inputs(pixels.len(), width, height)?;
    quantize_cow(Cow::Borrowed(pixels), width, height, config)
}

fn quantize_cow(
    pixels: Cow<'_, [Color]>,
    width: usize,
    height: usize,
    config: &QuantizeConfig,
) -> Result<QuantizeResult, QuantizeError> {
    let prepared = prepare(pixels, config)?;
    let indices = remap::map_pixels(
        &prepared.pixels,
        prepared.palette.entries(),
        prepared.remapped.remap_table(),
    )?;
    Ok(QuantizeResult {
        palette: prepared.remapped,
        indices,
        maxval: prepared.maxval,
        width,
        height,
    })
}

/// Quantize an image and write it as a palette PNG.
///
/// Non-interlaced output is mapped and written one row at a time; interlaced
/// output needs the whole index buffer first.
pub fn quantize_to_png<W: Write>(
    img: ImgRef<'_, Color>,
    config: &QuantizeConfig,
    writer: W,
) -> Result<W, QuantizeError> {
    let (width, height) = (img.width(), img.height());
    let prepared = prepare(contiguous(img)?, config)?;
    let interlace = config.interlace_mode();
    let mut encoder = begin_png(
        config.png_writer(writer),
        &prepared.remapped,
        width,
        height,
        interlace,
    )?;

    let palette = prepared.palette.entries();
    let remap_table = prepared.remapped.remap_table();
    match interlace {
        Interlace::Adam7 => {
            let indices = remap::map_pixels(&prepared.pixels, palette, remap_table)?;
            encoder.write_whole(&indices)?;
        }
        Interlace::None => {
            let mut mapper = NearestColorMapper::new(palette, remap_table);
            let mut row_indices = remap::alloc_indices(width)?;
            for row in prepared.pixels.chunks(width) {
                mapper.map_row(row, &mut row_indices);
                encoder.write_row(&row_indices)?;
            }
        }
    }
    Ok(encoder.finish()?.into_inner())
}

/// Quantize an image into an in-memory PNG.
pub fn quantize_to_vec(
    img: ImgRef<'_, Color>,
    config: &QuantizeConfig,
) -> Result<Vec<u8>, QuantizeError> {
    quantize_to_png(img, config, Vec::new())
}

/// Quantize an image into a PNG file.
///
/// The image is written to a sibling temporary file that replaces `path` only
/// once encoding succeeded. On failure the temporary file is removed and an
/// existing file at `path` is left untouched.
pub fn quantize_to_file(
    img: ImgRef<'_, Color>,
    config: &QuantizeConfig,
    path: impl AsRef<Path>,
) -> Result<(), QuantizeError> {
    config.validate()?;
    let path = path.as_ref();
    let mut staging = path.as_os_str().to_owned();
    staging.push(".partial");
    let staging = PathBuf::from(staging);

    let written = File::create(&staging)
        .map_err(QuantizeError::from)
        .and_then(|file| quantize_to_png(img, config, BufWriter::new(file)))
        .and_then(|out| out.into_inner().map_err(|e| QuantizeError::Io(e.into_error())))
        .and_then(|_| fs::rename(&staging, path).map_err(QuantizeError::from));
    if written.is_err() && staging.exists() {
        if let Err(remove) = fs::remove_file(&staging) {
            log::warn!("could not remove partial output {}: {remove}", staging.display());
        }
    }
    written
}

/// A palette ready for mapping, with the pixels at the palette's scale.
struct Prepared<'a> {
    pixels: Cow<'a, [Color]>,
    palette: Palette,
    remapped: RemappedPalette,
    maxval: u8,
}

fn prepare<'a>(
    pixels: Cow<'a, [Color]>,
    config: &QuantizeConfig,
) -> Result<Prepared<'a>, QuantizeError> {
    config.validate()?;

    let scale = |forced: &ForcedPalette, maxval: u8| -> Vec<Color> {
        let colors = if config.premultiplied {
            forced.premultiplied()
        } else {
            forced.colors().to_vec()
        };
        colors
            .into_iter()
            .map(|c| color::rescale(c, 255, maxval))
            .collect()
    };

    if let Some(forced) = config
        .forced()
        .filter(|f| f.is_full() || config.max_colors == 0)
    {
        log::debug!("using forced palette of {} entries as-is", forced.len());
        let palette = Palette::with_forced(
            forced.colors().to_vec(),
            scale(forced, 255),
            Vec::new(),
            255,
        );
        let remapped = palette::remap_for_transparency(&palette, config.premultiplied)?;
        return Ok(Prepared {
            pixels,
            palette,
            remapped,
            maxval: 255,
        });
    }

    let capacity = config.histogram_capacity.max(MIN_HISTOGRAM_COLORS);
    let (pixels, mut entries, maxval) = histogram_with_retry(pixels, capacity)?;

    let palette = match config.forced() {
        Some(forced) => {
            let scaled = scale(forced, maxval);
            let target = (config.max_colors as usize).max(forced.len()) - forced.len();
            let exact: HashSet<u32> = scaled.iter().map(|&c| color::pack(c)).collect();
            entries.retain(|e| !exact.contains(&color::pack(e.color)));
            let sum = entries.iter().map(|e| e.count as u64).sum();
            let quantized = median_cut::median_cut(&mut entries, sum, maxval, target);
            Palette::with_forced(forced.colors().to_vec(), scaled, quantized, maxval)
        }
        None => {
            let sum = entries.iter().map(|e| e.count as u64).sum();
            let target = config.max_colors as usize;
            Palette::new(median_cut::median_cut(&mut entries, sum, maxval, target), maxval)
        }
    };

    let remapped = palette::remap_for_transparency(&palette, config.premultiplied)?;
    Ok(Prepared {
        pixels,
        palette,
        remapped,
        maxval,
    })
}

/// Build the histogram, halving the channel scale until it fits `capacity`.
fn histogram_with_retry(
    mut pixels: Cow<'_, [Color]>,
    capacity: usize,
) -> Result<(Cow<'_, [Color]>, Vec<histogram::HistEntry>, u8), QuantizeError> {
    let mut maxval = 255u8;
    loop {
        match histogram::build_histogram(&pixels, capacity) {
            Ok(entries) => {
                log::debug!("histogram: {} colors at maxval {maxval}", entries.len());
                return Ok((pixels, entries, maxval));
            }
            Err(HistogramOverflow { capacity }) => {
                if maxval == 1 {
                    return Err(QuantizeError::InternalConsistency(
                        "histogram overflows at the coarsest scale",
                    ));
                }
                let new_maxval = maxval / 2;
                log::debug!(
                    "more than {capacity} colors at maxval {maxval}, coarsening to {new_maxval}"
                );
                for p in pixels.to_mut().iter_mut() {
                    *p = color::rescale(*p, maxval, new_maxval);
                }
                maxval = new_maxval;
            }
        }
    }
}

fn begin_png<W: Write>(
    png: PngWriter<W>,
    palette: &RemappedPalette,
    width: usize,
    height: usize,
    interlace: Interlace,
) -> Result<PaletteEncoder<PngWriter<W>>, QuantizeError> {
    let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(QuantizeError::DimensionMismatch {
            len: width.saturating_mul(height),
            width,
            height,
        });
    };
    let mut encoder = PaletteEncoder::new(png, w, h, interlace);
    encoder.begin(palette.rgb(), palette.alpha(), palette.transparent_count())?;
    Ok(encoder)
}

/// Borrow the pixels when the image has no row padding, copy them otherwise.
fn contiguous<'a>(img: ImgRef<'a, Color>) -> Result<Cow<'a, [Color]>, QuantizeError> {
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(QuantizeError::ZeroDimension);
    }
    let len = width * height;
    let buf: &'a [Color] = *img.buf();
    if img.stride() == width && buf.len() >= len {
        return Ok(Cow::Borrowed(&buf[..len]));
    }
    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(len)
        .map_err(|_| QuantizeError::OutOfMemory {
            bytes: len * size_of::<Color>(),
        })?;
    pixels.extend(img.rows().flatten().copied());
    if pixels.len() != len {
        return Err(QuantizeError::DimensionMismatch {
            len: img.buf().len(),
            width,
            height,
        });
    }
    Ok(Cow::Owned(pixels))
}

fn validate_inputs(pixel_count: usize, width: usize, height: usize) -> Result<(), QuantizeError> {
    if width == 0 || height == 0 {
        return Err(QuantizeError::ZeroDimension);
    }
    if Some(pixel_count) != width.checked_mul(height) {
        return Err(QuantizeError::DimensionMismatch {
            len: pixel_count,
            width,
            height,
        });
    }
    Ok(())
}
