//! PNG palette-mode sink.
//!
//! Writes color type 3 images: signature, `IHDR`, `tEXt`, `PLTE`, optional
//! `tRNS`, `IDAT` and `IEND`. Scanlines are unfiltered. Compressed data is
//! flushed into an `IDAT` chunk every 32 KiB so row streaming stays bounded.

use std::io::{self, Write};
use std::mem;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use rgb::RGB8;

use crate::encoder::{Interlace, PaletteHeader, PaletteSink, pack_indices};
use crate::error::EncodeError;

const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Compressed bytes buffered before an `IDAT` chunk is emitted.
const IDAT_CHUNK_SIZE: usize = 32 * 1024;

/// Default `tEXt` Software value.
pub const DEFAULT_SOFTWARE: &str = "mapquant";

/// Adam7 passes as `(x0, y0, dx, dy)`.
const ADAM7: [(usize, usize, usize, usize); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

/// Palette-mode PNG writer over any byte sink.
#[derive(Debug)]
pub struct PngWriter<W: Write> {
    out: W,
    zlib: ZlibEncoder<Vec<u8>>,
    compression: Compression,
    software: Option<String>,
    header: Option<PaletteHeader>,
    row: Vec<u8>,
    packed: Vec<u8>,
    finished: bool,
}

impl<W: Write> PngWriter<W> {
    /// `compression` is a zlib level `0..=9`; `None` picks the zlib default.
    pub fn new(out: W, compression: Option<u32>) -> Self {
        let compression = compression.map_or_else(Compression::default, |level| {
            Compression::new(level.min(9))
        });
        Self {
            out,
            zlib: ZlibEncoder::new(Vec::new(), compression),
            compression,
            software: Some(DEFAULT_SOFTWARE.to_owned()),
            header: None,
            row: Vec::new(),
            packed: Vec::new(),
            finished: false,
        }
    }

    /// Value of the `tEXt` Software chunk; `None` omits the chunk.
    pub fn software(mut self, software: Option<String>) -> Self {
        self.software = software;
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn header(&self, operation: &'static str) -> Result<PaletteHeader, EncodeError> {
        self.header.ok_or(EncodeError::OutOfSequence {
            operation,
            state: "no header written",
        })
    }

    fn write_chunk(&mut self, kind: &[u8; 4], data: &[u8]) -> io::Result<()> {
        let mut crc = crc32fast::Hasher::new();
        crc.update(kind);
        crc.update(data);
        self.out.write_all(&(data.len() as u32).to_be_bytes())?;
        self.out.write_all(kind)?;
        self.out.write_all(data)?;
        self.out.write_all(&crc.finalize().to_be_bytes())
    }

    /// Feed one unfiltered scanline to the compressor.
    fn compress_scanline(&mut self, packed: &[u8]) -> io::Result<()> {
        self.zlib.write_all(&[0])?;
        self.zlib.write_all(packed)?;
        if self.zlib.get_ref().len() >= IDAT_CHUNK_SIZE {
            let data = mem::take(self.zlib.get_mut());
            self.write_chunk(b"IDAT", &data)?;
        }
        Ok(())
    }
}

impl<W: Write> PaletteSink for PngWriter<W> {
    fn write_header(
        &mut self,
        header: &PaletteHeader,
        palette: &[RGB8],
        trns: &[u8],
    ) -> Result<(), EncodeError> {
        if self.header.is_some() {
            return Err(EncodeError::OutOfSequence {
                operation: "write_header",
                state: "header already written",
            });
        }
        self.out.write_all(&SIGNATURE)?;

        let mut ihdr = Vec::with_capacity(13);
        ihdr.extend_from_slice(&header.width.to_be_bytes());
        ihdr.extend_from_slice(&header.height.to_be_bytes());
        ihdr.push(header.bit_depth);
        ihdr.push(3); // indexed color
        ihdr.push(0); // deflate
        ihdr.push(0); // adaptive filtering, filter type 0 per row
        ihdr.push(match header.interlace {
            Interlace::None => 0,
            Interlace::Adam7 => 1,
        });
        self.write_chunk(b"IHDR", &ihdr)?;

        if let Some(software) = &self.software {
            let text = [b"Software\0".as_slice(), software.as_bytes()].concat();
            self.write_chunk(b"tEXt", &text)?;
        }

        let plte: Vec<u8> = palette.iter().flat_map(|c| [c.r, c.g, c.b]).collect();
        self.write_chunk(b"PLTE", &plte)?;

        if !trns.is_empty() {
            self.write_chunk(b"tRNS", trns)?;
        }

        self.header = Some(*header);
        Ok(())
    }

    fn write_row(&mut self, packed: &[u8]) -> Result<(), EncodeError> {
        self.header("write_row")?;
        self.compress_scanline(packed)?;
        Ok(())
    }

    fn write_image(&mut self, indices: &[u8]) -> Result<(), EncodeError> {
        let header = self.header("write_image")?;
        let width = header.width as usize;
        let height = header.height as usize;
        if indices.len() != width * height {
            return Err(EncodeError::ImageLength {
                expected: width * height,
                actual: indices.len(),
            });
        }

        let mut row = mem::take(&mut self.row);
        let mut packed = mem::take(&mut self.packed);
        for (x0, y0, dx, dy) in ADAM7 {
            // Passes with no pixels are skipped entirely, filter bytes included.
            if x0 >= width || y0 >= height {
                continue;
            }
            for y in (y0..height).step_by(dy) {
                let line = &indices[y * width..(y + 1) * width];
                row.clear();
                row.extend(line[x0..].iter().step_by(dx));
                pack_indices(&row, header.bit_depth, &mut packed);
                self.compress_scanline(&packed)?;
            }
        }
        self.row = row;
        self.packed = packed;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EncodeError> {
        self.header("finish")?;
        if self.finished {
            return Err(EncodeError::OutOfSequence {
                operation: "finish",
                state: "already finished",
            });
        }
        let zlib = mem::replace(
            &mut self.zlib,
            ZlibEncoder::new(Vec::new(), self.compression),
        );
        let data = zlib.finish()?;
        if !data.is_empty() {
            self.write_chunk(b"IDAT", &data)?;
        }
        self.write_chunk(b"IEND", &[])?;
        self.out.flush()?;
        self.finished = true;
        Ok(())
    }
}
