//! Streaming palette-image encoder.
//!
//! [`PaletteEncoder`] enforces the call order of an indexed image write and
//! hands packed data to a [`PaletteSink`]. Two protocols exist: row streaming
//! for non-interlaced output, and a single whole-image write for Adam7 output
//! where the sink orders the passes.

use rgb::RGB8;

use crate::error::EncodeError;
use crate::palette::bit_depth_for;

/// Scanline ordering of the output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interlace {
    /// Rows are written top to bottom, one at a time.
    #[default]
    None,
    /// Adam7 seven-pass interlacing; the whole index buffer is written at once.
    Adam7,
}

/// Image header handed to the sink before any pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteHeader {
    pub width: u32,
    pub height: u32,
    /// Bits per index: 1, 2, 4 or 8.
    pub bit_depth: u8,
    pub interlace: Interlace,
}

/// Destination of an encoded palette image.
///
/// Calls arrive in order: `write_header`, then either `write_row` once per
/// row or `write_image` once, then `finish`.
pub trait PaletteSink {
    /// `trns` holds the alpha of the leading translucent entries only and may
    /// be empty.
    fn write_header(
        &mut self,
        header: &PaletteHeader,
        palette: &[RGB8],
        trns: &[u8],
    ) -> Result<(), EncodeError>;

    /// One row, already packed to the header bit depth.
    fn write_row(&mut self, packed: &[u8]) -> Result<(), EncodeError>;

    /// The full unpacked index buffer of an interlaced image.
    fn write_image(&mut self, indices: &[u8]) -> Result<(), EncodeError>;

    /// Write the trailer and flush.
    fn finish(&mut self) -> Result<(), EncodeError>;
}

impl<S: PaletteSink + ?Sized> PaletteSink for &mut S {
    fn write_header(
        &mut self,
        header: &PaletteHeader,
        palette: &[RGB8],
        trns: &[u8],
    ) -> Result<(), EncodeError> {
        (**self).write_header(header, palette, trns)
    }

    fn write_row(&mut self, packed: &[u8]) -> Result<(), EncodeError> {
        (**self).write_row(packed)
    }

    fn write_image(&mut self, indices: &[u8]) -> Result<(), EncodeError> {
        (**self).write_image(indices)
    }

    fn finish(&mut self) -> Result<(), EncodeError> {
        (**self).finish()
    }
}

/// Where an encoder is in its write protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Initialized,
    HeaderWritten,
    WritingRows { next_row: u32 },
    Interlaced,
    Finished,
    Failed,
}

impl EncoderState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized => "Initialized",
            Self::HeaderWritten => "HeaderWritten",
            Self::WritingRows { .. } => "WritingRows",
            Self::Interlaced => "Interlaced",
            Self::Finished => "Finished",
            Self::Failed => "Failed",
        }
    }
}

/// Palette image encoder state machine.
///
/// Any error moves the encoder to [`EncoderState::Failed`]; every later call
/// then returns [`EncodeError::Failed`].
#[derive(Debug)]
pub struct PaletteEncoder<S: PaletteSink> {
    sink: S,
    width: u32,
    height: u32,
    interlace: Interlace,
    bit_depth: u8,
    state: EncoderState,
    packed: Vec<u8>,
}

impl<S: PaletteSink> PaletteEncoder<S> {
    pub fn new(sink: S, width: u32, height: u32, interlace: Interlace) -> Self {
        Self {
            sink,
            width,
            height,
            interlace,
            bit_depth: 8,
            state: EncoderState::Initialized,
            packed: Vec::new(),
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Bits per index, known once the header is written.
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Write the header, palette and transparency table.
    ///
    /// `alpha` must cover at least the first `transparent_count` entries;
    /// exactly that many are passed on.
    pub fn begin(
        &mut self,
        palette: &[RGB8],
        alpha: &[u8],
        transparent_count: usize,
    ) -> Result<(), EncodeError> {
        self.expect_state("begin", |s| s == EncoderState::Initialized)?;
        let result = self.begin_inner(palette, alpha, transparent_count);
        self.settle(result, EncoderState::HeaderWritten)
    }

    fn begin_inner(
        &mut self,
        palette: &[RGB8],
        alpha: &[u8],
        transparent_count: usize,
    ) -> Result<(), EncodeError> {
        if palette.is_empty() || palette.len() > 256 {
            return Err(EncodeError::InvalidPalette(palette.len()));
        }
        if transparent_count > palette.len() || transparent_count > alpha.len() {
            return Err(EncodeError::InvalidTransparency {
                count: transparent_count,
                palette_len: palette.len(),
            });
        }
        self.bit_depth = bit_depth_for(palette.len());
        let header = PaletteHeader {
            width: self.width,
            height: self.height,
            bit_depth: self.bit_depth,
            interlace: self.interlace,
        };
        log::debug!(
            "palette encoder: {}x{} {} colors, {} bit, {} translucent, {:?}",
            self.width,
            self.height,
            palette.len(),
            self.bit_depth,
            transparent_count,
            self.interlace
        );
        self.sink
            .write_header(&header, palette, &alpha[..transparent_count])
    }

    /// Stream the next row of indices. Non-interlaced images only.
    pub fn write_row(&mut self, indices: &[u8]) -> Result<(), EncodeError> {
        let interlace = self.interlace;
        let height = self.height;
        let state = self.expect_state("write_row", |s| match s {
            EncoderState::HeaderWritten => interlace == Interlace::None,
            EncoderState::WritingRows { next_row } => next_row < height,
            _ => false,
        })?;
        let next_row = match state {
            EncoderState::WritingRows { next_row } => next_row,
            _ => 0,
        };
        let result = self.write_row_inner(indices);
        self.settle(
            result,
            EncoderState::WritingRows {
                next_row: next_row + 1,
            },
        )
    }

    fn write_row_inner(&mut self, indices: &[u8]) -> Result<(), EncodeError> {
        if indices.len() != self.width as usize {
            return Err(EncodeError::RowLength {
                expected: self.width as usize,
                actual: indices.len(),
            });
        }
        pack_indices(indices, self.bit_depth, &mut self.packed);
        self.sink.write_row(&self.packed)
    }

    /// Write the whole index buffer. Interlaced images only.
    pub fn write_whole(&mut self, indices: &[u8]) -> Result<(), EncodeError> {
        let interlace = self.interlace;
        self.expect_state("write_whole", |s| {
            s == EncoderState::HeaderWritten && interlace == Interlace::Adam7
        })?;
        let expected = self.width as usize * self.height as usize;
        let result = if indices.len() != expected {
            Err(EncodeError::ImageLength {
                expected,
                actual: indices.len(),
            })
        } else {
            self.sink.write_image(indices)
        };
        self.settle(result, EncoderState::Interlaced)
    }

    /// Write the trailer and return the flushed sink.
    pub fn finish(mut self) -> Result<S, EncodeError> {
        let height = self.height;
        self.expect_state("finish", |s| match s {
            EncoderState::WritingRows { next_row } => next_row == height,
            EncoderState::Interlaced => true,
            _ => false,
        })?;
        self.sink.finish()?;
        self.state = EncoderState::Finished;
        log::debug!("palette encoder finished");
        Ok(self.sink)
    }

    /// Check the current state, failing the encoder if it does not fit.
    fn expect_state(
        &mut self,
        operation: &'static str,
        allowed: impl Fn(EncoderState) -> bool,
    ) -> Result<EncoderState, EncodeError> {
        let state = self.state;
        if state == EncoderState::Failed {
            return Err(EncodeError::Failed);
        }
        if !allowed(state) {
            self.state = EncoderState::Failed;
            return Err(EncodeError::OutOfSequence {
                operation,
                state: state.name(),
            });
        }
        Ok(state)
    }

    fn settle(
        &mut self,
        result: Result<(), EncodeError>,
        next: EncoderState,
    ) -> Result<(), EncodeError> {
        self.state = if result.is_ok() {
            next
        } else {
            EncoderState::Failed
        };
        result
    }
}

/// Pack indices at `bit_depth` bits each, most significant bits first.
///
/// `out` is cleared and receives `ceil(len * bit_depth / 8)` bytes; a partial
/// last byte is zero-padded. Index bits above the depth are dropped.
pub fn pack_indices(indices: &[u8], bit_depth: u8, out: &mut Vec<u8>) {
    out.clear();
    if bit_depth >= 8 {
        out.extend_from_slice(indices);
        return;
    }
    let per_byte = (8 / bit_depth) as usize;
    let mask = (1u8 << bit_depth) - 1;
    out.extend(indices.chunks(per_byte).map(|chunk| {
        chunk.iter().enumerate().fold(0u8, |byte, (j, &ix)| {
            let shift = 8 - bit_depth as usize * (j + 1);
            byte | (ix & mask) << shift
        })
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every call for inspection.
    #[derive(Debug, Default)]
    struct Recorder {
        header: Option<PaletteHeader>,
        palette: Vec<RGB8>,
        trns: Vec<u8>,
        rows: Vec<Vec<u8>>,
        image: Option<Vec<u8>>,
        finished: bool,
        fail_rows: bool,
    }

    impl PaletteSink for Recorder {
        fn write_header(
            &mut self,
            header: &PaletteHeader,
            palette: &[RGB8],
            trns: &[u8],
        ) -> Result<(), EncodeError> {
            self.header = Some(*header);
            self.palette = palette.to_vec();
            self.trns = trns.to_vec();
            Ok(())
        }

        fn write_row(&mut self, packed: &[u8]) -> Result<(), EncodeError> {
            if self.fail_rows {
                return Err(EncodeError::Io(std::io::Error::other("disk full")));
            }
            self.rows.push(packed.to_vec());
            Ok(())
        }

        fn write_image(&mut self, indices: &[u8]) -> Result<(), EncodeError> {
            self.image = Some(indices.to_vec());
            Ok(())
        }

        fn finish(&mut self) -> Result<(), EncodeError> {
            self.finished = true;
            Ok(())
        }
    }

    fn gray(n: usize) -> Vec<RGB8> {
        (0..n).map(|i| RGB8::new(i as u8, i as u8, i as u8)).collect()
    }

    #[test]
    fn streams_rows_in_order() {
        let mut enc = PaletteEncoder::new(Recorder::default(), 3, 2, Interlace::None);
        enc.begin(&gray(3), &[0, 128, 255], 2).unwrap();
        assert_eq!(enc.state(), EncoderState::HeaderWritten);
        assert_eq!(enc.bit_depth(), 2);
        enc.write_row(&[0, 1, 2]).unwrap();
        assert_eq!(enc.state(), EncoderState::WritingRows { next_row: 1 });
        enc.write_row(&[2, 2, 2]).unwrap();
        let sink = enc.finish().unwrap();
        assert!(sink.finished);
        assert_eq!(sink.trns, vec![0, 128]);
        assert_eq!(sink.rows, vec![vec![0b0001_1000], vec![0b1010_1000]]);
        assert_eq!(sink.header.unwrap().bit_depth, 2);
    }

    #[test]
    fn no_transparency_table_when_all_opaque() {
        let mut enc = PaletteEncoder::new(Recorder::default(), 1, 1, Interlace::None);
        enc.begin(&gray(2), &[255, 255], 0).unwrap();
        enc.write_row(&[1]).unwrap();
        let sink = enc.finish().unwrap();
        assert!(sink.trns.is_empty());
    }

    #[test]
    fn too_many_rows_is_out_of_sequence() {
        let mut enc = PaletteEncoder::new(Recorder::default(), 2, 1, Interlace::None);
        enc.begin(&gray(2), &[], 0).unwrap();
        enc.write_row(&[0, 1]).unwrap();
        let err = enc.write_row(&[0, 1]).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::OutOfSequence {
                operation: "write_row",
                state: "WritingRows"
            }
        ));
        assert_eq!(enc.state(), EncoderState::Failed);
        assert!(matches!(enc.finish(), Err(EncodeError::Failed)));
    }

    #[test]
    fn row_before_header_fails() {
        let mut enc = PaletteEncoder::new(Recorder::default(), 2, 1, Interlace::None);
        assert!(matches!(
            enc.write_row(&[0, 0]),
            Err(EncodeError::OutOfSequence {
                state: "Initialized",
                ..
            })
        ));
        assert!(matches!(
            enc.begin(&gray(2), &[], 0),
            Err(EncodeError::Failed)
        ));
    }

    #[test]
    fn finish_requires_every_row() {
        let mut enc = PaletteEncoder::new(Recorder::default(), 2, 2, Interlace::None);
        enc.begin(&gray(2), &[], 0).unwrap();
        enc.write_row(&[0, 1]).unwrap();
        assert!(matches!(
            enc.finish(),
            Err(EncodeError::OutOfSequence {
                operation: "finish",
                ..
            })
        ));
    }

    #[test]
    fn wrong_row_length_fails_encoder() {
        let mut enc = PaletteEncoder::new(Recorder::default(), 4, 2, Interlace::None);
        enc.begin(&gray(16), &[], 0).unwrap();
        assert!(matches!(
            enc.write_row(&[0, 1, 2]),
            Err(EncodeError::RowLength {
                expected: 4,
                actual: 3
            })
        ));
        assert!(matches!(
            enc.write_row(&[0, 1, 2, 3]),
            Err(EncodeError::Failed)
        ));
    }

    #[test]
    fn sink_error_fails_encoder() {
        let sink = Recorder {
            fail_rows: true,
            ..Recorder::default()
        };
        let mut enc = PaletteEncoder::new(sink, 1, 2, Interlace::None);
        enc.begin(&gray(2), &[], 0).unwrap();
        assert!(matches!(enc.write_row(&[0]), Err(EncodeError::Io(_))));
        assert_eq!(enc.state(), EncoderState::Failed);
    }

    #[test]
    fn interlaced_takes_whole_image() {
        let mut enc = PaletteEncoder::new(Recorder::default(), 2, 2, Interlace::Adam7);
        enc.begin(&gray(4), &[10, 20, 30, 40], 1).unwrap();
        assert!(matches!(
            enc.write_row(&[0, 1]),
            Err(EncodeError::OutOfSequence { .. })
        ));

        let mut enc = PaletteEncoder::new(Recorder::default(), 2, 2, Interlace::Adam7);
        enc.begin(&gray(4), &[10, 20, 30, 40], 1).unwrap();
        enc.write_whole(&[0, 1, 2, 3]).unwrap();
        assert_eq!(enc.state(), EncoderState::Interlaced);
        let sink = enc.finish().unwrap();
        assert_eq!(sink.image.as_deref(), Some(&[0, 1, 2, 3][..]));
        assert_eq!(sink.trns, vec![10]);
    }

    #[test]
    fn whole_image_length_checked() {
        let mut enc = PaletteEncoder::new(Recorder::default(), 2, 2, Interlace::Adam7);
        enc.begin(&gray(4), &[], 0).unwrap();
        assert!(matches!(
            enc.write_whole(&[0, 1, 2]),
            Err(EncodeError::ImageLength {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn whole_image_rejected_when_not_interlaced() {
        let mut enc = PaletteEncoder::new(Recorder::default(), 1, 1, Interlace::None);
        enc.begin(&gray(2), &[], 0).unwrap();
        assert!(enc.write_whole(&[0]).is_err());
    }

    #[test]
    fn rejects_bad_palettes() {
        let mut enc = PaletteEncoder::new(Recorder::default(), 1, 1, Interlace::None);
        assert!(matches!(
            enc.begin(&[], &[], 0),
            Err(EncodeError::InvalidPalette(0))
        ));
        let mut enc = PaletteEncoder::new(Recorder::default(), 1, 1, Interlace::None);
        assert!(matches!(
            enc.begin(&gray(257), &[], 0),
            Err(EncodeError::InvalidPalette(257))
        ));
        let mut enc = PaletteEncoder::new(Recorder::default(), 1, 1, Interlace::None);
        assert!(matches!(
            enc.begin(&gray(2), &[0], 2),
            Err(EncodeError::InvalidTransparency { .. })
        ));
    }

    #[test]
    fn works_through_mutable_reference() {
        let mut recorder = Recorder::default();
        let mut enc = PaletteEncoder::new(&mut recorder, 1, 1, Interlace::None);
        enc.begin(&gray(1), &[], 0).unwrap();
        enc.write_row(&[0]).unwrap();
        enc.finish().unwrap();
        assert!(recorder.finished);
    }

    #[test]
    fn packs_msb_first() {
        let mut out = Vec::new();
        pack_indices(&[1, 0, 1, 1, 0, 0, 0, 1, 1], 1, &mut out);
        assert_eq!(out, vec![0b1011_0001, 0b1000_0000]);
        pack_indices(&[3, 2, 1], 2, &mut out);
        assert_eq!(out, vec![0b1110_0100]);
        pack_indices(&[0xA, 0x5, 0xF], 4, &mut out);
        assert_eq!(out, vec![0xA5, 0xF0]);
        pack_indices(&[7, 200], 8, &mut out);
        assert_eq!(out, vec![7, 200]);
    }
}
