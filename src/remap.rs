use std::collections::HashMap;

use crate::color::{Color, distance_sq, pack};
use crate::error::QuantizeError;

/// Initial memo size; grows on demand.
const MEMO_INITIAL: usize = 1024;

/// Maps pixels to the index of their nearest palette entry.
///
/// Results are memoized per exact color. If the memo cannot grow it is dropped
/// and every further lookup is a linear scan.
#[derive(Debug)]
pub struct NearestColorMapper<'a> {
    palette: &'a [Color],
    remap: &'a [u8],
    memo: Option<HashMap<u32, u8>>,
}

impl<'a> NearestColorMapper<'a> {
    /// `remap` translates a position in `palette` to the emitted index.
    pub fn new(palette: &'a [Color], remap: &'a [u8]) -> Self {
        debug_assert_eq!(palette.len(), remap.len());
        let mut memo = HashMap::new();
        let memo = match memo.try_reserve(MEMO_INITIAL) {
            Ok(()) => Some(memo),
            Err(_) => {
                log::warn!("color lookup memo unavailable, falling back to linear search");
                None
            }
        };
        Self {
            palette,
            remap,
            memo,
        }
    }

    /// Whether lookups are still memoized.
    pub fn is_memoized(&self) -> bool {
        self.memo.is_some()
    }

    /// Position of the nearest palette entry. First minimum wins on ties.
    pub fn nearest(&self, color: Color) -> usize {
        let mut best = 0;
        let mut best_dist = u32::MAX;
        for (i, &entry) in self.palette.iter().enumerate() {
            let d = distance_sq(color, entry);
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        best
    }

    /// Output index for a color.
    pub fn index_of(&mut self, color: Color) -> u8 {
        let key = pack(color);
        if let Some(&idx) = self.memo.as_ref().and_then(|m| m.get(&key)) {
            return idx;
        }

        let idx = self.remap[self.nearest(color)];

        if let Some(memo) = self.memo.as_mut() {
            if memo.len() == memo.capacity() && memo.try_reserve(memo.len()).is_err() {
                log::warn!(
                    "color lookup memo could not grow past {} entries, disabling it",
                    memo.len()
                );
                self.memo = None;
            } else {
                memo.insert(key, idx);
            }
        }
        idx
    }

    /// Map one row of pixels into `out`.
    pub fn map_row(&mut self, pixels: &[Color], out: &mut [u8]) {
        debug_assert_eq!(pixels.len(), out.len());
        for (dst, &pixel) in out.iter_mut().zip(pixels) {
            *dst = self.index_of(pixel);
        }
    }
}

/// Map every pixel to its output palette index.
pub fn map_pixels(
    pixels: &[Color],
    palette: &[Color],
    remap: &[u8],
) -> Result<Vec<u8>, QuantizeError> {
    let mut indices = alloc_indices(pixels.len())?;
    NearestColorMapper::new(palette, remap).map_row(pixels, &mut indices);
    Ok(indices)
}

/// Allocate a zeroed index buffer, reporting allocation failure as an error.
pub(crate) fn alloc_indices(len: usize) -> Result<Vec<u8>, QuantizeError> {
    let mut indices = Vec::new();
    indices
        .try_reserve_exact(len)
        .map_err(|_| QuantizeError::OutOfMemory { bytes: len })?;
    indices.resize(len, 0);
    Ok(indices)
}

/// Count the number of runs in an index stream.
pub fn count_runs(indices: &[u8]) -> usize {
    if indices.is_empty() {
        return 0;
    }
    1 + indices.windows(2).filter(|w| w[0] != w[1]).count()
}
