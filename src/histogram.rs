use std::collections::HashMap;
use std::collections::hash_map::Entry;

use thiserror::Error;

use crate::color::{Color, pack, unpack};

/// Default number of distinct colors a histogram may hold before overflowing.
pub const MAX_HISTOGRAM_COLORS: usize = 32767;

/// A histogram entry: one distinct color and how many pixels carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistEntry {
    pub color: Color,
    pub count: u32,
}

/// The image holds more distinct colors than the histogram capacity.
///
/// Recoverable: the caller coarsens the pixels and builds a new histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("image has more than {capacity} distinct colors")]
pub struct HistogramOverflow {
    pub capacity: usize,
}

/// Exact color histogram bounded by a maximum number of distinct colors.
#[derive(Debug, Clone)]
pub struct ColorHistogram {
    counts: HashMap<u32, u32>,
    capacity: usize,
    pixels: u64,
}

impl ColorHistogram {
    pub fn new(capacity: usize) -> Self {
        Self {
            counts: HashMap::new(),
            capacity,
            pixels: 0,
        }
    }

    /// Count every pixel. Fails as soon as a color beyond the capacity shows up;
    /// the histogram must then be discarded.
    pub fn add(&mut self, pixels: &[Color]) -> Result<(), HistogramOverflow> {
        for &pixel in pixels {
            let len = self.counts.len();
            match self.counts.entry(pack(pixel)) {
                Entry::Occupied(mut e) => *e.get_mut() += 1,
                Entry::Vacant(e) => {
                    if len >= self.capacity {
                        return Err(HistogramOverflow {
                            capacity: self.capacity,
                        });
                    }
                    e.insert(1);
                }
            }
        }
        self.pixels += pixels.len() as u64;
        Ok(())
    }

    /// Number of distinct colors seen so far.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Total pixel count added.
    pub fn pixel_count(&self) -> u64 {
        self.pixels
    }

    /// Finalize into a flat entry list sorted by packed color.
    pub fn into_entries(self) -> Vec<HistEntry> {
        let mut keyed: Vec<(u32, u32)> = self.counts.into_iter().collect();
        keyed.sort_unstable_by_key(|&(key, _)| key);
        keyed
            .into_iter()
            .map(|(key, count)| HistEntry {
                color: unpack(key),
                count,
            })
            .collect()
    }
}

/// Build the histogram of a pixel buffer in one pass.
pub fn build_histogram(
    pixels: &[Color],
    capacity: usize,
) -> Result<Vec<HistEntry>, HistogramOverflow> {
    let mut hist = ColorHistogram::new(capacity);
    hist.add(pixels)?;
    Ok(hist.into_entries())
}
