use crate::color::Color;
use crate::histogram::HistEntry;

/// A box of histogram entries for median cut subdivision.
///
/// Describes a contiguous slice of the sorted entry vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColorBox {
    start: usize,
    len: usize,
    pixel_sum: u64,
}

/// Channel chosen as the split axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Red,
    Green,
    Blue,
    Alpha,
}

impl Channel {
    #[inline(always)]
    fn of(self, c: Color) -> u8 {
        match self {
            Self::Red => c.r,
            Self::Green => c.g,
            Self::Blue => c.b,
            Self::Alpha => c.a,
        }
    }
}

/// Pick the split axis from the per-channel ranges of a box.
///
/// Alpha wins whenever its range is at least as large as every color range.
/// Among color channels ties go red, then green, then blue.
fn split_channel(entries: &[HistEntry]) -> Channel {
    let mut min = entries[0].color;
    let mut max = entries[0].color;
    for e in &entries[1..] {
        let c = e.color;
        min.r = min.r.min(c.r);
        max.r = max.r.max(c.r);
        min.g = min.g.min(c.g);
        max.g = max.g.max(c.g);
        min.b = min.b.min(c.b);
        max.b = max.b.max(c.b);
        min.a = min.a.min(c.a);
        max.a = max.a.max(c.a);
    }

    let rr = max.r - min.r;
    let rg = max.g - min.g;
    let rb = max.b - min.b;
    let ra = max.a - min.a;

    if ra >= rr && ra >= rg && ra >= rb {
        Channel::Alpha
    } else if rr >= rg && rr >= rb {
        Channel::Red
    } else if rg >= rb {
        Channel::Green
    } else {
        Channel::Blue
    }
}

/// Split point by pixel weight: the smallest prefix holding at least half the
/// box's pixels, bounded so that each side keeps one entry.
fn weighted_median(entries: &[HistEntry], pixel_sum: u64) -> (usize, u64) {
    let half = pixel_sum / 2;
    let mut lower = entries[0].count as u64;
    let mut i = 1;
    while i < entries.len() - 1 {
        if lower >= half {
            break;
        }
        lower += entries[i].count as u64;
        i += 1;
    }
    (i, lower)
}

/// Pixel-count-weighted mean of every channel, clamped to `maxval`.
fn representative(entries: &[HistEntry], maxval: u8) -> Color {
    let mut r = 0u64;
    let mut g = 0u64;
    let mut b = 0u64;
    let mut a = 0u64;
    let mut sum = 0u64;
    for e in entries {
        let w = e.count as u64;
        r += e.color.r as u64 * w;
        g += e.color.g as u64 * w;
        b += e.color.b as u64 * w;
        a += e.color.a as u64 * w;
        sum += w;
    }
    if sum == 0 {
        return Color::new(maxval, maxval, maxval, maxval);
    }
    let clamp = |v: u64| (v / sum).min(maxval as u64) as u8;
    Color::new(clamp(r), clamp(g), clamp(b), clamp(a))
}

/// Perform median cut quantization over exact histogram entries.
///
/// `entries` is reordered in place. `sum_pixels` is the total pixel weight of
/// all entries. Produces at most `target_colors` colors, fewer when the
/// histogram runs out of splittable boxes.
pub fn median_cut(
    entries: &mut [HistEntry],
    sum_pixels: u64,
    maxval: u8,
    target_colors: usize,
) -> Vec<Color> {
    if entries.is_empty() || target_colors == 0 {
        return Vec::new();
    }

    let mut boxes = Vec::with_capacity(target_colors);
    boxes.push(ColorBox {
        start: 0,
        len: entries.len(),
        pixel_sum: sum_pixels,
    });

    while boxes.len() < target_colors {
        // First splittable box; boxes are kept heaviest first.
        let Some(bi) = boxes.iter().position(|b| b.len >= 2) else {
            break;
        };
        let ColorBox {
            start,
            len,
            pixel_sum,
        } = boxes[bi];
        let slice = &mut entries[start..start + len];

        let channel = split_channel(slice);
        slice.sort_by_key(|e| channel.of(e.color));

        let (split, lower) = weighted_median(slice, pixel_sum);

        boxes[bi] = ColorBox {
            start,
            len: split,
            pixel_sum: lower,
        };
        boxes.push(ColorBox {
            start: start + split,
            len: len - split,
            pixel_sum: pixel_sum.saturating_sub(lower),
        });
        boxes.sort_by(|a, b| b.pixel_sum.cmp(&a.pixel_sum));
    }

    log::debug!(
        "median cut: {} entries -> {} boxes (requested {target_colors})",
        entries.len(),
        boxes.len()
    );

    boxes
        .iter()
        .map(|b| representative(&entries[b.start..b.start + b.len], maxval))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(r: u8, g: u8, b: u8, a: u8, count: u32) -> HistEntry {
        HistEntry {
            color: Color::new(r, g, b, a),
            count,
        }
    }

    fn total(entries: &[HistEntry]) -> u64 {
        entries.iter().map(|e| e.count as u64).sum()
    }

    #[test]
    fn empty_histogram() {
        let result = median_cut(&mut [], 0, 255, 16);
        assert!(result.is_empty());
    }

    #[test]
    fn fewer_colors_than_max() {
        let mut hist = vec![entry(10, 0, 0, 255, 10), entry(200, 0, 0, 255, 10)];
        let sum = total(&hist);
        let mut result = median_cut(&mut hist, sum, 255, 16);
        result.sort_by_key(|c| c.r);
        assert_eq!(result, vec![Color::new(10, 0, 0, 255), Color::new(200, 0, 0, 255)]);
    }

    #[test]
    fn produces_requested_count() {
        let mut hist: Vec<HistEntry> = (0..100).map(|i| entry(i as u8 * 2, 0, 0, 255, 1)).collect();
        let sum = total(&hist);
        let result = median_cut(&mut hist, sum, 255, 8);
        assert_eq!(result.len(), 8);
    }

    #[test]
    fn single_box_is_weighted_average() {
        let mut hist = vec![entry(0, 0, 0, 255, 3), entry(100, 200, 40, 255, 1)];
        let sum = total(&hist);
        let result = median_cut(&mut hist, sum, 255, 1);
        assert_eq!(result, vec![Color::new(25, 50, 10, 255)]);
    }

    #[test]
    fn dominant_color_outweighs_rare_one() {
        let mut hist = vec![entry(0, 0, 0, 255, 10000), entry(255, 255, 255, 255, 1)];
        let sum = total(&hist);
        let result = median_cut(&mut hist, sum, 255, 1);
        assert_eq!(result[0].r, 0);
    }

    #[test]
    fn alpha_wins_ties() {
        let hist = vec![entry(0, 0, 0, 0, 1), entry(255, 0, 0, 255, 1)];
        assert_eq!(split_channel(&hist), Channel::Alpha);
        let hist = vec![entry(0, 0, 0, 255, 1), entry(10, 10, 10, 255, 1)];
        assert_eq!(split_channel(&hist), Channel::Red);
        let hist = vec![entry(0, 0, 0, 255, 1), entry(5, 10, 10, 255, 1)];
        assert_eq!(split_channel(&hist), Channel::Green);
        let hist = vec![entry(0, 0, 0, 255, 1), entry(5, 5, 10, 250, 1)];
        assert_eq!(split_channel(&hist), Channel::Blue);
    }

    #[test]
    fn median_is_by_pixel_weight() {
        let hist = vec![
            entry(0, 0, 0, 255, 1),
            entry(1, 0, 0, 255, 1),
            entry(2, 0, 0, 255, 1),
            entry(3, 0, 0, 255, 97),
        ];
        // Half the weight is only reached at the heavy last entry, but each
        // side must keep one entry.
        assert_eq!(weighted_median(&hist, 100), (3, 3));

        let hist = vec![
            entry(0, 0, 0, 255, 97),
            entry(1, 0, 0, 255, 1),
            entry(2, 0, 0, 255, 1),
            entry(3, 0, 0, 255, 1),
        ];
        assert_eq!(weighted_median(&hist, 100), (1, 97));
    }

    #[test]
    fn splits_alpha_before_color() {
        // Two opaque reds and two translucent reds: the first cut separates alpha.
        let mut hist = vec![
            entry(250, 0, 0, 255, 5),
            entry(240, 0, 0, 255, 5),
            entry(250, 0, 0, 0, 5),
            entry(240, 0, 0, 0, 5),
        ];
        let sum = total(&hist);
        let result = median_cut(&mut hist, sum, 255, 2);
        let mut alphas: Vec<u8> = result.iter().map(|c| c.a).collect();
        alphas.sort_unstable();
        assert_eq!(alphas, vec![0, 255]);
    }

    #[test]
    fn clamps_to_maxval() {
        let mut hist = vec![entry(15, 15, 15, 15, 4), entry(0, 0, 0, 15, 4)];
        let sum = total(&hist);
        let result = median_cut(&mut hist, sum, 15, 1);
        assert!(result.iter().all(|c| c.r <= 15 && c.a <= 15));
    }

    #[test]
    fn heavy_cluster_gets_more_entries() {
        let mut hist = Vec::new();
        for i in 0..10u8 {
            hist.push(entry(20 + i, 0, 0, 255, 1000));
        }
        for i in 0..10u8 {
            hist.push(entry(200 + i, 0, 0, 255, 1));
        }
        let sum = total(&hist);
        let result = median_cut(&mut hist, sum, 255, 4);
        assert_eq!(result.len(), 4);
        let dark = result.iter().filter(|c| c.r < 128).count();
        let light = result.len() - dark;
        assert!(
            dark >= light,
            "expected more entries for heavy cluster: dark={dark}, light={light}"
        );
    }
}
