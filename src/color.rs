//! RGBA color helpers shared by the histogram, quantizer, remapper and mapper.

/// An RGBA color. Channels live in `[0, maxval]` of the current quantization pass.
pub type Color = rgb::RGBA8;

/// Pack a color into a `u32` key: `r<<24 | g<<16 | b<<8 | a`.
#[inline(always)]
pub fn pack(c: Color) -> u32 {
    (c.r as u32) << 24 | (c.g as u32) << 16 | (c.b as u32) << 8 | c.a as u32
}

/// Inverse of [`pack`].
#[inline(always)]
pub fn unpack(key: u32) -> Color {
    Color {
        r: (key >> 24) as u8,
        g: (key >> 16) as u8,
        b: (key >> 8) as u8,
        a: key as u8,
    }
}

/// Squared Euclidean distance over all four channels.
#[inline(always)]
pub fn distance_sq(a: Color, b: Color) -> u32 {
    let dr = a.r as i32 - b.r as i32;
    let dg = a.g as i32 - b.g as i32;
    let db = a.b as i32 - b.b as i32;
    let da = a.a as i32 - b.a as i32;
    (dr * dr + dg * dg + db * db + da * da) as u32
}

/// Rescale one channel from `[0, old_maxval]` to `[0, new_maxval]` with rounding.
#[inline(always)]
pub fn rescale_channel(v: u8, old_maxval: u8, new_maxval: u8) -> u8 {
    let old = old_maxval as u32;
    ((v as u32 * new_maxval as u32 + old / 2) / old) as u8
}

/// Rescale every channel of a color between two maxvals.
pub fn rescale(c: Color, old_maxval: u8, new_maxval: u8) -> Color {
    Color {
        r: rescale_channel(c.r, old_maxval, new_maxval),
        g: rescale_channel(c.g, old_maxval, new_maxval),
        b: rescale_channel(c.b, old_maxval, new_maxval),
        a: rescale_channel(c.a, old_maxval, new_maxval),
    }
}

/// Scale RGB by the alpha fraction. Fully opaque colors are returned unchanged.
pub fn premultiply(c: Color) -> Color {
    if c.a == 255 {
        return c;
    }
    let a = c.a as u32;
    Color {
        r: ((c.r as u32 * a + 127) / 255) as u8,
        g: ((c.g as u32 * a + 127) / 255) as u8,
        b: ((c.b as u32 * a + 127) / 255) as u8,
        a: c.a,
    }
}

/// Recover straight RGB from premultiplied RGB.
///
/// Alpha 0 and 255 leave the color untouched. Results are clamped to 255, which
/// matters for inputs that were not validly premultiplied (`r > a`).
pub fn unpremultiply(c: Color) -> Color {
    if c.a == 255 || c.a == 0 {
        return c;
    }
    let a = c.a as u32;
    let up = |v: u8| (v as u32 * 255 / a).min(255) as u8;
    Color {
        r: up(c.r),
        g: up(c.g),
        b: up(c.b),
        a: c.a,
    }
}
