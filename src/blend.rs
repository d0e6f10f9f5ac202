use serde::{Deserialize, Serialize};

// ============================================================================
// PIXEL MATH — premultiplied-alpha RGBA in f32
//
// Tiles store half floats; all arithmetic happens in f32 and is rounded back
// on store.  Everything here assumes premultiplied alpha: color channels are
// pre-scaled by alpha, which keeps linear compositing a pure multiply-add.
// ============================================================================

/// One premultiplied RGBA pixel, widened to f32 for arithmetic.
pub type Px = [f32; 4];

pub const TRANSPARENT: Px = [0.0, 0.0, 0.0, 0.0];

/// Alpha below this is treated as zero when un-premultiplying.
const ALPHA_EPSILON: f32 = 1e-4;

#[inline]
pub fn scale(p: Px, s: f32) -> Px {
    [p[0] * s, p[1] * s, p[2] * s, p[3] * s]
}

#[inline]
pub fn add(a: Px, b: Px) -> Px {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]]
}

/// `src` composited over `dst`.
#[inline]
pub fn src_over(src: Px, dst: Px) -> Px {
    add(src, scale(dst, 1.0 - src[3]))
}

/// `src` composited underneath `dst`.
#[inline]
pub fn dst_over(src: Px, dst: Px) -> Px {
    add(scale(src, 1.0 - dst[3]), dst)
}

/// `src` drawn only where `dst` already has coverage (alpha is preserved).
#[inline]
pub fn src_atop(src: Px, dst: Px) -> Px {
    add(scale(src, dst[3]), scale(dst, 1.0 - src[3]))
}

/// `dst` with `src`'s coverage punched out (eraser).
#[inline]
pub fn dst_out(src: Px, dst: Px) -> Px {
    scale(dst, 1.0 - src[3])
}

/// Divide out alpha to recover straight color.  Returns black for
/// effectively-transparent pixels so blend operators never see NaN.
#[inline]
fn unpremultiply(p: Px) -> [f32; 3] {
    if p[3] < ALPHA_EPSILON {
        [0.0, 0.0, 0.0]
    } else {
        [p[0] / p[3], p[1] / p[3], p[2] / p[3]]
    }
}

// ============================================================================
// BLEND MODES
// ============================================================================

/// Per-layer blend mode.  All modes are separable (per-channel); the
/// operator runs on un-premultiplied color and the result is recombined by
/// [`blend_pixel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Plus,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
}

impl BlendMode {
    /// Returns all blend modes, in UI display order.
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Plus,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Plus => "Plus",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
        }
    }

    /// Convert to a stable u8 for binary serialization.
    pub fn to_u8(self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Plus => 1,
            BlendMode::Multiply => 2,
            BlendMode::Screen => 3,
            BlendMode::Overlay => 4,
            BlendMode::Darken => 5,
            BlendMode::Lighten => 6,
            BlendMode::ColorDodge => 7,
            BlendMode::ColorBurn => 8,
            BlendMode::HardLight => 9,
            BlendMode::SoftLight => 10,
            BlendMode::Difference => 11,
            BlendMode::Exclusion => 12,
        }
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values).
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => BlendMode::Plus,
            2 => BlendMode::Multiply,
            3 => BlendMode::Screen,
            4 => BlendMode::Overlay,
            5 => BlendMode::Darken,
            6 => BlendMode::Lighten,
            7 => BlendMode::ColorDodge,
            8 => BlendMode::ColorBurn,
            9 => BlendMode::HardLight,
            10 => BlendMode::SoftLight,
            11 => BlendMode::Difference,
            12 => BlendMode::Exclusion,
            _ => BlendMode::Normal,
        }
    }

    /// Single-channel blend operator on un-premultiplied values in [0, 1].
    ///
    /// Reference: https://www.w3.org/TR/SVGCompositing/#alphaCompositing
    fn channel(self, src: f32, dst: f32) -> f32 {
        match self {
            BlendMode::Normal => src,
            BlendMode::Plus => src + dst,
            BlendMode::Multiply => src * dst,
            BlendMode::Screen => src + dst - src * dst,
            BlendMode::Overlay => {
                if dst <= 0.5 {
                    2.0 * src * dst
                } else {
                    1.0 - 2.0 * (1.0 - dst) * (1.0 - src)
                }
            }
            BlendMode::Darken => src.min(dst),
            BlendMode::Lighten => src.max(dst),
            BlendMode::ColorDodge => {
                if src > 0.999 {
                    1.0
                } else {
                    (dst / (1.0 - src)).min(1.0)
                }
            }
            BlendMode::ColorBurn => {
                if src < 0.001 {
                    0.0
                } else {
                    1.0 - ((1.0 - dst) / src).min(1.0)
                }
            }
            BlendMode::HardLight => {
                if src <= 0.5 {
                    2.0 * src * dst
                } else {
                    1.0 - 2.0 * (1.0 - dst) * (1.0 - src)
                }
            }
            BlendMode::SoftLight => {
                if src <= 0.5 {
                    dst - (1.0 - 2.0 * src) * dst * (1.0 - dst)
                } else if dst <= 0.25 {
                    dst + (2.0 * src - 1.0)
                        * (4.0 * dst * (4.0 * dst + 1.0) * (dst - 1.0) + 7.0 * dst)
                } else {
                    dst + (2.0 * src - 1.0) * (dst.sqrt() - dst)
                }
            }
            BlendMode::Difference => (dst - src).abs(),
            BlendMode::Exclusion => src + dst - 2.0 * src * dst,
        }
    }
}

/// How a layer's contribution interacts with the clip-group state of the
/// accumulator it lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipOp {
    /// Ordinary compositing: both src and dst show through.
    None,
    /// Inside a clip run: src only appears where dst has coverage.
    Clip,
    /// Clip base: dst's show-through term is dropped so the accumulator
    /// restarts from the base layer alone.
    StartClip,
}

/// Blend one premultiplied `src` pixel (opacity already applied) into a
/// premultiplied `dst` pixel.
///
/// The blend operator runs on un-premultiplied color; the result is
/// recombined per the standard formula
/// `blend(src,dst)*sa*da + src*(1-da) + dst*(1-sa)`, with the clip variants
/// dropping the dst or src pass-through term.
pub fn blend_pixel(mode: BlendMode, src: Px, dst: Px, clip: ClipOp) -> Px {
    if mode == BlendMode::Normal {
        // Normal reduces to plain Porter-Duff, skip the un-premultiply.
        return match clip {
            ClipOp::StartClip => src,
            ClipOp::Clip => src_atop(src, dst),
            ClipOp::None => src_over(src, dst),
        };
    }

    let sc = unpremultiply(src);
    let dc = unpremultiply(dst);
    let sa = src[3];
    let da = dst[3];
    let w = sa * da;
    let mut out = TRANSPARENT;
    for i in 0..3 {
        let b = mode.channel(sc[i], dc[i]).clamp(0.0, 1.0);
        out[i] = b * w;
    }
    out[3] = w;

    match clip {
        ClipOp::StartClip => add(out, scale(src, 1.0 - da)),
        ClipOp::Clip => add(out, scale(dst, 1.0 - sa)),
        ClipOp::None => add(add(out, scale(src, 1.0 - da)), scale(dst, 1.0 - sa)),
    }
}
