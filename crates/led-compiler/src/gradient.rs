//! Piecewise-linear gradient builder (§4.5): breakpoints are distributed
//! symmetrically from both ends of the anchor list, then each segment is
//! interpolated per channel.

use led_color::Color;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GradientError {
    #[error("gradient needs at least 2 anchor colors, got {0}")]
    TooFewAnchors(usize),
    #[error("gradient target length {len} is shorter than its {anchors} anchor colors")]
    SpanTooShort { anchors: usize, len: usize },
}

pub fn gradient(colors: &[Color], len: usize) -> Result<Vec<Color>, GradientError> {
    let m = colors.len();
    if m < 2 {
        return Err(GradientError::TooFewAnchors(m));
    }
    if len < m {
        return Err(GradientError::SpanTooShort { anchors: m, len });
    }

    let breakpoints = breakpoints(m, len);

    let mut out = vec![Color::BLACK; len];
    for k in 0..m - 1 {
        let lo = breakpoints[k];
        let hi = breakpoints[k + 1];
        let span = hi - lo;
        if span == 0 {
            out[lo] = colors[k];
            continue;
        }
        for x in 0..=span {
            let t = x as f64 / span as f64;
            out[lo + x] = lerp(colors[k], colors[k + 1], t);
        }
    }
    out[len - 1] = colors[m - 1];

    Ok(out)
}

/// `m-1` segments need `m` breakpoints; the `len - m` extra slots are
/// distributed starting from the front, alternating with the back.
fn breakpoints(m: usize, len: usize) -> Vec<usize> {
    let total = len - m;
    let denom = m - 1;
    let per = total / denom;
    let modulo = total % denom;

    let mut bk = vec![0usize];
    let mut bk_rev = vec![len - 1];

    let mut k = 0usize;
    while m >= 2 && k < m - 2 {
        let next = *bk.last().unwrap() + per + usize::from(k < modulo);
        bk.push(next);

        let k2 = k + 1;
        if k2 >= m - 2 {
            break;
        }
        let prev = *bk_rev.last().unwrap() - per - usize::from(k2 < modulo);
        bk_rev.push(prev);
        k += 2;
    }

    bk_rev.reverse();
    bk.extend(bk_rev);
    bk
}

fn lerp(a: Color, b: Color, t: f64) -> Color {
    let chan = |ca: u8, cb: u8| -> u8 { (f64::from(ca) + (f64::from(cb) - f64::from(ca)) * t) as u8 };
    Color {
        r: chan(a.r, b.r),
        g: chan(a.g, b.g),
        b: chan(a.b, b.b),
        l: chan(a.l, b.l),
    }
}
