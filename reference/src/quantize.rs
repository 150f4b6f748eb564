//! Quantizers expressed as tensor operations.
//!
//! These follow the training library's float formulas and never touch the
//! fixed-point types, so the executor can be checked against them.

use candle_core::{DType, Result, Tensor, D};
use quantizers::{Alpha, Quantizer, Uniform};

/// Rounds to the nearest integer, ties to the even neighbour.
pub fn round_half_even(x: &Tensor) -> Result<Tensor> {
    let nearest = x.round()?;
    // Halving moves a tie a quarter away from an integer, so rounding picks the even side
    let even = x.affine(0.5, 0.0)?.round()?.affine(2.0, 0.0)?;
    let tie = x.sub(&x.floor()?)?.eq(0.5)?;
    tie.where_cond(&even, &nearest)
}

/// `+1` where `x >= 0`, `-1` elsewhere.
pub fn bipolar(x: &Tensor) -> Result<Tensor> {
    x.ge(0.0)?.to_dtype(DType::F64)?.affine(2.0, -1.0)
}

/// `sign(x)` where `|x| > cut`, `0` elsewhere.
pub fn ternary(x: &Tensor, cut: f64) -> Result<Tensor> {
    let up = x.gt(cut)?.to_dtype(DType::F64)?;
    let down = x.lt(-cut)?.to_dtype(DType::F64)?;
    up.sub(&down)
}

/// `quantized_bits` / `quantized_relu` with unit scale.
pub fn uniform(q: &Uniform, x: &Tensor) -> Result<Tensor> {
    if q.is_binary() {
        return bipolar(x);
    }

    let magnitude_bits = q.bits as i32 - q.keep_negative as i32;
    let m = ((magnitude_bits - q.integer) as f64).exp2();
    let levels = (magnitude_bits as f64).exp2();
    let lowest = if q.keep_negative {
        -levels + if q.symmetric { 1.0 } else { 0.0 }
    } else {
        0.0
    };

    round_half_even(&x.affine(m, 0.0)?)?
        .clamp(lowest, levels - 1.0)?
        .affine(1.0 / m, 0.0)
}

/// A quantizer applied as an activation function. Alpha is expected to be 1.
pub fn activation(q: &Quantizer, x: &Tensor) -> Result<Tensor> {
    match q {
        Quantizer::Uniform(u) => uniform(u, x),
        Quantizer::Ternary(t) => ternary(x, t.threshold()),
        Quantizer::Binary(_) => bipolar(x),
    }
}

/// Effective values of a `(channels, n)` parameter tensor, scale included.
pub fn parameters(q: &Quantizer, w: &Tensor) -> Result<Tensor> {
    match q.alpha() {
        Alpha::Fixed(a) => match q {
            Quantizer::Uniform(u) => uniform(u, &w.affine(1.0 / a, 0.0)?)?.affine(a, 0.0),
            Quantizer::Ternary(t) => ternary(w, t.threshold() * a)?.affine(a, 0.0),
            Quantizer::Binary(_) => bipolar(w)?.affine(a, 0.0),
        },
        Alpha::Auto => match q {
            Quantizer::Uniform(u) => {
                let peak = w.abs()?.max_keepdim(D::Minus1)?;
                let scale = positive_or_one(&peak.affine(1.0 / (u.integer as f64).exp2(), 0.0)?)?;
                uniform(u, &w.broadcast_div(&scale)?)?.broadcast_mul(&scale)
            }
            Quantizer::Ternary(t) => {
                let magnitude = w.abs()?;
                let cut = magnitude.max_keepdim(D::Minus1)?.affine(t.threshold(), 0.0)?;
                let up = w.broadcast_gt(&cut)?.to_dtype(DType::F64)?;
                let down = w.broadcast_lt(&cut.neg()?)?.to_dtype(DType::F64)?;
                let codes = up.sub(&down)?;

                let kept = codes.abs()?;
                let count = kept.sum_keepdim(D::Minus1)?;
                let total = magnitude.mul(&kept)?.sum_keepdim(D::Minus1)?;
                let mean = total.div(&count.clamp(1.0, f64::MAX)?)?;
                let scale = count.gt(0.0)?.where_cond(&mean, &count.ones_like()?)?;
                codes.broadcast_mul(&scale)
            }
            Quantizer::Binary(_) => {
                let scale = positive_or_one(&w.abs()?.mean_keepdim(D::Minus1)?)?;
                bipolar(w)?.broadcast_mul(&scale)
            }
        },
    }
}

fn positive_or_one(t: &Tensor) -> Result<Tensor> {
    t.gt(0.0)?.where_cond(t, &t.ones_like()?)
}
