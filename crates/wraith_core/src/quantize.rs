//! # Quantization
//!
//! Maps floating point values onto 32-bit units.
//!
//! ```text
//! factor > 0:   unit = round(raw * factor) as i32
//! factor = 0:   unit = raw.to_bits()          (full precision)
//! ```
//!
//! Rotations use the smallest-three encoding: the largest component is
//! dropped (its index is sent instead) and reconstructed from the unit norm.

/// Quantizes a float with the given factor.
///
/// With `factor > 0` the representable range is
/// `i32::MIN / factor ..= i32::MAX / factor`; values outside it (and NaN)
/// saturate with a warning and no longer round-trip within `1 / factor`.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantize_float(raw: f32, factor: u32) -> u32 {
    if factor == 0 {
        return raw.to_bits();
    }
    let scaled = (f64::from(raw) * f64::from(factor)).round();
    if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&scaled) {
        tracing::warn!("Value {} saturates at quantization factor {}", raw, factor);
    }
    scaled as i32 as u32
}

/// Reverses [`quantize_float`].
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn dequantize_float(unit: u32, factor: u32) -> f32 {
    if factor == 0 {
        return f32::from_bits(unit);
    }
    (f64::from(unit as i32) / f64::from(factor)) as f32
}

/// Quantizes each axis of a vector.
#[inline]
#[must_use]
pub fn quantize_vec3(raw: [f32; 3], factor: u32) -> [u32; 3] {
    raw.map(|axis| quantize_float(axis, factor))
}

/// Reverses [`quantize_vec3`].
#[inline]
#[must_use]
pub fn dequantize_vec3(units: [u32; 3], factor: u32) -> [f32; 3] {
    units.map(|unit| dequantize_float(unit, factor))
}

/// Quantizes a rotation `[x, y, z, w]`.
///
/// With a factor the result is `[largest index, a, b, c]` where `a, b, c`
/// are the remaining components in order, sign-flipped so the dropped one is
/// positive. Factor 0 stores the four raw components.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize_quat(raw: [f32; 4], factor: u32) -> [u32; 4] {
    if factor == 0 {
        return raw.map(f32::to_bits);
    }

    let q = normalize(raw);
    let mut largest = 0usize;
    for i in 1..4 {
        if q[i].abs() > q[largest].abs() {
            largest = i;
        }
    }
    let sign = if q[largest] < 0.0 { -1.0 } else { 1.0 };

    let mut units = [largest as u32, 0, 0, 0];
    let mut slot = 1;
    for (i, component) in q.iter().enumerate() {
        if i != largest {
            units[slot] = quantize_float(component * sign, factor);
            slot += 1;
        }
    }
    units
}

/// Reverses [`quantize_quat`].
#[must_use]
pub fn dequantize_quat(units: [u32; 4], factor: u32) -> [f32; 4] {
    if factor == 0 {
        return units.map(f32::from_bits);
    }

    let largest = (units[0] & 0b11) as usize;
    let mut q = [0.0f32; 4];
    let mut sum = 0.0f32;
    let mut slot = 1;
    for (i, component) in q.iter_mut().enumerate() {
        if i != largest {
            *component = dequantize_float(units[slot], factor);
            sum += *component * *component;
            slot += 1;
        }
    }
    q[largest] = (1.0 - sum).max(0.0).sqrt();
    q
}

/// Normalizes a quaternion; a zero quaternion becomes the identity.
#[must_use]
pub fn normalize(q: [f32; 4]) -> [f32; 4] {
    let len = q.iter().map(|c| c * c).sum::<f32>().sqrt();
    if len <= f32::EPSILON {
        return [0.0, 0.0, 0.0, 1.0];
    }
    q.map(|c| c / len)
}
