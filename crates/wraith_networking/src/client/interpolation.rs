//! # Interpolation
//!
//! Blends the two history entries around a fractional render tick.
//!
//! - Floats and vectors: linear
//! - Quaternions: normalized lerp along the shorter arc
//! - Integers, booleans, references and enable bits: the older entry's value

use wraith_core::{
    FieldValue, GhostLayout, GhostSerializer, GhostState, SnapshotEntry, SnapshotHistory,
};

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn nlerp(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
    let sign = if dot < 0.0 { -1.0 } else { 1.0 };
    let q: [f32; 4] = std::array::from_fn(|i| lerp(a[i], b[i] * sign, t));
    let length = q.iter().map(|c| c * c).sum::<f32>().sqrt();
    if length <= f32::EPSILON {
        return a;
    }
    q.map(|c| c / length)
}

/// Blends two values of the same kind.
#[must_use]
pub fn blend(from: FieldValue, to: FieldValue, t: f32) -> FieldValue {
    match (from, to) {
        (FieldValue::Float(a), FieldValue::Float(b)) => FieldValue::Float(lerp(a, b, t)),
        (FieldValue::Vec3(a), FieldValue::Vec3(b)) => {
            FieldValue::Vec3([lerp(a[0], b[0], t), lerp(a[1], b[1], t), lerp(a[2], b[2], t)])
        }
        (FieldValue::Quat(a), FieldValue::Quat(b)) => FieldValue::Quat(nlerp(a, b, t)),
        (older, _) => older,
    }
}

fn decode(layout: &GhostLayout, serializer: &dyn GhostSerializer, entry: &SnapshotEntry) -> GhostState {
    serializer.dequantize(layout, &entry.units, &entry.enabled)
}

/// State at fractional `render_tick`.
///
/// Outside the recorded range the nearest entry is returned unblended;
/// `None` only for an empty history.
#[must_use]
pub fn interpolate(
    layout: &GhostLayout,
    serializer: &dyn GhostSerializer,
    history: &SnapshotHistory,
    render_tick: f64,
) -> Option<GhostState> {
    match history.bracket(render_tick) {
        (Some(before), Some(after)) => {
            let span = f64::from(after.tick - before.tick);
            #[allow(clippy::cast_possible_truncation)]
            let t = ((render_tick - f64::from(before.tick)) / span) as f32;
            let from = decode(layout, serializer, before);
            let to = decode(layout, serializer, after);
            let values = from
                .values()
                .iter()
                .zip(to.values())
                .map(|(a, b)| blend(*a, *b, t))
                .collect();
            Some(GhostState::from_parts(values, from.enabled().to_vec()))
        }
        (Some(only), None) | (None, Some(only)) => Some(decode(layout, serializer, only)),
        (None, None) => None,
    }
}
