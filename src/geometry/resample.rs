use glam::Quat;

use crate::document::{Accessor, AccessorData, Document, ElementType, Interpolation, Property};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Curve {
    Step,
    Linear,
    Rotation,
}

fn close(a: &[f32], b: &[f32], tolerance: f32) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance)
}

fn interpolate(curve: Curve, a: &[f32], b: &[f32], t: f32) -> Vec<f32> {
    match curve {
        Curve::Rotation => {
            let qa = Quat::from_slice(a).normalize();
            let qb = Quat::from_slice(b).normalize();
            qa.slerp(qb, t).to_array().to_vec()
        }
        _ => a.iter().zip(b).map(|(x, y)| x + (y - x) * t).collect(),
    }
}

fn matches_key(curve: Curve, predicted: &[f32], key: &[f32], tolerance: f32) -> bool {
    if close(predicted, key, tolerance) {
        return true;
    }
    // q and -q encode the same rotation.
    curve == Curve::Rotation
        && predicted
            .iter()
            .zip(key)
            .all(|(x, y)| (x + y).abs() <= tolerance)
}

/// Keyframes that must stay so the curve deviates by at most `tolerance`.
/// The first and last keys always stay.
fn keyframes_to_keep(
    curve: Curve,
    times: &[f32],
    values: &[f32],
    stride: usize,
    tolerance: f32,
) -> Vec<u32> {
    let n = times.len();
    let key = |i: usize| &values[i * stride..(i + 1) * stride];
    let mut keep = vec![0u32];
    let mut last = 0;
    for i in 1..n.saturating_sub(1) {
        let redundant = match curve {
            Curve::Step => close(key(i), key(last), tolerance),
            Curve::Linear | Curve::Rotation => {
                let span = times[i + 1] - times[last];
                span > 0.0
                    && (last + 1..=i).all(|j| {
                        let t = (times[j] - times[last]) / span;
                        let predicted = interpolate(curve, key(last), key(i + 1), t);
                        matches_key(curve, &predicted, key(j), tolerance)
                    })
            }
        };
        if !redundant {
            keep.push(i as u32);
            last = i;
        }
    }
    if n > 1 {
        keep.push((n - 1) as u32);
    }
    keep
}

/// Drops redundant keyframes from LINEAR and STEP samplers with float data.
/// Resampled curves get fresh accessors since inputs are commonly shared.
/// Returns how many keyframes were removed.
pub fn resample_animations(doc: &mut Document, tolerance: f32) -> usize {
    let Document {
        animations,
        accessors,
        ..
    } = doc;
    let mut removed = 0;

    for (_, animation) in animations.iter_mut() {
        for (index, sampler) in animation.samplers.iter_mut().enumerate() {
            let is_rotation = animation
                .channels
                .iter()
                .any(|c| c.sampler == index && matches!(c.path, Property::Rotation));
            let curve = match sampler.interpolation {
                Interpolation::Step => Curve::Step,
                Interpolation::Linear if is_rotation => Curve::Rotation,
                Interpolation::Linear => Curve::Linear,
                Interpolation::CubicSpline => continue,
            };

            let resampled = {
                let (Some(input), Some(output)) =
                    (accessors.get(sampler.input), accessors.get(sampler.output))
                else {
                    continue;
                };
                let (AccessorData::F32(times), AccessorData::F32(values)) =
                    (&input.data, &output.data)
                else {
                    continue;
                };
                if input.element_type != ElementType::Scalar
                    || times.len() < 3
                    || values.len() % times.len() != 0
                {
                    continue;
                }
                let stride = values.len() / times.len();
                if curve == Curve::Rotation && stride != 4 {
                    continue;
                }

                let keep = keyframes_to_keep(curve, times, values, stride, tolerance);
                if keep.len() == times.len() {
                    continue;
                }
                removed += times.len() - keep.len();

                let mut new_output = Accessor::new(output.element_type, output.data.gather(stride, &keep));
                new_output.name = output.name.clone();
                (input.gather(&keep), new_output)
            };

            sampler.input = accessors.insert(resampled.0);
            sampler.output = accessors.insert(resampled.1);
        }
    }
    removed
}
