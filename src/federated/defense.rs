//! Magnitude clipping of client updates.
//!
//! Each tensor of a returned parameter set is rescaled so that its L2 norm
//! does not exceed `max_norm`. This bounds how far a single client can pull
//! the aggregate; it also damps large honest updates.

use crate::core::{Error, Result};
use crate::federated::params::{tensor_l2_norm_f64, ParameterSet};

/// Guard added to the norm before dividing.
pub const CLIP_EPSILON: f32 = 1e-8;

/// Clip every tensor of `params` to L2 norm `max_norm`.
///
/// Tensors already within the bound are returned unchanged. The norm and
/// the rescale factor are computed in `f64` so arbitrarily scaled finite
/// updates keep their direction. Non-finite tensors are not repaired here;
/// the coordinator rejects them before clipping.
pub fn clip(params: &ParameterSet, max_norm: f32) -> ParameterSet {
    let max_norm = f64::from(max_norm);
    params.map_tensors(|t| {
        let norm = tensor_l2_norm_f64(t);
        if norm > max_norm {
            let factor = max_norm / (norm + f64::from(CLIP_EPSILON));
            t.mapv(|x| (f64::from(x) * factor) as f32)
        } else {
            t.clone()
        }
    })
}

/// Per-client clipping policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipDefense {
    max_norm: f32,
}

impl ClipDefense {
    /// Create a defense with the given bound.
    pub fn new(max_norm: f32) -> Result<Self> {
        if !(max_norm > 0.0) || !max_norm.is_finite() {
            return Err(Error::Configuration(format!(
                "clip norm must be positive and finite, got {}",
                max_norm
            )));
        }
        Ok(Self { max_norm })
    }

    /// Configured bound.
    pub fn max_norm(&self) -> f32 {
        self.max_norm
    }

    /// Apply the defense to a client's returned parameters.
    pub fn apply(&self, params: &ParameterSet) -> ParameterSet {
        clip(params, self.max_norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_clip_large_tensor() {
        // norm = 5.0
        let p = ParameterSet::new(vec![array![3.0f32, 4.0].into_dyn()]);
        let clipped = clip(&p, 1.0);

        let norm = clipped.tensor_norms()[0];
        assert!((norm - 1.0).abs() < 1e-6);

        // Direction preserved: clipped = original * (1 / (5 + eps))
        let factor = 1.0 / (5.0 + CLIP_EPSILON);
        assert!((clipped.tensors()[0][[0]] - 3.0 * factor).abs() < 1e-6);
        assert!((clipped.tensors()[0][[1]] - 4.0 * factor).abs() < 1e-6);
    }

    #[test]
    fn test_clip_arbitrarily_scaled_update() {
        // f32 sum of squares would overflow to inf here
        let p = ParameterSet::new(vec![array![3e20f32, 4e20].into_dyn()]);
        let clipped = clip(&p, 1.0);

        let t = &clipped.tensors()[0];
        assert!((clipped.tensor_norms()[0] - 1.0).abs() < 1e-4);
        assert!((t[[0]] - 0.6).abs() < 1e-5);
        assert!((t[[1]] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_clip_max_f32_elements() {
        let p = ParameterSet::new(vec![ndarray::ArrayD::from_elem(vec![16], f32::MAX)]);
        let clipped = clip(&p, 2.0);
        assert!(clipped.is_finite());
        assert!((clipped.tensor_norms()[0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_clip_small_tensor_unchanged() {
        let p = ParameterSet::new(vec![array![0.3f32, 0.4].into_dyn()]);
        assert_eq!(clip(&p, 1.0), p);
    }

    #[test]
    fn test_clip_is_per_tensor() {
        let p = ParameterSet::new(vec![
            array![[30.0f32, 40.0]].into_dyn(),
            array![0.1f32].into_dyn(),
        ]);
        let clipped = clip(&p, 2.0);
        let norms = clipped.tensor_norms();
        assert!((norms[0] - 2.0).abs() < 1e-5);
        assert!((norms[1] - 0.1).abs() < 1e-7);
    }

    #[test]
    fn test_clip_never_increases_norm() {
        let p = ParameterSet::new(vec![
            array![1.0f32, -2.0, 3.0].into_dyn(),
            array![[0.01f32, 0.02], [0.0, 0.0]].into_dyn(),
            array![100.0f32].into_dyn(),
        ]);
        for max_norm in [0.001f32, 0.5, 1.0, 10.0, 1000.0] {
            let clipped = clip(&p, max_norm);
            for (before, after) in p.tensor_norms().iter().zip(clipped.tensor_norms()) {
                assert!(after <= *before + 1e-6);
            }
        }
    }

    #[test]
    fn test_clip_idempotent() {
        let p = ParameterSet::new(vec![array![6.0f32, 8.0].into_dyn()]);
        let once = clip(&p, 1.0);
        let twice = clip(&once, 1.0);
        for (a, b) in once.tensors()[0].iter().zip(twice.tensors()[0].iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_clip_zero_tensor() {
        let p = ParameterSet::zeros(&[vec![4]]);
        assert_eq!(clip(&p, 1.0), p);
    }

    #[test]
    fn test_defense_rejects_bad_norm() {
        assert!(ClipDefense::new(0.0).is_err());
        assert!(ClipDefense::new(-1.0).is_err());
        assert!(ClipDefense::new(f32::NAN).is_err());
        assert_eq!(ClipDefense::new(1.5).unwrap().max_norm(), 1.5);
    }
}
