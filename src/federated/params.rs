//! Model parameter sets exchanged between coordinator and clients.
//!
//! A [`ParameterSet`] is an ordered list of dense `f32` tensors. Every set
//! exchanged in one run has the same tensor count and shapes.

use crate::core::{Error, Result};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

/// Ordered collection of tensors holding a model's trainable state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    tensors: Vec<ArrayD<f32>>,
}

impl ParameterSet {
    /// Create from tensors.
    pub fn new(tensors: Vec<ArrayD<f32>>) -> Self {
        Self { tensors }
    }

    /// Create from `(shape, values)` pairs in row-major order.
    pub fn from_shaped(parts: Vec<(Vec<usize>, Vec<f32>)>) -> Result<Self> {
        let tensors = parts
            .into_iter()
            .map(|(shape, values)| ArrayD::from_shape_vec(IxDyn(&shape), values))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { tensors })
    }

    /// A set of zero tensors with the given shapes.
    pub fn zeros(shapes: &[Vec<usize>]) -> Self {
        Self {
            tensors: shapes
                .iter()
                .map(|s| ArrayD::zeros(IxDyn(s)))
                .collect(),
        }
    }

    /// A set of zero tensors shaped like `self`.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(&self.shapes())
    }

    /// Tensor shapes in order.
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.tensors.iter().map(|t| t.shape().to_vec()).collect()
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the set holds no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn num_elements(&self) -> usize {
        self.tensors.iter().map(|t| t.len()).sum()
    }

    /// Borrow the tensors.
    pub fn tensors(&self) -> &[ArrayD<f32>] {
        &self.tensors
    }

    /// Consume into tensors.
    pub fn into_tensors(self) -> Vec<ArrayD<f32>> {
        self.tensors
    }

    /// Check that `other` has the same tensor count and shapes.
    pub fn check_compatible(&self, other: &ParameterSet) -> Result<()> {
        let same = self.tensors.len() == other.tensors.len()
            && self
                .tensors
                .iter()
                .zip(other.tensors.iter())
                .all(|(a, b)| a.shape() == b.shape());
        if same {
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                expected: self.shapes(),
                actual: other.shapes(),
            })
        }
    }

    /// Elementwise multiply every tensor by `factor`, producing a new set.
    pub fn scale(&self, factor: f32) -> Self {
        Self {
            tensors: self.tensors.iter().map(|t| t * factor).collect(),
        }
    }

    /// Elementwise sum with a compatible set, producing a new set.
    pub fn add(&self, other: &ParameterSet) -> Result<Self> {
        self.check_compatible(other)?;
        Ok(Self {
            tensors: self
                .tensors
                .iter()
                .zip(other.tensors.iter())
                .map(|(a, b)| a + b)
                .collect(),
        })
    }

    /// Accumulate `factor * other` into `self`.
    pub fn add_scaled_assign(&mut self, other: &ParameterSet, factor: f32) -> Result<()> {
        self.check_compatible(other)?;
        for (acc, t) in self.tensors.iter_mut().zip(other.tensors.iter()) {
            acc.scaled_add(factor, t);
        }
        Ok(())
    }

    /// Whether every element is finite (no NaN or infinity).
    pub fn is_finite(&self) -> bool {
        self.tensors.iter().all(|t| t.iter().all(|x| x.is_finite()))
    }

    /// L2 norm of each tensor.
    pub fn tensor_norms(&self) -> Vec<f32> {
        self.tensors.iter().map(tensor_l2_norm).collect()
    }

    /// Map each tensor through `f`, producing a new set.
    pub fn map_tensors<F>(&self, f: F) -> Self
    where
        F: FnMut(&ArrayD<f32>) -> ArrayD<f32>,
    {
        Self {
            tensors: self.tensors.iter().map(f).collect(),
        }
    }
}

/// Euclidean norm over all elements of a tensor.
pub fn tensor_l2_norm(t: &ArrayD<f32>) -> f32 {
    tensor_l2_norm_f64(t) as f32
}

/// Euclidean norm accumulated in `f64`.
///
/// Finite for any finite `f32` tensor; the `f32` sum of squares overflows
/// once an element passes roughly 1.8e19.
pub fn tensor_l2_norm_f64(t: &ArrayD<f32>) -> f64 {
    t.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> ParameterSet {
        ParameterSet::new(vec![
            array![[1.0f32, 2.0], [3.0, 4.0]].into_dyn(),
            array![0.5f32, -0.5].into_dyn(),
        ])
    }

    #[test]
    fn test_shapes_and_counts() {
        let p = sample();
        assert_eq!(p.len(), 2);
        assert_eq!(p.shapes(), vec![vec![2, 2], vec![2]]);
        assert_eq!(p.num_elements(), 6);
    }

    #[test]
    fn test_from_shaped() {
        let p = ParameterSet::from_shaped(vec![(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0])]).unwrap();
        assert_eq!(p.tensors()[0][[1, 0]], 3.0);

        let bad = ParameterSet::from_shaped(vec![(vec![2, 2], vec![1.0])]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_scale() {
        let p = sample().scale(2.0);
        assert_eq!(p.tensors()[0][[1, 1]], 8.0);
        assert_eq!(p.tensors()[1][[1]], -1.0);
    }

    #[test]
    fn test_add() {
        let p = sample();
        let sum = p.add(&p).unwrap();
        assert_eq!(sum, p.scale(2.0));
    }

    #[test]
    fn test_add_shape_mismatch() {
        let p = sample();
        let q = ParameterSet::zeros(&[vec![3], vec![2]]);
        let err = p.add(&q).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_add_tensor_count_mismatch() {
        let p = sample();
        let q = ParameterSet::zeros(&[vec![2, 2]]);
        assert!(p.check_compatible(&q).is_err());
    }

    #[test]
    fn test_add_scaled_assign() {
        let mut acc = sample().zeros_like();
        acc.add_scaled_assign(&sample(), 0.5).unwrap();
        assert_eq!(acc, sample().scale(0.5));
    }

    #[test]
    fn test_tensor_norms() {
        let p = ParameterSet::new(vec![array![3.0f32, 4.0].into_dyn()]);
        assert!((p.tensor_norms()[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_norm_of_huge_elements_is_finite() {
        let t = array![3e20f32, 4e20].into_dyn();
        let norm = tensor_l2_norm_f64(&t);
        assert!(norm.is_finite());
        assert!((norm / 5e20 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_is_finite() {
        assert!(sample().is_finite());
        let nan = ParameterSet::new(vec![array![f32::NAN, 1.0].into_dyn()]);
        let inf = ParameterSet::new(vec![array![f32::INFINITY].into_dyn()]);
        assert!(!nan.is_finite());
        assert!(!inf.is_finite());
    }

    #[test]
    fn test_serde_preserves_shape() {
        let p = sample();
        let json = serde_json::to_string(&p).unwrap();
        let restored: ParameterSet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.shapes(), p.shapes());
        assert_eq!(restored, p);
    }
}
