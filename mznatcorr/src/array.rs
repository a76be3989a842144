//! A dense, owned N-dimensional array of intensities.
//!
//! Axis 0 has stride 1, so walking the backing storage front to back visits
//! coordinates in the same order as [`CoordinateIter::full_range`].
use std::ops::{Index, IndexMut};

use thiserror::Error;

use crate::coordinates::CoordinateIter;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot fit {size} values into an array of shape {shape:?}")]
pub struct ShapeError {
    pub shape: Vec<usize>,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NDArray {
    shape: Vec<usize>,
    #[cfg_attr(feature = "serde", serde(skip))]
    strides: Vec<usize>,
    data: Vec<f64>,
}

fn strides_for(shape: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut acc = 1;
    for extent in shape {
        strides.push(acc);
        acc *= extent;
    }
    strides
}

impl NDArray {
    pub fn zeros(shape: &[usize]) -> Self {
        let size = if shape.is_empty() {
            0
        } else {
            shape.iter().product()
        };
        Self {
            shape: shape.to_vec(),
            strides: strides_for(shape),
            data: vec![0.0; size],
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Result<Self, ShapeError> {
        let expected = if shape.is_empty() {
            0
        } else {
            shape.iter().product()
        };
        if data.len() != expected {
            return Err(ShapeError {
                shape: shape.to_vec(),
                size: data.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            strides: strides_for(shape),
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// The linear offset of `coordinate`, if it lies inside the array
    pub fn index_of(&self, coordinate: &[usize]) -> Option<usize> {
        if coordinate.len() != self.shape.len() || self.data.is_empty() {
            return None;
        }
        let mut offset = 0;
        for ((c, extent), stride) in coordinate.iter().zip(&self.shape).zip(&self.strides) {
            if c >= extent {
                return None;
            }
            offset += c * stride;
        }
        Some(offset)
    }

    pub fn get(&self, coordinate: &[usize]) -> Option<f64> {
        self.index_of(coordinate).map(|i| self.data[i])
    }

    pub fn get_mut(&mut self, coordinate: &[usize]) -> Option<&mut f64> {
        self.index_of(coordinate).map(|i| &mut self.data[i])
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// `Σ|self - other|` over the shared extent of both arrays
    pub fn abs_diff_sum(&self, other: &NDArray) -> f64 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b).abs())
            .sum()
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.map(|v| v * factor)
    }

    /// Scale this array so that it sums to `target`. An array summing to zero is
    /// returned unchanged.
    pub fn rescaled(&self, target: f64) -> Self {
        let total = self.sum();
        if total == 0.0 {
            self.clone()
        } else {
            self.scale(target / total)
        }
    }

    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        Self {
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.data.iter()
    }

    /// Iterate over `(coordinate, value)` pairs in full-range order
    pub fn indexed_iter(&self) -> impl Iterator<Item = (Vec<usize>, f64)> + '_ {
        CoordinateIter::full_range(&self.shape).zip(self.data.iter().copied())
    }
}

impl Index<&[usize]> for NDArray {
    type Output = f64;

    fn index(&self, coordinate: &[usize]) -> &Self::Output {
        match self.index_of(coordinate) {
            Some(i) => &self.data[i],
            None => panic!(
                "Coordinate {coordinate:?} is out of bounds for shape {:?}",
                self.shape
            ),
        }
    }
}

impl IndexMut<&[usize]> for NDArray {
    fn index_mut(&mut self, coordinate: &[usize]) -> &mut Self::Output {
        match self.index_of(coordinate) {
            Some(i) => &mut self.data[i],
            None => panic!(
                "Coordinate {coordinate:?} is out of bounds for shape {:?}",
                self.shape
            ),
        }
    }
}

impl Index<&Vec<usize>> for NDArray {
    type Output = f64;

    fn index(&self, coordinate: &Vec<usize>) -> &Self::Output {
        &self[coordinate.as_slice()]
    }
}

impl IndexMut<&Vec<usize>> for NDArray {
    fn index_mut(&mut self, coordinate: &Vec<usize>) -> &mut Self::Output {
        &mut self[coordinate.as_slice()]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_layout() {
        let arr = NDArray::from_vec(&[2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(arr.ndim(), 2);
        assert_eq!(arr.get(&[1, 0]), Some(1.0));
        assert_eq!(arr.get(&[0, 1]), Some(2.0));
        assert_eq!(arr[&[1usize, 2][..]], 5.0);
        assert_eq!(arr.get(&[2, 0]), None);
        assert_eq!(arr.get(&[0]), None);

        let pairs: Vec<_> = arr.indexed_iter().collect();
        for (i, (coord, value)) in pairs.iter().enumerate() {
            assert_eq!(arr.index_of(coord), Some(i));
            assert_eq!(*value, i as f64);
        }
    }

    #[test]
    fn test_shape_error() {
        let err = NDArray::from_vec(&[2, 2], vec![1.0; 3]).unwrap_err();
        assert_eq!(err.size, 3);
        assert!(NDArray::zeros(&[]).is_empty());
    }

    #[test]
    fn test_rescale() {
        let arr = NDArray::from_vec(&[4], vec![1.0, 1.0, 2.0, 0.0]).unwrap();
        let scaled = arr.rescaled(8.0);
        assert_eq!(scaled.as_slice(), &[2.0, 2.0, 4.0, 0.0]);
        let zero = NDArray::zeros(&[3]);
        assert_eq!(zero.rescaled(10.0), zero);
        assert_eq!(arr.abs_diff_sum(&scaled), 4.0);
    }
}
