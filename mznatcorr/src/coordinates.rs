//! Traversal of dense N-dimensional index spaces.
//!
//! All traversals use odometer order: axis 0 varies fastest and the last axis
//! slowest, which matches the linear layout of [`NDArray`](crate::array::NDArray).
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinateError {
    #[error("Invalid step {step:?} for a {dimensions}-dimensional traversal")]
    InvalidStep { step: Vec<isize>, dimensions: usize },
    #[error("Start has {start} dimensions but stop has {stop}")]
    DimensionMismatch { start: usize, stop: usize },
    #[error("Traversal from {start:?} to {stop:?} would produce a negative coordinate")]
    NegativeCoordinate { start: Vec<isize>, stop: Vec<isize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Traversal {
    /// Stop is exclusive in the direction of travel on every axis
    Exclusive,
    /// Every coordinate in the box `0..=stop` before `stop` itself
    StrictPrefix,
}

/// A lazy, finite walk over integer coordinate vectors.
///
/// An iterator is consumed once; build a new one to traverse the space again.
#[derive(Debug, Clone)]
pub struct CoordinateIter {
    current: Vec<isize>,
    start: Vec<isize>,
    stop: Vec<isize>,
    step: Vec<isize>,
    traversal: Traversal,
    done: bool,
}

impl CoordinateIter {
    fn new_unchecked(
        start: Vec<isize>,
        stop: Vec<isize>,
        step: Vec<isize>,
        traversal: Traversal,
    ) -> Self {
        let done = start.is_empty()
            || match traversal {
                Traversal::Exclusive => start
                    .iter()
                    .zip(stop.iter())
                    .zip(step.iter())
                    .any(|((a, b), s)| (a - b) * s.signum() >= 0),
                Traversal::StrictPrefix => start == stop,
            };
        Self {
            current: start.clone(),
            start,
            stop,
            step,
            traversal,
            done,
        }
    }

    /// Every coordinate of an array of `shape`, from the origin up to but excluding `shape`.
    pub fn full_range(shape: &[usize]) -> Self {
        let d = shape.len();
        Self::new_unchecked(
            vec![0; d],
            shape.iter().map(|s| *s as isize).collect(),
            vec![1; d],
            Traversal::Exclusive,
        )
    }

    /// Every coordinate from `start` up to but excluding `stop`.
    pub fn between(start: &[usize], stop: &[usize]) -> Result<Self, CoordinateError> {
        if start.len() != stop.len() {
            return Err(CoordinateError::DimensionMismatch {
                start: start.len(),
                stop: stop.len(),
            });
        }
        Ok(Self::new_unchecked(
            start.iter().map(|v| *v as isize).collect(),
            stop.iter().map(|v| *v as isize).collect(),
            vec![1; start.len()],
            Traversal::Exclusive,
        ))
    }

    /// Every coordinate `x` with `0 <= x <= y` componentwise that precedes `y`
    /// in odometer order. `y` itself is never yielded.
    pub fn strict_prefix(y: &[usize]) -> Self {
        let d = y.len();
        Self::new_unchecked(
            vec![0; d],
            y.iter().map(|v| *v as isize).collect(),
            vec![1; d],
            Traversal::StrictPrefix,
        )
    }

    /// A traversal with an arbitrary non-zero step per axis.
    ///
    /// All steps must share a sign, and `stop` is exclusive in the direction of travel.
    ///
    /// # Arguments
    /// - `start`: The first coordinate yielded, if the range is not empty
    /// - `stop`: The exclusive bound on each axis
    /// - `step`: The increment applied to each axis, one entry per dimension
    pub fn stepped(
        start: &[isize],
        stop: &[isize],
        step: &[isize],
    ) -> Result<Self, CoordinateError> {
        if start.len() != stop.len() {
            return Err(CoordinateError::DimensionMismatch {
                start: start.len(),
                stop: stop.len(),
            });
        }
        let invalid_step = step.len() != start.len()
            || step.iter().any(|s| *s == 0)
            || step
                .first()
                .is_some_and(|s0| step.iter().any(|s| s.signum() != s0.signum()));
        if invalid_step {
            return Err(CoordinateError::InvalidStep {
                step: step.to_vec(),
                dimensions: start.len(),
            });
        }
        if start.iter().any(|v| *v < 0) || stop.iter().any(|v| *v < -1) {
            return Err(CoordinateError::NegativeCoordinate {
                start: start.to_vec(),
                stop: stop.to_vec(),
            });
        }
        Ok(Self::new_unchecked(
            start.to_vec(),
            stop.to_vec(),
            step.to_vec(),
            Traversal::Exclusive,
        ))
    }

    /// Every coordinate of an array of `shape`, from `shape - 1` down to the origin.
    pub fn descending(shape: &[usize]) -> Self {
        let d = shape.len();
        Self::new_unchecked(
            shape.iter().map(|s| *s as isize - 1).collect(),
            vec![-1; d],
            vec![-1; d],
            Traversal::Exclusive,
        )
    }

    pub fn dimensions(&self) -> usize {
        self.start.len()
    }

    fn advance(&mut self) {
        match self.traversal {
            Traversal::Exclusive => {
                for axis in 0..self.current.len() {
                    self.current[axis] += self.step[axis];
                    if (self.current[axis] - self.stop[axis]) * self.step[axis].signum() >= 0 {
                        self.current[axis] = self.start[axis];
                    } else {
                        return;
                    }
                }
                // Every axis rolled over
                self.done = true;
            }
            Traversal::StrictPrefix => {
                for axis in 0..self.current.len() {
                    self.current[axis] += 1;
                    if self.current[axis] > self.stop[axis] {
                        self.current[axis] = 0;
                    } else {
                        break;
                    }
                }
                if self.current == self.stop {
                    self.done = true;
                }
            }
        }
    }

    pub fn next_coordinate(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        let value = self.current.iter().map(|v| *v as usize).collect();
        self.advance();
        Some(value)
    }
}

impl Iterator for CoordinateIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_coordinate()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_full_range_order() {
        let coords: Vec<_> = CoordinateIter::full_range(&[2, 3]).collect();
        assert_eq!(
            coords,
            vec![
                vec![0, 0],
                vec![1, 0],
                vec![0, 1],
                vec![1, 1],
                vec![0, 2],
                vec![1, 2],
            ]
        );
    }

    #[test]
    fn test_empty_ranges() {
        assert_eq!(CoordinateIter::full_range(&[]).count(), 0);
        assert_eq!(CoordinateIter::full_range(&[3, 0]).count(), 0);
        assert_eq!(CoordinateIter::descending(&[0]).count(), 0);
        assert_eq!(CoordinateIter::strict_prefix(&[0, 0]).count(), 0);
        assert_eq!(CoordinateIter::between(&[2], &[2]).unwrap().count(), 0);
    }

    #[test]
    fn test_between() {
        let coords: Vec<_> = CoordinateIter::between(&[1, 1], &[3, 2])
            .unwrap()
            .collect();
        assert_eq!(coords, vec![vec![1, 1], vec![2, 1]]);

        let err = CoordinateIter::between(&[1], &[3, 2]).unwrap_err();
        assert_eq!(err, CoordinateError::DimensionMismatch { start: 1, stop: 2 });
    }

    #[test]
    fn test_strict_prefix() {
        let coords: Vec<_> = CoordinateIter::strict_prefix(&[1, 1]).collect();
        assert_eq!(coords, vec![vec![0, 0], vec![1, 0], vec![0, 1]]);

        let coords: Vec<_> = CoordinateIter::strict_prefix(&[3]).collect();
        assert_eq!(coords, vec![vec![0], vec![1], vec![2]]);

        // The box is componentwise, so (2, 0) is not below (1, 1)
        let coords: Vec<_> = CoordinateIter::strict_prefix(&[0, 2]).collect();
        assert_eq!(coords, vec![vec![0, 0], vec![0, 1]]);
    }

    #[test]
    fn test_descending() {
        let coords: Vec<_> = CoordinateIter::descending(&[2, 2]).collect();
        assert_eq!(
            coords,
            vec![vec![1, 1], vec![0, 1], vec![1, 0], vec![0, 0]]
        );
        let coords: Vec<_> = CoordinateIter::descending(&[3]).collect();
        assert_eq!(coords, vec![vec![2], vec![1], vec![0]]);
    }

    #[test]
    fn test_stepped() {
        let coords: Vec<_> = CoordinateIter::stepped(&[0, 0], &[5, 2], &[2, 1])
            .unwrap()
            .collect();
        assert_eq!(
            coords,
            vec![
                vec![0, 0],
                vec![2, 0],
                vec![4, 0],
                vec![0, 1],
                vec![2, 1],
                vec![4, 1],
            ]
        );
        let it = CoordinateIter::stepped(&[4], &[-1], &[-2]).unwrap();
        assert_eq!(it.dimensions(), 1);
        assert_eq!(it.collect::<Vec<_>>(), vec![vec![4], vec![2], vec![0]]);
    }

    #[test]
    fn test_invalid_traversals() {
        assert!(matches!(
            CoordinateIter::stepped(&[0, 0], &[2, 2], &[1, 0]),
            Err(CoordinateError::InvalidStep { .. })
        ));
        assert!(matches!(
            CoordinateIter::stepped(&[0, 0], &[2, 2], &[1, -1]),
            Err(CoordinateError::InvalidStep { .. })
        ));
        assert!(matches!(
            CoordinateIter::stepped(&[0, 0], &[2, 2], &[1]),
            Err(CoordinateError::InvalidStep { .. })
        ));
        assert!(matches!(
            CoordinateIter::stepped(&[0], &[2, 2], &[1]),
            Err(CoordinateError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            CoordinateIter::stepped(&[-1], &[2], &[1]),
            Err(CoordinateError::NegativeCoordinate { .. })
        ));
        assert!(matches!(
            CoordinateIter::stepped(&[3], &[-2], &[-1]),
            Err(CoordinateError::NegativeCoordinate { .. })
        ));
    }
}
