/*! The iterative natural abundance correction solver.

[`NACorrector::remove_na`] alternates between stripping natural abundance from
the observed intensities ([`NACorrector::subtract_na`]) and predicting what the
stripped intensities would look like once natural abundance is restored
([`NACorrector::add_na`]). Observed values are kept wherever they are positive,
and the prediction fills in the gaps for the next round, until the distance
between the prediction and the observation stops shrinking.
*/
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::array::NDArray;
use crate::coordinates::CoordinateIter;
use crate::isotopes::IsotopeLabel;
use crate::lookup::{CoefficientTable, LookupError, NALookup};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorrectionError {
    #[error("Expected data of shape {expected:?}, but received {received:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        received: Vec<usize>,
    },
    #[error("Cannot correct a peak set with an empty shape")]
    EmptyShape,
    #[error("The correction has not been run yet")]
    NotInitialized,
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// The arrays produced by a single correction
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CorrectionResult {
    pub original: NDArray,
    pub corrected: NDArray,
    pub predicted: NDArray,
    pub renormalized: NDArray,
    pub iterations: usize,
    pub elapsed: Duration,
    pub total_na_removed: f64,
}

/// The values reported for one coordinate of a corrected peak set
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PeakResult {
    pub coordinate: Vec<usize>,
    pub predicted: f64,
    pub corrected: f64,
    pub renormalized: f64,
    /// Whether this coordinate was predicted without having been observed
    pub unobserved: bool,
    /// The corrected value as a percentage of the total corrected intensity
    pub percentage: f64,
}

/// The reportable subset of a [`CorrectionResult`]
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CorrectionSummary {
    pub total_na_removed: f64,
    /// Wall-clock seconds spent in [`NACorrector::run`], not process CPU time
    pub cpu_time: f64,
    pub iterations: usize,
    pub accepted_predictions: usize,
    pub threshold: f64,
    pub peaks: Vec<PeakResult>,
}

impl CorrectionSummary {
    pub fn get(&self, coordinate: &[usize]) -> Option<&PeakResult> {
        self.peaks.iter().find(|p| p.coordinate == coordinate)
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}

/// Copy `a`, replacing every value that is not positive with the value at the same position in `b`
pub fn replace_negatives(a: &NDArray, b: &NDArray) -> NDArray {
    let mut out = a.clone();
    for (v, r) in out.as_mut_slice().iter_mut().zip(b.iter()) {
        if *v <= 0.0 {
            *v = *r;
        }
    }
    out
}

/// Removes natural abundance from the intensities of a single peak set.
#[derive(Debug, Clone)]
pub struct NACorrector<T: CoefficientTable = NALookup> {
    label_order: Vec<IsotopeLabel>,
    shape: Vec<usize>,
    table: T,
    max_iterations: Option<usize>,
    result: Option<CorrectionResult>,
}

impl<T: CoefficientTable> NACorrector<T> {
    /// Create a new solver.
    ///
    /// # Arguments
    /// - `label_order`: The isotope for each axis of the coordinate space
    /// - `shape`: The extent of each axis, which must agree with `table`
    /// - `table`: The transition coefficients for the coordinate space
    pub fn new(
        label_order: Vec<IsotopeLabel>,
        shape: Vec<usize>,
        table: T,
    ) -> Result<Self, CorrectionError> {
        if shape.is_empty() || shape.iter().any(|s| *s == 0) {
            return Err(CorrectionError::EmptyShape);
        }
        if table.shape() != shape.as_slice() || label_order.len() != shape.len() {
            return Err(CorrectionError::ShapeMismatch {
                expected: table.shape().to_vec(),
                received: shape,
            });
        }
        Ok(Self {
            label_order,
            shape,
            table,
            max_iterations: None,
            result: None,
        })
    }

    /// Stop refining after `max_iterations` rounds even if the prediction is still improving
    pub fn with_max_iterations(mut self, max_iterations: Option<usize>) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn label_order(&self) -> &[IsotopeLabel] {
        &self.label_order
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn result(&self) -> Option<&CorrectionResult> {
        self.result.as_ref()
    }

    fn check_shape(&self, data: &NDArray) -> Result<(), CorrectionError> {
        if data.shape() != self.shape.as_slice() {
            Err(CorrectionError::ShapeMismatch {
                expected: self.shape.clone(),
                received: data.shape().to_vec(),
            })
        } else {
            Ok(())
        }
    }

    /// Strip the contribution of natural abundance from `data`, clamping negative values to zero.
    pub fn subtract_na(&self, data: &NDArray) -> Result<NDArray, CorrectionError> {
        self.check_shape(data)?;
        let mut corrected = NDArray::zeros(&self.shape);
        for y in CoordinateIter::full_range(&self.shape) {
            let mut value = data[&y];
            for x in CoordinateIter::strict_prefix(&y) {
                let below = corrected[&x];
                if below != 0.0 {
                    value -= below * self.table.product(&x, &y)?;
                }
            }
            value /= self.table.sum_product(&y)?;
            corrected[&y] = value.max(0.0);
        }
        Ok(corrected)
    }

    /// Spread `data` back out over the coordinate space as natural abundance would.
    pub fn add_na(&self, data: &NDArray) -> Result<NDArray, CorrectionError> {
        self.check_shape(data)?;
        let mut result = NDArray::zeros(&self.shape);
        for y in CoordinateIter::descending(&self.shape) {
            let mut value = data[&y] * self.table.sum_product(&y)?;
            for x in CoordinateIter::strict_prefix(&y) {
                let below = data[&x];
                if below != 0.0 {
                    value += below * self.table.product(&x, &y)?;
                }
            }
            result[&y] = value;
        }
        Ok(result)
    }

    /// Iterate [`subtract_na`](Self::subtract_na) and [`add_na`](Self::add_na) until
    /// the prediction stops converging on `data`.
    ///
    /// Returns the corrected intensities, the predicted intensities, and the
    /// number of refinement rounds.
    pub fn remove_na(&self, data: &NDArray) -> Result<(NDArray, NDArray, usize), CorrectionError> {
        let mut target = data.sum();
        let mut subtracted = self.subtract_na(data)?;
        let mut added = self.add_na(&subtracted.rescaled(target))?;
        target = replace_negatives(data, &added).sum();
        let mut diff = data.abs_diff_sum(&added);
        let mut last = 2.0 * diff;
        let mut iterations = 0;

        while diff < last {
            if let Some(cap) = self.max_iterations {
                if iterations >= cap {
                    warn!("Stopped after {iterations} iterations with the prediction still converging ({diff:0.3e})");
                    break;
                }
            }
            last = diff;
            let next = replace_negatives(data, &added);
            subtracted = self.subtract_na(&next.rescaled(target))?;
            added = self.add_na(&subtracted.rescaled(target))?;
            target = replace_negatives(data, &added).sum();
            diff = data.abs_diff_sum(&added);
            iterations += 1;
            trace!("Iteration {iterations}: difference {diff:0.6e}");
        }
        Ok((subtracted, added, iterations))
    }

    /// Correct `data`, keeping the result for [`filter_format_results`](Self::filter_format_results).
    pub fn run(&mut self, data: &NDArray) -> Result<&CorrectionResult, CorrectionError> {
        self.check_shape(data)?;
        let start = Instant::now();
        let (corrected, predicted, iterations) = self.remove_na(data)?;
        let elapsed = start.elapsed();

        let denominator = replace_negatives(data, &predicted).sum();
        let factor = if denominator == 0.0 {
            1.0
        } else {
            data.sum() / denominator
        };
        let renormalized = corrected.scale(factor);
        let total_na_removed = corrected.sum();
        debug!(
            "Corrected {:?} in {iterations} iterations ({:0.3?})",
            self.label_order, elapsed
        );

        Ok(self.result.insert(CorrectionResult {
            original: data.clone(),
            corrected,
            predicted,
            renormalized,
            iterations,
            elapsed,
            total_na_removed,
        }))
    }

    /// Summarize the last correction, keeping every observed coordinate and every
    /// predicted coordinate whose intensity exceeds `threshold`.
    pub fn filter_format_results(
        &self,
        threshold: f64,
    ) -> Result<CorrectionSummary, CorrectionError> {
        let result = self
            .result
            .as_ref()
            .ok_or(CorrectionError::NotInitialized)?;
        let total = result.total_na_removed;
        let mut accepted_predictions = 0;
        let mut peaks = Vec::new();
        for (i, coordinate) in CoordinateIter::full_range(&self.shape).enumerate() {
            let observed = result.original.as_slice()[i] != 0.0;
            let predicted = result.predicted.as_slice()[i];
            if !observed {
                if predicted > threshold {
                    accepted_predictions += 1;
                } else {
                    continue;
                }
            }
            let corrected = result.corrected.as_slice()[i];
            peaks.push(PeakResult {
                coordinate,
                predicted,
                corrected,
                renormalized: result.renormalized.as_slice()[i],
                unobserved: !observed,
                percentage: if total != 0.0 {
                    100.0 * corrected / total
                } else {
                    0.0
                },
            });
        }
        Ok(CorrectionSummary {
            total_na_removed: total,
            cpu_time: result.elapsed.as_secs_f64(),
            iterations: result.iterations,
            accepted_predictions,
            threshold,
            peaks,
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::lookup::{NACache, NATables};

    fn corrector_1d(maximum: u32) -> NACorrector<NATables> {
        let table = NATables::new(IsotopeLabel::C13, maximum).unwrap();
        NACorrector::new(
            vec![IsotopeLabel::C13],
            vec![maximum as usize + 1],
            table,
        )
        .unwrap()
    }

    #[test]
    fn test_construction_errors() {
        let table = NATables::new(IsotopeLabel::C13, 2).unwrap();
        assert!(matches!(
            NACorrector::new(vec![IsotopeLabel::C13], vec![4], table.clone()),
            Err(CorrectionError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            NACorrector::new(vec![], vec![], table),
            Err(CorrectionError::EmptyShape)
        ));
    }

    #[test]
    fn test_subtract_single_peak() {
        let corrector = corrector_1d(2);
        let data = NDArray::from_vec(&[3], vec![100.0, 0.0, 0.0]).unwrap();
        let subtracted = corrector.subtract_na(&data).unwrap();
        let s0 = corrector.table().sum_product(&[0]).unwrap();
        assert!((subtracted.as_slice()[0] - 100.0 / s0).abs() < 1e-9);
        assert_eq!(subtracted.as_slice()[1], 0.0);
        assert_eq!(subtracted.as_slice()[2], 0.0);

        let rescaled = subtracted.rescaled(data.sum());
        assert!((rescaled.as_slice()[0] - 100.0).abs() < 1e-9);

        let added = corrector.add_na(&rescaled).unwrap();
        assert!(added.as_slice()[1] > 0.0);
        assert!(added.as_slice()[2] > 0.0);
        assert!((added.sum() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_add_inverts_subtract() {
        let corrector = corrector_1d(3);
        let labeled = NDArray::from_vec(&[4], vec![60.0, 10.0, 20.0, 10.0]).unwrap();
        let observed = corrector.add_na(&labeled).unwrap();
        let recovered = corrector.subtract_na(&observed).unwrap();
        for (a, b) in labeled.iter().zip(recovered.iter()) {
            assert!((a - b).abs() < 1e-9, "{a} != {b}");
        }
    }

    #[test]
    fn test_replace_negatives() {
        let a = NDArray::from_vec(&[4], vec![1.0, 0.0, -2.0, 3.0]).unwrap();
        let b = NDArray::from_vec(&[4], vec![9.0, 8.0, 7.0, 6.0]).unwrap();
        assert_eq!(replace_negatives(&a, &b).as_slice(), &[1.0, 8.0, 7.0, 3.0]);
    }

    #[test_log::test]
    fn test_run_single_peak() {
        let mut corrector = corrector_1d(3);
        let data = NDArray::from_vec(&[4], vec![1000.0, 0.0, 0.0, 0.0]).unwrap();
        let (_, added, _) = corrector.remove_na(&data).unwrap();
        assert!(added.iter().all(|v| *v >= 0.0));

        let result = corrector.run(&data).unwrap();
        assert!(result.corrected.iter().all(|v| *v >= 0.0));
        let total: f64 = result.renormalized.sum();
        assert!((total - 1000.0).abs() / 1000.0 < 1e-6, "{total}");
        assert_eq!(result.total_na_removed, result.corrected.sum());

        let summary = corrector.filter_format_results(f64::INFINITY).unwrap();
        assert_eq!(summary.accepted_predictions, 0);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary.peaks[0].coordinate, vec![0]);
        assert!((summary.peaks[0].percentage - 100.0).abs() < 1e-9);
        let elapsed = corrector.result().unwrap().elapsed;
        assert_eq!(summary.cpu_time, elapsed.as_secs_f64());

        let summary = corrector.filter_format_results(0.0).unwrap();
        assert_eq!(summary.accepted_predictions, 3);
        assert!(summary.get(&[2]).unwrap().unobserved);
    }

    #[test]
    fn test_run_labeled_series() {
        let cache = NACache::new(&[IsotopeLabel::C13]);
        let lookup = cache.lookup_for(&[(IsotopeLabel::C13, 6)]).unwrap();
        let mut corrector =
            NACorrector::new(vec![IsotopeLabel::C13], vec![7], lookup)
                .unwrap()
                .with_max_iterations(Some(100));
        let data =
            NDArray::from_vec(&[7], vec![5000.0, 400.0, 120.0, 800.0, 60.0, 0.0, 2500.0]).unwrap();
        let result = corrector.run(&data).unwrap();
        assert!(result.iterations <= 100);
        assert!(result.corrected.iter().all(|v| *v >= 0.0));
        // Natural abundance only ever moves intensity upward
        assert!(result.corrected.as_slice()[1] < data.as_slice()[1]);
        let summary = corrector.filter_format_results(1e12).unwrap();
        assert_eq!(summary.len(), 6);
        let pct: f64 = summary.peaks.iter().map(|p| p.percentage).sum();
        assert!(pct <= 100.0 + 1e-9);
    }

    #[test]
    fn test_run_two_dimensions() {
        let cache = NACache::new(&[IsotopeLabel::C13, IsotopeLabel::N15]);
        let lookup = cache
            .lookup_for(&[(IsotopeLabel::C13, 2), (IsotopeLabel::N15, 1)])
            .unwrap();
        let c = Arc::clone(&lookup.tables()[0]);
        let mut corrector = NACorrector::new(
            vec![IsotopeLabel::C13, IsotopeLabel::N15],
            vec![3, 2],
            lookup,
        )
        .unwrap();
        let mut data = NDArray::zeros(&[3, 2]);
        data[&vec![0, 0]] = 1000.0;
        data[&vec![2, 1]] = 300.0;

        let subtracted = corrector.subtract_na(&data).unwrap();
        assert!(subtracted[&vec![1, 0]] == 0.0);
        let s00 = corrector.table().sum_product(&[0, 0]).unwrap();
        assert!((subtracted[&vec![0, 0]] - 1000.0 / s00).abs() < 1e-9);
        assert!(s00 < c.sum_product_at(0).unwrap());

        let result = corrector.run(&data).unwrap();
        assert!(result.predicted.iter().all(|v| *v >= 0.0));
        let summary = corrector.filter_format_results(f64::INFINITY).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.peaks[0].coordinate, vec![0, 0]);
        assert_eq!(summary.peaks[1].coordinate, vec![2, 1]);
    }

    #[test]
    fn test_not_initialized() {
        let corrector = corrector_1d(2);
        assert_eq!(
            corrector.filter_format_results(1.0),
            Err(CorrectionError::NotInitialized)
        );
        let bad = NDArray::zeros(&[5]);
        assert!(matches!(
            corrector.subtract_na(&bad),
            Err(CorrectionError::ShapeMismatch { .. })
        ));
    }
}
