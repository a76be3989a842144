//! `mznatcorr` corrects isotopologue intensities from stable isotope labeling
//! experiments for the natural abundance of heavy isotopes.
//!
//! A molecule with `n` atoms of an element is observed carrying `y` heavy atoms
//! both because `x` of them were labeled and because some of the remaining
//! `n - x` atoms happen to be heavy isotopes in nature. Given the observed
//! intensities for each label count, this crate estimates the intensities that
//! are attributable to the label alone.
//!
//! The building blocks are:
//! - [`IsotopeLabel`], the supported labels and their natural abundances
//! - [`NACache`] and [`NATables`], the transition probabilities between label counts
//! - [`PeakSet`], the intensities measured for one molecule
//! - [`NACorrector`], the iterative solver
//! - [`Analysis`], which groups ingested rows into peak sets and corrects them all
//!
//! ```rust
//! use mznatcorr::{IsotopeLabel, NACache, NACorrector, NDArray};
//!
//! let cache = NACache::new(&[IsotopeLabel::C13]);
//! let lookup = cache.lookup_for(&[(IsotopeLabel::C13, 3)]).unwrap();
//! let mut corrector = NACorrector::new(vec![IsotopeLabel::C13], vec![4], lookup).unwrap();
//! let data = NDArray::from_vec(&[4], vec![1000.0, 120.0, 5.0, 0.0]).unwrap();
//! let result = corrector.run(&data).unwrap();
//! assert!(result.corrected.iter().all(|v| *v >= 0.0));
//! ```
pub mod analysis;
pub mod array;
pub mod coordinates;
pub mod corrector;
pub mod isotopes;
pub mod lookup;
pub mod peaks;

pub use crate::analysis::{
    Analysis, AnalysisConfig, AnalysisError, GroupKey, PeakAnnotation, PeakRow, RejectedPeak,
    SetDiagnostic, SetReport,
};
pub use crate::array::{NDArray, ShapeError};
pub use crate::coordinates::{CoordinateError, CoordinateIter};
pub use crate::corrector::{
    replace_negatives, CorrectionError, CorrectionResult, CorrectionSummary, NACorrector,
    PeakResult,
};
pub use crate::isotopes::{IsotopeLabel, UnsupportedIsotope};
pub use crate::lookup::{CoefficientTable, LookupError, NACache, NALookup, NATables, TableKey};
pub use crate::peaks::{
    GlobalStatistic, GlobalStatistics, LocalStatistic, Peak, PeakError, PeakSet,
    StatisticsAccumulator, Threshold,
};
