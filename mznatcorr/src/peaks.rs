//! Measured peaks, the peak sets that group them by molecule, and the
//! thresholds used to decide which predicted peaks are worth reporting.
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::array::NDArray;
use crate::isotopes::IsotopeLabel;

/// A single measured intensity and the number of labeled atoms it carries per isotope
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Peak {
    pub intensity: f64,
    pub counts: HashMap<IsotopeLabel, u32>,
    comment: Option<String>,
    source_row: Option<usize>,
}

impl Peak {
    pub fn new(intensity: f64, counts: HashMap<IsotopeLabel, u32>) -> Self {
        Self {
            intensity,
            counts,
            comment: None,
            source_row: None,
        }
    }

    pub fn with_source_row(mut self, source_row: Option<usize>) -> Self {
        self.source_row = source_row;
        self
    }

    pub fn count(&self, isotope: IsotopeLabel) -> Option<u32> {
        self.counts.get(&isotope).copied()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    pub fn source_row(&self) -> Option<usize> {
        self.source_row
    }

    fn describe_counts(&self) -> String {
        self.counts
            .iter()
            .sorted_by_key(|(k, _)| **k)
            .map(|(k, v)| format!("{v} {}", k.name()))
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeakError {
    #[error("duplicated: peak set already contains peak for isotope counts {}", .peak.describe_counts())]
    DuplicateCoordinate { coordinate: Vec<usize>, peak: Peak },
    #[error("peak contains no isotope count for {}", .isotope.name())]
    MissingIsotopeCount { isotope: IsotopeLabel, peak: Peak },
    #[error("isotope count for {} above molecule's count for {}", .isotope.name(), .isotope.element())]
    CountExceedsMaximum {
        isotope: IsotopeLabel,
        count: u32,
        maximum: u32,
        peak: Peak,
    },
}

impl PeakError {
    pub fn peak(&self) -> &Peak {
        match self {
            Self::DuplicateCoordinate { peak, .. } => peak,
            Self::MissingIsotopeCount { peak, .. } => peak,
            Self::CountExceedsMaximum { peak, .. } => peak,
        }
    }

    pub fn into_peak(self) -> Peak {
        match self {
            Self::DuplicateCoordinate { peak, .. } => peak,
            Self::MissingIsotopeCount { peak, .. } => peak,
            Self::CountExceedsMaximum { peak, .. } => peak,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum LocalStatistic {
    Maximum,
    Minimum,
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum GlobalStatistic {
    Maximum,
    Minimum,
    Average,
    AverageMaximum,
    AverageMinimum,
}

static GLOBAL_THRESHOLD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<percent>\d*\.?\d+)(?P<statistic>GMAX|GMIN|GAVG|GAMAX|GAMIN)$").unwrap()
});
static LOCAL_THRESHOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<percent>\d*\.?\d+)(?P<statistic>MAX|MIN|AVG)$").unwrap());

/// The minimum predicted intensity an unobserved peak must reach to be reported.
///
/// Thresholds are written as a literal number, or as a fraction followed by a
/// statistic, e.g. `0.99MIN` is 99% of the smallest positive peak in the set,
/// and `0.5GAVG` is half of the average accepted peak over the whole analysis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Threshold {
    Literal(f64),
    Local {
        percent: f64,
        statistic: LocalStatistic,
    },
    Global {
        percent: f64,
        statistic: GlobalStatistic,
    },
    /// Unrecognized threshold text, which accepts no predictions
    Unparsed(String),
}

impl Default for Threshold {
    fn default() -> Self {
        Self::Local {
            percent: 0.99,
            statistic: LocalStatistic::Minimum,
        }
    }
}

impl Threshold {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(caps) = GLOBAL_THRESHOLD.captures(text) {
            let percent = caps["percent"].parse().unwrap_or(f64::NAN);
            let statistic = match &caps["statistic"] {
                "GMAX" => GlobalStatistic::Maximum,
                "GMIN" => GlobalStatistic::Minimum,
                "GAVG" => GlobalStatistic::Average,
                "GAMAX" => GlobalStatistic::AverageMaximum,
                _ => GlobalStatistic::AverageMinimum,
            };
            return Self::Global { percent, statistic };
        }
        if let Some(caps) = LOCAL_THRESHOLD.captures(text) {
            let percent = caps["percent"].parse().unwrap_or(f64::NAN);
            let statistic = match &caps["statistic"] {
                "MAX" => LocalStatistic::Maximum,
                "MIN" => LocalStatistic::Minimum,
                _ => LocalStatistic::Average,
            };
            return Self::Local { percent, statistic };
        }
        match text.parse::<f64>() {
            Ok(value) => Self::Literal(value),
            Err(_) => Self::Unparsed(text.to_string()),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global { .. })
    }

    /// Compute the numeric value of a global threshold, which is the same for every peak set.
    ///
    /// Returns `None` for thresholds that are not global or whose statistic is undefined.
    pub fn resolve_global(&self, globals: &GlobalStatistics) -> Option<f64> {
        match self {
            Self::Global { percent, statistic } => {
                globals.statistic(*statistic).map(|s| percent * s)
            }
            _ => None,
        }
    }

    /// Compute the numeric threshold for `peak_set`, drawing global statistics from `globals`.
    ///
    /// A statistic that is not defined, such as the minimum of a set without any
    /// positive peaks, resolves to `+∞`.
    pub fn resolve(&self, peak_set: &PeakSet, globals: &GlobalStatistics) -> f64 {
        match self {
            Self::Literal(value) => *value,
            Self::Local { percent, statistic } => {
                let stat = match statistic {
                    LocalStatistic::Maximum => peak_set.maximum_peak().map(|p| p.intensity),
                    LocalStatistic::Minimum => peak_set.minimum_peak().map(|p| p.intensity),
                    LocalStatistic::Average => {
                        if peak_set.maximum_peak().is_some() && !peak_set.is_empty() {
                            Some(peak_set.total_intensity() / peak_set.len() as f64)
                        } else {
                            None
                        }
                    }
                };
                stat.map(|s| percent * s).unwrap_or(f64::INFINITY)
            }
            Self::Global { .. } => self.resolve_global(globals).unwrap_or(f64::INFINITY),
            Self::Unparsed(text) => {
                warn!("Threshold {text:?} could not be interpreted, no predicted peaks will be accepted");
                f64::INFINITY
            }
        }
    }
}

impl FromStr for Threshold {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value}"),
            Self::Local { percent, statistic } => {
                let tag = match statistic {
                    LocalStatistic::Maximum => "MAX",
                    LocalStatistic::Minimum => "MIN",
                    LocalStatistic::Average => "AVG",
                };
                write!(f, "{percent}{tag}")
            }
            Self::Global { percent, statistic } => {
                let tag = match statistic {
                    GlobalStatistic::Maximum => "GMAX",
                    GlobalStatistic::Minimum => "GMIN",
                    GlobalStatistic::Average => "GAVG",
                    GlobalStatistic::AverageMaximum => "GAMAX",
                    GlobalStatistic::AverageMinimum => "GAMIN",
                };
                write!(f, "{percent}{tag}")
            }
            Self::Unparsed(text) => f.write_str(text),
        }
    }
}

/// All of the peaks measured for one molecule, indexed by their label counts.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakSet {
    formula: String,
    maxima: Vec<(IsotopeLabel, u32)>,
    label_order: Vec<IsotopeLabel>,
    shape: Vec<usize>,
    peaks: BTreeMap<Vec<usize>, Peak>,
    total_intensity: f64,
    maximum_peak: Option<Vec<usize>>,
    minimum_peak: Option<Vec<usize>>,
    threshold: Threshold,
}

impl PeakSet {
    /// Create an empty peak set for `formula`, with one axis for each of `isotopes`
    /// whose element appears in the formula.
    pub fn from_formula(isotopes: &[IsotopeLabel], formula: &str) -> Self {
        let maxima: Vec<_> = isotopes
            .iter()
            .map(|iso| (*iso, iso.maximum(formula)))
            .collect();
        let active: Vec<_> = maxima.iter().filter(|(_, m)| *m > 0).collect();
        let label_order = active.iter().map(|(iso, _)| *iso).collect();
        let shape = active.iter().map(|(_, m)| *m as usize + 1).collect();
        Self {
            formula: formula.to_string(),
            maxima,
            label_order,
            shape,
            peaks: BTreeMap::new(),
            total_intensity: 0.0,
            maximum_peak: None,
            minimum_peak: None,
            threshold: Threshold::Literal(f64::INFINITY),
        }
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn label_order(&self) -> &[IsotopeLabel] {
        &self.label_order
    }

    /// The `(isotope, maximum)` pairs of the axes of this set, in label order
    pub fn axes(&self) -> Vec<(IsotopeLabel, u32)> {
        self.maxima.iter().copied().filter(|(_, m)| *m > 0).collect()
    }

    pub fn isotope_maximum(&self, isotope: IsotopeLabel) -> Option<u32> {
        self.maxima
            .iter()
            .find(|(iso, _)| *iso == isotope)
            .map(|(_, m)| *m)
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn total_intensity(&self) -> f64 {
        self.total_intensity
    }

    /// The peak with the largest positive intensity
    pub fn maximum_peak(&self) -> Option<&Peak> {
        self.maximum_peak.as_ref().and_then(|c| self.peaks.get(c))
    }

    /// The peak with the smallest positive intensity
    pub fn minimum_peak(&self) -> Option<&Peak> {
        self.minimum_peak.as_ref().and_then(|c| self.peaks.get(c))
    }

    pub fn get(&self, coordinate: &[usize]) -> Option<&Peak> {
        self.peaks.get(coordinate)
    }

    pub fn peaks(&self) -> impl Iterator<Item = (&Vec<usize>, &Peak)> {
        self.peaks.iter()
    }

    pub fn threshold(&self) -> &Threshold {
        &self.threshold
    }

    pub fn set_threshold(&mut self, threshold: Threshold) {
        self.threshold = threshold;
    }

    pub fn resolve_threshold(&self, globals: &GlobalStatistics) -> f64 {
        self.threshold.resolve(self, globals)
    }

    fn coordinate_of(&self, peak: &Peak) -> Result<Vec<usize>, (IsotopeLabel, Option<(u32, u32)>)> {
        let mut coordinate = Vec::with_capacity(self.label_order.len());
        for (isotope, maximum) in self.maxima.iter().filter(|(_, m)| *m > 0) {
            match peak.count(*isotope) {
                None => return Err((*isotope, None)),
                Some(count) if count > *maximum => {
                    return Err((*isotope, Some((count, *maximum))))
                }
                Some(count) => coordinate.push(count as usize),
            }
        }
        Ok(coordinate)
    }

    /// Add `peak` to the set, returning a reference to it once stored.
    ///
    /// A rejected peak is handed back inside the error.
    pub fn add_peak(&mut self, peak: Peak) -> Result<&Peak, PeakError> {
        let coordinate = match self.coordinate_of(&peak) {
            Ok(coordinate) => coordinate,
            Err((isotope, None)) => return Err(PeakError::MissingIsotopeCount { isotope, peak }),
            Err((isotope, Some((count, maximum)))) => {
                return Err(PeakError::CountExceedsMaximum {
                    isotope,
                    count,
                    maximum,
                    peak,
                })
            }
        };
        if self.peaks.contains_key(&coordinate) {
            return Err(PeakError::DuplicateCoordinate { coordinate, peak });
        }

        let intensity = peak.intensity;
        if intensity > 0.0 {
            self.total_intensity += intensity;
            if self.minimum_peak().is_none_or(|p| intensity < p.intensity) {
                self.minimum_peak = Some(coordinate.clone());
            }
            if self.maximum_peak().is_none_or(|p| intensity > p.intensity) {
                self.maximum_peak = Some(coordinate.clone());
            }
        }
        Ok(self.peaks.entry(coordinate).or_insert(peak))
    }

    /// The set's intensities laid out as a dense array, with zeros for unmeasured coordinates
    pub fn raw_data(&self) -> NDArray {
        let mut data = NDArray::zeros(&self.shape);
        for (coordinate, peak) in self.peaks.iter() {
            if let Some(v) = data.get_mut(coordinate) {
                *v = peak.intensity;
            }
        }
        data
    }
}

/// Intensity statistics over every accepted peak in an analysis
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GlobalStatistics {
    pub sum: f64,
    pub count: usize,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub average_set_minimum: Option<f64>,
    pub average_set_maximum: Option<f64>,
}

impl GlobalStatistics {
    pub fn average(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.sum / self.count as f64)
        } else {
            None
        }
    }

    pub fn statistic(&self, statistic: GlobalStatistic) -> Option<f64> {
        match statistic {
            GlobalStatistic::Maximum => self.maximum,
            GlobalStatistic::Minimum => self.minimum,
            GlobalStatistic::Average => self.average(),
            GlobalStatistic::AverageMaximum => self.average_set_maximum,
            GlobalStatistic::AverageMinimum => self.average_set_minimum,
        }
    }
}

/// Collects [`GlobalStatistics`] while peaks are ingested
#[derive(Debug, Clone, Default)]
pub struct StatisticsAccumulator {
    sum: f64,
    count: usize,
    minimum: Option<f64>,
    maximum: Option<f64>,
    set_minimum_sum: f64,
    set_maximum_sum: f64,
    set_count: usize,
}

impl StatisticsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_peak(&mut self, peak: &Peak) {
        let intensity = peak.intensity;
        self.sum += intensity;
        self.count += 1;
        self.minimum = Some(self.minimum.map_or(intensity, |m| m.min(intensity)));
        self.maximum = Some(self.maximum.map_or(intensity, |m| m.max(intensity)));
    }

    pub fn observe_set(&mut self, peak_set: &PeakSet) {
        if let (Some(low), Some(high)) = (peak_set.minimum_peak(), peak_set.maximum_peak()) {
            self.set_minimum_sum += low.intensity;
            self.set_maximum_sum += high.intensity;
            self.set_count += 1;
        }
    }

    pub fn finalize(&self) -> GlobalStatistics {
        let (average_set_minimum, average_set_maximum) = if self.set_count > 0 {
            let n = self.set_count as f64;
            (
                Some(self.set_minimum_sum / n),
                Some(self.set_maximum_sum / n),
            )
        } else {
            (None, None)
        };
        GlobalStatistics {
            sum: self.sum,
            count: self.count,
            minimum: self.minimum,
            maximum: self.maximum,
            average_set_minimum,
            average_set_maximum,
        }
    }
}
