//! Grouping ingested rows into peak sets and correcting each of them.
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::time::Instant;

use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, info, warn};

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

use crate::corrector::{CorrectionError, CorrectionSummary, NACorrector};
use crate::isotopes::IsotopeLabel;
use crate::lookup::{LookupError, NACache};
use crate::peaks::{
    GlobalStatistics, Peak, PeakError, PeakSet, StatisticsAccumulator, Threshold,
};

/// The values of the grouping columns that identify one molecule in one sample
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GroupKey(pub Vec<String>);

impl GroupKey {
    pub fn new<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.0.iter().join(", "))
    }
}

impl<S: Into<String>> From<Vec<S>> for GroupKey {
    fn from(value: Vec<S>) -> Self {
        Self::new(value)
    }
}

/// One measurement to be ingested by an [`Analysis`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PeakRow {
    pub group: GroupKey,
    pub intensity: f64,
    pub counts: HashMap<IsotopeLabel, u32>,
    pub formula: String,
    pub source_row: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AnalysisConfig {
    /// The isotopes to correct for, in axis order
    pub isotopes: Vec<IsotopeLabel>,
    pub threshold: Threshold,
    pub max_iterations: Option<usize>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            isotopes: vec![IsotopeLabel::C13],
            threshold: Threshold::default(),
            max_iterations: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("The analysis has not been initialized")]
    NotInitialized,
    #[error("The analysis has already been initialized")]
    AlreadyInitialized,
    #[error(transparent)]
    Peak(#[from] PeakError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Correction(#[from] CorrectionError),
}

/// A non-fatal problem that prevented a peak set from being corrected
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SetDiagnostic {
    EmptyOrMalformedPeakSet { key: GroupKey, reason: String },
}

impl Display for SetDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyOrMalformedPeakSet { key, reason } => write!(f, "{reason} with key {key}"),
        }
    }
}

/// A peak that could not be added to its set
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RejectedPeak {
    pub group: GroupKey,
    pub peak: Peak,
}

/// Bookkeeping for a reported coordinate that came from an observed peak
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PeakAnnotation {
    pub coordinate: Vec<usize>,
    pub source_row: Option<usize>,
    pub comment: Option<String>,
}

/// The corrected values for one peak set
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetReport {
    pub key: GroupKey,
    pub formula: String,
    pub label_order: Vec<IsotopeLabel>,
    pub summary: CorrectionSummary,
    pub annotations: Vec<PeakAnnotation>,
}

impl SetReport {
    pub fn annotation(&self, coordinate: &[usize]) -> Option<&PeakAnnotation> {
        self.annotations.iter().find(|a| a.coordinate == coordinate)
    }
}

enum SetOutcome {
    Corrected(SetReport),
    Skipped(SetDiagnostic),
}

fn correct_set(
    key: &GroupKey,
    peak_set: &PeakSet,
    cache: &NACache,
    globals: &GlobalStatistics,
    max_iterations: Option<usize>,
) -> Result<SetOutcome, AnalysisError> {
    if peak_set.shape().is_empty() {
        return Ok(SetOutcome::Skipped(SetDiagnostic::EmptyOrMalformedPeakSet {
            key: key.clone(),
            reason: "Bad set".to_string(),
        }));
    }
    if peak_set.is_empty() {
        return Ok(SetOutcome::Skipped(SetDiagnostic::EmptyOrMalformedPeakSet {
            key: key.clone(),
            reason: "Zero length set".to_string(),
        }));
    }

    let lookup = cache.lookup_for(&peak_set.axes())?;
    let mut corrector = NACorrector::new(
        peak_set.label_order().to_vec(),
        peak_set.shape().to_vec(),
        lookup,
    )?
    .with_max_iterations(max_iterations);
    corrector.run(&peak_set.raw_data())?;
    let summary = corrector.filter_format_results(peak_set.resolve_threshold(globals))?;

    let annotations = summary
        .peaks
        .iter()
        .filter_map(|p| {
            peak_set.get(&p.coordinate).map(|peak| PeakAnnotation {
                coordinate: p.coordinate.clone(),
                source_row: peak.source_row(),
                comment: peak.comment().map(String::from),
            })
        })
        .collect();

    Ok(SetOutcome::Corrected(SetReport {
        key: key.clone(),
        formula: peak_set.formula().to_string(),
        label_order: peak_set.label_order().to_vec(),
        summary,
        annotations,
    }))
}

/// Drives natural abundance correction over every peak set of a dataset.
///
/// Rows are [`ingest`](Analysis::ingest)ed first, then the analysis is
/// [`initialize`](Analysis::initialize)d, which fixes the global statistics,
/// and finally every set is corrected with [`correct_all`](Analysis::correct_all).
#[derive(Debug)]
pub struct Analysis {
    config: AnalysisConfig,
    cache: NACache,
    peak_sets: BTreeMap<GroupKey, PeakSet>,
    rejected: Vec<RejectedPeak>,
    statistics: StatisticsAccumulator,
    globals: Option<GlobalStatistics>,
    diagnostics: Vec<SetDiagnostic>,
    results: BTreeMap<GroupKey, SetReport>,
}

impl Default for Analysis {
    fn default() -> Self {
        Self::new(AnalysisConfig::default())
    }
}

impl Analysis {
    pub fn new(config: AnalysisConfig) -> Self {
        let cache = NACache::new(&config.isotopes);
        Self {
            config,
            cache,
            peak_sets: BTreeMap::new(),
            rejected: Vec::new(),
            statistics: StatisticsAccumulator::new(),
            globals: None,
            diagnostics: Vec::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn cache(&self) -> &NACache {
        &self.cache
    }

    pub fn is_initialized(&self) -> bool {
        self.globals.is_some()
    }

    /// Add one measurement, creating its peak set if this is the first row of its group.
    ///
    /// A peak that cannot be added to its set is kept with an error comment, see
    /// [`Analysis::rejected_peaks`], and the error is returned.
    pub fn ingest(&mut self, row: PeakRow) -> Result<(), AnalysisError> {
        if self.is_initialized() {
            return Err(AnalysisError::AlreadyInitialized);
        }
        let PeakRow {
            group,
            intensity,
            counts,
            formula,
            source_row,
        } = row;

        let peak_set = match self.peak_sets.entry(group.clone()) {
            Entry::Occupied(ent) => ent.into_mut(),
            Entry::Vacant(ent) => {
                let peak_set = PeakSet::from_formula(&self.config.isotopes, &formula);
                for (isotope, maximum) in peak_set.axes() {
                    self.cache.build_table(isotope, maximum)?;
                }
                debug!(
                    "New peak set {group} for {formula} with shape {:?}",
                    peak_set.shape()
                );
                ent.insert(peak_set)
            }
        };

        let peak = Peak::new(intensity, counts).with_source_row(source_row);
        match peak_set.add_peak(peak) {
            Ok(peak) => {
                self.statistics.observe_peak(peak);
                Ok(())
            }
            Err(err) => {
                let mut peak = err.peak().clone();
                peak.set_comment(format!("Error: {err}"));
                debug!("Rejected peak in {group}: {err}");
                self.rejected.push(RejectedPeak { group, peak });
                Err(err.into())
            }
        }
    }

    /// Finish ingestion, computing the global statistics and assigning each set its threshold.
    pub fn initialize(&mut self) -> Result<&GlobalStatistics, AnalysisError> {
        if self.is_initialized() {
            return Err(AnalysisError::AlreadyInitialized);
        }
        for peak_set in self.peak_sets.values_mut() {
            self.statistics.observe_set(peak_set);
            peak_set.set_threshold(self.config.threshold.clone());
        }
        let globals = self.statistics.finalize();
        if let Some(resolved) = self.config.threshold.resolve_global(&globals) {
            info!("Resolved threshold {} to {resolved}", self.config.threshold);
            for peak_set in self.peak_sets.values_mut() {
                peak_set.set_threshold(Threshold::Literal(resolved));
            }
        }
        info!(
            "Ingested {} peaks in {} peak sets, rejected {} peaks",
            globals.count,
            self.peak_sets.len(),
            self.rejected.len()
        );
        Ok(self.globals.insert(globals))
    }

    /// Correct every peak set, skipping those that are empty or have no labeled axes.
    pub fn correct_all(&mut self) -> Result<&BTreeMap<GroupKey, SetReport>, AnalysisError> {
        let globals = self.globals.ok_or(AnalysisError::NotInitialized)?;
        let start = Instant::now();
        let cache = &self.cache;
        let max_iterations = self.config.max_iterations;

        #[cfg(feature = "parallelism")]
        let outcomes: Vec<_> = self
            .peak_sets
            .par_iter()
            .map(|(key, peak_set)| correct_set(key, peak_set, cache, &globals, max_iterations))
            .collect::<Result<_, _>>()?;

        #[cfg(not(feature = "parallelism"))]
        let outcomes: Vec<_> = self
            .peak_sets
            .iter()
            .map(|(key, peak_set)| correct_set(key, peak_set, cache, &globals, max_iterations))
            .collect::<Result<_, _>>()?;

        for outcome in outcomes {
            match outcome {
                SetOutcome::Corrected(report) => {
                    self.results.insert(report.key.clone(), report);
                }
                SetOutcome::Skipped(diagnostic) => {
                    warn!("{diagnostic}");
                    self.diagnostics.push(diagnostic);
                }
            }
        }
        info!(
            "Corrected {} peak sets, skipped {} ({:0.3?})",
            self.results.len(),
            self.diagnostics.len(),
            start.elapsed()
        );
        Ok(&self.results)
    }

    pub fn peak_sets(&self) -> &BTreeMap<GroupKey, PeakSet> {
        &self.peak_sets
    }

    pub fn get_peak_set(&self, key: &GroupKey) -> Option<&PeakSet> {
        self.peak_sets.get(key)
    }

    pub fn rejected_peaks(&self) -> &[RejectedPeak] {
        &self.rejected
    }

    pub fn set_diagnostics(&self) -> &[SetDiagnostic] {
        &self.diagnostics
    }

    pub fn global_statistics(&self) -> Option<&GlobalStatistics> {
        self.globals.as_ref()
    }

    pub fn results(&self) -> &BTreeMap<GroupKey, SetReport> {
        &self.results
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(group: &str, intensity: f64, c13: u32, formula: &str) -> PeakRow {
        PeakRow {
            group: GroupKey::new([group]),
            intensity,
            counts: [(IsotopeLabel::C13, c13)].into_iter().collect(),
            formula: formula.to_string(),
            source_row: None,
        }
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut analysis = Analysis::default();
        assert!(matches!(
            analysis.correct_all(),
            Err(AnalysisError::NotInitialized)
        ));
        analysis.ingest(row("a", 10.0, 0, "C2H6")).unwrap();
        analysis.initialize().unwrap();
        assert!(matches!(
            analysis.initialize(),
            Err(AnalysisError::AlreadyInitialized)
        ));
        assert!(matches!(
            analysis.ingest(row("a", 10.0, 1, "C2H6")),
            Err(AnalysisError::AlreadyInitialized)
        ));
    }

    #[test_log::test]
    fn test_quarantine() {
        let mut analysis = Analysis::default();
        analysis.ingest(row("a", 10.0, 0, "C2H6")).unwrap();
        let err = analysis.ingest(row("a", 12.0, 0, "C2H6")).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Peak(PeakError::DuplicateCoordinate { .. })
        ));
        assert!(analysis.ingest(row("a", 12.0, 5, "C2H6")).is_err());
        assert_eq!(analysis.rejected_peaks().len(), 2);
        let comment = analysis.rejected_peaks()[0].peak.comment().unwrap();
        assert!(comment.starts_with("Error: duplicated"), "{comment}");
        assert_eq!(analysis.get_peak_set(&GroupKey::new(["a"])).unwrap().len(), 1);
    }

    #[test_log::test]
    fn test_correct_all() {
        let mut analysis = Analysis::new(AnalysisConfig {
            threshold: Threshold::parse("0.5GMIN"),
            ..Default::default()
        });
        analysis.ingest(row("a", 1000.0, 0, "C3H8")).unwrap();
        analysis.ingest(row("a", 50.0, 2, "C3H8")).unwrap();
        analysis.ingest(row("b", 400.0, 0, "C2H6")).unwrap();
        // No carbon, so no axes to correct over
        analysis.ingest(row("c", 5.0, 0, "H2O")).unwrap();
        analysis.ingest(PeakRow {
            group: GroupKey::new(["d"]),
            intensity: 3.0,
            counts: HashMap::new(),
            formula: "H2O".to_string(),
            source_row: Some(9),
        })
        .unwrap();

        let globals = *analysis.initialize().unwrap();
        assert_eq!(globals.count, 5);
        assert_eq!(globals.minimum, Some(3.0));
        assert_eq!(
            analysis.get_peak_set(&GroupKey::new(["a"])).unwrap().threshold(),
            &Threshold::Literal(1.5)
        );

        let results = analysis.correct_all().unwrap();
        assert_eq!(results.len(), 2);
        let report = &results[&GroupKey::new(["a"])];
        assert_eq!(report.label_order, vec![IsotopeLabel::C13]);
        assert!(report.summary.get(&[0]).is_some());
        assert!(report.summary.get(&[2]).is_some());
        assert!(report.summary.get(&[1]).unwrap().unobserved);
        assert!(report.annotation(&[1]).is_none());
        assert_eq!(analysis.set_diagnostics().len(), 2);
        assert_eq!(
            analysis.set_diagnostics()[0].to_string(),
            "Bad set with key (c)"
        );
    }
}
