use std::fmt::Display;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mznatcorr::{IsotopeLabel, UnsupportedIsotope};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IsotopeColumnParseError {
    #[error("Expected ISOTOPE=COLUMN, got {0:?}")]
    Malformed(String),
    #[error(transparent)]
    UnsupportedIsotope(#[from] UnsupportedIsotope),
    #[error("Failed to parse column index {0:?}")]
    InvalidColumn(String),
}

/// The column holding the label count for one isotope, written `13C=3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IsotopeColumn {
    pub isotope: IsotopeLabel,
    pub column: usize,
}

impl FromStr for IsotopeColumn {
    type Err = IsotopeColumnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (isotope, column) = s
            .split_once('=')
            .ok_or_else(|| IsotopeColumnParseError::Malformed(s.to_string()))?;
        let isotope = isotope.parse()?;
        let column = column
            .trim()
            .parse()
            .map_err(|_| IsotopeColumnParseError::InvalidColumn(column.to_string()))?;
        Ok(Self { isotope, column })
    }
}

impl TryFrom<String> for IsotopeColumn {
    type Error = IsotopeColumnParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IsotopeColumn> for String {
    fn from(value: IsotopeColumn) -> Self {
        value.to_string()
    }
}

impl Display for IsotopeColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.isotope, self.column)
    }
}

/// A column of results appended to the output table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputColumn {
    /// The intensity predicted once natural abundance is added back in
    Predicted,
    /// The intensity with natural abundance removed
    Corrected,
    /// The corrected intensity scaled back to the observed total
    Renormalized,
    /// The sum of the corrected intensities of the peak set
    TotalNaRemoved,
    /// Errors and notes about each peak
    Comments,
    /// The number of refinement rounds the correction took
    Iterations,
    /// The values of the grouping columns
    SampleGroupKey,
    /// The time spent correcting the peak set, in seconds.
    ///
    /// This is measured on the wall clock, so it includes time the thread
    /// spent waiting rather than only time on the CPU.
    CpuTime,
    /// The number of unobserved peaks reported for the peak set
    AcceptedPredictions,
    /// The corrected intensity as a percentage of the peak set total
    Percentage,
}

impl OutputColumn {
    pub const fn header(&self) -> &'static str {
        match self {
            Self::Predicted => "Predicted",
            Self::Corrected => "Corrected",
            Self::Renormalized => "Renormalized",
            Self::TotalNaRemoved => "Total NA Removed",
            Self::Comments => "Comments",
            Self::Iterations => "Iterations",
            Self::SampleGroupKey => "Sample Group Key",
            Self::CpuTime => "CPU Time",
            Self::AcceptedPredictions => "Accepted Predictions",
            Self::Percentage => "Percentage",
        }
    }

    pub fn default_columns() -> Vec<Self> {
        vec![
            Self::Predicted,
            Self::Corrected,
            Self::Renormalized,
            Self::TotalNaRemoved,
            Self::Comments,
        ]
    }
}

impl Display for OutputColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.header())
    }
}
