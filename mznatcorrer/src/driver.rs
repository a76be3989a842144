use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use mznatcorr::{Analysis, AnalysisConfig, AnalysisError, IsotopeLabel, Threshold};

use crate::args::{IsotopeColumn, OutputColumn};
use crate::ingest::{CellGrid, ColumnLayout};
use crate::write::{append_results, write_json};

#[derive(Debug, Error)]
pub enum MZNatCorrerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("An error occurred while reading or writing CSV: {0}")]
    CSVError(
        #[source]
        #[from]
        csv::Error,
    ),
    #[error("An error occurred while writing JSON: {0}")]
    JSONError(
        #[source]
        #[from]
        serde_json::Error,
    ),
    #[error("Failed to read the configuration: {0}")]
    ConfigError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("An error occurred during the analysis: {0}")]
    AnalysisError(
        #[source]
        #[from]
        AnalysisError,
    ),
    #[error("Row {row} does not have a column {column}")]
    MissingColumn { row: usize, column: usize },
    #[error("Row {row} column {column} has an invalid value {value:?}")]
    InvalidCell {
        row: usize,
        column: usize,
        value: String,
    },
    #[error("Isotope {0} was given more than one column")]
    DuplicateIsotope(IsotopeLabel),
    #[error("Failed to build the thread pool: {0}")]
    ThreadPoolError(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
}

fn default_output_file() -> PathBuf {
    PathBuf::from("-")
}

fn default_skip_rows() -> Vec<usize> {
    vec![0]
}

fn default_threshold() -> String {
    "0.99MIN".to_string()
}

fn default_threads() -> i32 {
    -1
}

/// Natural isotope abundance correction of stable isotope labeled intensities.
///
/// Read a CSV table of isotopologue intensities, correct each group of peaks
/// for natural abundance, and write the table back out with the results
/// appended as new columns.
#[derive(Parser, Debug, Deserialize, Serialize)]
#[command(author, version)]
pub struct MZNatCorrer {
    /// The path to read the input table from, or if '-' is passed, read from STDIN.
    ///
    /// Paths ending in `.gz` are decompressed.
    #[arg()]
    pub input_file: PathBuf,

    /// The path to write the output table to, or if '-' is passed, write to STDOUT.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mznatcorrer.toml` in the working directory.
    /// Environment variables prefixed with `MZNATCORRER_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The column holding the molecular formula, counting from 0
    #[arg(short = 'f', long = "formula-column")]
    pub formula_column: usize,

    /// The columns whose values together identify a group of peaks, counting from 0
    #[arg(
        short = 'g',
        long = "group-columns",
        value_delimiter = ',',
        required = true
    )]
    pub group_columns: Vec<usize>,

    /// The column holding the label count for an isotope, denoted ISOTOPE=COLUMN, e.g. 13C=3
    #[arg(
        short = 'i',
        long = "isotope-column",
        value_name = "ISOTOPE=COLUMN",
        required = true
    )]
    pub isotope_columns: Vec<IsotopeColumn>,

    /// The column holding the measured intensity, counting from 0
    #[arg(short = 'y', long = "intensity-column")]
    pub intensity_column: usize,

    /// Rows of the input table that are not peaks, such as the header
    #[arg(long = "skip-rows", value_delimiter = ',', default_value = "0")]
    #[serde(default = "default_skip_rows")]
    pub skip_rows: Vec<usize>,

    /// The minimum intensity a predicted but unobserved peak must reach to be reported
    #[arg(
        short = 'T',
        long = "threshold",
        default_value = "0.99MIN",
        long_help = r#"The minimum intensity a predicted but unobserved peak must reach to be reported

Either a number, or a fraction followed by a statistic of the peak set:
MAX, MIN or AVG, or of the whole analysis: GMAX, GMIN, GAVG, and GAMAX
or GAMIN, the average of the maximum or minimum of each peak set.
For example, 0.99MIN is 99% of the smallest positive peak in a set.
"#
    )]
    #[serde(default = "default_threshold")]
    pub threshold: String,

    /// The result columns to append to the output table
    #[arg(
        short = 'c',
        long = "output-columns",
        value_delimiter = ',',
        default_value = "predicted,corrected,renormalized,total-na-removed,comments"
    )]
    #[serde(default = "OutputColumn::default_columns")]
    pub output_columns: Vec<OutputColumn>,

    /// Stop refining a correction after this many iterations
    #[arg(short = 'm', long = "max-iterations")]
    pub max_iterations: Option<usize>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
    )]
    #[serde(default = "default_threads")]
    pub threads: i32,

    /// A path to write the full results of every peak set to as JSON
    #[arg(short = 'j', long = "json-output")]
    pub json_output: Option<PathBuf>,
}

impl MZNatCorrer {
    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZNatCorrerError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism().map_or(1, |n| n.get())
        };
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }

    pub fn column_layout(&self) -> ColumnLayout {
        ColumnLayout {
            formula_column: self.formula_column,
            group_columns: self.group_columns.clone(),
            isotope_columns: self.isotope_columns.clone(),
            intensity_column: self.intensity_column,
        }
    }

    /// Build the [`AnalysisConfig`], rejecting an isotope that was given more than one column
    pub fn analysis_config(&self) -> Result<AnalysisConfig, MZNatCorrerError> {
        let mut isotopes: Vec<IsotopeLabel> = Vec::with_capacity(self.isotope_columns.len());
        for col in self.isotope_columns.iter() {
            if isotopes.contains(&col.isotope) {
                return Err(MZNatCorrerError::DuplicateIsotope(col.isotope));
            }
            isotopes.push(col.isotope);
        }
        Ok(AnalysisConfig {
            isotopes,
            threshold: Threshold::parse(&self.threshold),
            max_iterations: self.max_iterations,
        })
    }

    /// Feed every row of `grid` that is not skipped to `analysis`.
    ///
    /// Returns the number of rows accepted.
    fn ingest(
        &self,
        grid: &CellGrid,
        layout: &ColumnLayout,
        analysis: &mut Analysis,
    ) -> Result<usize, MZNatCorrerError> {
        let mut accepted = 0;
        for (i, cells) in grid.rows() {
            if self.skip_rows.contains(&i) {
                continue;
            }
            match analysis.ingest(layout.peak_row(i, cells)?) {
                Ok(()) => accepted += 1,
                Err(AnalysisError::Peak(e)) => {
                    debug!("Row {i} rejected: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(accepted)
    }

    pub fn main(&self) -> Result<(), MZNatCorrerError> {
        info!(
            "mznatcorrer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file.display());
        info!("Output: {}", self.output_file.display());
        let start = Instant::now();

        let config = self.analysis_config()?;
        if let Threshold::Unparsed(text) = &config.threshold {
            warn!("Threshold {text:?} is not a number or a known statistic");
        }
        let layout = self.column_layout();
        let mut grid = CellGrid::read_path(&self.input_file)?;
        let mut analysis = Analysis::new(config);

        let accepted = self.ingest(&grid, &layout, &mut analysis)?;
        analysis.initialize()?;
        self.create_threadpool()?
            .install(|| analysis.correct_all().map(|_| ()))?;

        append_results(&mut grid, &analysis, &layout, &self.output_columns);
        grid.write_path(&self.output_file)?;
        if let Some(path) = self.json_output.as_ref() {
            write_json(&analysis, path)?;
        }

        info!("Peak Sets: {}", analysis.peak_sets().len());
        info!("Accepted Peaks: {accepted}");
        info!("Rejected Peaks: {}", analysis.rejected_peaks().len());
        info!("Skipped Sets: {}", analysis.set_diagnostics().len());
        info!("Elapsed Time: {:0.3?}", start.elapsed());
        Ok(())
    }
}
