use std::collections::HashMap;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use itertools::Itertools;
use tracing::{debug, instrument};

use mznatcorr::{Analysis, PeakResult, SetReport};

use crate::args::OutputColumn;
use crate::driver::MZNatCorrerError;
use crate::ingest::{CellGrid, ColumnLayout};

pub const UNOBSERVED_INTENSITY: &str = "not observed";
pub const UNOBSERVED_NOTE: &str =
    "Note: A value for this peak was predicted but not found in the original data";

fn fill_unobserved(
    grid: &mut CellGrid,
    row: usize,
    layout: &ColumnLayout,
    report: &SetReport,
    peak: &PeakResult,
) {
    for (column, value) in layout.group_columns.iter().zip(report.key.values()) {
        grid.set(row, *column, value.as_str());
    }
    grid.set(row, layout.intensity_column, UNOBSERVED_INTENSITY);
    grid.set(row, layout.formula_column, report.formula.as_str());
    for (isotope, count) in report.label_order.iter().zip(peak.coordinate.iter()) {
        if let Some(column) = layout.isotope_column(*isotope) {
            grid.set(row, column, count.to_string());
        }
    }
}

fn peak_value(
    column: OutputColumn,
    report: &SetReport,
    peak: &PeakResult,
    comment: &str,
) -> String {
    match column {
        OutputColumn::Predicted => peak.predicted.to_string(),
        OutputColumn::Corrected => peak.corrected.to_string(),
        OutputColumn::Renormalized => peak.renormalized.to_string(),
        OutputColumn::Percentage => peak.percentage.to_string(),
        OutputColumn::TotalNaRemoved => report.summary.total_na_removed.to_string(),
        OutputColumn::Iterations => report.summary.iterations.to_string(),
        OutputColumn::CpuTime => report.summary.cpu_time.to_string(),
        OutputColumn::AcceptedPredictions => report.summary.accepted_predictions.to_string(),
        OutputColumn::SampleGroupKey => report.key.to_string(),
        OutputColumn::Comments => comment.to_string(),
    }
}

/// Append the requested result columns to `grid`.
///
/// Column headers go in the first row after the right-most existing column.
/// Peaks that were read from the table are written on their source row, even
/// when their measured intensity was zero. Accepted predictions for peaks that
/// were never read are appended as new rows. Rejected peaks
/// receive their group key and error comment.
#[instrument(level = "debug", skip_all)]
pub fn append_results(
    grid: &mut CellGrid,
    analysis: &Analysis,
    layout: &ColumnLayout,
    columns: &[OutputColumn],
) {
    let first = grid.max_column().map_or(0, |c| c + 1);
    let positions: HashMap<OutputColumn, usize> = columns
        .iter()
        .unique()
        .enumerate()
        .map(|(i, c)| (*c, first + i))
        .collect();
    for (column, position) in positions.iter() {
        grid.set(0, *position, column.header());
    }

    let mut appended = 0;
    for report in analysis.results().values() {
        for peak in report.summary.peaks.iter() {
            let annotated = report
                .annotation(&peak.coordinate)
                .and_then(|a| a.source_row.map(|r| (r, a.comment.as_deref().unwrap_or(""))));
            let (row, comment) = match annotated {
                Some(found) => found,
                None if peak.unobserved => {
                    let row = grid.num_rows();
                    fill_unobserved(grid, row, layout, report, peak);
                    appended += 1;
                    (row, UNOBSERVED_NOTE)
                }
                None => continue,
            };
            for (column, position) in positions.iter() {
                grid.set(row, *position, peak_value(*column, report, peak, comment));
            }
        }
    }

    for rejected in analysis.rejected_peaks() {
        let Some(row) = rejected.peak.source_row() else {
            continue;
        };
        if let Some(position) = positions.get(&OutputColumn::SampleGroupKey) {
            grid.set(row, *position, rejected.group.to_string());
        }
        if let Some(position) = positions.get(&OutputColumn::Comments) {
            grid.set(row, *position, rejected.peak.comment().unwrap_or(""));
        }
    }
    debug!("Appended {appended} rows for unobserved peaks");
}

/// Write every [`SetReport`] of `analysis` to `path` as a JSON array
pub fn write_json(analysis: &Analysis, path: &Path) -> Result<(), MZNatCorrerError> {
    let reports: Vec<&SetReport> = analysis.results().values().collect();
    let mut handle = io::BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer_pretty(&mut handle, &reports)?;
    handle.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use mznatcorr::{AnalysisConfig, GroupKey, IsotopeLabel, PeakRow, Threshold};

    use super::*;

    #[test]
    fn test_append_results() {
        let text = "group,formula,c13,intensity\nlac,C3H6O3,0,9000\nlac,C3H6O3,3,4000\nlac,C3H6O3,3,10\n";
        let mut grid = CellGrid::from_reader(text.as_bytes()).unwrap();
        let layout = ColumnLayout {
            formula_column: 1,
            group_columns: vec![0],
            isotope_columns: vec!["13C=2".parse().unwrap()],
            intensity_column: 3,
        };
        let mut analysis = Analysis::new(AnalysisConfig {
            threshold: Threshold::Literal(100.0),
            ..Default::default()
        });
        let rows: Vec<_> = grid
            .rows()
            .skip(1)
            .map(|(i, cells)| layout.peak_row(i, cells).unwrap())
            .collect();
        for row in rows {
            let _ = analysis.ingest(row);
        }
        analysis
            .ingest(PeakRow {
                group: GroupKey::new(["lac"]),
                intensity: 1.0,
                counts: HashMap::from([(IsotopeLabel::C13, 2)]),
                formula: "C3H6O3".into(),
                source_row: None,
            })
            .unwrap();
        analysis.initialize().unwrap();
        analysis.correct_all().unwrap();

        append_results(&mut grid, &analysis, &layout, &OutputColumn::default_columns());
        assert_eq!(grid.get(0, 4), Some("Predicted"));
        assert_eq!(grid.get(0, 7), Some("Total NA Removed"));
        assert_eq!(grid.get(0, 8), Some("Comments"));
        assert!(grid.get(1, 5).is_some());
        assert!(grid
            .get(3, 8)
            .is_some_and(|c| c.starts_with("Error: duplicated")));
        // The M+1 prediction is appended after the input rows
        assert_eq!(grid.num_rows(), 5);
        assert_eq!(grid.get(4, 0), Some("lac"));
        assert_eq!(grid.get(4, 2), Some("1"));
        assert_eq!(grid.get(4, 3), Some(UNOBSERVED_INTENSITY));
        assert_eq!(grid.get(4, 8), Some(UNOBSERVED_NOTE));
    }

    #[test]
    fn test_zero_intensity_row_written_in_place() {
        let text = "group,formula,c13,intensity\nlac,C3H6O3,0,9000\nlac,C3H6O3,1,0\n";
        let mut grid = CellGrid::from_reader(text.as_bytes()).unwrap();
        let layout = ColumnLayout {
            formula_column: 1,
            group_columns: vec![0],
            isotope_columns: vec!["13C=2".parse().unwrap()],
            intensity_column: 3,
        };
        let mut analysis = Analysis::new(AnalysisConfig {
            threshold: Threshold::Literal(1.0),
            ..Default::default()
        });
        let rows: Vec<_> = grid
            .rows()
            .skip(1)
            .map(|(i, cells)| layout.peak_row(i, cells).unwrap())
            .collect();
        for row in rows {
            analysis.ingest(row).unwrap();
        }
        analysis.initialize().unwrap();
        analysis.correct_all().unwrap();

        append_results(&mut grid, &analysis, &layout, &OutputColumn::default_columns());
        // M+1 was measured as 0, so its results go on row 2 and no row is appended for it
        assert!(grid.get(2, 4).is_some_and(|c| c.parse::<f64>().unwrap() > 0.0));
        assert_eq!(grid.get(2, 8), Some(""));
        let m1_rows = grid
            .rows()
            .filter(|(_, cells)| cells.get(2).map(|s| s.as_str()) == Some("1"))
            .count();
        assert_eq!(m1_rows, 1);
        assert_eq!(grid.get(2, 3), Some("0"));
    }
}
