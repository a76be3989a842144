use std::collections::HashMap;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use mznatcorr::{GroupKey, PeakRow};

use crate::args::IsotopeColumn;
use crate::driver::MZNatCorrerError;

fn is_gzipped(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// A ragged table of text cells, as read from a CSV file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellGrid {
    rows: Vec<Vec<String>>,
    max_column: Option<usize>,
}

impl CellGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, MZNatCorrerError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        let mut grid = Self::new();
        for record in reader.records() {
            let record = record?;
            grid.push_row(record.iter().map(String::from).collect());
        }
        Ok(grid)
    }

    /// Read a CSV file from `path`, or from STDIN if `path` is `-`.
    ///
    /// Paths ending in `.gz` are decompressed.
    pub fn read_path(path: &Path) -> Result<Self, MZNatCorrerError> {
        if path == Path::new("-") {
            return Self::from_reader(io::stdin().lock());
        }
        let handle = io::BufReader::new(fs::File::open(path)?);
        let grid = if is_gzipped(path) {
            Self::from_reader(GzDecoder::new(handle))?
        } else {
            Self::from_reader(handle)?
        };
        debug!(
            "Read {} rows from {}",
            grid.num_rows(),
            path.display()
        );
        Ok(grid)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), MZNatCorrerError> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(writer);
        for row in self.rows.iter() {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the table to `path`, or to STDOUT if `path` is `-`.
    ///
    /// Paths ending in `.gz` are compressed.
    pub fn write_path(&self, path: &Path) -> Result<(), MZNatCorrerError> {
        if path == Path::new("-") {
            return self.write_to(io::stdout().lock());
        }
        let handle = io::BufWriter::new(fs::File::create(path)?);
        if is_gzipped(path) {
            let mut encoder = GzEncoder::new(handle, Compression::best());
            self.write_to(&mut encoder)?;
            encoder.finish()?.flush()?;
        } else {
            self.write_to(handle)?;
        }
        Ok(())
    }

    fn push_row(&mut self, row: Vec<String>) {
        if let Some(last) = row.len().checked_sub(1) {
            self.max_column = Some(self.max_column.map_or(last, |m| m.max(last)));
        }
        self.rows.push(row);
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// The index of the right-most column of any row
    pub fn max_column(&self) -> Option<usize> {
        self.max_column
    }

    pub fn rows(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.rows.iter().enumerate().map(|(i, r)| (i, r.as_slice()))
    }

    pub fn get(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|s| s.as_str())
    }

    /// Set a cell, padding the table with empty rows and cells as needed
    pub fn set(&mut self, row: usize, column: usize, value: impl Into<String>) {
        if row >= self.rows.len() {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if column >= cells.len() {
            cells.resize(column + 1, String::new());
        }
        cells[column] = value.into();
        self.max_column = Some(self.max_column.map_or(column, |m| m.max(column)));
    }
}

/// Where each field of a peak is found in a row of the input table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub formula_column: usize,
    pub group_columns: Vec<usize>,
    pub isotope_columns: Vec<IsotopeColumn>,
    pub intensity_column: usize,
}

impl ColumnLayout {
    pub fn isotope_column(&self, isotope: mznatcorr::IsotopeLabel) -> Option<usize> {
        self.isotope_columns
            .iter()
            .find(|c| c.isotope == isotope)
            .map(|c| c.column)
    }

    fn cell<'a>(
        &self,
        row: usize,
        cells: &'a [String],
        column: usize,
    ) -> Result<&'a str, MZNatCorrerError> {
        cells
            .get(column)
            .map(|s| s.trim())
            .ok_or(MZNatCorrerError::MissingColumn { row, column })
    }

    /// Extract a [`PeakRow`] from the cells of row `row`
    pub fn peak_row(&self, row: usize, cells: &[String]) -> Result<PeakRow, MZNatCorrerError> {
        let group = self
            .group_columns
            .iter()
            .map(|c| self.cell(row, cells, *c))
            .collect::<Result<Vec<_>, _>>()?;

        let intensity_text = self.cell(row, cells, self.intensity_column)?;
        let intensity = intensity_text
            .parse()
            .map_err(|_| MZNatCorrerError::InvalidCell {
                row,
                column: self.intensity_column,
                value: intensity_text.to_string(),
            })?;

        let mut counts = HashMap::with_capacity(self.isotope_columns.len());
        for col in self.isotope_columns.iter() {
            let text = self.cell(row, cells, col.column)?;
            let count = text.parse().map_err(|_| MZNatCorrerError::InvalidCell {
                row,
                column: col.column,
                value: text.to_string(),
            })?;
            counts.insert(col.isotope, count);
        }

        Ok(PeakRow {
            group: GroupKey::new(group),
            intensity,
            counts,
            formula: self.cell(row, cells, self.formula_column)?.to_string(),
            source_row: Some(row),
        })
    }
}
