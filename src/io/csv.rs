//! Delimited table reading for count matrices and sample metadata

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array2;

use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{AnalysisError, Result};

/// A parsed table: the first column holds row labels, the first row holds
/// column labels. The header cell above the row labels is dropped.
#[derive(Debug, Clone)]
pub struct Table {
    pub columns: Vec<String>,
    pub row_labels: Vec<String>,
    pub cells: Vec<Vec<String>>,
}

/// Supported layouts, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableFormat {
    Csv { gzip: bool },
    Tsv { gzip: bool },
}

impl TableFormat {
    fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".csv") {
            Ok(TableFormat::Csv { gzip: false })
        } else if name.ends_with(".csv.gz") {
            Ok(TableFormat::Csv { gzip: true })
        } else if name.ends_with(".tsv") {
            Ok(TableFormat::Tsv { gzip: false })
        } else if name.ends_with(".tsv.gz") {
            Ok(TableFormat::Tsv { gzip: true })
        } else {
            Err(AnalysisError::InvalidFileFormat {
                reason: format!(
                    "unsupported file '{}': expected .csv, .tsv, .csv.gz or .tsv.gz",
                    path.display()
                ),
            })
        }
    }

    fn delimiter(self) -> u8 {
        match self {
            TableFormat::Csv { .. } => b',',
            TableFormat::Tsv { .. } => b'\t',
        }
    }

    fn is_gzip(self) -> bool {
        match self {
            TableFormat::Csv { gzip } | TableFormat::Tsv { gzip } => gzip,
        }
    }
}

/// Read a `.csv`, `.tsv`, `.csv.gz` or `.tsv.gz` table.
/// Any other extension is an [`AnalysisError::InvalidFileFormat`].
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<Table> {
    let path = path.as_ref();
    let format = TableFormat::from_path(path)?;
    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = if format.is_gzip() {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    parse_table(reader, format.delimiter(), &path.display().to_string())
}

fn parse_table<R: Read>(reader: R, delimiter: u8, source: &str) -> Result<Table> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let header = csv_reader.headers().map_err(|e| invalid_format(source, e))?.clone();
    if header.len() < 2 {
        return Err(AnalysisError::InvalidFileFormat {
            reason: format!("{}: need a row-label column and at least one data column", source),
        });
    }
    let columns: Vec<String> = header.iter().skip(1).map(str::to_string).collect();

    let mut row_labels = Vec::new();
    let mut cells = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|e| invalid_format(source, e))?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let mut fields = record.iter();
        row_labels.push(fields.next().unwrap_or_default().to_string());
        cells.push(fields.map(str::to_string).collect());
    }

    if row_labels.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: format!("{} has a header but no rows", source),
        });
    }

    Ok(Table {
        columns,
        row_labels,
        cells,
    })
}

fn invalid_format(source: &str, e: csv::Error) -> AnalysisError {
    AnalysisError::InvalidFileFormat {
        reason: format!("{}: {}", source, e),
    }
}

fn is_missing(cell: &str) -> bool {
    cell.is_empty() || cell.eq_ignore_ascii_case("na") || cell.eq_ignore_ascii_case("nan")
}

/// Read a count matrix: genes as rows, samples as columns.
///
/// Empty and `NA` cells become missing values. Negative or non-numeric
/// cells are rejected with the offending gene and sample named.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let table = read_table(path)?;
    count_matrix_from_table(table)
}

fn count_matrix_from_table(table: Table) -> Result<CountMatrix> {
    let n_genes = table.row_labels.len();
    let n_samples = table.columns.len();
    let mut counts = Array2::zeros((n_genes, n_samples));

    for (i, row) in table.cells.iter().enumerate() {
        for (j, cell) in row.iter().enumerate() {
            counts[[i, j]] = if is_missing(cell) {
                f64::NAN
            } else {
                match cell.parse::<f64>() {
                    Ok(v) if v >= 0.0 && v.is_finite() => v,
                    _ => {
                        return Err(AnalysisError::InvalidFileFormat {
                            reason: format!(
                                "count for gene '{}' in sample '{}' is not a non-negative number: '{}'",
                                table.row_labels[i], table.columns[j], cell
                            ),
                        })
                    }
                }
            };
        }
    }

    CountMatrix::new(counts, table.row_labels, table.columns)
}

/// Read sample metadata: samples as rows, one column per annotation.
///
/// Columns keep file order. A column whose non-missing cells all parse as
/// numbers is stored as continuous; anything else is categorical.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<SampleMetadata> {
    let table = read_table(path)?;
    metadata_from_table(table)
}

fn metadata_from_table(table: Table) -> Result<SampleMetadata> {
    let mut metadata = SampleMetadata::new(table.row_labels)?;

    for (j, name) in table.columns.iter().enumerate() {
        let raw: Vec<&str> = table.cells.iter().map(|row| row[j].as_str()).collect();
        let numeric: Option<Vec<f64>> = raw
            .iter()
            .map(|cell| {
                if is_missing(cell) {
                    Some(f64::NAN)
                } else {
                    cell.parse::<f64>().ok()
                }
            })
            .collect();

        match numeric {
            Some(values) if values.iter().any(|v| !v.is_nan()) => {
                metadata.add_continuous(name, values)?
            }
            _ => metadata.add_condition(name, raw.iter().map(|s| s.to_string()).collect())?,
        }
    }

    Ok(metadata)
}
