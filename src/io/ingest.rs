//! CSV ingest for sweeps and transients.
//!
//! Input is any headered numeric CSV. Columns are picked by header name
//! (case-insensitive) or zero-based index; everything else is ignored.
//!
//! Rows with an unparsable or missing value in a selected column are skipped and
//! reported in [`IngestReport::row_errors`]; a file with no usable rows is an
//! [`TrmcError::EmptyTrace`].

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use csv::StringRecord;
use tracing::{debug, warn};

use crate::domain::{Sweep, TraceFrame, VoltageTrace};
use crate::error::{Result, TrmcError};

/// A CSV column selected by header name or position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Name(String),
    Index(usize),
}

impl FromStr for ColumnRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().parse::<usize>() {
            Ok(i) => ColumnRef::Index(i),
            Err(_) => ColumnRef::Name(s.trim().to_string()),
        })
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Name(name) => write!(f, "'{name}'"),
            ColumnRef::Index(i) => write!(f, "#{i}"),
        }
    }
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub rows_read: usize,
    pub rows_used: usize,
    pub row_errors: Vec<RowError>,
}

/// Selected columns, in selection order, restricted to rows where every one parsed.
#[derive(Debug, Clone)]
pub struct IngestedColumns {
    pub columns: Vec<Vec<f64>>,
    pub report: IngestReport,
}

/// Read the selected columns of a CSV file.
pub fn read_columns(path: &Path, selection: &[ColumnRef]) -> Result<IngestedColumns> {
    let file = File::open(path).map_err(|e| TrmcError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(file);

    let headers = reader.headers()?.clone();
    let indices = resolve_columns(&headers, selection)?;

    let mut columns = vec![Vec::new(); indices.len()];
    let mut report = IngestReport::default();

    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header line; CSV lines are 1-based.
        let line = idx + 2;
        report.rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                report.row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &indices) {
            Ok(values) => {
                for (col, v) in columns.iter_mut().zip(values) {
                    col.push(v);
                }
                report.rows_used += 1;
            }
            Err(message) => report.row_errors.push(RowError { line, message }),
        }
    }

    if !report.row_errors.is_empty() {
        warn!(
            path = %path.display(),
            skipped = report.row_errors.len(),
            "skipped malformed CSV rows"
        );
    }
    if report.rows_used == 0 {
        return Err(TrmcError::empty_trace(format!("no usable rows in '{}'", path.display())));
    }
    debug!(path = %path.display(), rows = report.rows_used, "CSV ingested");

    Ok(IngestedColumns { columns, report })
}

/// Load a `(frequency, reflectivity)` sweep.
pub fn load_sweep(path: &Path, frequency: &ColumnRef, value: &ColumnRef) -> Result<(Sweep, IngestReport)> {
    let data = read_columns(path, &[frequency.clone(), value.clone()])?;
    let mut cols = data.columns.into_iter();
    let (f, v) = (cols.next().unwrap_or_default(), cols.next().unwrap_or_default());
    Ok((Sweep::new(f, v)?, data.report))
}

/// Load a `(time, voltage)` transient.
pub fn load_trace(path: &Path, time: &ColumnRef, voltage: &ColumnRef) -> Result<(VoltageTrace, IngestReport)> {
    let data = read_columns(path, &[time.clone(), voltage.clone()])?;
    let mut cols = data.columns.into_iter();
    let (t, v) = (cols.next().unwrap_or_default(), cols.next().unwrap_or_default());
    Ok((VoltageTrace::new(t, v)?, data.report))
}

/// Load a time column plus several data columns sharing it.
pub fn load_frame(path: &Path, time: &ColumnRef, data_columns: &[ColumnRef]) -> Result<(TraceFrame, IngestReport)> {
    let mut selection = Vec::with_capacity(data_columns.len() + 1);
    selection.push(time.clone());
    selection.extend_from_slice(data_columns);
    let data = read_columns(path, &selection)?;
    let mut cols = data.columns.into_iter();
    let t = cols.next().unwrap_or_default();
    Ok((TraceFrame::new(t, cols.collect())?, data.report))
}

fn resolve_columns(headers: &StringRecord, selection: &[ColumnRef]) -> Result<Vec<usize>> {
    let header_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect();

    selection
        .iter()
        .map(|col| match col {
            ColumnRef::Index(i) if *i < headers.len() => Ok(*i),
            ColumnRef::Index(i) => Err(TrmcError::InvalidInput(format!(
                "column #{i} out of range: CSV has {} columns",
                headers.len()
            ))),
            ColumnRef::Name(name) => header_map
                .get(&normalize_header_name(name))
                .copied()
                .ok_or_else(|| TrmcError::InvalidInput(format!("missing CSV column: `{name}`"))),
        })
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn parse_row(record: &StringRecord, indices: &[usize]) -> std::result::Result<Vec<f64>, String> {
    indices
        .iter()
        .map(|&i| {
            let raw = record.get(i).ok_or_else(|| format!("missing column #{i}"))?;
            raw.parse::<f64>()
                .map_err(|_| format!("column #{i}: '{raw}' is not a number"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_csv(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("trmc_ingest_{}_{name}.csv", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn column_refs_parse_as_index_or_name() {
        assert_eq!("2".parse::<ColumnRef>().unwrap(), ColumnRef::Index(2));
        assert_eq!(" Freq ".parse::<ColumnRef>().unwrap(), ColumnRef::Name("Freq".into()));
    }

    #[test]
    fn sweep_by_header_name_skips_bad_rows() {
        let path = temp_csv(
            "sweep",
            "\u{feff}Frequency (Hz),R,phase\n8.9e9,0.9,1\n9.0e9,oops,2\n9.0e9,0.2,3\n9.1e9,0.9,4\n",
        );
        let (sweep, report) = load_sweep(
            &path,
            &ColumnRef::Name("frequency (hz)".into()),
            &ColumnRef::Name("r".into()),
        )
        .unwrap();
        assert_eq!(sweep.len(), 3);
        assert_eq!(sweep.argmin(), 1);
        assert_eq!(report.rows_read, 4);
        assert_eq!(report.row_errors.len(), 1);
        assert_eq!(report.row_errors[0].line, 3);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn trace_by_index() {
        let path = temp_csv("trace", "t,a,b\n0,1,10\n1e-9,2,20\n2e-9,3,30\n");
        let (trace, _) = load_trace(&path, &ColumnRef::Index(0), &ColumnRef::Index(2)).unwrap();
        assert_eq!(trace.voltage(), &[10.0, 20.0, 30.0]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn frame_keeps_selection_order() {
        let path = temp_csv("frame", "time,x,y\n0,1,10\n1,2,20\n");
        let (frame, _) = load_frame(
            &path,
            &ColumnRef::Name("time".into()),
            &[ColumnRef::Name("y".into()), ColumnRef::Name("x".into())],
        )
        .unwrap();
        assert_eq!(frame.column(0).unwrap(), &[10.0, 20.0]);
        assert_eq!(frame.column(1).unwrap(), &[1.0, 2.0]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_column_and_empty_file_are_errors() {
        let path = temp_csv("missing", "t,v\n0,1\n");
        let err = load_trace(&path, &ColumnRef::Name("time".into()), &ColumnRef::Index(1)).unwrap_err();
        assert!(matches!(err, TrmcError::InvalidInput(_)));
        let err = load_trace(&path, &ColumnRef::Index(0), &ColumnRef::Index(5)).unwrap_err();
        assert!(matches!(err, TrmcError::InvalidInput(_)));
        std::fs::remove_file(path).ok();

        let path = temp_csv("empty", "t,v\nx,y\n");
        let err = load_trace(&path, &ColumnRef::Index(0), &ColumnRef::Index(1)).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        std::fs::remove_file(path).ok();
    }
}
