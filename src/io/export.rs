//! CSV exports of conversion results.
//!
//! Long format (one row per sample) so spreadsheets and plotting scripts can
//! pivot on `fluence` themselves.

use std::fs::File;
use std::path::Path;

use serde::Serialize;

use crate::domain::{ConductivityTrace, FomTable, TraceFrame};
use crate::error::{Result, TrmcError};

#[derive(Debug, Serialize)]
struct ConductivityRow {
    fluence: f64,
    time_s: f64,
    conductivity: f64,
}

/// Write every conductivity trace as `fluence,time_s,conductivity` rows.
pub fn write_conductivity_csv(path: &Path, traces: &[(f64, ConductivityTrace)]) -> Result<()> {
    let file = File::create(path).map_err(|e| TrmcError::io(path, e))?;
    let mut writer = csv::Writer::from_writer(file);
    for (fluence, trace) in traces {
        for (&time_s, &conductivity) in trace.time().iter().zip(trace.conductivity()) {
            writer.serialize(ConductivityRow {
                fluence: *fluence,
                time_s,
                conductivity,
            })?;
        }
    }
    writer.flush().map_err(|e| TrmcError::io(path, e))?;
    Ok(())
}

/// Write the per-fluence table as `fluence,max_conductivity,fom` rows.
pub fn write_fom_csv(path: &Path, table: &FomTable) -> Result<()> {
    let file = File::create(path).map_err(|e| TrmcError::io(path, e))?;
    let mut writer = csv::Writer::from_writer(file);
    for row in &table.rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| TrmcError::io(path, e))?;
    Ok(())
}

/// Write a frame as `time_s,<name_0>,<name_1>,...`.
pub fn write_frame_csv(path: &Path, frame: &TraceFrame, names: &[String]) -> Result<()> {
    if names.len() != frame.columns().len() {
        return Err(TrmcError::InvalidInput(format!(
            "{} column names for {} columns",
            names.len(),
            frame.columns().len()
        )));
    }
    let file = File::create(path).map_err(|e| TrmcError::io(path, e))?;
    let mut writer = csv::Writer::from_writer(file);

    let mut header = vec!["time_s".to_string()];
    header.extend(names.iter().cloned());
    writer.write_record(&header)?;

    for (i, t) in frame.time().iter().enumerate() {
        let mut record = vec![t.to_string()];
        record.extend(frame.columns().iter().map(|col| col[i].to_string()));
        writer.write_record(&record)?;
    }
    writer.flush().map_err(|e| TrmcError::io(path, e))?;
    Ok(())
}
