use std::{io::Cursor, path::Path};

use calamine::{Data, Reader, open_workbook_auto};
use chrono::{NaiveDate, TimeDelta};
use itertools::Itertools;
use polars::{
    frame::DataFrame,
    prelude::{
        Column, CsvEncoding, CsvReadOptions, LazyCsvReader, LazyFileListReader, PlPath,
        SerReader,
    },
};
use tracing::debug;

use crate::{
    data::raw::RawTable,
    error::{ChurnResult, IoError},
};

/// Column added by [`read_excel`] holding the sheet each row came from.
pub const SHEET_NAME: &str = "sheet_name";

/// Reads a `.csv`, `.xls` or `.xlsx` file, dispatching on the extension.
///
/// # Errors
/// - [`IoError::UnsupportedFormat`] for any other extension.
pub fn read_table(path: impl AsRef<Path>) -> ChurnResult<RawTable> {
    let path = path.as_ref();
    match extension(path).as_deref() {
        Some("csv") => read_csv(path),
        Some("xls" | "xlsx") => read_excel(path),
        _ => Err(IoError::UnsupportedFormat(source_name(path)).into()),
    }
}

/// Reads a CSV export into a [`RawTable`] named after the file.
///
/// Every column is read as text; typing happens during cleaning so that a
/// malformed cell drops a single row instead of failing the whole file.
/// Invalid UTF-8 sequences are replaced rather than rejected.
///
/// # Errors
/// - [`IoError::UnsupportedFormat`] if the file does not carry a `.csv` extension.
/// - [`IoError::ParseFailure`] if the file cannot be read as CSV.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_csv(path: impl AsRef<Path>) -> ChurnResult<RawTable> {
    let path = path.as_ref();
    let name = source_name(path);

    if extension(path).as_deref() != Some("csv") {
        return Err(IoError::UnsupportedFormat(name).into());
    }

    let location = path.to_str().ok_or_else(|| IoError::ParseFailure {
        source_name: name.clone(),
        reason: "Path is not valid UTF-8".to_string(),
    })?;

    let df = LazyCsvReader::new(PlPath::new(location))
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_encoding(CsvEncoding::LossyUtf8)
        .finish()
        .and_then(|lf| lf.collect())
        .map_err(|e| IoError::ParseFailure {
            source_name: name.clone(),
            reason: e.to_string(),
        })?;

    debug!(rows = df.height(), columns = df.width(), "Loaded CSV");
    Ok(RawTable::new(name, df))
}

/// Reads CSV content already held in memory (e.g. an upload).
pub fn read_csv_bytes(name: impl Into<String>, bytes: Vec<u8>) -> ChurnResult<RawTable> {
    let name = name.into();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|o| o.with_encoding(CsvEncoding::LossyUtf8))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .map_err(|e| IoError::ParseFailure {
            source_name: name.clone(),
            reason: e.to_string(),
        })?;

    debug!(table = %name, rows = df.height(), "Loaded CSV from memory");
    Ok(RawTable::new(name, df))
}

/// Reads every sheet of a workbook into one [`RawTable`].
///
/// Sheets are stacked in workbook order under the union of their headers
/// (first row of each sheet), in order of first appearance. Cells a sheet
/// lacks are null. A [`SHEET_NAME`] column records where each row came from.
/// Like [`read_csv`], every cell is kept as text.
///
/// # Errors
/// - [`IoError::UnsupportedFormat`] unless the file ends in `.xls` or `.xlsx`.
/// - [`IoError::ParseFailure`] if the workbook or one of its sheets cannot be read.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_excel(path: impl AsRef<Path>) -> ChurnResult<RawTable> {
    let path = path.as_ref();
    let name = source_name(path);
    if !matches!(extension(path).as_deref(), Some("xls" | "xlsx")) {
        return Err(IoError::UnsupportedFormat(name).into());
    }

    let parse_failure = |reason: String| IoError::ParseFailure {
        source_name: name.clone(),
        reason,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| parse_failure(e.to_string()))?;
    let mut sheets = Vec::new();
    for sheet in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| parse_failure(format!("sheet '{sheet}': {e}")))?;
        let mut rows = range.rows();
        let Some(header) = rows.next() else {
            debug!(%sheet, "Skipping empty sheet");
            continue;
        };
        let header = sheet_header(header);
        let body = rows
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        debug!(%sheet, rows = body.len(), "Loaded sheet");
        sheets.push((sheet, header, body));
    }

    let columns = sheets
        .iter()
        .flat_map(|(_, header, _)| header.iter())
        .unique()
        .cloned()
        .collect::<Vec<_>>();

    let mut values = vec![Vec::<Option<String>>::new(); columns.len()];
    let mut origin = Vec::new();
    for (sheet, header, body) in &sheets {
        let positions = columns
            .iter()
            .map(|c| header.iter().position(|h| h == c))
            .collect::<Vec<_>>();
        for row in body {
            for (out, pos) in values.iter_mut().zip(&positions) {
                out.push(pos.and_then(|p| row.get(p).cloned().flatten()));
            }
            origin.push(sheet.clone());
        }
    }

    let mut frame = columns
        .into_iter()
        .zip(values)
        .map(|(c, v)| Column::new(c.into(), v))
        .collect::<Vec<_>>();
    frame.push(Column::new(SHEET_NAME.into(), origin));
    let df = DataFrame::new(frame).map_err(|e| parse_failure(e.to_string()))?;

    debug!(rows = df.height(), columns = df.width(), sheets = sheets.len(), "Loaded workbook");
    Ok(RawTable::new(name, df))
}

/// Header cells as column names. Blank names become `unnamed_<i>` and repeats
/// get a `_<n>` suffix, which the cleaner later coalesces.
fn sheet_header(cells: &[Data]) -> Vec<String> {
    let mut seen = Vec::<String>::with_capacity(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        let base = match cell_text(cell) {
            Some(text) if !text.trim().is_empty() => text,
            _ => format!("unnamed_{i}"),
        };
        let mut candidate = base.clone();
        let mut n = 1;
        while seen.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        seen.push(candidate);
    }
    seen
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::DateTime(dt) => excel_serial_to_text(dt.as_f64()),
        other => Some(other.to_string()),
    }
}

/// Formats an Excel serial date (days since 1899-12-30) to the second.
fn excel_serial_to_text(serial: f64) -> Option<String> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round();
    if !seconds.is_finite() {
        return None;
    }
    // Bounded by the finite check; out-of-range values fail below.
    let offset = TimeDelta::try_seconds(seconds as i64)?;
    epoch
        .checked_add_signed(offset)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}
