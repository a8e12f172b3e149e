//! Observation tables: loading, daily reindexing and gap filling

use crate::error::{ForecastError, Result};
use chrono::{Days, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Daily table of physical variables indexed by calendar date.
///
/// Values are stored column-major; missing cells are `NaN` until the
/// table has been prepared.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    dates: Vec<NaiveDate>,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

/// CSV dialect of an uploaded observation file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    /// Field delimiter; inferred from the header when absent
    pub delimiter: Option<char>,
    /// Whether numbers use a decimal comma; defaults to true for `;` files
    pub decimal_comma: Option<bool>,
    /// Name of the date column; detected by name when absent
    pub date_column: Option<String>,
}

/// Data loader for observation files
#[derive(Debug)]
pub struct DataLoader;

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y"];
const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M",
];
const MISSING_MARKERS: [&str; 5] = ["", "nan", "na", "null", "-"];

impl DataLoader {
    /// Load a CSV file and return the prepared daily table.
    ///
    /// `today` anchors the synthetic index used when the file has no date column.
    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        options: &CsvOptions,
        today: NaiveDate,
    ) -> Result<ObservationTable> {
        let raw = Self::read_csv(path, options, today)?;
        raw.prepare()
    }

    /// Parse a CSV file into an unprepared table (unsorted, possibly with gaps)
    pub fn read_csv<P: AsRef<Path>>(
        path: P,
        options: &CsvOptions,
        today: NaiveDate,
    ) -> Result<ObservationTable> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            ForecastError::DataLoad(format!("cannot read {}: {}", path.display(), e))
        })?;
        let text = decode_text(bytes);
        Self::parse_text(&text, options, today)
            .map_err(|e| match e {
                ForecastError::DataLoad(msg) => {
                    ForecastError::DataLoad(format!("{}: {}", path.display(), msg))
                }
                other => other,
            })
    }

    /// Parse CSV text into an unprepared table
    pub fn parse_text(text: &str, options: &CsvOptions, today: NaiveDate) -> Result<ObservationTable> {
        let header_line = text
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| ForecastError::DataLoad("file is empty".to_string()))?;

        let delimiter = match options.delimiter {
            Some(d) => d,
            None => detect_delimiter(header_line),
        };
        let decimal_comma = options.decimal_comma.unwrap_or(delimiter == ';');

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let date_index = Self::detect_date_column(&headers, options.date_column.as_deref())?;
        let value_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, name)| Some(*i) != date_index && !name.is_empty())
            .map(|(i, name)| (i, name.clone()))
            .collect();

        if value_columns.is_empty() {
            return Err(ForecastError::DataLoad(
                "no value columns besides the date column".to_string(),
            ));
        }

        let mut dates = Vec::new();
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); value_columns.len()];
        let mut bad_dates = 0usize;
        let mut bad_cells = 0usize;

        for (row_number, record) in reader.records().enumerate() {
            let record = record?;
            if let Some(idx) = date_index {
                match record.get(idx).and_then(parse_date) {
                    Some(date) => dates.push(date),
                    None => {
                        bad_dates += 1;
                        debug!("Skipping row {} with unparseable date", row_number + 2);
                        continue;
                    }
                }
            }

            for (slot, (idx, _)) in value_columns.iter().enumerate() {
                let cell = record.get(*idx).unwrap_or("");
                let value = parse_number(cell, decimal_comma);
                if value.is_none() && !is_missing_marker(cell) {
                    bad_cells += 1;
                }
                values[slot].push(value.unwrap_or(f64::NAN));
            }
        }

        let rows = values[0].len();
        if rows == 0 {
            return Err(ForecastError::DataLoad("file has no data rows".to_string()));
        }
        if bad_dates > 0 {
            warn!("Dropped {} rows with unparseable dates", bad_dates);
        }
        if bad_cells > 0 {
            warn!("{} non-numeric cells treated as missing", bad_cells);
        }

        if date_index.is_none() {
            info!("No date column found, fabricating a daily index ending at {}", today);
            let start = today
                .checked_sub_days(Days::new(rows as u64 - 1))
                .ok_or_else(|| ForecastError::DataLoad("date index out of range".to_string()))?;
            dates = start.iter_days().take(rows).collect();
        }

        let columns = value_columns.into_iter().map(|(_, name)| name).collect();
        ObservationTable::new(dates, columns, values)
    }

    /// Create an unprepared table from a DataFrame with a date column
    pub fn from_dataframe(df: &DataFrame, date_column: Option<&str>) -> Result<ObservationTable> {
        let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        let date_index = Self::detect_date_column(&names, date_column)?.ok_or_else(|| {
            ForecastError::DataLoad("No time column found in data".to_string())
        })?;
        let date_name = names[date_index].clone();

        let date_col = df.column(&date_name)?;
        let dates: Vec<Option<NaiveDate>> = match date_col.dtype() {
            DataType::Date => date_col
                .date()?
                .into_iter()
                .map(|opt| opt.and_then(|days| epoch().checked_add_signed(chrono::Duration::days(days as i64))))
                .collect(),
            DataType::Utf8 => date_col.utf8()?.into_iter().map(|s| s.and_then(parse_date)).collect(),
            other => {
                return Err(ForecastError::DataLoad(format!(
                    "Column '{}' has unsupported date type {}",
                    date_name, other
                )))
            }
        };

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for name in names.iter().filter(|n| **n != date_name) {
            columns.push(name.clone());
            values.push(column_as_f64(df, name)?);
        }

        let keep: Vec<usize> = dates
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.map(|_| i))
            .collect();
        let dates: Vec<NaiveDate> = keep.iter().filter_map(|&i| dates[i]).collect();
        let values: Vec<Vec<f64>> = values
            .into_iter()
            .map(|col| keep.iter().map(|&i| col[i]).collect())
            .collect();

        ObservationTable::new(dates, columns, values)
    }

    /// Most recently modified CSV file in `dir`
    pub fn latest_upload<P: AsRef<Path>>(dir: P) -> Result<PathBuf> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| {
            ForecastError::DataLoad(format!("cannot list {}: {}", dir.display(), e))
        })?;

        let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let is_csv = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if !is_csv {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if latest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                latest = Some((modified, path));
            }
        }

        latest.map(|(_, p)| p).ok_or_else(|| {
            ForecastError::DataLoad(format!("No data files in {}", dir.display()))
        })
    }

    /// Detect the date column by explicit name or by "date"/"fecha" substring
    fn detect_date_column(headers: &[String], explicit: Option<&str>) -> Result<Option<usize>> {
        if let Some(name) = explicit {
            return headers
                .iter()
                .position(|h| h == name)
                .map(Some)
                .ok_or_else(|| {
                    ForecastError::DataLoad(format!("Date column '{}' not found", name))
                });
        }

        Ok(headers.iter().position(|h| {
            let lower = h.to_lowercase();
            lower.contains("date") || lower.contains("fecha")
        }))
    }
}

impl ObservationTable {
    /// Create a table, checking that every column matches the date index
    pub fn new(dates: Vec<NaiveDate>, columns: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self> {
        if columns.len() != values.len() {
            return Err(ForecastError::ValidationError(format!(
                "{} column names for {} value columns",
                columns.len(),
                values.len()
            )));
        }
        if let Some((name, col)) = columns
            .iter()
            .zip(values.iter())
            .find(|(_, col)| col.len() != dates.len())
        {
            return Err(ForecastError::ValidationError(format!(
                "Column '{}' has {} values for {} dates",
                name,
                col.len(),
                dates.len()
            )));
        }

        Ok(Self {
            dates,
            columns,
            values,
        })
    }

    /// Build a table from row-major data
    pub fn from_rows(dates: Vec<NaiveDate>, columns: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let mut values = vec![Vec::with_capacity(rows.len()); columns.len()];
        for (r, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(ForecastError::ValidationError(format!(
                    "Row {} has {} values, expected {}",
                    r,
                    row.len(),
                    columns.len()
                )));
            }
            for (c, v) in row.iter().enumerate() {
                values[c].push(*v);
            }
        }
        Self::new(dates, columns, values)
    }

    /// Sort by date, average duplicate days, reindex onto every calendar day
    /// between the first and last date and fill gaps by linear interpolation.
    pub fn prepare(self) -> Result<Self> {
        if self.dates.is_empty() {
            return Err(ForecastError::DataLoad("no rows to prepare".to_string()));
        }

        // date -> per-column (sum, count) of valid values
        let mut daily: BTreeMap<NaiveDate, Vec<(f64, usize)>> = BTreeMap::new();
        for (row, date) in self.dates.iter().enumerate() {
            let acc = daily
                .entry(*date)
                .or_insert_with(|| vec![(0.0, 0); self.columns.len()]);
            for (c, col) in self.values.iter().enumerate() {
                let v = col[row];
                if v.is_finite() {
                    acc[c].0 += v;
                    acc[c].1 += 1;
                }
            }
        }

        let duplicates = self.dates.len() - daily.len();
        if duplicates > 0 {
            debug!("Averaged {} duplicate daily rows", duplicates);
        }

        let (first, last) = match (daily.keys().next(), daily.keys().next_back()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return Err(ForecastError::DataLoad("no rows to prepare".to_string())),
        };
        let dates: Vec<NaiveDate> = first.iter_days().take_while(|d| *d <= last).collect();

        let mut values = vec![vec![f64::NAN; dates.len()]; self.columns.len()];
        for (i, date) in dates.iter().enumerate() {
            if let Some(acc) = daily.get(date) {
                for (c, (sum, count)) in acc.iter().enumerate() {
                    if *count > 0 {
                        values[c][i] = sum / *count as f64;
                    }
                }
            }
        }

        for (name, col) in self.columns.iter().zip(values.iter_mut()) {
            let filled = interpolate_linear(col);
            if filled > 0 {
                debug!("Filled {} missing values in '{}'", filled, name);
            }
            if col.iter().all(|v| v.is_nan()) {
                warn!("Column '{}' has no numeric values", name);
            }
        }

        Self::new(dates, self.columns, values)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get the values of a column
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.column_index(name).map(|i| self.values[i].as_slice())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Column values or a validation error naming the missing column
    pub fn require_column(&self, name: &str) -> Result<&[f64]> {
        self.column(name).ok_or_else(|| {
            ForecastError::ValidationError(format!("Column '{}' not found", name))
        })
    }

    /// One row across all columns
    pub fn row(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.len() {
            return None;
        }
        Some(self.values.iter().map(|col| col[index]).collect())
    }

    /// Row-major copy of the selected columns
    pub fn rows_of(&self, columns: &[String]) -> Result<Vec<Vec<f64>>> {
        let cols: Vec<&[f64]> = columns
            .iter()
            .map(|c| self.require_column(c))
            .collect::<Result<_>>()?;
        Ok((0..self.len())
            .map(|r| cols.iter().map(|col| col[r]).collect())
            .collect())
    }

    /// Table restricted to the given columns, in that order
    pub fn select(&self, columns: &[String]) -> Result<Self> {
        let values = columns
            .iter()
            .map(|c| self.require_column(c).map(|v| v.to_vec()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(self.dates.clone(), columns.to_vec(), values)
    }

    /// Rows `start..end`
    pub fn slice(&self, start: usize, end: usize) -> Result<Self> {
        if start > end || end > self.len() {
            return Err(ForecastError::ValidationError(format!(
                "Slice {}..{} out of range for {} rows",
                start,
                end,
                self.len()
            )));
        }
        Self::new(
            self.dates[start..end].to_vec(),
            self.columns.clone(),
            self.values.iter().map(|c| c[start..end].to_vec()).collect(),
        )
    }

    /// Last `n` rows (all rows when `n` exceeds the length)
    pub fn tail(&self, n: usize) -> Self {
        let start = self.len().saturating_sub(n);
        Self {
            dates: self.dates[start..].to_vec(),
            columns: self.columns.clone(),
            values: self.values.iter().map(|c| c[start..].to_vec()).collect(),
        }
    }

    /// Copy of the table with every column replaced through `f(name, values)`
    pub fn map_columns<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(&str, &[f64]) -> Result<Vec<f64>>,
    {
        let values = self
            .columns
            .iter()
            .zip(self.values.iter())
            .map(|(name, col)| f(name, col))
            .collect::<Result<Vec<_>>>()?;
        Self::new(self.dates.clone(), self.columns.clone(), values)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Whether dates are strictly increasing with one-day steps
    pub fn is_daily_contiguous(&self) -> bool {
        self.dates
            .windows(2)
            .all(|w| w[0].succ_opt() == Some(w[1]))
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Convert to a DataFrame with a `date` column first
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut series = Vec::with_capacity(self.columns.len() + 1);
        series.push(date_series("date", &self.dates)?);
        for (name, col) in self.columns.iter().zip(self.values.iter()) {
            series.push(Series::new(name, col.clone()));
        }
        Ok(DataFrame::new(series)?)
    }
}

/// Split into train/test by taking the last `test_size` rows as test.
pub fn temporal_train_test_split(
    table: &ObservationTable,
    test_size: usize,
) -> Result<(ObservationTable, ObservationTable)> {
    if test_size >= table.len() {
        return Err(ForecastError::InvalidParameter(format!(
            "test_size ({}) must be smaller than the number of rows ({})",
            test_size,
            table.len()
        )));
    }
    let split = table.len() - test_size;
    Ok((table.slice(0, split)?, table.slice(split, table.len())?))
}

/// Fill NaN gaps in place: interior gaps linearly, edges with the nearest
/// valid value. Returns the number of cells filled.
///
/// Leading gaps are back-filled with the first observation, unlike
/// pandas-style time interpolation which leaves them empty; a model fit
/// cannot accept missing leading rows.
pub fn interpolate_linear(values: &mut [f64]) -> usize {
    let valid: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_finite()).collect();
    let (first, last) = match (valid.first(), valid.last()) {
        (Some(&f), Some(&l)) => (f, l),
        _ => return 0,
    };

    let mut filled = 0;
    for i in 0..first {
        values[i] = values[first];
        filled += 1;
    }
    for i in last + 1..values.len() {
        values[i] = values[last];
        filled += 1;
    }
    for pair in valid.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let span = (b - a) as f64;
        for i in a + 1..b {
            let w = (i - a) as f64 / span;
            values[i] = values[a] + w * (values[b] - values[a]);
            filled += 1;
        }
    }
    filled
}

pub(crate) fn date_series(name: &str, dates: &[NaiveDate]) -> Result<Series> {
    let days: Vec<i32> = dates
        .iter()
        .map(|d| d.signed_duration_since(epoch()).num_days() as i32)
        .collect();
    Ok(Series::new(name, days).cast(&DataType::Date)?)
}

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

/// Helper to get a DataFrame column as f64 values (nulls become NaN)
fn column_as_f64(df: &DataFrame, column_name: &str) -> Result<Vec<f64>> {
    let col = df.column(column_name).map_err(|e| {
        ForecastError::DataLoad(format!("Column '{}' not found: {}", column_name, e))
    })?;

    if !col.dtype().is_numeric() {
        return Err(ForecastError::DataLoad(format!(
            "Column '{}' cannot be converted to f64",
            column_name
        )));
    }

    let cast = col.cast(&DataType::Float64)?;
    Ok(cast
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// UTF-8 when valid, otherwise Latin-1 (every byte is one code point)
fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

fn detect_delimiter(header: &str) -> char {
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if semicolons >= commas && semicolons > 0 {
        ';'
    } else {
        ','
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .map(|dt| dt.date())
        })
}

fn is_missing_marker(cell: &str) -> bool {
    let lower = cell.trim().to_lowercase();
    MISSING_MARKERS.contains(&lower.as_str())
}

fn parse_number(cell: &str, decimal_comma: bool) -> Option<f64> {
    let s = cell.trim();
    if is_missing_marker(s) {
        return None;
    }
    // "1.013,2" carries thousands dots; "12.5" in a comma-decimal file is read as-is
    let parsed = if decimal_comma && s.contains(',') {
        s.replace('.', "").replace(',', ".").parse::<f64>()
    } else {
        s.parse::<f64>()
    };
    parsed.ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_linear() {
        let mut v = vec![f64::NAN, 1.0, f64::NAN, f64::NAN, 4.0, f64::NAN];
        let filled = interpolate_linear(&mut v);
        assert_eq!(filled, 4);
        assert_eq!(v, vec![1.0, 1.0, 2.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn test_interpolate_all_missing_is_untouched() {
        let mut v = vec![f64::NAN, f64::NAN];
        assert_eq!(interpolate_linear(&mut v), 0);
        assert!(v.iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_parse_number_decimal_comma() {
        assert_eq!(parse_number("12,5", true), Some(12.5));
        assert_eq!(parse_number("1.013,2", true), Some(1013.2));
        assert_eq!(parse_number("12.5", false), Some(12.5));
        assert_eq!(parse_number("", true), None);
        assert_eq!(parse_number("abc", false), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(parse_date("2024-03-07"), Some(expected));
        assert_eq!(parse_date("07/03/2024"), Some(expected));
        assert_eq!(parse_date("07-03-2024 10:30"), Some(expected));
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn test_latin1_fallback() {
        let bytes = vec![b'P', b'r', b'e', b's', b'i', 0xF3, b'n'];
        assert_eq!(decode_text(bytes), "Presión");
    }
}
