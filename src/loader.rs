use calamine::{open_workbook_auto, Data, Reader};
use csv::ReaderBuilder;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{PanelError, Result};
use crate::types::{AreaRecord, Tier, YearSpan};
use crate::util::{clean_name, code_from_f64, parse_code_safe, parse_year_safe};

/// Header of the code column in the flat spreadsheet.
pub const CODE_HEADER: &str = "行政区划代码";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub total_rows: usize,
    pub loaded_rows: usize,
    /// Rows whose code was blank or not numeric.
    pub skipped_rows: usize,
}

/// Anything that can produce raw wide area records for a span of years.
pub trait AreaSource {
    fn describe(&self) -> String;

    /// `tiers` is a hint; sources may return more rows than asked for, the
    /// classifier does the final filtering.
    fn load(&self, tiers: &BTreeSet<Tier>, span: YearSpan) -> Result<(Vec<AreaRecord>, LoadReport)>;
}

/// Flat spreadsheet: a code column plus one column per year.
#[derive(Debug, Clone)]
pub struct SpreadsheetSource {
    path: PathBuf,
}

impl SpreadsheetSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn fetch_flat(&self, span: YearSpan) -> Result<(Vec<AreaRecord>, LoadReport)> {
        let is_csv = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        let grid = if is_csv {
            read_csv_grid(&self.path)?
        } else {
            read_workbook_grid(&self.path)?
        };
        let (records, report) = records_from_grid(grid, span, &self.path)?;
        log::info!(
            "Loaded {} of {} rows from {} ({} skipped)",
            report.loaded_rows,
            report.total_rows,
            self.path.display(),
            report.skipped_rows
        );
        Ok((records, report))
    }
}

impl AreaSource for SpreadsheetSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self, _tiers: &BTreeSet<Tier>, span: YearSpan) -> Result<(Vec<AreaRecord>, LoadReport)> {
        self.fetch_flat(span)
    }
}

type Grid = Vec<Vec<Option<String>>>;

fn unavailable(path: &Path, e: impl std::fmt::Display) -> PanelError {
    PanelError::DataUnavailable(format!("{}: {}", path.display(), e))
}

fn read_csv_grid(path: &Path) -> Result<Grid> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| unavailable(path, e))?;
    let mut grid = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| unavailable(path, e))?;
        grid.push(record.iter().map(|f| Some(f.to_string())).collect());
    }
    Ok(grid)
}

fn data_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        other => Some(other.to_string()),
    }
}

fn read_workbook_grid(path: &Path) -> Result<Grid> {
    let mut workbook = open_workbook_auto(path).map_err(|e| unavailable(path, e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| unavailable(path, "workbook contains no sheets"))?
        .map_err(|e| unavailable(path, e))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(data_to_string).collect())
        .collect())
}

fn records_from_grid(
    grid: Grid,
    span: YearSpan,
    path: &Path,
) -> Result<(Vec<AreaRecord>, LoadReport)> {
    let mut rows = grid.into_iter();
    let header = rows
        .next()
        .ok_or_else(|| unavailable(path, "file is empty"))?;

    let code_idx = header
        .iter()
        .position(|h| h.as_deref().map(str::trim) == Some(CODE_HEADER))
        .ok_or_else(|| unavailable(path, format!("missing column {}", CODE_HEADER)))?;
    let year_idx: BTreeMap<i32, usize> = header
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != code_idx)
        .filter_map(|(i, h)| parse_year_safe(h.as_deref()).map(|y| (y, i)))
        .filter(|(y, _)| span.contains(*y))
        .collect();
    if let Some(missing) = span.years().find(|y| !year_idx.contains_key(y)) {
        return Err(unavailable(path, format!("missing year column {}", missing)));
    }

    let mut report = LoadReport::default();
    let mut records = Vec::new();
    for row in rows {
        report.total_rows += 1;
        let cell = |i: usize| row.get(i).and_then(|c| c.as_deref());
        let Some(code) = parse_code_safe(cell(code_idx)) else {
            report.skipped_rows += 1;
            continue;
        };
        let names = year_idx
            .iter()
            .map(|(year, i)| (*year, clean_name(cell(*i))))
            .collect();
        records.push(AreaRecord { code, names });
    }
    report.loaded_rows = records.len();
    Ok((records, report))
}

/// Relational source: table with `AreaCode, Level, Catalog, Y<year>...`.
#[derive(Debug, Clone)]
pub struct DatabaseSource {
    path: PathBuf,
    table: String,
}

impl DatabaseSource {
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            table: table.into(),
        }
    }

    fn query(&self, tiers: &BTreeSet<Tier>, span: YearSpan) -> Result<String> {
        let valid_table = !self.table.is_empty()
            && self
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_table {
            return Err(PanelError::DataUnavailable(format!(
                "invalid table name '{}'",
                self.table
            )));
        }
        let year_columns: Vec<String> = span.years().map(|y| format!("Y{}", y)).collect();
        let placeholders = vec!["?"; tiers.len()].join(", ");
        let mut sql = format!(
            "SELECT AreaCode, {} FROM {} WHERE Level IN ({})",
            year_columns.join(", "),
            self.table,
            placeholders
        );
        // Municipalities are stored as province level but belong in the city panel.
        if tiers.contains(&Tier::City) {
            sql.push_str(" OR Catalog = '直辖市'");
        }
        Ok(sql)
    }

    pub fn fetch_by_tier(
        &self,
        tiers: &BTreeSet<Tier>,
        span: YearSpan,
    ) -> Result<(Vec<AreaRecord>, LoadReport)> {
        let sql = self.query(tiers, span)?;
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| unavailable(&self.path, e))?;
        let mut stmt = conn.prepare(&sql).map_err(|e| unavailable(&self.path, e))?;
        let years: Vec<i32> = span.years().collect();
        let labels: Vec<&str> = tiers.iter().map(|t| t.label()).collect();

        let rows = stmt
            .query_map(params_from_iter(labels.iter()), |row| {
                let code = match row.get::<_, Value>(0)? {
                    Value::Integer(i) => u32::try_from(i).ok(),
                    Value::Real(f) => code_from_f64(f),
                    Value::Text(s) => parse_code_safe(Some(&s)),
                    _ => None,
                };
                let mut names = BTreeMap::new();
                for (i, year) in years.iter().enumerate() {
                    let name: Option<String> = row.get(i + 1)?;
                    names.insert(*year, clean_name(name.as_deref()));
                }
                Ok((code, names))
            })
            .map_err(|e| unavailable(&self.path, e))?;

        let mut report = LoadReport::default();
        let mut records = Vec::new();
        for row in rows {
            report.total_rows += 1;
            match row.map_err(|e| unavailable(&self.path, e))? {
                (Some(code), names) => records.push(AreaRecord { code, names }),
                (None, _) => report.skipped_rows += 1,
            }
        }
        report.loaded_rows = records.len();
        log::info!(
            "Fetched {} of {} rows for {:?} from {}",
            report.loaded_rows,
            report.total_rows,
            labels,
            self.path.display()
        );
        Ok((records, report))
    }
}

impl AreaSource for DatabaseSource {
    fn describe(&self) -> String {
        format!("{} ({})", self.path.display(), self.table)
    }

    fn load(&self, tiers: &BTreeSet<Tier>, span: YearSpan) -> Result<(Vec<AreaRecord>, LoadReport)> {
        self.fetch_by_tier(tiers, span)
    }
}
