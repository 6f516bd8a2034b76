use chrono::{DateTime, Local};
use rust_xlsxwriter::{Format, FormatBorder, Workbook};
use serde::Serialize;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tabled::{builder::Builder, settings::Style, Table as TextTable, Tabled};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{PanelError, Result};
use crate::panel::Panel;
use crate::stata::write_dta;
use crate::types::{Cell, Table, YearSpan};

const FONT_NAME: &str = "微软雅黑";
const FONT_SIZE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// `.xlsx`
    Spreadsheet,
    /// Stata `.dta`
    StatFile,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Spreadsheet => "xlsx",
            ExportFormat::StatFile => "dta",
        }
    }
}

/// A named, fully serialized output file.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub rows: usize,
    pub bytes: Vec<u8>,
}

fn export_err(what: &str, e: impl std::fmt::Display) -> PanelError {
    PanelError::ExportFailure(format!("{}: {}", what, e))
}

/// Single-sheet workbook named after `table.sheet`.
///
/// - Row 0 holds the display labels in bold.
/// - Every cell uses 微软雅黑 10pt with thin borders; nulls become styled blanks.
pub fn write_xlsx(table: &Table) -> Result<Vec<u8>> {
    let header = Format::new()
        .set_bold()
        .set_font_name(FONT_NAME)
        .set_font_size(FONT_SIZE)
        .set_border(FormatBorder::Thin);
    let normal = Format::new()
        .set_font_name(FONT_NAME)
        .set_font_size(FONT_SIZE)
        .set_border(FormatBorder::Thin);

    let mut workbook = Workbook::new();
    let sheet = workbook
        .add_worksheet()
        .set_name(&table.sheet)
        .map_err(|e| export_err("sheet", e))?;

    for (col, label) in table.columns.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, label, &header)
            .map_err(|e| export_err("header", e))?;
    }
    for (r, row) in table.rows.iter().enumerate() {
        let r32 = (r + 1) as u32;
        for (col, cell) in row.iter().enumerate() {
            let c16 = col as u16;
            let written = match cell {
                Cell::Int(v) => sheet.write_number_with_format(r32, c16, *v as f64, &normal),
                Cell::Text(s) => sheet.write_string_with_format(r32, c16, s, &normal),
                Cell::Null => sheet.write_blank(r32, c16, &normal),
            };
            written.map_err(|e| export_err("cell", e))?;
        }
    }
    workbook
        .save_to_buffer()
        .map_err(|e| export_err("workbook", e))
}

/// Serialize one table in the requested format. `now` only stamps `.dta` headers.
pub fn export_table(table: &Table, format: ExportFormat, now: DateTime<Local>) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Spreadsheet => write_xlsx(table),
        ExportFormat::StatFile => write_dta(table, now),
    }
}

/// Collision-resistant stamp used in every file name of one request.
pub fn stamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d%H%M%S%3f").to_string()
}

/// Wide and long tables of every tier in both formats.
pub fn panel_artifacts(panel: &Panel, now: DateTime<Local>) -> Result<Vec<Artifact>> {
    let span = panel.span();
    let stamp = stamp(now);
    let upcode = if panel.request.include_parent {
        "withupcode"
    } else {
        "noupcode"
    };

    let mut out = Vec::new();
    for tp in &panel.tiers {
        let tables = [
            ("wide", tp.wide_table()),
            ("long", tp.long_table(panel.request.include_parent)),
        ];
        for (form, table) in &tables {
            for format in [ExportFormat::Spreadsheet, ExportFormat::StatFile] {
                out.push(Artifact {
                    file_name: format!(
                        "xzqh_{}_{}_{}_{}_{}_{}.{}",
                        tp.tier.file_key(),
                        span.start,
                        span.end,
                        upcode,
                        form,
                        stamp,
                        format.extension()
                    ),
                    rows: table.rows.len(),
                    bytes: export_table(table, format, now)?,
                });
            }
        }
    }
    Ok(out)
}

pub fn bundle_name(span: YearSpan, now: DateTime<Local>) -> String {
    format!("{}_panel_data_{}_{}.zip", stamp(now), span.start, span.end)
}

pub fn bundle_zip(artifacts: &[Artifact]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for a in artifacts {
        zip.start_file(a.file_name.as_str(), options)
            .map_err(|e| export_err(&a.file_name, e))?;
        zip.write_all(&a.bytes)
            .map_err(|e| export_err(&a.file_name, e))?;
    }
    let cursor = zip.finish().map_err(|e| export_err("zip", e))?;
    Ok(cursor.into_inner())
}

/// Write all artifacts into `dir`. If any write fails, files already written
/// for this batch are removed before the error is returned.
pub fn write_artifacts(dir: &Path, artifacts: &[Artifact]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| export_err(&dir.display().to_string(), e))?;
    let mut written: Vec<PathBuf> = Vec::new();
    for a in artifacts {
        let path = dir.join(&a.file_name);
        if let Err(e) = fs::write(&path, &a.bytes) {
            let _ = fs::remove_file(&path);
            for p in &written {
                if let Err(rm) = fs::remove_file(p) {
                    log::warn!("Could not remove partial artifact {}: {}", p.display(), rm);
                }
            }
            return Err(export_err(&path.display().to_string(), e));
        }
        log::info!("Wrote {} ({} bytes)", path.display(), a.bytes.len());
        written.push(path);
    }
    Ok(written)
}

/// Remove regular files in `dir` last modified more than `retention` ago.
///
/// - A missing `dir` is not an error.
/// - Files that cannot be inspected or removed are logged and skipped; the
///   sweep carries on with the rest.
/// - Returns how many files were actually removed.
pub fn sweep_stale_artifacts(dir: &Path, retention: Duration) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let now = SystemTime::now();
    let mut stale = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = match entry {
            Ok(e) => e.path(),
            Err(e) => {
                log::warn!("Could not read an entry of {}: {}", dir.display(), e);
                continue;
            }
        };
        let meta = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                log::warn!("Could not inspect {}: {}", path.display(), e);
                continue;
            }
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age > retention {
            stale.push(path);
        }
    }
    let removed = remove_stale(&stale);
    if removed > 0 {
        log::info!("Removed {} stale artifacts from {}", removed, dir.display());
    }
    Ok(removed)
}

fn remove_stale(paths: &[PathBuf]) -> usize {
    paths
        .iter()
        .filter(|p| match fs::remove_file(p) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Could not remove stale artifact {}: {}", p.display(), e);
                false
            }
        })
        .count()
}

/// Pretty-printed JSON side file, written alongside the panel artifacts.
pub fn json_artifact<T: Serialize>(file_name: &str, value: &T) -> Result<Artifact> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| export_err(file_name, e))?;
    Ok(Artifact {
        file_name: file_name.to_string(),
        rows: 0,
        bytes,
    })
}

/// Print the first `max_rows` rows of a panel table as markdown.
pub fn preview_table(table: &Table, max_rows: usize) {
    if table.rows.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(table.columns.iter().cloned());
    for row in table.rows.iter().take(max_rows) {
        builder.push_record(row.iter().map(|c| c.to_string()));
    }
    println!("{}", builder.build().with(Style::markdown()));
    if table.rows.len() > max_rows {
        println!("... {} more rows", table.rows.len() - max_rows);
    }
    println!();
}

pub fn preview_rows<T>(rows: &[T])
where
    T: Tabled + Clone,
{
    if rows.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let table_str = TextTable::new(rows.to_vec()).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::assemble;
    use crate::types::{AreaRecord, PanelRequest, Tier};
    use chrono::TimeZone;
    use std::collections::BTreeSet;
    use std::io::Read;
    use tempfile::tempdir;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 9, 7, 1).unwrap()
    }

    fn panel(include_parent: bool) -> Panel {
        let records: Vec<AreaRecord> = [(340000, "安徽省"), (340100, "合肥市"), (340102, "瑶海区")]
            .into_iter()
            .map(|(code, name)| AreaRecord {
                code,
                names: [(2014, Some(name.to_string()))].into_iter().collect(),
            })
            .collect();
        let tiers: BTreeSet<Tier> = [Tier::City, Tier::County].into_iter().collect();
        let request = PanelRequest::new(2014, 2014, tiers, include_parent).unwrap();
        assemble(&request, &records).unwrap()
    }

    #[test]
    fn test_artifact_names() {
        let artifacts = panel_artifacts(&panel(true), now()).unwrap();
        assert_eq!(artifacts.len(), 8);
        assert_eq!(
            artifacts[0].file_name,
            "xzqh_city_2014_2014_withupcode_wide_20240305090701000.xlsx"
        );
        assert_eq!(
            artifacts[7].file_name,
            "xzqh_county_2014_2014_withupcode_long_20240305090701000.dta"
        );
        assert!(artifacts.iter().all(|a| !a.bytes.is_empty()));
    }

    #[test]
    fn test_xlsx_is_a_zip_container() {
        let artifacts = panel_artifacts(&panel(false), now()).unwrap();
        assert!(artifacts[0].file_name.contains("noupcode"));
        assert_eq!(&artifacts[0].bytes[..2], b"PK");
    }

    #[test]
    fn test_bundle_contains_every_artifact() {
        let artifacts = panel_artifacts(&panel(true), now()).unwrap();
        let bytes = bundle_zip(&artifacts).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), artifacts.len());
        let mut entry = archive.by_name(&artifacts[3].file_name).unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert_eq!(content, artifacts[3].bytes);
    }

    #[test]
    fn test_bundle_name() {
        let span = YearSpan::new(2014, 2015).unwrap();
        assert_eq!(bundle_name(span, now()), "20240305090701000_panel_data_2014_2015.zip");
    }

    #[test]
    fn test_write_artifacts_cleans_up_on_failure() {
        let dir = tempdir().unwrap();
        let good = Artifact { file_name: "a.xlsx".into(), rows: 0, bytes: vec![1, 2, 3] };
        let bad = Artifact {
            file_name: "missing/dir/b.dta".into(),
            rows: 0,
            bytes: vec![4],
        };
        let err = write_artifacts(dir.path(), &[good.clone(), bad]).unwrap_err();
        assert!(matches!(err, PanelError::ExportFailure(_)));
        assert!(!dir.path().join("a.xlsx").exists());

        let written = write_artifacts(dir.path(), &[good]).unwrap();
        assert_eq!(fs::read(&written[0]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_sweep_keeps_fresh_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("fresh.zip"), b"x").unwrap();
        assert_eq!(sweep_stale_artifacts(dir.path(), Duration::from_secs(3600)).unwrap(), 0);
        assert!(dir.path().join("fresh.zip").exists());
    }

    #[test]
    fn test_sweep_removes_files_past_retention() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("old.zip"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sweep_stale_artifacts(dir.path(), Duration::from_millis(1)).unwrap(), 1);
        assert!(!dir.path().join("old.zip").exists());
        assert!(dir.path().join("nested").exists());
    }

    #[test]
    fn test_failed_removal_does_not_stop_the_sweep() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("already_gone.zip");
        let old = dir.path().join("old.zip");
        fs::write(&old, b"x").unwrap();
        assert_eq!(remove_stale(&[gone, old.clone()]), 1);
        assert!(!old.exists());
    }

    #[test]
    fn test_sweep_missing_dir_is_noop() {
        assert_eq!(
            sweep_stale_artifacts(Path::new("/nonexistent/downloads"), Duration::ZERO).unwrap(),
            0
        );
    }
}
