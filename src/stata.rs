//! Minimal Stata 118 (`.dta`, Stata 14+) writer.
//!
//! Only what panel tables need: `long` integer columns and fixed-width
//! UTF-8 `str#` columns, little-endian, no value labels or strLs.

use chrono::{DateTime, Local};

use crate::error::{PanelError, Result};
use crate::types::{Cell, Table};

const TYPE_LONG: u16 = 65528;
const MAX_STR_WIDTH: usize = 2045;
const LONG_MAX: i64 = 2_147_483_620;
const LONG_MIN: i64 = -2_147_483_647;
/// System missing value `.` for a `long`.
const LONG_MISSING: i32 = 2_147_483_621;

const VARNAME_LEN: usize = 129;
const FORMAT_LEN: usize = 57;
const VARLABEL_LEN: usize = 321;
const MAX_VARNAME_CHARS: usize = 32;
const MAX_VARIABLES: usize = 32_767;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarType {
    Long,
    Str(usize),
}

impl VarType {
    fn code(self) -> u16 {
        match self {
            VarType::Long => TYPE_LONG,
            VarType::Str(w) => w as u16,
        }
    }

    fn format(self) -> String {
        match self {
            VarType::Long => "%12.0g".to_string(),
            VarType::Str(w) => format!("%-{}s", w),
        }
    }
}

fn column_type(table: &Table, col: usize) -> Result<VarType> {
    let cells = table.rows.iter().filter_map(|r| r.get(col));
    let all_int = cells.clone().all(|c| matches!(c, Cell::Int(_) | Cell::Null));
    let has_value = cells.clone().any(|c| !matches!(c, Cell::Null));
    if all_int && has_value {
        return Ok(VarType::Long);
    }
    let width = cells
        .map(|c| c.to_string().len())
        .max()
        .unwrap_or(0)
        .max(1);
    if width > MAX_STR_WIDTH {
        return Err(PanelError::ExportFailure(format!(
            "column '{}' holds a value of {} bytes, over the {} byte limit",
            table.columns[col], width, MAX_STR_WIDTH
        )));
    }
    Ok(VarType::Str(width))
}

/// Stata names must start with a letter or underscore and carry no spaces.
pub fn variable_name(label: &str) -> String {
    let mut name: String = label
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name.chars().take(MAX_VARNAME_CHARS).collect()
}

fn put_fixed(buf: &mut Vec<u8>, s: &str, len: usize) {
    // Leave room for the terminating NUL and never split a UTF-8 sequence.
    let mut end = s.len().min(len - 1);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    buf.extend_from_slice(&s.as_bytes()[..end]);
    buf.resize(buf.len() + (len - end), 0);
}

fn tag(buf: &mut Vec<u8>, t: &str) -> u64 {
    let pos = buf.len() as u64;
    buf.extend_from_slice(t.as_bytes());
    pos
}

/// Serialize `table` to `.dta` bytes, stamped with `now`.
pub fn write_dta(table: &Table, now: DateTime<Local>) -> Result<Vec<u8>> {
    let k = table.columns.len();
    if k == 0 || k > MAX_VARIABLES {
        return Err(PanelError::ExportFailure(format!(
            "cannot write {} columns to a Stata file",
            k
        )));
    }
    let types = (0..k)
        .map(|i| column_type(table, i))
        .collect::<Result<Vec<_>>>()?;

    let mut buf: Vec<u8> = Vec::new();
    let mut map = [0u64; 14];

    map[0] = tag(&mut buf, "<stata_dta>");
    tag(&mut buf, "<header><release>118</release><byteorder>LSF</byteorder><K>");
    buf.extend_from_slice(&(k as u16).to_le_bytes());
    tag(&mut buf, "</K><N>");
    buf.extend_from_slice(&(table.rows.len() as u64).to_le_bytes());
    tag(&mut buf, "</N><label>");
    buf.extend_from_slice(&0u16.to_le_bytes());
    tag(&mut buf, "</label><timestamp>");
    let stamp = now.format("%d %b %Y %H:%M").to_string();
    buf.push(stamp.len() as u8);
    buf.extend_from_slice(stamp.as_bytes());
    tag(&mut buf, "</timestamp></header>");

    map[1] = tag(&mut buf, "<map>");
    let map_at = buf.len();
    buf.resize(map_at + 14 * 8, 0);
    tag(&mut buf, "</map>");

    map[2] = tag(&mut buf, "<variable_types>");
    for t in &types {
        buf.extend_from_slice(&t.code().to_le_bytes());
    }
    tag(&mut buf, "</variable_types>");

    map[3] = tag(&mut buf, "<varnames>");
    for label in &table.columns {
        put_fixed(&mut buf, &variable_name(label), VARNAME_LEN);
    }
    tag(&mut buf, "</varnames>");

    map[4] = tag(&mut buf, "<sortlist>");
    buf.resize(buf.len() + 2 * (k + 1), 0);
    tag(&mut buf, "</sortlist>");

    map[5] = tag(&mut buf, "<formats>");
    for t in &types {
        put_fixed(&mut buf, &t.format(), FORMAT_LEN);
    }
    tag(&mut buf, "</formats>");

    map[6] = tag(&mut buf, "<value_label_names>");
    buf.resize(buf.len() + VARNAME_LEN * k, 0);
    tag(&mut buf, "</value_label_names>");

    map[7] = tag(&mut buf, "<variable_labels>");
    for label in &table.columns {
        put_fixed(&mut buf, label, VARLABEL_LEN);
    }
    tag(&mut buf, "</variable_labels>");

    map[8] = tag(&mut buf, "<characteristics>");
    tag(&mut buf, "</characteristics>");

    map[9] = tag(&mut buf, "<data>");
    for row in &table.rows {
        for (i, t) in types.iter().enumerate() {
            let cell = row.get(i).unwrap_or(&Cell::Null);
            match (t, cell) {
                (VarType::Long, Cell::Int(v)) => {
                    if !(LONG_MIN..=LONG_MAX).contains(v) {
                        return Err(PanelError::ExportFailure(format!(
                            "value {} in column '{}' does not fit a Stata long",
                            v, table.columns[i]
                        )));
                    }
                    buf.extend_from_slice(&(*v as i32).to_le_bytes());
                }
                (VarType::Long, _) => buf.extend_from_slice(&LONG_MISSING.to_le_bytes()),
                (VarType::Str(w), cell) => {
                    let s = cell.to_string();
                    buf.extend_from_slice(s.as_bytes());
                    buf.resize(buf.len() + (w - s.len()), 0);
                }
            }
        }
    }
    tag(&mut buf, "</data>");

    map[10] = tag(&mut buf, "<strls>");
    tag(&mut buf, "</strls>");
    map[11] = tag(&mut buf, "<value_labels>");
    tag(&mut buf, "</value_labels>");
    map[12] = tag(&mut buf, "</stata_dta>");
    map[13] = buf.len() as u64;

    for (i, offset) in map.iter().enumerate() {
        let at = map_at + i * 8;
        buf[at..at + 8].copy_from_slice(&offset.to_le_bytes());
    }
    Ok(buf)
}
