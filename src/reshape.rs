// Wide <-> long conversion for a single tier.
//
// Long rows are emitted record-major, year-ascending, so output is stable
// for a given source order.
use crate::types::{AreaRecord, LongRow, Tier, WideRow, WideTable, YearSpan};

/// One row per (code, year) with a name; years without a name are skipped,
/// never null-filled.
pub fn to_long(records: &[AreaRecord], tier: Tier) -> Vec<LongRow> {
    records
        .iter()
        .flat_map(|r| {
            r.names.iter().filter_map(move |(year, name)| {
                name.as_deref()
                    .map(|n| LongRow::new(r.code, *year, n, tier))
            })
        })
        .collect()
}

/// Build the review table straight from filtered records.
pub fn to_wide(records: &[AreaRecord], tier: Tier, span: YearSpan) -> WideTable {
    let years: Vec<i32> = span.years().collect();
    let rows = records
        .iter()
        .map(|r| WideRow {
            code: r.code,
            names: years
                .iter()
                .map(|y| r.name_in(*y).map(str::to_string))
                .collect(),
        })
        .collect();
    WideTable { tier, years, rows }
}
