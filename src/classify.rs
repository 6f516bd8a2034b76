use crate::types::{is_municipality, AreaRecord, Tier, MAX_PREFECTURE_CODE};

/// Whether `code` belongs to `tier` under the 6-digit trailing-zero convention.
///
/// Municipality codes satisfy both the province and the city pattern.
pub fn code_in_tier(code: u32, tier: Tier) -> bool {
    match tier {
        Tier::Province => code % 10000 == 0 && code <= MAX_PREFECTURE_CODE,
        Tier::City => {
            let prefecture = code % 100 == 0 && code % 10000 != 0;
            (prefecture || is_municipality(code)) && code <= MAX_PREFECTURE_CODE
        }
        Tier::County => code % 100 != 0,
    }
}

/// Keep the records of `tier` that carry a name in at least one year.
pub fn classify(records: &[AreaRecord], tier: Tier) -> Vec<AreaRecord> {
    records
        .iter()
        .filter(|r| code_in_tier(r.code, tier))
        .filter(|r| r.has_any_name())
        .cloned()
        .collect()
}
