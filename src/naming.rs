// Short names and county sub-types derived from full area names.
//
// Each tier has an ordered rule list. Every rule is checked and a later
// match overwrites an earlier one; names matching nothing get "".
use crate::types::{LongRow, Tier};

type Rule = fn(&str) -> Option<String>;

fn first_chars(name: &str, n: usize) -> String {
    name.chars().take(n).collect()
}

fn strip(name: &str, suffix: &str) -> Option<String> {
    name.strip_suffix(suffix).map(str::to_string)
}

const PROVINCE_RULES: [Rule; 4] = [
    |n: &str| strip(n, "省"),
    |n: &str| {
        if !n.ends_with("自治区") {
            None
        } else if n == "内蒙古自治区" {
            Some("内蒙古".to_string())
        } else {
            Some(first_chars(n, 2))
        }
    },
    |n: &str| strip(n, "市"),
    |n: &str| strip(n, "地区"),
];

const CITY_RULES: [Rule; 4] = [
    |n: &str| strip(n, "市"),
    |n: &str| strip(n, "自治州"),
    |n: &str| strip(n, "盟"),
    |n: &str| strip(n, "地区"),
];

const SUBTYPE_RULES: [Rule; 4] = [
    |n: &str| {
        if !n.ends_with('区') {
            None
        } else if n == "神农架林区" {
            Some("林区".to_string())
        } else if n.ends_with("特区") {
            Some("特区".to_string())
        } else {
            Some("市辖区".to_string())
        }
    },
    |n: &str| n.ends_with('市').then(|| "县级市".to_string()),
    |n: &str| {
        n.ends_with('县').then(|| {
            (if n.ends_with("自治县") { "自治县" } else { "县" }).to_string()
        })
    },
    |n: &str| {
        n.ends_with('旗').then(|| {
            (if n.ends_with("自治旗") { "自治旗" } else { "旗" }).to_string()
        })
    },
];

fn apply_last_match(rules: &[Rule], name: &str) -> String {
    rules
        .iter()
        .fold(String::new(), |acc, rule| rule(name).unwrap_or(acc))
}

/// Display short name for province and city tiers; empty for county.
pub fn derive_short(full_name: &str, tier: Tier) -> String {
    match tier {
        Tier::Province => apply_last_match(&PROVINCE_RULES, full_name),
        Tier::City => apply_last_match(&CITY_RULES, full_name),
        Tier::County => String::new(),
    }
}

/// County sub-type from the name ending, checked as 区, 市, 县, 旗 with the
/// last hit winning. Empty when nothing matches.
pub fn derive_subtype(full_name: &str) -> String {
    apply_last_match(&SUBTYPE_RULES, full_name)
}

/// Fill the tier's derived field on every row.
pub fn annotate(rows: Vec<LongRow>) -> Vec<LongRow> {
    rows.into_iter()
        .map(|row| match row.tier {
            Tier::Province | Tier::City => LongRow {
                short_name: Some(derive_short(&row.name, row.tier)),
                ..row
            },
            Tier::County => LongRow {
                sub_type: Some(derive_subtype(&row.name)),
                ..row
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_province_short_names() {
        assert_eq!(derive_short("广东省", Tier::Province), "广东");
        assert_eq!(derive_short("内蒙古自治区", Tier::Province), "内蒙古");
        assert_eq!(derive_short("新疆维吾尔自治区", Tier::Province), "新疆");
        assert_eq!(derive_short("广西壮族自治区", Tier::Province), "广西");
        assert_eq!(derive_short("北京市", Tier::Province), "北京");
        assert_eq!(derive_short("香港特别行政区", Tier::Province), "");
    }

    #[test]
    fn test_city_short_names() {
        assert_eq!(derive_short("合肥市", Tier::City), "合肥");
        assert_eq!(derive_short("延边朝鲜族自治州", Tier::City), "延边朝鲜族");
        assert_eq!(derive_short("锡林郭勒盟", Tier::City), "锡林郭勒");
        assert_eq!(derive_short("巢湖地区", Tier::City), "巢湖");
        assert_eq!(derive_short("朝阳区", Tier::County), "");
    }

    #[test]
    fn test_county_subtypes() {
        assert_eq!(derive_subtype("神农架林区"), "林区");
        assert_eq!(derive_subtype("六枝特区"), "特区");
        assert_eq!(derive_subtype("朝阳区"), "市辖区");
        assert_eq!(derive_subtype("合肥市"), "县级市");
        assert_eq!(derive_subtype("长丰县"), "县");
        assert_eq!(derive_subtype("峨边彝族自治县"), "自治县");
        assert_eq!(derive_subtype("扎鲁特旗"), "旗");
        assert_eq!(derive_subtype("科尔沁右翼中旗"), "旗");
        assert_eq!(derive_subtype("鄂伦春自治旗"), "自治旗");
        assert_eq!(derive_subtype("某某镇"), "");
    }

    #[test]
    fn test_annotate_sets_tier_field() {
        let rows = annotate(vec![
            LongRow::new(340000, 2014, "安徽省", Tier::Province),
            LongRow::new(340102, 2014, "瑶海区", Tier::County),
        ]);
        assert_eq!(rows[0].short_name.as_deref(), Some("安徽"));
        assert_eq!(rows[0].sub_type, None);
        assert_eq!(rows[1].sub_type.as_deref(), Some("市辖区"));
        assert_eq!(rows[1].short_name, None);
    }
}
