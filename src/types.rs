use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use tabled::Tabled;

use crate::error::{PanelError, Result};

/// Codes of the four direct-governed municipalities (Beijing, Tianjin,
/// Shanghai, Chongqing). They are city-tier areas that are also their own
/// province-tier record.
pub const MUNICIPALITY_CODES: [u32; 4] = [110000, 120000, 310000, 500000];

/// Highest code that still belongs to mainland province/city tiers.
pub const MAX_PREFECTURE_CODE: u32 = 660000;

pub fn is_municipality(code: u32) -> bool {
    MUNICIPALITY_CODES.contains(&code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Province,
    City,
    County,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Province, Tier::City, Tier::County];

    /// Label used in the `Level` column and in the source database.
    pub fn label(self) -> &'static str {
        match self {
            Tier::Province => "省级",
            Tier::City => "地级",
            Tier::County => "县级",
        }
    }

    /// Short key used in artifact file names.
    pub fn file_key(self) -> &'static str {
        match self {
            Tier::Province => "prov",
            Tier::City => "city",
            Tier::County => "county",
        }
    }

    pub fn parent(self) -> Option<Tier> {
        match self {
            Tier::Province => None,
            Tier::City => Some(Tier::Province),
            Tier::County => Some(Tier::City),
        }
    }

    /// Every tier above this one, nearest first.
    pub fn ancestors(self) -> Vec<Tier> {
        let mut out = Vec::new();
        let mut cur = self.parent();
        while let Some(t) = cur {
            out.push(t);
            cur = t.parent();
        }
        out
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::Province => "province",
            Tier::City => "city",
            Tier::County => "county",
        };
        f.write_str(s)
    }
}

impl FromStr for Tier {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "province" | "prov" | "省级" => Ok(Tier::Province),
            "city" | "地级" => Ok(Tier::City),
            "county" | "县级" => Ok(Tier::County),
            other => Err(PanelError::InvalidRequest(format!(
                "unknown administrative level '{}'",
                other
            ))),
        }
    }
}

/// Inclusive, continuous range of years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YearSpan {
    pub start: i32,
    pub end: i32,
}

impl YearSpan {
    pub fn new(start: i32, end: i32) -> Result<Self> {
        if start > end {
            return Err(PanelError::InvalidRequest(format!(
                "start year {} is after end year {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }
}

/// Raw wide record as delivered by a source: one code plus one entry per
/// requested year. `None` means the area had no name in that year.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaRecord {
    pub code: u32,
    pub names: BTreeMap<i32, Option<String>>,
}

impl AreaRecord {
    pub fn has_any_name(&self) -> bool {
        self.names.values().any(Option::is_some)
    }

    pub fn name_in(&self, year: i32) -> Option<&str> {
        self.names.get(&year).and_then(|n| n.as_deref())
    }
}

/// Code/name pair attached to a row by the hierarchical joiner.
///
/// `code` is `None` when a left join found no parent for that year.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParentRef {
    pub code: Option<u32>,
    pub name: Option<String>,
    pub short_name: Option<String>,
}

impl ParentRef {
    pub fn unmatched() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LongRow {
    pub code: u32,
    pub year: i32,
    pub name: String,
    pub tier: Tier,
    /// Province and city tiers only.
    pub short_name: Option<String>,
    /// County tier only.
    pub sub_type: Option<String>,
    pub city: Option<ParentRef>,
    pub province: Option<ParentRef>,
}

impl LongRow {
    pub fn new(code: u32, year: i32, name: impl Into<String>, tier: Tier) -> Self {
        Self {
            code,
            year,
            name: name.into(),
            tier,
            short_name: None,
            sub_type: None,
            city: None,
            province: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub code: u32,
    pub names: Vec<Option<String>>,
}

/// One row per code, one column per year. Review/export only.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    pub tier: Tier,
    pub years: Vec<i32>,
    pub rows: Vec<WideRow>,
}

/// A panel request as accepted from either front end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelRequest {
    pub span: YearSpan,
    pub tiers: BTreeSet<Tier>,
    pub include_parent: bool,
}

impl PanelRequest {
    pub fn new(start: i32, end: i32, tiers: BTreeSet<Tier>, include_parent: bool) -> Result<Self> {
        let request = Self {
            span: YearSpan::new(start, end)?,
            tiers,
            include_parent,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.span.start > self.span.end {
            return Err(PanelError::InvalidRequest(format!(
                "start year {} is after end year {}",
                self.span.start, self.span.end
            )));
        }
        if self.tiers.is_empty() {
            return Err(PanelError::InvalidRequest(
                "at least one administrative level must be selected".to_string(),
            ));
        }
        if self.include_parent && self.tiers.iter().all(|t| *t == Tier::Province) {
            return Err(PanelError::InvalidRequest(
                "parent matching is not available when only the province level is selected"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Checks the span against the range the source actually covers.
    pub fn check_supported(&self, first_year: i32, last_year: i32) -> Result<()> {
        if self.span.start < first_year || self.span.end > last_year {
            return Err(PanelError::InvalidRequest(format!(
                "years must lie within {}-{}, got {}-{}",
                first_year, last_year, self.span.start, self.span.end
            )));
        }
        Ok(())
    }

    /// Requested tiers plus every ancestor the join chain will read.
    pub fn required_tiers(&self) -> BTreeSet<Tier> {
        let mut out = self.tiers.clone();
        if self.include_parent {
            for tier in &self.tiers {
                out.extend(tier.ancestors());
            }
        }
        out
    }
}

/// Columns a panel table can carry, keyed by their internal names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    AreaCode,
    Level,
    Catalog,
    Year,
    AreaName,
    ShortName,
    CityCode,
    CityName,
    CityShortName,
    ProvinceCode,
    ProvinceName,
    ProvinceShortName,
}

impl Column {
    pub fn key(self) -> &'static str {
        match self {
            Column::AreaCode => "AreaCode",
            Column::Level => "Level",
            Column::Catalog => "Catalog",
            Column::Year => "Year",
            Column::AreaName => "AreaName",
            Column::ShortName => "ShortName",
            Column::CityCode => "CityCode",
            Column::CityName => "CityName",
            Column::CityShortName => "CityShortName",
            Column::ProvinceCode => "ProvinceCode",
            Column::ProvinceName => "ProvinceName",
            Column::ProvinceShortName => "ProvinceShortName",
        }
    }

    pub fn label(self) -> &'static str {
        display_label(self.key())
    }
}

static DISPLAY_LABELS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("AreaCode", "区划代码"),
        ("Level", "区划层级"),
        ("Catalog", "区划类型"),
        ("Year", "年份"),
        ("AreaName", "区划名称"),
        ("CityCode", "地级代码"),
        ("CityName", "地级名称"),
        ("ProvinceCode", "省级代码"),
        ("ProvinceName", "省级名称"),
        ("ShortName", "区划简称"),
        ("CityShortName", "地级简称"),
        ("ProvinceShortName", "省级简称"),
    ])
});

/// Final column-rename table. Unknown keys pass through unchanged.
pub fn display_label(key: &str) -> &str {
    DISPLAY_LABELS.get(key).copied().unwrap_or(key)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Text(String),
    Null,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
            Cell::Null => Ok(()),
        }
    }
}

impl From<Option<u32>> for Cell {
    fn from(v: Option<u32>) -> Self {
        v.map_or(Cell::Null, |v| Cell::Int(v as i64))
    }
}

impl From<Option<&str>> for Cell {
    fn from(v: Option<&str>) -> Self {
        v.map_or(Cell::Null, |s| Cell::Text(s.to_string()))
    }
}

/// Display-labelled table handed to the export adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub sheet: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// One line of the "files written" listing shown after a run.
#[derive(Debug, Serialize, Tabled, Clone)]
pub struct ArtifactRow {
    #[serde(rename = "File")]
    #[tabled(rename = "File")]
    pub file: String,
    #[serde(rename = "Rows")]
    #[tabled(rename = "Rows")]
    pub rows: String,
    #[serde(rename = "Size")]
    #[tabled(rename = "Size")]
    pub size: String,
}
