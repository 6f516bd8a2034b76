use std::collections::{BTreeMap, HashMap};

use crate::classify::classify;
use crate::error::Result;
use crate::join::attach_ancestors;
use crate::naming::annotate;
use crate::reshape::{to_long, to_wide};
use crate::types::{
    AreaRecord, Cell, Column, LongRow, PanelRequest, ParentRef, Table, Tier, WideTable, YearSpan,
};

/// Output for a single requested tier.
#[derive(Debug, Clone)]
pub struct TierPanel {
    pub tier: Tier,
    pub wide: WideTable,
    pub long: Vec<LongRow>,
    /// Long-form rows per year.
    pub counts: BTreeMap<i32, usize>,
}

#[derive(Debug, Clone)]
pub struct Panel {
    pub request: PanelRequest,
    pub tiers: Vec<TierPanel>,
}

/// Classifier -> reshaper -> name rules for one tier.
fn tier_long(records: &[AreaRecord], tier: Tier) -> (Vec<AreaRecord>, Vec<LongRow>) {
    let filtered = classify(records, tier);
    let long = annotate(to_long(&filtered, tier));
    (filtered, long)
}

/// Number of long rows per year, used for the validation table.
pub fn count_by_year(rows: &[LongRow]) -> BTreeMap<i32, usize> {
    rows.iter().fold(BTreeMap::new(), |mut acc, r| {
        *acc.entry(r.year).or_insert(0) += 1;
        acc
    })
}

/// Build every requested tier from one batch of source records.
pub fn assemble(request: &PanelRequest, records: &[AreaRecord]) -> Result<Panel> {
    request.validate()?;
    let ancestors: HashMap<Tier, Vec<LongRow>> = if request.include_parent {
        [Tier::Province, Tier::City]
            .into_iter()
            .filter(|t| request.required_tiers().contains(t))
            .map(|t| (t, tier_long(records, t).1))
            .collect()
    } else {
        HashMap::new()
    };

    let tiers = request
        .tiers
        .iter()
        .map(|&tier| {
            let (filtered, long) = tier_long(records, tier);
            let long = if request.include_parent {
                attach_ancestors(long, tier, &ancestors)
            } else {
                long
            };
            TierPanel {
                tier,
                wide: to_wide(&filtered, tier, request.span),
                counts: count_by_year(&long),
                long,
            }
        })
        .collect();

    Ok(Panel { request: request.clone(), tiers })
}

/// Long-table columns for `tier`, parent columns included when joined.
pub fn long_columns(tier: Tier, include_parent: bool) -> Vec<Column> {
    let mut cols = vec![Column::AreaCode, Column::Year, Column::AreaName];
    cols.push(match tier {
        Tier::County => Column::Catalog,
        Tier::Province | Tier::City => Column::ShortName,
    });
    cols.push(Column::Level);
    if include_parent {
        if tier == Tier::County {
            cols.extend([Column::CityCode, Column::CityName, Column::CityShortName]);
        }
        if tier != Tier::Province {
            cols.extend([
                Column::ProvinceCode,
                Column::ProvinceName,
                Column::ProvinceShortName,
            ]);
        }
    }
    cols
}

fn link_cell(link: Option<&ParentRef>, f: impl Fn(&ParentRef) -> Cell) -> Cell {
    link.map_or(Cell::Null, f)
}

fn long_cell(row: &LongRow, column: Column) -> Cell {
    match column {
        Column::AreaCode => Cell::Int(row.code as i64),
        Column::Year => Cell::Int(row.year as i64),
        Column::AreaName => Cell::Text(row.name.clone()),
        Column::ShortName => row.short_name.as_deref().into(),
        Column::Catalog => row.sub_type.as_deref().into(),
        Column::Level => Cell::Text(row.tier.label().to_string()),
        Column::CityCode => link_cell(row.city.as_ref(), |p| p.code.into()),
        Column::CityName => link_cell(row.city.as_ref(), |p| p.name.as_deref().into()),
        Column::CityShortName => {
            link_cell(row.city.as_ref(), |p| p.short_name.as_deref().into())
        }
        Column::ProvinceCode => link_cell(row.province.as_ref(), |p| p.code.into()),
        Column::ProvinceName => {
            link_cell(row.province.as_ref(), |p| p.name.as_deref().into())
        }
        Column::ProvinceShortName => {
            link_cell(row.province.as_ref(), |p| p.short_name.as_deref().into())
        }
    }
}

impl TierPanel {
    pub fn long_table(&self, include_parent: bool) -> Table {
        let columns = long_columns(self.tier, include_parent);
        Table {
            sheet: "LongPanel".to_string(),
            columns: columns.iter().map(|c| c.label().to_string()).collect(),
            rows: self
                .long
                .iter()
                .map(|r| columns.iter().map(|c| long_cell(r, *c)).collect())
                .collect(),
        }
    }

    pub fn wide_table(&self) -> Table {
        let mut columns = vec![Column::AreaCode.label().to_string()];
        columns.extend(self.wide.years.iter().map(|y| y.to_string()));
        let rows = self
            .wide
            .rows
            .iter()
            .map(|r| {
                std::iter::once(Cell::Int(r.code as i64))
                    .chain(r.names.iter().map(|n| n.as_deref().into()))
                    .collect()
            })
            .collect();
        Table {
            sheet: "WidePanel".to_string(),
            columns,
            rows,
        }
    }
}

impl Panel {
    pub fn span(&self) -> YearSpan {
        self.request.span
    }

    pub fn tier(&self, tier: Tier) -> Option<&TierPanel> {
        self.tiers.iter().find(|t| t.tier == tier)
    }

    /// Per-year row counts of every tier side by side.
    pub fn validation_table(&self) -> Table {
        let mut columns = vec![Column::Year.label().to_string()];
        columns.extend(self.tiers.iter().map(|t| format!("{}区划数量", t.tier.label())));
        let rows = self
            .span()
            .years()
            .map(|year| {
                std::iter::once(Cell::Int(year as i64))
                    .chain(self.tiers.iter().map(|t| {
                        t.counts
                            .get(&year)
                            .map_or(Cell::Null, |n| Cell::Int(*n as i64))
                    }))
                    .collect()
            })
            .collect();
        Table {
            sheet: "Validation".to_string(),
            columns,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn record(code: u32, names: &[Option<&str>]) -> AreaRecord {
        AreaRecord {
            code,
            names: names
                .iter()
                .enumerate()
                .map(|(i, n)| (2014 + i as i32, n.map(str::to_string)))
                .collect(),
        }
    }

    fn fixture() -> Vec<AreaRecord> {
        vec![
            record(110000, &[Some("北京市"), Some("北京市")]),
            record(110105, &[Some("朝阳区"), Some("朝阳区")]),
            record(340000, &[Some("安徽省"), Some("安徽省")]),
            record(340100, &[Some("合肥市"), Some("合肥市")]),
            record(340102, &[Some("瑶海区"), Some("瑶海区")]),
            record(341400, &[Some("巢湖市"), None]),
            record(341421, &[Some("庐江县"), None]),
            record(420000, &[Some("湖北省"), Some("湖北省")]),
            record(429021, &[Some("神农架林区"), Some("神农架林区")]),
        ]
    }

    fn request(tiers: &[Tier], include_parent: bool) -> PanelRequest {
        let tiers: BTreeSet<Tier> = tiers.iter().copied().collect();
        PanelRequest::new(2014, 2015, tiers, include_parent).unwrap()
    }

    #[test]
    fn test_city_panel_with_province_join() {
        let panel = assemble(&request(&[Tier::City], true), &fixture()).unwrap();
        let city = panel.tier(Tier::City).unwrap();

        let keys: Vec<(u32, i32)> = city.long.iter().map(|r| (r.code, r.year)).collect();
        assert_eq!(
            keys,
            vec![(110000, 2014), (110000, 2015), (340100, 2014), (340100, 2015), (341400, 2014)]
        );

        let beijing = &city.long[0];
        let prov = beijing.province.as_ref().unwrap();
        assert_eq!(prov.code, Some(beijing.code));
        assert_eq!(prov.name.as_deref(), Some(beijing.name.as_str()));

        let hefei = &city.long[2];
        let prov = hefei.province.as_ref().unwrap();
        assert_eq!(prov.code, Some(340000));
        assert_eq!(prov.name.as_deref(), Some("安徽省"));
        assert_eq!(hefei.short_name.as_deref(), Some("合肥"));
    }

    #[test]
    fn test_county_panel_full_chain() {
        let panel = assemble(&request(&[Tier::County], true), &fixture()).unwrap();
        let county = panel.tier(Tier::County).unwrap();
        assert_eq!(county.long.len(), 7);

        let chaoyang = county.long.iter().find(|r| r.code == 110105).unwrap();
        assert_eq!(chaoyang.city.as_ref().unwrap().code, Some(110000));
        assert_eq!(chaoyang.province.as_ref().unwrap().code, Some(110000));

        let shennongjia = county.long.iter().find(|r| r.code == 429021).unwrap();
        assert_eq!(shennongjia.sub_type.as_deref(), Some("林区"));
        assert_eq!(shennongjia.city.as_ref().unwrap().code, None);
        assert_eq!(
            shennongjia.province.as_ref().unwrap().name.as_deref(),
            Some("湖北省")
        );

        assert_eq!(county.counts.get(&2014), Some(&4));
        assert_eq!(county.counts.get(&2015), Some(&3));
    }

    #[test]
    fn test_without_join_has_no_parent_columns() {
        let panel = assemble(&request(&[Tier::Province, Tier::County], false), &fixture()).unwrap();
        let county = panel.tier(Tier::County).unwrap();
        assert!(county.long.iter().all(|r| r.city.is_none() && r.province.is_none()));
        let table = county.long_table(false);
        assert_eq!(table.columns, vec!["区划代码", "年份", "区划名称", "区划类型", "区划层级"]);
    }

    #[test]
    fn test_wide_rows_match_long_codes() {
        let panel = assemble(&request(&Tier::ALL, false), &fixture()).unwrap();
        for tp in &panel.tiers {
            let codes: BTreeSet<u32> = tp.long.iter().map(|r| r.code).collect();
            assert_eq!(tp.wide.rows.len(), codes.len(), "tier {}", tp.tier);
        }
    }

    #[test]
    fn test_long_table_cells() {
        let panel = assemble(&request(&[Tier::County], true), &fixture()).unwrap();
        let table = panel.tier(Tier::County).unwrap().long_table(true);
        assert_eq!(table.columns.len(), 11);
        assert_eq!(table.columns[5], "地级代码");
        let row = table
            .rows
            .iter()
            .find(|r| r[0] == Cell::Int(429021))
            .unwrap();
        assert_eq!(row[5], Cell::Null);
        assert_eq!(row[8], Cell::Int(420000));
    }

    #[test]
    fn test_wide_table_layout() {
        let panel = assemble(&request(&[Tier::City], false), &fixture()).unwrap();
        let table = panel.tier(Tier::City).unwrap().wide_table();
        assert_eq!(table.columns, vec!["区划代码", "2014", "2015"]);
        let chaohu = table.rows.iter().find(|r| r[0] == Cell::Int(341400)).unwrap();
        assert_eq!(chaohu[2], Cell::Null);
    }

    #[test]
    fn test_province_only_join_is_rejected() {
        let mut req = request(&[Tier::Province, Tier::City], true);
        req.tiers.remove(&Tier::City);
        let err = assemble(&req, &fixture()).unwrap_err();
        assert!(matches!(err, crate::error::PanelError::InvalidRequest(_)));
    }

    #[test]
    fn test_validation_table() {
        let panel = assemble(&request(&[Tier::Province, Tier::City], false), &fixture()).unwrap();
        let table = panel.validation_table();
        assert_eq!(table.columns, vec!["年份", "省级区划数量", "地级区划数量"]);
        assert_eq!(table.rows[0], vec![Cell::Int(2014), Cell::Int(3), Cell::Int(3)]);
        assert_eq!(table.rows[1], vec![Cell::Int(2015), Cell::Int(3), Cell::Int(2)]);
    }
}
