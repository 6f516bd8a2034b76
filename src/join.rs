// Hierarchical joins between tiers.
//
// A parent is found by turning the child's code into the parent's code
// (prefix + zero padding) and matching on (parent code, year). There is
// no explicit foreign key in the source data.
use std::collections::HashMap;

use crate::types::{is_municipality, LongRow, ParentRef, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Unmatched children are kept with an empty parent.
    Left,
    /// Unmatched children are dropped.
    Inner,
}

impl JoinKind {
    /// County -> City keeps counties without a prefecture parent (counties
    /// directly administered by a province); every other link drops them.
    pub fn for_link(child: Tier, parent: Tier) -> JoinKind {
        match (child, parent) {
            (Tier::County, Tier::City) => JoinKind::Left,
            _ => JoinKind::Inner,
        }
    }
}

fn province_prefix(code: u32) -> u32 {
    code / 10000 * 10000
}

/// Code of the enclosing `parent` area, or `None` if `parent` is not above `child`.
pub fn parent_code(code: u32, child: Tier, parent: Tier) -> Option<u32> {
    match (child, parent) {
        (Tier::County, Tier::City) => {
            let province = province_prefix(code);
            if is_municipality(province) {
                Some(province)
            } else {
                Some(code / 100 * 100)
            }
        }
        (Tier::City, Tier::Province) if is_municipality(code) => Some(code),
        (Tier::City, Tier::Province) | (Tier::County, Tier::Province) => {
            Some(province_prefix(code))
        }
        _ => None,
    }
}

fn with_parent(row: LongRow, parent: Tier, link: ParentRef) -> LongRow {
    match parent {
        Tier::City => LongRow { city: Some(link), ..row },
        Tier::Province => LongRow { province: Some(link), ..row },
        Tier::County => row,
    }
}

/// Attach `parent_tier` code/name fields to every child row.
///
/// - `parents` is indexed once by `(code, year)`; a child looks up
///   `(parent_code(child), child.year)`.
/// - Several parent rows under the same key each produce an output row.
/// - No match: County -> City keeps the row with an empty link, every other
///   link drops it.
/// - Output keeps child order; fan-out rows follow parent order.
pub fn attach_parent(
    children: Vec<LongRow>,
    parents: &[LongRow],
    child_tier: Tier,
    parent_tier: Tier,
) -> Vec<LongRow> {
    let mut index: HashMap<(u32, i32), Vec<&LongRow>> = HashMap::new();
    for p in parents {
        index.entry((p.code, p.year)).or_default().push(p);
    }
    let kind = JoinKind::for_link(child_tier, parent_tier);

    children
        .into_iter()
        .flat_map(|row| {
            let matches = parent_code(row.code, child_tier, parent_tier)
                .and_then(|code| index.get(&(code, row.year)));
            match (matches, kind) {
                (Some(found), _) => found
                    .iter()
                    .map(|p| {
                        let link = ParentRef {
                            code: Some(p.code),
                            name: Some(p.name.clone()),
                            short_name: p.short_name.clone(),
                        };
                        with_parent(row.clone(), parent_tier, link)
                    })
                    .collect::<Vec<_>>(),
                (None, JoinKind::Left) => {
                    vec![with_parent(row, parent_tier, ParentRef::unmatched())]
                }
                (None, JoinKind::Inner) => Vec::new(),
            }
        })
        .collect()
}

/// Run the whole join chain for `tier`, given long tables of its ancestors.
///
/// Counties go through City then Province; the province code is always
/// derived from the county's own code, not from the (possibly empty) city link.
pub fn attach_ancestors(
    rows: Vec<LongRow>,
    tier: Tier,
    ancestors: &HashMap<Tier, Vec<LongRow>>,
) -> Vec<LongRow> {
    let empty = Vec::new();
    tier.ancestors().into_iter().fold(rows, |acc, parent| {
        let parents = ancestors.get(&parent).unwrap_or(&empty);
        attach_parent(acc, parents, tier, parent)
    })
}
