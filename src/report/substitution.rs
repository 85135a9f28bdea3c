//! Report-time substitution of coded values.

use indexmap::IndexMap;

use crate::common::split_col_name;

use super::{
    data::{Cell, Row},
    db::ReportSubs,
    schema::{ColumnDescriptor, Level},
};

/// Variant column holding the per-gene mappings as JSON.
pub const ALL_MAPPINGS: &str = "base__all_mappings";
/// Gene column holding comma-joined sequence ontology counts, e.g. `MIS(2),SYN(1)`.
pub const ALL_SO: &str = "base__all_so";
/// Index of the sequence ontology code in an all-mappings tuple.
const MAPPING_SO_IDX: usize = 2;
/// Length of the code prefix in `base__all_so` tokens.
const SO_CODE_LEN: usize = 3;

/// Substitution of one column's coded values.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SubstitutionRule {
    /// Module the column is reported under.
    pub module: String,
    pub field: String,
    /// Qualified report column name.
    pub column: String,
    /// Code to label.
    pub subs: IndexMap<String, String>,
}

/// Build the substitution rules of a level and attach the maps to the columns.
///
/// Folded columns are looked up under their original module first and then under `base`.
pub fn build_rules(
    columns: &mut [ColumnDescriptor],
    renames: &IndexMap<String, String>,
    subs: &ReportSubs,
) -> Vec<SubstitutionRule> {
    let mut rules = Vec::new();
    if subs.is_empty() {
        return rules;
    }
    for col in columns.iter_mut() {
        let Some((module, field)) = split_col_name(&col.name) else {
            continue;
        };
        let mut candidates = Vec::with_capacity(2);
        if let Some((orig_module, orig_field)) =
            renames.get(&col.name).and_then(|orig| split_col_name(orig))
        {
            candidates.push((orig_module, orig_field));
        }
        candidates.push((module, field));
        let found = candidates
            .into_iter()
            .find_map(|(m, f)| subs.get(m).and_then(|fields| fields.get(f)));
        if let Some(map) = found {
            rules.push(SubstitutionRule {
                module: module.to_string(),
                field: field.to_string(),
                column: col.name.clone(),
                subs: map.clone(),
            });
            col.substitution = Some(map.clone());
        }
    }
    rules
}

/// Map each comma-separated token, returning `None` if nothing changed.
fn substitute_tokens(value: &str, subs: &IndexMap<String, String>) -> Option<String> {
    let mut changed = false;
    let tokens = value
        .split(',')
        .map(|token| match subs.get(token) {
            Some(label) => {
                changed = true;
                label.as_str()
            }
            None => token,
        })
        .collect::<Vec<_>>();
    changed.then(|| tokens.join(","))
}

fn substitute_all_mappings(
    value: &str,
    subs: &IndexMap<String, String>,
) -> Result<String, anyhow::Error> {
    let mut mappings: serde_json::Value = serde_json::from_str(value)?;
    let genes = mappings
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("all mappings is not a JSON object"))?;
    for tuples in genes.values_mut() {
        let Some(tuples) = tuples.as_array_mut() else {
            continue;
        };
        for tuple in tuples.iter_mut() {
            if let Some(so) = tuple.get_mut(MAPPING_SO_IDX) {
                if let Some(codes) = so.as_str() {
                    if let Some(new_codes) = substitute_tokens(codes, subs) {
                        *so = serde_json::Value::String(new_codes);
                    }
                }
            }
        }
    }
    Ok(serde_json::to_string(&mappings)?)
}

fn substitute_all_so(value: &str, subs: &IndexMap<String, String>) -> String {
    value
        .split(',')
        .map(|token| {
            let split = token
                .char_indices()
                .nth(SO_CODE_LEN)
                .map(|(idx, _)| idx)
                .unwrap_or(token.len());
            let (code, rest) = token.split_at(split);
            match subs.get(code) {
                Some(label) => format!("{}{}", label, rest),
                None => token.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Rewrite the coded values of `row` in place.
///
/// Unmapped codes pass through; absent and empty cells are left alone.
pub fn substitute_row(level: Level, rules: &[SubstitutionRule], row: &mut Row) {
    for rule in rules {
        let Some(value) = row.get_mut(&rule.column) else {
            continue;
        };
        if value.is_blank() {
            continue;
        }
        let text = value.to_string();
        let new_value = if level == Level::Variant && rule.column == ALL_MAPPINGS {
            match substitute_all_mappings(&text, &rule.subs) {
                Ok(new_text) => Some(new_text),
                Err(e) => {
                    tracing::warn!("could not substitute {}: {}", ALL_MAPPINGS, e);
                    None
                }
            }
        } else if level == Level::Gene && rule.column == ALL_SO {
            Some(substitute_all_so(&text, &rule.subs))
        } else if let Some(label) = rule.subs.get(&text) {
            Some(label.clone())
        } else {
            substitute_tokens(&text, &rule.subs)
        };
        if let Some(new_value) = new_value {
            *value = Cell::Text(new_value);
        }
    }
}
