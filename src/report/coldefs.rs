//! Loading of column definitions from `<level>_header` tables.

use crate::{common::split_col_name, err::ReportError};

use super::{
    db::ResultDb,
    schema::{ColumnDescriptor, Level, RawColumnDef},
};

/// Load the column descriptors of `level`, optionally only those of one module.
///
/// Columns of `base` and of the modules merged into it come first, then all others, each
/// part in header table order.  Categorical columns without declared categories get the
/// distinct values of the data table.  An absent header table yields no columns.
pub fn load_column_defs(
    db: &ResultDb,
    level: Level,
    merge_into_base: &[String],
    module: Option<&str>,
) -> Result<Vec<ColumnDescriptor>, anyhow::Error> {
    let rows = db.header_rows(level, module)?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut first = Vec::new();
    let mut rest = Vec::new();
    for (col_name, col_def) in rows {
        let mut raw: RawColumnDef =
            serde_json::from_str(&col_def).map_err(|e| ReportError::InvalidColumnDef {
                column: col_name.clone(),
                reason: e.to_string(),
            })?;
        raw.name = col_name;
        let col = ColumnDescriptor::from_raw(raw, level)?;
        if col.module() == "base" || merge_into_base.iter().any(|m| m == col.module()) {
            first.push(col);
        } else {
            rest.push(col);
        }
    }

    let data_columns = if db.table_exists(level.table())? {
        db.column_names(level.table())?
    } else {
        Vec::new()
    };
    let mut result: Vec<ColumnDescriptor> = Vec::with_capacity(first.len() + rest.len());
    for mut col in first.into_iter().chain(rest) {
        if result.iter().any(|c| c.name == col.name) {
            tracing::warn!(
                "duplicate column {} in {}, keeping the first definition",
                &col.name,
                level.header_table()
            );
            continue;
        }
        if col.needs_categories() {
            col.categories = Some(if data_columns.contains(&col.name) {
                db.distinct_values(level, &col.name)?
                    .iter()
                    .map(|value| value.to_json())
                    .collect()
            } else {
                Vec::new()
            });
        }
        result.push(col);
    }
    Ok(result)
}

/// Whether `col_name` belongs to `base` or to one of the modules merged into it.
pub fn in_base_family(col_name: &str, merge_into_base: &[String]) -> bool {
    match split_col_name(col_name) {
        Some((module, _)) => module == "base" || merge_into_base.iter().any(|m| m == module),
        None => false,
    }
}
