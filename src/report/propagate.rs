//! Propagation of gene-level columns into variant rows.

use std::collections::HashMap;

use super::{
    coldefs::load_column_defs,
    data::{cell, Cell, Row},
    db::ResultDb,
    filter::ReportFilter,
    schema::{ColumnDescriptor, ColumnGroup, Level},
};

/// Gene-level columns of every gene annotator outside the `base` family, grouped by module.
///
/// Modules are ordered by name; modules without columns are skipped.
pub fn gene_columns_for_variant(
    db: &ResultDb,
    merge_into_base: &[String],
) -> Result<Vec<(ColumnGroup, Vec<ColumnDescriptor>)>, anyhow::Error> {
    if !db.table_exists(Level::Gene.table())? {
        return Ok(Vec::new());
    }
    let mut result = Vec::new();
    for (name, displayname) in db.annotators(Level::Gene)? {
        if name == "base" || merge_into_base.contains(&name) {
            continue;
        }
        let columns = load_column_defs(db, Level::Gene, merge_into_base, Some(&name))?;
        if columns.is_empty() {
            continue;
        }
        let mut group = ColumnGroup::new(name, displayname);
        group.count = columns.len();
        result.push((group, columns));
    }
    Ok(result)
}

/// Copies gene row values into variant rows, matching on `base__hugo`.
///
/// Gene rows are looked up once per symbol.
#[derive(Debug, Default)]
pub struct GenePropagator {
    columns: Vec<String>,
    cache: HashMap<String, Option<Row>>,
}

impl GenePropagator {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            cache: HashMap::new(),
        }
    }

    /// Set the propagated columns of `row`; all are absent if the gene is unknown.
    pub fn apply(&mut self, filter: &dyn ReportFilter, row: &mut Row) -> Result<(), anyhow::Error> {
        if self.columns.is_empty() {
            return Ok(());
        }
        let gene_row = match cell(row, "base__hugo") {
            Cell::Absent => None,
            value => {
                let hugo = value.to_string();
                if !self.cache.contains_key(&hugo) {
                    let gene_row = filter.gene_row(&hugo)?;
                    self.cache.insert(hugo.clone(), gene_row);
                }
                self.cache.get(&hugo).and_then(Option::as_ref)
            }
        };
        for column in &self.columns {
            let value = gene_row
                .and_then(|gene_row| gene_row.get(column))
                .cloned()
                .unwrap_or_default();
            row.insert(column.clone(), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::report::{
        db::test::example_db,
        filter::{FilterSource, SqlFilter},
    };

    #[test]
    fn gene_columns_of_example() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let db = ResultDb::open(example_db(&tmp_dir)?)?;

        let groups = gene_columns_for_variant(&db, &["mapper".to_string()])?;

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0.name, "genemod");
        assert_eq!(groups[0].0.displayname, "Gene Module");
        assert_eq!(groups[0].0.count, 1);
        assert_eq!(groups[0].1[0].name, "genemod__tier");

        Ok(())
    }

    #[rstest::rstest]
    #[case::known("TP53", Cell::from("high"))]
    #[case::unknown("UNKNOWN", Cell::Absent)]
    fn propagate(#[case] hugo: &str, #[case] expected: Cell) -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let db = ResultDb::open(example_db(&tmp_dir)?)?;
        let filter = SqlFilter::load(&db, &FilterSource::None, None, &[], &[])?;
        let mut propagator = GenePropagator::new(vec!["genemod__tier".to_string()]);

        let mut row: Row = [("base__hugo".to_string(), Cell::from(hugo))]
            .into_iter()
            .collect();
        propagator.apply(&filter, &mut row)?;

        assert_eq!(row["genemod__tier"], expected);
        assert_ne!(row["genemod__tier"], Cell::from(""));

        Ok(())
    }

    #[test]
    fn missing_symbol_gives_absent() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let db = ResultDb::open(example_db(&tmp_dir)?)?;
        let filter = SqlFilter::load(&db, &FilterSource::None, None, &[], &[])?;
        let mut propagator = GenePropagator::new(vec!["genemod__tier".to_string()]);

        let mut row = Row::new();
        propagator.apply(&filter, &mut row)?;

        assert_eq!(row["genemod__tier"], Cell::Absent);

        Ok(())
    }
}
