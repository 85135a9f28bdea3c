//! Materialization of output rows from fetched database rows.

use itertools::Itertools;

use super::{
    conf::ReportConfig,
    data::{Cell, Row},
    filter::ReportFilter,
    propagate::GenePropagator,
    schema::{ColumnInfo, Level},
    substitution::{substitute_row, ALL_MAPPINGS},
    summary::{GeneSummaries, SummarizingModule},
};

/// Column with the `;`-separated samples of a variant.
pub const SAMPLES: &str = "base__samples";
/// Placeholder for missing parts of a flattened mapping.
const NA: &str = "(na)";

/// Turns fetched rows of one level into output rows.
pub struct RowMaterializer<'a> {
    info: &'a ColumnInfo,
    summarizing: &'a [SummarizingModule],
    summaries: Option<&'a GeneSummaries>,
    propagator: GenePropagator,
    separate_samples: bool,
    keep_json_all_mappings: bool,
}

impl<'a> RowMaterializer<'a> {
    pub fn new(
        info: &'a ColumnInfo,
        summarizing: &'a [SummarizingModule],
        summaries: Option<&'a GeneSummaries>,
        config: &ReportConfig,
    ) -> Self {
        Self {
            info,
            summarizing,
            summaries,
            propagator: GenePropagator::new(info.var_added_cols.clone()),
            separate_samples: config.separate_samples,
            keep_json_all_mappings: config.keep_json_all_mappings,
        }
    }

    /// Keep `base__all_mappings` as JSON regardless of the configuration.
    pub fn keep_json_all_mappings(mut self, keep: bool) -> Self {
        self.keep_json_all_mappings |= keep;
        self
    }

    /// Produce the output rows of one fetched row, projected onto the displayed columns.
    ///
    /// Usually one row results; with separate samples a variant yields one row per sample.
    pub fn materialize(
        &mut self,
        filter: &dyn ReportFilter,
        mut row: Row,
    ) -> Result<Vec<Row>, anyhow::Error> {
        let level = self.info.level;
        for (new_name, old_name) in &self.info.renames {
            if let Some(value) = row.shift_remove(old_name) {
                row.insert(new_name.clone(), value);
            }
        }
        if level == Level::Gene {
            if let Some(summaries) = self.summaries {
                summaries.apply(self.summarizing, &mut row);
            }
        }
        if level == Level::Variant {
            self.propagator.apply(filter, &mut row)?;
        }
        substitute_row(level, &self.info.substitutions, &mut row);
        if level == Level::Variant && !self.keep_json_all_mappings {
            flatten_all_mappings(&mut row);
        }
        for value in row.values_mut() {
            escape_newlines(value);
        }

        let rows = if level == Level::Variant && self.separate_samples {
            split_samples(row)
        } else {
            vec![row]
        };
        Ok(rows.iter().map(|row| self.project(row)).collect())
    }

    fn project(&self, row: &Row) -> Row {
        self.info
            .display
            .iter()
            .map(|name| (name.clone(), row.get(name).cloned().unwrap_or_default()))
            .collect()
    }
}

/// Replace newlines in text cells by `%0A`.
fn escape_newlines(value: &mut Cell) {
    if let Cell::Text(text) = value {
        if text.contains('\n') {
            *text = text.replace('\n', "%0A");
        }
    }
}

/// Render `base__all_mappings` as sorted, de-duplicated
/// `transcript:gene:protein:so:protein_change:rna_change` entries joined by `; `.
fn flatten_all_mappings(row: &mut Row) {
    let Some(value) = row.get_mut(ALL_MAPPINGS) else {
        return;
    };
    if value.is_blank() {
        return;
    }
    match flatten_mappings(&value.to_string()) {
        Ok(flat) => *value = Cell::Text(flat),
        Err(e) => tracing::warn!("could not flatten {}: {}", ALL_MAPPINGS, e),
    }
}

fn flatten_mappings(value: &str) -> Result<String, anyhow::Error> {
    fn part(tuple: &[serde_json::Value], idx: usize) -> String {
        match tuple.get(idx) {
            None | Some(serde_json::Value::Null) => NA.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    let mappings: serde_json::Map<String, serde_json::Value> = serde_json::from_str(value)?;
    let mut entries = Vec::new();
    for (gene, tuples) in &mappings {
        let tuples = tuples
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("mappings of {} are not a list", gene))?;
        for tuple in tuples {
            let tuple = tuple
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("mapping of {} is not a list", gene))?;
            entries.push(format!(
                "{}:{}:{}:{}:{}:{}",
                part(tuple, 3),
                gene,
                part(tuple, 0),
                part(tuple, 2),
                part(tuple, 1),
                part(tuple, 4)
            ));
        }
    }
    Ok(entries.into_iter().sorted().dedup().join("; "))
}

/// Split a variant row into one row per sample of `base__samples`.
fn split_samples(row: Row) -> Vec<Row> {
    let samples = match row.get(SAMPLES) {
        Some(Cell::Text(samples)) if !samples.is_empty() => samples
            .split(';')
            .map(str::to_string)
            .collect::<Vec<_>>(),
        _ => return vec![row],
    };
    samples
        .into_iter()
        .map(|sample| {
            let mut row = row.clone();
            row.insert(SAMPLES.to_string(), Cell::Text(sample));
            row
        })
        .collect()
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::report::summary::test::NoRows;

    fn info(level: Level, display: &[&str]) -> ColumnInfo {
        ColumnInfo {
            level,
            groups: Vec::new(),
            columns: Vec::new(),
            display: display.iter().map(|s| s.to_string()).collect(),
            renames: Default::default(),
            var_added_cols: Vec::new(),
            substitutions: Vec::new(),
        }
    }

    fn row(values: &[(&str, Cell)]) -> Row {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn flatten_sorted_and_deduplicated() -> Result<(), anyhow::Error> {
        let flat = flatten_mappings(
            r#"{"TP53": [["P2", "p.R2H", "missense", "T2", null],
                         ["P1", null, "syn", "T1", "c.1A>G"],
                         ["P1", null, "syn", "T1", "c.1A>G"]]}"#,
        )?;

        assert_eq!(
            flat,
            "T1:TP53:P1:syn:(na):c.1A>G; T2:TP53:P2:missense:p.R2H:(na)"
        );

        Ok(())
    }

    #[test]
    fn split_into_samples() {
        let split = split_samples(row(&[
            ("base__uid", Cell::Int(1)),
            (SAMPLES, Cell::from("s1;s2;s3")),
        ]));

        assert_eq!(split.len(), 3);
        assert_eq!(split[1][SAMPLES], Cell::from("s2"));
        assert_eq!(split[2]["base__uid"], Cell::Int(1));
        assert_eq!(split_samples(row(&[(SAMPLES, Cell::Absent)])).len(), 1);
    }

    #[test]
    fn split_keeps_empty_sample_names() {
        let split = split_samples(row(&[(SAMPLES, Cell::from("s1;;s3"))]));

        assert_eq!(
            split.iter().map(|r| r[SAMPLES].clone()).collect::<Vec<_>>(),
            vec![Cell::from("s1"), Cell::from(""), Cell::from("s3")]
        );
        assert_eq!(split_samples(row(&[(SAMPLES, Cell::from(""))])).len(), 1);
    }

    #[test]
    fn materialize_variant_row() -> Result<(), anyhow::Error> {
        let mut info = info(
            Level::Variant,
            &["base__uid", "base__x", "base__note", ALL_MAPPINGS, "clinvar__missing"],
        );
        info.renames
            .insert("base__x".to_string(), "mapper__x".to_string());
        let config = ReportConfig::default();
        let mut materializer = RowMaterializer::new(&info, &[], None, &config);

        let rows = materializer.materialize(
            &NoRows,
            row(&[
                ("base__uid", Cell::Int(7)),
                ("mapper__x", Cell::from("so1")),
                ("base__note", Cell::from("line 1\nline 2")),
                (ALL_MAPPINGS, Cell::from(r#"{"G": [["P", "p.X", "MIS", "T", "c.X"]]}"#)),
                ("base__extra", Cell::from("not displayed")),
            ]),
        )?;

        assert_eq!(
            rows,
            vec![row(&[
                ("base__uid", Cell::Int(7)),
                ("base__x", Cell::from("so1")),
                ("base__note", Cell::from("line 1%0Aline 2")),
                (ALL_MAPPINGS, Cell::from("T:G:P:MIS:p.X:c.X")),
                ("clinvar__missing", Cell::Absent),
            ])]
        );

        Ok(())
    }

    #[test]
    fn keep_json_mappings() -> Result<(), anyhow::Error> {
        let info = info(Level::Variant, &[ALL_MAPPINGS]);
        let config = ReportConfig::default();
        let mut materializer =
            RowMaterializer::new(&info, &[], None, &config).keep_json_all_mappings(true);
        let json = r#"{"G": [["P", "p.X", "MIS", "T", "c.X"]]}"#;

        let rows = materializer.materialize(&NoRows, row(&[(ALL_MAPPINGS, Cell::from(json))]))?;

        assert_eq!(rows[0][ALL_MAPPINGS], Cell::from(json));

        Ok(())
    }

    #[rstest::rstest]
    #[case::separate(true, 3)]
    #[case::joined(false, 1)]
    fn separate_samples(
        #[case] separate: bool,
        #[case] expected: usize,
    ) -> Result<(), anyhow::Error> {
        let info = info(Level::Variant, &["base__uid", SAMPLES]);
        let config = ReportConfig {
            separate_samples: separate,
            ..Default::default()
        };
        let mut materializer = RowMaterializer::new(&info, &[], None, &config);

        let rows = materializer.materialize(
            &NoRows,
            row(&[("base__uid", Cell::Int(1)), (SAMPLES, Cell::from("s1;s2;s3"))]),
        )?;

        assert_eq!(rows.len(), expected);

        Ok(())
    }

    #[test]
    fn samples_not_split_on_gene_level() -> Result<(), anyhow::Error> {
        let info = info(Level::Gene, &[SAMPLES]);
        let config = ReportConfig {
            separate_samples: true,
            ..Default::default()
        };
        let mut materializer = RowMaterializer::new(&info, &[], None, &config);

        let rows = materializer.materialize(&NoRows, row(&[(SAMPLES, Cell::from("s1;s2"))]))?;

        assert_eq!(rows.len(), 1);

        Ok(())
    }
}
