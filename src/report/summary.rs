//! Gene-level summaries computed by summarizing modules.

use std::sync::Arc;

use indexmap::IndexMap;

use super::{
    data::{cell, Cell, Row},
    filter::ReportFilter,
    registry::ModuleRegistry,
    schema::{ColumnInfo, ColumnKind, Level, RawColumnDef},
};

/// Modules that never summarize by gene.
pub const RESERVED_MODULES: &[&str] = &[
    "base",
    "hg38",
    "hg19",
    "hg18",
    "extra_vcf_info",
    "extra_variant_info",
    "original_input",
];

/// Aggregation applied by the built-in column aggregator.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SummaryOp {
    /// Number of variants with a value.
    Count,
    /// Distinct values joined by `;`.
    Distinct,
    /// First value seen.
    First,
    Max,
    Min,
    Sum,
}

/// Per-gene aggregate values: gene symbol to field name to value.
pub type GeneSummaryData = IndexMap<String, IndexMap<String, Cell>>;

/// What a summarizer gets to work with.
pub struct SummaryContext<'a> {
    /// The filtered result rows.
    pub filter: &'a dyn ReportFilter,
    /// Name of the summarizing module.
    pub module: &'a str,
    /// The declared output columns, with bare field names.
    pub columns: &'a [RawColumnDef],
}

/// A module's gene-level aggregation.
pub trait GeneSummarizer {
    /// Compute the per-gene aggregates over the filtered variants.
    fn summarize_by_gene(&self, ctx: &SummaryContext) -> Result<GeneSummaryData, anyhow::Error>;
}

/// Running aggregate of one field of one gene.
#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Distinct(Vec<String>),
    First(Cell),
    Max(Cell),
    Min(Cell),
    Sum { total: f64, all_int: bool, seen: bool },
}

impl Accumulator {
    fn new(op: SummaryOp) -> Self {
        match op {
            SummaryOp::Count => Accumulator::Count(0),
            SummaryOp::Distinct => Accumulator::Distinct(Vec::new()),
            SummaryOp::First => Accumulator::First(Cell::Absent),
            SummaryOp::Max => Accumulator::Max(Cell::Absent),
            SummaryOp::Min => Accumulator::Min(Cell::Absent),
            SummaryOp::Sum => Accumulator::Sum {
                total: 0.0,
                all_int: true,
                seen: false,
            },
        }
    }

    fn push(&mut self, value: &Cell) {
        if value.is_absent() {
            return;
        }
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Distinct(values) => {
                for token in value.to_string().split(';').filter(|t| !t.is_empty()) {
                    if !values.iter().any(|v| v == token) {
                        values.push(token.to_string());
                    }
                }
            }
            Accumulator::First(first) => {
                if first.is_absent() {
                    *first = value.clone();
                }
            }
            Accumulator::Max(best) => replace_if(best, value, |b, v| v > b),
            Accumulator::Min(best) => replace_if(best, value, |b, v| v < b),
            Accumulator::Sum {
                total,
                all_int,
                seen,
            } => {
                if let Some(v) = value.as_f64() {
                    *total += v;
                    *all_int &= matches!(value, Cell::Int(_));
                    *seen = true;
                }
            }
        }
    }

    fn finish(self) -> Cell {
        match self {
            Accumulator::Count(n) => Cell::Int(n),
            Accumulator::Distinct(values) if values.is_empty() => Cell::Absent,
            Accumulator::Distinct(values) => Cell::Text(values.join(";")),
            Accumulator::First(value) | Accumulator::Max(value) | Accumulator::Min(value) => value,
            Accumulator::Sum { seen: false, .. } => Cell::Absent,
            Accumulator::Sum {
                total,
                all_int: true,
                ..
            } => Cell::Int(total as i64),
            Accumulator::Sum { total, .. } => Cell::Float(total),
        }
    }
}

fn replace_if(best: &mut Cell, value: &Cell, better: impl Fn(f64, f64) -> bool) {
    let replace = match (best.as_f64(), value.as_f64()) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(b), Some(v)) => better(b, v),
    };
    if replace {
        *best = value.clone();
    }
}

/// Built-in summarizer aggregating variant columns by `base__hugo`.
///
/// Each output column reads `source` if given, else `<module>__<field>`, else
/// `base__<field>`.  The operation defaults to `max` for numeric columns and to
/// `distinct` otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnAggregator;

impl ColumnAggregator {
    fn op_of(column: &RawColumnDef) -> SummaryOp {
        column.summary.unwrap_or_else(|| {
            let kind = ColumnKind::from_parts(
                &column.name,
                column.col_type.as_deref(),
                column.category.as_deref(),
            )
            .unwrap_or_default();
            if kind.is_numeric() {
                SummaryOp::Max
            } else {
                SummaryOp::Distinct
            }
        })
    }

    fn value_of<'r>(row: &'r Row, module: &str, column: &RawColumnDef) -> &'r Cell {
        if let Some(source) = &column.source {
            return cell(row, source);
        }
        let own = format!("{}__{}", module, column.name);
        if row.contains_key(&own) {
            cell(row, &own)
        } else {
            cell(row, &format!("base__{}", column.name))
        }
    }
}

impl GeneSummarizer for ColumnAggregator {
    fn summarize_by_gene(&self, ctx: &SummaryContext) -> Result<GeneSummaryData, anyhow::Error> {
        let ops = ctx.columns.iter().map(Self::op_of).collect::<Vec<_>>();
        let mut acc: IndexMap<String, Vec<Accumulator>> = IndexMap::new();
        ctx.filter.for_each_row(Level::Variant, None, &mut |row| {
            let hugo = match cell(&row, "base__hugo") {
                Cell::Absent => return Ok(()),
                value => value.to_string(),
            };
            if hugo.is_empty() {
                return Ok(());
            }
            let entry = acc
                .entry(hugo)
                .or_insert_with(|| ops.iter().copied().map(Accumulator::new).collect());
            for (column, acc) in ctx.columns.iter().zip(entry.iter_mut()) {
                acc.push(Self::value_of(&row, ctx.module, column));
            }
            Ok(())
        })?;

        Ok(acc
            .into_iter()
            .map(|(hugo, accs)| {
                let record = ctx
                    .columns
                    .iter()
                    .zip(accs)
                    .map(|(column, acc)| (column.name.clone(), acc.finish()))
                    .collect();
                (hugo, record)
            })
            .collect())
    }
}

/// A module contributing gene summary columns for this run.
#[derive(Clone)]
pub struct SummarizingModule {
    pub name: String,
    /// Group the columns belong to, `base` for modules folded into it.
    pub group: String,
    pub title: String,
    /// Declared output columns with bare field names.
    pub columns: Vec<RawColumnDef>,
    pub summarizer: Arc<dyn GeneSummarizer>,
}

impl std::fmt::Debug for SummarizingModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummarizingModule")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("columns", &self.columns.len())
            .finish()
    }
}

impl SummarizingModule {
    /// Qualified report name of a declared output column.
    pub fn column_name(&self, column: &RawColumnDef) -> String {
        format!("{}__{}", self.group, column.name)
    }
}

/// Determine the modules that summarize by gene, the mapper first.
///
/// Modules that are not installed locally or provide no summarizer are skipped
/// with a warning.
pub fn summarizing_modules(
    variant_modules: &[String],
    mapper: &str,
    merge_into_base: &[String],
    registry: &dyn ModuleRegistry,
) -> Result<Vec<SummarizingModule>, anyhow::Error> {
    let mut candidates = Vec::new();
    for name in variant_modules {
        if name == mapper || RESERVED_MODULES.contains(&name.as_str()) {
            continue;
        }
        match registry.local_module_info(name)? {
            None => tracing::warn!(
                "module {} does not exist in the system, gene level summary for it is skipped",
                name
            ),
            Some(info) if info.conf.can_summarize_by_gene => candidates.push(info),
            Some(_) => tracing::debug!("module {} does not summarize by gene", name),
        }
    }
    match registry.local_module_info(mapper)? {
        Some(info) => candidates.insert(0, info),
        None => tracing::debug!("mapper {} is not installed locally", mapper),
    }

    let mut result = Vec::new();
    for info in candidates {
        if info.conf.gene_summary_output_columns.is_empty() {
            tracing::debug!("module {} declares no gene summary columns", &info.name);
            continue;
        }
        let Some(summarizer) = registry.summarizer(&info) else {
            tracing::warn!(
                "module {} has no loadable gene summarizer, gene level summary for it is skipped",
                &info.name
            );
            continue;
        };
        let group = if merge_into_base.contains(&info.name) {
            "base".to_string()
        } else {
            info.name.clone()
        };
        result.push(SummarizingModule {
            group,
            title: info.title.clone(),
            columns: info.conf.gene_summary_output_columns.clone(),
            name: info.name,
            summarizer,
        });
    }
    Ok(result)
}

/// Gene summaries of all summarizing modules, computed once per run.
#[derive(Debug, Default, Clone)]
pub struct GeneSummaries {
    /// Module name to summary data; `None` where the summarizer failed.
    data: IndexMap<String, Option<GeneSummaryData>>,
}

impl GeneSummaries {
    /// Run all summarizers over the filtered rows.
    ///
    /// A failing summarizer is logged and its columns stay absent.
    pub fn compute(modules: &[SummarizingModule], filter: &dyn ReportFilter) -> Self {
        let mut data = IndexMap::new();
        for module in modules {
            let ctx = SummaryContext {
                filter,
                module: &module.name,
                columns: &module.columns,
            };
            let summary = match module.summarizer.summarize_by_gene(&ctx) {
                Ok(summary) => {
                    tracing::debug!(
                        "module {} summarized {} genes",
                        &module.name,
                        summary.len()
                    );
                    Some(summary)
                }
                Err(e) => {
                    tracing::error!("gene summary of module {} failed: {}", &module.name, e);
                    None
                }
            };
            data.insert(module.name.clone(), summary);
        }
        Self { data }
    }

    /// Summary data of a module, if it was computed successfully.
    pub fn get(&self, module: &str) -> Option<&GeneSummaryData> {
        self.data.get(module).and_then(Option::as_ref)
    }

    /// Merge the summaries of the row's gene into a gene-level row.
    pub fn apply(&self, modules: &[SummarizingModule], row: &mut Row) {
        let hugo = match cell(row, "base__hugo") {
            Cell::Absent => None,
            value => Some(value.to_string()),
        };
        for module in modules {
            let record = hugo
                .as_ref()
                .and_then(|hugo| self.get(&module.name)?.get(hugo))
                .filter(|record| {
                    module
                        .columns
                        .iter()
                        .all(|col| record.contains_key(&col.name))
                });
            for column in &module.columns {
                let value = record
                    .and_then(|record| record.get(&column.name))
                    .cloned()
                    .unwrap_or_default();
                row.insert(module.column_name(column), value);
            }
        }
    }

    /// Collect the categories of categorical summary columns from the produced values.
    ///
    /// Values are substituted first where the column has a substitution map.
    pub fn populate_categories(&self, modules: &[SummarizingModule], info: &mut ColumnInfo) {
        for module in modules {
            let Some(data) = self.get(&module.name) else {
                continue;
            };
            for column in &module.columns {
                let name = module.column_name(column);
                let Some(col) = info.columns.iter_mut().find(|c| c.name == name) else {
                    continue;
                };
                if !col.needs_categories() || !col.gene_summary {
                    continue;
                }
                let mut cats: Vec<serde_json::Value> = Vec::new();
                for record in data.values() {
                    let value = record.get(&column.name).cloned().unwrap_or_default();
                    let value = match (&col.substitution, &value) {
                        (Some(subs), v) if !v.is_absent() => subs
                            .get(&v.to_string())
                            .map(|s| Cell::Text(s.clone()))
                            .unwrap_or(value),
                        _ => value,
                    };
                    let value = value.to_json();
                    if !cats.contains(&value) {
                        cats.push(value);
                    }
                }
                col.categories = Some(cats);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::report::{
        db::{test::example_db, ResultDb},
        filter::{FilterSource, SqlFilter},
        registry::{test::StaticRegistry, ModuleType},
    };

    /// Summarizer returning fixed data.
    #[derive(Debug, Clone, Default)]
    pub struct FixedSummarizer(pub GeneSummaryData);

    impl GeneSummarizer for FixedSummarizer {
        fn summarize_by_gene(&self, _: &SummaryContext) -> Result<GeneSummaryData, anyhow::Error> {
            Ok(self.0.clone())
        }
    }

    /// Summarizer that always fails.
    #[derive(Debug, Clone, Default)]
    pub struct FailingSummarizer;

    impl GeneSummarizer for FailingSummarizer {
        fn summarize_by_gene(&self, _: &SummaryContext) -> Result<GeneSummaryData, anyhow::Error> {
            anyhow::bail!("summarizer exploded")
        }
    }

    /// Filter without any rows.
    pub struct NoRows;

    impl ReportFilter for NoRows {
        fn result_levels(&self) -> Result<Vec<Level>, anyhow::Error> {
            Ok(Vec::new())
        }

        fn row_count(&self, _: Level) -> Result<usize, anyhow::Error> {
            Ok(0)
        }

        fn for_each_row(
            &self,
            _: Level,
            _: Option<crate::report::filter::Page>,
            _: &mut dyn FnMut(Row) -> Result<(), anyhow::Error>,
        ) -> Result<usize, anyhow::Error> {
            Ok(0)
        }

        fn gene_row(&self, _: &str) -> Result<Option<Row>, anyhow::Error> {
            Ok(None)
        }
    }

    fn raw(name: &str, col_type: &str, summary: Option<SummaryOp>) -> RawColumnDef {
        RawColumnDef {
            name: name.into(),
            col_type: Some(col_type.into()),
            summary,
            ..Default::default()
        }
    }

    fn module(
        name: &str,
        columns: Vec<RawColumnDef>,
        s: Arc<dyn GeneSummarizer>,
    ) -> SummarizingModule {
        SummarizingModule {
            name: name.into(),
            group: name.into(),
            title: name.into(),
            columns,
            summarizer: s,
        }
    }

    #[test]
    fn column_aggregator_over_example() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let db = ResultDb::open(example_db(&tmp_dir)?)?;
        let filter = SqlFilter::load(&db, &FilterSource::None, None, &[], &[])?;
        let columns = vec![
            raw("score", "float", None),
            raw("sig", "string", None),
            RawColumnDef {
                source: Some("base__uid".into()),
                ..raw("count", "int", Some(SummaryOp::Count))
            },
            RawColumnDef {
                source: Some("summarymod__score".into()),
                ..raw("total", "float", Some(SummaryOp::Sum))
            },
        ];
        let ctx = SummaryContext {
            filter: &filter,
            module: "summarymod",
            columns: &columns,
        };

        let data = ColumnAggregator.summarize_by_gene(&ctx)?;

        assert_eq!(
            data.keys().collect::<Vec<_>>(),
            vec!["TP53", "BRCA1", "UNKNOWN", "KRAS"]
        );
        let brca1 = &data["BRCA1"];
        assert_eq!(brca1["score"], Cell::Float(0.8));
        assert_eq!(brca1["count"], Cell::Int(2));
        assert_eq!(brca1["total"], Cell::Float(0.3 + 0.8));
        // `sig` is not a summarymod column, so nothing is found
        assert_eq!(brca1["sig"], Cell::Absent);

        Ok(())
    }

    #[test]
    fn accumulator_distinct_splits_lists() {
        let mut acc = Accumulator::new(SummaryOp::Distinct);
        acc.push(&Cell::from("a;b"));
        acc.push(&Cell::Absent);
        acc.push(&Cell::from("b;c"));
        assert_eq!(acc.finish(), Cell::from("a;b;c"));
    }

    #[rstest::rstest]
    #[case(SummaryOp::Min, Cell::Int(1))]
    #[case(SummaryOp::Max, Cell::Int(5))]
    #[case(SummaryOp::Sum, Cell::Int(9))]
    #[case(SummaryOp::First, Cell::Int(3))]
    #[case(SummaryOp::Count, Cell::Int(3))]
    fn accumulator_numeric(#[case] op: SummaryOp, #[case] expected: Cell) {
        let mut acc = Accumulator::new(op);
        for v in [3, 5, 1] {
            acc.push(&Cell::Int(v));
        }
        acc.push(&Cell::Absent);
        assert_eq!(acc.finish(), expected);
    }

    #[test]
    fn apply_known_and_unknown_genes() {
        let mut data = GeneSummaryData::new();
        data.insert(
            "BRCA1".into(),
            [("count".to_string(), Cell::Int(2))].into_iter().collect(),
        );
        let modules = vec![module(
            "summarymod",
            vec![raw("count", "int", None)],
            Arc::new(FixedSummarizer(data)),
        )];
        let summaries = GeneSummaries::compute(&modules, &NoRows);

        let mut brca1: Row = [("base__hugo".to_string(), Cell::from("BRCA1"))]
            .into_iter()
            .collect();
        summaries.apply(&modules, &mut brca1);
        assert_eq!(brca1["summarymod__count"], Cell::Int(2));

        let mut unknown: Row = [("base__hugo".to_string(), Cell::from("UNKNOWN"))]
            .into_iter()
            .collect();
        summaries.apply(&modules, &mut unknown);
        assert_eq!(unknown["summarymod__count"], Cell::Absent);
    }

    #[test]
    fn failing_summarizer_degrades_to_absent() {
        let modules = vec![module(
            "broken",
            vec![raw("count", "int", None)],
            Arc::new(FailingSummarizer),
        )];
        let summaries = GeneSummaries::compute(&modules, &NoRows);

        assert!(summaries.get("broken").is_none());
        let mut row: Row = [("base__hugo".to_string(), Cell::from("TP53"))]
            .into_iter()
            .collect();
        summaries.apply(&modules, &mut row);
        assert_eq!(row["broken__count"], Cell::Absent);
    }

    #[test]
    fn eligibility() -> Result<(), anyhow::Error> {
        let registry = StaticRegistry::default()
            .with_module("mapper", ModuleType::Mapper, true, &["so"])
            .with_module("summarymod", ModuleType::Annotator, true, &["count"])
            .with_module("clinvar", ModuleType::Annotator, false, &[])
            .with_module("hg38", ModuleType::Annotator, true, &["x"]);
        let variant_modules = ["base", "clinvar", "hg38", "mapper", "missing", "summarymod"]
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        let merge = vec!["mapper".to_string(), "tagsampler".to_string()];

        let modules = summarizing_modules(&variant_modules, "mapper", &merge, &registry)?;

        assert_eq!(
            modules
                .iter()
                .map(|m| (m.name.as_str(), m.group.as_str()))
                .collect::<Vec<_>>(),
            vec![("mapper", "base"), ("summarymod", "summarymod")]
        );

        Ok(())
    }
}
