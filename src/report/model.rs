//! Building the column model ("column info") of a level.

use indexmap::IndexMap;

use super::{
    coldefs::load_column_defs,
    colgroups::{count_columns, fold_into_base, sorted_groups},
    conf::ReportConfig,
    db::ResultDb,
    propagate::gene_columns_for_variant,
    registry::ModuleRegistry,
    schema::{ColumnDescriptor, ColumnGroup, ColumnInfo, Level},
    substitution::build_rules,
    summary::{summarizing_modules, SummarizingModule},
};

/// Name of the tag sampler module, always merged into `base`.
pub const TAGSAMPLER: &str = "tagsampler";

/// Column model of one level together with the modules summarizing into it.
#[derive(Debug, Clone)]
pub struct LevelModel {
    pub info: ColumnInfo,
    /// Gene summary modules, only set for the gene level.
    pub summarizing: Vec<SummarizingModule>,
}

/// Builds the column models of the levels of one result database.
pub struct ColumnModelBuilder<'a> {
    db: &'a ResultDb,
    registry: &'a dyn ModuleRegistry,
    config: &'a ReportConfig,
    mapper: String,
    merge_into_base: Vec<String>,
}

impl<'a> ColumnModelBuilder<'a> {
    pub fn new(
        db: &'a ResultDb,
        registry: &'a dyn ModuleRegistry,
        config: &'a ReportConfig,
    ) -> Result<Self, anyhow::Error> {
        let mapper = db.mapper_name()?;
        let merge_into_base = vec![mapper.clone(), TAGSAMPLER.to_string()];
        tracing::debug!("modules merged into base: {:?}", &merge_into_base);
        Ok(Self {
            db,
            registry,
            config,
            mapper,
            merge_into_base,
        })
    }

    pub fn mapper(&self) -> &str {
        &self.mapper
    }

    pub fn merge_into_base(&self) -> &[String] {
        &self.merge_into_base
    }

    /// Build the column model of `level`, `None` if the level has no data or no columns.
    pub fn build(&self, level: Level) -> Result<Option<LevelModel>, anyhow::Error> {
        if !self.db.table_exists(level.table())? {
            return Ok(None);
        }
        let mut groups = sorted_groups(&self.db.annotators(level)?, &self.merge_into_base);
        let mut columns = load_column_defs(self.db, level, &self.merge_into_base, None)?;
        if columns.is_empty() {
            return Ok(None);
        }

        let mut var_added_cols = Vec::new();
        let gene_on_variant = level == Level::Variant
            && !self.config.no_gene_on_variant
            && columns.iter().any(|c| c.name == "base__hugo");
        if gene_on_variant {
            for (group, gene_columns) in
                gene_columns_for_variant(self.db, &self.merge_into_base)?
            {
                if !groups.iter().any(|g| g.name == group.name) {
                    let mut group = group;
                    group.count = 0;
                    groups.push(group);
                }
                for col in gene_columns {
                    if push_unique(&mut columns, col.clone(), level) {
                        var_added_cols.push(col.name);
                    }
                }
            }
        }

        let mut summarizing = Vec::new();
        if level == Level::Gene && self.config.add_summary {
            let variant_modules = self
                .db
                .annotators(Level::Variant)?
                .into_iter()
                .map(|(name, _)| name)
                .collect::<Vec<_>>();
            summarizing = summarizing_modules(
                &variant_modules,
                &self.mapper,
                &self.merge_into_base,
                self.registry,
            )?;
            for module in &summarizing {
                if !groups.iter().any(|g| g.name == module.group) {
                    groups.push(ColumnGroup::new(module.group.clone(), module.title.clone()));
                }
                for raw in &module.columns {
                    let mut raw = raw.clone();
                    raw.name = module.column_name(&raw);
                    match ColumnDescriptor::from_raw(raw, Level::Gene) {
                        Ok(mut col) => {
                            col.gene_summary = true;
                            push_unique(&mut columns, col, level);
                        }
                        Err(e) => tracing::warn!(
                            "skipping gene summary column of module {}: {}",
                            &module.name,
                            e
                        ),
                    }
                }
            }
        }

        count_columns(&mut groups, &columns);
        let mut folded = fold_into_base(
            groups,
            columns,
            &self.merge_into_base,
            &self.config.module_order,
        );
        let substitutions = build_rules(
            &mut folded.columns,
            &folded.renames,
            &self.db.report_subs(level)?,
        );
        let display = select_display(
            &folded.columns,
            &folded.renames,
            &self.config.extract_columns[level],
            self.config.concise,
        );

        let display_len = display.len();
        tracing::debug!(
            "column model of level {}: {} groups, {} columns, {} displayed",
            level,
            folded.groups.len(),
            folded.columns.len(),
            display_len
        );
        Ok(Some(LevelModel {
            info: ColumnInfo {
                level,
                groups: folded.groups,
                columns: folded.columns,
                display,
                renames: folded.renames,
                var_added_cols,
                substitutions,
            },
            summarizing,
        }))
    }
}

/// Append `col` unless a column of the same name exists; the first definition wins.
fn push_unique(columns: &mut Vec<ColumnDescriptor>, col: ColumnDescriptor, level: Level) -> bool {
    if columns.iter().any(|c| c.name == col.name) {
        tracing::warn!(
            "column {} already defined at level {}, keeping the first definition",
            &col.name,
            level
        );
        false
    } else {
        columns.push(col);
        true
    }
}

/// Select the columns to display.
///
/// An explicit allow-list wins (matching report or database names), else concise mode
/// hides hidden columns, else everything is shown.
pub fn select_display(
    columns: &[ColumnDescriptor],
    renames: &IndexMap<String, String>,
    extract: &[String],
    concise: bool,
) -> Vec<String> {
    columns
        .iter()
        .filter(|col| {
            if !extract.is_empty() {
                extract.contains(&col.name)
                    || renames
                        .get(&col.name)
                        .map(|orig| extract.contains(orig))
                        .unwrap_or(false)
            } else if concise {
                !col.hidden
            } else {
                true
            }
        })
        .map(|col| col.name.clone())
        .collect()
}
