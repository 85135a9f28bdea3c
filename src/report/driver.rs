//! Driving a report run from the result database to the writer.

use std::time::Instant;

use thousands::Separable;

use crate::{common::worker_version, err::ReportError};

use super::{
    conf::ReportConfig,
    db::ResultDb,
    filter::{ReportFilter, SqlFilter},
    model::ColumnModelBuilder,
    registry::ModuleRegistry,
    rows::RowMaterializer,
    schema::{ColumnInfo, Level},
    summary::{GeneSummaries, SummarizingModule},
    writer::{ReportWriter, RunInfo},
};

/// Statistics of one written level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub fetched: usize,
    pub written: usize,
}

/// Generates a report from a result database into a writer.
///
/// The database is opened by `run` and closed again on all paths.
pub struct Reporter<'a, W: ReportWriter> {
    config: &'a ReportConfig,
    registry: &'a dyn ModuleRegistry,
    writer: W,
}

impl<'a, W: ReportWriter> Reporter<'a, W> {
    pub fn new(config: &'a ReportConfig, registry: &'a dyn ModuleRegistry, writer: W) -> Self {
        Self {
            config,
            registry,
            writer,
        }
    }

    /// Run the report, returning the writer's output.
    pub fn run(mut self) -> Result<W::Output, anyhow::Error> {
        let db = ResultDb::open(&self.config.path_db)?;
        let result = self.write_levels(&db);
        match (result, db.close()) {
            (Ok(()), Ok(())) => self.writer.end(),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(e), Err(close_err)) => {
                tracing::error!("closing the result database failed: {}", close_err);
                Err(e)
            }
        }
    }

    fn write_levels(&mut self, db: &ResultDb) -> Result<(), anyhow::Error> {
        let filter = SqlFilter::load(
            db,
            &self.config.filter,
            self.config.filter_sql.as_deref(),
            &self.config.include_samples,
            &self.config.exclude_samples,
        )?;
        check_mandatory_columns(db, self.registry, &self.writer)?;

        let levels = levels_to_run(&filter, self.config.level)?;
        let builder = ColumnModelBuilder::new(db, self.registry, self.config)?;
        self.writer.setup(&RunInfo {
            path_db: db.path().to_path_buf(),
            mapper: builder.mapper().to_string(),
            input_paths: db.input_paths()?,
            levels: levels.clone(),
            filter: filter.spec().clone(),
            version: worker_version().to_string(),
            created: chrono::Utc::now(),
        })?;

        let mut summaries: Option<GeneSummaries> = None;
        for level in levels {
            let before_level = Instant::now();
            let Some(mut model) = builder.build(level)? else {
                tracing::info!("no columns at {} level, skipping", level);
                continue;
            };
            if level == Level::Gene && !model.summarizing.is_empty() {
                let summaries = summaries
                    .get_or_insert_with(|| GeneSummaries::compute(&model.summarizing, &filter));
                summaries.populate_categories(&model.summarizing, &mut model.info);
            }

            let stats = self.write_level(
                &filter,
                &model.info,
                &model.summarizing,
                summaries.as_ref(),
            )?;
            tracing::info!(
                "wrote {} rows ({} fetched) at {} level in {:?}",
                stats.written.separate_with_commas(),
                stats.fetched.separate_with_commas(),
                level,
                before_level.elapsed()
            );
        }
        Ok(())
    }

    fn write_level(
        &mut self,
        filter: &dyn ReportFilter,
        info: &ColumnInfo,
        summarizing: &[SummarizingModule],
        summaries: Option<&GeneSummaries>,
    ) -> Result<LevelStats, anyhow::Error> {
        let level = info.level;
        let total = filter.row_count(level)?;
        self.writer.write_preface(level, total)?;
        self.writer.write_header(level, info)?;

        let mut materializer = RowMaterializer::new(info, summarizing, summaries, self.config)
            .keep_json_all_mappings(self.writer.keeps_json_all_mappings());
        let writer = &mut self.writer;
        let mut written = 0;
        let fetched = filter.for_each_row(level, self.config.page, &mut |row| {
            for out in materializer.materialize(filter, row)? {
                writer.write_row(&out)?;
                written += 1;
            }
            Ok(())
        })?;
        Ok(LevelStats { fetched, written })
    }
}

/// Levels to write, all levels with data unless one is requested.
fn levels_to_run(
    filter: &dyn ReportFilter,
    requested: Option<Level>,
) -> Result<Vec<Level>, anyhow::Error> {
    let available = filter.result_levels()?;
    Ok(match requested {
        Some(level) if available.contains(&level) => vec![level],
        Some(level) => {
            tracing::warn!("level {} has no data in the result database", level);
            Vec::new()
        }
        None => available,
    })
}

/// Check that the columns needed by the writer and its module configuration exist at
/// the variant or gene level.
fn check_mandatory_columns<W: ReportWriter>(
    db: &ResultDb,
    registry: &dyn ModuleRegistry,
    writer: &W,
) -> Result<(), anyhow::Error> {
    let mut mandatory = writer.mandatory_columns();
    if let Some(info) = registry.local_module_info(&writer.module_name())? {
        for column in info.conf.mandatory_columns {
            if !mandatory.contains(&column) {
                mandatory.push(column);
            }
        }
    }
    if mandatory.is_empty() {
        return Ok(());
    }

    let mut present = Vec::new();
    for level in [Level::Variant, Level::Gene] {
        present.extend(db.header_rows(level, None)?.into_iter().map(|(name, _)| name));
    }
    let missing = mandatory
        .into_iter()
        .filter(|column| !present.contains(column))
        .collect::<Vec<_>>();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReportError::MissingMandatoryColumns {
            path: db.path().display().to_string(),
            columns: missing,
        }
        .into())
    }
}

/// Column models of all levels with data, without computing gene summaries.
pub fn column_infos(
    config: &ReportConfig,
    registry: &dyn ModuleRegistry,
) -> Result<Vec<ColumnInfo>, anyhow::Error> {
    let db = ResultDb::open(&config.path_db)?;
    let result = (|| {
        let filter = SqlFilter::load(&db, &config.filter, None, &[], &[])?;
        let builder = ColumnModelBuilder::new(&db, registry, config)?;
        let mut infos = Vec::new();
        for level in levels_to_run(&filter, config.level)? {
            if let Some(model) = builder.build(level)? {
                infos.push(model.info);
            }
        }
        Ok::<_, anyhow::Error>(infos)
    })();
    match (result, db.close()) {
        (Ok(infos), Ok(())) => Ok(infos),
        (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
        (Err(e), Err(close_err)) => {
            tracing::error!("closing the result database failed: {}", close_err);
            Err(e)
        }
    }
}
