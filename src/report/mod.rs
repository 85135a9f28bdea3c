//! Generation of reports from annotation result databases.

pub mod coldefs;
pub mod colgroups;
pub mod columns;
pub mod conf;
pub mod data;
pub mod db;
pub mod driver;
pub mod filter;
pub mod model;
pub mod propagate;
pub mod registry;
pub mod rows;
pub mod schema;
pub mod substitution;
pub mod summary;
pub mod writer;

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use clap::Parser;
use strum::IntoEnumIterator;

use crate::{common::trace_rss_now, err::ReportError};

use self::{
    conf::{
        parse_cols, parse_level_columns, parse_module_options, LevelColumns, ReportConfig,
        ReportConfigBuilder, ReportConfs,
    },
    driver::Reporter,
    filter::{FilterSource, Page},
    registry::LocalModuleStore,
    schema::Level,
    writer::{jsonl::JsonlWriter, tsv::DelimitedWriter, ReportType, WriterOptions},
};

/// Arguments selecting the database, rows and columns of a report.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SelectArgs {
    /// Path to the result database.
    #[arg(long)]
    pub path_db: Option<PathBuf>,
    /// Path to a JSON filter file.
    #[arg(long, conflicts_with_all = ["filtername", "filterstring"])]
    pub filterpath: Option<PathBuf>,
    /// Name of a filter stored in the result database.
    #[arg(long, conflicts_with = "filterstring")]
    pub filtername: Option<String>,
    /// Filter given as a JSON string.
    #[arg(long)]
    pub filterstring: Option<String>,
    /// Additional SQL condition on the variant table (alias `v`).
    #[arg(long)]
    pub filtersql: Option<String>,
    /// Only generate this level.
    #[arg(long, value_enum)]
    pub level: Option<Level>,
    /// Only keep variants present in any of these samples.
    #[arg(long = "include-sample")]
    pub include_samples: Vec<String>,
    /// Drop variants present in samples other than these.
    #[arg(long = "exclude-sample")]
    pub exclude_samples: Vec<String>,
    /// Columns to extract, `level:col1,col2` or plain column names for all levels.
    #[arg(long)]
    pub cols: Vec<String>,
    /// Hide columns flagged as hidden.
    #[arg(long)]
    pub concise_report: bool,
    /// Do not add gene-level columns to variant rows.
    #[arg(long)]
    pub no_gene_on_variant_level: bool,
    /// Do not add gene summary columns to gene rows.
    #[arg(long)]
    pub no_summary: bool,
    /// Modules to place right after the base columns.
    #[arg(long)]
    pub module_order: Vec<String>,
    /// Path to the local module directory.
    #[arg(long)]
    pub path_modules: Option<String>,
    /// Report settings as JSON, e.g., `{"extract_columns": "variant:base__uid"}`.
    #[arg(long)]
    pub confs: Option<String>,
}

impl SelectArgs {
    pub fn filter_source(&self) -> FilterSource {
        if let Some(path) = &self.filterpath {
            FilterSource::Path(path.clone())
        } else if let Some(name) = &self.filtername {
            FilterSource::Name(name.clone())
        } else if let Some(json) = &self.filterstring {
            FilterSource::Json(json.clone())
        } else {
            FilterSource::None
        }
    }

    pub fn confs(&self) -> Result<ReportConfs, ReportError> {
        match &self.confs {
            Some(confs) => ReportConfs::parse(confs),
            None => Ok(ReportConfs::default()),
        }
    }

    /// The module store, `~` expanded.
    pub fn registry(&self) -> LocalModuleStore {
        LocalModuleStore::new(
            self.path_modules
                .as_ref()
                .map(|path| shellexpand::tilde(path).into_owned()),
        )
    }

    /// Build the builder for the report configuration from the arguments and `--confs`.
    pub fn config_builder(
        &self,
        confs: &ReportConfs,
    ) -> Result<ReportConfigBuilder, anyhow::Error> {
        let path_db = self.path_db.clone().ok_or(ReportError::NoInput)?;
        let mut extract = match &confs.extract_columns {
            Some(value) => parse_level_columns(value)?,
            None => LevelColumns::default(),
        };
        override_columns(&mut extract, parse_cols(&self.cols)?);
        Ok(ReportConfigBuilder::default()
            .path_db(path_db)
            .filter(self.filter_source())
            .filter_sql(self.filtersql.clone())
            .include_samples(self.include_samples.clone())
            .exclude_samples(self.exclude_samples.clone())
            .level(self.level)
            .extract_columns(extract)
            .concise(self.concise_report)
            .no_gene_on_variant(self.no_gene_on_variant_level)
            .add_summary(!self.no_summary)
            .module_order(self.module_order.clone())
            .keep_json_all_mappings(confs.keep_json_all_mappings.unwrap_or(false))
            .separate_samples(confs.separate_samples.unwrap_or(false)))
    }
}

/// Replace the column lists of `columns` by the non-empty ones of `other`.
fn override_columns(columns: &mut LevelColumns, other: LevelColumns) {
    for level in Level::iter() {
        if !other[level].is_empty() {
            columns[level] = other[level].clone();
        }
    }
}

/// Command line arguments for `report run` sub command.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Write reports from a result database", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub select: SelectArgs,
    /// Report types to write.
    #[arg(
        short = 't',
        long = "report-type",
        value_enum,
        value_delimiter = ',',
        default_value = "tsv"
    )]
    pub report_types: Vec<ReportType>,
    /// Output directory.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Output path prefix, defaults to the database path without `.sqlite`.
    #[arg(long)]
    pub savepath: Option<PathBuf>,
    /// Writer options as `<type>reporter.key=value`, e.g., `tsvreporter.gzip=true`.
    #[arg(long = "module-option")]
    pub module_options: Vec<String>,
    /// Write one variant row per sample.
    #[arg(long)]
    pub separate_sample: bool,
    /// Keep `base__all_mappings` as JSON.
    #[arg(long)]
    pub keep_json_all_mapping: bool,
    /// Only write this page of rows (1-based).
    #[arg(long)]
    pub page: Option<usize>,
    /// Number of rows per page.
    #[arg(long, default_value_t = 1000)]
    pub page_size: usize,
}

/// Output path prefix of a report.
pub fn savepath(path_db: &Path, savepath: Option<&Path>, output_dir: Option<&Path>) -> PathBuf {
    let base = match savepath {
        Some(savepath) => savepath.to_path_buf(),
        None if path_db.extension().map(|e| e == "sqlite").unwrap_or(false) => {
            path_db.with_extension("")
        }
        None => path_db.to_path_buf(),
    };
    match (output_dir, base.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => base,
    }
}

fn run_writer(
    report_type: ReportType,
    config: &ReportConfig,
    registry: &LocalModuleStore,
    savepath: PathBuf,
    options: &WriterOptions,
) -> Result<Vec<PathBuf>, anyhow::Error> {
    match report_type {
        ReportType::Tsv | ReportType::Csv => Reporter::new(
            config,
            registry,
            DelimitedWriter::new(report_type, savepath, options),
        )
        .run(),
        ReportType::Jsonl => {
            Reporter::new(config, registry, JsonlWriter::new(savepath, options)).run()
        }
    }
}

/// Main entry point for `report run` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let confs = args.select.confs()?;
    let module_options = parse_module_options(&args.module_options)?;
    let mut config = args.select.config_builder(&confs)?.build()?;
    config.separate_samples |= args.separate_sample;
    config.keep_json_all_mappings |= args.keep_json_all_mapping;
    config.page = args.page.map(|page| Page {
        page,
        page_size: args.page_size,
    });
    if config.page.map(|p| p.page == 0 || p.page_size == 0).unwrap_or(false) {
        return Err(ReportError::Setup("page and page size must be positive".into()).into());
    }

    let registry = args.select.registry();
    let savepath = savepath(
        &config.path_db,
        args.savepath.as_deref(),
        args.output_dir.as_deref(),
    );
    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("could not create output directory {:?}: {}", dir, e))?;
    }
    trace_rss_now();

    for report_type in &args.report_types {
        let before_report = Instant::now();
        let mut options = confs.writer_options();
        if let Some(module_opts) = module_options.get(&report_type.module_name()) {
            options.extend(module_opts.clone());
        }
        let mut config = config.clone();
        if let Some(cols) = options.get("extract_columns") {
            let parsed = parse_level_columns(&serde_json::Value::String(cols.clone()))?;
            override_columns(&mut config.extract_columns, parsed);
        }

        tracing::info!("writing {} report to {:?}", report_type, &savepath);
        let written = run_writer(*report_type, &config, &registry, savepath.clone(), &options)?;
        for path in &written {
            tracing::info!("  wrote {:?}", path);
        }
        tracing::info!("{} report done in {:?}", report_type, before_report.elapsed());
    }

    trace_rss_now();
    tracing::info!(
        "All of `report run` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::report::db::test::example_db;

    #[rstest::rstest]
    #[case::default("data/x.sqlite", None, None, "data/x")]
    #[case::no_suffix("data/x.db", None, None, "data/x.db")]
    #[case::output_dir("data/x.sqlite", None, Some("out"), "out/x")]
    #[case::explicit("data/x.sqlite", Some("other/y"), None, "other/y")]
    #[case::explicit_in_dir("data/x.sqlite", Some("other/y"), Some("out"), "out/y")]
    fn savepaths(
        #[case] path_db: &str,
        #[case] explicit: Option<&str>,
        #[case] output_dir: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(
            savepath(
                Path::new(path_db),
                explicit.map(Path::new),
                output_dir.map(Path::new)
            ),
            PathBuf::from(expected)
        );
    }

    #[test]
    fn config_from_args() -> Result<(), anyhow::Error> {
        let args = Args::try_parse_from([
            "run",
            "--path-db",
            "x.sqlite",
            "--filtername",
            "pathogenic",
            "--cols",
            "gene:base__hugo",
            "--confs",
            r#"{"extract_columns": "variant:base__uid.gene:base__all_so",
                "keep_json_all_mapping": true}"#,
            "--no-summary",
            "-t",
            "tsv,jsonl",
        ])?;

        let confs = args.select.confs()?;
        let config = args.select.config_builder(&confs)?.build()?;

        assert_eq!(args.report_types, vec![ReportType::Tsv, ReportType::Jsonl]);
        assert_eq!(config.filter, FilterSource::Name("pathogenic".into()));
        assert_eq!(config.extract_columns[Level::Variant], vec!["base__uid"]);
        assert_eq!(config.extract_columns[Level::Gene], vec!["base__hugo"]);
        assert!(config.keep_json_all_mappings);
        assert!(!config.add_summary);

        Ok(())
    }

    #[test]
    fn missing_database_argument() {
        let err = SelectArgs::default()
            .config_builder(&ReportConfs::default())
            .err()
            .expect("building without database must fail");
        assert_eq!(err.downcast_ref::<ReportError>(), Some(&ReportError::NoInput));
    }

    #[test]
    fn conflicting_filters() {
        assert!(Args::try_parse_from([
            "run",
            "--path-db",
            "x.sqlite",
            "--filtername",
            "a",
            "--filterstring",
            "{}"
        ])
        .is_err());
    }

    #[test]
    fn run_writes_files() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path_db = example_db(&tmp_dir)?;
        let out_dir = tmp_dir.join("out");
        let args = Args::try_parse_from([
            "run",
            "--path-db",
            path_db.to_str().expect("utf-8 path"),
            "--output-dir",
            out_dir.to_str().expect("utf-8 path"),
            "-t",
            "tsv,jsonl",
            "--module-option",
            "tsvreporter.gzip=true",
        ])?;

        run(&crate::common::Args::default(), &args)?;

        for name in [
            "example.variant.tsv.gz",
            "example.gene.tsv.gz",
            "example.sample.tsv.gz",
            "example.variant.jsonl",
            "example.variant.colinfo.json",
            "example.gene.jsonl",
        ] {
            assert!(out_dir.join(name).is_file(), "missing {}", name);
        }

        Ok(())
    }

    #[test]
    fn invalid_page() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path_db = example_db(&tmp_dir)?;
        let args = Args::try_parse_from([
            "run",
            "--path-db",
            path_db.to_str().expect("utf-8 path"),
            "--page",
            "0",
            "--page-size",
            "10",
        ])?;

        assert!(run(&crate::common::Args::default(), &args).is_err());

        Ok(())
    }
}
