//! Report writers, the output side of a report run.

pub mod jsonl;
pub mod tsv;

use std::{ffi::OsString, path::{Path, PathBuf}};

use indexmap::IndexMap;

use super::{
    conf::parse_bool_option,
    data::Row,
    filter::FilterSpec,
    schema::{ColumnInfo, Level},
};

/// Information on a report run handed to the writer before any level.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RunInfo {
    pub path_db: PathBuf,
    pub mapper: String,
    /// Input files of the annotation run by number.
    pub input_paths: IndexMap<String, String>,
    /// Levels that will be written, in order.
    pub levels: Vec<Level>,
    pub filter: FilterSpec,
    pub version: String,
    pub created: chrono::DateTime<chrono::Utc>,
}

/// Sink for the rows of a report.
///
/// Per level, `write_preface` and `write_header` are called before the rows.
pub trait ReportWriter {
    /// What the writer yields at the end, e.g., the written files.
    type Output;

    /// Name of the reporter module, used to look up its configuration.
    fn module_name(&self) -> String;

    /// Columns the writer needs in the result database.
    fn mandatory_columns(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether `base__all_mappings` should be kept as JSON.
    fn keeps_json_all_mappings(&self) -> bool {
        false
    }

    fn setup(&mut self, run: &RunInfo) -> Result<(), anyhow::Error>;

    fn write_preface(&mut self, level: Level, total_rows: usize) -> Result<(), anyhow::Error>;

    fn write_header(&mut self, level: Level, info: &ColumnInfo) -> Result<(), anyhow::Error>;

    /// Write one row, holding the displayed columns in order.
    fn write_row(&mut self, row: &Row) -> Result<(), anyhow::Error>;

    fn end(self) -> Result<Self::Output, anyhow::Error>;
}

/// Supported output formats.
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
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReportType {
    /// Tab-separated values.
    Tsv,
    /// Comma-separated values.
    Csv,
    /// One JSON object per line, column infos alongside.
    Jsonl,
}

impl ReportType {
    /// Name of the reporter module.
    pub fn module_name(&self) -> String {
        format!("{}reporter", self)
    }
}

/// Options of a writer, from `<reporter>.key=value` module options and `--confs`.
pub type WriterOptions = IndexMap<String, String>;

/// Whether output is to be gzip-compressed.
pub fn gzip_option(options: &WriterOptions) -> bool {
    options
        .get("gzip")
        .and_then(|v| parse_bool_option(v))
        .unwrap_or(false)
}

/// Path of an output file, `<savepath>.<level>.<extension>`.
pub fn output_path(savepath: &Path, level: Level, extension: &str, gzip: bool) -> PathBuf {
    let mut name: OsString = savepath.as_os_str().to_owned();
    name.push(format!(".{}.{}", level, extension));
    if gzip {
        name.push(".gz");
    }
    PathBuf::from(name)
}

/// Preface lines describing the run and the level.
pub fn preface_lines(run: &RunInfo, level: Level, total_rows: usize) -> Vec<String> {
    let mut lines = vec![
        format!("Created: {}", run.created.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("Report version: {}", run.version),
        format!("Result database: {}", run.path_db.display()),
        format!("Mapper: {}", run.mapper),
    ];
    for (idx, path) in &run.input_paths {
        lines.push(format!("Input file {}: {}", idx, path));
    }
    lines.push(format!("Report level: {}", level));
    lines.push(format!("Number of rows: {}", total_rows));
    lines
}
