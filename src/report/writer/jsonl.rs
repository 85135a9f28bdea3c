//! JSON lines output with column infos alongside.

use std::{io::Write, path::PathBuf};

use crate::{
    common::io::{open_write_maybe_gz, MaybeGzWriter},
    report::{
        data::Row,
        schema::{ColumnInfo, Level},
    },
};

use super::{gzip_option, output_path, ReportType, ReportWriter, RunInfo, WriterOptions};

/// Column info file contents.
#[derive(Debug, serde::Serialize)]
struct ColInfoDoc<'a> {
    created: String,
    version: &'a str,
    total_rows: usize,
    #[serde(flatten)]
    info: &'a ColumnInfo,
}

/// Writes `<savepath>.<level>.jsonl` with one object per row and the column model to
/// `<savepath>.<level>.colinfo.json`.
///
/// Keeps `base__all_mappings` as JSON.
pub struct JsonlWriter {
    savepath: PathBuf,
    gzip: bool,
    run: Option<RunInfo>,
    total_rows: usize,
    current: Option<MaybeGzWriter>,
    written: Vec<PathBuf>,
}

impl JsonlWriter {
    pub fn new(savepath: PathBuf, options: &WriterOptions) -> Self {
        Self {
            savepath,
            gzip: gzip_option(options),
            run: None,
            total_rows: 0,
            current: None,
            written: Vec::new(),
        }
    }

    fn finish_current(&mut self) -> Result<(), anyhow::Error> {
        if let Some(out) = self.current.take() {
            out.finish()?;
        }
        Ok(())
    }
}

impl ReportWriter for JsonlWriter {
    type Output = Vec<PathBuf>;

    fn module_name(&self) -> String {
        ReportType::Jsonl.module_name()
    }

    fn keeps_json_all_mappings(&self) -> bool {
        true
    }

    fn setup(&mut self, run: &RunInfo) -> Result<(), anyhow::Error> {
        self.run = Some(run.clone());
        Ok(())
    }

    fn write_preface(&mut self, level: Level, total_rows: usize) -> Result<(), anyhow::Error> {
        self.finish_current()?;
        let path = output_path(&self.savepath, level, "jsonl", self.gzip);
        tracing::info!("writing {} level to {:?}", level, &path);
        self.current = Some(
            open_write_maybe_gz(&path)
                .map_err(|e| anyhow::anyhow!("Cannot open {:?} for writing: {:?}", &path, e))?,
        );
        self.total_rows = total_rows;
        self.written.push(path);
        Ok(())
    }

    fn write_header(&mut self, level: Level, info: &ColumnInfo) -> Result<(), anyhow::Error> {
        let run = self
            .run
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("writer was not set up"))?;
        let path = output_path(&self.savepath, level, "colinfo.json", false);
        let doc = ColInfoDoc {
            created: run.created.to_rfc3339(),
            version: &run.version,
            total_rows: self.total_rows,
            info,
        };
        let mut out = open_write_maybe_gz(&path)?;
        serde_json::to_writer_pretty(&mut out, &doc)?;
        out.finish()?;
        self.written.push(path);
        Ok(())
    }

    fn write_row(&mut self, row: &Row) -> Result<(), anyhow::Error> {
        let out = self
            .current
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no report level started"))?;
        serde_json::to_writer(&mut *out, row)?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn end(mut self) -> Result<Self::Output, anyhow::Error> {
        self.finish_current()?;
        Ok(self.written)
    }
}
