//! Delimited text output, one file per level.

use std::{io::Write, path::PathBuf};

use csv::QuoteStyle;

use crate::{
    common::io::{open_write_maybe_gz, MaybeGzWriter},
    report::{
        data::Row,
        schema::{ColumnInfo, Level},
    },
};

use super::{
    gzip_option, output_path, preface_lines, ReportType, ReportWriter, RunInfo, WriterOptions,
};

/// Writes TSV or CSV files `<savepath>.<level>.<tsv|csv>`.
///
/// Each file starts with `#`-prefixed preface lines followed by the column names.
pub struct DelimitedWriter {
    report_type: ReportType,
    savepath: PathBuf,
    gzip: bool,
    run: Option<RunInfo>,
    current: Option<csv::Writer<MaybeGzWriter>>,
    written: Vec<PathBuf>,
}

impl DelimitedWriter {
    pub fn new(report_type: ReportType, savepath: PathBuf, options: &WriterOptions) -> Self {
        Self {
            report_type,
            savepath,
            gzip: gzip_option(options),
            run: None,
            current: None,
            written: Vec::new(),
        }
    }

    pub fn tsv(savepath: PathBuf, options: &WriterOptions) -> Self {
        Self::new(ReportType::Tsv, savepath, options)
    }

    pub fn csv(savepath: PathBuf, options: &WriterOptions) -> Self {
        Self::new(ReportType::Csv, savepath, options)
    }

    fn finish_current(&mut self) -> Result<(), anyhow::Error> {
        if let Some(writer) = self.current.take() {
            writer
                .into_inner()
                .map_err(|e| anyhow::anyhow!("could not flush report: {}", e.error()))?
                .finish()?;
        }
        Ok(())
    }

    fn current(&mut self) -> Result<&mut csv::Writer<MaybeGzWriter>, anyhow::Error> {
        self.current
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no report level started"))
    }
}

impl ReportWriter for DelimitedWriter {
    type Output = Vec<PathBuf>;

    fn module_name(&self) -> String {
        self.report_type.module_name()
    }

    fn setup(&mut self, run: &RunInfo) -> Result<(), anyhow::Error> {
        self.run = Some(run.clone());
        Ok(())
    }

    fn write_preface(&mut self, level: Level, total_rows: usize) -> Result<(), anyhow::Error> {
        self.finish_current()?;
        let run = self
            .run
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("writer was not set up"))?;
        let path = output_path(&self.savepath, level, &self.report_type.to_string(), self.gzip);
        tracing::info!("writing {} level to {:?}", level, &path);

        let mut out = open_write_maybe_gz(&path)
            .map_err(|e| anyhow::anyhow!("Cannot open {:?} for writing: {:?}", &path, e))?;
        for line in preface_lines(run, level, total_rows) {
            writeln!(out, "#{}", line)?;
        }
        let (delimiter, quote_style) = match self.report_type {
            ReportType::Csv => (b',', QuoteStyle::Necessary),
            _ => (b'\t', QuoteStyle::Never),
        };
        self.current = Some(
            csv::WriterBuilder::new()
                .delimiter(delimiter)
                .quote_style(quote_style)
                .has_headers(false)
                .from_writer(out),
        );
        self.written.push(path);
        Ok(())
    }

    fn write_header(&mut self, _level: Level, info: &ColumnInfo) -> Result<(), anyhow::Error> {
        let names = info.display.clone();
        self.current()?.write_record(&names)?;
        Ok(())
    }

    fn write_row(&mut self, row: &Row) -> Result<(), anyhow::Error> {
        let escape_tabs = self.report_type == ReportType::Tsv;
        self.current()?.write_record(row.values().map(|value| {
            let value = value.to_string();
            if escape_tabs && value.contains('\t') {
                value.replace('\t', "%09")
            } else {
                value
            }
        }))?;
        Ok(())
    }

    fn end(mut self) -> Result<Self::Output, anyhow::Error> {
        self.finish_current()?;
        Ok(self.written)
    }
}
