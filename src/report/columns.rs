//! Dump the column model of a result database as JSON.

use std::{io::Write, path::PathBuf};

use clap::Parser;

use crate::common::io::open_write_maybe_gz;

use super::{driver::column_infos, SelectArgs};

/// Command line arguments for `report columns` sub command.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Print the report columns of a result database",
    long_about = None
)]
pub struct Args {
    #[command(flatten)]
    pub select: SelectArgs,
    /// Path to write the JSON to, stdout if omitted.
    #[arg(long)]
    pub path_output: Option<PathBuf>,
}

/// Main entry point for `report columns` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let confs = args.select.confs()?;
    let config = args.select.config_builder(&confs)?.build()?;
    let infos = column_infos(&config, &args.select.registry())?;

    match &args.path_output {
        Some(path) => {
            let mut out = open_write_maybe_gz(path)
                .map_err(|e| anyhow::anyhow!("Cannot open {:?} for writing: {:?}", path, e))?;
            serde_json::to_writer_pretty(&mut out, &infos)?;
            writeln!(out)?;
            out.finish()?;
        }
        None => {
            let mut out = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut out, &infos)?;
            writeln!(out)?;
            out.flush()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{common::io::read_to_string_maybe_gz, report::db::test::example_db};

    #[test]
    fn writes_column_infos() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path_db = example_db(&tmp_dir)?;
        let path_output = tmp_dir.join("columns.json");
        let args = Args::try_parse_from([
            "columns",
            "--path-db",
            path_db.to_str().expect("utf-8 path"),
            "--level",
            "gene",
            "--no-summary",
            "--path-output",
            path_output.to_str().expect("utf-8 path"),
        ])?;

        run(&crate::common::Args::default(), &args)?;

        let infos: serde_json::Value =
            serde_json::from_str(&read_to_string_maybe_gz(&path_output)?)?;
        let infos = infos.as_array().expect("array of column infos");
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0]["level"], serde_json::json!("gene"));
        assert_eq!(infos[0]["colgroups"][0]["name"], serde_json::json!("base"));

        Ok(())
    }
}
