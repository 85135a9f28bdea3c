//! Common functionality.

use byte_unit::{Byte, UnitType};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub mod io;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Helper to print the current memory resident set size via `tracing`.
///
/// Does nothing where `/proc` is not available.
pub fn trace_rss_now() {
    let rss = procfs::process::Process::myself()
        .and_then(|me| me.stat())
        .map(|stat| stat.rss * procfs::page_size());
    match rss {
        Ok(rss) => tracing::debug!(
            "RSS now: {:.2}",
            Byte::from_u64(rss).get_appropriate_unit(UnitType::Binary)
        ),
        Err(e) => tracing::trace!("could not determine RSS: {}", e),
    }
}

/// Return the version of the `annoreport` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

/// Separator between module name and field name in qualified column names.
pub const COLUMN_SEP: &str = "__";

/// Split a qualified column name `module__field` into module and field.
pub fn split_col_name(col_name: &str) -> Option<(&str, &str)> {
    col_name
        .split_once(COLUMN_SEP)
        .filter(|(module, field)| !module.is_empty() && !field.is_empty())
}

/// Quote an SQL identifier for use in a statement.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[rstest::rstest]
    #[case::plain("base__hugo", Some(("base", "hugo")))]
    #[case::double("clinvar__sig__x", Some(("clinvar", "sig__x")))]
    #[case::no_sep("hugo", None)]
    #[case::empty_module("__hugo", None)]
    #[case::empty_field("base__", None)]
    fn split_col_name(#[case] col_name: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(super::split_col_name(col_name), expected);
    }

    #[rstest::rstest]
    #[case("base__hugo", "\"base__hugo\"")]
    #[case("a\"b", "\"a\"\"b\"")]
    fn quote_ident(#[case] ident: &str, #[case] expected: &str) {
        assert_eq!(super::quote_ident(ident), expected);
    }
}
