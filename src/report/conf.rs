//! Configuration of a report run and parsing of the option strings.

use std::{path::PathBuf, str::FromStr};

use enum_map::EnumMap;
use indexmap::IndexMap;
use strum::IntoEnumIterator;

use crate::err::ReportError;

use super::{
    filter::{FilterSource, Page},
    schema::Level,
};

/// Columns to extract, per level.  An empty list means no restriction.
pub type LevelColumns = EnumMap<Level, Vec<String>>;

/// Options given per module as `module.key=value`.
pub type ModuleOptions = IndexMap<String, IndexMap<String, String>>;

/// Configuration of one report run.
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
pub struct ReportConfig {
    /// Path to the result database.
    pub path_db: PathBuf,
    /// Filter to apply.
    pub filter: FilterSource,
    /// Additional SQL condition on the variant table.
    pub filter_sql: Option<String>,
    /// Keep only variants present in any of these samples.
    pub include_samples: Vec<String>,
    /// Drop variants present in any sample not listed here.
    pub exclude_samples: Vec<String>,
    /// Only generate this level.
    pub level: Option<Level>,
    /// Allow-list of displayed columns per level.
    pub extract_columns: LevelColumns,
    /// Hide columns flagged as hidden.
    pub concise: bool,
    /// Do not add gene-level columns to variant rows.
    pub no_gene_on_variant: bool,
    /// Add the gene summary columns to gene rows.
    pub add_summary: bool,
    /// Write one variant row per sample.
    pub separate_samples: bool,
    /// Keep `base__all_mappings` as JSON.
    pub keep_json_all_mappings: bool,
    /// Only write this page of rows.
    pub page: Option<Page>,
    /// Modules whose groups come right after `base`.
    pub module_order: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path_db: PathBuf::new(),
            filter: FilterSource::None,
            filter_sql: None,
            include_samples: Vec::new(),
            exclude_samples: Vec::new(),
            level: None,
            extract_columns: LevelColumns::default(),
            concise: false,
            no_gene_on_variant: false,
            add_summary: true,
            separate_samples: false,
            keep_json_all_mappings: false,
            page: None,
            module_order: Vec::new(),
        }
    }
}

lazy_static::lazy_static! {
    static ref MODULE_OPTION: regex::Regex =
        regex::Regex::new(r"^(?P<module>[^.=]+)\.(?P<key>[^=]+)=(?P<value>.*)$")
            .expect("invalid regex in source code");
}

/// Parse `module.key=value` strings.
pub fn parse_module_options(values: &[String]) -> Result<ModuleOptions, ReportError> {
    let mut result = ModuleOptions::new();
    for value in values {
        let caps = MODULE_OPTION.captures(value).ok_or_else(|| {
            ReportError::Setup(format!(
                "module option {:?} is not of the form module.key=value",
                value
            ))
        })?;
        result
            .entry(caps["module"].to_string())
            .or_default()
            .insert(caps["key"].to_string(), caps["value"].to_string());
    }
    Ok(result)
}

/// Interpret an option value as a boolean, `true`/`false` in any case.
pub fn parse_bool_option(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_level(value: &str) -> Result<Level, ReportError> {
    Level::from_str(value.trim())
        .map_err(|_| ReportError::Setup(format!("unknown level {:?}", value)))
}

/// Parse per-level column lists.
///
/// Accepted are `variant:a,b.gene:c`, a plain comma-separated list or a JSON array (both
/// for all levels) or a JSON object mapping levels to lists or to comma-separated strings.
pub fn parse_level_columns(value: &serde_json::Value) -> Result<LevelColumns, ReportError> {
    let mut result = LevelColumns::default();
    match value {
        serde_json::Value::String(s) if s.contains(':') => {
            for part in s.split('.').filter(|p| !p.trim().is_empty()) {
                let (level, columns) = part.split_once(':').ok_or_else(|| {
                    ReportError::Setup(format!("expected level:columns, got {:?}", part))
                })?;
                result[parse_level(level)?].extend(split_list(columns));
            }
        }
        serde_json::Value::String(s) => {
            let columns = split_list(s);
            for level in Level::iter() {
                result[level] = columns.clone();
            }
        }
        serde_json::Value::Array(values) => {
            let columns = values
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>();
            for level in Level::iter() {
                result[level] = columns.clone();
            }
        }
        serde_json::Value::Object(map) => {
            for (level, columns) in map {
                let level = parse_level(level)?;
                let nested = parse_level_columns(columns)?;
                result[level] = nested[Level::Variant].clone();
            }
        }
        serde_json::Value::Null => (),
        other => {
            return Err(ReportError::Setup(format!(
                "cannot read column lists from {}",
                other
            )))
        }
    }
    Ok(result)
}

/// Parse `--cols` values, each either `level:a,b` or plain column names.
///
/// Plain names apply to all levels, levels given with a prefix use their own list.
pub fn parse_cols(values: &[String]) -> Result<LevelColumns, ReportError> {
    let mut plain = Vec::new();
    let mut prefixed = LevelColumns::default();
    for value in values {
        if value.contains(':') {
            let parsed = parse_level_columns(&serde_json::Value::String(value.clone()))?;
            for level in Level::iter() {
                prefixed[level].extend(parsed[level].iter().cloned());
            }
        } else {
            plain.extend(split_list(value));
        }
    }

    let mut result = LevelColumns::default();
    for level in Level::iter() {
        result[level] = if prefixed[level].is_empty() {
            plain.clone()
        } else {
            std::mem::take(&mut prefixed[level])
        };
    }
    Ok(result)
}

/// Report settings given as JSON via `--confs`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct ReportConfs {
    #[serde(default)]
    pub extract_columns: Option<serde_json::Value>,
    #[serde(default, alias = "keep_json_all_mapping")]
    pub keep_json_all_mappings: Option<bool>,
    #[serde(default)]
    pub separate_samples: Option<bool>,
    /// Remaining settings, passed on to the writer.
    #[serde(flatten)]
    pub other: IndexMap<String, serde_json::Value>,
}

impl ReportConfs {
    pub fn parse(value: &str) -> Result<Self, ReportError> {
        serde_json::from_str(value)
            .map_err(|e| ReportError::Setup(format!("invalid --confs JSON: {}", e)))
    }

    /// Settings as string options for the writer.
    pub fn writer_options(&self) -> IndexMap<String, String> {
        self.other
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn cols(level_cols: &LevelColumns) -> Vec<(Level, Vec<&str>)> {
        Level::iter()
            .filter(|l| !level_cols[*l].is_empty())
            .map(|l| (l, level_cols[l].iter().map(String::as_str).collect()))
            .collect()
    }

    #[test]
    fn config_defaults() -> Result<(), anyhow::Error> {
        let built = ReportConfigBuilder::default().concise(true).build()?;

        assert!(built.add_summary);
        assert!(built.concise);
        assert!(!ReportConfig::default().concise);
        assert_eq!(built.filter, FilterSource::None);

        Ok(())
    }

    #[test]
    fn module_options() -> Result<(), anyhow::Error> {
        let opts = parse_module_options(&[
            "tsvreporter.gzip=true".to_string(),
            "tsvreporter.extract_columns=variant:a,b.gene:c".to_string(),
            "jsonlreporter.x=".to_string(),
        ])?;

        assert_eq!(opts["tsvreporter"]["gzip"], "true");
        assert_eq!(opts["tsvreporter"]["extract_columns"], "variant:a,b.gene:c");
        assert_eq!(opts["jsonlreporter"]["x"], "");

        Ok(())
    }

    #[rstest::rstest]
    #[case::no_dot("gzip=true")]
    #[case::no_value("tsvreporter.gzip")]
    fn bad_module_options(#[case] value: &str) {
        assert!(matches!(
            parse_module_options(&[value.to_string()]),
            Err(ReportError::Setup(_))
        ));
    }

    #[rstest::rstest]
    #[case::true_("True", Some(true))]
    #[case::false_("false", Some(false))]
    #[case::other("yes", None)]
    fn bool_options(#[case] value: &str, #[case] expected: Option<bool>) {
        assert_eq!(parse_bool_option(value), expected);
    }

    #[rstest::rstest]
    #[case::levels(
        serde_json::json!("variant:base__uid,base__hugo.gene:base__hugo"),
        vec![(Level::Variant, vec!["base__uid", "base__hugo"]), (Level::Gene, vec!["base__hugo"])]
    )]
    #[case::plain(
        serde_json::json!("base__uid, base__hugo"),
        Level::iter().map(|l| (l, vec!["base__uid", "base__hugo"])).collect()
    )]
    #[case::array(
        serde_json::json!(["base__uid"]),
        Level::iter().map(|l| (l, vec!["base__uid"])).collect()
    )]
    #[case::object(
        serde_json::json!({"gene": ["base__hugo"], "sample": "base__uid,base__sample_id"}),
        vec![
            (Level::Gene, vec!["base__hugo"]),
            (Level::Sample, vec!["base__uid", "base__sample_id"])
        ]
    )]
    #[case::null(serde_json::Value::Null, vec![])]
    fn level_columns(
        #[case] value: serde_json::Value,
        #[case] expected: Vec<(Level, Vec<&str>)>,
    ) -> Result<(), anyhow::Error> {
        let parsed = parse_level_columns(&value)?;
        assert_eq!(cols(&parsed), expected);
        Ok(())
    }

    #[test]
    fn unknown_level_fails() {
        assert!(parse_level_columns(&serde_json::json!("protein:x")).is_err());
        assert!(parse_level_columns(&serde_json::json!(3)).is_err());
    }

    #[test]
    fn cols_are_merged() -> Result<(), anyhow::Error> {
        let parsed = parse_cols(&[
            "base__uid".to_string(),
            "gene:base__hugo".to_string(),
            "base__hugo".to_string(),
        ])?;

        assert_eq!(parsed[Level::Variant], vec!["base__uid", "base__hugo"]);
        assert_eq!(parsed[Level::Gene], vec!["base__hugo"]);
        assert_eq!(parsed[Level::Sample], vec!["base__uid", "base__hugo"]);
        assert_eq!(parsed[Level::Mapping], vec!["base__uid", "base__hugo"]);

        Ok(())
    }

    #[test]
    fn plain_cols_apply_to_all_levels() -> Result<(), anyhow::Error> {
        let parsed = parse_cols(&["base__hugo".to_string()])?;

        for level in Level::iter() {
            assert_eq!(parsed[level], vec!["base__hugo"], "level {}", level);
        }
        assert!(cols(&parse_cols(&[])?).is_empty());

        Ok(())
    }

    #[test]
    fn confs() -> Result<(), anyhow::Error> {
        let confs = ReportConfs::parse(
            r#"{"extract_columns": {"variant": ["base__uid"]},
                "keep_json_all_mapping": true, "gzip": true}"#,
        )?;

        assert_eq!(confs.keep_json_all_mappings, Some(true));
        assert_eq!(confs.separate_samples, None);
        assert!(confs.extract_columns.is_some());
        assert_eq!(confs.writer_options()["gzip"], "true");
        assert!(ReportConfs::parse("{").is_err());

        Ok(())
    }
}
