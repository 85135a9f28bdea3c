//! Filtering and pagination of result rows.
//!
//! Filters are given as JSON, e.g.
//!
//! ```text
//! {"variant": {"operator": "and", "rules": [
//!     {"column": "clinvar__sig", "test": "equals", "value": "Pathogenic"}]},
//!  "genes": ["BRCA1"],
//!  "sample": {"require": ["s1"], "reject": ["s3"]}}
//! ```
//!
//! and compiled into a single `WHERE` clause over the variant table.  The rows of the
//! other levels are those related to passing variants.

use std::path::PathBuf;

use rusqlite::{types::Value, ToSql};
use strum::IntoEnumIterator;

use crate::{
    common::{io::read_to_string_maybe_gz, quote_ident},
    err::ReportError,
};

use super::{data::Row, db::ResultDb, schema::Level};

/// One page of rows, `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, derive_new::new)]
pub struct Page {
    pub page: usize,
    pub page_size: usize,
}

impl Page {
    /// Number of rows before the page, `None` on overflow.
    pub fn offset(&self) -> Option<usize> {
        self.page.saturating_sub(1).checked_mul(self.page_size)
    }

    /// `LIMIT` and `OFFSET` of the page as SQLite integers.
    pub fn sql_limits(&self) -> Result<[i64; 2], ReportError> {
        let out_of_range = || {
            ReportError::Setup(format!(
                "page {} of size {} is out of range",
                self.page, self.page_size
            ))
        };
        let limit = i64::try_from(self.page_size).map_err(|_| out_of_range())?;
        let offset = self
            .offset()
            .and_then(|offset| i64::try_from(offset).ok())
            .ok_or_else(out_of_range)?;
        Ok([limit, offset])
    }
}

/// Where to take the filter definition from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FilterSource {
    /// No filter, all rows pass.
    #[default]
    None,
    /// Inline JSON.
    Json(String),
    /// JSON file, possibly gzip-compressed.
    Path(PathBuf),
    /// Filter stored under this name in the `viewersetup` table.
    Name(String),
}

/// How the rules of a group are combined.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Operator {
    #[default]
    And,
    Or,
}

/// Test of a column rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Test {
    Equals,
    LessThan,
    LessThanEq,
    GreaterThan,
    GreaterThanEq,
    HasData,
    NoData,
    StringContains,
    StringStarts,
    StringEnds,
    Between,
    Select,
}

/// A test on a single column.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnRule {
    pub column: String,
    pub test: Test,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub negate: bool,
}

/// A rule is either a column test or a nested group.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Rule {
    Column(ColumnRule),
    Group(RuleGroup),
}

/// A group of rules combined with one operator.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RuleGroup {
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub negate: bool,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Samples that variants must or must not be present in.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SampleFilter {
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub reject: Vec<String>,
}

/// A complete filter definition.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<RuleGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<SampleFilter>,
    /// Raw SQL condition over the variant table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

impl FilterSpec {
    /// Load the filter from the given source.
    pub fn load(db: &ResultDb, source: &FilterSource) -> Result<Self, anyhow::Error> {
        let json = match source {
            FilterSource::None => return Ok(Self::default()),
            FilterSource::Json(json) => json.clone(),
            FilterSource::Path(path) => read_to_string_maybe_gz(path).map_err(|e| {
                ReportError::InvalidFilter(format!("cannot read {:?}: {}", path, e))
            })?,
            FilterSource::Name(name) => Self::stored(db, name)?,
        };
        serde_json::from_str(&json)
            .map_err(|e| ReportError::InvalidFilter(format!("cannot parse filter: {}", e)).into())
    }

    /// Look up a filter stored in the database by name.
    fn stored(db: &ResultDb, name: &str) -> Result<String, anyhow::Error> {
        let missing = || ReportError::InvalidFilter(format!("no stored filter named {:?}", name));
        if !db.table_exists("viewersetup")? {
            return Err(missing().into());
        }
        let row = db.query_row_opt(
            "SELECT viewersetup FROM viewersetup WHERE datatype = 'filter' AND name = ?1",
            &[&name],
        )?;
        match row.as_ref().and_then(|row| row.get("viewersetup")) {
            Some(value) if !value.is_absent() => Ok(value.to_string()),
            _ => Err(missing().into()),
        }
    }
}

/// Check that `column` is a plain qualified name of a known variant column.
fn check_column(column: &str, known: &[String]) -> Result<(), ReportError> {
    let valid = column
        .split_once("__")
        .map(|(m, f)| {
            let ok = |s: &str| {
                !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            };
            ok(m) && ok(f)
        })
        .unwrap_or(false);
    if !valid || !known.iter().any(|k| k == column) {
        return Err(ReportError::InvalidFilter(format!(
            "unknown variant column {:?}",
            column
        )));
    }
    Ok(())
}

fn to_sql_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

fn like_escape(value: &serde_json::Value) -> String {
    let raw = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl ColumnRule {
    fn to_sql(&self, known: &[String], params: &mut Vec<Value>) -> Result<String, ReportError> {
        check_column(&self.column, known)?;
        let col = format!("v.{}", quote_ident(&self.column));
        let mut bind = |value: Value| {
            params.push(value);
            "?".to_string()
        };
        let cond = match self.test {
            Test::Equals => format!("{} = {}", col, bind(to_sql_value(&self.value))),
            Test::LessThan => format!("{} < {}", col, bind(to_sql_value(&self.value))),
            Test::LessThanEq => format!("{} <= {}", col, bind(to_sql_value(&self.value))),
            Test::GreaterThan => format!("{} > {}", col, bind(to_sql_value(&self.value))),
            Test::GreaterThanEq => format!("{} >= {}", col, bind(to_sql_value(&self.value))),
            Test::HasData => format!("({col} IS NOT NULL AND {col} <> '')"),
            Test::NoData => format!("({col} IS NULL OR {col} = '')"),
            Test::StringContains => format!(
                "{} LIKE {} ESCAPE '\\'",
                col,
                bind(Value::Text(format!("%{}%", like_escape(&self.value))))
            ),
            Test::StringStarts => format!(
                "{} LIKE {} ESCAPE '\\'",
                col,
                bind(Value::Text(format!("{}%", like_escape(&self.value))))
            ),
            Test::StringEnds => format!(
                "{} LIKE {} ESCAPE '\\'",
                col,
                bind(Value::Text(format!("%{}", like_escape(&self.value))))
            ),
            Test::Between => match self.value.as_array().map(Vec::as_slice) {
                Some([lo, hi]) => format!(
                    "{} BETWEEN {} AND {}",
                    col,
                    bind(to_sql_value(lo)),
                    bind(to_sql_value(hi))
                ),
                _ => {
                    return Err(ReportError::InvalidFilter(format!(
                        "between on {} needs two values",
                        self.column
                    )))
                }
            },
            Test::Select => {
                let values = self.value.as_array().ok_or_else(|| {
                    ReportError::InvalidFilter(format!("select on {} needs a list", self.column))
                })?;
                if values.is_empty() {
                    "0".to_string()
                } else {
                    let placeholders = values
                        .iter()
                        .map(|v| bind(to_sql_value(v)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("{} IN ({})", col, placeholders)
                }
            }
        };
        Ok(if self.negate {
            format!("NOT ({})", cond)
        } else {
            cond
        })
    }
}

impl RuleGroup {
    fn to_sql(&self, known: &[String], params: &mut Vec<Value>) -> Result<String, ReportError> {
        let parts = self
            .rules
            .iter()
            .map(|rule| match rule {
                Rule::Column(rule) => rule.to_sql(known, params),
                Rule::Group(group) => group.to_sql(known, params),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let cond = if parts.is_empty() {
            "1".to_string()
        } else {
            format!("({})", parts.join(&format!(" {} ", self.operator)))
        };
        Ok(if self.negate {
            format!("NOT {}", cond)
        } else {
            cond
        })
    }
}

/// Access to the filtered rows of a result database.
pub trait ReportFilter {
    /// Levels that have data in the result database.
    fn result_levels(&self) -> Result<Vec<Level>, anyhow::Error>;

    /// Number of rows of `level` passing the filter.
    fn row_count(&self, level: Level) -> Result<usize, anyhow::Error>;

    /// Pass the filtered rows of `level`, optionally restricted to one page, to `f`.
    fn for_each_row(
        &self,
        level: Level,
        page: Option<Page>,
        f: &mut dyn FnMut(Row) -> Result<(), anyhow::Error>,
    ) -> Result<usize, anyhow::Error>;

    /// The gene row of `symbol`, if any.
    fn gene_row(&self, symbol: &str) -> Result<Option<Row>, anyhow::Error>;
}

/// Filter evaluated as SQL against the result database.
#[derive(Debug)]
pub struct SqlFilter<'a> {
    db: &'a ResultDb,
    spec: FilterSpec,
    where_clause: String,
    params: Vec<Value>,
    has_variant: bool,
}

impl<'a> SqlFilter<'a> {
    /// Load and validate the filter.
    ///
    /// `include_samples` keeps variants present in any of the given samples,
    /// `exclude_samples` keeps variants present in any sample not given.
    pub fn load(
        db: &'a ResultDb,
        source: &FilterSource,
        sql: Option<&str>,
        include_samples: &[String],
        exclude_samples: &[String],
    ) -> Result<Self, anyhow::Error> {
        let mut spec = FilterSpec::load(db, source)?;
        if let Some(sql) = sql.filter(|s| !s.trim().is_empty()) {
            spec.sql = Some(match spec.sql.take() {
                Some(prev) => format!("({}) AND ({})", prev, sql),
                None => sql.to_string(),
            });
        }
        tracing::debug!("filter = {}", serde_json::to_string(&spec)?);

        let has_variant = db.table_exists(Level::Variant.table())?;
        let known = if has_variant {
            db.column_names(Level::Variant.table())?
        } else {
            Vec::new()
        };
        let has_samples = db.table_exists(Level::Sample.table())?;

        let mut conds = Vec::new();
        let mut params = Vec::new();
        if let Some(group) = &spec.variant {
            conds.push(group.to_sql(&known, &mut params)?);
        }
        if !spec.genes.is_empty() {
            check_column("base__hugo", &known)?;
            let placeholders = vec!["?"; spec.genes.len()].join(", ");
            conds.push(format!("v.\"base__hugo\" IN ({})", placeholders));
            params.extend(spec.genes.iter().cloned().map(Value::Text));
        }

        let mut sample_cond = |op: &str, samples: &[String]| -> Result<(), ReportError> {
            if samples.is_empty() {
                return Ok(());
            }
            if !has_samples {
                return Err(ReportError::InvalidFilter(
                    "sample filter given but result database has no sample table".into(),
                ));
            }
            let placeholders = vec!["?"; samples.len()].join(", ");
            conds.push(format!(
                "v.\"base__uid\" IN (SELECT s.\"base__uid\" FROM sample AS s \
                 WHERE s.\"base__sample_id\" {} ({}))",
                op, placeholders
            ));
            params.extend(samples.iter().cloned().map(Value::Text));
            Ok(())
        };
        if let Some(sample) = &spec.sample {
            for s in &sample.require {
                sample_cond("IN", std::slice::from_ref(s))?;
            }
        }
        sample_cond("IN", include_samples)?;
        sample_cond("NOT IN", exclude_samples)?;
        if let Some(sample) = &spec.sample {
            if !sample.reject.is_empty() {
                if !has_samples {
                    return Err(ReportError::InvalidFilter(
                        "sample filter given but result database has no sample table".into(),
                    )
                    .into());
                }
                let placeholders = vec!["?"; sample.reject.len()].join(", ");
                conds.push(format!(
                    "v.\"base__uid\" NOT IN (SELECT s.\"base__uid\" FROM sample AS s \
                     WHERE s.\"base__sample_id\" IN ({}))",
                    placeholders
                ));
                params.extend(sample.reject.iter().cloned().map(Value::Text));
            }
        }
        if let Some(sql) = &spec.sql {
            conds.push(format!("({})", sql));
        }

        let where_clause = if conds.is_empty() {
            "1".to_string()
        } else {
            conds.join(" AND ")
        };
        tracing::debug!("filter where clause = {}", &where_clause);

        Ok(Self {
            db,
            spec,
            where_clause,
            params,
            has_variant,
        })
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    /// Build the query selecting the filtered rows of `level`.
    fn level_query(&self, level: Level, select: &str) -> String {
        let table = quote_ident(level.table());
        let variants = format!("variant AS v WHERE {}", &self.where_clause);
        match level {
            Level::Variant => format!("SELECT {select} FROM {variants}"),
            _ if !self.has_variant => format!("SELECT {select} FROM {table} AS x WHERE 1"),
            Level::Gene => format!(
                "SELECT {select} FROM {table} AS x WHERE x.\"base__hugo\" IN \
                 (SELECT v.\"base__hugo\" FROM {variants})"
            ),
            Level::Sample | Level::Mapping => format!(
                "SELECT {select} FROM {table} AS x WHERE x.\"base__uid\" IN \
                 (SELECT v.\"base__uid\" FROM {variants})"
            ),
        }
    }

    fn level_params(&self) -> Vec<&dyn ToSql> {
        if self.has_variant {
            self.params.iter().map(|p| p as &dyn ToSql).collect()
        } else {
            Vec::new()
        }
    }
}

impl ReportFilter for SqlFilter<'_> {
    fn result_levels(&self) -> Result<Vec<Level>, anyhow::Error> {
        let mut result = Vec::new();
        for level in Level::iter() {
            if self.db.has_level(level)? {
                result.push(level);
            }
        }
        Ok(result)
    }

    fn row_count(&self, level: Level) -> Result<usize, anyhow::Error> {
        if !self.db.table_exists(level.table())? {
            return Ok(0);
        }
        self.db
            .count(&self.level_query(level, "COUNT(*)"), &self.level_params())
    }

    fn for_each_row(
        &self,
        level: Level,
        page: Option<Page>,
        f: &mut dyn FnMut(Row) -> Result<(), anyhow::Error>,
    ) -> Result<usize, anyhow::Error> {
        if !self.db.table_exists(level.table())? {
            return Ok(0);
        }
        let alias = if level == Level::Variant { "v" } else { "x" };
        let mut sql = format!(
            "{} ORDER BY {}.rowid",
            self.level_query(level, &format!("{}.*", alias)),
            alias
        );
        let limits: [i64; 2] = page
            .map(|page| page.sql_limits())
            .transpose()?
            .unwrap_or_default();
        let mut params = self.level_params();
        if page.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(&limits[0]);
            params.push(&limits[1]);
        }
        self.db.for_each_row(&sql, &params, f)
    }

    fn gene_row(&self, symbol: &str) -> Result<Option<Row>, anyhow::Error> {
        if !self.db.table_exists(Level::Gene.table())? {
            return Ok(None);
        }
        self.db.query_row_opt(
            "SELECT * FROM gene WHERE \"base__hugo\" = ?1 ORDER BY rowid LIMIT 1",
            &[&symbol],
        )
    }
}
