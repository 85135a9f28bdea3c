//! Data structures describing the columns of a report.

use indexmap::IndexMap;

use crate::{common::split_col_name, err::ReportError};

use super::summary::SummaryOp;

/// A granularity of output rows.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
    clap::ValueEnum,
    enum_map::Enum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    /// One row per variant call.
    Variant,
    /// One row per gene symbol.
    Gene,
    /// One row per sample and variant.
    Sample,
    /// One row per mapping and variant.
    Mapping,
}

impl Level {
    /// Name of the data table.
    pub fn table(&self) -> &'static str {
        match self {
            Level::Variant => "variant",
            Level::Gene => "gene",
            Level::Sample => "sample",
            Level::Mapping => "mapping",
        }
    }

    /// Name of the table with the column definitions.
    pub fn header_table(&self) -> String {
        format!("{}_header", self.table())
    }

    /// Name of the table with the contributing modules.
    pub fn annotator_table(&self) -> String {
        format!("{}_annotator", self.table())
    }

    /// Name of the table with the report-time substitutions.
    pub fn reportsub_table(&self) -> String {
        format!("{}_reportsub", self.table())
    }
}

/// Semantic type of a column.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColumnKind {
    #[default]
    String,
    Int,
    Float,
    CategoricalSingle,
    CategoricalMulti,
    Json,
}

impl ColumnKind {
    /// Derive the kind from the `type` and `category` fields of a column definition.
    ///
    /// The category takes precedence over the type.
    pub fn from_parts(
        col_name: &str,
        col_type: Option<&str>,
        category: Option<&str>,
    ) -> Result<Self, ReportError> {
        let invalid = |reason: String| ReportError::InvalidColumnDef {
            column: col_name.to_string(),
            reason,
        };
        match category.map(str::to_ascii_lowercase).as_deref() {
            Some("single") => return Ok(ColumnKind::CategoricalSingle),
            Some("multi") => return Ok(ColumnKind::CategoricalMulti),
            None | Some("") => (),
            Some(other) => return Err(invalid(format!("unknown category {:?}", other))),
        }
        match col_type.map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("string") | Some("str") | Some("text") => Ok(ColumnKind::String),
            Some("int") | Some("integer") => Ok(ColumnKind::Int),
            Some("float") | Some("real") => Ok(ColumnKind::Float),
            Some("json") => Ok(ColumnKind::Json),
            Some("category") | Some("categorical") => Ok(ColumnKind::CategoricalSingle),
            Some(other) => Err(invalid(format!("unknown type {:?}", other))),
        }
    }

    pub fn is_categorical(&self) -> bool {
        matches!(
            self,
            ColumnKind::CategoricalSingle | ColumnKind::CategoricalMulti
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Int | ColumnKind::Float)
    }
}

/// Column definition as serialized into the `col_def` field of `<level>_header` tables
/// and into `gene_summary_output_columns` of module configurations.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawColumnDef {
    /// Column name, qualified in header tables and bare in module configuration.
    #[serde(default, alias = "col_name")]
    pub name: String,
    /// Display title.
    #[serde(default, alias = "col_title")]
    pub title: Option<String>,
    /// Value type, e.g., `string` or `int`.
    #[serde(default, rename = "type", alias = "col_type")]
    pub col_type: Option<String>,
    /// Category marker, `single` or `multi`.
    #[serde(default, alias = "col_ctg")]
    pub category: Option<String>,
    /// Declared category values.
    #[serde(default, alias = "col_cats")]
    pub categories: Option<Vec<serde_json::Value>>,
    /// Whether to hide the column in concise reports.
    #[serde(default, alias = "col_hidden")]
    pub hidden: Option<bool>,
    /// Display width.
    #[serde(default, alias = "col_width")]
    pub width: Option<u32>,
    /// Description.
    #[serde(default, alias = "col_desc")]
    pub desc: Option<String>,
    /// Whether the column can be filtered on.
    #[serde(default, alias = "col_filterable")]
    pub filterable: Option<bool>,
    /// Link format for display.
    #[serde(default)]
    pub link_format: Option<String>,
    /// Aggregation used by the built-in gene summarizer.
    #[serde(default)]
    pub summary: Option<SummaryOp>,
    /// Variant column aggregated by the built-in gene summarizer.
    #[serde(default)]
    pub source: Option<String>,
}

/// One output column of a report level.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ColumnDescriptor {
    /// Qualified name `module__field`.
    #[serde(rename = "col_name")]
    pub name: String,
    #[serde(rename = "col_title")]
    pub title: String,
    #[serde(rename = "col_type")]
    pub kind: ColumnKind,
    #[serde(skip)]
    pub level: Level,
    /// Category values; `None` until declared or scanned.
    #[serde(rename = "col_cats", skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<serde_json::Value>>,
    #[serde(rename = "col_hidden")]
    pub hidden: bool,
    #[serde(rename = "col_width", skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(rename = "col_desc", skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(rename = "col_filterable")]
    pub filterable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_format: Option<String>,
    /// Whether the column is produced by a gene summarizer.
    #[serde(rename = "col_genesummary")]
    pub gene_summary: bool,
    /// Whether the column belongs to the `base` group.
    pub in_base: bool,
    /// Substitution map applied to the values, if any.
    #[serde(rename = "reportsub", skip_serializing_if = "Option::is_none")]
    pub substitution: Option<IndexMap<String, String>>,
    #[serde(skip)]
    pub summary: Option<SummaryOp>,
    #[serde(skip)]
    pub source: Option<String>,
}

impl ColumnDescriptor {
    /// Build a descriptor from a raw definition, validating the name and kind.
    pub fn from_raw(raw: RawColumnDef, level: Level) -> Result<Self, ReportError> {
        if split_col_name(&raw.name).is_none() {
            return Err(ReportError::InvalidColumnDef {
                column: raw.name,
                reason: "name is not of the form module__field".into(),
            });
        }
        let kind = ColumnKind::from_parts(
            &raw.name,
            raw.col_type.as_deref(),
            raw.category.as_deref(),
        )?;
        let categories = raw.categories.filter(|cats| !cats.is_empty());
        Ok(Self {
            title: raw.title.unwrap_or_else(|| raw.name.clone()),
            name: raw.name,
            kind,
            level,
            categories,
            hidden: raw.hidden.unwrap_or(false),
            width: raw.width,
            desc: raw.desc,
            filterable: raw.filterable.unwrap_or(true),
            link_format: raw.link_format,
            gene_summary: false,
            in_base: false,
            substitution: None,
            summary: raw.summary,
            source: raw.source,
        })
    }

    /// Module part of the qualified name.
    pub fn module(&self) -> &str {
        split_col_name(&self.name).map(|(m, _)| m).unwrap_or("")
    }

    /// Field part of the qualified name.
    pub fn field(&self) -> &str {
        split_col_name(&self.name).map(|(_, f)| f).unwrap_or("")
    }

    /// Whether categories must still be collected from the data.
    pub fn needs_categories(&self) -> bool {
        self.kind.is_categorical() && self.categories.is_none()
    }
}

/// The columns contributed by one module at a level.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, derive_new::new)]
pub struct ColumnGroup {
    /// Module name.
    pub name: String,
    /// Display name of the module.
    pub displayname: String,
    /// Number of columns in the group.
    #[new(default)]
    pub count: usize,
    /// One past the offset of the group's last column.
    #[new(default)]
    pub lastcol: usize,
}

/// The resolved column model of one level.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ColumnInfo {
    pub level: Level,
    /// Column groups in display order.
    #[serde(rename = "colgroups")]
    pub groups: Vec<ColumnGroup>,
    /// All columns in group order.
    pub columns: Vec<ColumnDescriptor>,
    /// Names of the columns selected for display, in column order.
    #[serde(skip)]
    pub display: Vec<String>,
    /// Report column name to original database column name for folded columns.
    #[serde(skip)]
    pub renames: IndexMap<String, String>,
    /// Gene columns added to the variant level.
    #[serde(skip)]
    pub var_added_cols: Vec<String>,
    /// Substitution rules of the level.
    #[serde(skip)]
    pub substitutions: Vec<super::substitution::SubstitutionRule>,
}

impl ColumnInfo {
    /// Look up a column by its qualified name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|col| col.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Look up a group by name.
    pub fn group(&self, name: &str) -> Option<&ColumnGroup> {
        self.groups.iter().find(|grp| grp.name == name)
    }

    /// The descriptors selected for display.
    pub fn display_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns
            .iter()
            .filter(|col| self.display.contains(&col.name))
    }
}
