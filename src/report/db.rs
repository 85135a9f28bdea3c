//! Read-only access to the result database.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rusqlite::{OpenFlags, OptionalExtension, ToSql};

use crate::{common::quote_ident, err::ReportError};

use super::{
    data::{Cell, Row},
    schema::Level,
};

/// Mapper assumed when the database does not record one.
pub const DEFAULT_MAPPER: &str = "hg38";

/// Substitution tables of one level: module, then field, then code to label.
pub type ReportSubs = IndexMap<String, IndexMap<String, IndexMap<String, String>>>;

/// Owned connection to a result database.
#[derive(Debug)]
pub struct ResultDb {
    conn: rusqlite::Connection,
    path: PathBuf,
}

impl ResultDb {
    /// Open the result database at `path` read-only and check that it carries an `info` table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(
                ReportError::WrongInput(format!("result database {:?} does not exist", path))
                    .into(),
            );
        }
        let conn = rusqlite::Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ReportError::DatabaseConnection(format!("{:?}: {}", path, e)))?;
        let db = Self {
            conn,
            path: path.to_path_buf(),
        };
        match db.table_exists("info") {
            Ok(true) => Ok(db),
            Ok(false) => Err(ReportError::WrongInput(format!(
                "{:?} is not a result database: no info table",
                path
            ))
            .into()),
            Err(e) => Err(ReportError::WrongInput(format!(
                "{:?} is not readable as a result database: {}",
                path, e
            ))
            .into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a table or view of the given name exists.
    pub fn table_exists(&self, name: &str) -> Result<bool, anyhow::Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether the level has both a data table and a header table.
    pub fn has_level(&self, level: Level) -> Result<bool, anyhow::Error> {
        Ok(self.table_exists(level.table())? && self.table_exists(&level.header_table())?)
    }

    /// Value of a key in the `info` table.
    pub fn info_value(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self
            .conn
            .query_row(
                "SELECT colval FROM info WHERE colkey = ?1",
                [key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten())
    }

    /// Name of the mapper module that produced the database.
    ///
    /// The `_mapper` key has the form `<name>:<version>`.
    pub fn mapper_name(&self) -> Result<String, anyhow::Error> {
        Ok(match self.info_value("_mapper")? {
            Some(value) if !value.trim().is_empty() => value
                .split(':')
                .next()
                .unwrap_or(DEFAULT_MAPPER)
                .trim()
                .to_string(),
            _ => DEFAULT_MAPPER.to_string(),
        })
    }

    /// The original input files, input index to path.
    pub fn input_paths(&self) -> Result<IndexMap<String, String>, anyhow::Error> {
        let Some(value) = self.info_value("_input_paths")? else {
            return Ok(IndexMap::new());
        };
        let parsed: IndexMap<String, serde_json::Value> = serde_json::from_str(&value)
            .or_else(|_| serde_json::from_str(&value.replace('\'', "\"")))
            .map_err(|e| anyhow::anyhow!("could not parse _input_paths {:?}: {}", &value, e))?;
        Ok(parsed
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect())
    }

    /// Rows of the header table, optionally restricted to one module's columns.
    pub fn header_rows(
        &self,
        level: Level,
        module: Option<&str>,
    ) -> Result<Vec<(String, String)>, anyhow::Error> {
        let table = level.header_table();
        if !self.table_exists(&table)? {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT col_name, col_def FROM {} ORDER BY rowid",
            quote_ident(&table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match module {
            Some(module) => {
                let prefix = format!("{}__", module);
                rows.into_iter()
                    .filter(|(name, _)| name.starts_with(&prefix))
                    .collect()
            }
            None => rows,
        })
    }

    /// Modules of the annotator table as `(name, displayname)`, ordered by name.
    pub fn annotators(&self, level: Level) -> Result<Vec<(String, String)>, anyhow::Error> {
        let table = level.annotator_table();
        if !self.table_exists(&table)? {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT name, displayname FROM {} ORDER BY name",
            quote_ident(&table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let displayname: Option<String> = row.get(1)?;
                Ok((name.clone(), displayname.unwrap_or(name)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Substitution tables of the level; empty when the table is absent.
    pub fn report_subs(&self, level: Level) -> Result<ReportSubs, anyhow::Error> {
        let table = level.reportsub_table();
        if !self.table_exists(&table)? {
            return Ok(ReportSubs::new());
        }
        let sql = format!("SELECT colkey, colval FROM {}", quote_ident(&table));
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut result = ReportSubs::new();
        for (module, json) in rows {
            let fields: IndexMap<String, IndexMap<String, serde_json::Value>> =
                serde_json::from_str(&json).map_err(|e| {
                    anyhow::anyhow!("invalid substitution table for {} in {}: {}", module, table, e)
                })?;
            let fields = fields
                .into_iter()
                .map(|(field, subs)| {
                    let subs = subs
                        .into_iter()
                        .map(|(code, label)| match label {
                            serde_json::Value::String(s) => (code, s),
                            other => (code, other.to_string()),
                        })
                        .collect();
                    (field, subs)
                })
                .collect();
            result.insert(module, fields);
        }
        Ok(result)
    }

    /// Names of the columns of a table.
    pub fn column_names(&self, table: &str) -> Result<Vec<String>, anyhow::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Distinct non-null values of a column in the level's data table.
    pub fn distinct_values(&self, level: Level, column: &str) -> Result<Vec<Cell>, anyhow::Error> {
        let col = quote_ident(column);
        let sql = format!(
            "SELECT DISTINCT {col} FROM {} WHERE {col} IS NOT NULL",
            quote_ident(level.table())
        );
        let mut result = Vec::new();
        self.for_each_row(&sql, &[], &mut |row| {
            if let Some((_, value)) = row.into_iter().next() {
                result.push(value);
            }
            Ok(())
        })?;
        Ok(result)
    }

    /// Run a query and pass each resulting row to `f`, returning the number of rows.
    pub fn for_each_row(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        f: &mut dyn FnMut(Row) -> Result<(), anyhow::Error>,
    ) -> Result<usize, anyhow::Error> {
        tracing::trace!("running query: {}", sql);
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| anyhow::anyhow!("problem preparing query {:?}: {}", sql, e))?;
        let names = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let mut rows = stmt.query(params)?;
        let mut count = 0;
        while let Some(row) = rows.next()? {
            let mut record = Row::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                record.insert(name.clone(), Cell::from(row.get_ref(i)?));
            }
            f(record)?;
            count += 1;
        }
        Ok(count)
    }

    /// Run a query expected to produce at most one row.
    pub fn query_row_opt(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Option<Row>, anyhow::Error> {
        let mut result = None;
        self.for_each_row(sql, params, &mut |row| {
            if result.is_none() {
                result = Some(row);
            }
            Ok(())
        })?;
        Ok(result)
    }

    /// Run a `COUNT(*)`-style query.
    pub fn count(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize, anyhow::Error> {
        let count: i64 = self.conn.query_row(sql, params, |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Close the connection, reporting failures as connection errors.
    pub fn close(self) -> Result<(), anyhow::Error> {
        tracing::debug!("closing result database {:?}", &self.path);
        self.conn
            .close()
            .map_err(|(_, e)| ReportError::DatabaseConnection(e.to_string()).into())
    }
}
