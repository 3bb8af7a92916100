//! DB-API style cursors over a connection.
//!
//! A cursor is bound to its connection for one query at a time and
//! flattens the block stream into rows; closing a cursor never closes
//! the connection.

use std::collections::{HashMap, VecDeque};

use super::connection::Connection;
use super::QueryOptions;
use crate::error::{Error, Result};
use crate::value::Value;

pub struct Cursor<'c> {
    conn: &'c mut Connection,
    description: Vec<(String, String)>,
    rows: VecDeque<Vec<Value>>,
    rowcount: i64,
    arraysize: usize,
    closed: bool,
    settings: HashMap<String, String>,
    query_id: Option<String>,
}

impl<'c> Cursor<'c> {
    pub fn new(conn: &'c mut Connection) -> Self {
        Self {
            conn,
            description: Vec::new(),
            rows: VecDeque::new(),
            rowcount: -1,
            arraysize: 1,
            closed: false,
            settings: HashMap::new(),
            query_id: None,
        }
    }

    /// `(name, type)` of each column in the last result.
    pub fn description(&self) -> &[(String, String)] {
        &self.description
    }

    /// Affected rows for writes, fetched rows for reads, -1 when unknown.
    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    pub fn set_arraysize(&mut self, arraysize: usize) {
        self.arraysize = arraysize.max(1);
    }

    /// Per-query settings merged over the connection's.
    pub fn set_settings(&mut self, settings: HashMap<String, String>) {
        self.settings = settings;
    }

    pub fn set_query_id(&mut self, query_id: impl Into<String>) {
        self.query_id = Some(query_id.into());
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::CursorClosed);
        }
        Ok(())
    }

    fn query_options(&self) -> QueryOptions {
        QueryOptions {
            query_id: self.query_id.clone(),
            settings: self.settings.clone(),
            external_tables: Vec::new(),
        }
    }

    pub async fn execute(&mut self, sql: &str, args: Option<Vec<Vec<Value>>>) -> Result<()> {
        self.check_open()?;
        let options = self.query_options();
        let result = self.conn.execute_with(sql, args, &options).await?;
        self.description = result.columns;
        self.rows = result.rows.into();
        self.rowcount = result.rowcount;
        Ok(())
    }

    /// Run the statement once per parameter row (bulk insert path).
    pub async fn executemany(&mut self, sql: &str, args: Vec<Vec<Value>>) -> Result<()> {
        self.execute(sql, Some(args)).await
    }

    /// Next row, or `None` once the result is exhausted.
    pub async fn fetchone(&mut self) -> Result<Option<Vec<Value>>> {
        self.check_open()?;
        Ok(self.rows.pop_front())
    }

    /// Up to `size` rows (default: `arraysize`).
    pub async fn fetchmany(&mut self, size: Option<usize>) -> Result<Vec<Vec<Value>>> {
        self.check_open()?;
        let size = size.unwrap_or(self.arraysize);
        let take = size.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }

    pub async fn fetchall(&mut self) -> Result<Vec<Vec<Value>>> {
        self.check_open()?;
        Ok(self.rows.drain(..).collect())
    }

    /// Close the cursor; the connection stays open.
    pub async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}

/// A cursor shaping each row as a column-name → value map.
///
/// When a SELECT projects duplicate column aliases the first occurrence
/// wins; later columns with the same name are dropped from the map.
pub struct DictCursor<'c> {
    inner: Cursor<'c>,
}

impl<'c> DictCursor<'c> {
    pub fn new(conn: &'c mut Connection) -> Self {
        Self {
            inner: Cursor::new(conn),
        }
    }

    pub fn description(&self) -> &[(String, String)] {
        self.inner.description()
    }

    pub fn rowcount(&self) -> i64 {
        self.inner.rowcount()
    }

    pub fn set_settings(&mut self, settings: HashMap<String, String>) {
        self.inner.set_settings(settings);
    }

    pub fn set_query_id(&mut self, query_id: impl Into<String>) {
        self.inner.set_query_id(query_id);
    }

    pub async fn execute(&mut self, sql: &str, args: Option<Vec<Vec<Value>>>) -> Result<()> {
        self.inner.execute(sql, args).await
    }

    pub async fn executemany(&mut self, sql: &str, args: Vec<Vec<Value>>) -> Result<()> {
        self.inner.executemany(sql, args).await
    }

    fn shape(&self, row: Vec<Value>) -> HashMap<String, Value> {
        let mut map = HashMap::with_capacity(row.len());
        for ((name, _), value) in self.inner.description.iter().zip(row) {
            map.entry(name.clone()).or_insert(value);
        }
        map
    }

    pub async fn fetchone(&mut self) -> Result<Option<HashMap<String, Value>>> {
        Ok(self.inner.fetchone().await?.map(|row| self.shape(row)))
    }

    pub async fn fetchmany(&mut self, size: Option<usize>) -> Result<Vec<HashMap<String, Value>>> {
        let rows = self.inner.fetchmany(size).await?;
        Ok(rows.into_iter().map(|row| self.shape(row)).collect())
    }

    pub async fn fetchall(&mut self) -> Result<Vec<HashMap<String, Value>>> {
        let rows = self.inner.fetchall().await?;
        Ok(rows.into_iter().map(|row| self.shape(row)).collect())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}
