use crate::value::Value;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// An in-memory table with named columns and typed cells
///
/// Columns are kept in source order. Columns the schema does not know about
/// are carried along untouched, so a dimension lookup against a workbook with
/// extra fields still works.
///
/// Every row holds exactly one value per column; short rows are padded with
/// [`Value::Null`] and long rows are truncated on insertion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Borrowed view of a single row
#[derive(Clone, Copy, Debug)]
pub struct RowRef<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> RowRef<'a> {
    /// Cell in the named column, `None` if the table has no such column
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let idx = self.table.column_index(column)?;
        self.table.rows[self.index].get(idx)
    }

    pub fn values(&self) -> &'a [Value] {
        &self.table.rows[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The row as a JSON object keyed by column name
    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.table
            .columns
            .iter()
            .zip(self.values())
            .map(|(name, value)| (name.clone(), serde_json::Value::from(value)))
            .collect()
    }
}

impl Table {
    /// Create an empty table with the given column names
    ///
    /// # Arguments
    /// * `columns` - Column names in display order; duplicates are allowed but
    ///   lookups by name resolve to the first one
    ///
    /// # Examples
    /// ```
    /// use dti_dashboard::{Table, Value};
    ///
    /// let mut table = Table::new(vec!["股票代码".into(), "年份".into()]);
    /// assert!(table.is_empty());
    /// table.push_row(vec![Value::from("000001")]);
    /// assert_eq!(table.row(0).unwrap().get("年份"), Some(&Value::Null));
    /// ```
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from whole rows, padding or truncating each to the column count
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Append a row
    ///
    /// # Arguments
    /// * `row` - Cells in column order. Missing trailing cells become
    ///   [`Value::Null`] and surplus cells are discarded.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the first column with this name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Borrow one row, `None` past the end
    pub fn row(&self, index: usize) -> Option<RowRef<'_>> {
        (index < self.rows.len()).then_some(RowRef { table: self, index })
    }

    /// Rows in table order; reversible
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = RowRef<'_>> + '_ {
        (0..self.rows.len()).map(move |index| RowRef { table: self, index })
    }

    /// All cells of a column in row order, `None` if the column is missing
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value> + use<'a>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Rename a column in place
    ///
    /// If another column already carries the target name it is dropped first,
    /// so the renamed column becomes the only one with that name. Returns
    /// `false` when `from` does not exist.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return self.has_column(from);
        }
        if !self.has_column(from) {
            return false;
        }
        self.drop_column(to);
        if let Some(idx) = self.column_index(from) {
            self.columns[idx] = to.to_string();
        }
        true
    }

    /// Remove a column and its cells from every row
    ///
    /// # Arguments
    /// * `name` - Column to remove; only the first column with this name goes
    ///
    /// # Returns
    /// * `bool` - `true` if a column was removed, `false` if none had that name
    ///
    /// # Examples
    /// ```
    /// use dti_dashboard::Table;
    ///
    /// let mut table = Table::new(vec!["行业名称".into(), "行业代码".into()]);
    /// assert!(table.drop_column("行业代码"));
    /// assert!(!table.drop_column("行业代码"));
    /// assert_eq!(table.columns(), ["行业名称"]);
    /// ```
    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        true
    }

    /// Replace the values of a column, appending it if it does not exist
    ///
    /// `values` is resized to the row count.
    pub fn set_column(&mut self, name: &str, mut values: Vec<Value>) {
        values.resize(self.rows.len(), Value::Null);
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
    }

    /// Rewrite every cell of a column; returns `false` when the column is missing
    pub fn map_column(&mut self, name: &str, mut f: impl FnMut(&Value) -> Value) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        for row in &mut self.rows {
            row[idx] = f(&row[idx]);
        }
        true
    }

    /// Rows matching the predicate, in table order, with all columns kept
    pub fn filter(&self, mut keep: impl FnMut(RowRef<'_>) -> bool) -> Table {
        let rows = self
            .iter()
            .filter(|row| keep(*row))
            .map(|row| row.values().to_vec())
            .collect();
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// A copy of the table restricted to the given columns
    ///
    /// Returns `None` if any requested column is missing.
    pub fn project(&self, names: &[&str]) -> Option<Table> {
        let indices = names
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Option<Vec<_>>>()?;
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Some(Table {
            columns: names.iter().map(|n| n.to_string()).collect(),
            rows,
        })
    }

    /// Every row as a JSON object, the shape the HTTP layer hands out
    pub fn to_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.iter().map(|row| row.to_json()).collect()
    }
}

/// Serialize a table as a list of `{column: value}` records
pub fn serialize_records<S: Serializer>(table: &Table, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(table.iter().map(RecordView))
}

struct RecordView<'a>(RowRef<'a>);

impl Serialize for RecordView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let columns = self.0.table.columns();
        let mut map = serializer.serialize_map(Some(columns.len()))?;
        for (name, value) in columns.iter().zip(self.0.values()) {
            map.serialize_entry(name, &serde_json::Value::from(value))?;
        }
        map.end()
    }
}
