//! In-memory manifest table and delimited-text I/O.
//!
//! Every cell is kept as an opaque string so identifiers such as
//! `sample_id` and `clinical_id` keep their leading zeros. A missing cell is
//! `None`; the CSV reader maps empty fields and the usual NA markers to it.

use std::collections::BTreeSet;
use std::fs;

use camino::Utf8Path;

use crate::error::QcError;

/// Field values the CSV reader treats as missing data.
const NA_MARKERS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "NULL", "null", "<NA>"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let col = self.table.column_index(column)?;
        self.table.rows[self.index][col].as_deref()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cells(&self) -> &'a [Option<String>] {
        &self.table.rows[self.index]
    }
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) -> Result<(), QcError> {
        if row.len() != self.columns.len() {
            return Err(QcError::TableParse(format!(
                "row {} has {} fields, expected {}",
                self.rows.len() + 1,
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Builds a table from string literals; empty strings become missing cells.
    pub fn from_literal(columns: &[&str], rows: &[&[&str]]) -> Result<Self, QcError> {
        let mut table = Table::new(columns.iter().copied());
        for row in rows {
            table.push_row(
                row.iter()
                    .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
                    .collect(),
            )?;
        }
        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        (0..self.rows.len()).map(move |index| Row { table: self, index })
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        (index < self.rows.len()).then_some(Row { table: self, index })
    }

    /// Distinct non-missing values of a column in first-seen order.
    pub fn distinct(&self, column: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for row in self.rows() {
            if let Some(value) = row.get(column) {
                if seen.insert(value) {
                    out.push(value.to_string());
                }
            }
        }
        out
    }

    pub fn filter<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(&Row<'_>) -> bool,
    {
        let rows = self
            .rows()
            .filter(|row| keep(row))
            .map(|row| row.cells().to_vec())
            .collect();
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Stacks `other` under `self`; the result carries the union of both
    /// column sets, with columns unknown to one side left missing.
    pub fn concat(&self, other: &Table) -> Table {
        let mut columns = self.columns.clone();
        for col in &other.columns {
            if !columns.contains(col) {
                columns.push(col.clone());
            }
        }
        let mut out = Table::new(columns);
        for source in [self, other] {
            let mapping = out
                .columns
                .iter()
                .map(|col| source.column_index(col))
                .collect::<Vec<_>>();
            for row in &source.rows {
                out.rows.push(
                    mapping
                        .iter()
                        .map(|idx| idx.and_then(|i| row[i].clone()))
                        .collect(),
                );
            }
        }
        out
    }

    pub fn drop_columns(&self, names: &[&str]) -> Table {
        let keep = self
            .columns
            .iter()
            .filter(|col| !names.contains(&col.as_str()))
            .map(String::as_str)
            .collect::<Vec<_>>();
        self.select(&keep)
    }

    /// Projects onto `names`; columns absent from the table come back missing.
    pub fn select(&self, names: &[&str]) -> Table {
        let mapping = names
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Vec<_>>();
        Table {
            columns: names.iter().map(|name| name.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| {
                    mapping
                        .iter()
                        .map(|idx| idx.and_then(|i| row[i].clone()))
                        .collect()
                })
                .collect(),
        }
    }

    /// Sets `column` to `value` on every row, appending the column if needed.
    pub fn set_column(&mut self, column: &str, value: Option<&str>) {
        let idx = match self.column_index(column) {
            Some(idx) => idx,
            None => {
                self.columns.push(column.to_string());
                for row in &mut self.rows {
                    row.push(None);
                }
                self.columns.len() - 1
            }
        };
        for row in &mut self.rows {
            row[idx] = value.map(str::to_string);
        }
    }

    pub fn from_csv(content: &str) -> Result<Table, QcError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut records = parse_records(content)?.into_iter();
        let header = records
            .next()
            .ok_or_else(|| QcError::TableParse("missing header row".to_string()))?;
        let mut table = Table::new(header);
        for record in records {
            if record.len() == 1 && record[0].is_empty() {
                continue;
            }
            table.push_row(
                record
                    .into_iter()
                    .map(|field| (!NA_MARKERS.contains(&field.as_str())).then_some(field))
                    .collect(),
            )?;
        }
        Ok(table)
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        write_record(&mut out, self.columns.iter().map(|col| Some(col.as_str())));
        for row in &self.rows {
            write_record(&mut out, row.iter().map(|cell| cell.as_deref()));
        }
        out
    }

    /// Reads a delimited file. Spreadsheet formats are handled by an external
    /// converter and rejected here.
    pub fn read_path(path: &Utf8Path) -> Result<Table, QcError> {
        match path.extension() {
            Some("csv") | Some("txt") => {}
            Some(ext) => {
                return Err(QcError::UnsupportedFormat(format!(
                    "{path}: .{ext} files must be exported to CSV first"
                )));
            }
            None => {}
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| QcError::Filesystem(format!("read {path}: {err}")))?;
        Table::from_csv(&content)
    }
}

fn parse_records(content: &str) -> Result<Vec<Vec<String>>, QcError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();
    let mut line = 1usize;

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(ch);
                }
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                line += 1;
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(ch),
        }
    }
    if in_quotes {
        return Err(QcError::TableParse(format!(
            "unterminated quoted field near line {line}"
        )));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

fn write_record<'a>(out: &mut String, cells: impl Iterator<Item = Option<&'a str>>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        let value = cell.unwrap_or("");
        if value.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&value.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(value);
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_keeps_leading_zeros_and_missing_cells() {
        let table = Table::from_csv("sample_id,clinical_id,age\n007,0042,\n").unwrap();
        let row = table.row(0).unwrap();
        assert_eq!(row.get("sample_id"), Some("007"));
        assert_eq!(row.get("clinical_id"), Some("0042"));
        assert_eq!(row.get("age"), None);
    }

    #[test]
    fn csv_quoted_fields() {
        let table =
            Table::from_csv("comment,study\r\n\"a, \"\"quoted\"\"\nline\",X\r\n").unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.row(0).unwrap().get("comment"),
            Some("a, \"quoted\"\nline")
        );
        let again = Table::from_csv(&table.to_csv()).unwrap();
        assert_eq!(again, table);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Table::from_csv("a,b\n1\n").unwrap_err();
        assert!(matches!(err, QcError::TableParse(_)));
    }

    #[test]
    fn concat_unions_columns() {
        let left = Table::from_literal(&["a", "b"], &[&["1", "2"]]).unwrap();
        let right = Table::from_literal(&["b", "c"], &[&["3", "4"]]).unwrap();
        let both = left.concat(&right);
        assert_eq!(both.columns(), ["a", "b", "c"]);
        assert_eq!(both.row(1).unwrap().get("a"), None);
        assert_eq!(both.row(1).unwrap().get("b"), Some("3"));
        assert_eq!(both.distinct("b"), vec!["2", "3"]);
    }
}
