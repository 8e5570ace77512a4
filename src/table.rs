use std::fmt;
use std::io::{Read, Write};

use camino::Utf8Path;
use chrono::DateTime;

use crate::error::ExportError;
use crate::rds::{RObject, Vector, factor_levels};

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn from_optional(value: Option<String>) -> Self {
        value.map(Cell::Text).unwrap_or(Cell::Missing)
    }

    pub fn kind(&self) -> Option<CellKind> {
        match self {
            Cell::Missing => None,
            Cell::Logical(_) => Some(CellKind::Logical),
            Cell::Integer(_) | Cell::Real(_) => Some(CellKind::Numeric),
            Cell::Text(_) => Some(CellKind::Text),
        }
    }

    /// Field inference for re-read CSVs: empty, integer, real, boolean, text.
    pub fn infer(field: &str) -> Self {
        Self::parse(field, None)
    }

    /// Parses a written field back into a cell of the given kind. Numeric
    /// fields without a decimal point are integers; reals always carry one.
    /// Without a kind the order is empty, integer, real, boolean, text.
    pub fn parse(field: &str, kind: Option<CellKind>) -> Self {
        if field.is_empty() {
            return Cell::Missing;
        }
        match kind {
            Some(CellKind::Text) => Cell::Text(field.to_string()),
            Some(CellKind::Logical) => match field {
                "True" => Cell::Logical(true),
                "False" => Cell::Logical(false),
                _ => Cell::Text(field.to_string()),
            },
            Some(CellKind::Numeric) => parse_number(field)
                .unwrap_or_else(|| Cell::Text(field.to_string())),
            None => parse_number(field).unwrap_or_else(|| match field {
                "True" => Cell::Logical(true),
                "False" => Cell::Logical(false),
                _ => Cell::Text(field.to_string()),
            }),
        }
    }
}

fn parse_number(field: &str) -> Option<Cell> {
    if let Ok(value) = field.parse::<i64>() {
        return Some(Cell::Integer(value));
    }
    match field.parse::<f64>() {
        Ok(value) if !value.is_nan() => Some(Cell::Real(value)),
        _ => None,
    }
}

/// What a column holds, for reading a CSV back without guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Logical,
    Numeric,
    Text,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Missing => Ok(()),
            Cell::Logical(true) => write!(f, "True"),
            Cell::Logical(false) => write!(f, "False"),
            Cell::Integer(value) => write!(f, "{value}"),
            Cell::Real(value) if value.is_finite() && value.fract() == 0.0 => {
                write!(f, "{value:.1}")
            }
            Cell::Real(value) => write!(f, "{value}"),
            Cell::Text(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub cells: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    /// Kind of the first non-missing cell.
    pub fn kind(&self) -> Option<CellKind> {
        self.cells.iter().find_map(Cell::kind)
    }
}

/// Rectangular table: named columns of equal length plus an optional row
/// index of labels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    index: Option<Vec<String>>,
    columns: Vec<Column>,
    rows: usize,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, ExportError> {
        let rows = columns.first().map(|column| column.cells.len()).unwrap_or(0);
        if let Some(column) = columns.iter().find(|column| column.cells.len() != rows) {
            return Err(ExportError::Extraction(format!(
                "column {} has {} rows, expected {rows}",
                column.name,
                column.cells.len()
            )));
        }
        Ok(Self {
            index: None,
            columns,
            rows,
        })
    }

    pub fn empty(column_names: &[&str]) -> Self {
        Self {
            index: None,
            columns: column_names
                .iter()
                .map(|name| Column::new(*name, Vec::new()))
                .collect(),
            rows: 0,
        }
    }

    pub fn with_index(mut self, index: Vec<String>) -> Result<Self, ExportError> {
        if index.len() != self.rows && !self.columns.is_empty() {
            return Err(ExportError::Extraction(format!(
                "index has {} labels for {} rows",
                index.len(),
                self.rows
            )));
        }
        self.rows = index.len();
        self.index = Some(index);
        Ok(self)
    }

    pub fn without_index(mut self) -> Self {
        self.index = None;
        self
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn index(&self) -> Option<&[String]> {
        self.index.as_deref()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    pub fn schema(&self) -> Vec<Option<CellKind>> {
        self.columns.iter().map(Column::kind).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Appends a column holding `value` in every row, replacing an existing
    /// column of the same name the way `df$name <- value` does.
    pub fn push_constant(&mut self, name: &str, value: Cell) {
        let cells = vec![value; self.rows];
        match self.columns.iter_mut().find(|column| column.name == name) {
            Some(column) => column.cells = cells,
            None => self.columns.push(Column::new(name, cells)),
        }
    }

    /// `as.data.frame(df)` for an R data frame; row names become the index.
    pub fn from_data_frame(object: &RObject) -> Result<Self, ExportError> {
        if !object.is_data_frame() {
            return Err(ExportError::Extraction(format!(
                "expected a data.frame, found {} with class {:?}",
                object.type_name(),
                object.class()
            )));
        }
        let entries = object.list_entries().ok_or_else(|| {
            ExportError::Extraction("data.frame is not stored as a list".to_string())
        })?;

        let row_names = data_frame_row_names(object);
        let rows = match &row_names {
            Some(labels) => labels.len(),
            None => entries.first().map(|(_, value)| value.len()).unwrap_or(0),
        };

        let mut columns = Vec::with_capacity(entries.len());
        for (position, (name, value)) in entries.into_iter().enumerate() {
            let name = name
                .map(str::to_string)
                .unwrap_or_else(|| format!("V{}", position + 1));
            if value.dim().is_some_and(|dim| dim.len() > 1 && dim[1] != 1) {
                return Err(ExportError::Extraction(format!(
                    "column {name} is a matrix; matrix-valued columns are not supported"
                )));
            }
            let cells = vector_cells(value, 0, value.len())
                .map_err(|err| ExportError::Extraction(format!("column {name}: {err}")))?;
            if cells.len() != rows {
                return Err(ExportError::Extraction(format!(
                    "column {name} has {} rows, expected {rows}",
                    cells.len()
                )));
            }
            columns.push(Column::new(name, cells));
        }

        let index = row_names.unwrap_or_else(|| default_labels(rows));
        let mut table = Table::new(columns)?;
        table.rows = rows;
        table.with_index(index)
    }

    /// `as.data.frame(matrix)`: one column per matrix column, dimnames as
    /// column names and index.
    pub fn from_matrix(object: &RObject) -> Result<Self, ExportError> {
        let dim = object
            .dim()
            .ok_or_else(|| ExportError::Extraction("matrix has no dim attribute".to_string()))?;
        let [nrow, ncol] = dim.as_slice() else {
            return Err(ExportError::Extraction(format!(
                "expected a 2-dimensional matrix, found {} dimensions",
                dim.len()
            )));
        };
        let (nrow, ncol) = (*nrow, *ncol);
        if object.len() != nrow * ncol {
            return Err(ExportError::Extraction(format!(
                "matrix holds {} values for dim {nrow}x{ncol}",
                object.len()
            )));
        }

        let (row_names, col_names) = match object.attr("dimnames") {
            Some(dimnames) => {
                let parts = dimnames.list_entries().unwrap_or_default();
                (
                    parts.first().and_then(|(_, value)| string_labels(value)),
                    parts.get(1).and_then(|(_, value)| string_labels(value)),
                )
            }
            None => (None, None),
        };

        let mut columns = Vec::with_capacity(ncol);
        for j in 0..ncol {
            let name = col_names
                .as_ref()
                .and_then(|names| names.get(j).cloned())
                .unwrap_or_else(|| format!("V{}", j + 1));
            let cells = vector_cells(object, j * nrow, nrow)?;
            columns.push(Column::new(name, cells));
        }

        let mut table = Table::new(columns)?;
        table.rows = nrow;
        table.with_index(row_names.unwrap_or_else(|| default_labels(nrow)))
    }

    /// Row-binds tables the way `rbind.data.frame` does: columns are matched
    /// by name in the first table's order and the index is dropped.
    /// Returns `None` for an empty input, as `do.call(rbind, list())` is NULL.
    pub fn concat(tables: Vec<Table>) -> Result<Option<Table>, ExportError> {
        let mut tables = tables.into_iter();
        let Some(first) = tables.next() else {
            return Ok(None);
        };
        let mut combined = first.without_index();

        for (offset, table) in tables.enumerate() {
            if table.columns.len() != combined.columns.len() {
                return Err(ExportError::Extraction(format!(
                    "table {} has {} columns, expected {}",
                    offset + 2,
                    table.columns.len(),
                    combined.columns.len()
                )));
            }
            let mut incoming = table.columns;
            for column in combined.columns.iter_mut() {
                let position = incoming
                    .iter()
                    .position(|candidate| candidate.name == column.name)
                    .ok_or_else(|| {
                        ExportError::Extraction(format!(
                            "table {} has no column {}; names do not match previous names",
                            offset + 2,
                            column.name
                        ))
                    })?;
                let source = incoming.swap_remove(position);
                column.cells.extend(source.cells);
            }
            combined.rows += table.rows;
        }
        Ok(Some(combined))
    }

    pub fn write_csv(&self, path: &Utf8Path, with_index: bool) -> Result<(), ExportError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        let mut temp = tempfile::Builder::new()
            .prefix("pdxe-export-table")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| ExportError::Filesystem(err.to_string()))?;
        self.write_csv_to(temp.as_file_mut(), with_index)?;
        temp.persist(path.as_std_path())
            .map_err(|err| ExportError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Missing cells are written as empty fields; with an index the first
    /// header cell is empty.
    pub fn write_csv_to<W: Write>(&self, writer: W, with_index: bool) -> Result<(), ExportError> {
        let mut csv = csv::Writer::from_writer(writer);

        let mut header = Vec::with_capacity(self.columns.len() + 1);
        if with_index {
            header.push(String::new());
        }
        header.extend(self.columns.iter().map(|column| column.name.clone()));
        csv.write_record(&header)?;

        let labels = match (&self.index, with_index) {
            (Some(index), true) => index.clone(),
            (None, true) => (0..self.rows).map(|row| row.to_string()).collect(),
            (_, false) => Vec::new(),
        };

        let mut record = Vec::with_capacity(header.len());
        for row in 0..self.rows {
            record.clear();
            if with_index {
                record.push(labels[row].clone());
            }
            record.extend(self.columns.iter().map(|column| column.cells[row].to_string()));
            csv.write_record(&record)?;
        }
        csv.flush()
            .map_err(|err| ExportError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn read_csv(path: &Utf8Path, with_index: bool) -> Result<Self, ExportError> {
        Self::read_csv_with_schema(path, with_index, &[])
    }

    /// Re-reads a written CSV, parsing column `i` as `schema[i]`. Columns
    /// beyond the schema, or with a `None` kind, are inferred.
    pub fn read_csv_with_schema(
        path: &Utf8Path,
        with_index: bool,
        schema: &[Option<CellKind>],
    ) -> Result<Self, ExportError> {
        let file = std::fs::File::open(path.as_std_path())
            .map_err(|err| ExportError::Filesystem(format!("open {path}: {err}")))?;
        Self::read_csv_from(file, with_index, schema)
    }

    pub fn read_csv_from<R: Read>(
        reader: R,
        with_index: bool,
        schema: &[Option<CellKind>],
    ) -> Result<Self, ExportError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);
        let headers = csv.headers()?.clone();
        let skip = usize::from(with_index);
        let mut columns: Vec<Column> = headers
            .iter()
            .skip(skip)
            .map(|name| Column::new(name, Vec::new()))
            .collect();

        let mut index = Vec::new();
        let mut rows = 0;
        for record in csv.records() {
            let record = record?;
            if with_index {
                index.push(record.get(0).unwrap_or_default().to_string());
            }
            for (position, (column, field)) in
                columns.iter_mut().zip(record.iter().skip(skip)).enumerate()
            {
                let kind = schema.get(position).copied().flatten();
                column.cells.push(Cell::parse(field, kind));
            }
            rows += 1;
        }

        let mut table = Table::new(columns)?;
        table.rows = rows;
        if with_index {
            table = table.with_index(index)?;
        }
        Ok(table)
    }
}

fn default_labels(rows: usize) -> Vec<String> {
    (1..=rows).map(|row| row.to_string()).collect()
}

/// Decodes `row.names`, including the compact `c(NA, -n)` form.
fn data_frame_row_names(object: &RObject) -> Option<Vec<String>> {
    match object.attr("row.names")?.vector_data()? {
        Vector::Integer(values) => match values.as_slice() {
            [None, Some(n)] => Some(default_labels(n.unsigned_abs() as usize)),
            _ => Some(
                values
                    .iter()
                    .map(|value| value.map(|value| value.to_string()).unwrap_or_default())
                    .collect(),
            ),
        },
        Vector::Real(values) => Some(
            values
                .iter()
                .map(|value| crate::rds::format_r_number(*value).unwrap_or_default())
                .collect(),
        ),
        Vector::Character(values) => Some(
            values
                .iter()
                .map(|value| value.clone().unwrap_or_else(|| "NA".to_string()))
                .collect(),
        ),
        _ => None,
    }
}

fn string_labels(object: &RObject) -> Option<Vec<String>> {
    match object.vector_data()? {
        Vector::Character(values) => Some(
            values
                .iter()
                .map(|value| value.clone().unwrap_or_else(|| "NA".to_string()))
                .collect(),
        ),
        data => Some(
            (0..data.len())
                .map(|i| data.element_as_string(i).unwrap_or_else(|| "NA".to_string()))
                .collect(),
        ),
    }
}

fn vector_cells(object: &RObject, start: usize, len: usize) -> Result<Vec<Cell>, ExportError> {
    let data = object.vector_data().ok_or_else(|| {
        ExportError::Extraction(format!("cannot tabulate a {} value", object.type_name()))
    })?;
    let range = start..start + len;
    if range.end > data.len() {
        return Err(ExportError::Extraction(format!(
            "rows {}..{} out of bounds for length {}",
            range.start,
            range.end,
            data.len()
        )));
    }
    if let Some(levels) = factor_levels(object) {
        let Vector::Integer(codes) = data else {
            return Err(ExportError::Extraction("factor codes are not integers".to_string()));
        };
        return Ok(codes[range]
            .iter()
            .map(|code| {
                code.and_then(|code| usize::try_from(code).ok())
                    .and_then(|code| code.checked_sub(1))
                    .and_then(|position| levels.get(position).cloned().flatten())
                    .map(Cell::Text)
                    .unwrap_or(Cell::Missing)
            })
            .collect());
    }

    let cells = match data {
        Vector::Logical(values) => values[range]
            .iter()
            .map(|value| value.map(Cell::Logical).unwrap_or(Cell::Missing))
            .collect(),
        Vector::Integer(values) => values[range]
            .iter()
            .map(|value| {
                value
                    .map(|value| Cell::Integer(i64::from(value)))
                    .unwrap_or(Cell::Missing)
            })
            .collect(),
        Vector::Real(values) if object.inherits("Date") => values[range]
            .iter()
            .map(|days| {
                temporal_cell(*days * 86_400.0, |stamp| stamp.format("%Y-%m-%d").to_string())
            })
            .collect(),
        Vector::Real(values) if object.inherits("POSIXct") => values[range]
            .iter()
            .map(|seconds| {
                temporal_cell(*seconds, |stamp| {
                    stamp.format("%Y-%m-%d %H:%M:%S").to_string()
                })
            })
            .collect(),
        Vector::Real(values) => values[range]
            .iter()
            .map(|value| {
                if value.is_nan() {
                    Cell::Missing
                } else {
                    Cell::Real(*value)
                }
            })
            .collect(),
        Vector::Character(values) => values[range]
            .iter()
            .map(|value| Cell::from_optional(value.clone()))
            .collect(),
        Vector::Complex(_) | Vector::Raw(_) => range
            .map(|i| Cell::from_optional(data.element_as_string(i)))
            .collect(),
        Vector::List(_) | Vector::Expression(_) => {
            return Err(ExportError::Extraction(
                "list columns cannot be written as CSV".to_string(),
            ));
        }
    };
    Ok(cells)
}

fn temporal_cell<F>(seconds: f64, render: F) -> Cell
where
    F: Fn(DateTime<chrono::Utc>) -> String,
{
    if !seconds.is_finite() {
        return Cell::Missing;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
        .map(|stamp| Cell::Text(render(stamp)))
        .unwrap_or(Cell::Missing)
}
