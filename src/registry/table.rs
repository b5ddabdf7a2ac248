//! Conceptual tables.
//!
//! A table is registered at its entry OID (`base`). Each cell's instance OID
//! is `base.column.suffix`, where `suffix` encodes the row's index values
//! (see [`super::index`]). Rows live in a `BTreeMap` keyed by suffix, so a
//! walk visits columns in order and, within a column, rows in index order.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex};

use crate::binding::{BindingHandle, ObjectSpec};
use crate::error::{Error, IndexErrorKind, Result};
use crate::handler::{GetResult, SetResult};
use crate::oid::Oid;
use crate::util::lock;
use crate::value::Value;

use super::index::{self, IndexType, IndexValue};

/// Table definition: index types, column template and an optional
/// row-count scalar.
///
/// ```rust
/// use async_agentx::binding::ObjectSpec;
/// use async_agentx::oid;
/// use async_agentx::registry::{IndexType, TableSpec};
///
/// let spec = TableSpec::new()
///     .index(IndexType::Integer32)
///     .column(2, ObjectSpec::display_string(""))
///     .column(3, ObjectSpec::counter32(0))
///     .row_count(oid!(1, 3, 6, 1, 4, 1, 99999, 3, 0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TableSpec {
    pub(crate) indexes: Vec<IndexType>,
    pub(crate) columns: BTreeMap<u32, ObjectSpec>,
    pub(crate) row_count: Option<Oid>,
}

impl TableSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an index. Order matters: the suffix encodes indexes in the
    /// order they were added.
    pub fn index(mut self, index: IndexType) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a column. The spec's initial value is the default for new rows.
    pub fn column(mut self, number: u32, spec: ObjectSpec) -> Self {
        self.columns.insert(number, spec);
        self
    }

    /// Keep an Unsigned32 scalar at `oid` equal to the number of rows.
    pub fn row_count(mut self, oid: Oid) -> Self {
        self.row_count = Some(oid);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        index::validate_types(&self.indexes)?;
        if self.columns.is_empty() {
            return Err(Error::index(IndexErrorKind::EmptyTable));
        }
        Ok(())
    }
}

struct Row {
    index: Vec<IndexValue>,
    cells: BTreeMap<u32, BindingHandle>,
}

struct Table {
    indexes: Vec<IndexType>,
    columns: BTreeMap<u32, ObjectSpec>,
    rows: BTreeMap<Oid, Row>,
    row_count: Option<BindingHandle>,
}

impl Table {
    fn sync_row_count(&self) {
        if let Some(count) = &self.row_count {
            count.replace(Value::Gauge32(self.rows.len() as u32));
        }
    }
}

/// Shared handle to a registered table.
#[derive(Clone)]
pub struct TableHandle {
    base: Oid,
    inner: Arc<Mutex<Table>>,
}

impl std::fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = lock(&self.inner);
        f.debug_struct("TableHandle")
            .field("base", &self.base)
            .field("indexes", &table.indexes)
            .field("columns", &table.columns.keys().collect::<Vec<_>>())
            .field("rows", &table.rows.len())
            .finish()
    }
}

impl TableHandle {
    pub(crate) fn new(base: Oid, spec: TableSpec, row_count: Option<BindingHandle>) -> Self {
        let table = Table {
            indexes: spec.indexes,
            columns: spec.columns,
            rows: BTreeMap::new(),
            row_count,
        };
        table.sync_row_count();
        Self {
            base,
            inner: Arc::new(Mutex::new(table)),
        }
    }

    /// Entry OID the table is registered at.
    pub fn base(&self) -> &Oid {
        &self.base
    }

    /// Add a row with every cell at its column default.
    pub fn add_row(&self, index: &[IndexValue]) -> Result<RowHandle> {
        self.add_row_with(index, std::iter::empty())
    }

    /// Add a row, overriding some column defaults.
    ///
    /// Fails with [`IndexErrorKind::DuplicateRow`] if the row exists, or
    /// with a value error if an override does not fit its column.
    pub fn add_row_with(
        &self,
        index: &[IndexValue],
        values: impl IntoIterator<Item = (u32, Value)>,
    ) -> Result<RowHandle> {
        let mut table = lock(&self.inner);
        let suffix = index::encode_index(&table.indexes, index)?;
        if table.rows.contains_key(&suffix) {
            return Err(Error::index(IndexErrorKind::DuplicateRow));
        }

        let mut overrides: BTreeMap<u32, Value> = BTreeMap::new();
        for (column, value) in values {
            if !table.columns.contains_key(&column) {
                return Err(Error::index(IndexErrorKind::NoSuchColumn(column)));
            }
            overrides.insert(column, value);
        }

        let mut cells = BTreeMap::new();
        for (&column, spec) in &table.columns {
            let oid = self.base.child(column).concat(suffix.arcs());
            oid.validate_length()?;
            let spec = match overrides.remove(&column) {
                Some(value) => spec.clone().initial(value),
                None => spec.clone(),
            };
            cells.insert(column, BindingHandle::new(oid, spec)?);
        }

        let row = RowHandle {
            suffix: suffix.clone(),
            index: index.to_vec(),
            cells: cells.clone(),
        };
        table.rows.insert(
            suffix,
            Row {
                index: index.to_vec(),
                cells,
            },
        );
        table.sync_row_count();
        tracing::debug!(
            agentx.oid = %self.base,
            agentx.row = %row.suffix,
            "added table row"
        );
        Ok(row)
    }

    /// Remove a row. Handles to its cells stay valid but are no longer
    /// visible to the master.
    pub fn remove_row(&self, index: &[IndexValue]) -> Result<()> {
        let mut table = lock(&self.inner);
        let suffix = index::encode_index(&table.indexes, index)?;
        if table.rows.remove(&suffix).is_none() {
            return Err(Error::index(IndexErrorKind::NoSuchRow));
        }
        table.sync_row_count();
        tracing::debug!(
            agentx.oid = %self.base,
            agentx.row = %suffix,
            "removed table row"
        );
        Ok(())
    }

    /// Remove every row.
    pub fn clear(&self) {
        let mut table = lock(&self.inner);
        table.rows.clear();
        table.sync_row_count();
    }

    /// Look up a row by index values.
    pub fn row(&self, index: &[IndexValue]) -> Option<RowHandle> {
        let table = lock(&self.inner);
        let suffix = index::encode_index(&table.indexes, index).ok()?;
        table.rows.get(&suffix).map(|row| RowHandle {
            suffix,
            index: row.index.clone(),
            cells: row.cells.clone(),
        })
    }

    /// All rows in index order.
    pub fn rows(&self) -> Vec<RowHandle> {
        let table = lock(&self.inner);
        table
            .rows
            .iter()
            .map(|(suffix, row)| RowHandle {
                suffix: suffix.clone(),
                index: row.index.clone(),
                cells: row.cells.clone(),
            })
            .collect()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        lock(&self.inner).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn row_count_binding(&self) -> Option<BindingHandle> {
        lock(&self.inner).row_count.clone()
    }

    /// Exact lookup of an instance OID inside this table's subtree.
    pub(crate) fn get(&self, oid: &Oid) -> GetResult {
        match self.cell(oid) {
            Ok(binding) => GetResult::Value(binding.get()),
            Err(result) => result,
        }
    }

    /// Resolve an instance for a master write.
    pub(crate) fn cell_for_set(&self, oid: &Oid) -> std::result::Result<BindingHandle, SetResult> {
        self.cell(oid).map_err(|miss| match miss {
            GetResult::NoSuchInstance => SetResult::NoCreation,
            _ => SetResult::NotWritable,
        })
    }

    fn cell(&self, oid: &Oid) -> std::result::Result<BindingHandle, GetResult> {
        let rest = oid.strip_prefix(&self.base).ok_or(GetResult::NoSuchObject)?;
        let (column, suffix) = rest.split_first().ok_or(GetResult::NoSuchObject)?;
        let table = lock(&self.inner);
        if !table.columns.contains_key(column) {
            return Err(GetResult::NoSuchObject);
        }
        let values = index::decode_index(&table.indexes, suffix).map_err(|e| {
            tracing::trace!(agentx.oid = %oid, error = %e, "instance suffix does not decode");
            GetResult::NoSuchInstance
        })?;
        let key = index::encode_index(&table.indexes, &values).map_err(|_| GetResult::NoSuchInstance)?;
        table
            .rows
            .get(&key)
            .and_then(|row| row.cells.get(column))
            .cloned()
            .ok_or(GetResult::NoSuchInstance)
    }

    /// First cell whose OID is greater than `oid` (or equal, with
    /// `include`), walking column-major.
    pub(crate) fn next(&self, oid: &Oid, include: bool) -> Option<BindingHandle> {
        let table = lock(&self.inner);
        for &column in table.columns.keys() {
            let prefix = self.base.child(column);
            let row = match oid.strip_prefix(&prefix) {
                Some(rest) => {
                    let rest = Oid::from_slice(rest);
                    let lower = if include {
                        Bound::Included(rest)
                    } else {
                        Bound::Excluded(rest)
                    };
                    table.rows.range((lower, Bound::Unbounded)).next()
                }
                None if *oid < prefix => table.rows.iter().next(),
                None => None,
            };
            if let Some((_, row)) = row {
                return row.cells.get(&column).cloned();
            }
        }
        None
    }

    /// Every cell, column-major.
    pub(crate) fn cells(&self) -> Vec<BindingHandle> {
        let table = lock(&self.inner);
        table
            .columns
            .keys()
            .flat_map(|column| table.rows.values().filter_map(move |row| row.cells.get(column)))
            .cloned()
            .collect()
    }
}

/// Snapshot of one row: its index and handles to its cells.
#[derive(Debug, Clone)]
pub struct RowHandle {
    suffix: Oid,
    index: Vec<IndexValue>,
    cells: BTreeMap<u32, BindingHandle>,
}

impl RowHandle {
    /// Index values of this row.
    pub fn index(&self) -> &[IndexValue] {
        &self.index
    }

    /// Instance suffix appended to each column OID.
    pub fn suffix(&self) -> &Oid {
        &self.suffix
    }

    /// Handle to one cell.
    pub fn cell(&self, column: u32) -> Option<&BindingHandle> {
        self.cells.get(&column)
    }

    /// Current value of one cell.
    pub fn get(&self, column: u32) -> Option<Value> {
        self.cells.get(&column).map(BindingHandle::get)
    }

    /// Application write to one cell.
    pub fn set(&self, column: u32, value: impl Into<Value>) -> Result<()> {
        self.cells
            .get(&column)
            .ok_or_else(|| Error::index(IndexErrorKind::NoSuchColumn(column)))?
            .set(value)
    }
}
