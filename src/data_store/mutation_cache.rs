use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data_store::cell::{Column, ColumnCoordinate, MutationType};

/// Type and payload of one buffered column mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationValue {
    pub mutation_type: MutationType,
    pub value: Vec<u8>,
}

/// A column mutation as it travels to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMutation {
    pub column: Column,
    pub mutation_type: MutationType,
    pub value: Vec<u8>,
}

/// All buffered mutations of one row, ordered by column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMutation {
    pub table: Vec<u8>,
    pub row: Vec<u8>,
    mutations: BTreeMap<Column, MutationValue>,
}

impl RowMutation {
    pub fn new(table: impl Into<Vec<u8>>, row: impl Into<Vec<u8>>) -> Self {
        Self {
            table: table.into(),
            row: row.into(),
            mutations: BTreeMap::new(),
        }
    }

    /// Records a mutation. A lock-only mutation never replaces one that is
    /// already buffered for the column.
    pub fn add_mutation(
        &mut self,
        column: Column,
        mutation_type: MutationType,
        value: Vec<u8>,
        only_lock: bool,
    ) {
        if only_lock && self.mutations.contains_key(&column) {
            return;
        }
        self.mutations.insert(
            column,
            MutationValue {
                mutation_type,
                value,
            },
        );
    }

    pub fn get(&self, column: &Column) -> Option<&MutationValue> {
        self.mutations.get(column)
    }

    pub fn type_of(&self, column: &Column) -> Option<MutationType> {
        self.mutations.get(column).map(|m| m.mutation_type)
    }

    /// Mutations in column order. Commit requests carry no values, so they
    /// ask for `with_value = false`.
    pub fn mutation_list(&self, with_value: bool) -> Vec<ColumnMutation> {
        self.mutations
            .iter()
            .map(|(column, m)| ColumnMutation {
                column: column.clone(),
                mutation_type: m.mutation_type,
                value: if with_value { m.value.clone() } else { Vec::new() },
            })
            .collect()
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.mutations.keys()
    }

    /// True when some column is written rather than only locked.
    pub fn has_writes(&self) -> bool {
        self.mutations
            .values()
            .any(|m| m.mutation_type != MutationType::LockOnly)
    }

    pub fn coordinates(&self) -> impl Iterator<Item = ColumnCoordinate> + '_ {
        self.mutations
            .keys()
            .map(|c| ColumnCoordinate::new(self.table.clone(), self.row.clone(), c.clone()))
    }

    pub fn size(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Uncommitted mutations of a transaction, grouped by table and row.
///
/// Iteration is ordered by table, then row, then column, so primary selection
/// and lock encoding are deterministic for the same set of writes.
#[derive(Debug, Clone, Default)]
pub struct ColumnMutationCache {
    tables: BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, RowMutation>>,
}

impl ColumnMutationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mutation(
        &mut self,
        table: &[u8],
        row: &[u8],
        column: Column,
        mutation_type: MutationType,
        value: Vec<u8>,
        only_lock: bool,
    ) {
        self.tables
            .entry(table.to_vec())
            .or_default()
            .entry(row.to_vec())
            .or_insert_with(|| RowMutation::new(table, row))
            .add_mutation(column, mutation_type, value, only_lock);
    }

    pub fn get_mutation(&self, coordinate: &ColumnCoordinate) -> Option<&MutationValue> {
        self.get_row(&coordinate.table, &coordinate.row)?
            .get(&coordinate.column)
    }

    fn get_row(&self, table: &[u8], row: &[u8]) -> Option<&RowMutation> {
        self.tables.get(table)?.get(row)
    }

    pub fn rows(&self) -> impl Iterator<Item = &RowMutation> {
        self.tables.values().flat_map(|rows| rows.values())
    }

    pub fn has_writes(&self) -> bool {
        self.rows().any(RowMutation::has_writes)
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(|rows| rows.len()).sum()
    }

    pub fn mutation_count(&self) -> usize {
        self.rows().map(RowMutation::size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.mutation_count() == 0
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
