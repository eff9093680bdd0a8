/// Cells, columns and coordinates of the versioned column store.
pub mod cell;
/// Buffer of uncommitted mutations.
pub mod mutation_cache;
