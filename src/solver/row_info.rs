//! Per-unknown bookkeeping for the MNA system.

/// Bookkeeping for one row/column of the full MNA system.
///
/// One entry exists per solved node and per voltage-source unknown. Entries are
/// created once per analysis; `is_const`, `value`, `drop_row` and the maps are
/// filled in by matrix simplification.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RowInfo {
    /// The unknown is pinned for this analysis.
    pub is_const: bool,
    /// Pinned value, only meaningful when `is_const`.
    pub value: f64,
    /// Row of the reduced matrix, `None` once the row is dropped.
    pub map_row: Option<usize>,
    /// Column of the reduced matrix, `None` for pinned unknowns.
    pub map_col: Option<usize>,
    /// Matrix entries of this row change between sub-iterations.
    pub left_changes: bool,
    /// Right-hand side of this row changes between sub-iterations.
    pub right_changes: bool,
    /// The row was eliminated from the reduced matrix.
    pub drop_row: bool,
}

impl RowInfo {
    /// True if the row must survive simplification.
    pub fn changes(&self) -> bool {
        self.left_changes || self.right_changes
    }
}
