//! Hit testing over the column/row tree.
//!
//! Widths and heights are percentages, so drop coordinates are too: `x`
//! runs across columns and `y` down the rows of one column.

use crate::protocol::DocumentId;

use super::Column;

// ───────────────────────────────────────────────────────────────────
// Source lookup
// ───────────────────────────────────────────────────────────────────

/// Column and row index of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPosition {
    pub column: usize,
    pub row: usize,
}

pub fn locate_by_id(columns: &[Column], id: DocumentId) -> Option<RowPosition> {
    columns.iter().enumerate().find_map(|(column, c)| {
        c.rows
            .iter()
            .position(|r| r.id == id)
            .map(|row| RowPosition { column, row })
    })
}

// ───────────────────────────────────────────────────────────────────
// Drop target
// ───────────────────────────────────────────────────────────────────

/// Where a drop coordinate landed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropTarget {
    pub column: usize,
    /// `None` when the drop fell below the last row (or the column is empty).
    pub row: Option<usize>,
    /// Offset from the top of the target row.
    pub position: f64,
    /// Offset from the left edge of the target column.
    pub x_position: f64,
}

/// Find the band holding `(x, y)`. `None` when `x` is past every column.
pub fn locate_by_position(columns: &[Column], x: f64, y: f64) -> Option<DropTarget> {
    let mut left = 0.0;
    let mut column = None;
    for (index, c) in columns.iter().enumerate() {
        if x < left + c.width {
            column = Some(index);
            break;
        }
        left += c.width;
    }
    let column = column?;

    let mut top = 0.0;
    let mut row = None;
    for (index, r) in columns[column].rows.iter().enumerate() {
        if y < top + r.height {
            row = Some(index);
            break;
        }
        top += r.height;
    }

    Some(DropTarget {
        column,
        row,
        position: y - top,
        x_position: x - left,
    })
}
