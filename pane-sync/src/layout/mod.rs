//! The layout document and the column/row tree projected from it.
//!
//! Document 0 holds one line per document id. The set of rows is derived
//! from that text alone; widths, heights and the column a row sits in are
//! local state, mutated by structural commands and drag gestures.

pub mod codec;
pub mod geometry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::delta::{Delta, Operation};
use crate::protocol::{content_id, DocumentId, Version};

use self::geometry::{locate_by_id, locate_by_position, DropTarget};

/// Drops this close to the top edge of a row (percent) resize instead of move.
pub const RESIZE_MARGIN: f64 = 5.0;

/// Height a row takes in an empty column.
pub const FULL_HEIGHT: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Label stream id (odd).
    pub id: DocumentId,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: u32,
    pub width: f64,
    pub rows: Vec<Row>,
}

/// Rendered capacity of one editor, in character cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeHint {
    pub columns: u32,
    pub rows: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("no column can take row {0}")]
    NoColumnAvailable(DocumentId),
    #[error("row not found: {0}")]
    RowNotFound(DocumentId),
    #[error("drop at ({x}, {y}) does not land on a row or an empty column")]
    DropOutside { x: f64, y: f64 },
    #[error("cannot remove the last column")]
    LastColumn,
    #[error("drop target {0} disappeared while moving the row")]
    TargetLost(DocumentId),
}

/// Which mutation a drag resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    ShrinkColumn,
    EnlargeColumn,
    ShrinkRow,
    EnlargeRow,
    MoveToEmptyColumn,
    MoveRow,
}

#[derive(Debug, Clone)]
pub struct Layout {
    version: Version,
    /// Accumulated content of the layout document.
    data: Delta,
    columns: Vec<Column>,
    sizes: BTreeMap<DocumentId, SizeHint>,
    dirty: bool,
    next_column_id: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}

impl Layout {
    /// Two empty columns, 50/50.
    pub fn new() -> Self {
        let mut layout = Self {
            version: 0,
            data: Delta::new(),
            columns: Vec::new(),
            sizes: BTreeMap::new(),
            dirty: false,
            next_column_id: 1,
        };
        for _ in 0..2 {
            let id = layout.allocate_column_id();
            layout.columns.push(Column {
                id,
                width: 50.0,
                rows: Vec::new(),
            });
        }
        layout
    }

    fn allocate_column_id(&mut self) -> u32 {
        let id = self.next_column_id;
        self.next_column_id += 1;
        id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn data(&self) -> &Delta {
        &self.data
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn sizes(&self) -> &BTreeMap<DocumentId, SizeHint> {
        &self.sizes
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn row_ids(&self) -> Vec<DocumentId> {
        self.columns
            .iter()
            .flat_map(|c| c.rows.iter().map(|r| r.id))
            .collect()
    }

    /// Canonical text of the current tree.
    pub fn encode(&self) -> String {
        codec::encode(&self.columns, &self.sizes)
    }

    /// Apply a remote layout change.
    ///
    /// Rows are created and deleted to match the ids now in the document.
    /// Returns true when the set of rows changed.
    pub fn update(&mut self, version: Version, delta: &Delta) -> bool {
        self.version = self.version.max(version);
        self.data = self.data.compose(delta);

        let current = codec::decode_ids(&self.data.inserted_text());
        let known = self.row_ids();
        let added: Vec<DocumentId> = current.iter().copied().filter(|id| !known.contains(id)).collect();
        let deleted: Vec<DocumentId> = known.iter().copied().filter(|id| !current.contains(id)).collect();

        for &id in &deleted {
            self.delete_row(id);
            self.sizes.remove(&id);
            self.sizes.remove(&content_id(id));
        }
        for &id in &added {
            if let Err(e) = self.create_row(id) {
                log::warn!("Layout version {}: {}", self.version, e);
            }
            self.sizes.insert(id, SizeHint::default());
            self.sizes.insert(content_id(id), SizeHint::default());
        }

        if !added.is_empty() || !deleted.is_empty() {
            log::debug!(
                "Layout version {}: added rows {:?}, deleted rows {:?}",
                self.version,
                added,
                deleted
            );
        }
        !added.is_empty() || !deleted.is_empty()
    }

    /// Place a new row at the end of the column with the most spare height.
    ///
    /// Spare height is half the last row's height, or the full height of an
    /// empty column. The first column wins ties.
    pub fn create_row(&mut self, id: DocumentId) -> Result<(), LayoutError> {
        let mut best: Option<(usize, f64)> = None;
        for (index, column) in self.columns.iter().enumerate() {
            let spare = column.rows.last().map_or(FULL_HEIGHT, |r| r.height / 2.0);
            if spare > best.map_or(0.0, |(_, s)| s) {
                best = Some((index, spare));
            }
        }
        let (index, spare) = best.ok_or(LayoutError::NoColumnAvailable(id))?;

        let column = &mut self.columns[index];
        if let Some(last) = column.rows.last_mut() {
            last.height -= spare;
        }
        column.rows.push(Row { id, height: spare });
        Ok(())
    }

    /// Remove a row, handing its height to the row above (or below, for the
    /// first row). Returns false when no such row exists.
    pub fn delete_row(&mut self, id: DocumentId) -> bool {
        let mut found = false;
        for column in &mut self.columns {
            let Some(index) = column.rows.iter().position(|r| r.id == id) else {
                continue;
            };
            let height = column.rows[index].height;
            let grow = if index == 0 { index + 1 } else { index - 1 };
            if let Some(sibling) = column.rows.get_mut(grow) {
                sibling.height += height;
            }
            column.rows.remove(index);
            found = true;
        }
        found
    }

    /// Append an empty column taking half of the last column's width.
    pub fn add_column(&mut self) -> u32 {
        let id = self.allocate_column_id();
        let width = match self.columns.last_mut() {
            Some(last) => {
                let half = last.width / 2.0;
                last.width -= half;
                half
            }
            None => FULL_HEIGHT,
        };
        self.columns.push(Column {
            id,
            width,
            rows: Vec::new(),
        });
        log::debug!("Added column {} ({}%)", id, width);
        id
    }

    /// Remove the column holding `row_id` and re-place its rows.
    pub fn remove_column(&mut self, row_id: DocumentId) -> Result<(), LayoutError> {
        if self.columns.len() <= 1 {
            return Err(LayoutError::LastColumn);
        }
        let index = locate_by_id(&self.columns, row_id)
            .ok_or(LayoutError::RowNotFound(row_id))?
            .column;

        let removed = self.columns.remove(index);
        if let Some(last) = self.columns.last_mut() {
            last.width += removed.width;
        }
        for row in removed.rows {
            if let Err(e) = self.create_row(row.id) {
                log::warn!("Dropping row while removing column {}: {}", removed.id, e);
            }
        }
        log::debug!("Removed column {}", removed.id);
        Ok(())
    }

    /// Resolve a drag of row `id` dropped at `(x, y)` and apply it.
    pub fn move_row(&mut self, id: DocumentId, x: f64, y: f64) -> Result<Gesture, LayoutError> {
        let source = locate_by_id(&self.columns, id).ok_or(LayoutError::RowNotFound(id))?;
        let target = locate_by_position(&self.columns, x, y).ok_or(LayoutError::DropOutside { x, y })?;
        let near_top = target.position < RESIZE_MARGIN;

        if source.row == 0 && target.row == Some(0) && near_top {
            if source.column == target.column {
                if target.column > 0 {
                    self.columns[target.column - 1].width += target.x_position;
                    self.columns[target.column].width -= target.x_position;
                }
                return Ok(Gesture::ShrinkColumn);
            }
            if source.column == target.column + 1 {
                let diff = self.columns[target.column].width - target.x_position;
                self.columns[target.column].width -= diff;
                self.columns[source.column].width += diff;
                return Ok(Gesture::EnlargeColumn);
            }
        }

        if let Some(row) = target.row {
            if source.column == target.column && source.row == row {
                if row > 0 {
                    let rows = &mut self.columns[target.column].rows;
                    rows[row - 1].height += target.position;
                    rows[row].height -= target.position;
                }
                return Ok(Gesture::ShrinkRow);
            }
            if source.column == target.column && source.row == row + 1 {
                let rows = &mut self.columns[target.column].rows;
                let diff = rows[row].height - target.position;
                rows[row].height -= diff;
                rows[source.row].height += diff;
                return Ok(Gesture::EnlargeRow);
            }
            return self.relocate(id, target, row);
        }

        if self.columns[target.column].rows.is_empty() {
            self.delete_row(id);
            self.columns[target.column].rows.insert(
                0,
                Row {
                    id,
                    height: FULL_HEIGHT,
                },
            );
            return Ok(Gesture::MoveToEmptyColumn);
        }

        Err(LayoutError::DropOutside { x, y })
    }

    /// Detach row `id` and insert it below the target row, splitting the
    /// target's height at the drop offset.
    fn relocate(&mut self, id: DocumentId, target: DropTarget, row: usize) -> Result<Gesture, LayoutError> {
        let target_id = self.columns[target.column].rows[row].id;
        let snapshot = self.columns.clone();

        self.delete_row(id);
        let rows = &mut self.columns[target.column].rows;
        let Some(index) = rows.iter().position(|r| r.id == target_id) else {
            self.columns = snapshot;
            log::warn!("Move of row {} abandoned: target {} is gone", id, target_id);
            return Err(LayoutError::TargetLost(target_id));
        };

        let remaining = rows[index].height - target.position;
        rows[index].height = target.position;
        rows.insert(index + 1, Row { id, height: remaining });
        Ok(Gesture::MoveRow)
    }

    /// Record rendered sizes. Only ids with a seeded hint are tracked; the
    /// layout turns dirty when any of them changed.
    pub fn update_sizes(&mut self, sizes: &BTreeMap<DocumentId, SizeHint>) {
        for (id, hint) in sizes {
            if let Some(current) = self.sizes.get_mut(id) {
                if current != hint {
                    *current = *hint;
                    self.dirty = true;
                }
            }
        }
    }

    /// Rewrite every line whose id has a size hint so it carries the hint.
    ///
    /// Returns the edit (already applied to the local content), or `None`
    /// when no hint changed or the text already matches.
    pub fn generate_size_change(&mut self) -> Option<Delta> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;

        let text = self.data.inserted_text();
        let lines: Vec<&str> = text.split('\n').collect();
        let mut delta = Delta::new();
        for (index, line) in lines.iter().enumerate() {
            let (token, rest) = codec::split_line(line);
            let hint = token.parse::<DocumentId>().ok().and_then(|id| self.sizes.get(&id));
            match hint {
                Some(hint) => {
                    let suffix = codec::size_suffix(hint);
                    if rest == suffix {
                        delta = delta.retain(line.chars().count());
                    } else {
                        delta = delta
                            .retain(token.chars().count())
                            .delete(rest.chars().count())
                            .insert(suffix);
                    }
                }
                None => delta = delta.retain(line.chars().count()),
            }
            if index + 1 < lines.len() {
                delta = delta.retain(1);
            }
        }

        let delta = delta.chop();
        if delta.is_noop() {
            return None;
        }
        self.data = self.data.compose(&delta);
        Some(delta)
    }

    /// Forget everything learned from the authority.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
