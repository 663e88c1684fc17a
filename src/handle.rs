//! Per-session server object handle table
//!
//! Every round trip appends the handle list the server returned as a new
//! row. Later requests name an input object by `(row, slot)`; the
//! dispatcher resolves those references into the raw handle list that
//! travels with the request buffer.

use crate::error::{Error, Result};
use crate::status::UNSET_HANDLE;
use serde::Serialize;

/// Address of one handle: `slot` of the list returned by round trip `row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HandleRef {
    pub row: usize,
    pub slot: usize,
}

impl HandleRef {
    #[must_use]
    pub const fn new(row: usize, slot: usize) -> Self {
        Self { row, slot }
    }
}

/// Append-only table of handle rows.
#[derive(Debug, Clone, Default)]
pub struct HandleTable {
    rows: Vec<Vec<u32>>,
}

impl HandleTable {
    #[must_use]
    pub const fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// Append a row and return its index.
    pub fn append(&mut self, row: Vec<u32>) -> usize {
        self.rows.push(row);
        self.rows.len() - 1
    }

    /// Resolve a reference to its raw handle.
    ///
    /// The result may be [`UNSET_HANDLE`] when the server left the slot
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHandle` when the row or slot does not exist.
    pub fn get(&self, at: HandleRef) -> Result<u32> {
        self.rows
            .get(at.row)
            .and_then(|row| row.get(at.slot))
            .copied()
            .ok_or(Error::InvalidHandle {
                row: at.row,
                slot: at.slot,
            })
    }

    /// Resolve a reference, refusing slots the server left unset.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHandle` for missing or unset slots.
    pub fn get_set(&self, at: HandleRef) -> Result<u32> {
        match self.get(at)? {
            UNSET_HANDLE => Err(Error::InvalidHandle {
                row: at.row,
                slot: at.slot,
            }),
            handle => Ok(handle),
        }
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<&[u32]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    #[must_use]
    pub fn last_row(&self) -> Option<&[u32]> {
        self.rows.last().map(Vec::as_slice)
    }

    /// Index the next appended row will get.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
    }
}
