//! Ordered in-memory index with an embedded probe cursor.
//!
//! [`OrderedIndex`] is the map type every level of the rebuild ship queue is
//! built from. Besides plain `lookup` / `insert_or_update` / `delete` it
//! exposes a [`Cursor`] that can be positioned with a [`Probe`] and stepped
//! forwards or backwards. Deleting through a cursor leaves it unset, so
//! callers that consume entries one by one re-probe after each delete.

mod error;
mod index;

pub use error::IndexError;
pub use index::{Cursor, OrderedIndex, Probe};
