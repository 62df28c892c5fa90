//! Tests for the scour-rebuild crate.

mod helpers;
