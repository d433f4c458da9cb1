//! Block synchronization engine for DashFrog notebooks.
//!
//! A [`sync::NotebookSession`] takes editor block arrays and notebook
//! metadata edits, debounces them, and reconciles them with the notebook
//! API through create/delete/update diffs. The [`blocks`] module holds the
//! property conventions data blocks use to persist their settings and to
//! read the notebook's time window and filters.

pub mod api;
pub mod blocks;
pub mod config;
pub mod filters;
pub mod models;
pub mod sync;
pub mod timewindow;
