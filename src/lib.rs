//! Filtersync: keeps data filters consistent across the widgets of a dashboard.
//!
//! Widgets describe the filters they want as [`FilterDesign`]s. The [`FilterService`]
//! turns those into live [`Filter`]s, stores them in a [`FilterCollection`] keyed by
//! the data sources each filter touches, mirrors them onto related fields in other
//! datasets, and announces every effective change through a [`Messenger`].
//!
//! # Architecture
//! - Data sources and relation groups (`datasource`)
//! - Filter designs, the serializable description of a filter (`design`)
//! - Live filters carrying a query clause built by a pluggable [`ClauseBuilder`] (`filter`, `clause`)
//! - The keyed filter store (`collection`)
//! - Change notification (`messenger`)
//! - Dashboard configuration loading and saving (`config`)
//! - Coordination and relation propagation (`service`)

mod types;
mod datasource;
mod design;
mod clause;
mod filter;
mod collection;
mod messenger;
mod config;
mod service;

pub use types::*;
pub use datasource::*;
pub use design::*;
pub use clause::*;
pub use filter::*;
pub use collection::*;
pub use messenger::*;
pub use config::*;
pub use service::*;

/// Unified error type for Filtersync operations
#[derive(Debug, thiserror::Error)]
pub enum FilterSyncError {
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Unknown database: {0}")]
    UnknownDatabase(String),
    #[error("Unknown table: {0}")]
    UnknownTable(String),
    #[error("Unknown field: {0}")]
    UnknownField(String),
}
