// Apartment Finder - Core Library
// Shared by the seeding CLI, the dashboard and the API server

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod grades;
pub mod importer;
pub mod logging;
pub mod parser;
pub mod recommend;
pub mod trends;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use client::{PublicDataClient, RegionSource, TradeSource};
pub use config::Config;
pub use db::{
    open_database, setup_database, ApartmentTrade, Grade, GradeDefinition, Region, TrendPoint, User,
};
pub use error::{ImportError, RecommendError, RecordError};
pub use importer::{purge_trades, seed_regions, seed_trades, ImportReport};
pub use recommend::{recommend, BudgetRange, Recommendations};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
