pub mod admission;
pub mod compliance;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod time;
pub mod wal;
