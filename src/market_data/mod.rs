pub mod adapters;
pub mod connection;
pub mod reconciler;
pub mod router;
pub mod types;
