pub mod catalog;
pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod node;
pub mod partition;
pub mod path_safety;
pub mod placement;
pub mod store;
pub mod transport;
pub mod wire;
