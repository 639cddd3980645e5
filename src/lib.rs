pub mod cluster;
pub mod config;
pub mod dashboard;
pub mod election;
pub mod error;
pub mod events;
pub mod identity;
pub mod monitor;
pub mod network;
pub mod node;
pub mod shutdown;
