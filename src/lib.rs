pub mod action;
pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod handshake;
pub mod logger;
pub mod node;
pub mod path;
pub mod processor;
pub mod schema;
pub mod stream;
pub mod transport;

pub use broker::Broker;
pub use error::BrokerError;
