//! Database layer: connection pooling and embedded migrations.

pub mod connection;

pub use connection::connect;
