//! AMQP 0-9-1 implementation of the broker capability
//!
//! - [`connection`] - pure URI construction and property flattening
//! - [`client`] - lapin-backed connector, connection, channel and message source
//!
//! ```rust,no_run
//! use zenamqp::transport::amqp::LapinConnector;
//! use zenamqp::transport::{BrokerConnection, BrokerConnector, BrokerEndpoint};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let connector = LapinConnector::new(Duration::from_secs(10));
//! let endpoint = BrokerEndpoint {
//!     host: "localhost".to_string(),
//!     port: 5672,
//!     virtual_host: "/".to_string(),
//! };
//! let mut connection = connector.connect(&endpoint).await?;
//! connection.authenticate("guest", "guest").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;

pub use client::{LapinChannel, LapinConnection, LapinConnector, LapinMessageSource};
pub use connection::{build_amqp_uri, flatten_properties};
