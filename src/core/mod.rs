/// Core Server Framework Module
///
/// Protocol types and the request dispatcher, the tool registration and
/// validation machinery, the two transports, and the server's configuration
/// and logging setup.

pub mod capability;
pub mod config;
pub mod convert;
pub mod error;
pub mod http;
pub mod logging;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod schema;
pub mod server;
pub mod stdio;
