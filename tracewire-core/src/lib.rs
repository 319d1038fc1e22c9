pub mod config;
pub mod context;
pub mod error;
pub mod exporter;
pub mod http_client;
pub mod init;
pub mod instrumentation;
pub mod model;
pub mod provider;
pub mod router;
pub mod token;
pub mod trace;
#[cfg(test)]
pub mod test_util;
