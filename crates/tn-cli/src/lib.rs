//! Interactive client for the nanfengpo messaging protocol.
//!
//! Prompt lines are parsed into typed [`Command`]s, compiled into
//! `ClientMsg` envelopes and sent over the `Node.MessageLoop` stream.
//! Control replies are matched back to their requests by transaction id.

use std::time::Duration;

use tn_proto::NodeClient;
use tonic::transport::{Channel, Endpoint};

pub mod command;
pub mod compiler;
pub mod config;
pub mod cookie;
pub mod correlator;
pub mod error;
pub mod session;
pub mod telemetry;
pub mod vcard;

pub use command::Command;
pub use compiler::Compiler;
pub use correlator::{Completion, Correlator};
pub use error::CliError;
pub use session::Session;

/// Connect to a server at `host` (`host:port` or a full URI).
pub async fn connect(host: &str) -> Result<NodeClient<Channel>, CliError> {
    connect_with_endpoint_config(host, |endpoint| endpoint).await
}

/// Connect with a bound on how long establishing the channel may take.
pub async fn connect_with_timeout(
    host: &str,
    timeout: Duration,
) -> Result<NodeClient<Channel>, CliError> {
    connect_with_endpoint_config(host, |endpoint| endpoint.connect_timeout(timeout)).await
}

async fn connect_with_endpoint_config<F>(
    host: &str,
    config_fn: F,
) -> Result<NodeClient<Channel>, CliError>
where
    F: FnOnce(Endpoint) -> Endpoint,
{
    let endpoint = Endpoint::from_shared(config::endpoint_uri(host))
        .map_err(|e| CliError::from_transport_error(e, "Invalid endpoint"))?;

    let channel = config_fn(endpoint)
        .connect()
        .await
        .map_err(|e| CliError::from_transport_error(e, "Failed to connect"))?;

    Ok(NodeClient::new(channel))
}
