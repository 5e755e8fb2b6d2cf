// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Client sessions.
//!
//! A session pairs one transport with a correlation table, the negotiated
//! [`PeerInfo`](crate::protocol::model::PeerInfo) and a dispatcher task.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kaula_mcp_lib::service::{serve_client, ClientOptions};
//! use kaula_mcp_lib::transport::{ChildProcessTransport, StderrMode};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let command = tokio::process::Command::new("counter-server");
//! let transport = ChildProcessTransport::spawn(command, StderrMode::Inherit)?;
//! let peer = serve_client(Arc::new(transport), ClientOptions::default()).await?;
//!
//! for tool in peer.list_tools().await? {
//!     println!("{}", tool.name);
//! }
//! peer.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::KaulaConfig;
use crate::error::ServiceError;
use crate::protocol::model::{ClientCapabilities, Implementation, LATEST_PROTOCOL_VERSION};
use crate::transport::Transport;

mod dispatcher;
mod handshake;
mod peer;
mod sink;
mod state;

pub use dispatcher::QuitReason;
pub use peer::Peer;
pub use sink::{ChannelSink, NotificationSink, TracingSink};
pub use state::SessionState;

/// Settings for one client session.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Sent as `clientInfo`
    pub client_info: Implementation,

    /// Capabilities declared to the server
    pub capabilities: ClientCapabilities,

    /// Protocol version requested in `initialize`
    pub protocol_version: String,

    /// Default timeout for requests; `None` waits indefinitely
    pub request_timeout: Option<Duration>,

    /// Limit on the whole `initialize` exchange
    pub handshake_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_info: Implementation::from_build_env(),
            capabilities: ClientCapabilities::default(),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            request_timeout: Some(Duration::from_secs(30)),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientOptions {
    /// Builds options from the client and session sections of a configuration.
    pub fn from_config(config: &KaulaConfig) -> Self {
        Self {
            client_info: config.client.implementation(),
            capabilities: config.client.capabilities(),
            protocol_version: config.client.protocol_version.clone(),
            request_timeout: config.session.request_timeout(),
            handshake_timeout: config.session.handshake_timeout(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Creates a session over `transport` and runs the handshake.
pub async fn serve_client(
    transport: Arc<dyn Transport>,
    options: ClientOptions,
) -> Result<Peer, ServiceError> {
    let peer = Peer::new(transport, options);
    peer.initialize().await?;
    Ok(peer)
}
