// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Transport to a server running as a child process.
//!
//! The child's stdin and stdout carry newline-delimited JSON. Its stderr is
//! either inherited (server logs show up in ours) or discarded. The child is
//! killed when the transport closes or is dropped.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;

use super::byte_stream::ByteStreamTransport;
use super::{InboundStream, Transport};
use crate::config::transport::TransportConfig;
use crate::error::TransportError;
use crate::protocol::jsonrpc::Message;

/// What happens to the child's stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StderrMode {
    #[default]
    Inherit,
    Discard,
}

impl From<StderrMode> for Stdio {
    fn from(mode: StderrMode) -> Self {
        match mode {
            StderrMode::Inherit => Stdio::inherit(),
            StderrMode::Discard => Stdio::null(),
        }
    }
}

/// A spawned server process and the byte-stream transport over its stdio.
#[derive(Debug)]
pub struct ChildProcessTransport {
    io: ByteStreamTransport<ChildStdout, ChildStdin>,
    child: AsyncMutex<Option<Child>>,
    pid: Option<u32>,
}

impl ChildProcessTransport {
    /// Spawns `command` with piped stdin and stdout.
    ///
    /// Any stdio configuration already on the command is overridden.
    pub fn spawn(mut command: Command, stderr: StderrMode) -> Result<Self, TransportError> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            command: program.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(TransportError::MissingPipe("stdout"))?;
        let pid = child.id();

        tracing::info!(command = %program, ?pid, "Spawned server process");

        Ok(Self {
            io: ByteStreamTransport::new(stdout, stdin),
            child: AsyncMutex::new(Some(child)),
            pid,
        })
    }

    /// Spawns the command described by a transport configuration.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let program = config.command.as_deref().ok_or_else(|| TransportError::Spawn {
            command: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no command configured"),
        })?;

        let mut command = Command::new(program);
        command.args(&config.args);
        for var in &config.env {
            command.env(&var.key, &var.value);
        }

        let stderr = if config.inherit_stderr {
            StderrMode::Inherit
        } else {
            StderrMode::Discard
        };
        Self::spawn(command, stderr)
    }

    /// OS process id of the child, if it was available at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[async_trait]
impl Transport for ChildProcessTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.io.send(message).await
    }

    fn receive(&self) -> InboundStream {
        self.io.receive()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.io.close().await?;

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        // The child may already have exited after its stdin closed
        match child.try_wait()? {
            Some(status) => tracing::debug!(%status, "Server process exited"),
            None => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, pid = ?self.pid, "Failed to kill server process");
                } else {
                    tracing::debug!(pid = ?self.pid, "Server process killed");
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "child-process"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_child_round_trip() {
        // `cat` echoes every frame back unchanged
        let transport = ChildProcessTransport::spawn(Command::new("cat"), StderrMode::Discard)
            .unwrap();
        let mut inbound = transport.receive();

        let request = Message::request(7, "tools/list", Some(json!({})));
        transport.send(request.clone()).await.unwrap();
        assert_eq!(inbound.next().await.unwrap().unwrap(), request);

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_names_command() {
        let err = ChildProcessTransport::spawn(
            Command::new("/nonexistent/kaula-test-server"),
            StderrMode::Discard,
        )
        .unwrap_err();
        assert!(err.to_string().contains("kaula-test-server"));
    }
}
