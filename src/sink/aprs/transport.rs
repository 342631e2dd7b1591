//! Serial and TCP (KISS-over-TCP) transports for APRS frames.

use std::io::ErrorKind;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{info, warn};

use crate::config::SerialConfig;
use crate::sink::Sink;

/// A serial KISS TNC. Opens the port at construction, optionally sending
/// `cmd_up` once; every `send()` call wraps the payload between `cmd_pre`
/// and `cmd_post`, writing `cmd_post` even if the payload write failed, so
/// the TNC is never left in a half-configured state.
pub struct SerialSink {
    name: String,
    port: SerialStream,
    cmd_pre: Option<Vec<u8>>,
    cmd_post: Option<Vec<u8>>,
    cmd_down: Option<Vec<u8>>,
}

impl SerialSink {
    pub async fn open(name: impl Into<String>, config: &SerialConfig) -> Result<Self> {
        let device = config.device.to_string_lossy().into_owned();
        let mut port = tokio_serial::new(&device, config.baud)
            .open_native_async()
            .with_context(|| format!("could not open serial device {device}"))?;

        if let Some(cmd_up) = &config.cmd_up {
            port.write_all(cmd_up)
                .await
                .context("could not write cmd_up to serial device")?;
        }

        Ok(SerialSink {
            name: name.into(),
            port,
            cmd_pre: config.cmd_pre.clone(),
            cmd_post: config.cmd_post.clone(),
            cmd_down: config.cmd_down.clone(),
        })
    }
}

#[async_trait]
impl Sink for SerialSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(pre) = &self.cmd_pre {
            let pre = pre.clone();
            self.port.write_all(&pre).await.context("could not write cmd_pre")?;
        }

        let write_result = self.port.write_all(bytes).await;

        if let Some(post) = &self.cmd_post {
            let post = post.clone();
            if let Err(err) = self.port.write_all(&post).await {
                warn!(sink = %self.name, error = %err, "could not write cmd_post after send");
            }
        }

        write_result.context("serial write failed")
    }

    /// Write `cmd_down` once, guaranteeing release on every exit path
    /// (async `Drop` isn't available, so the supervisor calls this
    /// explicitly after its run loop exits).
    async fn close(&mut self) -> Result<()> {
        if let Some(cmd_down) = self.cmd_down.take() {
            self.port
                .write_all(&cmd_down)
                .await
                .context("could not write cmd_down to serial device")?;
        }
        Ok(())
    }
}

/// A KISS-over-TCP sink. Connects lazily on first use; a connection
/// refused is a transient, logged, non-fatal error for the current cycle,
/// and the next cycle will try to reconnect.
pub struct TcpSink {
    name: String,
    host: String,
    port: u16,
    stream: Option<BufWriter<TcpStream>>,
}

impl TcpSink {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        TcpSink {
            name: name.into(),
            host: host.into(),
            port,
            stream: None,
        }
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(stream) => {
                info!(sink = %self.name, host = %self.host, port = self.port, "connected");
                self.stream = Some(BufWriter::new(stream));
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::ConnectionRefused => {
                anyhow::bail!("connection refused by {}:{}", self.host, self.port)
            }
            Err(err) => Err(err).context("could not connect to remote KISS TCP endpoint"),
        }
    }
}

#[async_trait]
impl Sink for TcpSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_connected().await?;
        let stream = self.stream.as_mut().expect("just connected");
        match stream.write_all(bytes).await.and(stream.flush().await) {
            Ok(()) => Ok(()),
            Err(err) => {
                // Drop the stream so the next cycle reconnects.
                self.stream = None;
                Err(err).context("TCP write failed")
            }
        }
    }
}
