//! Sinks: APRS transports (serial/TCP KISS) that a cycle's frames are
//! written to.

pub mod aprs;

use async_trait::async_trait;

/// A destination for one cycle's worth of already-KISS-framed bytes.
/// Implementations write the whole buffer in a single I/O operation, per
/// the "frames of a whole cycle are written in one I/O operation" rule.
#[async_trait]
pub trait Sink: Send {
    fn name(&self) -> &str;

    async fn send(&mut self, bytes: &[u8]) -> anyhow::Result<()>;

    /// Release the transport on shutdown (e.g. a TNC teardown sequence).
    /// Called once per target after the supervisor loop exits. Default
    /// no-op; sinks with an explicit teardown command override it.
    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
