//! Newline-delimited JSON over any byte stream.
//!
//! One envelope per line. A background task reads lines, parses them and
//! publishes the envelopes on a [`Subject`]. Writes go through an async
//! mutex so concurrent senders never interleave partial lines.

use async_trait::async_trait;
use polyglot_protocol::{
    KernelCommandAndEventReceiver, KernelCommandAndEventSender, KernelCommandOrEventEnvelope,
    Subject, TransportError,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A transport that speaks one JSON envelope per line.
pub struct JsonLinesTransport {
    sender: Arc<JsonLinesSender>,
    inbound: Subject<KernelCommandOrEventEnvelope>,
    eof: watch::Receiver<bool>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for JsonLinesTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesTransport")
            .field("remote_host_uri", &self.sender.remote_host_uri)
            .field("eof", &*self.eof.borrow())
            .finish()
    }
}

impl JsonLinesTransport {
    /// Start reading envelopes from `reader` and writing them to `writer`.
    /// Must be called from within a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let inbound = Subject::new();
        let (eof_tx, eof) = watch::channel(false);
        let reader = tokio::spawn(read_lines(reader, inbound.clone(), eof_tx));
        Self {
            sender: Arc::new(JsonLinesSender {
                writer: Mutex::new(Box::new(writer)),
                remote_host_uri: None,
            }),
            inbound,
            eof,
            reader,
        }
    }

    /// Record the URI of the host on the other end of the stream.
    pub fn with_remote_host_uri(mut self, uri: impl Into<String>) -> Self {
        if let Some(sender) = Arc::get_mut(&mut self.sender) {
            sender.remote_host_uri = Some(uri.into());
        }
        self
    }

    /// Outbound half.
    pub fn sender(&self) -> Arc<dyn KernelCommandAndEventSender> {
        Arc::clone(&self.sender) as Arc<dyn KernelCommandAndEventSender>
    }

    /// Inbound half.
    pub fn receiver(&self) -> Arc<dyn KernelCommandAndEventReceiver> {
        Arc::new(self.inbound.clone())
    }

    /// Every envelope read from the stream.
    pub fn inbound(&self) -> &Subject<KernelCommandOrEventEnvelope> {
        &self.inbound
    }

    /// Resolves once the read side reaches end of stream or fails.
    pub async fn closed(&self) {
        let mut eof = self.eof.clone();
        let _ = eof.wait_for(|done| *done).await;
    }
}

impl Drop for JsonLinesTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Writing half of a [`JsonLinesTransport`].
pub struct JsonLinesSender {
    writer: Mutex<BoxedWriter>,
    remote_host_uri: Option<String>,
}

impl std::fmt::Debug for JsonLinesSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSender")
            .field("remote_host_uri", &self.remote_host_uri)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KernelCommandAndEventSender for JsonLinesSender {
    async fn send(&self, envelope: KernelCommandOrEventEnvelope) -> Result<(), TransportError> {
        let mut line = envelope.to_json()?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await.map_err(closed_or_io)?;
        writer.flush().await.map_err(closed_or_io)?;
        Ok(())
    }

    fn remote_host_uri(&self) -> Option<&str> {
        self.remote_host_uri.as_deref()
    }
}

fn closed_or_io(e: std::io::Error) -> TransportError {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
            TransportError::Closed
        }
        _ => TransportError::Io(e),
    }
}

async fn read_lines<R>(
    reader: R,
    inbound: Subject<KernelCommandOrEventEnvelope>,
    eof: watch::Sender<bool>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match KernelCommandOrEventEnvelope::from_json(line) {
                    Ok(envelope) => inbound.publish(&envelope),
                    Err(e) => tracing::warn!(error = %e, "skipping malformed envelope"),
                }
            }
            Ok(None) => {
                tracing::debug!("envelope stream ended");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "envelope stream read failed");
                break;
            }
        }
    }
    eof.send_replace(true);
}
