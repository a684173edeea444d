//! Download stream wrapper that records how a transfer ended.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tracing::{debug, info, warn};

use docstore_core::traits::storage::ByteStream;

/// Wraps an object stream handed to a client.
///
/// Dropping the wrapper before the inner stream ends (typically a client
/// disconnect) drops the inner reader with it, which releases the file
/// handle or HTTP connection, and logs the transfer as abandoned.
pub struct TrackedStream {
    inner: ByteStream,
    key: String,
    bytes_sent: u64,
    finished: bool,
}

impl TrackedStream {
    /// Wrap `inner`, which streams the object at `key`.
    pub fn new(key: impl Into<String>, inner: ByteStream) -> Self {
        Self {
            inner,
            key: key.into(),
            bytes_sent: 0,
            finished: false,
        }
    }

    /// Bytes yielded so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Box the wrapper back into a plain [`ByteStream`].
    pub fn into_byte_stream(self) -> ByteStream {
        Box::pin(self)
    }
}

impl Stream for TrackedStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes_sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                warn!(key = %this.key, bytes = this.bytes_sent, error = %e, "Download failed mid-stream");
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if !this.finished {
                    this.finished = true;
                    debug!(key = %this.key, bytes = this.bytes_sent, "Download completed");
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        if !self.finished {
            info!(key = %self.key, bytes = self.bytes_sent, "Download abandoned by client");
        }
    }
}
