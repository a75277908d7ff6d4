//! Live relays
//!
//! Both relays run a worker task that pushes chunks into a bounded channel.
//! [`RelaySession`] is handed out once the first chunk is in hand, so callers
//! can still answer with an error status when nothing ever arrived.

pub mod http;
pub mod retry;
pub mod rtmp;

pub use http::HttpRelay;
pub use retry::RetryPolicy;
pub use rtmp::RtmpRelay;

use crate::error::GrabError;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Capacity of the worker → client chunk channel
pub(crate) const CHANNEL_DEPTH: usize = 16;

/// Content type served for every relayed stream
pub const FLV_CONTENT_TYPE: &str = "video/x-flv";

pub(crate) type ChunkSender = mpsc::Sender<Result<Bytes, GrabError>>;
type ChunkReceiver = mpsc::Receiver<Result<Bytes, GrabError>>;

/// A relay that has produced its first chunk (or ended cleanly without any)
#[derive(Debug)]
pub struct RelaySession {
    first: Option<Bytes>,
    rx: ChunkReceiver,
}

impl RelaySession {
    /// Wait for the worker's first message and turn it into a session or an error
    pub(crate) async fn establish(mut rx: ChunkReceiver) -> Result<Self, GrabError> {
        match rx.recv().await {
            Some(Ok(first)) => Ok(Self {
                first: Some(first),
                rx,
            }),
            Some(Err(e)) => Err(e),
            None => Ok(Self { first: None, rx }),
        }
    }

    /// Whether the source ended before sending anything
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Chunk stream for a response body. Dropping it tells the worker the client left.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, GrabError>> + Send + 'static {
        let first = self.first.map(Ok);
        tokio_stream::iter(first).chain(ReceiverStream::new(self.rx))
    }
}

pub(crate) fn channel() -> (ChunkSender, ChunkReceiver) {
    mpsc::channel(CHANNEL_DEPTH)
}
