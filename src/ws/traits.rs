//! Seams between the client and the socket it drives.

use async_trait::async_trait;
use futures::{Sink, Stream};
use url::Url;

/// An inbound frame as seen by the client.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text frame carrying one envelope or a batch of envelopes
    Text(String),
    /// The peer closed the connection
    Close,
}

/// One open, bidirectional socket.
///
/// The stream half yields inbound frames; a stream that ends is treated like
/// [`Frame::Close`]. The sink half accepts serialized envelopes, and closing it
/// asks the peer to close the connection.
pub trait Socket:
    Stream<Item = crate::Result<Frame>> + Sink<String, Error = crate::error::Error> + Send + Unpin
{
}

impl<T> Socket for T where
    T: Stream<Item = crate::Result<Frame>>
        + Sink<String, Error = crate::error::Error>
        + Send
        + Unpin
{
}

pub type BoxSocket = Box<dyn Socket>;

/// Factory for sockets.
///
/// A new socket is opened for every connection attempt; sockets are never reused.
///
/// # Example
///
/// ```ignore
/// pub struct LoopbackTransport;
///
/// #[async_trait]
/// impl Transport for LoopbackTransport {
///     async fn open(&self, url: &Url, protocols: &[String]) -> crate::Result<BoxSocket> {
///         Ok(Box::new(loopback_socket()))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a socket to `url`, offering `protocols` as sub-protocols.
    ///
    /// Resolving `Ok` is the transport's `open` event; an `Err` is an `error`
    /// event immediately followed by `close`.
    async fn open(&self, url: &Url, protocols: &[String]) -> crate::Result<BoxSocket>;
}
