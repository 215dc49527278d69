//! [`Transport`] backed by `tokio-tungstenite`.

use async_trait::async_trait;
use futures::future::{Ready, ready};
use futures::{SinkExt as _, StreamExt as _};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::traits::{BoxSocket, Frame, Transport};
use crate::Result;
use crate::error::Error;

/// Opens plain or TLS WebSocket connections with `tokio-tungstenite`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &Url, protocols: &[String]) -> Result<BoxSocket> {
        let mut request = url.as_str().into_client_request()?;
        if !protocols.is_empty() {
            let offered = HeaderValue::from_str(&protocols.join(", "))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, offered);
        }

        let (ws_stream, _) = connect_async(request).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, "WebSocket handshake complete");

        let socket = ws_stream
            .sink_map_err(Error::from)
            .with(|text: String| ready(Ok::<_, Error>(Message::text(text))))
            .filter_map(into_frame);

        Ok(Box::new(socket))
    }
}

fn into_frame(
    message: std::result::Result<Message, tungstenite::Error>,
) -> Ready<Option<Result<Frame>>> {
    let frame = match message {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Close(_))
        | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
            Some(Ok(Frame::Close))
        }
        // Binary frames are not part of the protocol; control frames are answered by tungstenite
        Ok(_) => None,
        Err(e) => Some(Err(e.into())),
    };
    ready(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(message: std::result::Result<Message, tungstenite::Error>) -> Option<Frame> {
        futures::executor::block_on(into_frame(message)).map(|frame| frame.unwrap())
    }

    #[test]
    fn text_becomes_frame() {
        assert_eq!(
            frame_of(Ok(Message::text("{\"type\":\"pong\"}"))),
            Some(Frame::Text("{\"type\":\"pong\"}".to_owned()))
        );
    }

    #[test]
    fn close_and_closed_errors_become_close() {
        assert_eq!(frame_of(Ok(Message::Close(None))), Some(Frame::Close));
        assert_eq!(
            frame_of(Err(tungstenite::Error::ConnectionClosed)),
            Some(Frame::Close)
        );
        assert_eq!(
            frame_of(Err(tungstenite::Error::AlreadyClosed)),
            Some(Frame::Close)
        );
    }

    #[test]
    fn binary_and_control_frames_are_skipped() {
        assert_eq!(frame_of(Ok(Message::binary(vec![1_u8, 2, 3]))), None);
        assert_eq!(frame_of(Ok(Message::Ping(Vec::new().into()))), None);
    }

    #[test]
    fn other_errors_surface() {
        let reset = std::io::Error::other("connection reset");
        let result = futures::executor::block_on(into_frame(Err(tungstenite::Error::Io(reset))));
        let error = result.unwrap().unwrap_err();
        assert_eq!(error.kind(), crate::error::Kind::WebSocket);
    }
}
