use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::warn;
use url::Url;

/// Write half of the duplex connection. Frames are JSON text; serialization
/// happens in the connection manager so fakes stay trivial.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, text: String) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Read half. `None` means closed; transport errors are folded into the
/// close (an error always precedes one).
#[async_trait]
pub trait FrameStream: Send {
    async fn next(&mut self) -> Option<String>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransportFactory;

struct WsFrameSink {
    inner: SplitSink<WsStream, Message>,
}

struct WsFrameStream {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl TransportFactory for WsTransportFactory {
    async fn connect(&self, url: &Url) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {url}"))?;
        let (sink, stream) = stream.split();
        Ok((
            Box::new(WsFrameSink { inner: sink }),
            Box::new(WsFrameStream { inner: stream }),
        ))
    }
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.inner.send(Message::Close(None)).await;
        Ok(())
    }
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next(&mut self) -> Option<String> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    warn!("websocket receive failed: {err}");
                    return None;
                }
            }
        }
    }
}
