use std::{
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio_util::codec::Framed;
use tracing::info;

use crate::{
    codec::JsonRpcCodec,
    error::{Error, Result},
    schema::JSONRPCMessage,
};

/// Transport trait for the different ways a client can reach the server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Prepare the transport (bind sockets, claim stdio, ...)
    async fn connect(&mut self) -> Result<()>;

    /// Get a framed stream for reading/writing JSON-RPC messages
    fn framed(self: Box<Self>) -> Result<Box<dyn TransportStream>>;
}

/// A bidirectional stream of JSON-RPC messages
pub trait TransportStream:
    Stream<Item = Result<JSONRPCMessage>> + Sink<JSONRPCMessage, Error = Error> + Send + Unpin
{
}

impl<T> TransportStream for Framed<T, JsonRpcCodec> where
    T: AsyncRead + AsyncWrite + Send + Unpin
{
}

/// Joins a separate reader and writer into one `AsyncRead + AsyncWrite` value
/// so it can be framed by the codec.
#[derive(Debug)]
pub struct GenericDuplex<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R, W> GenericDuplex<R, W>
where
    R: AsyncRead,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }
}

impl<R, W> AsyncRead for GenericDuplex<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for GenericDuplex<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}

/// Standard I/O transport using stdin/stdout
#[derive(Debug, Default)]
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<()> {
        info!("Stdio transport ready");
        Ok(())
    }

    fn framed(self: Box<Self>) -> Result<Box<dyn TransportStream>> {
        let duplex = GenericDuplex::new(tokio::io::stdin(), tokio::io::stdout());
        Ok(Box::new(Framed::new(duplex, JsonRpcCodec::new())))
    }
}

/// Wrapper to turn any already-connected AsyncRead + AsyncWrite stream into a Transport
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: Option<S>,
}

impl<S> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn framed(self: Box<Self>) -> Result<Box<dyn TransportStream>> {
        let stream = self.stream.ok_or(Error::TransportDisconnected)?;
        Ok(Box::new(Framed::new(stream, JsonRpcCodec::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_generic_duplex() {
        let (reader1, writer1) = tokio::io::duplex(64);
        let (reader2, writer2) = tokio::io::duplex(64);

        let mut duplex1 = GenericDuplex::new(reader1, writer2);
        let mut duplex2 = GenericDuplex::new(reader2, writer1);

        duplex1.write_all(b"Hello, world!").await.unwrap();
        duplex1.flush().await.unwrap();

        let mut buf = vec![0u8; 13];
        duplex2.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"Hello, world!");
    }

    #[tokio::test]
    async fn test_stream_transport_frames_messages() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = Box::new(StreamTransport::new(a));
        left.connect().await.unwrap();
        let mut left = left.framed().unwrap();
        let mut right = Box::new(StreamTransport::new(b)).framed().unwrap();

        let msg: JSONRPCMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        left.send(msg).await.unwrap();

        match right.next().await.unwrap().unwrap() {
            JSONRPCMessage::Request(req) => assert_eq!(req.request.method, "ping"),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_transport_without_stream() {
        let transport = StreamTransport { stream: None::<tokio::io::DuplexStream> };
        assert!(matches!(
            Box::new(transport).framed(),
            Err(Error::TransportDisconnected)
        ));
    }
}
