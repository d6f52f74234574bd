//! Byte transports carrying a connection
//!
//! The protocol core only sees byte slices. A [`Transport`] moves them
//! over a socket (or anything else that reads and writes).

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};

use super::config::{ClientConfig, ParsedUrl};

/// Full duplex byte pipe
#[async_trait]
pub trait Transport: Send {
    /// Write all of `data` and flush
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever is available into `buf`; 0 means end of stream
    async fn recv(&mut self, buf: &mut BytesMut) -> Result<usize>;
}

/// Transport over any split-able async stream
pub struct StreamTransport<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    pub fn new(stream: S, buffer_size: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::with_capacity(buffer_size, read_half),
            writer: BufWriter::with_capacity(buffer_size, write_half),
        }
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut BytesMut) -> Result<usize> {
        Ok(self.reader.read_buf(buf).await?)
    }
}

/// Open a TCP connection to the URL's host
pub async fn open_tcp(url: &ParsedUrl, config: &ClientConfig) -> Result<StreamTransport<TcpStream>> {
    let addr = url.socket_addr();

    let socket = timeout(config.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(Error::Io)?;

    if config.tcp_nodelay {
        socket.set_nodelay(true)?;
    }
    tracing::debug!(addr = %addr, "TCP connected");

    Ok(StreamTransport::new(socket, config.read_buffer_size))
}
