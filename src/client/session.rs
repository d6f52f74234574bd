//! Async client driving a [`Connection`] over a [`Transport`]
//!
//! One task owns the connection. It writes whatever the connection wants
//! to send, feeds it received bytes, fires playout timers on time and
//! runs requests coming from [`ClientHandle`]s. Events go out on an mpsc
//! channel, ending with exactly one `Closed`.

use std::future::pending;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::amf::AmfValue;
use crate::clock::{Clock, ConnectionClock};
use crate::error::{Error, Result};
use crate::media::MediaKind;
use crate::rpc::{Reply, Responder};

use super::config::ClientConfig;
use super::connection::{Connection, ConnectionEvent};
use super::stream::StreamHandle;
use super::transport::{open_tcp, Transport};

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

/// Receives connection events
pub type EventReceiver = mpsc::Receiver<ConnectionEvent>;

/// Entry point for async clients
pub struct RtmpClient;

impl RtmpClient {
    /// Connect over TCP
    ///
    /// Returns once the socket is open; the handshake and connect call run
    /// in the background and report through the event receiver.
    pub async fn connect(config: ClientConfig) -> Result<(ClientHandle, EventReceiver)> {
        let url = config.validate()?;
        tracing::info!(host = %url.host, port = url.port, app = %url.app, "Connecting");
        let transport = open_tcp(&url, &config).await?;
        Self::with_transport(config, transport)
    }

    /// Run a connection over an already open transport
    ///
    /// Must be called within a tokio runtime.
    pub fn with_transport<T>(config: ClientConfig, transport: T) -> Result<(ClientHandle, EventReceiver)>
    where
        T: Transport + 'static,
    {
        let clock = ConnectionClock::new();
        let read_timeout = config.read_timeout;
        let connect_timeout = config.connect_timeout;
        let read_buffer_size = config.read_buffer_size;
        let conn = Connection::connect(config, Arc::new(clock))?;

        let (job_tx, job_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(1024);

        let driver = Driver {
            conn,
            transport,
            clock,
            jobs: job_rx,
            events: event_tx,
            read_buf: BytesMut::with_capacity(read_buffer_size),
            read_timeout,
            connect_deadline: Instant::now() + connect_timeout,
        };
        tokio::spawn(driver.run());

        Ok((ClientHandle { jobs: job_tx }, event_rx))
    }
}

struct Driver<T> {
    conn: Connection,
    transport: T,
    clock: ConnectionClock,
    jobs: mpsc::Receiver<Job>,
    events: mpsc::Sender<ConnectionEvent>,
    read_buf: BytesMut,
    read_timeout: std::time::Duration,
    connect_deadline: Instant,
}

impl<T: Transport> Driver<T> {
    async fn run(self) {
        let Driver {
            mut conn,
            mut transport,
            clock,
            mut jobs,
            events,
            mut read_buf,
            read_timeout,
            connect_deadline,
        } = self;
        let mut jobs_open = true;
        let mut idle_deadline = Instant::now() + read_timeout;

        loop {
            while let Some(bytes) = conn.poll_transmit() {
                if let Err(e) = transport.send(&bytes).await {
                    conn.handle_transport_error(e);
                    break;
                }
            }

            while let Some(event) = conn.poll_event() {
                let closed = matches!(event, ConnectionEvent::Closed { .. });
                // A dropped receiver only means nobody is listening
                let _ = events.send(event).await;
                if closed {
                    tracing::debug!("Connection task finished");
                    return;
                }
            }

            let timer = conn.next_timer_deadline().map(|d| Instant::from_std(clock.instant_at(d)));
            let connecting = !conn.is_connected();

            tokio::select! {
                res = transport.recv(&mut read_buf) => match res {
                    Err(e) => conn.handle_transport_error(e),
                    Ok(0) => conn.handle_eof(),
                    Ok(_) => {
                        idle_deadline = Instant::now() + read_timeout;
                        let data = read_buf.split();
                        conn.handle_input(&data);
                    }
                },
                _ = sleep_until(idle_deadline) => {
                    tracing::warn!(timeout = ?read_timeout, "Nothing received, giving up");
                    conn.handle_transport_error(Error::Timeout);
                }
                _ = async {
                    match timer {
                        Some(at) => sleep_until(at).await,
                        None => pending().await,
                    }
                } => conn.on_timer(clock.now()),
                _ = sleep_until(connect_deadline), if connecting => {
                    tracing::warn!("Connect timed out");
                    conn.handle_transport_error(Error::Timeout);
                }
                job = jobs.recv(), if jobs_open => match job {
                    Some(job) => job(&mut conn),
                    None => {
                        // Every handle is gone; nobody can drive the connection further
                        jobs_open = false;
                        conn.close();
                    }
                },
            }
        }
    }
}

/// Cloneable handle for issuing requests to a running connection
///
/// Requests fail with [`Error::ConnectionClosed`] once the connection
/// task has finished.
#[derive(Clone)]
pub struct ClientHandle {
    jobs: mpsc::Sender<Job>,
}

impl ClientHandle {
    /// Run `f` against the connection inside its task
    async fn with<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            let _ = tx.send(f(conn));
        });
        self.jobs.send(job).await.map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Call a remote method and wait for its reply
    pub async fn call(&self, name: &str, args: Vec<AmfValue>) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        let name = name.to_string();
        self.with(move |conn| {
            let responder: Box<dyn Responder> = Box::new(move |reply: Reply| {
                let _ = tx.send(reply);
            });
            conn.call(&name, args, Some(responder))
        })
        .await?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Call a remote method without asking for a reply
    pub async fn notify(&self, name: &str, args: Vec<AmfValue>) -> Result<()> {
        let name = name.to_string();
        self.with(move |conn| conn.call(&name, args, None).map(|_| ())).await
    }

    /// Start creating a stream; it is usable once `StreamCreated` arrives
    pub async fn create_stream(&self) -> Result<StreamHandle> {
        self.with(|conn| conn.create_stream()).await
    }

    pub async fn play(&self, stream: StreamHandle, name: &str, start: f64) -> Result<()> {
        let name = name.to_string();
        self.with(move |conn| conn.play(stream, &name, start)).await
    }

    pub async fn publish(&self, stream: StreamHandle, name: &str, kind: &str) -> Result<()> {
        let (name, kind) = (name.to_string(), kind.to_string());
        self.with(move |conn| conn.publish(stream, &name, &kind)).await
    }

    pub async fn pause(&self, stream: StreamHandle, paused: bool) -> Result<()> {
        self.with(move |conn| conn.pause(stream, paused)).await
    }

    pub async fn seek(&self, stream: StreamHandle, position_ms: f64) -> Result<()> {
        self.with(move |conn| conn.seek(stream, position_ms)).await
    }

    pub async fn receive(&self, stream: StreamHandle, kind: MediaKind, enabled: bool) -> Result<()> {
        self.with(move |conn| match kind {
            MediaKind::Audio => conn.receive_audio(stream, enabled),
            MediaKind::Video => conn.receive_video(stream, enabled),
        })
        .await
    }

    pub async fn send_media(&self, stream: StreamHandle, kind: MediaKind, timestamp: u32, payload: bytes::Bytes) -> Result<()> {
        self.with(move |conn| conn.send_media(stream, kind, timestamp, payload)).await
    }

    pub async fn send_data(&self, stream: StreamHandle, name: &str, values: Vec<AmfValue>) -> Result<()> {
        let name = name.to_string();
        self.with(move |conn| conn.send_data(stream, &name, values)).await
    }

    pub async fn set_chunk_size(&self, size: u32) -> Result<()> {
        self.with(move |conn| conn.set_chunk_size(size)).await
    }

    pub async fn set_buffer_length(&self, stream: StreamHandle, buffer_ms: u32) -> Result<()> {
        self.with(move |conn| conn.set_buffer_length(stream, buffer_ms)).await
    }

    pub async fn close_stream(&self, stream: StreamHandle) -> Result<()> {
        self.with(move |conn| conn.close_stream(stream)).await
    }

    /// Close the connection after flushing what is already queued
    pub async fn close(&self) -> Result<()> {
        self.with(|conn| {
            conn.close();
            Ok(())
        })
        .await
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("closed", &self.jobs.is_closed())
            .finish()
    }
}

