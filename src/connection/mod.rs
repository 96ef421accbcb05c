//! The receive side: one event loop owning every stream of a session.

pub mod socket;
mod stream;

#[cfg(test)]
mod connection_test;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace, warn};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{ConnectionConfig, StreamConfig};
use crate::error::{Error, Result};
use crate::notify::NotifySender;
use crate::session_description::{SessionDescription, TrackDescription};
pub use socket::{make_port_pair, make_rtp_socket_pair, PortPair};
use stream::Stream;

/// Largest datagram read from a socket.
pub(crate) const RECEIVE_MTU: usize = 1500;

pub const TICK_INTERVAL: Duration = Duration::from_millis(100);
pub(crate) const RTCP_INTERVAL_US: i64 = 1_000_000;
pub(crate) const QUALITY_INTERVAL_US: i64 = 1_000_000;

const EVENT_CHANNEL_SIZE: usize = 256;

/// Where a stream's packets come from.
#[derive(Debug)]
pub enum StreamTransport {
    /// RTP and RTCP sockets, typically from [`make_port_pair`] or
    /// [`make_rtp_socket_pair`].
    Sockets {
        rtp: std::net::UdpSocket,
        rtcp: std::net::UdpSocket,
    },
    /// No sockets; packets arrive through [`Connection::inject_packet`].
    Injected,
}

pub(crate) enum Event {
    Datagram {
        stream_id: u64,
        from: Option<SocketAddr>,
        data: Bytes,
    },
    SocketError {
        stream_id: u64,
        error: io::Error,
    },
}

struct AddStream {
    track: usize,
    track_desc: TrackDescription,
    sockets: Option<(UdpSocket, UdpSocket)>,
    notify: NotifySender,
    config: StreamConfig,
}

enum Command {
    AddStream(Box<AddStream>, oneshot::Sender<Result<()>>),
    RemoveStream(usize, oneshot::Sender<()>),
    SeekStream(usize, oneshot::Sender<Result<()>>),
    Inject(usize, Bytes),
    Close(oneshot::Sender<()>),
}

/// Receives RTP and RTCP for a set of tracks, reassembles access units and
/// keeps the RTCP feedback loop running.
///
/// All stream state lives in a single task; the methods here only exchange
/// messages with it. Must be created inside a tokio runtime.
pub struct Connection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            ConnectionLoop::new(config).run(cmd_rx).await;
        });
        Connection {
            cmd_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Starts receiving `track_index` of `session`. Access units and reports
    /// for the track go to `notify`, tagged with the track index.
    pub async fn add_stream(
        &self,
        transport: StreamTransport,
        session: &SessionDescription,
        track_index: usize,
        notify: NotifySender,
        config: StreamConfig,
    ) -> Result<()> {
        let track_desc = session.track(track_index)?.clone();
        let sockets = match transport {
            StreamTransport::Sockets { rtp, rtcp } => {
                rtp.set_nonblocking(true)?;
                rtcp.set_nonblocking(true)?;
                Some((UdpSocket::from_std(rtp)?, UdpSocket::from_std(rtcp)?))
            }
            StreamTransport::Injected => None,
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx.send(Command::AddStream(
            Box::new(AddStream {
                track: track_index,
                track_desc,
                sockets,
                notify,
                config,
            }),
            reply_tx,
        ))?;
        reply_rx.await?
    }

    /// Stops the track and closes its sockets. Removing an unknown track is
    /// not an error.
    pub async fn remove_stream(&self, track: usize) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx.send(Command::RemoveStream(track, reply_tx))?;
        Ok(reply_rx.await?)
    }

    /// Drops the track's timeline; the next packet starts a new one.
    pub async fn seek_stream(&self, track: usize) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx.send(Command::SeekStream(track, reply_tx))?;
        reply_rx.await?
    }

    /// Feeds a datagram to the track as if it had arrived on its socket.
    pub fn inject_packet(&self, track: usize, data: Bytes) -> Result<()> {
        self.cmd_tx.send(Command::Inject(track, data))?;
        Ok(())
    }

    /// Removes every stream and stops the loop.
    pub async fn close(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("connection loop ended abnormally: {}", err);
            }
        }
        Ok(())
    }
}

struct ConnectionLoop {
    config: ConnectionConfig,
    streams: HashMap<usize, Stream>,
    next_stream_id: u64,
    event_tx: Option<mpsc::Sender<Event>>,
    epoch: Instant,
}

impl ConnectionLoop {
    fn new(config: ConnectionConfig) -> Self {
        ConnectionLoop {
            config,
            streams: HashMap::new(),
            next_stream_id: 0,
            event_tx: None,
            epoch: Instant::now(),
        }
    }

    fn now_us(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    fn next_alarm(&self) -> Option<Instant> {
        self.streams
            .values()
            .filter_map(|s| s.alarm_at_us())
            .min()
            .map(|at| self.epoch + Duration::from_micros(at.max(0) as u64))
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        self.event_tx = Some(event_tx);

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let alarm = self.next_alarm();
            let alarm_sleep = async move {
                match alarm {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Close(reply)) => {
                            self.shutdown().await;
                            let _ = reply.send(());
                            return;
                        }
                        Some(cmd) => self.on_command(cmd).await,
                        None => break,
                    }
                }
                Some(event) = event_rx.recv() => {
                    self.on_event(event).await;
                }
                _ = ticker.tick() => {
                    let now = self.now_us();
                    for stream in self.streams.values_mut() {
                        stream.on_tick(now).await;
                    }
                }
                _ = alarm_sleep => {
                    let now = self.now_us();
                    for stream in self.streams.values_mut() {
                        stream.on_alarm(now);
                    }
                }
            }
        }

        self.shutdown().await;
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::AddStream(add, reply) => {
                let _ = reply.send(self.add_stream(*add));
            }
            Command::RemoveStream(track, reply) => {
                if let Some(mut stream) = self.streams.remove(&track) {
                    stream.close().await;
                    debug!("track {}: removed", track);
                }
                let _ = reply.send(());
            }
            Command::SeekStream(track, reply) => {
                let result = match self.streams.get_mut(&track) {
                    Some(stream) => {
                        stream.seek();
                        Ok(())
                    }
                    None => Err(Error::StreamNotFound(track)),
                };
                let _ = reply.send(result);
            }
            Command::Inject(track, data) => {
                let now = self.now_us();
                match self.streams.get_mut(&track) {
                    Some(stream) => stream.on_datagram(data, None, now).await,
                    None => trace!("track {}: injected packet for unknown stream", track),
                }
            }
            Command::Close(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    fn add_stream(&mut self, add: AddStream) -> Result<()> {
        if self.streams.contains_key(&add.track) {
            return Err(Error::StreamExists(add.track));
        }
        let events = self.event_tx.clone().ok_or(Error::ConnectionClosed)?;

        let id = self.next_stream_id;
        self.next_stream_id += 1;
        let mut stream = Stream::new(
            id,
            add.track,
            add.track_desc,
            self.config,
            add.config,
            add.sockets,
            add.notify,
            self.now_us(),
        )?;
        stream.start(events);
        self.streams.insert(add.track, stream);
        Ok(())
    }

    async fn on_event(&mut self, event: Event) {
        let now = self.now_us();
        match event {
            Event::Datagram {
                stream_id,
                from,
                data,
            } => {
                if let Some(stream) = self.stream_by_id(stream_id) {
                    stream.on_datagram(data, from, now).await;
                }
            }
            Event::SocketError { stream_id, error } => {
                if let Some(stream) = self.stream_by_id(stream_id) {
                    stream.on_socket_error(error);
                }
            }
        }
    }

    /// Events from removed streams are stale and find nothing.
    fn stream_by_id(&mut self, id: u64) -> Option<&mut Stream> {
        self.streams.values_mut().find(|s| s.id == id)
    }

    async fn shutdown(&mut self) {
        for (track, mut stream) in self.streams.drain() {
            stream.close().await;
            trace!("track {}: closed", track);
        }
    }
}
