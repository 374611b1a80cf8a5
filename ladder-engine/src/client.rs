//! Tunnel client agent
//!
//! A [`ClientAgent`] owns one session with the server: [`init`] connects
//! and registers, [`start`] relays packets between a TUN device and the
//! socket, [`stop`] tears the session down. It is an ordinary value, so a
//! process can run several agents side by side.
//!
//! Once started, three tasks share the socket writer:
//!
//! - forward: TUN to server as `DataUp`
//! - receive: server to TUN for `DataDown`, every message refreshes liveness
//! - watchdog: declares the session dead after `dead_timeout` of silence and
//!   sends a keepalive every `keepalive_interval` seconds
//!
//! All three watch the same liveness flag, so terminating the session from
//! any of them (or from [`stop`]) unblocks the others immediately.
//!
//! [`init`]: ClientAgent::init
//! [`start`]: ClientAgent::start
//! [`stop`]: ClientAgent::stop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ladder_protocol::transport::TunTransport;
use ladder_protocol::{
    read_message, write_message, Assignment, Message, MessageType, MAX_MESSAGE_LEN,
};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::stats::{StatsSnapshot, TrafficCounters};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<Mutex<BoxedWriter>>;

const TICK: Duration = Duration::from_secs(1);

/// Result of a successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Parsed virtual address and DNS servers
    pub assignment: Assignment,
    /// Assignment text exactly as sent by the server
    pub raw: String,
    /// Socket descriptor, so a platform VPN service can exempt it from the tunnel
    pub connection_id: Option<i32>,
}

/// Registered stream halves waiting for `start`
struct Pending {
    reader: BoxedReader,
    writer: BoxedWriter,
}

/// State shared between the agent and its workers
struct Session {
    alive: watch::Sender<bool>,
    epoch: Instant,
    /// Milliseconds after `epoch` of the last message from the server
    last_seen_ms: AtomicU64,
    inbound: TrafficCounters,
    outbound: TrafficCounters,
}

impl Session {
    fn new() -> Self {
        let (alive, _) = watch::channel(false);
        Self {
            alive,
            epoch: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            inbound: TrafficCounters::new(),
            outbound: TrafficCounters::new(),
        }
    }

    fn refresh(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_seen_ms.store(now, Ordering::Relaxed);
    }

    fn silence(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }

    fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    /// Mark the session dead; only the first caller logs
    fn terminate(&self, reason: &str) {
        if self.alive.send_replace(false) {
            log::warn!("Session terminated: {}", reason);
        }
    }
}

/// Resolves once the session is no longer alive
async fn stopped(alive: &mut watch::Receiver<bool>) {
    // A dropped sender also ends the session
    let _ = alive.wait_for(|alive| !*alive).await;
}

async fn send(writer: &SharedWriter, message: &Message) -> ladder_protocol::Result<()> {
    let mut writer = writer.lock().await;
    write_message(&mut *writer, message).await
}

/// Client side of one tunnel session
pub struct ClientAgent {
    keepalive_interval: u32,
    dead_timeout: Duration,
    connect_timeout: Duration,
    session: Arc<Session>,
    pending: Option<Pending>,
    registration: Option<Registration>,
    workers: Vec<JoinHandle<()>>,
}

impl ClientAgent {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            keepalive_interval: config.keepalive_interval.max(1),
            dead_timeout: Duration::from_secs(config.dead_timeout as u64),
            connect_timeout: config.connect_timeout(),
            session: Arc::new(Session::new()),
            pending: None,
            registration: None,
            workers: Vec::new(),
        }
    }

    /// Connect to `host:port` and register
    ///
    /// Connecting and the register/approve exchange are each bounded by the
    /// configured connect timeout. No retry is attempted.
    pub async fn init(&mut self, host: &str, port: u16) -> Result<Registration> {
        if self.is_alive() {
            return Err(Error::AlreadyRunning);
        }

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {}:{}", host, port)))?
            .map_err(|e| Error::Connection(format!("{}:{}: {}", host, port, e)))?;
        stream.set_nodelay(true)?;

        #[cfg(unix)]
        let connection_id = {
            use std::os::unix::io::AsRawFd;
            Some(stream.as_raw_fd())
        };
        #[cfg(not(unix))]
        let connection_id = None;

        log::info!(
            "Connected to {} from {}",
            stream.peer_addr()?,
            stream.local_addr()?
        );

        let registration = tokio::time::timeout(self.connect_timeout, self.register(stream))
            .await
            .map_err(|_| Error::Timeout(format!("registering with {}:{}", host, port)))??;

        let registration = Registration {
            connection_id,
            ..registration
        };
        self.registration = Some(registration.clone());
        Ok(registration)
    }

    /// Register over an already connected stream
    ///
    /// Sends `Register` and expects `Approve` as the very next message.
    pub async fn register<S>(&mut self, stream: S) -> Result<Registration>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.is_alive() {
            return Err(Error::AlreadyRunning);
        }

        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        write_message(&mut writer, &Message::register()).await?;
        let reply = read_message(&mut reader).await?;

        if reply.kind != MessageType::Approve {
            return Err(Error::Handshake(format!(
                "expected {} but got {}",
                MessageType::Approve,
                reply.kind
            )));
        }

        let raw = String::from_utf8(reply.payload)
            .map_err(|_| Error::Handshake("assignment is not valid UTF-8".into()))?;
        let assignment: Assignment = raw
            .parse()
            .map_err(|e: ladder_protocol::Error| Error::Handshake(e.to_string()))?;

        log::info!("Registered as {}", assignment);

        self.pending = Some(Pending {
            reader: Box::new(reader),
            writer: Box::new(writer),
        });
        let registration = Registration {
            assignment,
            raw,
            connection_id: None,
        };
        self.registration = Some(registration.clone());
        Ok(registration)
    }

    /// Start relaying between `tun` and the registered session
    pub fn start(&mut self, tun: Arc<dyn TunTransport>) -> Result<()> {
        if self.is_alive() {
            return Err(Error::AlreadyRunning);
        }
        let Pending { reader, writer } = self.pending.take().ok_or(Error::NotRegistered)?;

        // Workers of a previous, terminated session
        for worker in self.workers.drain(..) {
            worker.abort();
        }

        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        self.session.refresh();
        self.session.alive.send_replace(true);

        self.workers.push(tokio::spawn(forward(
            tun.clone(),
            writer.clone(),
            self.session.clone(),
        )));
        self.workers.push(tokio::spawn(receive(
            reader,
            tun,
            self.session.clone(),
        )));
        self.workers.push(tokio::spawn(watchdog(
            writer,
            self.session.clone(),
            self.keepalive_interval,
            self.dead_timeout,
        )));

        log::info!("Session started");
        Ok(())
    }

    /// Stop the session, wait for the workers and clear the counters
    pub async fn stop(&mut self) {
        self.session.alive.send_replace(false);

        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                log::debug!("Worker ended abnormally: {}", e);
            }
        }

        self.session.inbound.reset();
        self.session.outbound.reset();
        self.pending = None;
        if self.registration.take().is_some() {
            log::info!("Session stopped");
        }
    }

    pub fn is_alive(&self) -> bool {
        self.session.is_alive()
    }

    /// Wait until the session is no longer alive
    pub async fn closed(&self) {
        let mut alive = self.session.alive.subscribe();
        stopped(&mut alive).await;
    }

    /// Traffic counters; starts a new flow window for both directions
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            inbound: self.session.inbound.take(),
            outbound: self.session.outbound.take(),
        }
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }
}

impl Drop for ClientAgent {
    fn drop(&mut self) {
        self.session.alive.send_replace(false);
    }
}

/// TUN to server
async fn forward(tun: Arc<dyn TunTransport>, writer: SharedWriter, session: Arc<Session>) {
    let mut alive = session.alive.subscribe();
    let mut buf = vec![0u8; MAX_MESSAGE_LEN];

    loop {
        let n = tokio::select! {
            _ = stopped(&mut alive) => break,
            result = tun.recv(&mut buf) => match result {
                Ok(0) => {
                    session.terminate("TUN device closed");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    session.terminate(&format!("TUN read failed: {}", e));
                    break;
                }
            },
        };

        let message = match Message::data_up(buf[..n].to_vec()) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping outbound packet: {}", e);
                continue;
            }
        };

        session.outbound.record(message.wire_len());
        let result = tokio::select! {
            _ = stopped(&mut alive) => break,
            result = send(&writer, &message) => result,
        };
        if let Err(e) = result {
            session.terminate(&format!("send failed: {}", e));
            break;
        }
    }
}

/// Server to TUN
async fn receive(mut reader: BoxedReader, tun: Arc<dyn TunTransport>, session: Arc<Session>) {
    let mut alive = session.alive.subscribe();

    loop {
        let message = tokio::select! {
            _ = stopped(&mut alive) => break,
            result = read_message(&mut reader) => match result {
                Ok(message) => message,
                Err(e) => {
                    session.terminate(&format!("receive failed: {}", e));
                    break;
                }
            },
        };

        session.refresh();

        match message.kind {
            MessageType::DataDown => {
                session.inbound.record(message.wire_len());
                let result = tokio::select! {
                    _ = stopped(&mut alive) => break,
                    result = tun.send(&message.payload) => result,
                };
                if let Err(e) = result {
                    log::warn!("TUN write failed, dropping packet: {}", e);
                }
            }
            MessageType::Keepalive => log::trace!("Keepalive from server"),
            other => log::warn!("Ignoring unexpected {} from server", other),
        }
    }
}

/// Liveness check and keepalives, once per second
async fn watchdog(
    writer: SharedWriter,
    session: Arc<Session>,
    keepalive_interval: u32,
    dead_timeout: Duration,
) {
    let mut alive = session.alive.subscribe();
    let mut ticker = interval_at(Instant::now() + TICK, TICK);
    let mut ticks: u32 = 0;

    loop {
        tokio::select! {
            _ = stopped(&mut alive) => break,
            _ = ticker.tick() => {}
        }

        let silence = session.silence();
        if silence > dead_timeout {
            session.terminate(&format!("no message from server for {}s", silence.as_secs()));
            break;
        }

        ticks = ticks.wrapping_add(1);
        if ticks % keepalive_interval != 0 {
            continue;
        }

        let keepalive = Message::keepalive();
        let result = tokio::select! {
            _ = stopped(&mut alive) => break,
            result = send(&writer, &keepalive) => result,
        };
        if let Err(e) = result {
            session.terminate(&format!("keepalive failed: {}", e));
            break;
        }
    }
}
