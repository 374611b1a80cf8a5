//! Tunnel server
//!
//! Accepts client TCP connections, binds each to a slot of the
//! [`SessionTable`], and bridges traffic between the clients and one TUN
//! interface. Tasks spawned by [`VpnServer::run`]:
//!
//! - the accept loop (runs inline)
//! - one reader and one writer task per client
//! - a one-second ticker driving keepalives and idle reaping
//! - a TUN reader routing packets to clients by destination address

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use ladder_protocol::ip::ipv4_destination;
use ladder_protocol::transport::TunTransport;
use ladder_protocol::{read_message, write_message, Assignment, Message, MessageType, MAX_MESSAGE_LEN};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::table::{CloseSignal, Connection, SessionTable, SlotRef};

/// Shared handle to the session table
pub type SharedTable = Arc<Mutex<SessionTable>>;

const TICK: Duration = Duration::from_secs(1);

/// Pause after a failed or empty TUN read before trying again
const TUN_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// The tunnel server engine
pub struct VpnServer {
    table: SharedTable,
    tun: Arc<dyn TunTransport>,
    dns_servers: Arc<Vec<IpAddr>>,
    client_queue: usize,
}

impl VpnServer {
    pub fn new(
        config: &ServerConfig,
        dns_servers: Vec<IpAddr>,
        tun: Arc<dyn TunTransport>,
    ) -> Result<Self> {
        let table = SessionTable::new(config.pool_start, config.pool_size)?
            .with_timers(config.keepalive_interval, config.idle_timeout);

        Ok(Self {
            table: Arc::new(Mutex::new(table)),
            tun,
            dns_servers: Arc::new(dns_servers),
            client_queue: config.client_queue.max(1),
        })
    }

    /// Handle to the session table, for inspection
    pub fn table(&self) -> SharedTable {
        self.table.clone()
    }

    /// Serve clients from `listener` until `shutdown` fires
    ///
    /// On return every session has been released and every client task has
    /// finished.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let local = listener.local_addr()?;
        {
            let table = self.table.lock().await;
            log::info!(
                "Server listening on {} with {} addresses, TUN {}",
                local,
                table.capacity(),
                self.tun.name()
            );
        }

        let ticker = tokio::spawn(run_ticker(self.table.clone()));
        let tun_reader = tokio::spawn(run_tun_reader(self.tun.clone(), self.table.clone()));
        let mut clients = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("Server shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept_client(stream, peer, &mut clients).await,
                    Err(e) => {
                        log::warn!("Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(_) = clients.join_next(), if !clients.is_empty() => {}
            }
        }

        ticker.abort();
        tun_reader.abort();

        let released = self.table.lock().await.release_all();
        log::info!("Released {} sessions", released);

        while clients.join_next().await.is_some() {}
        Ok(())
    }

    async fn accept_client(&self, stream: TcpStream, peer: SocketAddr, clients: &mut JoinSet<()>) {
        let (tx, rx) = mpsc::channel(self.client_queue);
        let (connection, closed) = Connection::new(peer, tx);

        let allocated = {
            let mut table = self.table.lock().await;
            table
                .allocate(connection)
                .map(|slot| (slot, table.address_of(slot)))
        };
        let Some((slot, address)) = allocated else {
            log::warn!("Rejecting {}: {}", peer, Error::PoolExhausted);
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Cannot set TCP_NODELAY for {}: {}", peer, e);
        }
        log::info!("Client {} connected, slot {}", peer, address);

        let (reader, writer) = stream.into_split();
        clients.spawn(run_writer(writer, rx, self.table.clone(), slot, closed.clone()));

        let worker = ClientWorker {
            slot,
            address,
            peer,
            table: self.table.clone(),
            tun: self.tun.clone(),
            dns_servers: self.dns_servers.clone(),
        };
        clients.spawn(worker.run(reader, closed));
    }
}

/// Per-client reader
struct ClientWorker {
    slot: SlotRef,
    address: Ipv4Addr,
    peer: SocketAddr,
    table: SharedTable,
    tun: Arc<dyn TunTransport>,
    dns_servers: Arc<Vec<IpAddr>>,
}

impl ClientWorker {
    async fn run(self, reader: OwnedReadHalf, mut closed: CloseSignal) {
        let mut reader = BufReader::new(reader);

        loop {
            let message = tokio::select! {
                _ = closed.closed() => break,
                result = read_message(&mut reader) => match result {
                    Ok(message) => message,
                    Err(e) if e.is_connection_closed() => {
                        log::info!("Client {} ({}) disconnected", self.peer, self.address);
                        break;
                    }
                    Err(e) => {
                        log::warn!("Client {} ({}): {}", self.peer, self.address, e);
                        break;
                    }
                },
            };

            if !self.table.lock().await.touch(self.slot) {
                break;
            }

            match message.kind {
                MessageType::DataUp => {
                    log::trace!("{} bytes up from {}", message.payload.len(), self.address);
                    if let Err(e) = self.tun.send(&message.payload).await {
                        log::warn!("TUN write error for {}: {}", self.address, e);
                    }
                }
                MessageType::Register => self.approve().await,
                MessageType::Keepalive => {
                    log::trace!("Keepalive from {}", self.address);
                }
                MessageType::Approve | MessageType::DataDown => {
                    log::warn!(
                        "Ignoring {} from client {} ({})",
                        message.kind,
                        self.peer,
                        self.address
                    );
                }
            }
        }

        if self.table.lock().await.release(self.slot) {
            log::info!("Released {} from {}", self.address, self.peer);
        }
    }

    async fn approve(&self) {
        let assignment = Assignment::new(self.address, self.dns_servers.to_vec());
        let reply = match Message::approve(&assignment) {
            Ok(reply) => reply,
            Err(e) => {
                log::error!("Cannot build approval for {}: {}", self.peer, e);
                return;
            }
        };

        match self.table.lock().await.send(self.slot, reply) {
            Ok(()) => log::info!("Approved {} as {}", self.peer, assignment),
            Err(e) => log::warn!("Approval to {} not queued: {}", self.peer, e),
        }
    }
}

/// Drain a client's outbound queue onto its socket
async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Message>,
    table: SharedTable,
    slot: SlotRef,
    mut closed: CloseSignal,
) {
    loop {
        let message = tokio::select! {
            _ = closed.closed() => break,
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let result = tokio::select! {
            _ = closed.closed() => break,
            result = write_message(&mut writer, &message) => result,
        };
        if let Err(e) = result {
            log::debug!("Write to {:?} failed: {}", writer.peer_addr().ok(), e);
            table.lock().await.release(slot);
            break;
        }
    }

    let _ = writer.shutdown().await;
}

async fn run_ticker(table: SharedTable) {
    let mut ticker = interval_at(Instant::now() + TICK, TICK);
    loop {
        ticker.tick().await;
        let report = table.lock().await.tick();
        for (address, peer) in &report.reaped {
            log::info!("Session {} ({}) timed out", address, peer);
        }
        if report.keepalives > 0 {
            log::trace!("Queued {} keepalives", report.keepalives);
        }
    }
}

async fn run_tun_reader(tun: Arc<dyn TunTransport>, table: SharedTable) {
    let mut buf = vec![0u8; MAX_MESSAGE_LEN];
    loop {
        match tun.recv(&mut buf).await {
            Ok(0) => {
                log::debug!("Empty TUN read");
                tokio::time::sleep(TUN_ERROR_BACKOFF).await;
            }
            Ok(n) => route_packet(&table, &buf[..n]).await,
            Err(e) => {
                log::warn!("TUN read error: {}", e);
                tokio::time::sleep(TUN_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Queue a packet read from the TUN to the client owning its destination
async fn route_packet(table: &SharedTable, packet: &[u8]) {
    let Some(destination) = ipv4_destination(packet) else {
        log::trace!("Dropping non-IPv4 packet ({} bytes)", packet.len());
        return;
    };

    let message = match Message::data_down(packet.to_vec()) {
        Ok(message) => message,
        Err(e) => {
            log::debug!("Dropping packet for {}: {}", destination, e);
            return;
        }
    };

    let table = table.lock().await;
    let Some(slot) = table.find_by_destination(destination) else {
        log::trace!("No session for {}", destination);
        return;
    };
    if let Err(e) = table.send(slot, message) {
        log::warn!("Dropping packet for {}: {}", destination, e);
    }
}
