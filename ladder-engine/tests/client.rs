//! Client agent tests
//!
//! The server side is played by the test over an in-memory duplex stream, so
//! these also run with a paused clock.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ladder_engine::{ClientAgent, ClientConfig, Error};
use ladder_protocol::transport::mock::{Ipv4PacketBuilder, MockTunDevice};
use ladder_protocol::transport::{TunInfo, TunTransport};
use ladder_protocol::{read_message, write_message, Message, MessageType, HEADER_LEN};
use tokio::io::DuplexStream;
use tokio::time::{timeout, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn agent() -> ClientAgent {
    ClientAgent::new(&ClientConfig {
        server: "127.0.0.1".into(),
        ..Default::default()
    })
}

/// Register `agent` against a scripted server answering with `reply`
async fn register_with(
    agent: &mut ClientAgent,
    reply: Message,
) -> (Result<(), Error>, DuplexStream) {
    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let request = read_message(&mut server_end).await.unwrap();
        assert_eq!(request.kind, MessageType::Register);
        write_message(&mut server_end, &reply).await.unwrap();
        server_end
    });

    let result = agent.register(client_end).await.map(|_| ());
    (result, server.await.unwrap())
}

fn approve(text: &str) -> Message {
    Message::new(MessageType::Approve, text.as_bytes().to_vec()).unwrap()
}

async fn registered_agent() -> (ClientAgent, DuplexStream) {
    let mut agent = agent();
    let (result, server_end) =
        register_with(&mut agent, approve("10.233.233.100 8.8.8.8")).await;
    result.unwrap();
    (agent, server_end)
}

#[tokio::test]
async fn test_register_parses_assignment() {
    let mut agent = agent();
    let (result, _server_end) =
        register_with(&mut agent, approve("10.233.233.100 8.8.8.8")).await;
    result.unwrap();

    let registration = agent.registration().unwrap();
    assert_eq!(registration.raw, "10.233.233.100 8.8.8.8");
    assert_eq!(
        registration.assignment.address,
        Ipv4Addr::new(10, 233, 233, 100)
    );
    assert_eq!(
        registration.assignment.dns_servers,
        vec!["8.8.8.8".parse::<IpAddr>().unwrap()]
    );
    assert_eq!(registration.connection_id, None);
    assert!(!agent.is_alive());
}

#[tokio::test]
async fn test_register_rejects_other_reply() {
    let mut agent = agent();
    let (result, _server_end) = register_with(&mut agent, Message::keepalive()).await;
    assert!(matches!(result, Err(Error::Handshake(_))));

    let mut agent = self::agent();
    let (result, _server_end) = register_with(&mut agent, approve("garbage")).await;
    assert!(matches!(result, Err(Error::Handshake(_))));
    assert!(agent.registration().is_none());
}

#[tokio::test]
async fn test_register_server_hangs_up() {
    let mut agent = agent();
    let (client_end, server_end) = tokio::io::duplex(1024);
    drop(server_end);
    let err = agent.register(client_end).await.unwrap_err();
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_start_requires_registration() {
    let mut agent = agent();
    let tun = Arc::new(MockTunDevice::new("tun-client", 1500));
    assert!(matches!(agent.start(tun), Err(Error::NotRegistered)));
}

#[tokio::test]
async fn test_init_connection_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut agent = agent();
    let err = agent.init("127.0.0.1", port).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
}

#[tokio::test]
async fn test_relay_and_stats() {
    let (mut agent, mut server_end) = registered_agent().await;
    let tun = Arc::new(MockTunDevice::new("tun-client", 1500));
    agent.start(tun.clone()).unwrap();
    assert!(agent.is_alive());
    assert!(matches!(agent.start(tun.clone()), Err(Error::AlreadyRunning)));

    let up = Ipv4PacketBuilder::new()
        .src_v4(10, 233, 233, 100)
        .dst_v4(1, 1, 1, 1)
        .payload(vec![7; 100])
        .build();
    tun.inject_recv_packet(up.clone());
    let msg = timeout(WAIT, read_message(&mut server_end)).await.unwrap().unwrap();
    assert_eq!(msg.kind, MessageType::DataUp);
    assert_eq!(msg.payload, up);

    let down = Ipv4PacketBuilder::new()
        .src_v4(1, 1, 1, 1)
        .dst_v4(10, 233, 233, 100)
        .payload(vec![9; 50])
        .build();
    write_message(&mut server_end, &Message::data_down(down.clone()).unwrap())
        .await
        .unwrap();
    assert_eq!(tun.next_sent_timeout(WAIT).await, Some(down.clone()));

    let first = agent.stats();
    assert_eq!(first.outbound.bytes, (up.len() + HEADER_LEN) as u64);
    assert_eq!(first.outbound.packets, 1);
    assert_eq!(first.outbound.flow, first.outbound.bytes);
    assert_eq!(first.inbound.bytes, (down.len() + HEADER_LEN) as u64);
    assert_eq!(first.inbound.packets, 1);
    assert_eq!(first.inbound.flow, first.inbound.bytes);

    // Only the flow window resets
    let second = agent.stats();
    assert_eq!(second.outbound.bytes, first.outbound.bytes);
    assert_eq!(second.inbound.packets, 1);
    assert_eq!(second.inbound.flow, 0);
    assert_eq!(second.outbound.flow, 0);

    agent.stop().await;
    assert!(!agent.is_alive());
    assert!(agent.registration().is_none());
    let cleared = agent.stats();
    assert_eq!(cleared.inbound.bytes, 0);
    assert_eq!(cleared.outbound.packets, 0);

    // Idempotent
    agent.stop().await;
}

#[tokio::test]
async fn test_tun_write_failure_drops_packet_only() {
    let (mut agent, mut server_end) = registered_agent().await;
    let tun = Arc::new(MockTunDevice::new("tun-client", 1500));
    agent.start(tun.clone()).unwrap();

    tun.fail_sends(true);
    let lost = Ipv4PacketBuilder::new().payload(vec![1]).build();
    write_message(&mut server_end, &Message::data_down(lost).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    tun.fail_sends(false);

    let kept = Ipv4PacketBuilder::new().payload(vec![2]).build();
    write_message(&mut server_end, &Message::data_down(kept.clone()).unwrap())
        .await
        .unwrap();
    assert_eq!(tun.next_sent_timeout(WAIT).await, Some(kept));
    assert!(agent.is_alive());

    agent.stop().await;
}

#[tokio::test]
async fn test_server_disconnect_terminates_session() {
    let (mut agent, server_end) = registered_agent().await;
    let tun = Arc::new(MockTunDevice::new("tun-client", 1500));
    agent.start(tun).unwrap();

    drop(server_end);
    timeout(WAIT, agent.closed())
        .await
        .expect("session should end when the server hangs up");
    assert!(!agent.is_alive());
    agent.stop().await;
}

#[tokio::test]
async fn test_tun_read_failure_terminates_session() {
    let (mut agent, _server_end) = registered_agent().await;
    let tun = Arc::new(MockTunDevice::new("tun-client", 1500));
    agent.start(tun.clone()).unwrap();

    tun.set_up(false);
    timeout(WAIT, agent.closed())
        .await
        .expect("session should end when the TUN fails");
    agent.stop().await;
}

#[tokio::test]
async fn test_empty_tun_read_terminates_session() {
    let (mut agent, _server_end) = registered_agent().await;
    let tun = Arc::new(MockTunDevice::new("tun-client", 1500));
    agent.start(tun.clone()).unwrap();

    tun.inject_recv_packet(Vec::new());
    timeout(WAIT, agent.closed())
        .await
        .expect("session should end on an empty TUN read");
    agent.stop().await;
}

/// TUN whose reads and writes never complete
struct StalledTun {
    info: TunInfo,
}

#[async_trait]
impl TunTransport for StalledTun {
    async fn recv(&self, _buf: &mut [u8]) -> ladder_protocol::Result<usize> {
        std::future::pending().await
    }

    async fn send(&self, _buf: &[u8]) -> ladder_protocol::Result<usize> {
        std::future::pending().await
    }

    fn info(&self) -> &TunInfo {
        &self.info
    }
}

#[tokio::test]
async fn test_stop_with_blocked_tun_write() {
    let (mut agent, mut server_end) = registered_agent().await;
    let tun = Arc::new(StalledTun {
        info: TunInfo {
            name: "tun-stalled".into(),
            mtu: 1500,
        },
    });
    agent.start(tun).unwrap();

    let packet = Ipv4PacketBuilder::new().payload(vec![5; 10]).build();
    write_message(&mut server_end, &Message::data_down(packet).unwrap())
        .await
        .unwrap();

    // The receive worker is now parked in the TUN write
    timeout(WAIT, async {
        while agent.stats().inbound.packets == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("packet never reached the receive worker");

    timeout(WAIT, agent.stop())
        .await
        .expect("stop waited on a blocked TUN write");
    assert!(!agent.is_alive());
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_declares_silent_server_dead() {
    let (mut agent, mut server_end) = registered_agent().await;
    let tun = Arc::new(MockTunDevice::new("tun-client", 1500));

    let started = Instant::now();
    agent.start(tun).unwrap();

    timeout(Duration::from_secs(120), agent.closed())
        .await
        .expect("watchdog never fired");
    let elapsed = started.elapsed();
    assert!(elapsed > Duration::from_secs(60), "fired after {:?}", elapsed);
    assert!(elapsed <= Duration::from_secs(62), "fired after {:?}", elapsed);

    // Keepalives at 21 s and 42 s
    for _ in 0..2 {
        let msg = read_message(&mut server_end).await.unwrap();
        assert_eq!(msg.kind, MessageType::Keepalive);
    }

    // Workers have exited, so stop returns without waiting on I/O
    timeout(Duration::from_secs(1), agent.stop())
        .await
        .expect("workers did not exit");
    assert!(!agent.is_alive());
}

#[tokio::test(start_paused = true)]
async fn test_server_keepalives_keep_session_alive() {
    let (mut agent, mut server_end) = registered_agent().await;
    let tun = Arc::new(MockTunDevice::new("tun-client", 1500));
    agent.start(tun).unwrap();

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        write_message(&mut server_end, &Message::keepalive())
            .await
            .unwrap();
    }
    assert!(agent.is_alive());
    agent.stop().await;
}
