//! End to end: a real server and client agent over loopback

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use ladder_engine::{ClientAgent, ClientConfig, ServerConfig, VpnServer};
use ladder_protocol::transport::mock::{Ipv4PacketBuilder, MockTunDevice};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_client_server_round_trip() {
    let server_tun = Arc::new(MockTunDevice::new("tun-server", 1500));
    let config = ServerConfig {
        pool_size: 10,
        dns_servers: vec!["1.1.1.1".parse().unwrap()],
        ..Default::default()
    };
    let server = VpnServer::new(&config, config.dns_servers.clone(), server_tun.clone()).unwrap();
    let table = server.table();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (shutdown, rx) = broadcast::channel(1);
    let handle = tokio::spawn(server.run(listener, rx));

    let mut agent = ClientAgent::new(&ClientConfig {
        server: "127.0.0.1".into(),
        port,
        ..Default::default()
    });
    let registration = agent.init("127.0.0.1", port).await.unwrap();
    assert_eq!(
        registration.assignment.address,
        Ipv4Addr::new(10, 233, 233, 100)
    );
    assert_eq!(registration.raw, "10.233.233.100 1.1.1.1");
    #[cfg(unix)]
    assert!(registration.connection_id.is_some());
    assert_eq!(table.lock().await.occupied(), 1);

    let client_tun = Arc::new(MockTunDevice::new("tun-client", 1500));
    agent.start(client_tun.clone()).unwrap();

    let up = Ipv4PacketBuilder::new()
        .src_v4(10, 233, 233, 100)
        .dst_v4(203, 0, 113, 9)
        .payload(b"ping".to_vec())
        .build();
    client_tun.inject_recv_packet(up.clone());
    assert_eq!(server_tun.next_sent_timeout(WAIT).await, Some(up));

    let down = Ipv4PacketBuilder::new()
        .src_v4(203, 0, 113, 9)
        .dst_v4(10, 233, 233, 100)
        .payload(b"pong".to_vec())
        .build();
    server_tun.inject_recv_packet(down.clone());
    assert_eq!(client_tun.next_sent_timeout(WAIT).await, Some(down));

    let stats = agent.stats();
    assert_eq!(stats.inbound.packets, 1);
    assert_eq!(stats.outbound.packets, 1);

    // Server going away ends the client session
    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();
    tokio::time::timeout(WAIT, agent.closed())
        .await
        .expect("client did not notice the server shutdown");
    agent.stop().await;
    assert!(!agent.is_alive());
}
