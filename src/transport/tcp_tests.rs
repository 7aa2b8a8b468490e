use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};

use crate::broker::{Broker, Peer, PeerPropagator};
use crate::client::LineClient;
use crate::config::Settings;
use crate::persistence::{Backlog, SledBacklog};
use crate::transport::tcp::BrokerServer;
use crate::utils::{BrokerError, Result};

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE: Duration = Duration::from_millis(1000);

struct Node {
    addr: SocketAddr,
    broker: Arc<Broker>,
    server: JoinHandle<Result<()>>,
    _dir: TempDir,
}

impl Drop for Node {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl Node {
    async fn client(&self) -> LineClient {
        LineClient::connect(self.addr).await.expect("connect")
    }

    async fn subscriber(&self, topic: &str) -> LineClient {
        let before = self.broker.registry().subscriber_count(topic);
        let mut client = self.client().await;
        client.subscribe(topic).await.unwrap();
        wait_until(|| self.broker.registry().subscriber_count(topic) > before).await;
        client
    }
}

/// Start `count` brokers on ephemeral ports. `links` are directed peer edges
/// `(from, to)` by index.
async fn start_cluster(count: usize, links: &[(usize, usize)]) -> Vec<Node> {
    start_cluster_with(count, links, BrokerServer::DEFAULT_MAX_LINE_LENGTH).await
}

async fn start_cluster_with(
    count: usize,
    links: &[(usize, usize)],
    max_line_length: usize,
) -> Vec<Node> {
    let mut listeners = Vec::new();
    for _ in 0..count {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let addrs: Vec<SocketAddr> = listeners.iter().map(|l| l.local_addr().unwrap()).collect();

    let mut nodes = Vec::new();
    for (index, listener) in listeners.into_iter().enumerate() {
        let peers = links
            .iter()
            .filter(|(from, _)| *from == index)
            .map(|(_, to)| Peer::new("127.0.0.1", addrs[*to].port()))
            .collect();
        let dir = TempDir::new().unwrap();
        let backlog = SledBacklog::open(dir.path().join("backlog"), false).unwrap();
        let broker = Arc::new(Broker::new(
            Arc::new(backlog),
            PeerPropagator::new(peers, 5, Duration::from_millis(50)),
        ));
        let server = BrokerServer::from_listener(listener, broker.clone())
            .with_max_line_length(max_line_length);

        nodes.push(Node {
            addr: addrs[index],
            broker,
            server: tokio::spawn(server.run()),
            _dir: dir,
        });
    }
    nodes
}

fn fully_connected(count: usize) -> Vec<(usize, usize)> {
    let mut links = Vec::new();
    for from in 0..count {
        for to in 0..count {
            if from != to {
                links.push((from, to));
            }
        }
    }
    links
}

async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + RECEIVE_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn receive(client: &mut LineClient) -> String {
    client
        .next_payload_within(RECEIVE_TIMEOUT)
        .await
        .unwrap()
        .expect("no payload received")
}

#[tokio::test]
async fn test_publish_subscribe_single_broker() {
    let nodes = start_cluster(1, &[]).await;
    let mut subscriber = nodes[0].subscriber("test").await;

    let mut publisher = nodes[0].client().await;
    publisher.reset("test").await.unwrap();
    publisher.publish("test", "hello world").await.unwrap();

    assert_eq!(receive(&mut subscriber).await, "hello world");
}

#[tokio::test]
async fn test_publish_order_is_preserved() {
    let nodes = start_cluster(1, &[]).await;
    let mut subscriber = nodes[0].subscriber("test").await;
    let mut publisher = nodes[0].client().await;

    let sent: Vec<String> = (0..10).map(|i| format!("Hello world {i}")).collect();
    for payload in &sent {
        publisher.publish("test", payload).await.unwrap();
    }

    let mut received = Vec::new();
    while received.len() < sent.len() {
        received.push(receive(&mut subscriber).await);
    }
    assert_eq!(received, sent);
}

#[tokio::test]
async fn test_duplicate_publish_is_delivered_once() {
    let nodes = start_cluster(2, &fully_connected(2)).await;
    let mut subscriber = nodes[1].subscriber("dupe").await;

    let mut publisher = nodes[0].client().await;
    publisher.publish("dupe", "only once").await.unwrap();
    publisher.publish("dupe", "only once").await.unwrap();

    assert_eq!(receive(&mut subscriber).await, "only once");
    assert_eq!(subscriber.next_payload_within(SILENCE).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_message_is_forwarded_across_brokers() {
    let nodes = start_cluster(2, &fully_connected(2)).await;
    let mut subscriber = nodes[1].subscriber("cluster").await;

    let mut publisher = nodes[0].client().await;
    publisher
        .publish("cluster", "message to cluster")
        .await
        .unwrap();

    assert_eq!(receive(&mut subscriber).await, "message to cluster");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_message_flows_through_all_brokers() {
    let nodes = start_cluster(3, &fully_connected(3)).await;
    let mut subscriber = nodes[2].subscriber("global").await;

    let mut publisher = nodes[0].client().await;
    publisher.publish("global", "hello cluster").await.unwrap();

    assert_eq!(receive(&mut subscriber).await, "hello cluster");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_message_hops_along_a_chain() {
    // A <-> B <-> C, no direct link between A and C
    let nodes = start_cluster(3, &[(0, 1), (1, 0), (1, 2), (2, 1)]).await;
    let mut subscriber = nodes[2].subscriber("global").await;

    let mut publisher = nodes[0].client().await;
    publisher.publish("GLOBAL", "hello cluster").await.unwrap();

    assert_eq!(receive(&mut subscriber).await, "hello cluster");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flooding_stops_after_every_broker_processed_once() {
    let nodes = start_cluster(3, &fully_connected(3)).await;
    let mut subscriber = nodes[2].subscriber("global").await;

    let mut publisher = nodes[0].client().await;
    publisher.publish("global", "once everywhere").await.unwrap();
    assert_eq!(receive(&mut subscriber).await, "once everywhere");

    for node in &nodes {
        wait_until(|| node.broker.dedup().len() == 1).await;
    }
    // let the echoes that come back to each broker settle
    tokio::time::sleep(Duration::from_millis(300)).await;

    for node in &nodes {
        assert_eq!(node.broker.backlog().count("global").unwrap(), 1);
        assert_eq!(node.broker.dedup().len(), 1);
    }
    assert_eq!(subscriber.next_payload_within(SILENCE).await.unwrap(), None);
}

#[tokio::test]
async fn test_late_subscriber_receives_backlog_until_reset() {
    let nodes = start_cluster(1, &[]).await;
    let broker = &nodes[0].broker;
    let mut publisher = nodes[0].client().await;
    publisher.publish("orders", "first").await.unwrap();
    publisher.publish("orders", "second").await.unwrap();
    wait_until(|| broker.backlog().count("orders").unwrap() == 2).await;

    let mut late = nodes[0].client().await;
    late.subscribe("orders").await.unwrap();
    assert_eq!(receive(&mut late).await, "first");

    publisher.reset("orders").await.unwrap();
    wait_until(|| broker.backlog().count("orders").unwrap() == 0).await;

    let mut after_reset = nodes[0].subscriber("orders").await;
    assert_eq!(after_reset.next_payload_within(SILENCE).await.unwrap(), None);

    publisher.publish("orders", "third").await.unwrap();
    assert_eq!(receive(&mut after_reset).await, "third");
}

#[tokio::test]
async fn test_malformed_lines_keep_connection_open() {
    let nodes = start_cluster(1, &[]).await;
    let mut client = nodes[0].client().await;

    client.send_line("hello").await.unwrap();
    client.send_line("pub|only-two-fields").await.unwrap();
    client.send_line("frobnicate|topic|x").await.unwrap();
    client.send_line("sub|mixed").await.unwrap();
    client.send_line("pub|mixed|after garbage").await.unwrap();

    assert_eq!(receive(&mut client).await, "after garbage");
}

#[tokio::test]
async fn test_disconnected_subscriber_is_reaped() {
    let nodes = start_cluster(1, &[]).await;
    let broker = nodes[0].broker.clone();
    let subscriber = nodes[0].subscriber("news").await;
    drop(subscriber);

    let mut publisher = nodes[0].client().await;
    let mut round = 0;
    while broker.registry().subscriber_count("news") > 0 {
        assert!(round < 200, "subscription was never reaped");
        publisher
            .publish("news", &format!("update {round}"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        round += 1;
    }
}

#[tokio::test]
async fn test_overlong_line_only_closes_its_connection() {
    let nodes = start_cluster_with(1, &[], 32).await;
    let mut subscriber = nodes[0].subscriber("news").await;

    let mut offender = nodes[0].client().await;
    offender
        .send_line(&format!("pub|news|{}", "x".repeat(128)))
        .await
        .unwrap();
    assert!(matches!(
        offender.next_payload_within(RECEIVE_TIMEOUT).await,
        Ok(None) | Err(_)
    ));

    let mut publisher = nodes[0].client().await;
    publisher.publish("news", "short").await.unwrap();
    assert_eq!(receive(&mut subscriber).await, "short");
}

#[tokio::test]
async fn test_invalid_utf8_line_is_skipped() {
    let nodes = start_cluster(1, &[]).await;
    let broker = nodes[0].broker.clone();

    let stream = TcpStream::connect(nodes[0].addr).await.unwrap();
    let mut framed = Framed::new(stream, LinesCodec::new());
    framed.get_mut().write_all(b"sub|bytes\n").await.unwrap();
    wait_until(|| broker.registry().subscriber_count("bytes") == 1).await;

    framed
        .get_mut()
        .write_all(b"pub|bytes|\xff\xfe bad\npub|bytes|after bad line\n")
        .await
        .unwrap();

    let line = tokio::time::timeout(RECEIVE_TIMEOUT, framed.next())
        .await
        .expect("no line after the invalid one")
        .expect("connection closed")
        .unwrap();
    assert_eq!(line, "after bad line");
    assert_eq!(broker.backlog().count("bytes").unwrap(), 1);
}

#[tokio::test]
async fn test_crlf_line_endings_are_accepted() {
    let nodes = start_cluster(1, &[]).await;
    let mut subscriber = nodes[0].subscriber("crlf").await;

    let mut raw = TcpStream::connect(nodes[0].addr).await.unwrap();
    raw.write_all(b"pub|crlf|windows\r\n").await.unwrap();

    assert_eq!(receive(&mut subscriber).await, "windows");
}

#[tokio::test]
async fn test_shutdown_releases_backlog_with_clients_connected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backlog");
    let backlog = SledBacklog::open(&path, true).unwrap();
    let broker = Arc::new(Broker::new(Arc::new(backlog), PeerPropagator::default()));
    let weak = Arc::downgrade(&broker);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(BrokerServer::from_listener(listener, broker).run_until(async {
        let _ = stopped.await;
    }));

    let mut subscriber = LineClient::connect(addr).await.unwrap();
    subscriber.subscribe("news").await.unwrap();
    let mut publisher = LineClient::connect(addr).await.unwrap();
    // the subscription is registered once the publish comes back
    let mut round = 0;
    loop {
        publisher.publish("news", &format!("ping {round}")).await.unwrap();
        if subscriber
            .next_payload_within(Duration::from_millis(200))
            .await
            .unwrap()
            .is_some()
        {
            break;
        }
        round += 1;
        assert!(round < 25, "subscription never became active");
    }
    assert!(path.exists());

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();

    assert!(weak.upgrade().is_none(), "broker still referenced after shutdown");
    assert!(!path.exists(), "backlog directory was not discarded");
    assert!(matches!(
        subscriber.next_payload_within(RECEIVE_TIMEOUT).await,
        Ok(None) | Err(_)
    ));
}

fn settings_in(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.server.port = 0;
    settings.storage.path = Some(dir.path().join("backlog").display().to_string());
    settings
}

#[tokio::test]
async fn test_server_from_settings_applies_configuration() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings_in(&dir);
    settings.server.max_line_length = 32;
    settings.broker.dedup_capacity = Some(1);

    let server = BrokerServer::from_settings(&settings).await.unwrap();
    let addr = server.local_addr().unwrap();
    let broker = server.broker().clone();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));

    let mut subscriber = LineClient::connect(addr).await.unwrap();
    subscriber.subscribe("cfg").await.unwrap();
    wait_until(|| broker.registry().subscriber_count("cfg") == 1).await;

    let mut publisher = LineClient::connect(addr).await.unwrap();
    publisher.publish("cfg", "a").await.unwrap();
    publisher.publish("cfg", "b").await.unwrap();
    // a window of one has already forgotten "a"
    publisher.publish("cfg", "a").await.unwrap();
    for expected in ["a", "b", "a"] {
        assert_eq!(receive(&mut subscriber).await, expected);
    }

    let mut offender = LineClient::connect(addr).await.unwrap();
    offender
        .send_line(&format!("pub|cfg|{}", "x".repeat(64)))
        .await
        .unwrap();
    assert!(matches!(
        offender.next_payload_within(RECEIVE_TIMEOUT).await,
        Ok(None) | Err(_)
    ));
    assert_eq!(broker.backlog().count("cfg").unwrap(), 3);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert!(dir.path().join("backlog").exists());
}

#[tokio::test]
async fn test_server_from_settings_rejects_invalid_peer() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings_in(&dir);
    settings.broker.peers = vec!["no-port-here".to_string()];

    assert!(matches!(
        BrokerServer::from_settings(&settings).await,
        Err(BrokerError::InvalidPeer(p)) if p == "no-port-here"
    ));
}
