// 查询代理端到端集成测试
//
// 测试流程：
// 1. 内存中的假后端 + 查询引擎 (缓存聚合 / 直通)
// 2. 响应编码 (json / wrapped_json / fixed16)
// 3. 两级代理: 前端 TCP → LivestatusConnection → 另一个代理的前端

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lsbroker::peer::{LivestatusConnection, Peer, PeerConnection, PeerError, PeerRegistry, PeerStatus};
use lsbroker::protocol::encode_response;
use lsbroker::query::{OutputFormat, QueryEngine, Request, Row, SortDirection, Value};
use lsbroker::schema::default_catalog;
use lsbroker::service::Frontend;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// 内存后端: 固定返回结果并记录调用次数
struct FakeBackend {
    result: Result<Vec<Row>, PeerError>,
    calls: AtomicUsize,
    delay: Duration,
}

impl FakeBackend {
    fn new(result: Result<Vec<Row>, PeerError>) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    fn slow(result: Result<Vec<Row>, PeerError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicUsize::new(0),
            delay,
        })
    }
}

#[async_trait]
impl PeerConnection for FakeBackend {
    async fn query(&self, _request: &Request) -> Result<Vec<Row>, PeerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

fn up_peer(id: &str, backend: Arc<FakeBackend>) -> Peer {
    Peer::new(id, format!("site {}", id), format!("{}:6557", id), backend).with_status(PeerStatus::up())
}

fn host_row(name: &str, state: i64) -> Row {
    let mut row = vec![
        Value::from(name),
        Value::from(name.to_uppercase()),
        Value::from("192.168.0.1"),
        Value::Int(state),
        Value::Int(1),
        Value::Int(1_700_000_000),
        Value::Int(1_690_000_000),
        Value::Float(0.5),
        Value::from("OK - alive"),
        Value::List(vec![Value::from("web")]),
        Value::List(vec![Value::from("ops")]),
        Value::List(vec![]),
        Value::List(vec![Value::from("ping")]),
    ];
    row.extend(std::iter::repeat(Value::Null).take(4));
    row
}

fn engine(peers: Vec<Peer>) -> Arc<QueryEngine> {
    let mut registry = PeerRegistry::new();
    for peer in peers {
        registry.register(peer).unwrap();
    }
    Arc::new(QueryEngine::new(Arc::new(default_catalog()), Arc::new(registry)))
}

#[tokio::test]
async fn test_partial_failure_keeps_healthy_rows() {
    let a = FakeBackend::new(Ok(vec![
        vec![Value::Int(100), Value::from("SERVICE ALERT: web;OK")],
        vec![Value::Int(101), Value::from("HOST ALERT: db;UP")],
    ]));
    let b = FakeBackend::new(Ok(vec![vec![Value::Int(1), Value::from("stale")]]));
    let c = FakeBackend::new(Err(PeerError::Timeout(Duration::from_secs(10))));

    let engine = engine(vec![
        up_peer("A", a.clone()),
        up_peer("B", b.clone()).with_status(PeerStatus::down("connection refused")),
        up_peer("C", c.clone()),
    ]);

    let request = Request::new("log")
        .with_columns(["time", "message"])
        .with_sort("time", SortDirection::Asc)
        .with_output_format(OutputFormat::WrappedJson);
    let mut response = engine.build_response(&request).await.unwrap();

    assert!(response.error.is_none());
    assert_eq!(response.result.len(), 2);
    assert_eq!(response.failed.len(), 2);
    assert_eq!(response.failed["B"], "connection refused");
    assert_eq!(response.failed["C"], "timeout after 10s");

    // Down peer 不发请求
    assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    assert_eq!(c.calls.load(Ordering::SeqCst), 1);

    let body = encode_response(&mut response).unwrap().body;
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["data"][0][0], 100);
    assert_eq!(parsed["failed"]["C"], "timeout after 10s");
    assert_eq!(parsed["total"], 2);
}

#[tokio::test]
async fn test_passthrough_fan_out_is_concurrent() {
    let delay = Duration::from_millis(200);
    let peers: Vec<Peer> = (0..5)
        .map(|i| {
            up_peer(
                &format!("p{}", i),
                FakeBackend::slow(Ok(vec![vec![Value::Int(i), Value::from("m")]]), delay),
            )
        })
        .collect();
    let engine = engine(peers);

    let started = std::time::Instant::now();
    let request = Request::new("log")
        .with_columns(["time", "message", "peer_key"])
        .with_sort("time", SortDirection::Desc);
    let response = engine.build_response(&request).await.unwrap();

    assert!(started.elapsed() < delay * 4);
    assert_eq!(response.result.len(), 5);
    assert_eq!(
        response.result[0],
        vec![Value::Int(4), Value::from("m"), Value::from("p4")]
    );
}

#[tokio::test]
async fn test_hosts_two_peers_sorted_limited_with_header() {
    let a = up_peer("a", FakeBackend::new(Ok(vec![])));
    a.update_cache("hosts", vec![host_row("web1", 0), host_row("web3", 1), host_row("db2", 0)]);
    let b = up_peer("b", FakeBackend::new(Ok(vec![])));
    b.update_cache("hosts", vec![host_row("web2", 0), host_row("app1", 2), host_row("zeus", 0)]);
    let engine = engine(vec![a, b]);

    let request = Request::new("hosts")
        .with_sort("name", SortDirection::Desc)
        .with_limit(2)
        .with_fixed16();
    let mut response = engine.build_response(&request).await.unwrap();
    assert_eq!(response.result_total, Some(6));

    let encoded = encode_response(&mut response).unwrap();
    let status = encoded.status_line.clone().unwrap();
    assert_eq!(status.len(), 16);
    assert!(status.starts_with("200 "));
    assert_eq!(
        status[4..15].trim().parse::<usize>().unwrap(),
        encoded.body.len() + 1
    );

    let rows: Vec<Vec<serde_json::Value>> = serde_json::from_slice(&encoded.body).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][0], "name");
    assert_eq!(rows[0][3], "state");
    assert_eq!(rows[1][0], "zeus");
    assert_eq!(rows[2][0], "web3");
    assert_eq!(rows[1][12], "b");
    assert_eq!(rows[2][13], "site a");
    assert!(rows.iter().all(|r| r.len() == rows[0].len()));
}

/// 启动前端，返回地址
async fn spawn_frontend(engine: Arc<QueryEngine>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let frontend = Frontend::new(engine, addr.clone());
    tokio::spawn(async move {
        let _ = frontend.serve(listener, std::future::pending()).await;
    });
    addr
}

#[tokio::test]
async fn test_chained_brokers_over_tcp() {
    // 下级代理: 一个内存后端
    let inner = engine(vec![up_peer(
        "backend",
        FakeBackend::new(Ok(vec![
            vec![Value::Int(10), Value::from("first")],
            vec![Value::Int(20), Value::from("second")],
        ])),
    )]);
    let inner_addr = spawn_frontend(inner).await;

    // 上级代理: 通过 livestatus 协议连接下级代理
    let connection = LivestatusConnection::new(inner_addr.clone(), Duration::from_secs(5));
    let outer = engine(vec![Peer::new(
        "edge",
        "Edge Site",
        inner_addr,
        Arc::new(connection),
    )
    .with_status(PeerStatus::up())]);
    let outer_addr = spawn_frontend(outer).await;

    let mut client = TcpStream::connect(&outer_addr).await.unwrap();
    client
        .write_all(
            b"GET log\nColumns: time peer_name message\nSort: time desc\n\
              OutputFormat: wrapped_json\nResponseHeader: fixed16\n\n",
        )
        .await
        .unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();

    let (status, body) = out.split_at(16);
    let status = std::str::from_utf8(status).unwrap();
    assert!(status.starts_with("200 "));
    assert_eq!(status[4..15].trim().parse::<usize>().unwrap(), body.len());

    let parsed: serde_json::Value = serde_json::from_slice(body).unwrap();
    assert_eq!(parsed["total"], 2);
    assert_eq!(parsed["failed"], serde_json::json!({}));
    assert_eq!(
        parsed["data"],
        serde_json::json!([[20, "Edge Site", "second"], [10, "Edge Site", "first"]])
    );
}

#[tokio::test]
async fn test_unreachable_backend_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let engine = engine(vec![Peer::new(
        "dead",
        "Dead Site",
        dead_addr.clone(),
        Arc::new(LivestatusConnection::new(dead_addr, Duration::from_secs(2))),
    )
    .with_status(PeerStatus::up())]);

    let request = Request::new("log")
        .with_columns(["time"])
        .with_output_format(OutputFormat::WrappedJson);
    let response = engine.build_response(&request).await.unwrap();
    assert!(response.result.is_empty());
    assert!(response.error.is_none());
    assert!(response.failed["dead"].starts_with("connection failed"));
}

/// 读完请求后回写固定字节的后端
async fn raw_backend(reply: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 512];
        while !buf.ends_with(b"\n\n") {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let _ = stream.write_all(reply).await;
    });
    addr
}

#[tokio::test]
async fn test_misbehaving_backends_only_fail_themselves() {
    let oversized = raw_backend(b"200 99999999999\n").await;
    let garbled = raw_backend("20\u{e9}         43\n".as_bytes()).await;
    let healthy = raw_backend(b"200          11\n[[1,\"ok\"]]\n").await;

    let peer = |id: &str, addr: String| {
        Peer::new(
            id,
            id,
            addr.clone(),
            Arc::new(LivestatusConnection::new(addr, Duration::from_secs(5))),
        )
        .with_status(PeerStatus::up())
    };
    let engine = engine(vec![
        peer("big", oversized),
        peer("garbled", garbled),
        peer("good", healthy),
    ]);

    let request = Request::new("log")
        .with_columns(["time", "message"])
        .with_output_format(OutputFormat::WrappedJson);
    let response = engine.build_response(&request).await.unwrap();

    assert!(response.error.is_none());
    assert_eq!(response.result, vec![vec![Value::Int(1), Value::from("ok")]]);
    assert!(response.failed["big"].contains("exceeds limit"));
    assert!(response.failed["garbled"].starts_with("protocol error"));
}
