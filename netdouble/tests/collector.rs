use std::net::SocketAddr;
use std::sync::Arc;

use netdouble::collector::TelemetryCollectorTask;
use netdouble::fixture::FixtureStore;
use netdouble::responder::SnmpResponderTask;
use netdouble_task::{ShutdownHandle, Task as _};
use snmp_proto::{Bytes, BytesMut, GetRequest, GetResponse, Oid, Value};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{Duration, timeout};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct RunningCollector {
    addr: SocketAddr,
    shutdown_handle: ShutdownHandle,
    join: tokio::task::JoinHandle<anyhow::Result<()>>,
}

fn start_collector() -> RunningCollector {
    let task = TelemetryCollectorTask::init_and_bind(
        "127.0.0.1:0".parse().expect("loopback addr"),
        "/v1/metrics".to_owned(),
    )
    .expect("bind collector on an ephemeral port");

    let addr = task.addr();
    let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();
    let join = tokio::spawn(task.run(shutdown_signal));

    RunningCollector {
        addr,
        shutdown_handle,
        join,
    }
}

fn format_request(method: &str, path: &str, body: &str) -> String {
    format!(
        "{method} {path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        len = body.len(),
    )
}

/// Sends one request and returns (status code, response body).
async fn send_request(addr: SocketAddr, method: &str, path: &str, body: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.expect("connect to collector");
    stream
        .write_all(format_request(method, path, body).as_bytes())
        .await
        .expect("send request");

    let mut response = Vec::new();
    timeout(RECV_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .expect("collector answers in time")
        .expect("read response");

    parse_response(&response)
}

fn parse_response(raw: &[u8]) -> (u16, String) {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text.split_once("\r\n\r\n").expect("complete response head");

    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .expect("status code in status line");

    (status, body.to_owned())
}

#[tokio::test]
async fn json_submission_is_acknowledged() {
    let collector = start_collector();

    let (status, body) = send_request(collector.addr, "POST", "/v1/metrics", r#"{"k":1}"#).await;

    assert_eq!(status, 200);
    assert_eq!(body, "Received!");
}

#[tokio::test]
async fn unparsable_submission_is_still_acknowledged() {
    let collector = start_collector();

    let (status, body) = send_request(collector.addr, "POST", "/v1/metrics", "not-json").await;

    assert_eq!(status, 200);
    assert_eq!(body, "Received!");
}

#[tokio::test]
async fn wrong_method_and_wrong_path_are_not_found() {
    let collector = start_collector();

    let (status, body) = send_request(collector.addr, "GET", "/v1/metrics", "").await;
    assert_eq!(status, 404);
    assert!(body.is_empty());

    let (status, body) = send_request(collector.addr, "POST", "/v1/other", r#"{"k":1}"#).await;
    assert_eq!(status, 404);
    assert!(body.is_empty());
}

#[tokio::test]
async fn slow_submission_does_not_delay_a_management_query() {
    let collector = start_collector();

    let fixtures = Arc::new(FixtureStore::builtin());
    let responder = SnmpResponderTask::init_and_bind(
        "127.0.0.1:0".parse().expect("loopback addr"),
        "public".to_owned(),
        fixtures,
    )
    .await
    .expect("bind responder on an ephemeral port");
    let responder_addr = responder.addr();
    let (responder_shutdown, responder_signal) = ShutdownHandle::new();
    let responder_join = tokio::spawn(responder.run(responder_signal));

    // Start a large submission and stall after the first kilobyte: the
    // collector is now blocked reading this request body.
    let body = "x".repeat(65_536);
    let mut stream = TcpStream::connect(collector.addr).await.expect("connect to collector");
    let head = format!(
        "POST /v1/metrics HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len(),
    );
    stream.write_all(head.as_bytes()).await.expect("send head");
    stream.write_all(&body.as_bytes()[..1024]).await.expect("send partial body");
    stream.flush().await.expect("flush");

    // A management query issued meanwhile is answered promptly.
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("client socket");
    let request = GetRequest {
        community: Bytes::from_static(b"public"),
        request_id: 21,
        names: vec![Oid::parse_str("1.3.6.1.2.1.1.3.0").expect("test OID")],
    };
    let mut query = BytesMut::new();
    request.encode(&mut query);
    socket.send_to(&query, responder_addr).await.expect("send query");

    let mut buf = [0u8; 512];
    let (n, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("responder answers while the collector is busy")
        .expect("receive datagram");
    let response = GetResponse::decode(Bytes::copy_from_slice(&buf[..n])).expect("well-formed response");
    assert_eq!(response.bindings[0].value, Value::Integer(12345));

    // Complete the submission; it is acknowledged as usual.
    stream.write_all(&body.as_bytes()[1024..]).await.expect("send rest of body");
    let mut response = Vec::new();
    timeout(RECV_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .expect("collector answers in time")
        .expect("read response");
    let (status, body) = parse_response(&response);
    assert_eq!(status, 200);
    assert_eq!(body, "Received!");

    responder_shutdown.signal();
    let _ = timeout(RECV_TIMEOUT, responder_join).await.expect("responder stops");
}

#[tokio::test]
async fn shutdown_stops_the_task_and_releases_the_listener() {
    let collector = start_collector();

    collector.shutdown_handle.signal();

    let result = timeout(RECV_TIMEOUT, collector.join)
        .await
        .expect("task stops on shutdown")
        .expect("task is not aborted");
    assert!(result.is_ok());

    // New connections are refused once the listener is gone.
    assert!(TcpStream::connect(collector.addr).await.is_err());
}
