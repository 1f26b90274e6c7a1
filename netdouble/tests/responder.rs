use std::net::SocketAddr;
use std::sync::Arc;

use netdouble::fixture::{FixtureStore, well_known};
use netdouble::responder::SnmpResponderTask;
use netdouble_task::{ShutdownHandle, Task as _};
use snmp_proto::{Bytes, BytesMut, GetRequest, GetResponse, Oid, Value};
use tokio::net::UdpSocket;
use tokio::time::{Duration, timeout};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct RunningResponder {
    addr: SocketAddr,
    shutdown_handle: ShutdownHandle,
    join: tokio::task::JoinHandle<anyhow::Result<()>>,
}

async fn start_responder(community: &str) -> RunningResponder {
    let fixtures = Arc::new(FixtureStore::builtin());
    let task = SnmpResponderTask::init_and_bind(
        "127.0.0.1:0".parse().expect("loopback addr"),
        community.to_owned(),
        fixtures,
    )
    .await
    .expect("bind responder on an ephemeral port");

    let addr = task.addr();
    let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();
    let join = tokio::spawn(task.run(shutdown_signal));

    RunningResponder {
        addr,
        shutdown_handle,
        join,
    }
}

fn encode_query(community: &str, request_id: i32, names: &[&str]) -> BytesMut {
    let request = GetRequest {
        community: Bytes::copy_from_slice(community.as_bytes()),
        request_id,
        names: names
            .iter()
            .map(|name| Oid::parse_str(name).expect("test OID"))
            .collect(),
    };

    let mut buf = BytesMut::new();
    request.encode(&mut buf);
    buf
}

async fn recv_response(socket: &UdpSocket) -> GetResponse {
    let mut buf = vec![0u8; 4096];
    let (n, _) = timeout(RECV_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("responder answers in time")
        .expect("receive datagram");

    GetResponse::decode(Bytes::copy_from_slice(&buf[..n])).expect("well-formed response")
}

#[tokio::test]
async fn seeded_names_resolve_to_their_fixture_values() {
    let responder = start_responder("public").await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("client socket");

    let query = encode_query("public", 42, &["1.3.6.1.2.1.1.3.0", "1.3.6.1.2.1.1.5.0"]);
    socket.send_to(&query, responder.addr).await.expect("send query");

    let response = recv_response(&socket).await;

    assert_eq!(response.request_id, 42);
    assert_eq!(response.bindings.len(), 2);
    assert_eq!(response.bindings[0].name, well_known::sys_uptime());
    assert_eq!(response.bindings[0].value, Value::Integer(12345));
    assert_eq!(response.bindings[1].name, well_known::sys_name());
    assert_eq!(
        response.bindings[1].value,
        Value::OctetString(Bytes::from_static(b"FakeHost"))
    );
}

#[tokio::test]
async fn absent_name_is_answered_with_no_such_object() {
    let responder = start_responder("public").await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("client socket");

    let query = encode_query("public", 7, &["1.3.6.1.2.1.1.1.0"]);
    socket.send_to(&query, responder.addr).await.expect("send query");

    let response = recv_response(&socket).await;

    assert_eq!(response.request_id, 7);
    assert_eq!(response.bindings.len(), 1);
    assert_eq!(response.bindings[0].value, Value::NoSuchObject);
}

#[tokio::test]
async fn malformed_datagram_does_not_stop_the_responder() {
    let responder = start_responder("public").await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("client socket");

    socket
        .send_to(b"definitely not BER", responder.addr)
        .await
        .expect("send garbage");

    // The malformed datagram is dropped; a well-formed query still gets answered.
    let query = encode_query("public", 8, &["1.3.6.1.2.1.1.5.0"]);
    socket.send_to(&query, responder.addr).await.expect("send query");

    let response = recv_response(&socket).await;
    assert_eq!(response.request_id, 8);
    assert_eq!(
        response.bindings[0].value,
        Value::OctetString(Bytes::from_static(b"FakeHost"))
    );
}

#[tokio::test]
async fn unexpected_community_is_dropped_without_answer() {
    let responder = start_responder("public").await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("client socket");

    let query = encode_query("private", 9, &["1.3.6.1.2.1.1.5.0"]);
    socket.send_to(&query, responder.addr).await.expect("send query");

    let mut buf = [0u8; 64];
    let outcome = timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await;
    assert!(outcome.is_err(), "no response datagram must be sent");
}

#[tokio::test]
async fn shutdown_stops_the_task_and_releases_the_socket() {
    let responder = start_responder("public").await;

    responder.shutdown_handle.signal();

    let result = timeout(RECV_TIMEOUT, responder.join)
        .await
        .expect("task stops on shutdown")
        .expect("task is not aborted");
    assert!(result.is_ok());

    // The UDP port is free again once the task has returned.
    UdpSocket::bind(responder.addr).await.expect("port is released");
}
