use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use netdouble_task::{ShutdownSignal, Task};
use snmp_proto::{GetRequest, GetResponse, Value, VarBind};
use tokio::net::UdpSocket;

use crate::fixture::FixtureStore;

/// Maximum payload of a UDP datagram over IPv4.
const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Read-only SNMPv2c agent backed by the fixture table.
///
/// Per-datagram failures are logged and never stop the serve loop; only a
/// receive failure on the socket itself is fatal.
pub struct SnmpResponderTask {
    socket: UdpSocket,
    addr: SocketAddr,
    community: String,
    fixtures: Arc<FixtureStore>,
}

impl SnmpResponderTask {
    pub async fn init_and_bind(
        addr: SocketAddr,
        community: String,
        fixtures: Arc<FixtureStore>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind UDP socket at {addr}"))?;
        let addr = socket.local_addr().context("failed to read bound UDP address")?;

        info!(%addr, fixtures = fixtures.len(), "SNMP responder listening");

        Ok(Self {
            socket,
            addr,
            community,
            fixtures,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[instrument("snmp", skip(self), fields(port = self.addr.port()))]
    async fn serve(self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (n, peer_addr) = self
                .socket
                .recv_from(&mut buf)
                .await
                .context("failed to receive datagram")?;

            let request = match GetRequest::decode(Bytes::copy_from_slice(&buf[..n])) {
                Ok(request) => request,
                Err(error) => {
                    warn!(%error, client = %peer_addr, "Dropped malformed datagram");
                    continue;
                }
            };

            if request.community.as_ref() != self.community.as_bytes() {
                warn!(
                    client = %peer_addr,
                    community = %String::from_utf8_lossy(&request.community),
                    "Dropped query with unexpected community"
                );
                continue;
            }

            info!(
                client = %peer_addr,
                request_id = request.request_id,
                names = ?request.names,
                "Answering management query"
            );

            let response = self.answer(request);

            let mut out = BytesMut::new();
            response.encode(&mut out);

            if let Err(error) = self.socket.send_to(&out, peer_addr).await {
                error!(%error, client = %peer_addr, "Failed to send response");
            }
        }
    }

    /// Resolves every requested name; absent names get a `noSuchObject`
    /// exception binding, the rest of the response is unaffected.
    fn answer(&self, request: GetRequest) -> GetResponse {
        let bindings = request
            .names
            .into_iter()
            .map(|name| {
                let value = match self.fixtures.get(&name) {
                    Some(fixture) => fixture.to_wire(),
                    None => Value::NoSuchObject,
                };
                VarBind::new(name, value)
            })
            .collect();

        GetResponse {
            community: request.community,
            request_id: request.request_id,
            bindings,
        }
    }
}

#[async_trait]
impl Task for SnmpResponderTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "snmp responder";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        tokio::select! {
            result = self.serve() => result,
            _ = shutdown_signal.wait() => Ok(()),
        }
    }
}
