use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use n0_error::{Result, StdResultExt};
use stun_rs::{
    attributes::{
        stun::{
            ErrorCode as ErrorCodeAttr, MessageIntegrity, Nonce, Realm as RealmAttr, Software,
            XorMappedAddress,
        },
        turn::{LifeTime, XorRelayedAddress},
    },
    methods::{ALLOCATE, BINDING, REFRESH},
    MessageClass, MessageDecoderBuilder, MessageEncoderBuilder, StunMessage, StunMessageBuilder,
    TransactionId,
};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::{
    auth::{self, Verified},
    relay,
    tunnel::{Dispatch, Tunnel},
    REALM, SOFTWARE,
};

/// Largest datagram the receive loop will consider.
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Lifetime advertised on every tunnel-carrying ALLOCATE success. Nominally
/// enormous so well-behaved clients never refresh.
const ALLOCATE_LIFETIME: u32 = 0xEFFF_FFFF;

/// UDP receive loop and STUN request dispatcher.
///
/// BINDING, REFRESH, and the synchronous tunnel verbs are answered inline;
/// the upstream leg of an execute runs on its own task so other sessions
/// (and the reaper) never wait on an HTTP round-trip. Responses are
/// best-effort single datagrams; send errors are logged and dropped.
pub struct RelayServer {
    socket: Arc<UdpSocket>,
    tunnel: Arc<Tunnel>,
}

impl RelayServer {
    pub fn new(socket: UdpSocket, tunnel: Tunnel) -> Self {
        Self {
            socket: Arc::new(socket),
            tunnel: Arc::new(tunnel),
        }
    }

    /// Runs the receive loop until the socket fails.
    pub async fn run(self) -> Result<()> {
        let decoder = MessageDecoderBuilder::default().build();
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, peer) = self
                .socket
                .recv_from(&mut buf)
                .await
                .std_context("udp receive failed")?;
            let datagram = &buf[..len];
            let Ok((msg, _)) = decoder.decode(datagram) else {
                trace!(%peer, len, "dropping undecodable datagram");
                continue;
            };
            if msg.class() != MessageClass::Request {
                trace!(%peer, "dropping non-request message");
                continue;
            }
            let method = msg.method();
            if method == BINDING {
                self.handle_binding(peer, &msg).await;
            } else if method == ALLOCATE {
                self.handle_allocate(peer, &msg, datagram).await;
            } else if method == REFRESH {
                self.handle_refresh(peer, &msg, datagram).await;
            } else {
                trace!(%peer, "dropping unsupported method");
            }
        }
    }

    async fn handle_binding(&self, peer: SocketAddr, msg: &StunMessage) {
        debug!(%peer, "binding request");
        let response = StunMessageBuilder::new(BINDING, MessageClass::SuccessResponse)
            .with_transaction_id(*msg.transaction_id())
            .with_attribute(XorMappedAddress::from(peer))
            .build();
        send_message(&self.socket, peer, &response).await;
    }

    async fn handle_allocate(&self, peer: SocketAddr, msg: &StunMessage, datagram: &[u8]) {
        let verified = match auth::authenticate(msg, datagram) {
            Ok(verified) => verified,
            Err(err) => {
                debug!(%peer, "allocate rejected: {err:#}");
                send_message(&self.socket, peer, &unauthorized_response(msg)).await;
                return;
            }
        };
        match self.tunnel.dispatch(verified.command()) {
            Ok(Dispatch::Ready(payload)) => {
                let response = allocate_success(msg.transaction_id(), peer, &payload, &verified);
                send_message(&self.socket, peer, &response).await;
            }
            Ok(Dispatch::Execute(pending)) => {
                let socket = self.socket.clone();
                let tunnel = self.tunnel.clone();
                let transaction_id = *msg.transaction_id();
                let unauthorized = unauthorized_response(msg);
                tokio::spawn(async move {
                    match tunnel.execute(pending).await {
                        Ok(payload) => {
                            let response =
                                allocate_success(&transaction_id, peer, &payload, &verified);
                            send_message(&socket, peer, &response).await;
                        }
                        Err(err) => {
                            warn!(%peer, "execute failed: {err:#}");
                            send_message(&socket, peer, &unauthorized).await;
                        }
                    }
                });
            }
            Err(err) => {
                debug!(%peer, "tunnel command failed: {err:#}");
                send_message(&self.socket, peer, &unauthorized_response(msg)).await;
            }
        }
    }

    async fn handle_refresh(&self, peer: SocketAddr, msg: &StunMessage, datagram: &[u8]) {
        let verified = match auth::authenticate(msg, datagram) {
            Ok(verified) => verified,
            Err(err) => {
                debug!(%peer, "refresh rejected: {err:#}");
                send_message(&self.socket, peer, &unauthorized_response(msg)).await;
                return;
            }
        };
        // A zero LIFETIME asks for deallocation; anything else, including an
        // absent attribute, is refused so the client loop stays quiescent.
        let is_dealloc = msg
            .get::<LifeTime>()
            .map(|attr| attr.expect_life_time().as_u32() == 0)
            .unwrap_or(false);
        let response = if is_dealloc {
            debug!(%peer, "refresh deallocation");
            StunMessageBuilder::new(REFRESH, MessageClass::SuccessResponse)
                .with_transaction_id(*msg.transaction_id())
                .with_attribute(LifeTime::new(0))
                .with_attribute(MessageIntegrity::new(verified.key.clone()))
                .build()
        } else {
            StunMessageBuilder::new(REFRESH, MessageClass::ErrorResponse)
                .with_transaction_id(*msg.transaction_id())
                .with_attribute(error_code(508, "Insufficient Capacity"))
                .with_attribute(MessageIntegrity::new(verified.key.clone()))
                .build()
        };
        send_message(&self.socket, peer, &response).await;
    }
}

/// Encodes a message and writes it in one best-effort datagram.
async fn send_message(socket: &UdpSocket, peer: SocketAddr, msg: &StunMessage) {
    let mut buffer = [0u8; 1280];
    let encoder = MessageEncoderBuilder::default().build();
    match encoder.encode(&mut buffer, msg) {
        Ok(len) => {
            if let Err(err) = socket.send_to(&buffer[..len], peer).await {
                debug!(%peer, "udp send failed: {err}");
            }
        }
        Err(err) => warn!(%peer, "failed to encode response: {err}"),
    }
}

/// ALLOCATE success with the tunnel payload packed into a synthetic
/// XOR-RELAYED-ADDRESS, signed with the request's long-term key.
fn allocate_success(
    transaction_id: &TransactionId,
    peer: SocketAddr,
    payload: &[u8],
    verified: &Verified,
) -> StunMessage {
    let (ip, port) = relay::encode_payload(payload);
    let relayed = SocketAddr::new(IpAddr::V6(ip), port);
    StunMessageBuilder::new(ALLOCATE, MessageClass::SuccessResponse)
        .with_transaction_id(*transaction_id)
        .with_attribute(XorRelayedAddress::from(relayed))
        .with_attribute(LifeTime::new(ALLOCATE_LIFETIME))
        .with_attribute(XorMappedAddress::from(peer))
        .with_attribute(RealmAttr::new(REALM).expect("static realm"))
        .with_attribute(Software::new(SOFTWARE).expect("static software"))
        .with_attribute(MessageIntegrity::new(verified.key.clone()))
        .build()
}

/// The canonical 401 challenge: same method and transaction id, fresh
/// nonce, no integrity. Also reused verbatim for every tunnel-layer error.
fn unauthorized_response(msg: &StunMessage) -> StunMessage {
    StunMessageBuilder::new(msg.method(), MessageClass::ErrorResponse)
        .with_transaction_id(*msg.transaction_id())
        .with_attribute(error_code(401, "Unauthorized"))
        .with_attribute(Nonce::new(fresh_nonce()).expect("hex nonce is a valid quoted string"))
        .with_attribute(RealmAttr::new(REALM).expect("static realm"))
        .with_attribute(Software::new(SOFTWARE).expect("static software"))
        .build()
}

fn error_code(code: u16, reason: &str) -> ErrorCodeAttr {
    ErrorCodeAttr::from(stun_rs::ErrorCode::new(code, reason).expect("static error code"))
}

/// 96 bits of freshness, hex encoded to 24 characters.
fn fresh_nonce() -> String {
    let bytes: [u8; 12] = rand::random();
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
