use base64::{engine::general_purpose::STANDARD, Engine as _};
use n0_error::{anyerr, ensure_any, Result, StackResultExt, StdResultExt};
use tracing::debug;

use crate::{
    bridge::HttpBridge,
    dict,
    session::{SessionId, SessionStore, MAX_REQUEST_LEN},
};

/// The four-verb command machine carried in ALLOCATE usernames.
///
/// `s` opens a session, `c` writes a chunk of the compressed request, `e`
/// relays the assembled request upstream, and `r` pages the compressed
/// response back out. Every failure, from a malformed command to a vanished
/// session, is surfaced as one opaque error; the dispatcher folds them all
/// into the standard unauthorized response.
pub struct Tunnel {
    store: SessionStore,
    bridge: HttpBridge,
}

/// Result of dispatching one command.
pub enum Dispatch {
    /// Response payload available immediately (`s`, `c`, `r`).
    Ready(Vec<u8>),
    /// An `e` whose upstream round-trip still has to run; feed it to
    /// [`Tunnel::execute`] off the receive loop.
    Execute(PendingExec),
}

/// An execute command past its synchronous prefix: the session's request
/// buffer has been consumed and inflated, the HTTP leg has not started.
pub struct PendingExec {
    id: SessionId,
    request: Vec<u8>,
}

impl Tunnel {
    pub fn new(store: SessionStore, bridge: HttpBridge) -> Self {
        Self { store, bridge }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Runs the synchronous part of a command.
    ///
    /// `s`, `c`, and `r` complete entirely in here; for `e` the session is
    /// consumed and the inflated request returned as [`Dispatch::Execute`].
    pub fn dispatch(&self, command: &str) -> Result<Dispatch> {
        let (verb, args) = command.split_once(':').context("Invalid request")?;
        match verb {
            "s" => {
                let len: usize = args.parse().std_context("Invalid request length")?;
                ensure_any!(len <= MAX_REQUEST_LEN, "Request too large");
                let id = self.store.create(len);
                debug!(?id, len, "session opened");
                Ok(Dispatch::Ready(id.as_bytes().to_vec()))
            }
            "c" => {
                let mut parts = args.splitn(3, ':');
                let id = SessionId::from_base64(parts.next().context("Invalid request")?)?;
                let offset: usize = parts
                    .next()
                    .context("Invalid request")?
                    .parse()
                    .std_context("Invalid offset")?;
                let content = STANDARD
                    .decode(parts.next().context("Invalid request")?)
                    .std_context("Invalid content encoding")?;
                self.store.write_chunk(id, offset, &content)?;
                Ok(Dispatch::Ready(id.as_bytes().to_vec()))
            }
            "e" => {
                let id = SessionId::from_base64(args)?;
                let compressed = self.store.take_request(id)?;
                let request = dict::inflate(&compressed)?;
                debug!(?id, request_len = request.len(), "executing session");
                Ok(Dispatch::Execute(PendingExec { id, request }))
            }
            "r" => {
                let (id, offset) = args.split_once(':').context("Invalid request")?;
                let id = SessionId::from_base64(id)?;
                let offset: usize = offset.parse().std_context("Invalid offset")?;
                self.store.read_response(id, offset).map(Dispatch::Ready)
            }
            _ => Err(anyerr!("Unknown method")),
        }
    }

    /// Finishes an `e`: upstream round-trip, deflate, commit.
    ///
    /// The session store is untouched for the duration of the HTTP call; if
    /// the reaper collected the session in the meantime the commit fails and
    /// the response is discarded. Returns the compressed response length as
    /// four big-endian bytes.
    pub async fn execute(&self, pending: PendingExec) -> Result<Vec<u8>> {
        let PendingExec { id, request } = pending;
        let response = self.bridge.round_trip(&request).await;
        let compressed = dict::deflate(&response)?;
        let len = compressed.len() as u32;
        self.store.commit_response(id, compressed)?;
        debug!(?id, compressed_len = len, "response committed");
        Ok(len.to_be_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::parse_target;

    fn tunnel() -> Tunnel {
        // The bridge only matters for `e`; loopback port 9 is never dialed
        // by the paths under test here.
        let bridge = HttpBridge::new(parse_target("http://127.0.0.1:9").unwrap()).unwrap();
        Tunnel::new(SessionStore::new(), bridge)
    }

    fn ready(dispatch: Dispatch) -> Vec<u8> {
        match dispatch {
            Dispatch::Ready(payload) => payload,
            Dispatch::Execute(_) => panic!("expected an immediate payload"),
        }
    }

    #[test]
    fn start_returns_raw_session_id() {
        let tunnel = tunnel();
        let payload = ready(tunnel.dispatch("s:64").unwrap());
        assert_eq!(payload.len(), 16);
        let id = SessionId::from_base64(&STANDARD.encode(&payload)).unwrap();
        assert!(tunnel.store().contains(id));
    }

    #[test]
    fn start_caps_request_length() {
        let tunnel = tunnel();
        assert!(tunnel.dispatch(&format!("s:{MAX_REQUEST_LEN}")).is_ok());
        assert!(tunnel
            .dispatch(&format!("s:{}", MAX_REQUEST_LEN + 1))
            .is_err());
        assert!(tunnel.dispatch("s:-1").is_err());
        assert!(tunnel.dispatch("s:forty").is_err());
    }

    #[test]
    fn chunk_echoes_session_id() {
        let tunnel = tunnel();
        let id = ready(tunnel.dispatch("s:8").unwrap());
        let id_b64 = STANDARD.encode(&id);
        let content = STANDARD.encode(b"abcd");
        let echoed = ready(tunnel.dispatch(&format!("c:{id_b64}:2:{content}")).unwrap());
        assert_eq!(echoed, id);
    }

    #[test]
    fn chunk_rejects_unknown_session_and_overflow() {
        let tunnel = tunnel();
        let id = ready(tunnel.dispatch("s:4").unwrap());
        let id_b64 = STANDARD.encode(&id);
        let content = STANDARD.encode(b"abcd");
        // One byte past the end of the 4-byte buffer.
        assert!(tunnel.dispatch(&format!("c:{id_b64}:1:{content}")).is_err());
        let ghost = STANDARD.encode([0u8; 16]);
        assert!(tunnel.dispatch(&format!("c:{ghost}:0:{content}")).is_err());
    }

    #[test]
    fn malformed_commands_fail() {
        let tunnel = tunnel();
        assert!(tunnel.dispatch("no-colon").is_err());
        assert!(tunnel.dispatch("x:whatever").is_err());
        assert!(tunnel.dispatch("c:only-an-id").is_err());
        assert!(tunnel.dispatch("r:missing-offset").is_err());
        assert!(tunnel.dispatch("e:@@@").is_err());
    }

    #[test]
    fn execute_requires_compressed_request() {
        let tunnel = tunnel();
        let id = ready(tunnel.dispatch("s:5").unwrap());
        let id_b64 = STANDARD.encode(&id);
        let content = STANDARD.encode(b"plain");
        ready(tunnel.dispatch(&format!("c:{id_b64}:0:{content}")).unwrap());
        // Not a zlib stream, so the inflate step fails.
        assert!(tunnel.dispatch(&format!("e:{id_b64}")).is_err());
        // The request buffer was consumed by the attempt.
        assert!(tunnel.dispatch(&format!("e:{id_b64}")).is_err());
    }

    #[tokio::test]
    async fn execute_commits_and_reads_back() {
        let tunnel = tunnel();
        let compressed = dict::deflate(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        let id = ready(tunnel.dispatch(&format!("s:{}", compressed.len())).unwrap());
        let id_b64 = STANDARD.encode(&id);
        let content = STANDARD.encode(&compressed);
        ready(tunnel.dispatch(&format!("c:{id_b64}:0:{content}")).unwrap());

        let Dispatch::Execute(pending) = tunnel.dispatch(&format!("e:{id_b64}")).unwrap() else {
            panic!("expected a pending execute");
        };
        // Upstream is unreachable, so the bridge wraps a 502 for us.
        let payload = tunnel.execute(pending).await.unwrap();
        let total = u32::from_be_bytes(payload.try_into().unwrap()) as usize;
        assert!(total > 0);

        let mut compressed_response = Vec::new();
        let mut offset = 0;
        while offset < total {
            let page = ready(tunnel.dispatch(&format!("r:{id_b64}:{offset}")).unwrap());
            assert!(page.len() <= 16);
            offset += page.len();
            compressed_response.extend_from_slice(&page);
        }
        let response = dict::inflate(&compressed_response).unwrap();
        assert!(response.starts_with(b"HTTP/1.1 502 Bad Gateway\r\n"));
    }

    #[tokio::test]
    async fn execute_discards_response_for_reaped_session() {
        let tunnel = tunnel();
        let compressed = dict::deflate(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        let id = ready(tunnel.dispatch(&format!("s:{}", compressed.len())).unwrap());
        let id_b64 = STANDARD.encode(&id);
        let content = STANDARD.encode(&compressed);
        ready(tunnel.dispatch(&format!("c:{id_b64}:0:{content}")).unwrap());

        let Dispatch::Execute(pending) = tunnel.dispatch(&format!("e:{id_b64}")).unwrap() else {
            panic!("expected a pending execute");
        };
        let session = SessionId::from_base64(&id_b64).unwrap();
        tunnel.store().force_expire(session);
        tunnel.store().reap();

        assert!(tunnel.execute(pending).await.is_err());
        assert!(tunnel.dispatch(&format!("r:{id_b64}:0")).is_err());
    }
}
