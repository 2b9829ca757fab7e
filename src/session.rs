use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use n0_error::{anyerr, ensure_any, Result, StackResultExt, StdResultExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long a session stays readable after creation. The deadline is never
/// refreshed, not even by a successful execute.
pub const SESSION_TTL: Duration = Duration::from_secs(30);

/// Upper bound on the request buffer a single session may allocate.
pub const MAX_REQUEST_LEN: usize = 1024 * 1024;

/// Opaque 128-bit session identifier.
///
/// Handed to the client as raw bytes inside the packed ALLOCATE payload and
/// received back base64-encoded in `c`/`e`/`r` commands. The raw form is the
/// map key on this side.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; 16]);

impl SessionId {
    fn random() -> Self {
        Self(rand::random())
    }

    /// Raw identifier bytes, the form packed into ALLOCATE payloads.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parses the base64 form used on the `c`/`e`/`r` input path.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .std_context("Invalid session id encoding")?;
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| anyerr!("Invalid session id length"))?;
        Ok(Self(bytes))
    }

    /// Encodes the identifier the way clients send it back.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// The three per-session maps. They are mutated only as a group behind the
/// store mutex and must stay consistent: a live session always has a
/// deadline, and reaping removes all of its entries together.
#[derive(Default)]
struct Maps {
    requests: HashMap<SessionId, Vec<u8>>,
    responses: HashMap<SessionId, Vec<u8>>,
    deadlines: HashMap<SessionId, Instant>,
}

/// Process-wide tunnel session state.
///
/// Every operation takes the mutex for its whole, await-free duration. The
/// execute path deliberately spans two separate operations
/// ([`take_request`](Self::take_request) and
/// [`commit_response`](Self::commit_response)) so the lock is not held across
/// the upstream HTTP round-trip.
#[derive(Clone, Default)]
pub struct SessionStore(Arc<Mutex<Maps>>);

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh session with a zero-filled request buffer of
    /// exactly `len` bytes and a deadline [`SESSION_TTL`] from now.
    pub fn create(&self, len: usize) -> SessionId {
        let id = SessionId::random();
        let mut maps = self.0.lock().expect("session store poisoned");
        maps.requests.insert(id, vec![0; len]);
        maps.deadlines.insert(id, Instant::now() + SESSION_TTL);
        id
    }

    /// Copies `content` into the session's request buffer at `offset`.
    ///
    /// Bytes outside `[offset, offset + content.len())` are left untouched.
    pub fn write_chunk(&self, id: SessionId, offset: usize, content: &[u8]) -> Result<()> {
        let mut maps = self.0.lock().expect("session store poisoned");
        let buffer = maps.requests.get_mut(&id).context("Unknown request")?;
        let end = offset
            .checked_add(content.len())
            .filter(|end| *end <= buffer.len())
            .context("Content too long")?;
        buffer[offset..end].copy_from_slice(content);
        Ok(())
    }

    /// Removes and returns the session's request buffer.
    pub fn take_request(&self, id: SessionId) -> Result<Vec<u8>> {
        let mut maps = self.0.lock().expect("session store poisoned");
        maps.requests.remove(&id).context("Unknown request")
    }

    /// Stores the compressed response for a session, provided the session
    /// was not reaped while its upstream round-trip was in flight.
    pub fn commit_response(&self, id: SessionId, response: Vec<u8>) -> Result<()> {
        let mut maps = self.0.lock().expect("session store poisoned");
        ensure_any!(maps.deadlines.contains_key(&id), "Unknown request");
        maps.responses.insert(id, response);
        Ok(())
    }

    /// Returns at most 16 bytes of the session's response starting at
    /// `offset`.
    pub fn read_response(&self, id: SessionId, offset: usize) -> Result<Vec<u8>> {
        let maps = self.0.lock().expect("session store poisoned");
        let buffer = maps.responses.get(&id).context("Unknown request")?;
        ensure_any!(offset <= buffer.len(), "Invalid offset");
        let end = buffer.len().min(offset + 16);
        Ok(buffer[offset..end].to_vec())
    }

    /// Drops every session whose deadline is in the past, removing its
    /// request buffer, response buffer, and deadline entry together.
    pub fn reap(&self) {
        let now = Instant::now();
        let mut maps = self.0.lock().expect("session store poisoned");
        let expired: Vec<SessionId> = maps
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline < now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            debug!(?id, "reaping expired session");
            maps.requests.remove(&id);
            maps.responses.remove(&id);
            maps.deadlines.remove(&id);
        }
    }

    /// Spawns the background reaper, one sweep per second until `shutdown`
    /// fires.
    pub fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => store.reap(),
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: SessionId) -> bool {
        self.0
            .lock()
            .expect("session store poisoned")
            .deadlines
            .contains_key(&id)
    }

    #[cfg(test)]
    pub(crate) fn force_expire(&self, id: SessionId) {
        let mut maps = self.0.lock().expect("session store poisoned");
        if let Some(deadline) = maps.deadlines.get_mut(&id) {
            *deadline = Instant::now() - Duration::from_secs(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_zero_fills_and_sets_deadline() {
        let store = SessionStore::new();
        let id = store.create(32);
        assert!(store.contains(id));
        let request = store.take_request(id).unwrap();
        assert_eq!(request, vec![0u8; 32]);
    }

    #[test]
    fn session_id_base64_round_trip() {
        let store = SessionStore::new();
        let id = store.create(0);
        let parsed = SessionId::from_base64(&id.to_base64()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn session_id_rejects_wrong_length() {
        assert!(SessionId::from_base64("c2hvcnQ=").is_err());
        assert!(SessionId::from_base64("!!!not base64!!!").is_err());
    }

    #[test]
    fn write_chunk_leaves_surrounding_bytes() {
        let store = SessionStore::new();
        let id = store.create(8);
        store.write_chunk(id, 3, b"ab").unwrap();
        let request = store.take_request(id).unwrap();
        assert_eq!(request, [0, 0, 0, b'a', b'b', 0, 0, 0]);
    }

    #[test]
    fn write_chunk_bounds() {
        let store = SessionStore::new();
        let id = store.create(4);
        assert!(store.write_chunk(id, 0, b"1234").is_ok());
        assert!(store.write_chunk(id, 1, b"1234").is_err());
        assert!(store.write_chunk(id, usize::MAX, b"x").is_err());
        let unknown = SessionId::random();
        assert!(store.write_chunk(unknown, 0, b"x").is_err());
    }

    #[test]
    fn take_request_consumes_buffer() {
        let store = SessionStore::new();
        let id = store.create(1);
        store.take_request(id).unwrap();
        assert!(store.take_request(id).is_err());
        // The deadline survives, so a response can still be committed.
        assert!(store.commit_response(id, vec![1, 2, 3]).is_ok());
    }

    #[test]
    fn commit_fails_after_reap() {
        let store = SessionStore::new();
        let id = store.create(1);
        store.force_expire(id);
        store.reap();
        assert!(!store.contains(id));
        assert!(store.commit_response(id, vec![1]).is_err());
    }

    #[test]
    fn read_response_pages_16_bytes() {
        let store = SessionStore::new();
        let id = store.create(0);
        let body: Vec<u8> = (0u8..40).collect();
        store.commit_response(id, body.clone()).unwrap();

        assert_eq!(store.read_response(id, 0).unwrap(), &body[..16]);
        assert_eq!(store.read_response(id, 16).unwrap(), &body[16..32]);
        assert_eq!(store.read_response(id, 32).unwrap(), &body[32..]);
        assert_eq!(store.read_response(id, 40).unwrap(), Vec::<u8>::new());
        assert!(store.read_response(id, 41).is_err());
    }

    #[test]
    fn reap_removes_all_three_entries() {
        let store = SessionStore::new();
        let id = store.create(4);
        store.commit_response(id, vec![9]).unwrap();
        store.force_expire(id);
        store.reap();
        assert!(store.take_request(id).is_err());
        assert!(store.read_response(id, 0).is_err());
        assert!(!store.contains(id));
    }

    #[test]
    fn reap_keeps_live_sessions() {
        let store = SessionStore::new();
        let id = store.create(4);
        store.reap();
        assert!(store.contains(id));
    }
}
