//! Covert HTTP relay speaking a STUN/TURN-shaped UDP wire protocol.
//!
//! To an on-path observer (and to the TURN client driving it) this server is
//! an ordinary STUN/TURN endpoint: it answers BINDING requests with the
//! sender's reflexive address and challenges ALLOCATE/REFRESH with long-term
//! credentials. Underneath, the username of every authenticated ALLOCATE
//! carries a small command (`s`/`c`/`e`/`r`) that assembles a compressed
//! HTTP request chunk by chunk, relays it to a fixed upstream target, and
//! pages the compressed response back out, 16 bytes per transaction, packed
//! into the XOR-RELAYED-ADDRESS of the ALLOCATE success.

/// Long-term credential validation for ALLOCATE and REFRESH requests.
pub mod auth;
/// Upstream HTTP round-trips for buffered wire-format requests.
pub mod bridge;
/// Shared zlib dictionary and the deflate/inflate helpers primed with it.
pub mod dict;
/// Fatal bootstrap errors surfaced before the receive loop starts.
pub mod error;
/// Payload packing into the synthetic relay address of an ALLOCATE success.
pub mod relay;
/// UDP receive loop and STUN request dispatch.
pub mod server;
/// Session buffers, deadlines, and the background reaper.
pub mod session;
/// The four-verb tunnel state machine layered on ALLOCATE usernames.
pub mod tunnel;

pub use bridge::HttpBridge;
pub use server::RelayServer;
pub use session::SessionStore;
pub use tunnel::Tunnel;

/// Realm advertised in challenges and mixed into the long-term key.
pub const REALM: &str = "webrtcsocket.org";
/// Password half of the shared long-term credentials.
pub const PASSWORD: &str = "turnrpc";
/// SOFTWARE attribute value stamped on challenge and success responses.
pub const SOFTWARE: &str = "webrtcsocket";
/// Username prefix that marks a tunnel command.
pub const COMMAND_PREFIX: &str = "turnrpc:";
