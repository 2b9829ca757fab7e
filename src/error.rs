use std::io;

use n0_error::stack_error;

/// Fatal errors raised while bootstrapping the relay.
///
/// Everything here aborts startup. Once the socket is bound and the target
/// validated, later failures are handled per datagram instead.
#[stack_error(derive, add_meta)]
#[non_exhaustive]
pub enum SetupError {
    /// The `--target` value did not parse as a URL
    #[error("invalid target url {target:?}")]
    InvalidTarget {
        /// The raw command line value
        target: String,
        /// The underlying parse error
        #[error(source, std_err)]
        source: url::ParseError,
    },

    /// The `--target` URL carries a scheme the relay cannot dial
    #[error("target must be an http(s) url, got scheme {scheme:?}")]
    UnsupportedScheme {
        /// The offending scheme
        scheme: String,
    },

    /// The UDP listen socket could not be bound
    #[error("failed to bind udp socket on port {port}")]
    UdpBind {
        /// The requested listen port
        port: u16,
        /// The underlying IO error
        #[error(source, std_err)]
        source: io::Error,
    },
}
