use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use n0_error::{anyerr, e, Result, StackResultExt, StdResultExt};
use tracing::{debug, warn};
use url::Url;

use crate::error::SetupError;

/// Total budget for one upstream round-trip, connect included.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Parses and validates the upstream base URL from the command line.
///
/// Only `http` and `https` targets are accepted; anything else is a fatal
/// configuration error.
pub fn parse_target(raw: &str) -> Result<Url, SetupError> {
    let url = Url::parse(raw).map_err(|source| {
        e!(SetupError::InvalidTarget {
            target: raw.to_string(),
            source
        })
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(e!(SetupError::UnsupportedScheme {
            scheme: scheme.to_string()
        })),
    }
}

/// Relays buffered wire-format HTTP requests to the configured upstream.
///
/// The bridge never surfaces transport problems to its caller: an
/// unparseable request becomes a synthesized 400, a timeout a 504, and any
/// other upstream failure a 502, all serialized into the same byte-buffer
/// shape as a real response.
#[derive(derive_more::Debug)]
pub struct HttpBridge {
    #[debug(skip)]
    client: reqwest::Client,
    target: Url,
}

impl HttpBridge {
    pub fn new(target: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .std_context("failed to build upstream http client")?;
        Ok(Self { client, target })
    }

    /// Performs one round-trip: parse `raw`, rewrite it at the configured
    /// target, forward, and serialize whatever comes back.
    pub async fn round_trip(&self, raw: &[u8]) -> Vec<u8> {
        let request = match RawRequest::parse(raw) {
            Ok(request) => request,
            Err(err) => {
                debug!("tunneled bytes are not an http request: {err:#}");
                return synthesize(StatusCode::BAD_REQUEST);
            }
        };
        debug!(method = %request.method, "forwarding tunneled request upstream");
        match self.forward(request).await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                warn!("upstream request timed out");
                synthesize(StatusCode::GATEWAY_TIMEOUT)
            }
            Err(err) => {
                warn!("upstream request failed: {err:#}");
                synthesize(StatusCode::BAD_GATEWAY)
            }
        }
    }

    async fn forward(&self, request: RawRequest) -> reqwest::Result<Vec<u8>> {
        // Scheme, authority, and path all come from the configured target;
        // only the client's query string survives the rewrite.
        let mut url = self.target.clone();
        if let Some((_, query)) = request.target.split_once('?') {
            url.set_query(Some(query));
        }
        let mut headers = request.headers;
        headers.remove(http::header::HOST);

        let response = self
            .client
            .request(request.method, url)
            .headers(headers)
            .body(request.body)
            .send()
            .await?;
        serialize_response(response).await
    }
}

/// A request parsed out of the tunneled byte buffer.
struct RawRequest {
    method: Method,
    /// Request target exactly as it appeared on the request line.
    target: String,
    headers: HeaderMap<HeaderValue>,
    body: Bytes,
}

impl RawRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut headers);
        let header_len = match req.parse(buf).std_context("invalid http request")? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Err(anyerr!("truncated http request")),
        };
        let method: Method = req
            .method
            .context("missing http method")?
            .parse()
            .std_context("invalid http method")?;
        let target = req.path.context("missing request target")?.to_string();
        let headers = HeaderMap::from_iter(req.headers.iter_mut().flat_map(|h| {
            let value = HeaderValue::from_bytes(h.value).ok()?;
            let name = http::HeaderName::from_bytes(h.name.as_bytes()).ok()?;
            Some((name, value))
        }));
        Ok(Self {
            method,
            target,
            headers,
            body: Bytes::copy_from_slice(&buf[header_len..]),
        })
    }
}

/// Serializes an upstream response back into HTTP/1.1 wire bytes.
///
/// The body has already been collected, so Transfer-Encoding is dropped and
/// Content-Length rewritten to the actual length.
async fn serialize_response(response: reqwest::Response) -> reqwest::Result<Vec<u8>> {
    let status = response.status();
    let mut headers = response.headers().clone();
    let body = response.bytes().await?;
    headers.remove(http::header::TRANSFER_ENCODING);
    headers.remove(http::header::CONTENT_LENGTH);

    let mut out = Vec::with_capacity(body.len() + 256);
    out.extend_from_slice(status_line(status).as_bytes());
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}

/// A locally fabricated response carrying nothing but a status.
fn synthesize(status: StatusCode) -> Vec<u8> {
    format!("{}Content-Length: 0\r\n\r\n", status_line(status)).into_bytes()
}
