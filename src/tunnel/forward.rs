//! Local forwarder — turns a [`RequestFrame`] into a real HTTP/1.1 call
//! against the loopback service and the reply into a [`ResponseFrame`].
//!
//! Failures are returned as [`ForwardError`]; the dispatcher reports them to
//! the relay. Nothing is retried at this hop.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue as HttpHeaderValue, CONTENT_LENGTH, HOST, TRANSFER_ENCODING,
};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use super::frame::{canonical_header_name, HeaderValue, RequestFrame, ResponseFrame};

/// Host every forwarded request is addressed to, and the `Host` header it carries.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("illegal base64 data in request body: {0}")]
    InvalidBody(#[from] base64::DecodeError),
    #[error("invalid method {0:?}")]
    InvalidMethod(String),
    #[error("invalid request path {0:?}")]
    InvalidPath(String),
    #[error("invalid header {0:?}")]
    InvalidHeader(String),
    #[error("{}", crate::util::error_chain(.0))]
    Request(#[from] hyper_util::client::legacy::Error),
    #[error("reading local response body: {0}")]
    Body(#[source] hyper::Error),
    #[error("local request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Decode a frame body. An empty string is an empty body.
pub fn decode_body(encoded: &str) -> Result<Vec<u8>, ForwardError> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    Ok(BASE64.decode(encoded)?)
}

pub fn encode_body(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Executes frames against `127.0.0.1:<port>` over a pooled HTTP/1.1 client.
#[derive(Clone)]
pub struct LocalForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    port: u16,
    timeout: Duration,
}

impl LocalForwarder {
    pub fn new(port: u16, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            port,
            timeout,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Build the loopback request for `frame` without sending it.
    ///
    /// A string header value replaces, a list appends one occurrence per
    /// element. `Host` is always [`LOOPBACK_HOST`]; `Content-Length` and
    /// `Transfer-Encoding` follow the decoded body rather than the frame.
    pub fn build_request(&self, frame: &RequestFrame) -> Result<Request<Full<Bytes>>, ForwardError> {
        let body = decode_body(frame.body.as_deref().unwrap_or_default())?;

        let method = Method::from_bytes(frame.method_or_default().as_bytes())
            .map_err(|_| ForwardError::InvalidMethod(frame.method.clone()))?;

        // Anything else could move the authority off loopback (e.g. "@host/").
        if !(frame.path.is_empty() || frame.path.starts_with('/') || frame.path.starts_with('?')) {
            return Err(ForwardError::InvalidPath(frame.path.clone()));
        }
        let uri: Uri = format!("http://{LOOPBACK_HOST}:{}{}", self.port, frame.path)
            .parse()
            .map_err(|_| ForwardError::InvalidPath(frame.path.clone()))?;

        let mut request = Request::new(Full::new(Bytes::from(body)));
        *request.method_mut() = method;
        *request.uri_mut() = uri;

        let headers = request.headers_mut();
        for (name, value) in &frame.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ForwardError::InvalidHeader(name.clone()))?;
            if header == HOST || header == CONTENT_LENGTH || header == TRANSFER_ENCODING {
                continue;
            }
            match value {
                HeaderValue::Single(v) => {
                    headers.insert(header, header_value(name, v)?);
                }
                HeaderValue::Multi(values) => {
                    for v in values {
                        headers.append(header.clone(), header_value(name, v)?);
                    }
                }
            }
        }
        headers.insert(HOST, HttpHeaderValue::from_static(LOOPBACK_HOST));

        Ok(request)
    }

    /// Send `frame` to the local service and capture the full response.
    ///
    /// The timeout covers connecting, the response head and the body.
    pub async fn forward(&self, frame: &RequestFrame) -> Result<ResponseFrame, ForwardError> {
        let request = self.build_request(frame)?;

        let exchange = async {
            let response = self.client.request(request).await?;
            let (parts, body) = response.into_parts();
            let bytes = body.collect().await.map_err(ForwardError::Body)?.to_bytes();
            Ok::<_, ForwardError>((parts, bytes))
        };
        let (parts, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ForwardError::Timeout(self.timeout))??;

        Ok(ResponseFrame::success(
            frame.id.clone(),
            parts.status.as_u16(),
            collect_headers(&parts.headers),
            encode_body(&bytes),
        ))
    }
}

fn header_value(name: &str, value: &str) -> Result<HttpHeaderValue, ForwardError> {
    HttpHeaderValue::from_str(value).map_err(|_| ForwardError::InvalidHeader(name.to_string()))
}

/// Every response header, repeats preserved in order, keyed by canonical name.
fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        out.entry(canonical_header_name(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}
