//! Request snapshots shared by inspection workers
//!
//! An inbound body can be read once. [`RequestSnapshot::capture`] drains it
//! into an immutable [`Bytes`] buffer and hands back a request whose body
//! replays that buffer, so the origin still receives the original payload.

use super::error::{WafError, WafResult};
use bytes::Bytes;
use http::{header, HeaderMap, Method, Request, Uri, Version};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use std::borrow::Cow;
use std::fmt::Display;
use std::net::SocketAddr;

/// Immutable copy of a request body plus its declared content type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSnapshot {
    body: Bytes,
    content_type: String,
}

impl RequestSnapshot {
    /// Create a snapshot from an already buffered body
    pub fn new(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    /// Drain the body of `request` and return the snapshot together with a
    /// request that replays the same bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WafError::BodyRead`] if the body stream fails. A failed read
    /// is never reported as an empty body.
    pub async fn capture<B>(request: Request<B>) -> WafResult<(Self, Request<Full<Bytes>>)>
    where
        B: Body,
        B::Error: Display,
    {
        let (parts, body) = request.into_parts();
        let content_type = header_str(&parts.headers, header::CONTENT_TYPE).to_string();

        let body = body
            .collect()
            .await
            .map_err(|e| WafError::BodyRead(e.to_string()))?
            .to_bytes();

        let replay = Request::from_parts(parts, Full::new(body.clone()));
        Ok((Self { body, content_type }, replay))
    }

    /// Raw body bytes
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Declared `Content-Type`, empty when absent
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Body length in bytes
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Read-only view of one request as seen by every inspection worker
#[derive(Debug, Clone)]
pub struct InspectedRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    snapshot: RequestSnapshot,
}

impl InspectedRequest {
    /// Capture a streaming request. See [`RequestSnapshot::capture`].
    ///
    /// # Errors
    ///
    /// Returns [`WafError::BodyRead`] if the body cannot be drained.
    pub async fn capture<B>(
        request: Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> WafResult<(Self, Request<Full<Bytes>>)>
    where
        B: Body,
        B::Error: Display,
    {
        let (snapshot, replay) = RequestSnapshot::capture(request).await?;
        let inspected = Self {
            method: replay.method().clone(),
            uri: replay.uri().clone(),
            version: replay.version(),
            headers: replay.headers().clone(),
            remote_addr,
            snapshot,
        };
        Ok((inspected, replay))
    }

    /// Build from a request whose body is already in memory
    pub fn from_request<T: Into<Bytes>>(request: Request<T>, remote_addr: Option<SocketAddr>) -> Self {
        let (parts, body) = request.into_parts();
        let content_type = header_str(&parts.headers, header::CONTENT_TYPE).to_string();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            remote_addr,
            snapshot: RequestSnapshot::new(body, content_type),
        }
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URI
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Protocol version
    pub fn version(&self) -> Version {
        self.version
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Remote peer address, if the transport supplied one
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Body snapshot
    pub fn snapshot(&self) -> &RequestSnapshot {
        &self.snapshot
    }

    /// Percent-decoded path. Bytes that are not UTF-8 become U+FFFD.
    pub fn path(&self) -> Cow<'_, str> {
        percent_decode(self.uri.path())
    }

    /// Undecoded path as sent on the wire
    pub fn raw_path(&self) -> &str {
        self.uri.path()
    }

    /// Undecoded query string, empty when absent
    pub fn raw_query(&self) -> &str {
        self.uri.query().unwrap_or_default()
    }

    /// Host from the URI authority, falling back to the `Host` header
    pub fn host(&self) -> &str {
        self.uri
            .host()
            .unwrap_or_else(|| header_str(&self.headers, header::HOST))
    }

    /// Cookies in request order
    pub fn cookies(&self) -> Vec<(&str, &str)> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| {
                let pair = pair.trim();
                if pair.is_empty() {
                    return None;
                }
                Some(pair.split_once('=').unwrap_or((pair, "")))
            })
            .collect()
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Decode a form or query value (`+` as space, percent escapes).
///
/// Malformed escapes stay literal. Decoded bytes that are not UTF-8 become
/// U+FFFD; the rest of the value is still decoded.
pub(crate) fn unescape_value(raw: &str) -> Cow<'_, str> {
    if !raw.contains('+') {
        return percent_decode(raw);
    }
    Cow::Owned(percent_decode(&raw.replace('+', " ")).into_owned())
}

fn percent_decode(raw: &str) -> Cow<'_, str> {
    if !raw.contains('%') {
        return Cow::Borrowed(raw);
    }
    let bytes = urlencoding::decode_binary(raw.as_bytes());
    Cow::Owned(String::from_utf8_lossy(&bytes).into_owned())
}
