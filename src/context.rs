//! Request and response contexts.
//!
//! One [`Request`]/[`Response`] pair exists per in-flight request. Both
//! runtimes speak `http` types on the wire, so the contexts wrap
//! `http::request::Parts` plus a fully buffered body, and the framework sees
//! the same shape regardless of which runtime produced it.
//!
//! Handlers receive the pair as `Arc`s: the request is read-only apart from
//! the reserved path-parameter slot, the response carries its mutable state
//! behind a mutex. No lock is ever held across an await point.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use serde::de::DeserializeOwned;
use tracing::error;

use crate::error::AdapterError;

/// Body type both bridges hand to their runtime.
pub(crate) type ResponseBody = BoxBody<Bytes, std::io::Error>;

pub(crate) fn full_body(bytes: Bytes) -> ResponseBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

// ── Request ───────────────────────────────────────────────────────────────────

/// An incoming HTTP request with a fully buffered body.
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    /// Reserved extension slot for router-extracted path parameters. The
    /// bridge fills it at most once, before the handler chain runs.
    params: OnceLock<HashMap<String, String>>,
}

impl Request {
    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params: OnceLock::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, without query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The request hostname, from the URI authority or the `Host` header,
    /// without the port.
    pub fn hostname(&self) -> Option<String> {
        if let Some(host) = self.uri.host() {
            return Some(host.to_owned());
        }
        let host = self.headers.get(HOST)?.to_str().ok()?;
        let host = host.rsplit_once(':').map_or(host, |(h, _)| h);
        Some(host.to_owned())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the buffered body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AdapterError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Router-extracted path parameters. Empty until the bridge attaches them.
    pub fn params(&self) -> &HashMap<String, String> {
        static EMPTY: OnceLock<HashMap<String, String>> = OnceLock::new();
        self.params.get().unwrap_or_else(|| EMPTY.get_or_init(HashMap::new))
    }

    /// A named path parameter: for a route `/tags/:id`, `req.param("id")` on
    /// `/tags/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params().get(key).map(String::as_str)
    }

    /// Attaches router-extracted parameters. Set-at-most-once; a second call
    /// for the same request is ignored.
    pub(crate) fn set_params(&self, params: HashMap<String, String>) {
        let _ = self.params.set(params);
    }
}

// ── Reply payloads ────────────────────────────────────────────────────────────

/// A response body in the shapes the contract distinguishes.
///
/// Text, binary, and stream payloads pass through untouched; JSON values are
/// serialized at materialization time. An absent payload produces an empty
/// response, never the string `"null"`.
pub enum ReplyPayload {
    Text(String),
    Binary(Bytes),
    Json(serde_json::Value),
    Stream(ResponseBody),
}

impl From<&str> for ReplyPayload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for ReplyPayload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for ReplyPayload {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(b))
    }
}

impl From<Bytes> for ReplyPayload {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

impl From<serde_json::Value> for ReplyPayload {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl ReplyPayload {
    /// Serializes a value into a JSON payload.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, AdapterError> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    fn default_content_type(&self) -> &'static str {
        match self {
            Self::Text(_) => "text/plain; charset=utf-8",
            Self::Binary(_) | Self::Stream(_) => "application/octet-stream",
            Self::Json(_) => "application/json",
        }
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    payload: Option<ReplyPayload>,
    committed: bool,
}

/// The mutable response context for one request.
///
/// Defaults to `200 OK` with no headers and no body. Writers
/// ([`Response::reply`], [`Response::redirect`], [`Response::end`]) finalize
/// the response; header and status setters may be called before or instead.
pub struct Response {
    state: Mutex<ResponseState>,
}

impl Response {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ResponseState {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                payload: None,
                committed: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResponseState> {
        // A poisoned lock means a handler panicked mid-write; the response
        // state is still structurally sound, so keep serving.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> StatusCode {
        self.lock().status
    }

    pub fn set_status(&self, status: StatusCode) {
        self.lock().status = status;
    }

    /// Sets a header, replacing any existing values.
    pub fn set_header(&self, name: &str, value: &str) -> Result<(), AdapterError> {
        let (name, value) = parse_header(name, value)?;
        self.lock().headers.insert(name, value);
        Ok(())
    }

    /// Appends a header value without replacing existing ones — both values
    /// are present afterwards, standard append semantics for multi-valued
    /// headers such as `Set-Cookie`.
    pub fn append_header(&self, name: &str, value: &str) -> Result<(), AdapterError> {
        let (name, value) = parse_header(name, value)?;
        self.lock().headers.append(name, value);
        Ok(())
    }

    /// First value of a response header set so far.
    pub fn header(&self, name: &str) -> Option<String> {
        self.lock().headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
    }

    /// All values of a response header set so far.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.lock()
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_owned))
            .collect()
    }

    /// Whether the response has been finalized by a writer.
    pub fn headers_sent(&self) -> bool {
        self.lock().committed
    }

    /// Writes the response: status first (when given), then body.
    pub fn reply(
        &self,
        body: Option<ReplyPayload>,
        status: Option<StatusCode>,
    ) -> Result<(), AdapterError> {
        let mut state = self.lock();
        if let Some(status) = status {
            state.status = status;
        }
        state.payload = body;
        state.committed = true;
        Ok(())
    }

    /// Finalizes with an optional plain-text body, keeping the current status.
    pub fn end(&self, message: Option<String>) {
        let mut state = self.lock();
        state.payload = message.map(ReplyPayload::Text);
        state.committed = true;
    }

    /// Sets the exact redirect status, the `Location` header, and an empty
    /// body.
    pub fn redirect(&self, status: StatusCode, url: &str) -> Result<(), AdapterError> {
        let value = HeaderValue::from_str(url)
            .map_err(|_| AdapterError::Header(format!("invalid Location value `{url}`")))?;
        let mut state = self.lock();
        state.status = status;
        state.headers.insert(LOCATION, value);
        state.payload = None;
        state.committed = true;
        Ok(())
    }

    /// Materializes the accumulated state into a wire response. Applies a
    /// default `content-type` only when the handler set none.
    pub(crate) fn take_http(&self) -> http::Response<ResponseBody> {
        let (status, headers, payload) = {
            let mut state = self.lock();
            state.committed = true;
            (state.status, std::mem::take(&mut state.headers), state.payload.take())
        };

        let mut builder = http::Response::builder().status(status);
        if let Some(map) = builder.headers_mut() {
            *map = headers;
            if let Some(payload) = &payload {
                if !map.contains_key(CONTENT_TYPE) {
                    map.insert(CONTENT_TYPE, HeaderValue::from_static(payload.default_content_type()));
                }
            }
        }

        let body = match payload {
            None => full_body(Bytes::new()),
            Some(ReplyPayload::Text(s)) => full_body(Bytes::from(s)),
            Some(ReplyPayload::Binary(b)) => full_body(b),
            Some(ReplyPayload::Stream(s)) => s,
            Some(ReplyPayload::Json(v)) => match serde_json::to_vec(&v) {
                Ok(bytes) => full_body(Bytes::from(bytes)),
                Err(e) => {
                    error!("response serialization failed: {e}");
                    return plain_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "response serialization failed",
                    );
                }
            },
        };

        match builder.body(body) {
            Ok(response) => response,
            Err(e) => {
                // Unreachable with a status and headers that already parsed.
                error!("response build failed: {e}");
                plain_response(StatusCode::INTERNAL_SERVER_ERROR, "response build failed")
            }
        }
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), AdapterError> {
    let name = HeaderName::try_from(name)
        .map_err(|_| AdapterError::Header(format!("invalid header name `{name}`")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| AdapterError::Header(format!("invalid value for header `{name}`")))?;
    Ok((name, value))
}

/// A status + plain-text response, used for default error bodies.
pub(crate) fn plain_response(status: StatusCode, message: &str) -> http::Response<ResponseBody> {
    let mut response = http::Response::new(full_body(Bytes::from(message.to_owned())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, uri: &str, body: &[u8]) -> Request {
        let (parts, _) = http::Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "example.com:8080")
            .body(())
            .unwrap()
            .into_parts();
        Request::from_parts(parts, Bytes::copy_from_slice(body))
    }

    #[test]
    fn params_are_set_at_most_once() {
        let req = request(Method::GET, "/tags/42", b"");
        assert!(req.params().is_empty());

        req.set_params(HashMap::from([("id".to_owned(), "42".to_owned())]));
        req.set_params(HashMap::from([("id".to_owned(), "99".to_owned())]));
        assert_eq!(req.param("id"), Some("42"));
    }

    #[test]
    fn hostname_prefers_uri_then_host_header() {
        let req = request(Method::GET, "http://api.example.com/x", b"");
        assert_eq!(req.hostname().as_deref(), Some("api.example.com"));

        let req = request(Method::GET, "/x", b"");
        assert_eq!(req.hostname().as_deref(), Some("example.com"));
    }

    #[test]
    fn json_body_round_trips() {
        #[derive(serde::Deserialize)]
        struct Tag {
            name: String,
        }
        let req = request(Method::POST, "/api/tags", br#"{"name":"foo"}"#);
        let tag: Tag = req.json().unwrap();
        assert_eq!(tag.name, "foo");
    }

    #[test]
    fn append_header_keeps_both_values() {
        let res = Response::new();
        res.append_header("set-cookie", "a=1").unwrap();
        res.append_header("set-cookie", "b=2").unwrap();
        assert_eq!(res.header_values("set-cookie"), vec!["a=1", "b=2"]);

        let http = res.take_http();
        let values: Vec<_> = http.headers().get_all("set-cookie").iter().collect();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn set_header_replaces() {
        let res = Response::new();
        res.set_header("x-a", "1").unwrap();
        res.set_header("x-a", "2").unwrap();
        assert_eq!(res.header_values("x-a"), vec!["2"]);
    }

    #[test]
    fn reply_sets_status_before_body_and_defaults_content_type() {
        let res = Response::new();
        res.reply(Some(serde_json::json!({"id": 1}).into()), Some(StatusCode::CREATED)).unwrap();
        assert!(res.headers_sent());

        let http = res.take_http();
        assert_eq!(http.status(), StatusCode::CREATED);
        assert_eq!(http.headers().get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn absent_body_produces_an_empty_response() {
        let res = Response::new();
        res.reply(None, Some(StatusCode::NO_CONTENT)).unwrap();
        let http = res.take_http();
        assert_eq!(http.status(), StatusCode::NO_CONTENT);
        assert!(http.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn explicit_content_type_wins() {
        let res = Response::new();
        res.set_header("content-type", "application/xml").unwrap();
        res.reply(Some("<ok/>".into()), None).unwrap();
        let http = res.take_http();
        assert_eq!(http.headers().get(CONTENT_TYPE).unwrap(), "application/xml");
    }

    #[test]
    fn redirect_sets_exact_status_location_and_empty_body() {
        let res = Response::new();
        res.redirect(StatusCode::SEE_OTHER, "/moved").unwrap();
        let http = res.take_http();
        assert_eq!(http.status(), StatusCode::SEE_OTHER);
        assert_eq!(http.headers().get(LOCATION).unwrap(), "/moved");
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let res = Response::new();
        let err = res.set_header("bad header", "x").unwrap_err();
        assert!(matches!(err, AdapterError::Header(_)));
    }
}
