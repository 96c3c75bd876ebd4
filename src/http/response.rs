//! HTTP/1.1 response builder and serializer.

use bytes::{BufMut, BytesMut};

use super::{Headers, StatusCode};

/// An HTTP/1.1 response.
///
/// Built fluently by handlers, decorated in place by middleware on the way back
/// out of the pipeline, and finally serialized by the server with
/// [`into_bytes`](Self::into_bytes).
///
/// # Examples
///
/// ```
/// use waypoint::http::{Response, StatusCode};
///
/// let response = Response::json(StatusCode::Ok, serde_json::json!({ "status": "healthy" }));
/// assert_eq!(response.headers().get("content-type"), Some("application/json"));
///
/// let text = String::from_utf8(response.into_bytes().to_vec()).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.ends_with(r#"{"status":"healthy"}"#));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    /// Creates a response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    /// Plain-text response whose body is the status line, e.g. `404 Not Found`.
    pub fn status_page(status: StatusCode) -> Self {
        Self::new(status).body(status.to_string())
    }

    /// JSON response with `Content-Type: application/json`.
    pub fn json(status: StatusCode, value: serde_json::Value) -> Self {
        Self::new(status)
            .header("Content-Type", "application/json")
            .body(value.to_string())
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in place, for middleware decorating a downstream response.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Replaces any existing values for `name` in place.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The raw body bytes.
    pub fn content(&self) -> &[u8] {
        &self.body
    }

    /// The body as UTF-8, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Serializes the response using HTTP/1.1 wire format.
    ///
    /// Adds `Content-Type: text/plain; charset=utf-8` for non-empty bodies without a
    /// content type, a `Connection` header, and always `Content-Length`.
    pub fn into_bytes(self) -> BytesMut {
        self.serialize(true)
    }

    /// Serializes the response to a `HEAD` request: the same head as
    /// [`into_bytes`](Self::into_bytes), `Content-Length` included, but no body.
    pub fn into_head_bytes(self) -> BytesMut {
        self.serialize(false)
    }

    fn serialize(mut self, with_body: bool) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + content_length);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(&b"\r\n"[..]);
        if with_body {
            buf.put(self.body.as_slice());
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(response: Response) -> String {
        String::from_utf8(response.into_bytes().to_vec()).unwrap()
    }

    #[test]
    fn head_bytes_keep_content_length_but_drop_the_body() {
        let s = String::from_utf8(
            Response::new(StatusCode::Ok).body("BODYBYTES").into_head_bytes().to_vec(),
        )
        .unwrap();
        assert!(s.contains("Content-Length: 9\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
        assert!(!s.contains("BODYBYTES"));
    }

    #[test]
    fn simple_ok_response() {
        let s = wire(Response::new(StatusCode::Ok).body("Hello"));
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn empty_body_has_no_content_type() {
        let s = wire(Response::new(StatusCode::NoContent));
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn connection_close() {
        let s = wire(Response::new(StatusCode::Ok).keep_alive(false));
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn status_page_body_is_status_line() {
        let r = Response::status_page(StatusCode::MethodNotAllowed);
        assert_eq!(r.text(), "405 Method Not Allowed");
    }

    #[test]
    fn set_header_overrides_previous_value() {
        let mut r = Response::new(StatusCode::Ok).header("X-RateLimit-Remaining", "9");
        r.set_header("x-ratelimit-remaining", "8");
        assert_eq!(
            r.headers().get_all("X-RateLimit-Remaining").collect::<Vec<_>>(),
            vec!["8"]
        );
    }

    #[test]
    fn unknown_status_serializes_numeric_code() {
        let s = wire(Response::new(StatusCode::Other(418)));
        assert!(s.starts_with("HTTP/1.1 418 Unknown\r\n"));
    }
}
