//! The abstract `Message` fields and the concrete `Request`/`Response` types
//! (spec §3).

use crate::headers::Headers;

/// Fields shared by `Request` and `Response`.
pub trait HttpMessage {
    fn http_version(&self) -> &[u8];
    fn headers(&self) -> &Headers;
    fn headers_mut(&mut self) -> &mut Headers;
    fn content(&self) -> Option<&[u8]>;
    fn set_content(&mut self, content: Option<Vec<u8>>);
    fn timestamp_start(&self) -> f64;
    fn timestamp_end(&self) -> Option<f64>;
    fn set_timestamp_end(&mut self, ts: f64);
}

#[derive(Debug, Clone)]
pub struct Request {
    pub host: String,
    pub port: u16,
    pub method: Vec<u8>,
    pub scheme: Vec<u8>,
    pub authority: Vec<u8>,
    pub path: Vec<u8>,
    pub http_version: Vec<u8>,
    pub headers: Headers,
    pub content: Option<Vec<u8>>,
    pub trailers: Option<Headers>,
    pub timestamp_start: f64,
    pub timestamp_end: Option<f64>,
}

impl Request {
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case(b"CONNECT")
    }

    /// Whether the target was given in absolute form (`scheme://host/path`),
    /// i.e. this is a forward-proxy request rather than an origin-form one.
    pub fn is_absolute_form(&self) -> bool {
        !self.scheme.is_empty()
    }

    pub fn first_line_bytes(&self) -> Vec<u8> {
        let target: Vec<u8> = if self.is_connect() {
            self.authority.clone()
        } else if self.is_absolute_form() {
            format!(
                "{}://{}{}",
                String::from_utf8_lossy(&self.scheme),
                String::from_utf8_lossy(&self.authority),
                String::from_utf8_lossy(&self.path),
            )
            .into_bytes()
        } else {
            self.path.clone()
        };
        let mut out = self.method.clone();
        out.push(b' ');
        out.extend_from_slice(&target);
        out.push(b' ');
        out.extend_from_slice(&self.http_version);
        out
    }
}

impl HttpMessage for Request {
    fn http_version(&self) -> &[u8] {
        &self.http_version
    }
    fn headers(&self) -> &Headers {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
    fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }
    fn set_content(&mut self, content: Option<Vec<u8>>) {
        self.content = content;
    }
    fn timestamp_start(&self) -> f64 {
        self.timestamp_start
    }
    fn timestamp_end(&self) -> Option<f64> {
        self.timestamp_end
    }
    fn set_timestamp_end(&mut self, ts: f64) {
        self.timestamp_end = Some(ts);
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub http_version: Vec<u8>,
    pub status_code: u16,
    pub reason: Vec<u8>,
    pub headers: Headers,
    pub content: Option<Vec<u8>>,
    pub trailers: Option<Headers>,
    pub timestamp_start: f64,
    pub timestamp_end: Option<f64>,
}

impl Response {
    pub fn status_line_bytes(&self) -> Vec<u8> {
        let mut out = self.http_version.clone();
        out.push(b' ');
        out.extend_from_slice(self.status_code.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(&self.reason);
        out
    }
}

impl HttpMessage for Response {
    fn http_version(&self) -> &[u8] {
        &self.http_version
    }
    fn headers(&self) -> &Headers {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
    fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }
    fn set_content(&mut self, content: Option<Vec<u8>>) {
        self.content = content;
    }
    fn timestamp_start(&self) -> f64 {
        self.timestamp_start
    }
    fn timestamp_end(&self) -> Option<f64> {
        self.timestamp_end
    }
    fn set_timestamp_end(&mut self, ts: f64) {
        self.timestamp_end = Some(ts);
    }
}
