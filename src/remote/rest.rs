//! The REST transport capability consumed by the remote filesystem.
//!
//! The HTTP client itself lives with the embedder; the adapter only needs
//! blocking request/response round-trips and a pollable byte source for
//! downloads.

use std::io;

use thiserror::Error;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// One outgoing REST request.
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RestRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The value of a named header, if set.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A pollable download body, shaped like the firmware HTTP clients this
/// adapter was written against: `available` bytes now, `done` when the
/// transaction has finished.
pub trait ByteSource {
    fn available(&mut self) -> usize;
    fn done(&mut self) -> bool;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

#[derive(Error, Debug)]
pub enum RestError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Blocking REST round-trips plus streaming GETs.
pub trait RestTransport {
    fn request(&mut self, req: &RestRequest) -> Result<RestResponse, RestError>;

    /// Begin a streaming GET; the response body arrives through the
    /// returned source.
    fn get_stream(
        &mut self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Box<dyn ByteSource>, RestError>;
}

/// Percent-encode everything outside the unreserved set.
pub fn url_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
