//! Shared reqwest plumbing: error classification and response decoding for
//! the HTTP store and the CI admin clients.

use serde_json::Value;
use std::{error::Error as StdError, fmt};

use labkeeper_core::api::{AdminError, StoreError};

const BODY_PREVIEW_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    Timeout,
    Connect,
    /// Anything else reqwest reports while sending or reading.
    Transport,
    Decode,
    Status,
}

impl HttpErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Transport => "transport",
            Self::Decode => "decode",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for HttpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct HttpError {
    kind: HttpErrorKind,
    status: Option<u16>,
    url: Option<String>,
    message: String,
    source: Option<anyhow::Error>,
}

impl HttpError {
    pub fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn from_reqwest(err: reqwest::Error, url: String) -> Self {
        let kind = if err.is_timeout() {
            HttpErrorKind::Timeout
        } else if err.is_connect() {
            HttpErrorKind::Connect
        } else if err.is_decode() {
            HttpErrorKind::Decode
        } else {
            HttpErrorKind::Transport
        };
        let status = err.status().map(|s| s.as_u16());
        let message = err.to_string();
        HttpError {
            kind,
            status,
            url: Some(url),
            message,
            source: Some(anyhow::Error::new(err)),
        }
    }

    fn status_error(status: u16, url: String, preview: String) -> Self {
        HttpError {
            kind: HttpErrorKind::Status,
            status: Some(status),
            url: Some(url),
            message: preview,
            source: None,
        }
    }

    fn decode_error(status: u16, url: String, err: serde_json::Error, preview: String) -> Self {
        let message = format!("failed to decode response body: {} | body={}", err, preview);
        HttpError {
            kind: HttpErrorKind::Decode,
            status: Some(status),
            url: Some(url),
            message,
            source: Some(anyhow::Error::new(err)),
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http error kind={}", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " status={}", status)?;
        }
        if let Some(url) = &self.url {
            write!(f, " url={}", url)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl StdError for HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|err| &**err as &(dyn StdError + 'static))
    }
}

impl From<HttpError> for StoreError {
    fn from(err: HttpError) -> Self {
        match err.kind {
            HttpErrorKind::Timeout => StoreError::Timeout(err.to_string()),
            HttpErrorKind::Connect => StoreError::Unavailable(err.to_string()),
            HttpErrorKind::Status => StoreError::Rejected {
                status: err.status.unwrap_or_default(),
                message: err.message,
            },
            HttpErrorKind::Decode => StoreError::InvalidDocument(err.to_string()),
            HttpErrorKind::Transport => StoreError::Io(err.to_string()),
        }
    }
}

impl From<HttpError> for AdminError {
    fn from(err: HttpError) -> Self {
        match err.kind {
            HttpErrorKind::Timeout => AdminError::Timeout(err.to_string()),
            HttpErrorKind::Connect | HttpErrorKind::Transport => {
                AdminError::Unreachable(err.to_string())
            }
            HttpErrorKind::Status => AdminError::Status {
                status: err.status.unwrap_or_default(),
                message: err.message,
            },
            HttpErrorKind::Decode => AdminError::Decode(err.to_string()),
        }
    }
}

pub fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    let mut out = String::new();
    let mut truncated = false;
    for (idx, ch) in trimmed.chars().enumerate() {
        if idx >= BODY_PREVIEW_LIMIT {
            truncated = true;
            break;
        }
        out.push(ch);
    }

    if truncated {
        out.push_str("...");
    }

    out
}

/// Status code plus the decoded body. Empty bodies decode to `null`; bodies
/// that are not JSON are kept as a string when `lenient` is set.
pub async fn read_json_response(
    resp: reqwest::Response,
    lenient: bool,
) -> Result<(u16, Value), HttpError> {
    let status = resp.status();
    let url = resp.url().to_string();
    let body = resp
        .text()
        .await
        .map_err(|err| HttpError::from_reqwest(err, url.clone()))?;

    if !status.is_success() {
        let preview = preview_body(&body);
        return Err(HttpError::status_error(status.as_u16(), url, preview));
    }

    if body.trim().is_empty() {
        return Ok((status.as_u16(), Value::Null));
    }

    match serde_json::from_str::<Value>(&body) {
        Ok(value) => Ok((status.as_u16(), value)),
        Err(_) if lenient => Ok((status.as_u16(), Value::String(preview_body(&body)))),
        Err(err) => {
            let preview = preview_body(&body);
            Err(HttpError::decode_error(status.as_u16(), url, err, preview))
        }
    }
}

pub async fn ensure_success(resp: reqwest::Response) -> Result<u16, HttpError> {
    let status = resp.status();
    let url = resp.url().to_string();

    if status.is_success() {
        return Ok(status.as_u16());
    }

    let body = resp
        .text()
        .await
        .map_err(|err| HttpError::from_reqwest(err, url.clone()))?;
    let preview = preview_body(&body);
    Err(HttpError::status_error(status.as_u16(), url, preview))
}
