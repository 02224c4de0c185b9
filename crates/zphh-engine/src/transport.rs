use std::fmt;
use std::io::Read;
use std::time::Duration;

use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MultipartField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(Vec<MultipartField>),
}

impl RequestBody {
    /// Content type the provider headers should advertise. Multipart bodies
    /// carry their own boundary, so they leave the header to the transport.
    pub fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty | Self::Json(_) => Some("application/json;charset=UTF-8"),
            Self::Multipart(_) => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: Duration,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub struct TransportResponse {
    pub status: u16,
    body: Box<dyn Read + Send>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Read + Send + 'static) -> Self {
        Self {
            status,
            body: Box::new(body),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.body
    }

    pub fn into_bytes(mut self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.body.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Network-level failure: nothing usable came back.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },
    #[error("request to {url} failed: {message}")]
    Other { url: String, message: String },
}

pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by a blocking reqwest client.
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    /// Request deadlines are set per call; only connecting is bounded here.
    pub fn new(connect_timeout: Duration) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| anyhow::anyhow!("failed building HTTP client: {err}"))?;
        Ok(Self { http })
    }

    fn multipart_form(url: &str, fields: Vec<MultipartField>) -> Result<MultipartForm, TransportError> {
        let mut form = MultipartForm::new();
        for field in fields {
            form = match field {
                MultipartField::Text { name, value } => form.text(name, value),
                MultipartField::File {
                    name,
                    file_name,
                    mime,
                    bytes,
                } => {
                    let part = MultipartPart::bytes(bytes)
                        .file_name(file_name)
                        .mime_str(&mime)
                        .map_err(|err| TransportError::Other {
                            url: url.to_string(),
                            message: format!("invalid multipart mime '{mime}': {err}"),
                        })?;
                    form.part(name, part)
                }
            };
        }
        Ok(form)
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let OutboundRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = request;
        let method = match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };
        let mut builder = self.http.request(method, &url).timeout(timeout);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(fields) => builder.multipart(Self::multipart_form(&url, fields)?),
        };
        let response = builder.send().map_err(|err| classify_reqwest_error(&url, err))?;
        let status = response.status().as_u16();
        Ok(TransportResponse::new(status, response))
    }
}

fn classify_reqwest_error(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout {
            url: url.to_string(),
        };
    }
    if err.is_connect() {
        return TransportError::Connect {
            url: url.to_string(),
            message: err.to_string(),
        };
    }
    TransportError::Other {
        url: url.to_string(),
        message: err.to_string(),
    }
}
