use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};
use uuid::Uuid;
use zphh_contracts::config::PluginConfig;
use zphh_contracts::envelope::{envelope_summary, Envelope, EnvelopeError};

use crate::credentials::CredentialManager;
use crate::transport::{
    HttpTransport, Method, MultipartField, OutboundRequest, RequestBody, TransportResponse,
};
use crate::truncate_text;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36";
const EXP_GROUPS: &str = "na_android_config:exp:NA,mainchat_funcall:exp:A,chat_aisearch:exp:A,mainchat_rag:exp:A,mainchat_searchengine:exp:bing,na_4o_config:exp:4o_A,chat_live_4o:exp:A,na_glm4plus_config:exp:open,mainchat_server:exp:A,mainchat_browser:exp:new,mainchat_server_app:exp:A,mobile_history_daycheck:exp:a,mainchat_sug:exp:A";
const SEC_CH_UA: &str = r#""Google Chrome";v="129", "Not=A?Brand";v="8", "Chromium";v="129""#;

fn random_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Full browser-like header set the provider expects on every call.
///
/// Device and request ids are regenerated each time, so callers must build
/// headers per attempt rather than reuse them.
pub fn provider_headers(bearer: &str, content_type: Option<&str>) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = vec![
        ("Accept", "application/json, text/plain, */*"),
        ("Accept-Language", "zh-CN,zh;q=0.9"),
        ("App-Name", "chatglm"),
        ("Origin", "https://chatglm.cn"),
        ("Sec-Fetch-Dest", "empty"),
        ("Sec-Fetch-Mode", "cors"),
        ("Sec-Fetch-Site", "same-origin"),
        ("User-Agent", USER_AGENT),
        ("X-App-Platform", "pc"),
        ("X-App-Version", "0.0.1"),
        ("X-Device-Brand", ""),
        ("X-Device-Model", ""),
        ("X-Exp-Groups", EXP_GROUPS),
        ("sec-ch-ua", SEC_CH_UA),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect();
    headers.push(("Authorization".to_string(), format!("Bearer {bearer}")));
    headers.push(("X-Device-Id".to_string(), random_id()));
    headers.push(("X-Request-Id".to_string(), random_id()));
    if let Some(content_type) = content_type {
        headers.push(("Content-Type".to_string(), content_type.to_string()));
    }
    headers
}

fn merge_headers(headers: &mut Vec<(String, String)>, extra: &[(String, String)]) {
    for (name, value) in extra {
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        headers.push((name.clone(), value.clone()));
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{method} {url} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        method: Method,
        url: String,
        attempts: u32,
        last_error: String,
    },
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Status {
        method: Method,
        url: String,
        status: u16,
        body: String,
    },
    #[error("{method} {url} still unauthorized after {attempts} attempts")]
    Unauthorized {
        method: Method,
        url: String,
        attempts: u32,
    },
}

/// Failure of a JSON endpoint call: either the request never produced a
/// usable response, or the envelope inside it was not a success.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("failed reading response body: {0}")]
    Body(#[from] std::io::Error),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// One provider call. Only the URL and body are business data; everything
/// else has gateway defaults.
#[derive(Clone, Debug)]
pub struct ApiCall {
    method: Method,
    url: String,
    body: RequestBody,
    content_type: Option<String>,
    extra_headers: Vec<(String, String)>,
    retries: Option<u32>,
    timeout: Option<Duration>,
}

impl ApiCall {
    pub fn new(method: Method, url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method,
            url: url.into(),
            body,
            content_type: None,
            extra_headers: Vec::new(),
            retries: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url, RequestBody::Empty)
    }

    pub fn post_json(url: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(Method::Post, url, RequestBody::Json(payload))
    }

    pub fn post_multipart(url: impl Into<String>, fields: Vec<MultipartField>) -> Self {
        Self::new(Method::Post, url, RequestBody::Multipart(fields))
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub struct Gateway {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<CredentialManager>,
    retries: u32,
    backoff: Duration,
    timeout: Duration,
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<CredentialManager>,
        config: &PluginConfig,
    ) -> Self {
        Self {
            transport,
            credentials,
            retries: config.request_retries,
            backoff: config.retry_backoff(),
            timeout: config.request_timeout(),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// Sends `call`, retrying network failures and recovering from one
    /// expired token per attempt via a credential refresh.
    pub fn request(&self, call: &ApiCall) -> Result<TransportResponse, GatewayError> {
        let attempts = call.retries.unwrap_or(self.retries).max(1);
        let timeout = call.timeout.unwrap_or(self.timeout);
        let content_type = call
            .content_type
            .as_deref()
            .or_else(|| call.body.default_content_type());
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let has_more = attempt + 1 < attempts;
            let mut headers = provider_headers(&self.credentials.access_token(), content_type);
            merge_headers(&mut headers, &call.extra_headers);
            let outbound = OutboundRequest {
                method: call.method,
                url: call.url.clone(),
                headers,
                body: call.body.clone(),
                timeout,
            };

            let response = match self.transport.execute(outbound) {
                Ok(response) => response,
                Err(err) => {
                    last_error = err.to_string();
                    if has_more {
                        warn!(
                            url = %call.url,
                            attempt = attempt + 1,
                            attempts,
                            "transport failure, retrying: {err}"
                        );
                        thread::sleep(self.backoff);
                        continue;
                    }
                    error!(url = %call.url, attempts, "request failed after retries: {err}");
                    return Err(GatewayError::Exhausted {
                        method: call.method,
                        url: call.url.clone(),
                        attempts,
                        last_error,
                    });
                }
            };

            if response.status == 401 {
                if !has_more {
                    error!(url = %call.url, attempts, "request still unauthorized");
                    return Err(GatewayError::Unauthorized {
                        method: call.method,
                        url: call.url.clone(),
                        attempts,
                    });
                }
                warn!(url = %call.url, attempt = attempt + 1, "unauthorized, refreshing access token");
                if self.credentials.refresh() {
                    continue;
                }
                last_error = "HTTP 401 and token refresh failed".to_string();
                thread::sleep(self.backoff);
                continue;
            }

            if !response.is_success() {
                let status = response.status;
                let body = response
                    .into_bytes()
                    .map(|bytes| truncate_text(&String::from_utf8_lossy(&bytes), 512))
                    .unwrap_or_default();
                error!(url = %call.url, status, "provider returned error status: {body}");
                return Err(GatewayError::Status {
                    method: call.method,
                    url: call.url.clone(),
                    status,
                    body,
                });
            }

            debug!(url = %call.url, status = response.status, attempt = attempt + 1, "request succeeded");
            return Ok(response);
        }

        Err(GatewayError::Exhausted {
            method: call.method,
            url: call.url.clone(),
            attempts,
            last_error,
        })
    }

    /// Sends `call` and unwraps the typed `result` of its JSON envelope.
    pub fn call_envelope<T: DeserializeOwned>(&self, call: &ApiCall) -> Result<T, ApiError> {
        let body = self.request(call)?.into_bytes()?;
        Envelope::<T>::parse(&body)
            .and_then(Envelope::into_result)
            .map_err(|err| {
                error!(
                    url = %call.url,
                    envelope = %envelope_summary(&body, 512),
                    "provider envelope rejected: {err}"
                );
                ApiError::Envelope(err)
            })
    }
}
