use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zphh_contracts::config::PluginConfig;
use zphh_contracts::message::MessageContext;

use crate::transport::{HttpTransport, Method, OutboundRequest, RequestBody};
use crate::truncate_text;

const LOCAL_READ_ATTEMPTS: u32 = 3;
const DOWNLOAD_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36";

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("message carries no image data")]
    NoData,
    #[error("failed reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed downloading {url}: {message}")]
    Download { url: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredImage {
    pub bytes: Vec<u8>,
    pub path: PathBuf,
}

/// Turns an inbound image message into bytes on disk.
pub struct ImageAcquirer {
    transport: Arc<dyn HttpTransport>,
    work_dir: PathBuf,
    download_timeout: Duration,
    settle_delay: Duration,
}

impl ImageAcquirer {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &PluginConfig) -> Self {
        Self {
            transport,
            work_dir: config.work_dir(),
            download_timeout: config.request_timeout(),
            settle_delay: config.settle_delay(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn acquire(&self, context: &mut MessageContext) -> Result<AcquiredImage, AcquireError> {
        self.prepare(context);
        let location = context.content.trim();
        if location.is_empty() {
            return Err(AcquireError::NoData);
        }
        if is_remote(location) {
            return self.download(location);
        }
        self.read_local(Path::new(location))
    }

    /// Runs the host's prepare hook once per message, then gives the
    /// filesystem a moment to settle.
    fn prepare(&self, context: &mut MessageContext) {
        if context.prepared {
            return;
        }
        let Some(attachment) = context.attachment.clone() else {
            return;
        };
        if let Err(err) = attachment.prepare() {
            warn!("attachment prepare hook failed: {err:#}");
        }
        context.prepared = true;
        if !self.settle_delay.is_zero() {
            thread::sleep(self.settle_delay);
        }
    }

    fn read_local(&self, path: &Path) -> Result<AcquiredImage, AcquireError> {
        let mut last_error = AcquireError::NoData;
        for attempt in 1..=LOCAL_READ_ATTEMPTS {
            match fs::read(path) {
                Ok(bytes) if !bytes.is_empty() => {
                    debug!(path = %path.display(), bytes = bytes.len(), attempt, "image read");
                    return Ok(AcquiredImage {
                        bytes,
                        path: path.to_path_buf(),
                    });
                }
                Ok(_) => last_error = AcquireError::NoData,
                Err(source) => {
                    last_error = AcquireError::Io {
                        path: path.to_path_buf(),
                        source,
                    }
                }
            }
            if attempt < LOCAL_READ_ATTEMPTS {
                debug!(path = %path.display(), attempt, "image not readable yet, retrying");
                thread::sleep(self.settle_delay.max(Duration::from_millis(100)));
            }
        }
        warn!(path = %path.display(), "giving up on image: {last_error}");
        Err(last_error)
    }

    fn download(&self, url: &str) -> Result<AcquiredImage, AcquireError> {
        let download_error = |message: String| AcquireError::Download {
            url: url.to_string(),
            message,
        };
        let request = OutboundRequest {
            method: Method::Get,
            url: url.to_string(),
            headers: vec![("User-Agent".to_string(), DOWNLOAD_USER_AGENT.to_string())],
            body: RequestBody::Empty,
            timeout: self.download_timeout,
        };
        let response = self
            .transport
            .execute(request)
            .map_err(|err| download_error(err.to_string()))?;
        let status = response.status;
        let success = response.is_success();
        let bytes = response
            .into_bytes()
            .map_err(|err| download_error(format!("body read failed: {err}")))?;
        if !success {
            return Err(download_error(format!(
                "HTTP {status}: {}",
                truncate_text(&String::from_utf8_lossy(&bytes), 200)
            )));
        }
        if bytes.is_empty() {
            return Err(AcquireError::NoData);
        }

        let path = self
            .work_dir
            .join(downloaded_file_name(&bytes, extension_from_url(url)));
        let write = fs::create_dir_all(&self.work_dir).and_then(|_| fs::write(&path, &bytes));
        if let Err(source) = write {
            return Err(AcquireError::Io { path, source });
        }
        info!(url, path = %path.display(), bytes = bytes.len(), "image downloaded");
        Ok(AcquiredImage { bytes, path })
    }
}

fn is_remote(location: &str) -> bool {
    let lowered = location.to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

fn extension_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let name = path.rsplit('/').next().unwrap_or_default();
    match name.rsplit_once('.') {
        Some((_, ext))
            if !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|ch| ch.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => "png",
    }
}

/// `img-<first 16 hex chars of sha256>.<ext>`, stable for identical bytes.
pub fn downloaded_file_name(bytes: &[u8], extension: &str) -> String {
    let digest = hex::encode(Sha256::digest(bytes));
    format!("img-{}.{}", &digest[..16], extension.to_ascii_lowercase())
}
