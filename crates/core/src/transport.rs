use std::future::Future;
use std::pin::Pin;

use serde::de::DeserializeOwned;

use crate::api::{ChunkBody, InitiateBody, InitiateRequest, StatusBody};
use crate::{Error, Result};

/// Anti-forgery header checked by the server on mutating requests.
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Normalized reply: `ok` mirrors the HTTP status class, `body` is the parsed
/// JSON payload. Error bodies still parse (the server always sends
/// `{status, message}` JSON) so callers can surface the server's message.
#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub ok: bool,
    pub body: T,
}

/// The three requests the upload flow performs. Kept behind a trait so tests
/// drive the session and poller with scripted replies instead of a server.
pub trait Transport {
    fn initiate<'a>(
        &'a self,
        request: InitiateRequest,
        auth_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Reply<InitiateBody>>> + Send + 'a>>;

    fn upload_chunk<'a>(
        &'a self,
        server_id: &'a str,
        chunk_index: u32,
        bytes: Vec<u8>,
        auth_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Reply<ChunkBody>>> + Send + 'a>>;

    fn get_status<'a>(
        &'a self,
        task_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Reply<StatusBody>>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub base_url: String,
}

pub struct HttpTransport {
    config: HttpTransportConfig,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

impl Transport for HttpTransport {
    fn initiate<'a>(
        &'a self,
        request: InitiateRequest,
        auth_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Reply<InitiateBody>>> + Send + 'a>> {
        Box::pin(async move {
            let res = self
                .client
                .post(self.url("initiate-upload"))
                .header(CSRF_HEADER, auth_token)
                .json(&request)
                .send()
                .await
                .map_err(|e| Error::Transport {
                    message: format!("initiate request failed: {e}"),
                })?;
            read_reply("initiate", res).await
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        server_id: &'a str,
        chunk_index: u32,
        bytes: Vec<u8>,
        auth_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Reply<ChunkBody>>> + Send + 'a>> {
        Box::pin(async move {
            let part = reqwest::multipart::Part::bytes(bytes).file_name("blob");
            let form = reqwest::multipart::Form::new()
                .text("upload_id", server_id.to_string())
                .text("chunk_index", chunk_index.to_string())
                .part("chunk", part);

            let res = self
                .client
                .post(self.url("upload-chunk"))
                .header(CSRF_HEADER, auth_token)
                .multipart(form)
                .send()
                .await
                .map_err(|e| Error::Transport {
                    message: format!("chunk request failed: {e}"),
                })?;
            read_reply("chunk", res).await
        })
    }

    fn get_status<'a>(
        &'a self,
        task_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Reply<StatusBody>>> + Send + 'a>> {
        Box::pin(async move {
            let res = self
                .client
                .get(self.url(&format!("status/{task_id}")))
                .send()
                .await
                .map_err(|e| Error::Transport {
                    message: format!("status request failed: {e}"),
                })?;
            read_reply("status", res).await
        })
    }
}

async fn read_reply<T: DeserializeOwned>(op: &str, res: reqwest::Response) -> Result<Reply<T>> {
    let status = res.status();
    let body = res.text().await.map_err(|e| Error::Transport {
        message: format!("{op} read response failed: {e}"),
    })?;

    let parsed: T = serde_json::from_str(&body).map_err(|e| {
        if status.is_success() {
            Error::Transport {
                message: format!("{op} invalid json: {e}; body={body}"),
            }
        } else {
            Error::Transport {
                message: format!("{op} http {status}: {body}"),
            }
        }
    })?;

    Ok(Reply {
        ok: status.is_success(),
        body: parsed,
    })
}
