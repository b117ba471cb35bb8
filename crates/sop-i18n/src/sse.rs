//! Server-Sent Events transport for live updates

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::{I18nError, I18nResult};
use crate::live::{UpdateTransport, CHANNEL_CAPACITY};

/// Incremental parser turning SSE bytes into `data` payloads.
///
/// Multi-line `data:` fields are joined with `\n`; other fields and
/// comment lines are ignored. Partial lines carry over between chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed one chunk, returning every event it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(&['\n', '\r'][..]);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }

        events
    }
}

/// Live update transport over `GET {base}/{stream_path}` as `text/event-stream`.
///
/// The client must not carry a total request timeout, or the stream is cut
/// when it expires; a connect timeout is fine.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: Client,
    url: Url,
    auth_token: Option<String>,
}

impl SseTransport {
    /// Create a transport for `url`
    pub const fn new(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            auth_token: None,
        }
    }

    /// Send a bearer token with every connection attempt
    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// Stream endpoint
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl UpdateTransport for SseTransport {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self) -> I18nResult<mpsc::Receiver<String>> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| I18nError::transport_with_source("Failed to open update stream", e))?;

        if !response.status().is_success() {
            return Err(I18nError::transport(format!(
                "Update stream returned status {}",
                response.status()
            )));
        }

        debug!("Update stream opened");
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(pump(response, tx));
        Ok(rx)
    }
}

/// Forward stream events until either side goes away
async fn pump(response: Response, tx: mpsc::Sender<String>) {
    let mut stream = response.bytes_stream();
    let mut parser = SseParser::default();

    loop {
        let chunk = tokio::select! {
            () = tx.closed() => return,
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for data in parser.feed(&bytes) {
                    if tx.send(data).await.is_err() {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!("Update stream broke: {}", e);
                return;
            }
            None => {
                debug!("Update stream ended");
                return;
            }
        }
    }
}
