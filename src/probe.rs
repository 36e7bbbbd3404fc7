//! HTTP GET capability used by the readiness loop.
//!
//! A probe answers with the response status code or a [`TransportError`];
//! it never interprets the status itself.
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Failure to establish or complete an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest's own message hides the cause ("error sending request for url"),
        // so flatten the source chain into one line.
        let mut message = e.to_string();
        let mut source = e.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = cause.source();
        }
        TransportError::new(message)
    }
}

/// Redirect hops followed before the probe reports a transport error.
pub const MAX_REDIRECTS: usize = 20;

/// Issues a single GET request and reports the status code.
pub trait HttpGet {
    fn get(&self, url: &str) -> impl Future<Output = Result<u16, TransportError>> + Send;
}

impl<H: HttpGet + ?Sized> HttpGet for &H {
    fn get(&self, url: &str) -> impl Future<Output = Result<u16, TransportError>> + Send {
        (**self).get(url)
    }
}

/// [`HttpGet`] over a `reqwest::Client`.
///
/// Follows up to [`MAX_REDIRECTS`] redirects and reports the final status.
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestProbe {
    /// Build a probe whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("readyprobe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::new(format!("http client error: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl HttpGet for ReqwestProbe {
    fn get(&self, url: &str) -> impl Future<Output = Result<u16, TransportError>> + Send {
        let request = self.client.get(url);
        async move {
            match request.send().await {
                Ok(response) => Ok(response.status().as_u16()),
                Err(e) => Err(TransportError::from(e)),
            }
        }
    }
}
