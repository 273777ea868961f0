use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by [`Probe::is_reachable`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Answers "is the network reachable right now".
///
/// The agent uses [`HttpProbe`]; tests substitute their own.
pub trait Probe: Send + Sync {
    fn is_reachable(&self) -> ProbeFuture<'_>;
}

/// Reachability probe issuing a `HEAD` request to a fixed URL.
///
/// Any HTTP response, including error statuses, proves the network is up.
/// Only transport failures (DNS, connect, timeout) count as unreachable.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

impl Probe for HttpProbe {
    fn is_reachable(&self) -> ProbeFuture<'_> {
        Box::pin(async move {
            match self
                .client
                .head(&self.url)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(resp) => {
                    tracing::trace!(url = %self.url, status = %resp.status(), "probe answered");
                    true
                }
                Err(e) => {
                    tracing::debug!(url = %self.url, error = %e, "probe failed");
                    false
                }
            }
        })
    }
}
