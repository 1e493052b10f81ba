use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{RawResponse, Request, Transport, TransportError};

type Scripted = Result<RawResponse, TransportError>;

/// Scripted transport for tests.
///
/// Queued results are returned in order; once the queue is empty every call
/// gets the fallback.
#[derive(Debug)]
pub struct StubTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    delay: Option<Duration>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl StubTransport {
    /// Creates a stub that answers every call with `fallback`.
    pub fn new(fallback: Scripted) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a stub that answers 200 with the given JSON body.
    pub fn ok_json(body: &serde_json::Value) -> Self {
        Self::new(Ok(RawResponse::new(200, body.to_string())))
    }

    /// Queues results to be returned before the fallback.
    pub fn with_script(self, results: impl IntoIterator<Item = Scripted>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(results);
        self
    }

    /// Makes every call wait before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns how many calls reached the transport.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the URLs requested so far.
    pub fn urls(&self) -> Vec<String> {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(
        &self,
        url: &str,
        _request: &Request,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if let Some(delay) = self.delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(TransportError::Timeout);
            }
            tokio::time::sleep(delay).await;
        }
        next
    }
}
