//! In-memory physical transport for exercising the failover orchestrator.
//!
//! [`MockTransportFactory`] scripts connect outcomes (fail the next N
//! attempts, fail everything, honor a `failOnCreate=true` URI parameter) and
//! records every attempted URI and every command sent through any transport
//! it produced. [`MockTransport`] can inject inbound events to simulate
//! broker traffic or a remote disconnect.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::command::{Command, Response};
use crate::error::{Result, TransportError};
use crate::transport::{PhysicalTransport, TransportEvent, TransportFactory};
use crate::uri::BrokerUri;

/// One scripted in-memory connection.
pub struct MockTransport {
    uri: BrokerUri,
    started: AtomicBool,
    closed: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<Command>>,
    all_sent: Arc<Mutex<Vec<Command>>>,
    listener: Mutex<Option<UnboundedSender<TransportEvent>>>,
}

impl MockTransport {
    fn new(uri: BrokerUri, all_sent: Arc<Mutex<Vec<Command>>>) -> Self {
        Self {
            uri,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            all_sent,
            listener: Mutex::new(None),
        }
    }

    /// The endpoint this transport was created for.
    pub fn uri(&self) -> &BrokerUri {
        &self.uri
    }

    /// Whether `start()` has been called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Makes every subsequent send fail with a connection reset.
    pub fn fail_sends(&self, enabled: bool) {
        self.fail_sends.store(enabled, Ordering::SeqCst);
    }

    /// Commands sent through this transport, in order.
    pub fn sent(&self) -> Vec<Command> {
        self.sent.lock().unwrap().clone()
    }

    /// Delivers an inbound event to the registered listener, simulating
    /// broker traffic or a transport-level failure.
    pub fn inject(&self, event: TransportEvent) {
        if let Some(listener) = self.listener.lock().unwrap().as_ref() {
            let _ = listener.send(event);
        }
    }

    fn record(&self, command: &Command) {
        self.sent.lock().unwrap().push(command.clone());
        self.all_sent.lock().unwrap().push(command.clone());
    }
}

#[async_trait]
impl PhysicalTransport for MockTransport {
    async fn start(&self) -> Result<()> {
        if self.uri.param("failOnStart") == Some("true") {
            return Err(TransportError::ConnectionRefused {
                addr: self.uri.to_string(),
            });
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn oneway(&self, command: Command) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionReset);
        }
        self.record(&command);
        Ok(())
    }

    async fn request(&self, command: Command, _timeout: Option<Duration>) -> Result<Response> {
        if self.closed.load(Ordering::SeqCst) || self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionReset);
        }
        self.record(&command);
        Ok(Response::new(command.id().unwrap_or(0), Bytes::new()))
    }

    fn set_listener(&self, listener: UnboundedSender<TransportEvent>) {
        *self.listener.lock().unwrap() = Some(listener);
    }
}

/// Scripted factory producing [`MockTransport`]s.
#[derive(Clone, Default)]
pub struct MockTransportFactory {
    inner: Arc<FactoryInner>,
}

#[derive(Default)]
struct FactoryInner {
    fail_next: AtomicU32,
    fail_all: AtomicBool,
    attempts: Mutex<Vec<String>>,
    all_sent: Arc<Mutex<Vec<Command>>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    /// Creates a factory that succeeds on every connect.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    /// Makes every connect attempt fail until disabled.
    pub fn fail_all_connects(&self, enabled: bool) {
        self.inner.fail_all.store(enabled, Ordering::SeqCst);
    }

    /// Every URI a connect was attempted against, in order, including
    /// failed attempts.
    pub fn attempted_uris(&self) -> Vec<String> {
        self.inner.attempts.lock().unwrap().clone()
    }

    /// All commands sent through any transport this factory produced.
    pub fn sent_commands(&self) -> Vec<Command> {
        self.inner.all_sent.lock().unwrap().clone()
    }

    /// Number of transports successfully created.
    pub fn created(&self) -> usize {
        self.inner.transports.lock().unwrap().len()
    }

    /// The `idx`-th successfully created transport.
    pub fn transport(&self, idx: usize) -> Option<Arc<MockTransport>> {
        self.inner.transports.lock().unwrap().get(idx).cloned()
    }

    /// The most recently created transport.
    pub fn latest(&self) -> Option<Arc<MockTransport>> {
        self.inner.transports.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(&self, uri: &BrokerUri) -> Result<Arc<dyn PhysicalTransport>> {
        self.inner.attempts.lock().unwrap().push(uri.to_string());

        let refused = || TransportError::ConnectionRefused {
            addr: uri.to_string(),
        };
        if uri.param("failOnCreate") == Some("true") {
            return Err(refused());
        }
        if self.inner.fail_all.load(Ordering::SeqCst) {
            return Err(refused());
        }
        if self
            .inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(refused());
        }

        let transport = Arc::new(MockTransport::new(uri.clone(), self.inner.all_sent.clone()));
        self.inner.transports.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}
