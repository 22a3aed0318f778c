use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common_types::StreamConfig;

use crate::transport::{RawItem, StreamTransport, TransportError};
use crate::TransportFactory;

/// Scripted transport for consumer and supervisor tests: fetches pop
/// pre-arranged batches (or errors), acks are recorded for inspection, and
/// connects can be made to fail a number of times.
#[derive(Clone, Default)]
pub struct MockTransportFactory {
    shared: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    batches: Mutex<VecDeque<Result<Vec<RawItem>, TransportError>>>,
    acked: Mutex<Vec<String>>,
    connect_failures: AtomicU32,
    connects: AtomicU32,
    fail_ack: AtomicBool,
}

impl MockTransportFactory {
    pub fn new() -> MockTransportFactory {
        MockTransportFactory::default()
    }

    pub fn item(topic: &str, offset: i64, payload: &str) -> RawItem {
        RawItem {
            topic: topic.to_string(),
            partition: 0,
            offset,
            ack_id: format!("{topic}-{offset}"),
            payload: payload.as_bytes().to_vec(),
        }
    }

    pub fn push_batch(&self, batch: Vec<RawItem>) {
        self.shared
            .batches
            .lock()
            .expect("mock transport poisoned")
            .push_back(Ok(batch));
    }

    pub fn push_error(&self, message: &str) {
        self.shared
            .batches
            .lock()
            .expect("mock transport poisoned")
            .push_back(Err(TransportError::Fetch(message.to_string())));
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_connects(&self, count: u32) {
        self.shared.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_acks(&self, fail: bool) {
        self.shared.fail_ack.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u32 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn acked(&self) -> Vec<String> {
        self.shared
            .acked
            .lock()
            .expect("mock transport poisoned")
            .clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn connect(
        &self,
        _config: &StreamConfig,
    ) -> Result<Box<dyn StreamTransport>, TransportError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let failures = self.shared.connect_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.shared
                .connect_failures
                .store(failures - 1, Ordering::SeqCst);
            return Err(TransportError::Connect("scripted connect failure".to_string()));
        }
        Ok(Box::new(MockTransport {
            shared: self.shared.clone(),
        }))
    }
}

struct MockTransport {
    shared: Arc<MockState>,
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn fetch(
        &mut self,
        _max_items: usize,
        timeout: Duration,
    ) -> Result<Vec<RawItem>, TransportError> {
        let next = self
            .shared
            .batches
            .lock()
            .expect("mock transport poisoned")
            .pop_front();
        match next {
            Some(batch) => batch,
            None => {
                // an idle transport waits out the batch timeout
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            }
        }
    }

    async fn ack(&mut self, item: &RawItem) -> Result<(), TransportError> {
        if self.shared.fail_ack.load(Ordering::SeqCst) {
            return Err(TransportError::Ack("scripted ack failure".to_string()));
        }
        self.shared
            .acked
            .lock()
            .expect("mock transport poisoned")
            .push(item.ack_id.clone());
        Ok(())
    }
}
