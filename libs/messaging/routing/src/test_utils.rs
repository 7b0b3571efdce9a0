use crate::{EndpointHandler, HandlerError, Message};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A handler that records every message it receives with bounded storage
#[derive(Debug)]
pub struct CollectorHandler {
    messages: Mutex<VecDeque<Message>>,
    max_messages: usize,
    fail_next: AtomicBool,
}

impl CollectorHandler {
    /// Create a new collector with default capacity
    pub fn new() -> Arc<Self> {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_messages: usize) -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(VecDeque::with_capacity(max_messages.min(1024))),
            max_messages,
            fail_next: AtomicBool::new(false),
        })
    }

    /// Get all received messages
    pub fn received_messages(&self) -> Vec<Message> {
        self.messages.lock().iter().cloned().collect()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn clear_messages(&self) {
        self.messages.lock().clear();
    }

    /// Configure the next call to fail
    pub fn fail_next_message(&self) {
        self.fail_next.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl EndpointHandler for CollectorHandler {
    async fn handle(&self, message: &Message) -> Result<Value, HandlerError> {
        if self.fail_next.swap(false, Ordering::Relaxed) {
            return Err(HandlerError::new("collector configured to fail"));
        }

        let mut messages = self.messages.lock();
        if messages.len() >= self.max_messages {
            messages.pop_front();
        }
        messages.push_back(message.clone());

        Ok(json!({ "received": message.id().to_string() }))
    }
}

/// A handler that always fails
#[derive(Debug)]
pub struct FailingHandler {
    reason: String,
}

impl FailingHandler {
    pub fn new(reason: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reason: reason.into(),
        })
    }
}

#[async_trait]
impl EndpointHandler for FailingHandler {
    async fn handle(&self, _message: &Message) -> Result<Value, HandlerError> {
        Err(HandlerError::new(self.reason.clone()))
    }
}

/// A handler that panics on every call
#[derive(Debug)]
pub struct PanickingHandler {
    reason: String,
}

impl PanickingHandler {
    pub fn new(reason: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reason: reason.into(),
        })
    }
}

#[async_trait]
impl EndpointHandler for PanickingHandler {
    async fn handle(&self, _message: &Message) -> Result<Value, HandlerError> {
        panic!("{}", self.reason)
    }
}
