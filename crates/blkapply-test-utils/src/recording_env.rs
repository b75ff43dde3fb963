//! Env implementation that records posted messages.

use std::sync::Mutex;

use blkapply_core::Env;

/// A test [`Env`] with a fixed retry flag and an in-memory message log.
pub struct RecordingEnv {
    retry: bool,
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingEnv {
    pub fn new(retry: bool) -> Self {
        Self {
            retry,
            messages: Mutex::new(Vec::new()),
        }
    }

    /// All recorded `(topic, payload)` pairs, in post order.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    /// Payloads posted under `topic`, in post order.
    pub fn messages_for(&self, topic: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

impl Env for RecordingEnv {
    fn is_retry(&self) -> bool {
        self.retry
    }

    fn post_message(&self, topic: &str, payload: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
    }
}
