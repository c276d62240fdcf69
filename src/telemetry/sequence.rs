//! Per-stream sequence counters
//!
//! Counters are created on the first publish to a stream and live as long
//! as the registry. Holding a [`StreamSequence`] serializes everything done
//! for that stream until it is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct SequenceRegistry {
    streams: Mutex<HashMap<String, Arc<AsyncMutex<u64>>>>,
}

/// Exclusive access to one stream's counter
#[derive(Debug)]
pub struct StreamSequence {
    counter: OwnedMutexGuard<u64>,
}

impl StreamSequence {
    /// Increment and return the next sequence number
    pub fn advance(&mut self) -> u64 {
        *self.counter += 1;
        *self.counter
    }

    /// Last sequence number handed out, 0 if none
    pub fn current(&self) -> u64 {
        *self.counter
    }
}

impl SequenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, stream: &str) -> Arc<AsyncMutex<u64>> {
        let mut streams = self
            .streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        streams
            .entry(stream.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(0)))
            .clone()
    }

    /// Wait for exclusive access to `stream`'s counter, creating it if needed
    pub async fn lock(&self, stream: &str) -> StreamSequence {
        StreamSequence {
            counter: self.counter(stream).lock_owned().await,
        }
    }

    /// Last sequence number used on `stream`, 0 if none
    pub async fn current(&self, stream: &str) -> u64 {
        let counter = self
            .streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(stream)
            .cloned();
        match counter {
            Some(counter) => *counter.lock().await,
            None => 0,
        }
    }

    /// Streams that have a counter, sorted
    pub fn streams(&self) -> Vec<String> {
        let streams = self
            .streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = streams.keys().cloned().collect();
        names.sort();
        names
    }
}
