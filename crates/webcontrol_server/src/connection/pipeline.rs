//! Bounded, ordered HTTP response pipelining.
//!
//! The reader reserves a [`PipelineSlot`] before it reads each request and
//! sends the finished response, slot attached, to the connection's writer
//! over an ordered channel. The writer releases the slot once the response
//! is fully written. With every slot taken the reader stops reading, so at
//! most `limit` unsent responses exist per connection.

use super::response::HttpResponse;
use std::sync::Arc;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

/// Work items consumed in order by a connection's writer.
#[derive(Debug)]
pub enum PipelineItem<W> {
    /// Write this response, then release its slot
    Response(HttpResponse, PipelineSlot),
    /// Hand the write half back once everything queued before is written
    Upgrade(oneshot::Sender<W>),
}

/// A reserved place in the pipeline, released on drop.
#[derive(Debug)]
pub struct PipelineSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct PipelineQueue {
    slots: Arc<Semaphore>,
    limit: usize,
}

impl PipelineQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Waits for a free slot.
    pub async fn reserve(&self) -> Option<PipelineSlot> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .ok()
            .map(|permit| PipelineSlot { _permit: permit })
    }

    /// Number of responses reserved but not yet written.
    pub fn in_flight(&self) -> usize {
        self.limit - self.slots.available_permits()
    }

    pub fn is_full(&self) -> bool {
        self.slots.available_permits() == 0
    }
}
