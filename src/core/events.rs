// src/core/events.rs

//! Batched delivery of asynchronous notices to an external event sink.
//!
//! Producers hand messages to a `BatchEmitter`, which groups them per channel and
//! delivers a batch when the flush interval elapses or when `max_batch` messages are
//! pending, whichever comes first.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Sender as MpscSender, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the queue between producers and the flushing task.
const EMITTER_CHANNEL_CAPACITY: usize = 8192;

/// Receives batched notices on named channels. Transport is the sink's concern.
pub trait EventSink: Send + Sync {
    fn deliver(&self, channel: &str, batch: Vec<Value>);
}

/// Writes every batch to the log. Used when no front end is listening.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn deliver(&self, channel: &str, batch: Vec<Value>) {
        for message in &batch {
            info!(channel = channel, "{}", message);
        }
    }
}

#[derive(Debug)]
struct Event {
    channel: String,
    payload: Value,
}

pub struct BatchEmitter {
    sender: MpscSender<Event>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BatchEmitter {
    /// Starts the flushing task on the current runtime.
    pub fn spawn(sink: Arc<dyn EventSink>, flush_interval: Duration, max_batch: usize) -> Self {
        let (sender, receiver) = mpsc::channel(EMITTER_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_flusher(
            sink,
            receiver,
            shutdown.clone(),
            flush_interval,
            max_batch.max(1),
        ));
        Self {
            sender,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queues a message. Messages are dropped, with a warning, if the queue is full
    /// or the emitter has been closed.
    pub fn emit(&self, channel: &str, payload: Value) {
        let event = Event {
            channel: channel.to_string(),
            payload,
        };
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(e)) => {
                warn!("Event queue full, dropping message on '{}'", e.channel)
            }
            Err(TrySendError::Closed(e)) => {
                debug!("Event emitter closed, dropping message on '{}'", e.channel)
            }
        }
    }

    /// Flushes whatever is pending and stops the flushing task.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("Event flusher task failed: {}", e);
        }
    }
}

async fn run_flusher(
    sink: Arc<dyn EventSink>,
    mut receiver: mpsc::Receiver<Event>,
    shutdown: CancellationToken,
    flush_interval: Duration,
    max_batch: usize,
) {
    let mut pending: HashMap<String, Vec<Value>> = HashMap::new();
    let mut count = 0usize;
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_event = receiver.recv() => match maybe_event {
                Some(event) => {
                    pending.entry(event.channel).or_default().push(event.payload);
                    count += 1;
                    if count >= max_batch {
                        flush(&*sink, &mut pending);
                        count = 0;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                flush(&*sink, &mut pending);
                count = 0;
            }
            _ = shutdown.cancelled() => {
                // Drain what producers already queued before the final flush.
                while let Ok(event) = receiver.try_recv() {
                    pending.entry(event.channel).or_default().push(event.payload);
                }
                break;
            }
        }
    }
    flush(&*sink, &mut pending);
}

fn flush(sink: &dyn EventSink, pending: &mut HashMap<String, Vec<Value>>) {
    for (channel, batch) in pending.drain() {
        if !batch.is_empty() {
            sink.deliver(&channel, batch);
        }
    }
}
