//! Event sinks
//!
//! A sink accepts one event at a time, in emission order. The supervisor has
//! no idea what sits behind it: a socket writer, a channel, or a test buffer.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use super::StreamEvent;
use crate::types::{Result, SupervisorError};

/// Destination for run events
pub trait EventSink: Send + Sync {
    /// Accept one event
    ///
    /// An error means the consumer is gone. The supervisor logs it and keeps
    /// running the process to completion.
    fn send(&self, event: StreamEvent) -> Result<()>;
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn send(&self, event: StreamEvent) -> Result<()> {
        (**self).send(event)
    }
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn send(&self, event: StreamEvent) -> Result<()> {
        (**self).send(event)
    }
}

/// Sink that records every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<StreamEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded events for one session
    pub fn events_for(&self, session_id: &str) -> Vec<StreamEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.session_id() == session_id)
            .collect()
    }

    /// Event kinds in order, handy for sequence assertions
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(StreamEvent::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn send(&self, event: StreamEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Sink that forwards events into an unbounded channel
///
/// `T` is whatever the receiving side writes out; the stdio transport uses its
/// outbound message enum so events and control responses share one writer.
#[derive(Debug)]
pub struct ChannelSink<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> ChannelSink<T> {
    pub fn new(tx: mpsc::UnboundedSender<T>) -> Self {
        Self { tx }
    }
}

impl<T> Clone for ChannelSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> EventSink for ChannelSink<T>
where
    T: From<StreamEvent> + Send + 'static,
{
    fn send(&self, event: StreamEvent) -> Result<()> {
        self.tx
            .send(T::from(event))
            .map_err(|_| SupervisorError::sink_closed("receiver dropped"))
    }
}
