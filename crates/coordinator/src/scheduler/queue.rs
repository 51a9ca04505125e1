//! Two-tier request queue.
//!
//! `High` requests always leave before `Normal` ones; each tier is FIFO.
//! Depth is bounded for new requests. Requeued retries were already admitted
//! once and bypass the bound.

use std::collections::VecDeque;

use crate::models::Priority;

/// Bounded priority queue of one source.
#[derive(Debug)]
pub struct RequestQueue<T> {
    high: VecDeque<T>,
    normal: VecDeque<T>,
    max_depth: usize,
    closed: bool,
}

/// Why an item was not queued; the item is handed back.
#[derive(Debug)]
pub enum PushError<T> {
    Full(T),
    Closed(T),
}

impl<T> RequestQueue<T> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            max_depth,
            closed: false,
        }
    }

    /// Queue a new request, respecting the depth bound.
    pub fn push(&mut self, priority: Priority, item: T) -> Result<(), PushError<T>> {
        if self.closed {
            return Err(PushError::Closed(item));
        }
        if self.len() >= self.max_depth {
            return Err(PushError::Full(item));
        }
        self.tier(priority).push_back(item);
        Ok(())
    }

    /// Put a retried request back, ignoring the depth bound.
    pub fn push_retry(&mut self, priority: Priority, item: T) -> Result<(), PushError<T>> {
        if self.closed {
            return Err(PushError::Closed(item));
        }
        self.tier(priority).push_back(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty()
    }

    /// Refuse further pushes and hand back everything still queued.
    pub fn close(&mut self) -> Vec<T> {
        self.closed = true;
        self.high.drain(..).chain(self.normal.drain(..)).collect()
    }

    fn tier(&mut self, priority: Priority) -> &mut VecDeque<T> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
        }
    }
}
