// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! FIFO ring buffer of event handles that doubles its storage when full.
//!
//! The queue does no locking of its own. It is shared as a [`SharedQueue`]: the router pushes
//! while holding its routing mutex and exactly one appender pops.

use std::sync::{Arc, Mutex};

use crate::event::Event;

pub type EventHandle = Arc<Event>;

pub type SharedQueue = Arc<Mutex<EventQueue>>;

#[derive(Debug)]
pub struct EventQueue<T = EventHandle> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
}

impl<T> EventQueue<T> {
    /// A zero capacity is bumped to one slot so that growth by doubling always makes room.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        EventQueue {
            slots,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.head == self.tail && self.count > 0 {
            self.grow();
        }
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.slots.len();
        self.count += 1;
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.count -= 1;
        item
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    // Unrolls the ring into a buffer twice the size, oldest element first.
    fn grow(&mut self) {
        let capacity = self.slots.len();
        let mut slots = Vec::with_capacity(capacity * 2);
        slots.extend(self.slots[self.head..].iter_mut().map(Option::take));
        slots.extend(self.slots[..self.head].iter_mut().map(Option::take));
        slots.resize_with(capacity * 2, || None);
        self.slots = slots;
        self.head = 0;
        self.tail = capacity;
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::with_capacity(crate::constants::INITIAL_QUEUE_CAPACITY)
    }
}

#[must_use]
pub fn shared_queue(capacity: usize) -> SharedQueue {
    Arc::new(Mutex::new(EventQueue::with_capacity(capacity)))
}
