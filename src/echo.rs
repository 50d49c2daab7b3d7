use std::{
    collections::{HashSet, VecDeque},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::types::MessageHandle;

const DEFAULT_ECHO_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_ECHO_CAPACITY: usize = 2_048;

/// Handles of messages this process sent recently. Transports that echo our
/// own outbound messages back (self-chat style accounts) are filtered with it.
#[derive(Debug)]
pub struct EchoFilter {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<EchoLog>,
}

#[derive(Debug, Default)]
struct EchoLog {
    handles: HashSet<MessageHandle>,
    order: VecDeque<(MessageHandle, Instant)>,
}

impl EchoLog {
    fn expire(&mut self, now: Instant, ttl: Duration) {
        while let Some((_, sent_at)) = self.order.front() {
            if now.duration_since(*sent_at) < ttl {
                break;
            }
            if let Some((handle, _)) = self.order.pop_front() {
                self.handles.remove(&handle);
            }
        }
    }
}

impl Default for EchoFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_TTL, DEFAULT_ECHO_CAPACITY)
    }
}

impl EchoFilter {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            inner: Mutex::new(EchoLog::default()),
        }
    }

    pub fn record(&self, handle: &MessageHandle, now: Instant) {
        let mut log = self.inner.lock();
        log.expire(now, self.ttl);
        if !log.handles.insert(handle.clone()) {
            return;
        }
        log.order.push_back((handle.clone(), now));
        while log.order.len() > self.capacity {
            if let Some((oldest, _)) = log.order.pop_front() {
                log.handles.remove(&oldest);
            }
        }
    }

    pub fn is_echo(&self, handle: &MessageHandle, now: Instant) -> bool {
        let mut log = self.inner.lock();
        log.expire(now, self.ttl);
        log.handles.contains(handle)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
