//! In-process message channel between a room and a client.
//!
//! A `Transport` is one end of a symmetric pair. Every message is encoded to
//! a JSON frame on `send` and decoded again on delivery, so the two sides
//! never share memory. With a delay configured, frames wait in a
//! deadline-ordered queue on the receiving end until `pump` is called at or
//! after their deadline.

use crate::error::TransportError;
use crate::game_logic::Clock;
use crate::net::protocol::Message;
use bevy::log::warn;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

pub type ReceiveHandler = Box<dyn FnMut(Message) + Send>;
pub type LinkCallback = Box<dyn FnMut() + Send>;

struct Scheduled {
    deadline: f64,
    seq: u64,
    frame: String,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the max-heap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .total_cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Endpoint {
    peer: Option<Weak<Mutex<Endpoint>>>,
    handler: Option<ReceiveHandler>,
    // Frames that arrived with no handler installed
    inbox: VecDeque<String>,
    scheduled: BinaryHeap<Scheduled>,
    next_seq: u64,
    on_connect: Vec<LinkCallback>,
    on_disconnect: Vec<LinkCallback>,
}

fn lock(endpoint: &Mutex<Endpoint>) -> MutexGuard<'_, Endpoint> {
    endpoint.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One end of a message channel. Clones are handles to the same end.
#[derive(Clone)]
pub struct Transport {
    endpoint: Arc<Mutex<Endpoint>>,
    clock: Arc<dyn Clock>,
    delay: f64,
}

impl Transport {
    /// An unlinked end that delivers immediately.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            endpoint: Arc::new(Mutex::new(Endpoint::default())),
            clock,
            delay: 0.0,
        }
    }

    /// One-way artificial latency applied to everything this end sends.
    pub fn with_delay(mut self, seconds: f64) -> Self {
        self.delay = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self
    }

    /// Two linked ends sharing a clock and the same delay in both directions.
    pub fn pair(clock: Arc<dyn Clock>, delay: f64) -> (Transport, Transport) {
        let a = Transport::new(clock.clone()).with_delay(delay);
        let b = Transport::new(clock).with_delay(delay);
        a.connect_to(&b);
        (a, b)
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn is_connected(&self) -> bool {
        self.peer().is_some()
    }

    /// Link both ends and fire the connect callbacks on each.
    pub fn connect_to(&self, other: &Transport) {
        if Arc::ptr_eq(&self.endpoint, &other.endpoint) {
            warn!("refusing to connect a transport to itself");
            return;
        }
        lock(&self.endpoint).peer = Some(Arc::downgrade(&other.endpoint));
        lock(&other.endpoint).peer = Some(Arc::downgrade(&self.endpoint));
        fire(&self.endpoint, Link::Connect);
        fire(&other.endpoint, Link::Connect);
    }

    /// Sever both ends and fire the disconnect callbacks on each.
    pub fn disconnect(&self) {
        let Some(peer) = lock(&self.endpoint).peer.take() else {
            return;
        };
        fire(&self.endpoint, Link::Disconnect);
        if let Some(peer) = peer.upgrade() {
            let was_linked = lock(&peer).peer.take().is_some();
            if was_linked {
                fire(&peer, Link::Disconnect);
            }
        }
    }

    pub fn on_connect(&self, callback: impl FnMut() + Send + 'static) {
        lock(&self.endpoint).on_connect.push(Box::new(callback));
    }

    pub fn on_disconnect(&self, callback: impl FnMut() + Send + 'static) {
        lock(&self.endpoint).on_disconnect.push(Box::new(callback));
    }

    /// Install the receive handler, replacing any previous one, and hand it
    /// every frame that arrived before it existed.
    pub fn on_receive(&self, handler: impl FnMut(Message) + Send + 'static) {
        lock(&self.endpoint).handler = Some(Box::new(handler));
        flush(&self.endpoint);
    }

    /// Encode `message` and deliver or schedule it on the peer.
    pub fn send(&self, message: &Message) -> Result<(), TransportError> {
        let frame = message.encode()?;
        self.send_frame(frame)
    }

    /// Send an already-encoded frame. The receiver decodes it on delivery and
    /// drops it with a warning if it is not a valid message.
    pub fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        let peer = self.peer().ok_or(TransportError::NotConnected)?;
        if self.delay <= 0.0 {
            deliver(&peer, frame);
        } else {
            let deadline = self.clock.now() + self.delay;
            let mut ep = lock(&peer);
            let seq = ep.next_seq;
            ep.next_seq += 1;
            ep.scheduled.push(Scheduled { deadline, seq, frame });
        }
        Ok(())
    }

    /// Deliver every scheduled frame whose deadline has passed, earliest
    /// first. Returns how many frames were handed on.
    pub fn pump(&self) -> usize {
        let now = self.clock.now();
        let due = {
            let mut ep = lock(&self.endpoint);
            let mut due = Vec::new();
            while ep.scheduled.peek().is_some_and(|s| s.deadline <= now) {
                if let Some(s) = ep.scheduled.pop() {
                    due.push(s.frame);
                }
            }
            due
        };
        let count = due.len();
        for frame in due {
            deliver(&self.endpoint, frame);
        }
        count
    }

    /// Frames waiting on this end for their deadline
    pub fn pending(&self) -> usize {
        lock(&self.endpoint).scheduled.len()
    }

    fn peer(&self) -> Option<Arc<Mutex<Endpoint>>> {
        lock(&self.endpoint).peer.as_ref().and_then(Weak::upgrade)
    }
}

fn deliver(target: &Arc<Mutex<Endpoint>>, frame: String) {
    lock(target).inbox.push_back(frame);
    flush(target);
}

// The handler is taken out of the endpoint while it runs so it can send,
// replace itself or receive re-entrantly without deadlocking.
fn flush(target: &Arc<Mutex<Endpoint>>) {
    let Some(mut handler) = lock(target).handler.take() else {
        return;
    };
    loop {
        let next = lock(target).inbox.pop_front();
        match next {
            Some(frame) => dispatch(&mut handler, &frame),
            None => {
                let mut ep = lock(target);
                if !ep.inbox.is_empty() {
                    continue;
                }
                if ep.handler.is_none() {
                    ep.handler = Some(handler);
                }
                return;
            }
        }
    }
}

fn dispatch(handler: &mut ReceiveHandler, frame: &str) {
    match Message::decode(frame) {
        Ok(message) => handler(message),
        Err(e) => warn!("dropping malformed frame: {e}"),
    }
}

#[derive(Clone, Copy)]
enum Link {
    Connect,
    Disconnect,
}

impl Endpoint {
    fn callbacks(&mut self, link: Link) -> &mut Vec<LinkCallback> {
        match link {
            Link::Connect => &mut self.on_connect,
            Link::Disconnect => &mut self.on_disconnect,
        }
    }
}

fn fire(target: &Arc<Mutex<Endpoint>>, link: Link) {
    let mut callbacks = std::mem::take(lock(target).callbacks(link));
    for callback in callbacks.iter_mut() {
        callback();
    }
    let mut ep = lock(target);
    // keep callbacks registered while these were running
    callbacks.append(ep.callbacks(link));
    *ep.callbacks(link) = callbacks;
}
