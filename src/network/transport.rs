//! Transport Abstraction
//!
//! The sync engine only needs best-effort, unordered datagrams: a send that
//! may be lost, duplicated or reordered, and a way to collect whatever arrived
//! since the last tick. `LossyLink` provides that in memory with seeded
//! impairments so whole sessions replay identically.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Serialize, Deserialize};
use tracing::trace;

use crate::core::rng::DeterministicRng;

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Destination is not attached to this transport.
    #[error("Unknown endpoint {0}")]
    UnknownEndpoint(String),

    /// Background reader has stopped.
    #[error("Transport closed")]
    Closed,
}

/// Unordered, best-effort datagram delivery.
pub trait Transport {
    /// Peer address type.
    type Endpoint: Copy + Eq + Ord + fmt::Debug;

    /// Queue `payload` for `to`. Success means nothing about delivery.
    fn send_unordered(
        &mut self,
        to: Self::Endpoint,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Everything that arrived since the last call, in arrival order.
    fn drain(&mut self) -> Vec<(Self::Endpoint, Vec<u8>)>;
}

// =============================================================================
// IN-MEMORY LOSSY LINK
// =============================================================================

/// Address on a `LossyLink`.
pub type EndpointId = u32;

/// Impairments applied to every datagram on a link.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkConditions {
    /// One-way base delay in seconds.
    pub latency: f64,
    /// Extra uniform random delay in seconds, reorders datagrams.
    pub jitter: f64,
    /// Probability a datagram is dropped.
    pub loss: f64,
    /// Probability a delivered datagram arrives twice.
    pub duplicate: f64,
}

impl LinkConditions {
    /// Zero delay, no loss.
    pub const PERFECT: Self = Self {
        latency: 0.0,
        jitter: 0.0,
        loss: 0.0,
        duplicate: 0.0,
    };
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            latency: 0.05,
            jitter: 0.02,
            loss: 0.0,
            duplicate: 0.0,
        }
    }
}

/// Link-level counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Datagrams handed to the link
    pub sent: u64,
    /// Datagrams dropped
    pub lost: u64,
    /// Extra copies injected
    pub duplicated: u64,
    /// Datagrams placed in an inbox
    pub delivered: u64,
}

struct InFlight {
    deliver_at: f64,
    order: u64,
    from: EndpointId,
    to: EndpointId,
    payload: Vec<u8>,
}

struct LinkState {
    conditions: LinkConditions,
    rng: DeterministicRng,
    now: f64,
    next_order: u64,
    in_flight: Vec<InFlight>,
    inboxes: BTreeMap<EndpointId, Vec<(EndpointId, Vec<u8>)>>,
    stats: LinkStats,
}

impl LinkState {
    fn schedule(&mut self, from: EndpointId, to: EndpointId, payload: Vec<u8>) {
        let delay = self.conditions.latency + self.conditions.jitter * self.rng.next_unit();
        let order = self.next_order;
        self.next_order += 1;
        self.in_flight.push(InFlight {
            deliver_at: self.now + delay,
            order,
            from,
            to,
            payload,
        });
    }
}

/// Shared in-memory network. Cheap to clone; clones refer to the same link.
#[derive(Clone)]
pub struct LossyLink {
    state: Rc<RefCell<LinkState>>,
}

impl LossyLink {
    /// Create a link with the given impairments and RNG seed.
    pub fn new(conditions: LinkConditions, seed: u64) -> Self {
        Self {
            state: Rc::new(RefCell::new(LinkState {
                conditions,
                rng: DeterministicRng::new(seed),
                now: 0.0,
                next_order: 0,
                in_flight: Vec::new(),
                inboxes: BTreeMap::new(),
                stats: LinkStats::default(),
            })),
        }
    }

    /// Attach a new endpoint.
    pub fn endpoint(&self) -> LinkEndpoint {
        let mut state = self.state.borrow_mut();
        let id = state.inboxes.len() as EndpointId;
        state.inboxes.insert(id, Vec::new());
        LinkEndpoint {
            id,
            state: Rc::clone(&self.state),
        }
    }

    /// Move the link clock to `now`, delivering everything due.
    pub fn advance_to(&self, now: f64) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.now = state.now.max(now);
        let now = state.now;

        let (mut due, pending): (Vec<_>, Vec<_>) =
            state.in_flight.drain(..).partition(|m| m.deliver_at <= now);
        state.in_flight = pending;
        due.sort_by(|a, b| a.deliver_at.total_cmp(&b.deliver_at).then(a.order.cmp(&b.order)));

        for m in due {
            if let Some(inbox) = state.inboxes.get_mut(&m.to) {
                inbox.push((m.from, m.payload));
                state.stats.delivered += 1;
            }
        }
    }

    /// Link clock.
    pub fn now(&self) -> f64 {
        self.state.borrow().now
    }

    /// Counters so far.
    pub fn stats(&self) -> LinkStats {
        self.state.borrow().stats
    }

    /// Change impairments mid-session.
    pub fn set_conditions(&self, conditions: LinkConditions) {
        self.state.borrow_mut().conditions = conditions;
    }
}

/// One attachment point on a `LossyLink`.
pub struct LinkEndpoint {
    id: EndpointId,
    state: Rc<RefCell<LinkState>>,
}

impl LinkEndpoint {
    /// This endpoint's address.
    pub fn id(&self) -> EndpointId {
        self.id
    }
}

impl Transport for LinkEndpoint {
    type Endpoint = EndpointId;

    fn send_unordered(&mut self, to: EndpointId, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if !state.inboxes.contains_key(&to) {
            return Err(TransportError::UnknownEndpoint(to.to_string()));
        }
        state.stats.sent += 1;

        let conditions = state.conditions;
        if state.rng.chance(conditions.loss) {
            state.stats.lost += 1;
            trace!("link dropped {} bytes {} -> {}", payload.len(), self.id, to);
            return Ok(());
        }
        if state.rng.chance(conditions.duplicate) {
            state.stats.duplicated += 1;
            state.schedule(self.id, to, payload.clone());
        }
        state.schedule(self.id, to, payload);
        Ok(())
    }

    fn drain(&mut self) -> Vec<(EndpointId, Vec<u8>)> {
        self.state
            .borrow_mut()
            .inboxes
            .get_mut(&self.id)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}
