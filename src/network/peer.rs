//! Peers
//!
//! `ServerPeer` runs the authoritative simulation for every entity and fans
//! results out: an ack to the owner, a bare snapshot to everyone else.
//! `ClientPeer` predicts the entity it owns and interpolates the rest.
//!
//! Both drain their transport at the start of a tick and decode each
//! datagram into a `Message` that is dispatched by `match`. Undecodable
//! datagrams are counted and dropped.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Deserialize};
use tracing::{debug, error, info, warn};

use crate::core::math::Vec2;
use crate::network::protocol::{Datagram, EntityId, Message, MessageHandler};
use crate::network::transport::Transport;
use crate::network::wire::split_report;
use crate::sync::command::Command;
use crate::sync::config::SyncConfig;
use crate::sync::events::{Instrument, SyncEvent, SyncStats};
use crate::sync::interpolate::{Policy, RemoteInterpolator};
use crate::sync::predictor::{ClientPredictor, PredictedTick};
use crate::sync::rtt::RttEstimator;
use crate::sync::server::ServerSimulator;
use crate::sync::simulate::Transform;
use crate::sync::snapshot::{Ack, Snapshot};

/// How this peer relates to an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Authoritative simulation.
    Server,
    /// Client that owns the entity and predicts it.
    ClientOwner,
    /// Client that only watches it.
    ClientObserver,
}

fn send<T: Transport>(transport: &mut T, to: T::Endpoint, datagram: &Datagram) {
    let bytes = match datagram.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(
                "failed to encode {} for entity {}: {}",
                datagram.message.kind().name(),
                datagram.entity,
                e
            );
            return;
        }
    };
    if let Err(e) = transport.send_unordered(to, bytes) {
        warn!("send to {:?} failed: {}", to, e);
    }
}

fn decode(bytes: &[u8], sink: &mut impl Instrument) -> Option<Datagram> {
    match Datagram::decode(bytes) {
        Ok(datagram) => Some(datagram),
        Err(e) => {
            debug!("dropping malformed datagram ({} bytes): {}", bytes.len(), e);
            sink.record(SyncEvent::MalformedMessage { reason: e.to_string() });
            None
        }
    }
}

// =============================================================================
// SERVER
// =============================================================================

struct ServerEntity<E> {
    owner: E,
    simulator: ServerSimulator,
    transform: Transform,
}

/// Server side of a session.
pub struct ServerPeer<T: Transport> {
    config: SyncConfig,
    transport: T,
    entities: BTreeMap<EntityId, ServerEntity<T::Endpoint>>,
    clients: BTreeSet<T::Endpoint>,
    stats: SyncStats,
    ticks: u64,
}

impl<T: Transport> ServerPeer<T> {
    /// Create a server with no entities.
    pub fn new(config: SyncConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            entities: BTreeMap::new(),
            clients: BTreeSet::new(),
            stats: SyncStats::default(),
            ticks: 0,
        }
    }

    /// Start simulating `entity` for `owner` at `spawn`.
    ///
    /// Ownership is decided elsewhere; the owner also becomes an observer of
    /// every other entity.
    pub fn spawn(&mut self, entity: EntityId, owner: T::Endpoint, spawn: Transform) {
        info!("entity {} spawned for {:?}", entity, owner);
        self.clients.insert(owner);
        self.entities.insert(
            entity,
            ServerEntity {
                owner,
                simulator: ServerSimulator::new(self.config.clone()),
                transform: spawn,
            },
        );
    }

    /// Receive snapshots without owning anything.
    pub fn add_observer(&mut self, endpoint: T::Endpoint) {
        self.clients.insert(endpoint);
    }

    /// Role of this peer for any entity.
    pub fn role(&self, _entity: EntityId) -> Role {
        Role::Server
    }

    /// Authoritative transform of `entity`.
    pub fn transform(&self, entity: EntityId) -> Option<Transform> {
        self.entities.get(&entity).map(|e| e.transform)
    }

    /// Simulator state of `entity`.
    pub fn simulator(&self, entity: EntityId) -> Option<&ServerSimulator> {
        self.entities.get(&entity).map(|e| &e.simulator)
    }

    /// Aggregated events.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Server ticks run.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one server tick at server time `now`.
    pub fn tick(&mut self, now: f64) {
        for (from, bytes) in self.transport.drain() {
            if let Some(datagram) = decode(&bytes, &mut self.stats) {
                datagram.message.dispatch(from, datagram.entity, self);
            }
        }

        for (&id, entity) in self.entities.iter_mut() {
            let Some(out) = entity.simulator.tick(now, &mut entity.transform, &mut self.stats)
            else {
                continue;
            };

            send(&mut self.transport, entity.owner, &Datagram::new(id, Message::Ack(out.ack)));
            let broadcast = Datagram::new(id, Message::Snapshot(out.snapshot));
            for &client in self.clients.iter().filter(|&&c| c != entity.owner) {
                send(&mut self.transport, client, &broadcast);
            }
        }

        self.ticks += 1;
    }
}

impl<T: Transport> MessageHandler<T::Endpoint> for ServerPeer<T> {
    fn on_commands(&mut self, from: T::Endpoint, entity: EntityId, commands: &[Command]) {
        match self.entities.get_mut(&entity) {
            Some(e) if e.owner == from => e.simulator.receive_all(commands, &mut self.stats),
            Some(_) => debug!("ignoring commands for entity {} from non-owner {:?}", entity, from),
            None => debug!("ignoring commands for unknown entity {}", entity),
        }
    }

    fn on_ping(&mut self, from: T::Endpoint, entity: EntityId, client_time: f64) {
        send(&mut self.transport, from, &Datagram::new(entity, Message::Pong { client_time }));
    }
}

// =============================================================================
// CLIENT
// =============================================================================

struct OwnedEntity {
    id: EntityId,
    predictor: ClientPredictor,
    transform: Transform,
}

struct RemoteEntity {
    interpolator: RemoteInterpolator,
    transform: Transform,
    policy: Policy,
}

/// Client side of a session.
pub struct ClientPeer<T: Transport> {
    config: SyncConfig,
    transport: T,
    server: T::Endpoint,
    owned: Option<OwnedEntity>,
    remotes: BTreeMap<EntityId, RemoteEntity>,
    rtt: RttEstimator,
    stats: SyncStats,
    clock: f64,
    ticks: u64,
}

impl<T: Transport> ClientPeer<T> {
    /// Create a client talking to `server`.
    pub fn new(config: SyncConfig, transport: T, server: T::Endpoint) -> Self {
        Self {
            config,
            transport,
            server,
            owned: None,
            remotes: BTreeMap::new(),
            rtt: RttEstimator::new(),
            stats: SyncStats::default(),
            clock: 0.0,
            ticks: 0,
        }
    }

    /// Take ownership of `entity`, starting at `spawn`.
    pub fn possess(&mut self, entity: EntityId, spawn: Transform) {
        self.remotes.remove(&entity);
        self.owned = Some(OwnedEntity {
            id: entity,
            predictor: ClientPredictor::new(self.config.clone()),
            transform: spawn,
        });
    }

    /// Role of this peer for `entity`.
    pub fn role(&self, entity: EntityId) -> Role {
        match &self.owned {
            Some(owned) if owned.id == entity => Role::ClientOwner,
            _ => Role::ClientObserver,
        }
    }

    /// Displayed transform of `entity`: predicted if owned, interpolated otherwise.
    pub fn transform(&self, entity: EntityId) -> Option<Transform> {
        match &self.owned {
            Some(owned) if owned.id == entity => Some(owned.transform),
            _ => self.remotes.get(&entity).map(|r| r.transform),
        }
    }

    /// Policy used for `entity` on the last tick, if it is remote.
    pub fn remote_policy(&self, entity: EntityId) -> Option<Policy> {
        self.remotes.get(&entity).map(|r| r.policy)
    }

    /// Predictor of the owned entity.
    pub fn predictor(&self) -> Option<&ClientPredictor> {
        self.owned.as_ref().map(|o| &o.predictor)
    }

    /// Current RTT estimate in seconds.
    pub fn rtt(&self) -> f64 {
        self.rtt.rtt()
    }

    /// Aggregated events.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Run one client tick at local time `now` with input `axis`.
    pub fn tick(&mut self, now: f64, axis: Vec2) -> Option<PredictedTick> {
        self.clock = now;
        for (from, bytes) in self.transport.drain() {
            if from != self.server {
                debug!("ignoring datagram from unknown peer {:?}", from);
                continue;
            }
            if let Some(datagram) = decode(&bytes, &mut self.stats) {
                datagram.message.dispatch(from, datagram.entity, self);
            }
        }

        let predicted = match self.owned.as_mut() {
            Some(owned) => {
                let tick = owned.predictor.tick(
                    axis,
                    &mut owned.transform,
                    self.rtt.rtt(),
                    &mut self.stats,
                );
                for report in split_report(owned.predictor.unacknowledged()) {
                    let datagram = Datagram::new(owned.id, Message::Commands(report.to_vec()));
                    send(&mut self.transport, self.server, &datagram);
                }

                let interval = self.config.ping_interval_ticks as u64;
                if interval > 0 && self.ticks % interval == 0 {
                    let ping = Datagram::new(owned.id, Message::Ping { client_time: now });
                    send(&mut self.transport, self.server, &ping);
                }
                Some(tick)
            }
            None => None,
        };

        for remote in self.remotes.values_mut() {
            remote.policy = remote.interpolator.tick(&mut remote.transform, &mut self.stats);
        }

        self.ticks += 1;
        predicted
    }
}

impl<T: Transport> MessageHandler<T::Endpoint> for ClientPeer<T> {
    fn on_ack(&mut self, _from: T::Endpoint, entity: EntityId, ack: Ack) {
        match self.owned.as_mut() {
            Some(owned) if owned.id == entity => {
                owned.predictor.on_ack(ack, &mut self.stats);
            }
            _ => debug!("ack for entity {} we do not own", entity),
        }
    }

    fn on_snapshot(&mut self, _from: T::Endpoint, entity: EntityId, snapshot: Snapshot) {
        if self.role(entity) != Role::ClientObserver {
            return;
        }
        let config = &self.config;
        let remote = self.remotes.entry(entity).or_insert_with(|| RemoteEntity {
            interpolator: RemoteInterpolator::new(config),
            transform: Transform::default(),
            policy: Policy::None,
        });
        remote.interpolator.push(snapshot, &mut self.stats);
    }

    fn on_pong(&mut self, _from: T::Endpoint, _entity: EntityId, client_time: f64) {
        self.rtt.observe(client_time, self.clock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::{LinkConditions, LinkEndpoint, LossyLink};

    fn config() -> SyncConfig {
        SyncConfig {
            client_tick_period: 0.05,
            server_tick_period: 0.05,
            input_buffer_time: 0.0,
            ..Default::default()
        }
    }

    fn setup() -> (
        LossyLink,
        ServerPeer<LinkEndpoint>,
        ClientPeer<LinkEndpoint>,
        ClientPeer<LinkEndpoint>,
    ) {
        let link = LossyLink::new(LinkConditions::PERFECT, 3);
        let server_end = link.endpoint();
        let server_id = server_end.id();
        let a_end = link.endpoint();
        let b_end = link.endpoint();

        let mut server = ServerPeer::new(config(), server_end);
        server.spawn(1, a_end.id(), Transform::default());
        server.spawn(2, b_end.id(), Transform::default());

        let mut a = ClientPeer::new(config(), a_end, server_id);
        a.possess(1, Transform::default());
        let mut b = ClientPeer::new(config(), b_end, server_id);
        b.possess(2, Transform::default());

        (link, server, a, b)
    }

    #[test]
    fn test_roles() {
        let (_link, server, a, _b) = setup();
        assert_eq!(server.role(1), Role::Server);
        assert_eq!(a.role(1), Role::ClientOwner);
        assert_eq!(a.role(2), Role::ClientObserver);
    }

    #[test]
    fn test_owner_gets_ack_observer_gets_snapshot() {
        let (link, mut server, mut a, mut b) = setup();

        for step in 0..10 {
            let now = step as f64 * 0.05;
            link.advance_to(now);
            a.tick(now, Vec2::new(1.0, 0.0));
            b.tick(now, Vec2::ZERO);
            link.advance_to(now);
            server.tick(now);
        }

        assert!(a.predictor().unwrap().last_acked().is_some());
        assert!(b.remote_policy(1).is_some());
        assert!(a.remote_policy(1).is_none());
        assert!(server.transform(1).unwrap().position.x > 0.0);
        assert_eq!(server.transform(2).unwrap().position.x, 0.0);
    }

    #[test]
    fn test_non_owner_commands_ignored() {
        let (link, mut server, mut a, _b) = setup();
        let mut rogue = link.endpoint();
        let command = Command::new(0, Vec2::new(1.0, 0.0), 0.05);
        let forged = Datagram::new(2, Message::Commands(vec![command]));
        rogue.send_unordered(0, forged.encode().unwrap()).unwrap();

        link.advance_to(0.0);
        a.tick(0.0, Vec2::ZERO);
        link.advance_to(0.0);
        server.tick(0.0);

        assert!(server.simulator(2).unwrap().commands().is_empty());
        assert_eq!(server.simulator(1).unwrap().commands().len(), 1);
    }

    #[test]
    fn test_malformed_counted_not_fatal() {
        let (link, mut server, _a, _b) = setup();
        let mut rogue = link.endpoint();
        rogue.send_unordered(0, vec![0xff, 0, 0]).unwrap();
        link.advance_to(0.0);
        server.tick(0.0);
        assert_eq!(server.stats().malformed, 1);
        assert_eq!(server.ticks(), 1);
    }

    #[test]
    fn test_ping_pong_updates_rtt() {
        let (link, mut server, mut a, _b) = setup();
        a.tick(0.0, Vec2::ZERO);
        link.advance_to(0.0);
        server.tick(0.0);
        link.advance_to(0.1);
        a.tick(0.1, Vec2::ZERO);
        assert!((a.rtt() - 0.1).abs() < 1e-9);
    }
}
