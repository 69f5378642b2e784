//! Loopback Session
//!
//! One server and any number of clients on an in-memory `LossyLink`, stepped
//! on a shared simulated clock. Server and clients tick at their own
//! configured periods; the link delivers whatever is due before each tick.
//! Used by the demo binary and by end-to-end tests.

use tracing::{debug, info};

use crate::core::hash::{short_hex, StateHash};
use crate::core::math::Vec2;
use crate::network::peer::{ClientPeer, ServerPeer};
use crate::network::protocol::EntityId;
use crate::network::transport::{EndpointId, LinkConditions, LinkEndpoint, LinkStats, LossyLink};
use crate::sync::config::SyncConfig;
use crate::sync::events::SyncStats;
use crate::sync::simulate::Transform;

struct SessionClient {
    entity: EntityId,
    peer: ClientPeer<LinkEndpoint>,
    axis: Vec2,
    paused: bool,
    ticks: u64,
}

/// Per-entity convergence report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityReport {
    /// Entity
    pub entity: EntityId,
    /// Hash of the server's transform
    pub server_hash: StateHash,
    /// Hash of the owner's predicted transform
    pub client_hash: StateHash,
    /// Distance between the two
    pub error: f32,
}

impl EntityReport {
    /// True if client and server agree bit for bit.
    pub fn converged(&self) -> bool {
        self.server_hash == self.client_hash
    }
}

/// Server plus clients on a simulated link.
pub struct LoopbackSession {
    config: SyncConfig,
    link: LossyLink,
    server: ServerPeer<LinkEndpoint>,
    server_endpoint: EndpointId,
    clients: Vec<SessionClient>,
    now: f64,
    server_ticks: u64,
}

impl LoopbackSession {
    /// Create a session with no clients.
    pub fn new(config: SyncConfig, conditions: LinkConditions, seed: u64) -> Self {
        let link = LossyLink::new(conditions, seed);
        let server_end = link.endpoint();
        let server_endpoint = server_end.id();
        let server = ServerPeer::new(config.clone(), server_end);

        info!(
            "loopback session: server {:.1} Hz, clients {:.1} Hz, latency {:.0} ms, loss {:.0}%",
            1.0 / config.server_tick_period,
            1.0 / config.client_tick_period,
            conditions.latency * 1000.0,
            conditions.loss * 100.0
        );

        Self {
            config,
            link,
            server,
            server_endpoint,
            clients: Vec::new(),
            now: 0.0,
            server_ticks: 0,
        }
    }

    /// Connect a client that owns a new entity at `spawn`. Returns the entity.
    pub fn add_client(&mut self, spawn: Transform) -> EntityId {
        let entity = self.clients.len() as EntityId + 1;
        let end = self.link.endpoint();
        self.server.spawn(entity, end.id(), spawn);

        let mut peer = ClientPeer::new(self.config.clone(), end, self.server_endpoint);
        peer.possess(entity, spawn);

        self.clients.push(SessionClient {
            entity,
            peer,
            axis: Vec2::ZERO,
            paused: false,
            ticks: 0,
        });
        entity
    }

    fn client_mut(&mut self, entity: EntityId) -> Option<&mut SessionClient> {
        self.clients.iter_mut().find(|c| c.entity == entity)
    }

    fn client(&self, entity: EntityId) -> Option<&SessionClient> {
        self.clients.iter().find(|c| c.entity == entity)
    }

    /// Hold `axis` as the owner's input from now on.
    pub fn set_input(&mut self, entity: EntityId, axis: Vec2) {
        if let Some(client) = self.client_mut(entity) {
            client.axis = axis;
        }
    }

    /// Stop (or resume) ticking a client, as if its process were suspended.
    ///
    /// A resumed client continues from the current time; missed ticks are
    /// not replayed.
    pub fn set_paused(&mut self, entity: EntityId, paused: bool) {
        let now = self.now;
        let period = self.config.client_tick_period as f64;
        if let Some(client) = self.client_mut(entity) {
            if client.paused && !paused {
                client.ticks = (now / period).ceil() as u64;
            }
            client.paused = paused;
        }
    }

    /// Change link impairments.
    pub fn set_conditions(&self, conditions: LinkConditions) {
        self.link.set_conditions(conditions);
    }

    /// Simulated clock.
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Advance the clock by `seconds`, running every tick that falls due.
    ///
    /// At equal times the server ticks before clients.
    pub fn run_for(&mut self, seconds: f64) {
        let end = self.now + seconds;
        let server_period = self.config.server_tick_period as f64;
        let client_period = self.config.client_tick_period as f64;

        loop {
            let next_server = self.server_ticks as f64 * server_period;
            let next_client = self
                .clients
                .iter()
                .filter(|c| !c.paused)
                .map(|c| c.ticks as f64 * client_period)
                .fold(f64::INFINITY, f64::min);
            let next = next_server.min(next_client);
            if next > end {
                break;
            }

            self.now = next;
            self.link.advance_to(next);

            if next_server <= next {
                self.server.tick(next);
                self.server_ticks += 1;
            }

            for client in self.clients.iter_mut().filter(|c| !c.paused) {
                if client.ticks as f64 * client_period <= next {
                    client.peer.tick(next, client.axis);
                    client.ticks += 1;
                }
            }
        }

        self.now = end;
        self.link.advance_to(end);
        debug!("session advanced to t={:.3}", end);
    }

    /// Authoritative transform of `entity`.
    pub fn server_transform(&self, entity: EntityId) -> Option<Transform> {
        self.server.transform(entity)
    }

    /// Owner's predicted transform of `entity`.
    pub fn client_transform(&self, entity: EntityId) -> Option<Transform> {
        self.client(entity)?.peer.transform(entity)
    }

    /// How `viewer`'s client currently displays `entity`.
    pub fn observed_transform(&self, viewer: EntityId, entity: EntityId) -> Option<Transform> {
        self.client(viewer)?.peer.transform(entity)
    }

    /// Owner's client peer.
    pub fn client_peer(&self, entity: EntityId) -> Option<&ClientPeer<LinkEndpoint>> {
        self.client(entity).map(|c| &c.peer)
    }

    /// Server peer.
    pub fn server(&self) -> &ServerPeer<LinkEndpoint> {
        &self.server
    }

    /// Server and client events combined.
    pub fn stats(&self) -> SyncStats {
        let mut total = self.server.stats().clone();
        for client in &self.clients {
            total.merge(client.peer.stats());
        }
        total
    }

    /// Link counters.
    pub fn link_stats(&self) -> LinkStats {
        self.link.stats()
    }

    /// Compare server and owner state for every entity.
    pub fn reports(&self) -> Vec<EntityReport> {
        self.clients
            .iter()
            .filter_map(|c| {
                let server = self.server.transform(c.entity)?;
                let client = c.peer.transform(c.entity)?;
                Some(EntityReport {
                    entity: c.entity,
                    server_hash: server.state_hash(),
                    client_hash: client.state_hash(),
                    error: server.position.distance(client.position),
                })
            })
            .collect()
    }

    /// Log one line per entity.
    pub fn log_reports(&self) {
        for report in self.reports() {
            info!(
                "entity {}: server {} client {} error {:.6} {}",
                report.entity,
                short_hex(&report.server_hash),
                short_hex(&report.client_hash),
                report.error,
                if report.converged() { "converged" } else { "diverged" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::Vec3;

    fn config() -> SyncConfig {
        SyncConfig::default()
    }

    fn run_move_then_stop(session: &mut LoopbackSession, entity: EntityId, axis: Vec2) {
        session.set_input(entity, axis);
        session.run_for(2.0);
        session.set_input(entity, Vec2::ZERO);
        session.run_for(2.0);
    }

    #[test]
    fn test_perfect_link_converges_without_pops() {
        let mut session = LoopbackSession::new(config(), LinkConditions::PERFECT, 1);
        let a = session.add_client(Transform::default());
        run_move_then_stop(&mut session, a, Vec2::new(1.0, 0.5));

        let report = session.reports()[0];
        assert!(report.converged(), "{:?}", report);
        assert!(session.server_transform(a).unwrap().position.x > 5.0);

        let stats = session.stats();
        assert!(stats.corrections > 0);
        assert!(stats.max_pop < 1e-4, "pop {}", stats.max_pop);
        assert_eq!(stats.resyncs, 0);
        assert_eq!(stats.starvation_padded, 0);
    }

    #[test]
    fn test_lossy_link_converges() {
        let conditions = LinkConditions {
            latency: 0.04,
            jitter: 0.03,
            loss: 0.1,
            duplicate: 0.05,
        };
        let mut session = LoopbackSession::new(config(), conditions, 7);
        let a = session.add_client(Transform::at(Vec3::new(-10.0, 0.0, 0.0)));
        run_move_then_stop(&mut session, a, Vec2::new(0.0, -1.0));

        assert!(session.reports()[0].converged());
        let link = session.link_stats();
        assert!(link.lost > 0);
        assert!(link.duplicated > 0);
        assert!(session.stats().commands_overwritten > 0);
    }

    #[test]
    fn test_mismatched_tick_rates_converge() {
        let cfg = SyncConfig {
            client_tick_period: 0.2,
            server_tick_period: 0.3,
            input_buffer_time: 0.4,
            ..Default::default()
        };
        let mut session = LoopbackSession::new(cfg, LinkConditions::PERFECT, 1);
        let a = session.add_client(Transform::default());
        session.set_input(a, Vec2::new(1.0, 0.0));
        session.run_for(6.0);
        session.set_input(a, Vec2::ZERO);
        session.run_for(6.0);

        assert!(session.reports()[0].converged());
        // 12 s of wall time at 0.3 s per tick.
        let simulated = session.server().simulator(a).unwrap().simulated_time();
        assert!(simulated > 11.0 && simulated <= 12.2, "simulated {}", simulated);
    }

    #[test]
    fn test_observer_sees_owner() {
        let conditions = LinkConditions {
            latency: 0.03,
            jitter: 0.01,
            ..LinkConditions::PERFECT
        };
        let mut session = LoopbackSession::new(config(), conditions, 3);
        let a = session.add_client(Transform::default());
        let b = session.add_client(Transform::at(Vec3::new(5.0, 0.0, 5.0)));
        run_move_then_stop(&mut session, a, Vec2::new(1.0, 1.0));

        let truth = session.server_transform(a).unwrap();
        let seen = session.observed_transform(b, a).unwrap();
        assert!(truth.position.distance(seen.position) < 1e-3);
        assert!(truth.rotation.angle_to(seen.rotation) < 1e-2);
    }

    #[test]
    fn test_rtt_is_measured() {
        let conditions = LinkConditions {
            latency: 0.05,
            jitter: 0.0,
            ..LinkConditions::PERFECT
        };
        let mut session = LoopbackSession::new(config(), conditions, 1);
        let a = session.add_client(Transform::default());
        session.run_for(3.0);

        let rtt = session.client_peer(a).unwrap().rtt();
        assert!(rtt > 0.099 && rtt < 0.2, "rtt {}", rtt);
    }

    #[test]
    fn test_suspended_client_resyncs() {
        let conditions = LinkConditions {
            latency: 0.02,
            ..LinkConditions::PERFECT
        };
        let mut session = LoopbackSession::new(config(), conditions, 5);
        let a = session.add_client(Transform::default());

        session.set_input(a, Vec2::new(1.0, 0.0));
        session.run_for(1.0);
        session.set_paused(a, true);
        session.run_for(1.0);
        session.set_paused(a, false);
        session.run_for(1.0);
        session.set_input(a, Vec2::ZERO);
        session.run_for(2.0);

        let stats = session.stats();
        assert!(stats.starvation_padded > 0);
        assert!(stats.resyncs > 0);
        assert!(session.reports()[0].converged());
    }

    #[test]
    fn test_same_seed_same_session() {
        let run = || {
            let conditions = LinkConditions {
                latency: 0.03,
                jitter: 0.04,
                loss: 0.2,
                duplicate: 0.1,
            };
            let mut session = LoopbackSession::new(config(), conditions, 11);
            let a = session.add_client(Transform::default());
            session.set_input(a, Vec2::new(0.7, -0.3));
            session.run_for(2.0);
            session.server_transform(a).unwrap().state_hash()
        };
        assert_eq!(run(), run());
    }
}
