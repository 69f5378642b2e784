//! Client-Side Prediction
//!
//! The owner of an entity issues one command per local tick, applies it to
//! its own transform right away and resends everything the server has not
//! acknowledged yet. Acks are handed to the reconciler and processed at the
//! start of the following tick.

use crate::core::math::Vec2;
use crate::sync::command::{Command, CommandBuffer};
use crate::sync::config::SyncConfig;
use crate::sync::events::Instrument;
use crate::sync::reconcile::{Reconciler, Rollback};
use crate::sync::simulate::{simulate_actor, Actor};
use crate::sync::snapshot::Ack;

/// Result of one predicted tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictedTick {
    /// Command issued and applied this tick.
    pub command: Command,
    /// Rollback performed before issuing, if an ack was pending.
    pub rollback: Option<Rollback>,
}

/// Predicts the locally owned entity.
#[derive(Clone, Debug)]
pub struct ClientPredictor {
    config: SyncConfig,
    commands: CommandBuffer,
    last_simulated: Option<u32>,
    reconciler: Reconciler,
}

impl ClientPredictor {
    /// Create a predictor with an empty buffer.
    pub fn new(config: SyncConfig) -> Self {
        let reconciler = Reconciler::new(&config);
        Self {
            config,
            commands: CommandBuffer::new(),
            last_simulated: None,
            reconciler,
        }
    }

    /// Issued commands, including resync fillers.
    pub fn commands(&self) -> &CommandBuffer {
        &self.commands
    }

    /// Newest sequence applied to the local transform.
    pub fn last_simulated(&self) -> Option<u32> {
        self.last_simulated
    }

    /// Newest sequence the server has acknowledged and we have processed.
    pub fn last_acked(&self) -> Option<u32> {
        self.reconciler.last_acked()
    }

    /// True if an ack will be reconciled on the next tick.
    pub fn rollback_pending(&self) -> bool {
        self.reconciler.has_pending()
    }

    /// Run one local tick.
    ///
    /// Reconciles a pending ack first, then issues a command for `axis`,
    /// appends it and applies it to `actor`.
    pub fn tick(
        &mut self,
        axis: Vec2,
        actor: &mut impl Actor,
        rtt: f64,
        sink: &mut impl Instrument,
    ) -> PredictedTick {
        let rollback = self.reconciler.rollback(
            &mut self.commands,
            &mut self.last_simulated,
            actor,
            &self.config.motion,
            rtt,
            sink,
        );

        let command = self.commands.issue(axis, self.config.client_tick_period);
        simulate_actor(actor, &command, &self.config.motion);
        self.last_simulated = Some(command.sequence);

        PredictedTick { command, rollback }
    }

    /// Queue an ack for reconciliation. Stale acks are dropped.
    pub fn on_ack(&mut self, ack: Ack, sink: &mut impl Instrument) -> bool {
        self.reconciler.on_ack(ack, sink)
    }

    /// Commands the server has not acknowledged, oldest first.
    ///
    /// The whole tail is resent every tick; each command carries its own
    /// sequence so the server can discard duplicates.
    pub fn unacknowledged(&self) -> &[Command] {
        self.commands.after(self.reconciler.last_acked())
    }
}
