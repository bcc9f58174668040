//! Ranging controller lifetime, tied to chip modes rather than interfaces.
//!
//! At most one controller exists at a time and only while someone is
//! subscribed. Creating one needs hardware, so this type only keeps the state
//! and the subscribers; the coordinator decides when to create or drop it.

use std::sync::Arc;
use tracing::{debug, info};

use crate::catalog::ChipId;
use crate::hal::RttControllerHandle;
use crate::listener::{CallbackContext, ListenerSet, RttControllerLifecycleListener, deliver_one};

#[derive(Default)]
pub struct RttControllerLifecycleManager {
    listeners: ListenerSet<dyn RttControllerLifecycleListener>,
    controller: Option<(ChipId, RttControllerHandle)>,
}

impl RttControllerLifecycleManager {
    pub fn new() -> Self {
        RttControllerLifecycleManager::default()
    }

    /// Adds a subscriber. If a controller already exists only the new
    /// subscriber hears about it. Returns false for a duplicate.
    pub fn register(&mut self, listener: Arc<dyn RttControllerLifecycleListener>, context: CallbackContext) -> bool {
        if !self.listeners.register(listener, context) {
            debug!("duplicate RTT lifecycle listener ignored");
            return false;
        }
        if let (Some((_, handle)), Some(registration)) = (self.controller, self.listeners.last()) {
            deliver_one(registration, move |l| l.on_new_rtt_controller(handle));
        }
        true
    }

    /// True when a controller should be created: someone listens and none
    /// exists.
    pub fn needs_controller(&self) -> bool {
        self.controller.is_none() && !self.listeners.is_empty()
    }

    pub fn install(&mut self, chip_id: ChipId, handle: RttControllerHandle) {
        info!(chip = chip_id, controller = handle.0, "RTT controller created");
        self.controller = Some((chip_id, handle));
        self.listeners.deliver(move |l| l.on_new_rtt_controller(handle));
    }

    /// Drops the controller, if any, and tells every subscriber.
    pub fn destroy(&mut self) {
        if let Some((chip_id, handle)) = self.controller.take() {
            info!(chip = chip_id, controller = handle.0, "RTT controller destroyed");
            self.listeners.deliver(|l| l.on_rtt_controller_destroyed());
        }
    }

    pub fn controller(&self) -> Option<RttControllerHandle> {
        self.controller.map(|(_, handle)| handle)
    }

    pub fn controller_chip(&self) -> Option<ChipId> {
        self.controller.map(|(chip, _)| chip)
    }
}
