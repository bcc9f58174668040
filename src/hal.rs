//! Boundary to the radio hardware service.
//!
//! The manager never talks to a concrete IPC mechanism. It is handed a
//! [`ServiceDirectory`] at construction, discovers a [`RadioService`] through
//! it and reaches the chips through [`RadioChip`]. Asynchronous notifications
//! (service death, service registration, service failure) come back through
//! an [`EventLink`], which only enqueues a [`ManagerEvent`]; the manager
//! processes the queue on its own thread.

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::catalog::{ChipId, ChipMode, IfaceType, ModeId};
use crate::error::{HalError, HalResult};

/// Opaque handle to a ranging (RTT) controller created by a chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct RttControllerHandle(pub u64);

/// One physical radio chip.
pub trait RadioChip: Send + Sync {
    fn id(&self) -> ChipId;

    fn available_modes(&self) -> HalResult<Vec<ChipMode>>;

    /// Currently configured mode, `None` until the chip is first configured.
    fn mode(&self) -> HalResult<Option<ModeId>>;

    fn configure(&self, mode: ModeId) -> HalResult<()>;

    /// Creates an interface of the given type and returns its name.
    fn create_interface(&self, iface_type: IfaceType) -> HalResult<String>;

    fn remove_interface(&self, iface_type: IfaceType, name: &str) -> HalResult<()>;

    fn interface_names(&self, iface_type: IfaceType) -> HalResult<Vec<String>>;

    fn create_rtt_controller(&self) -> HalResult<RttControllerHandle>;
}

/// The root radio service.
pub trait RadioService: Send + Sync {
    fn start(&self) -> HalResult<()>;

    fn stop(&self) -> HalResult<()>;

    fn is_started(&self) -> bool;

    fn chip_ids(&self) -> HalResult<Vec<ChipId>>;

    fn chip(&self, id: ChipId) -> HalResult<Arc<dyn RadioChip>>;

    /// Subscribes `link` to start/stop/failure events.
    fn register_event_callback(&self, link: EventLink) -> HalResult<()>;

    /// Arranges for `link.service_died()` to be called when the service dies.
    fn link_to_death(&self, link: EventLink) -> HalResult<()>;
}

/// Registry of hardware services (the manifest/service manager).
pub trait ServiceDirectory: Send + Sync {
    /// Instances of `interface` declared in the device manifest.
    fn list_manifest_by_interface(&self, interface: &str) -> HalResult<Vec<String>>;

    /// Calls `link.service_registered(..)` whenever `interface`/`instance`
    /// (re)registers.
    fn register_for_notifications(&self, interface: &str, instance: &str, link: EventLink) -> HalResult<()>;

    fn link_to_death(&self, link: EventLink) -> HalResult<()>;

    /// Looks up the running service, if any.
    fn get_service(&self, interface: &str, instance: &str) -> HalResult<Option<Arc<dyn RadioService>>>;
}

/// External notifications, queued for the manager's event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    DirectoryDied,
    ServiceRegistered {
        interface: String,
        instance: String,
        preexisting: bool,
    },
    ServiceDied {
        generation: u64,
    },
    ServiceStarted,
    ServiceStopped,
    ServiceFailure(HalError),
}

/// Sending side of the manager's event queue, tagged with the generation of
/// the service link it was handed to. Deaths from an older generation are
/// ignored by the manager.
#[derive(Debug, Clone)]
pub struct EventLink {
    tx: UnboundedSender<ManagerEvent>,
    generation: u64,
}

impl EventLink {
    pub fn new(tx: UnboundedSender<ManagerEvent>, generation: u64) -> Self {
        EventLink { tx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false when the manager is gone.
    pub fn send(&self, event: ManagerEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn service_died(&self) -> bool {
        self.send(ManagerEvent::ServiceDied {
            generation: self.generation,
        })
    }

    pub fn directory_died(&self) -> bool {
        self.send(ManagerEvent::DirectoryDied)
    }

    pub fn service_registered(&self, interface: &str, instance: &str, preexisting: bool) -> bool {
        self.send(ManagerEvent::ServiceRegistered {
            interface: interface.to_string(),
            instance: instance.to_string(),
            preexisting,
        })
    }

    pub fn service_started(&self) -> bool {
        self.send(ManagerEvent::ServiceStarted)
    }

    pub fn service_stopped(&self) -> bool {
        self.send(ManagerEvent::ServiceStopped)
    }

    pub fn service_failure(&self, status: HalError) -> bool {
        self.send(ManagerEvent::ServiceFailure(status))
    }
}
