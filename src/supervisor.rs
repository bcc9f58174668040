//! Lifecycle of the link to the hardware service.
//!
//! ```text
//! Uninitialized -> Discovering -> Ready(stopped) <-> Ready(started)
//!                                      |                  |
//!                                      +------> Dead <----+
//! ```
//!
//! The supervisor owns the service handle and the status listeners. Anything
//! that has to tear interfaces down is done through the coordinator it is
//! handed, so that destroyed-listeners fire before status listeners.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::coordinator::LifecycleCoordinator;
use crate::hal::{EventLink, ManagerEvent, RadioService, ServiceDirectory};
use crate::listener::{CallbackContext, ListenerSet, ManagerStatusListener};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Uninitialized,
    Discovering,
    Ready { started: bool },
    Dead,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Uninitialized => write!(f, "uninitialized"),
            SupervisorState::Discovering => write!(f, "discovering"),
            SupervisorState::Ready { started: true } => write!(f, "started"),
            SupervisorState::Ready { started: false } => write!(f, "stopped"),
            SupervisorState::Dead => write!(f, "dead"),
        }
    }
}

pub struct ServiceSupervisor {
    config: ManagerConfig,
    directory: Arc<dyn ServiceDirectory>,
    events: UnboundedSender<ManagerEvent>,
    service: Option<Arc<dyn RadioService>>,
    state: SupervisorState,
    /// Bumped for every service link; deaths of older links are ignored.
    generation: u64,
    directory_linked: bool,
    status_listeners: ListenerSet<dyn ManagerStatusListener>,
}

impl ServiceSupervisor {
    pub fn new(
        directory: Arc<dyn ServiceDirectory>,
        config: ManagerConfig,
        events: UnboundedSender<ManagerEvent>,
    ) -> Self {
        ServiceSupervisor {
            config,
            directory,
            events,
            service: None,
            state: SupervisorState::Uninitialized,
            generation: 0,
            directory_linked: false,
            status_listeners: ListenerSet::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn directory_linked(&self) -> bool {
        self.directory_linked
    }

    pub fn is_ready(&self) -> bool {
        self.service.is_some() && matches!(self.state, SupervisorState::Ready { .. })
    }

    pub fn is_started(&self) -> bool {
        self.service.is_some() && self.state == SupervisorState::Ready { started: true }
    }

    /// Whether the device declares the radio service at all.
    pub fn is_supported(&self) -> bool {
        match self.directory.list_manifest_by_interface(&self.config.service_name) {
            Ok(instances) => !instances.is_empty(),
            Err(e) => {
                warn!(error = %e, "manifest query failed");
                false
            }
        }
    }

    pub fn register_status_listener(
        &mut self,
        listener: Arc<dyn ManagerStatusListener>,
        context: CallbackContext,
    ) -> bool {
        self.status_listeners.register(listener, context)
    }

    fn notify_status(&self) {
        self.status_listeners.deliver(|l| l.on_status_changed());
    }

    /// Moves to `state`. Listeners only hear about an actual change.
    fn transition(&mut self, state: SupervisorState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.notify_status();
    }

    /// Links to the directory and, if the service is declared and running,
    /// to the service. Returns whether the service is now ready.
    pub fn initialize(&mut self) -> bool {
        if !self.directory_linked {
            if let Err(e) = self.link_directory() {
                error!(error = %e, "could not link to the service directory");
                return false;
            }
        }
        if !self.is_supported() {
            info!(service = %self.config.service_name, "radio service not declared, staying uninitialized");
            return false;
        }
        if self.service.is_some() {
            return self.is_ready();
        }
        self.connect()
    }

    fn link_directory(&mut self) -> crate::error::HalResult<()> {
        let link = EventLink::new(self.events.clone(), 0);
        self.directory.link_to_death(link.clone())?;
        self.directory.register_for_notifications(
            &self.config.service_name,
            &self.config.service_instance,
            link,
        )?;
        self.directory_linked = true;
        Ok(())
    }

    fn connect(&mut self) -> bool {
        self.state = SupervisorState::Discovering;
        let service = match self
            .directory
            .get_service(&self.config.service_name, &self.config.service_instance)
        {
            Ok(Some(service)) => service,
            Ok(None) => {
                info!("radio service not running yet, waiting for registration");
                self.state = SupervisorState::Uninitialized;
                return false;
            }
            Err(e) => {
                warn!(error = %e, "service lookup failed");
                self.state = SupervisorState::Uninitialized;
                return false;
            }
        };

        self.generation += 1;
        let link = EventLink::new(self.events.clone(), self.generation);
        let linked = service
            .link_to_death(link.clone())
            .and_then(|()| service.register_event_callback(link));
        if let Err(e) = linked {
            warn!(error = %e, "could not link to the radio service");
            self.state = SupervisorState::Uninitialized;
            return false;
        }

        // Start from a known state whatever the service was doing before.
        if let Err(e) = service.stop() {
            warn!(error = %e, "initial stop failed");
        }

        info!(generation = self.generation, "radio service linked");
        self.service = Some(service);
        self.state = SupervisorState::Ready { started: false };
        true
    }

    /// Starts the hardware, retrying while it reports "not available", then
    /// discovers chips. Listeners hear about the transition once.
    pub fn start(&mut self, coordinator: &mut LifecycleCoordinator) -> bool {
        let Some(service) = self.service.clone() else {
            debug!("start requested without a service");
            return false;
        };
        match self.state {
            SupervisorState::Ready { started: true } => return true,
            SupervisorState::Ready { started: false } => {}
            state => {
                debug!(%state, "start requested while not ready");
                return false;
            }
        }

        let attempts = self.config.start_retry_times + 1;
        for attempt in 1..=attempts {
            match service.start() {
                Ok(()) => break,
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(attempt, error = %e, "radio service start not available, retrying");
                    std::thread::sleep(self.config.start_retry_interval());
                }
                Err(e) => {
                    error!(attempt, error = %e, "radio service start failed");
                    return false;
                }
            }
        }

        if let Err(e) = coordinator.discover(&*service) {
            error!(error = %e, "chip discovery failed");
            coordinator.teardown();
            if let Err(e) = service.stop() {
                warn!(error = %e, "stop after failed discovery failed");
            }
            return false;
        }

        info!("radio service started");
        self.state = SupervisorState::Ready { started: true };
        coordinator.after_mutation();
        self.notify_status();
        true
    }

    /// Tears down every interface, then stops the hardware.
    pub fn stop(&mut self, coordinator: &mut LifecycleCoordinator) {
        let Some(service) = self.service.clone() else {
            debug!("stop requested without a service");
            return;
        };
        coordinator.teardown();
        if let Err(e) = service.stop() {
            warn!(error = %e, "radio service stop failed");
        }
        info!("radio service stopped");
        self.transition(SupervisorState::Ready { started: false });
    }

    /// Recovery after the registry was found out of sync with the hardware.
    pub fn force_stop(&mut self, coordinator: &mut LifecycleCoordinator) {
        warn!("forcing a full stop to resynchronize with the hardware");
        self.stop(coordinator);
    }

    pub fn handle_event(&mut self, event: ManagerEvent, coordinator: &mut LifecycleCoordinator) {
        match event {
            ManagerEvent::DirectoryDied => {
                error!("service directory died");
                self.directory_linked = false;
            }
            ManagerEvent::ServiceRegistered {
                interface,
                instance,
                preexisting,
            } => {
                if self.service.is_some() {
                    debug!(%interface, %instance, preexisting, "registration ignored, service already held");
                    return;
                }
                info!(%interface, %instance, preexisting, "radio service registered");
                self.connect();
            }
            ManagerEvent::ServiceDied { generation } => {
                if self.service.is_none() || generation != self.generation {
                    debug!(generation, current = self.generation, "stale death notification ignored");
                    return;
                }
                error!(generation, "radio service died");
                coordinator.teardown();
                self.service = None;
                self.transition(SupervisorState::Dead);
            }
            ManagerEvent::ServiceStarted => debug!("radio service reports started"),
            ManagerEvent::ServiceStopped => debug!("radio service reports stopped"),
            ManagerEvent::ServiceFailure(status) => {
                if self.service.is_none() {
                    return;
                }
                error!(error = %status, "radio service reported a failure");
                coordinator.teardown();
                self.transition(SupervisorState::Ready { started: false });
            }
        }
    }
}
