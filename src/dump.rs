//! Point-in-time view of the manager for diagnostics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::catalog::{ChipId, IfaceType, ModeId, Priority};
use crate::coordinator::LifecycleCoordinator;
use crate::hal::RttControllerHandle;
use crate::registry::InterfaceHandle;
use crate::supervisor::{ServiceSupervisor, SupervisorState};

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceSnapshot {
    pub handle: InterfaceHandle,
    pub name: String,
    pub iface_type: IfaceType,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub destroyed_listeners: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChipSnapshot {
    pub id: ChipId,
    pub active_mode: Option<ModeId>,
    pub modes: Vec<ModeId>,
    pub interfaces: Vec<InterfaceSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub captured_at: DateTime<Utc>,
    pub state: SupervisorState,
    pub generation: u64,
    pub directory_linked: bool,
    pub rtt_controller: Option<RttControllerHandle>,
    pub chips: Vec<ChipSnapshot>,
}

impl ManagerSnapshot {
    pub fn capture(supervisor: &ServiceSupervisor, coordinator: &LifecycleCoordinator) -> Self {
        let registry = coordinator.registry();
        let chips = coordinator
            .catalog()
            .chips()
            .map(|info| {
                let mut interfaces: Vec<InterfaceSnapshot> = registry
                    .on_chip(info.id)
                    .map(|entry| InterfaceSnapshot {
                        handle: entry.handle,
                        name: entry.name.clone(),
                        iface_type: entry.iface_type,
                        priority: entry.priority,
                        created_at: entry.created_at,
                        destroyed_listeners: entry.destroyed_listener_count(),
                    })
                    .collect();
                interfaces.sort_by_key(|i| i.handle);
                ChipSnapshot {
                    id: info.id,
                    active_mode: coordinator.active_mode(info.id),
                    modes: info.modes.iter().map(|m| m.id).collect(),
                    interfaces,
                }
            })
            .collect();

        ManagerSnapshot {
            captured_at: Utc::now(),
            state: supervisor.state(),
            generation: supervisor.generation(),
            directory_linked: supervisor.directory_linked(),
            rtt_controller: coordinator.rtt_controller(),
            chips,
        }
    }

    pub fn interface_count(&self) -> usize {
        self.chips.iter().map(|c| c.interfaces.len()).sum()
    }
}

impl fmt::Display for ManagerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Radio manager ({})", self.captured_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "  state:            {}", self.state)?;
        writeln!(f, "  generation:       {}", self.generation)?;
        writeln!(f, "  directory linked: {}", self.directory_linked)?;
        match self.rtt_controller {
            Some(handle) => writeln!(f, "  rtt controller:   {}", handle.0)?,
            None => writeln!(f, "  rtt controller:   -")?,
        }

        if self.chips.is_empty() {
            return writeln!(f, "No chips discovered.");
        }

        for chip in &self.chips {
            writeln!(f)?;
            let mode = chip
                .active_mode
                .map_or_else(|| "-".to_string(), |m| m.to_string());
            writeln!(f, "Chip {} (mode {}, {} modes)", chip.id, mode, chip.modes.len())?;
            if chip.interfaces.is_empty() {
                writeln!(f, "  no interfaces")?;
                continue;
            }
            writeln!(f, "  {:<6} {:<12} {:<6} {:<8} {}", "HANDLE", "NAME", "TYPE", "PRIORITY", "CREATED")?;
            writeln!(f, "  {}", "-".repeat(56))?;
            for iface in &chip.interfaces {
                writeln!(
                    f,
                    "  {:<6} {:<12} {:<6} {:<8} {}",
                    iface.handle.to_string(),
                    iface.name,
                    iface.iface_type.to_string(),
                    iface.priority.to_string(),
                    iface.created_at.format("%H:%M:%S%.3f")
                )?;
            }
        }
        Ok(())
    }
}
