//! Live table of interfaces the manager has created.
//!
//! Entries are owned here and referred to elsewhere by [`InterfaceHandle`].
//! Removing an entry hands it back to the caller, which is then responsible
//! for delivering its destroyed-listeners exactly once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::catalog::{ChipId, IfaceType, Priority, TypeCounts};
use crate::listener::{CallbackContext, InterfaceDestroyedListener, ListenerSet};

/// Stable reference to one created interface. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InterfaceHandle(u64);

impl fmt::Display for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct InterfaceEntry {
    pub handle: InterfaceHandle,
    pub name: String,
    pub iface_type: IfaceType,
    pub chip_id: ChipId,
    pub priority: Priority,
    /// Creation order; higher is newer.
    pub created_seq: u64,
    pub created_at: DateTime<Utc>,
    destroyed_listeners: ListenerSet<dyn InterfaceDestroyedListener>,
}

impl InterfaceEntry {
    pub fn add_destroyed_listener(
        &mut self,
        listener: Arc<dyn InterfaceDestroyedListener>,
        context: CallbackContext,
    ) -> bool {
        self.destroyed_listeners.register(listener, context)
    }

    pub fn destroyed_listener_count(&self) -> usize {
        self.destroyed_listeners.len()
    }

    /// Consumes the entry and delivers `on_destroyed` to its listeners.
    pub fn deliver_destroyed(self) {
        let name = self.name;
        self.destroyed_listeners
            .deliver(move |listener| listener.on_destroyed(&name));
    }
}

impl fmt::Debug for InterfaceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceEntry")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("iface_type", &self.iface_type)
            .field("chip_id", &self.chip_id)
            .field("priority", &self.priority)
            .field("created_seq", &self.created_seq)
            .field("listeners", &self.destroyed_listeners.len())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    entries: BTreeMap<InterfaceHandle, InterfaceEntry>,
    next_handle: u64,
    next_seq: u64,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        InterfaceRegistry::default()
    }

    pub fn insert(&mut self, name: String, iface_type: IfaceType, chip_id: ChipId, priority: Priority) -> InterfaceHandle {
        self.next_handle += 1;
        self.next_seq += 1;
        let handle = InterfaceHandle(self.next_handle);
        self.entries.insert(
            handle,
            InterfaceEntry {
                handle,
                name,
                iface_type,
                chip_id,
                priority,
                created_seq: self.next_seq,
                created_at: Utc::now(),
                destroyed_listeners: ListenerSet::new(),
            },
        );
        handle
    }

    pub fn get(&self, handle: InterfaceHandle) -> Option<&InterfaceEntry> {
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: InterfaceHandle) -> Option<&mut InterfaceEntry> {
        self.entries.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: InterfaceHandle) -> Option<InterfaceEntry> {
        self.entries.remove(&handle)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&InterfaceEntry> {
        self.entries.values().find(|e| e.name == name)
    }

    /// Removes every entry, oldest first.
    pub fn drain(&mut self) -> Vec<InterfaceEntry> {
        let mut all: Vec<InterfaceEntry> = std::mem::take(&mut self.entries).into_values().collect();
        all.sort_by_key(|e| e.created_seq);
        all
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterfaceEntry> {
        self.entries.values()
    }

    pub fn on_chip(&self, chip_id: ChipId) -> impl Iterator<Item = &InterfaceEntry> {
        self.entries.values().filter(move |e| e.chip_id == chip_id)
    }

    pub fn counts_on_chip(&self, chip_id: ChipId) -> TypeCounts {
        let mut counts = TypeCounts::default();
        for entry in self.on_chip(chip_id) {
            counts.increment(entry.iface_type);
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
