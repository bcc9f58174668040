//! Radio resource manager.
//!
//! Arbitrates the logical WiFi interfaces (station, access point, P2P and
//! NAN) that a handful of radio chips can host at the same time. Each chip
//! has a fixed catalog of modes; creating an interface the active mode
//! cannot host means switching modes or evicting something, and the manager
//! picks the cheapest plan that the requester is entitled to.
//!
//! # Modules
//!
//! - [`catalog`] - Chips, modes and interface combinations
//! - [`hal`] - Traits for the hardware service, its chips and the service directory
//! - [`registry`] - Interfaces created so far
//! - [`planner`] - Choosing a mode and the interfaces to evict
//! - [`coordinator`] - Running plans against the hardware
//! - [`supervisor`] - Service start/stop, death and recovery
//! - [`manager`] - The public facade
//! - [`sim`] - In-memory hardware for demos and tests

/// Availability module tracking which interface types can currently be created.
/// Tells subscribers only when a type's availability flips.
pub mod availability;

/// Catalog module describing chip modes and the interface combinations they allow.
/// Expands combination limits into per-type capacities.
pub mod catalog;

/// Configuration module for manager settings and chip catalog files.
/// Handles reading/writing TOML config files under the user config directory.
pub mod config;

/// Coordinator module that executes allocation plans against the chips.
/// Keeps the registry, availability and RTT controller in step with the hardware.
pub mod coordinator;

/// Dump module producing point-in-time snapshots for diagnostics.
/// Snapshots serialize with serde and render as a text table.
pub mod dump;

/// Error module defining hardware status and manager error types.
/// Uses `thiserror` for ergonomic error handling.
pub mod error;

/// HAL module with the traits the manager drives: service directory, service and chips.
/// Also defines the hardware events queued back to the manager.
pub mod hal;

/// Listener module with the callback traits and the contexts they run on.
/// Handles duplicate registrations and deferred delivery through loopers.
pub mod listener;

/// Logging module that installs the tracing subscriber for the binary.
pub mod logging;

/// Manager module exposing the public API.
/// Wraps the supervisor and coordinator and drains hardware events.
pub mod manager;

/// Planner module choosing a chip, a mode and the interfaces to evict.
/// Pure function of the catalog, the active modes and the registry.
pub mod planner;

/// Registry module tracking every interface the manager created.
pub mod registry;

/// RTT module managing the lifecycle of the shared ranging controller.
pub mod rtt;

/// Simulation module with in-memory chips, service and directory.
/// Used by the binary and the tests in place of real hardware.
pub mod sim;

/// Supervisor module owning the link to the hardware service.
/// Handles start retries, death, failure and recovery.
pub mod supervisor;

// Re-export the catalog vocabulary used in every request
pub use catalog::{ChipId, IfaceType, ModeId, Priority};

// Re-export configuration and diagnostics types
pub use config::ManagerConfig;
pub use dump::ManagerSnapshot;

// Re-export the error types for library users
pub use error::{HalError, RadioManagerError};

// Re-export callback contexts for listener registration
pub use listener::{CallbackContext, Looper};

// Re-export the manager facade and its handles
pub use manager::{RadioManager, SharedRadioManager};
pub use registry::InterfaceHandle;
pub use supervisor::SupervisorState;
