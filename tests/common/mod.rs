//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use radio_manager::catalog::{ChipId, ChipMode, Combination, IfaceType};
use radio_manager::hal::RttControllerHandle;
use radio_manager::listener::{
    InterfaceAvailableListener, InterfaceDestroyedListener, ManagerStatusListener,
    RttControllerLifecycleListener,
};
use radio_manager::sim::{SimChip, SimDirectory, SimService};
use radio_manager::{ManagerConfig, RadioManager};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn position(log: &Log, entry: &str) -> usize {
    entries(log)
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("'{entry}' not in {:?}", entries(log)))
}

/// Records every callback as `"<tag>:<event>"` into a shared log.
pub struct Recorder {
    log: Log,
    tag: String,
}

impl Recorder {
    pub fn new(log: &Log, tag: &str) -> Arc<Self> {
        Arc::new(Recorder {
            log: log.clone(),
            tag: tag.to_string(),
        })
    }

    fn push(&self, event: String) {
        self.log.lock().unwrap().push(format!("{}:{}", self.tag, event));
    }
}

impl InterfaceDestroyedListener for Recorder {
    fn on_destroyed(&self, iface_name: &str) {
        self.push(format!("destroyed {iface_name}"));
    }
}

impl InterfaceAvailableListener for Recorder {
    fn on_availability_changed(&self, available: bool) {
        self.push(format!("available {available}"));
    }
}

impl ManagerStatusListener for Recorder {
    fn on_status_changed(&self) {
        self.push("status".to_string());
    }
}

impl RttControllerLifecycleListener for Recorder {
    fn on_new_rtt_controller(&self, controller: RttControllerHandle) {
        self.push(format!("rtt new {}", controller.0));
    }

    fn on_rtt_controller_destroyed(&self) {
        self.push("rtt destroyed".to_string());
    }
}

pub fn fast_config() -> ManagerConfig {
    ManagerConfig {
        start_retry_interval_ms: 0,
        ..ManagerConfig::default()
    }
}

/// Mode 0: STA + (P2P | NAN). Mode 1: AP, without RTT.
pub fn single_sta_modes() -> Vec<ChipMode> {
    vec![
        ChipMode::new(0).with_combination(
            Combination::new()
                .limit(1, [IfaceType::Sta])
                .limit(1, [IfaceType::P2p, IfaceType::Nan]),
        ),
        ChipMode::new(1)
            .with_combination(Combination::new().limit(1, [IfaceType::Ap]))
            .without_rtt(),
    ]
}

/// One mode: STA + (STA | AP) + (P2P | NAN).
pub fn dual_sta_modes() -> Vec<ChipMode> {
    vec![ChipMode::new(5).with_combination(
        Combination::new()
            .limit(1, [IfaceType::Sta])
            .limit(1, [IfaceType::Sta, IfaceType::Ap])
            .limit(1, [IfaceType::P2p, IfaceType::Nan]),
    )]
}

/// One mode with two combinations: STA + (STA | AP), or STA + (P2P | NAN).
pub fn split_combination_modes() -> Vec<ChipMode> {
    vec![ChipMode::new(7)
        .with_combination(
            Combination::new()
                .limit(1, [IfaceType::Sta])
                .limit(1, [IfaceType::Sta, IfaceType::Ap]),
        )
        .with_combination(
            Combination::new()
                .limit(1, [IfaceType::Sta])
                .limit(1, [IfaceType::P2p, IfaceType::Nan]),
        )]
}

/// One mode with two combinations: STA + AP, or STA + (P2P | NAN).
pub fn sta_ap_or_p2p_modes() -> Vec<ChipMode> {
    vec![ChipMode::new(15)
        .with_combination(
            Combination::new()
                .limit(1, [IfaceType::Sta])
                .limit(1, [IfaceType::Ap]),
        )
        .with_combination(
            Combination::new()
                .limit(1, [IfaceType::Sta])
                .limit(1, [IfaceType::P2p, IfaceType::Nan]),
        )]
}

pub struct Rig {
    pub manager: RadioManager,
    pub service: Arc<SimService>,
    pub directory: Arc<SimDirectory>,
    pub chips: Vec<Arc<SimChip>>,
    pub config: ManagerConfig,
}

impl Rig {
    /// A manager over the given chips, initialized but not started.
    pub fn new(chips: Vec<(ChipId, Vec<ChipMode>)>) -> Self {
        let config = fast_config();
        let chips: Vec<Arc<SimChip>> = chips
            .into_iter()
            .map(|(id, modes)| Arc::new(SimChip::new(id, modes)))
            .collect();
        let service = Arc::new(SimService::new(chips.clone()));
        let directory = Arc::new(SimDirectory::new(config.service_name.clone()));
        directory.register_service(&config.service_instance, service.clone());

        let mut manager = RadioManager::new(directory.clone(), config.clone());
        assert!(manager.initialize());

        Rig {
            manager,
            service,
            directory,
            chips,
            config,
        }
    }

    pub fn started(chips: Vec<(ChipId, Vec<ChipMode>)>) -> Self {
        let mut rig = Rig::new(chips);
        assert!(rig.manager.start());
        rig
    }

    pub fn chip(&self, index: usize) -> &SimChip {
        &self.chips[index]
    }

    /// Re-announces the service, as the directory does after a restart.
    pub fn reregister(&self) {
        self.directory
            .register_service(&self.config.service_instance, self.service.clone());
    }
}
