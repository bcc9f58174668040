use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use radio_manager::{
    CallbackContext, HalError, IfaceType, ManagerConfig, Priority, RadioManager,
    catalog::{ChipInfo, ChipMode, ChipModeCatalog, Combination},
    config,
    hal::RttControllerHandle,
    listener::{
        InterfaceAvailableListener, InterfaceDestroyedListener, ManagerStatusListener,
        RttControllerLifecycleListener,
    },
    logging,
    sim::{SimChip, SimDirectory, SimService},
};

#[derive(Parser)]
#[command(name = "radio-manager")]
#[command(about = "Allocate WiFi interfaces across radio chips and their modes")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    ShowConfig,

    /// List the interface types each chip supports
    Supported {
        /// Chip catalog file (defaults to the built-in demo chip)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Drive a simulated manager through a sequence of steps
    Run {
        /// Chip catalog file (defaults to the built-in demo chip)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Print the final snapshot as JSON
        #[arg(long)]
        json: bool,

        /// Steps: start, stop, create:<type>[:low], remove:<name>, kill,
        /// register, fail, dump
        #[arg(required = true)]
        steps: Vec<Step>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Start,
    Stop,
    Create(IfaceType, Priority),
    Remove(String),
    Kill,
    Register,
    Fail,
    Dump,
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let step = match (parts.next(), parts.next(), parts.next()) {
            (Some("start"), None, None) => Step::Start,
            (Some("stop"), None, None) => Step::Stop,
            (Some("kill"), None, None) => Step::Kill,
            (Some("register"), None, None) => Step::Register,
            (Some("fail"), None, None) => Step::Fail,
            (Some("dump"), None, None) => Step::Dump,
            (Some("create"), Some(kind), None) => Step::Create(kind.parse()?, Priority::Normal),
            (Some("create"), Some(kind), Some("low")) => Step::Create(kind.parse()?, Priority::Low),
            (Some("remove"), Some(name), None) if !name.is_empty() => Step::Remove(name.to_string()),
            _ => return Err(format!("unrecognized step '{s}'")),
        };
        Ok(step)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(logging::level_for(cli.verbose));

    let cfg = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::ShowConfig => cmd_show_config(cli.config.as_deref(), &cfg),
        Commands::Supported { catalog } => cmd_supported(&cfg, catalog.as_deref()),
        Commands::Run {
            catalog,
            json,
            steps,
        } => cmd_run(&cfg, catalog.as_deref(), json, &steps),
    }
}

fn load_config(path: Option<&Path>) -> Result<ManagerConfig> {
    match path {
        Some(path) => ManagerConfig::load_from(path),
        None => ManagerConfig::load(),
    }
}

/// Single-STA chip: STA plus one of P2P/NAN, or a lone AP without RTT.
fn demo_catalog() -> ChipModeCatalog {
    ChipModeCatalog::new([ChipInfo::new(0)
        .with_mode(
            ChipMode::new(0).with_combination(
                Combination::new()
                    .limit(1, [IfaceType::Sta])
                    .limit(1, [IfaceType::P2p, IfaceType::Nan]),
            ),
        )
        .with_mode(
            ChipMode::new(1)
                .with_combination(Combination::new().limit(1, [IfaceType::Ap]))
                .without_rtt(),
        )])
}

fn resolve_catalog(cfg: &ManagerConfig, catalog: Option<&Path>) -> Result<ChipModeCatalog> {
    match catalog.or(cfg.catalog.as_deref()) {
        Some(path) => config::load_catalog(path),
        None => Ok(demo_catalog()),
    }
}

struct Rig {
    manager: RadioManager,
    service: Arc<SimService>,
    directory: Arc<SimDirectory>,
}

fn build_rig(cfg: &ManagerConfig, catalog: &ChipModeCatalog) -> Rig {
    let chips: Vec<Arc<SimChip>> = catalog
        .chips()
        .map(|info| Arc::new(SimChip::new(info.id, info.modes.clone())))
        .collect();
    let service = Arc::new(SimService::new(chips));
    let directory = Arc::new(SimDirectory::new(cfg.service_name.clone()));
    directory.register_service(&cfg.service_instance, service.clone());
    let manager = RadioManager::new(directory.clone(), cfg.clone());
    Rig {
        manager,
        service,
        directory,
    }
}

fn cmd_show_config(path: Option<&Path>, cfg: &ManagerConfig) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config::config_path()?,
    };
    println!("Config file: {}", path.display());
    println!();

    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    print!("{}", content);

    Ok(())
}

fn cmd_supported(cfg: &ManagerConfig, catalog: Option<&Path>) -> Result<()> {
    let catalog = resolve_catalog(cfg, catalog)?;
    let mut rig = build_rig(cfg, &catalog);
    if !rig.manager.initialize() || !rig.manager.start() {
        bail!("Simulated radio service did not start");
    }

    println!("{:<8} {}", "CHIP", "TYPES");
    println!("{}", "-".repeat(40));
    for chip in catalog.chips() {
        let types = rig
            .manager
            .supported_iface_types_for(chip.id)
            .unwrap_or_default();
        let names: Vec<String> = types.iter().map(ToString::to_string).collect();
        println!("{:<8} {}", chip.id, names.join(", "));
    }

    let all: Vec<String> = rig
        .manager
        .supported_iface_types()
        .iter()
        .map(ToString::to_string)
        .collect();
    println!();
    println!("All chips: {}", all.join(", "));

    Ok(())
}

struct Printer;

impl InterfaceDestroyedListener for Printer {
    fn on_destroyed(&self, iface_name: &str) {
        println!("  <- destroyed {}", iface_name);
    }
}

impl ManagerStatusListener for Printer {
    fn on_status_changed(&self) {
        println!("  <- status changed");
    }
}

impl RttControllerLifecycleListener for Printer {
    fn on_new_rtt_controller(&self, controller: RttControllerHandle) {
        println!("  <- new RTT controller {}", controller.0);
    }

    fn on_rtt_controller_destroyed(&self) {
        println!("  <- RTT controller destroyed");
    }
}

struct AvailabilityPrinter(IfaceType);

impl InterfaceAvailableListener for AvailabilityPrinter {
    fn on_availability_changed(&self, available: bool) {
        let state = if available { "available" } else { "unavailable" };
        println!("  <- {} {}", self.0, state);
    }
}

fn cmd_run(cfg: &ManagerConfig, catalog: Option<&Path>, json: bool, steps: &[Step]) -> Result<()> {
    let catalog = resolve_catalog(cfg, catalog)?;
    let mut rig = build_rig(cfg, &catalog);
    let printer = Arc::new(Printer);

    if !rig.manager.initialize() {
        bail!("Radio service is not available");
    }
    rig.manager
        .register_status_listener(printer.clone(), CallbackContext::Inline);
    rig.manager
        .register_rtt_controller_lifecycle_listener(printer.clone(), CallbackContext::Inline);
    for iface_type in IfaceType::ALL {
        rig.manager.register_interface_available_listener(
            iface_type,
            Arc::new(AvailabilityPrinter(iface_type)),
            CallbackContext::Inline,
        );
    }

    for step in steps {
        println!("> {:?}", step);
        match step {
            Step::Start => println!("  started: {}", rig.manager.start()),
            Step::Stop => rig.manager.stop(),
            Step::Create(iface_type, priority) => {
                match rig
                    .manager
                    .create_interface(*iface_type, *priority, Some(printer.clone()), CallbackContext::Inline)
                {
                    Some(handle) => {
                        let name = rig.manager.interface_name(handle).unwrap_or_default();
                        println!("  created {} {}", name, handle);
                    }
                    None => println!("  could not create {} interface", iface_type),
                }
            }
            Step::Remove(name) => match rig.manager.find_interface(name) {
                Some(handle) => println!("  removed: {}", rig.manager.remove_interface(handle)),
                None => println!("  no interface named {}", name),
            },
            Step::Kill => {
                rig.service.kill();
                rig.manager.dispatch_events();
            }
            Step::Register => {
                rig.directory
                    .register_service(&cfg.service_instance, rig.service.clone());
                rig.manager.dispatch_events();
            }
            Step::Fail => {
                rig.service
                    .report_failure(HalError::Unknown("simulated firmware crash".to_string()));
                rig.manager.dispatch_events();
            }
            Step::Dump => print!("{}", rig.manager.dump()),
        }
    }

    if json {
        let snapshot = serde_json::to_string_pretty(&rig.manager.snapshot())
            .context("Failed to serialize snapshot")?;
        println!("{}", snapshot);
    }

    Ok(())
}
