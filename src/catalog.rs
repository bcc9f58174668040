//! Static description of what each radio chip can host.
//!
//! A chip exposes a fixed list of modes. Each mode lists one or more
//! combinations, and a combination is a list of limits: "up to N interfaces
//! whose type is one of these". A set of interfaces fits a mode when at least
//! one of the mode's combinations can seat all of them at once.
//!
//! Catalog values are immutable once built. Tests and the simulator build
//! them with the fluent constructors:
//!
//! ```
//! use radio_manager::catalog::{ChipInfo, ChipMode, Combination, IfaceType};
//!
//! let chip = ChipInfo::new(0)
//!     .with_mode(ChipMode::new(0).with_combination(
//!         Combination::new()
//!             .limit(1, [IfaceType::Sta])
//!             .limit(1, [IfaceType::P2p, IfaceType::Nan]),
//!     ))
//!     .with_mode(ChipMode::new(1).with_combination(Combination::new().limit(1, [IfaceType::Ap])));
//!
//! assert_eq!(chip.supported_types().len(), 4);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub type ChipId = u32;
pub type ModeId = u32;

/// Logical interface roles a chip can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfaceType {
    Sta,
    Ap,
    P2p,
    Nan,
}

impl IfaceType {
    pub const ALL: [IfaceType; 4] = [IfaceType::Sta, IfaceType::Ap, IfaceType::P2p, IfaceType::Nan];

    fn index(self) -> usize {
        match self {
            IfaceType::Sta => 0,
            IfaceType::Ap => 1,
            IfaceType::P2p => 2,
            IfaceType::Nan => 3,
        }
    }
}

impl fmt::Display for IfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IfaceType::Sta => "STA",
            IfaceType::Ap => "AP",
            IfaceType::P2p => "P2P",
            IfaceType::Nan => "NAN",
        };
        f.write_str(name)
    }
}

impl FromStr for IfaceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sta" => Ok(IfaceType::Sta),
            "ap" => Ok(IfaceType::Ap),
            "p2p" => Ok(IfaceType::P2p),
            "nan" => Ok(IfaceType::Nan),
            other => Err(format!("unknown interface type '{}'", other)),
        }
    }
}

/// Request priority. Low-priority interfaces may be preempted by any
/// normal-priority request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Normal => f.write_str("normal"),
            Priority::Low => f.write_str("low"),
        }
    }
}

/// Per-type interface counts. Used both for what a chip currently hosts and
/// for the capacity of one expanded combination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeCounts([u32; 4]);

impl TypeCounts {
    pub fn get(&self, iface_type: IfaceType) -> u32 {
        self.0[iface_type.index()]
    }

    pub fn set(&mut self, iface_type: IfaceType, count: u32) {
        self.0[iface_type.index()] = count;
    }

    pub fn increment(&mut self, iface_type: IfaceType) {
        self.0[iface_type.index()] += 1;
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }

    /// True when every per-type count is within `capacity`.
    pub fn fits_within(&self, capacity: &TypeCounts) -> bool {
        self.0.iter().zip(capacity.0.iter()).all(|(have, cap)| have <= cap)
    }

    fn merged(&self, other: &TypeCounts) -> TypeCounts {
        let mut out = *self;
        for (slot, add) in out.0.iter_mut().zip(other.0.iter()) {
            *slot += add;
        }
        out
    }
}

/// Up to `max_count` interfaces, each of one of `allowed_types`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub max_count: u32,
    pub allowed_types: BTreeSet<IfaceType>,
}

impl Limit {
    pub fn new(max_count: u32, allowed_types: impl IntoIterator<Item = IfaceType>) -> Self {
        Limit {
            max_count,
            allowed_types: allowed_types.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combination {
    pub limits: Vec<Limit>,
}

impl Combination {
    pub fn new() -> Self {
        Combination::default()
    }

    pub fn limit(mut self, max_count: u32, allowed_types: impl IntoIterator<Item = IfaceType>) -> Self {
        self.limits.push(Limit::new(max_count, allowed_types));
        self
    }

    /// Every concrete per-type capacity vector this combination allows.
    ///
    /// Each limit's slots are distributed over its allowed types in every
    /// possible way; the per-limit results are summed across limits.
    pub fn expand(&self) -> Vec<TypeCounts> {
        let mut acc = vec![TypeCounts::default()];
        for limit in &self.limits {
            let types: Vec<IfaceType> = limit.allowed_types.iter().copied().collect();
            let fills = distribute(&types, limit.max_count);
            let mut next = Vec::with_capacity(acc.len() * fills.len());
            for base in &acc {
                for fill in &fills {
                    next.push(base.merged(fill));
                }
            }
            acc = next;
        }
        acc.sort();
        acc.dedup();
        acc
    }

    pub fn supported_types(&self) -> BTreeSet<IfaceType> {
        self.limits
            .iter()
            .filter(|l| l.max_count > 0)
            .flat_map(|l| l.allowed_types.iter().copied())
            .collect()
    }
}

fn distribute(types: &[IfaceType], slots: u32) -> Vec<TypeCounts> {
    match types.split_first() {
        None => vec![TypeCounts::default()],
        Some((&only, [])) => {
            let mut counts = TypeCounts::default();
            counts.set(only, slots);
            vec![counts]
        }
        Some((&first, rest)) => (0..=slots)
            .flat_map(|n| {
                distribute(rest, slots - n).into_iter().map(move |mut counts| {
                    counts.set(first, n);
                    counts
                })
            })
            .collect(),
    }
}

fn default_rtt_capable() -> bool {
    true
}

/// One chip mode. Its combinations are expanded into capacity vectors when
/// the mode is built, so planning never repeats the expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ChipModeDef", into = "ChipModeDef")]
pub struct ChipMode {
    pub id: ModeId,
    /// Whether an RTT controller can exist while the chip is in this mode.
    pub rtt_capable: bool,
    combinations: Vec<Combination>,
    capacities: Vec<TypeCounts>,
}

/// On-disk shape of a [`ChipMode`].
#[derive(Serialize, Deserialize)]
struct ChipModeDef {
    id: ModeId,
    #[serde(default = "default_rtt_capable")]
    rtt_capable: bool,
    #[serde(default)]
    combinations: Vec<Combination>,
}

impl From<ChipModeDef> for ChipMode {
    fn from(def: ChipModeDef) -> Self {
        let capacities = expand_all(&def.combinations);
        ChipMode {
            id: def.id,
            rtt_capable: def.rtt_capable,
            combinations: def.combinations,
            capacities,
        }
    }
}

impl From<ChipMode> for ChipModeDef {
    fn from(mode: ChipMode) -> Self {
        ChipModeDef {
            id: mode.id,
            rtt_capable: mode.rtt_capable,
            combinations: mode.combinations,
        }
    }
}

fn expand_all(combinations: &[Combination]) -> Vec<TypeCounts> {
    let mut all: Vec<TypeCounts> = combinations.iter().flat_map(|c| c.expand()).collect();
    all.sort();
    all.dedup();
    all
}

impl ChipMode {
    pub fn new(id: ModeId) -> Self {
        ChipMode {
            id,
            rtt_capable: true,
            combinations: Vec::new(),
            capacities: Vec::new(),
        }
    }

    pub fn with_combination(mut self, combination: Combination) -> Self {
        self.combinations.push(combination);
        self.capacities = expand_all(&self.combinations);
        self
    }

    pub fn without_rtt(mut self) -> Self {
        self.rtt_capable = false;
        self
    }

    /// Capacity vectors of all combinations of this mode.
    pub fn capacities(&self) -> &[TypeCounts] {
        &self.capacities
    }

    pub fn can_host(&self, counts: &TypeCounts) -> bool {
        self.capacities.iter().any(|cap| counts.fits_within(cap))
    }

    pub fn supported_types(&self) -> BTreeSet<IfaceType> {
        self.combinations.iter().flat_map(|c| c.supported_types()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipInfo {
    pub id: ChipId,
    #[serde(default)]
    pub modes: Vec<ChipMode>,
}

impl ChipInfo {
    pub fn new(id: ChipId) -> Self {
        ChipInfo { id, modes: Vec::new() }
    }

    pub fn with_mode(mut self, mode: ChipMode) -> Self {
        self.modes.push(mode);
        self
    }

    pub fn mode(&self, id: ModeId) -> Option<&ChipMode> {
        self.modes.iter().find(|m| m.id == id)
    }

    pub fn supported_types(&self) -> BTreeSet<IfaceType> {
        self.modes.iter().flat_map(|m| m.supported_types()).collect()
    }
}

/// Chips known to the manager, keyed and iterated in ascending chip id.
#[derive(Debug, Clone, Default)]
pub struct ChipModeCatalog {
    chips: BTreeMap<ChipId, ChipInfo>,
}

impl ChipModeCatalog {
    pub fn new(chips: impl IntoIterator<Item = ChipInfo>) -> Self {
        ChipModeCatalog {
            chips: chips.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    pub fn chip(&self, id: ChipId) -> Option<&ChipInfo> {
        self.chips.get(&id)
    }

    pub fn chips(&self) -> impl Iterator<Item = &ChipInfo> {
        self.chips.values()
    }

    pub fn mode(&self, chip: ChipId, mode: ModeId) -> Option<&ChipMode> {
        self.chips.get(&chip).and_then(|c| c.mode(mode))
    }

    /// Union of supported types across all chips.
    pub fn supported_types(&self) -> BTreeSet<IfaceType> {
        self.chips.values().flat_map(|c| c.supported_types()).collect()
    }

    /// `None` for a chip the catalog does not know.
    pub fn supported_types_for(&self, id: ChipId) -> Option<BTreeSet<IfaceType>> {
        self.chips.get(&id).map(|c| c.supported_types())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(IfaceType, u32)]) -> TypeCounts {
        let mut c = TypeCounts::default();
        for (t, n) in pairs {
            c.set(*t, *n);
        }
        c
    }

    #[test]
    fn test_expand_single_type_limits() {
        let combo = Combination::new()
            .limit(1, [IfaceType::Sta])
            .limit(1, [IfaceType::Ap]);
        let expanded = combo.expand();
        assert_eq!(expanded, vec![counts(&[(IfaceType::Sta, 1), (IfaceType::Ap, 1)])]);
    }

    #[test]
    fn test_expand_shared_limit() {
        let combo = Combination::new()
            .limit(1, [IfaceType::Sta])
            .limit(1, [IfaceType::Sta, IfaceType::Ap])
            .limit(1, [IfaceType::P2p, IfaceType::Nan]);
        let expanded = combo.expand();
        assert_eq!(expanded.len(), 4);
        assert!(expanded.contains(&counts(&[(IfaceType::Sta, 2), (IfaceType::P2p, 1)])));
        assert!(expanded.contains(&counts(&[
            (IfaceType::Sta, 1),
            (IfaceType::Ap, 1),
            (IfaceType::Nan, 1)
        ])));
    }

    #[test]
    fn test_expand_multi_slot_limit() {
        let combo = Combination::new().limit(2, [IfaceType::Sta, IfaceType::Ap]);
        let expanded = combo.expand();
        assert_eq!(expanded.len(), 3);
        assert!(expanded.contains(&counts(&[(IfaceType::Sta, 1), (IfaceType::Ap, 1)])));
    }

    #[test]
    fn test_mode_can_host_any_combination() {
        let mode = ChipMode::new(7)
            .with_combination(
                Combination::new()
                    .limit(1, [IfaceType::Sta])
                    .limit(1, [IfaceType::Sta, IfaceType::Ap]),
            )
            .with_combination(
                Combination::new()
                    .limit(1, [IfaceType::Sta])
                    .limit(1, [IfaceType::P2p, IfaceType::Nan]),
            );

        assert!(mode.can_host(&counts(&[(IfaceType::Sta, 2)])));
        assert!(mode.can_host(&counts(&[(IfaceType::Sta, 1), (IfaceType::Nan, 1)])));
        assert!(!mode.can_host(&counts(&[(IfaceType::Ap, 1), (IfaceType::Nan, 1)])));
        assert!(!mode.can_host(&counts(&[(IfaceType::Sta, 3)])));
    }

    #[test]
    fn test_capacities_expanded_once_on_build_and_load() {
        let built = ChipMode::new(3).with_combination(
            Combination::new().limit(2, [IfaceType::Sta, IfaceType::Ap]),
        );
        assert_eq!(built.capacities().len(), 3);

        let loaded: ChipMode = toml::from_str(
            r#"
            id = 3
            [[combinations]]
            limits = [{ max_count = 2, allowed_types = ["sta", "ap"] }]
            "#,
        )
        .unwrap();
        assert_eq!(loaded, built);
        assert!(loaded.can_host(&counts(&[(IfaceType::Ap, 2)])));

        let text = toml::to_string(&loaded).unwrap();
        assert!(!text.contains("capacities"));
    }

    #[test]
    fn test_supported_types_union() {
        let catalog = ChipModeCatalog::new([
            ChipInfo::new(1).with_mode(
                ChipMode::new(0).with_combination(Combination::new().limit(1, [IfaceType::Sta])),
            ),
            ChipInfo::new(2).with_mode(
                ChipMode::new(0).with_combination(Combination::new().limit(1, [IfaceType::Ap])),
            ),
        ]);

        let all = catalog.supported_types();
        assert!(all.contains(&IfaceType::Sta));
        assert!(all.contains(&IfaceType::Ap));
        assert!(!all.contains(&IfaceType::Nan));
        assert_eq!(
            catalog.supported_types_for(2).unwrap().into_iter().collect::<Vec<_>>(),
            vec![IfaceType::Ap]
        );
        assert!(catalog.supported_types_for(9).is_none());
    }

    #[test]
    fn test_zero_limit_not_supported() {
        let combo = Combination::new().limit(0, [IfaceType::Nan]).limit(1, [IfaceType::Sta]);
        assert_eq!(combo.supported_types().len(), 1);
    }

    #[test]
    fn test_iface_type_parse_and_display() {
        assert_eq!("sta".parse::<IfaceType>().unwrap(), IfaceType::Sta);
        assert_eq!("P2P".parse::<IfaceType>().unwrap(), IfaceType::P2p);
        assert!("mesh".parse::<IfaceType>().is_err());
        assert_eq!(IfaceType::Nan.to_string(), "NAN");
    }

    #[test]
    fn test_catalog_toml_shape() {
        let text = r#"
            id = 4
            [[modes]]
            id = 0
            [[modes.combinations]]
            limits = [
                { max_count = 1, allowed_types = ["sta"] },
                { max_count = 1, allowed_types = ["p2p", "nan"] },
            ]
            [[modes]]
            id = 1
            rtt_capable = false
            [[modes.combinations]]
            limits = [{ max_count = 1, allowed_types = ["ap"] }]
        "#;
        let chip: ChipInfo = toml::from_str(text).unwrap();
        assert_eq!(chip.id, 4);
        assert!(chip.mode(0).unwrap().rtt_capable);
        assert!(!chip.mode(1).unwrap().rtt_capable);
        assert_eq!(chip.supported_types().len(), 4);
    }
}
