//! Simulation parameters, address geometry and the global clock.

use std::{fmt, path::Path, str::FromStr};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::{Addr, Cycle};

/// set arrays larger than this are almost certainly a typo in the configuration
pub const MAX_SET_BITS: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Msi,
    Mesi,
    Moesi,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Msi => write!(f, "MSI"),
            Protocol::Mesi => write!(f, "MESI"),
            Protocol::Moesi => write!(f, "MOESI"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "msi" => Ok(Protocol::Msi),
            "mesi" => Ok(Protocol::Mesi),
            "moesi" => Ok(Protocol::Moesi),
            _ => Err(format!("unknown protocol `{s}` (expected msi, mesi or moesi)")),
        }
    }
}

/// order in which the bus scans agents for a fresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArbitrationPolicy {
    /// always from agent 0
    Fixed,
    /// from the agent after the last one granted
    RoundRobin,
}

impl FromStr for ArbitrationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(ArbitrationPolicy::Fixed),
            "round-robin" | "rr" => Ok(ArbitrationPolicy::RoundRobin),
            _ => Err(format!("unknown arbitration policy `{s}` (expected fixed or round-robin)")),
        }
    }
}

/// when the driver hands jobs from the trace to caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchPolicy {
    /// next job only once every pending queue is empty
    Serialized,
    /// each cache receives its next job as soon as its own queue is empty
    PerCache,
}

impl FromStr for DispatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serialized" => Ok(DispatchPolicy::Serialized),
            "per-cache" => Ok(DispatchPolicy::PerCache),
            _ => Err(format!("unknown dispatch policy `{s}` (expected serialized or per-cache)")),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("address width of {0} bits is not in 1..=64")]
    AddressWidth(u32),
    #[error("{set_bits} set bits + {offset_bits} offset bits exceed the {address_bits}-bit address")]
    BitWidthOverflow {
        set_bits: u32,
        offset_bits: u32,
        address_bits: u32,
    },
    #[error("{0} set bits is more than the supported {MAX_SET_BITS}")]
    TooManySets(u32),
    #[error("`{0}` must be at least 1")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub processors: usize,
    pub address_bits: u32,
    pub set_bits: u32,
    pub offset_bits: u32,
    pub associativity: usize,
    pub protocol: Protocol,
    pub hit_cost: Cycle,
    pub memory_cost: Cycle,
    pub propagation_delay: Cycle,
    pub arbitration: ArbitrationPolicy,
    pub dispatch: DispatchPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processors: 4,
            address_bits: 64,
            set_bits: 8,
            offset_bits: 6,
            associativity: 4,
            protocol: Protocol::Msi,
            hit_cost: 1,
            memory_cost: 100,
            propagation_delay: 2,
            arbitration: ArbitrationPolicy::Fixed,
            dispatch: DispatchPolicy::Serialized,
        }
    }
}

impl Config {
    pub fn from_json(s: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: Config = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address_bits == 0 || self.address_bits > 64 {
            return Err(ConfigError::AddressWidth(self.address_bits));
        }
        if self
            .set_bits
            .checked_add(self.offset_bits)
            .map_or(true, |s| s > self.address_bits)
        {
            return Err(ConfigError::BitWidthOverflow {
                set_bits: self.set_bits,
                offset_bits: self.offset_bits,
                address_bits: self.address_bits,
            });
        }
        if self.set_bits > MAX_SET_BITS {
            return Err(ConfigError::TooManySets(self.set_bits));
        }
        macro_rules! non_zero {
            ($($field:ident),*) => {
                $(
                    if self.$field == 0 {
                        return Err(ConfigError::Zero(stringify!($field)));
                    }
                )*
            };
        }
        non_zero!(processors, associativity, hit_cost, memory_cost, propagation_delay);
        Ok(())
    }
    pub fn num_sets(&self) -> usize {
        1 << self.set_bits
    }
    pub fn tag_bits(&self) -> u32 {
        self.address_bits - self.set_bits - self.offset_bits
    }
    pub fn geometry(&self) -> Geometry {
        Geometry {
            offset_bits: self.offset_bits,
            set_bits: self.set_bits,
            tag_bits: self.tag_bits(),
            associativity: self.associativity,
        }
    }
}

/// position of an address inside a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub set: usize,
    pub tag: u64,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set {} tag {:#x}", self.set, self.tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub offset_bits: u32,
    pub set_bits: u32,
    pub tag_bits: u32,
    pub associativity: usize,
}

#[inline]
const fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1 << bits) - 1
    }
}

#[inline]
fn shr(v: u64, amount: u32) -> u64 {
    v.checked_shr(amount).unwrap_or(0)
}

#[inline]
fn shl(v: u64, amount: u32) -> u64 {
    v.checked_shl(amount).unwrap_or(0)
}

impl Geometry {
    pub fn num_sets(&self) -> usize {
        1 << self.set_bits
    }
    pub fn decode(&self, addr: Addr) -> Location {
        let addr = addr.inner();
        let set = shr(addr, self.offset_bits) & low_mask(self.set_bits);
        let tag = shr(addr, self.offset_bits + self.set_bits) & low_mask(self.tag_bits);
        Location {
            set: set as usize,
            tag,
        }
    }
    /// block address of `loc`; offset bits are zero
    pub fn compose(&self, loc: Location) -> Addr {
        Addr::new(
            shl(loc.tag, self.offset_bits + self.set_bits)
                | shl(loc.set as u64, self.offset_bits),
        )
    }
}

/// global cycle counter. only the driver advances it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Clock {
    cycle: Cycle,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn tick(&mut self) -> Cycle {
        self.cycle += 1;
        self.cycle
    }
    pub fn now(&self) -> Cycle {
        self.cycle
    }
}
