use std::fmt;

use bitmask_enum::bitmask;

pub type Cycle = u64;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// index of a cache agent; also the processor it serves
pub struct CacheId(usize);

impl CacheId {
    pub fn new(v: usize) -> Self {
        Self(v)
    }
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache#{}", self.0)
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// to unify displaying value of memory address
pub struct Addr(u64);

impl Addr {
    pub fn new(v: u64) -> Self {
        Self(v)
    }
    pub fn inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => write!(f, "read"),
            AccessKind::Write => write!(f, "write"),
        }
    }
}

/// a single memory access issued by a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub kind: AccessKind,
    pub addr: Addr,
    pub thread_id: u32,
}

impl Job {
    pub fn new(kind: AccessKind, addr: u64, thread_id: u32) -> Self {
        Self {
            kind,
            addr: Addr::new(addr),
            thread_id,
        }
    }
    pub fn read(addr: u64, thread_id: u32) -> Self {
        Self::new(AccessKind::Read, addr, thread_id)
    }
    pub fn write(addr: u64, thread_id: u32) -> Self {
        Self::new(AccessKind::Write, addr, thread_id)
    }
    /// cache responsible for the issuing thread
    pub fn route(&self, processors: usize) -> CacheId {
        CacheId::new(self.thread_id as usize % processors)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (thread {})", self.kind, self.addr, self.thread_id)
    }
}

#[derive(Default)]
pub struct RunStep {
    step: Option<usize>,
}

impl RunStep {
    pub fn new(step: Option<usize>) -> Self {
        Self { step }
    }

    pub fn get_step(&self) -> usize {
        self.step.unwrap_or(1)
    }
}

#[derive(Default)]
pub enum ExecuteMode {
    #[default]
    Run,
    UntilCycle {
        cycle: Cycle,
    },
    RunStep(RunStep),
}

impl fmt::Display for ExecuteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteMode::Run => write!(f, "running simply"),
            ExecuteMode::UntilCycle { cycle } => write!(f, "running until cycle #{cycle}"),
            ExecuteMode::RunStep(r) => {
                write!(f, "step execution by {}", r.get_step())
            }
        }
    }
}

#[bitmask(u8)]
pub enum TraceKind {
    Job,
    Bus,
    Snoop,
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::Job, "job"),
            (Self::Bus, "bus"),
            (Self::Snoop, "snoop"),
        ];
        let mut first = true;
        for (k, name) in names {
            if self.contains(k) {
                if !first {
                    write!(f, "/")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "nothing")?;
        }
        Ok(())
    }
}

pub struct SimulationOption {
    pub trace: TraceKind,
    pub mode: ExecuteMode,
}

impl Default for SimulationOption {
    fn default() -> Self {
        Self {
            trace: TraceKind::none(),
            mode: ExecuteMode::default(),
        }
    }
}
