//! Messages exchanged over the shared bus.

use std::fmt;

use crate::{
    common::{CacheId, Cycle},
    config::Location,
    line::LineState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusCommand {
    /// read a line for sharing
    BusRd,
    /// read a line with intent to modify
    BusRdX,
}

impl fmt::Display for BusCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusCommand::BusRd => write!(f, "BusRd"),
            BusCommand::BusRdX => write!(f, "BusRdX"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusRequest {
    pub command: BusCommand,
    pub requester: CacheId,
    pub loc: Location,
    /// identifies the request in the arbiter's duplicate ledger; not a wall-clock value
    pub ordering: u64,
    /// memory cycles the requester expects to spend
    pub cost: Cycle,
}

impl fmt::Display for BusRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} for {} (ord {}, cost {})",
            self.command, self.requester, self.loc, self.ordering, self.cost
        )
    }
}

/// what a snooping cache did with a broadcast request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoopResult {
    None,
    Shared,
    Flush,
}

impl fmt::Display for SnoopResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnoopResult::None => write!(f, "none"),
            SnoopResult::Shared => write!(f, "shared"),
            SnoopResult::Flush => write!(f, "flush"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    None,
    Shared,
    FlushModifiedToShared,
    FlushModifiedToInvalid,
    Modified,
    Exclusive,
    Owned,
}

impl ResponseKind {
    /// response put on the bus for a snoop that left the line in `next`
    pub fn from_snoop(result: SnoopResult, next: LineState) -> Self {
        match (result, next) {
            (SnoopResult::None, _) => ResponseKind::None,
            (SnoopResult::Shared, _) => ResponseKind::Shared,
            (SnoopResult::Flush, LineState::Invalid) => ResponseKind::FlushModifiedToInvalid,
            (SnoopResult::Flush, _) => ResponseKind::FlushModifiedToShared,
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseKind::None => "none",
            ResponseKind::Shared => "shared",
            ResponseKind::FlushModifiedToShared => "flush M->S",
            ResponseKind::FlushModifiedToInvalid => "flush M->I",
            ResponseKind::Modified => "modified",
            ResponseKind::Exclusive => "exclusive",
            ResponseKind::Owned => "owned",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusResponse {
    pub result: ResponseKind,
    pub sender: CacheId,
    /// cache whose request provoked this response
    pub requester: CacheId,
    /// ordering value of that request
    pub ordering: u64,
}

impl BusResponse {
    pub fn is_trivial(&self) -> bool {
        self.result == ResponseKind::None
    }
}

impl fmt::Display for BusResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} to {} (ord {})",
            self.result, self.sender, self.requester, self.ordering
        )
    }
}
