//! Coherence protocols as transition tables.
//!
//! Each protocol maps a local access or a snooped bus command, together with the
//! current line state, to the next state and the message it produces. A pair the
//! table does not cover is an error, never a silent no-op.

use std::fmt;

use thiserror::Error;

use crate::{
    common::AccessKind,
    config::Protocol,
    line::LineState::{self, *},
    message::{BusCommand, ResponseKind, SnoopResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolEvent {
    Local(AccessKind),
    Snoop(BusCommand),
}

impl fmt::Display for ProtocolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolEvent::Local(k) => write!(f, "local {k}"),
            ProtocolEvent::Snoop(c) => write!(f, "snooped {c}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported protocol/state combination: {protocol} has no transition for {event} in state {state}")]
    Unsupported {
        protocol: Protocol,
        state: LineState,
        event: ProtocolEvent,
    },
}

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTransition {
    pub next: LineState,
    /// `None` means the access is a hit
    pub command: Option<BusCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnoopTransition {
    pub next: LineState,
    pub result: SnoopResult,
}

pub trait CoherenceProtocol: Sync {
    fn kind(&self) -> Protocol;
    fn on_local(&self, access: AccessKind, state: LineState) -> Result<LocalTransition>;
    fn on_snoop(&self, command: BusCommand, state: LineState) -> Result<SnoopTransition>;
    /// whether a response tells the requester that the line was shared
    fn is_shared_response(&self, kind: ResponseKind) -> bool;

    fn unsupported(&self, state: LineState, event: ProtocolEvent) -> ProtocolError {
        ProtocolError::Unsupported {
            protocol: self.kind(),
            state,
            event,
        }
    }
}

impl Protocol {
    pub fn strategy(self) -> &'static dyn CoherenceProtocol {
        match self {
            Protocol::Msi => &Msi,
            Protocol::Mesi => &Mesi,
            Protocol::Moesi => &Moesi,
        }
    }
    pub fn is_implemented(self) -> bool {
        matches!(self, Protocol::Msi)
    }
}

pub struct Msi;

impl CoherenceProtocol for Msi {
    fn kind(&self) -> Protocol {
        Protocol::Msi
    }
    fn on_local(&self, access: AccessKind, state: LineState) -> Result<LocalTransition> {
        let hit = |next| LocalTransition {
            next,
            command: None,
        };
        let miss = |next, command| LocalTransition {
            next,
            command: Some(command),
        };
        match (access, state) {
            (AccessKind::Read, Modified) => Ok(hit(Modified)),
            (AccessKind::Read, Shared) => Ok(hit(Shared)),
            (AccessKind::Read, Invalid) => Ok(miss(Shared, BusCommand::BusRd)),
            (AccessKind::Write, Modified) => Ok(hit(Modified)),
            (AccessKind::Write, Shared | Invalid) => Ok(miss(Modified, BusCommand::BusRdX)),
            (_, Exclusive | Owned) => Err(self.unsupported(state, ProtocolEvent::Local(access))),
        }
    }
    fn on_snoop(&self, command: BusCommand, state: LineState) -> Result<SnoopTransition> {
        let t = |next, result| SnoopTransition { next, result };
        match (command, state) {
            (_, Invalid) => Ok(t(Invalid, SnoopResult::None)),
            // memory answers a read of a clean line
            (BusCommand::BusRd, Shared) => Ok(t(Shared, SnoopResult::Shared)),
            (BusCommand::BusRd, Modified) => Ok(t(Shared, SnoopResult::Flush)),
            (BusCommand::BusRdX, Shared) => Ok(t(Invalid, SnoopResult::None)),
            (BusCommand::BusRdX, Modified) => Ok(t(Invalid, SnoopResult::Flush)),
            (_, Exclusive | Owned) => Err(self.unsupported(state, ProtocolEvent::Snoop(command))),
        }
    }
    fn is_shared_response(&self, kind: ResponseKind) -> bool {
        matches!(
            kind,
            ResponseKind::FlushModifiedToShared | ResponseKind::FlushModifiedToInvalid
        )
    }
}

// TODO: author the MESI table (E on read miss with no sharer, silent E->M upgrade).
pub struct Mesi;

impl CoherenceProtocol for Mesi {
    fn kind(&self) -> Protocol {
        Protocol::Mesi
    }
    fn on_local(&self, access: AccessKind, state: LineState) -> Result<LocalTransition> {
        Err(self.unsupported(state, ProtocolEvent::Local(access)))
    }
    fn on_snoop(&self, command: BusCommand, state: LineState) -> Result<SnoopTransition> {
        Err(self.unsupported(state, ProtocolEvent::Snoop(command)))
    }
    fn is_shared_response(&self, kind: ResponseKind) -> bool {
        matches!(
            kind,
            ResponseKind::Shared
                | ResponseKind::FlushModifiedToShared
                | ResponseKind::FlushModifiedToInvalid
        )
    }
}

// TODO: author the MOESI table (M to O on a snooped read, O supplies data and keeps ownership).
pub struct Moesi;

impl CoherenceProtocol for Moesi {
    fn kind(&self) -> Protocol {
        Protocol::Moesi
    }
    fn on_local(&self, access: AccessKind, state: LineState) -> Result<LocalTransition> {
        Err(self.unsupported(state, ProtocolEvent::Local(access)))
    }
    fn on_snoop(&self, command: BusCommand, state: LineState) -> Result<SnoopTransition> {
        Err(self.unsupported(state, ProtocolEvent::Snoop(command)))
    }
    fn is_shared_response(&self, kind: ResponseKind) -> bool {
        matches!(
            kind,
            ResponseKind::Modified | ResponseKind::Exclusive | ResponseKind::Owned
        )
    }
}
