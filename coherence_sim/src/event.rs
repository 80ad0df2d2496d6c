use std::fmt;

use crate::{
    common::{CacheId, Cycle, Job, TraceKind},
    config::Location,
    line::LineState,
    message::{BusRequest, BusResponse, SnoopResult},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    JobStarted {
        cache: CacheId,
        job: Job,
        hit: bool,
    },
    JobFinished {
        cache: CacheId,
        job: Job,
    },
    Evicted {
        cache: CacheId,
        loc: Location,
        state: LineState,
    },
    Granted {
        request: BusRequest,
    },
    DuplicateSkipped {
        request: BusRequest,
    },
    Snooped {
        cache: CacheId,
        request: BusRequest,
        before: LineState,
        after: LineState,
        result: SnoopResult,
    },
    Responded {
        response: BusResponse,
    },
    Completed {
        cache: CacheId,
        ordering: u64,
        was_shared: bool,
    },
}

impl SimEvent {
    pub fn kind(&self) -> TraceKind {
        match self {
            SimEvent::JobStarted { .. } | SimEvent::JobFinished { .. } | SimEvent::Evicted { .. } => {
                TraceKind::Job
            }
            SimEvent::Granted { .. }
            | SimEvent::DuplicateSkipped { .. }
            | SimEvent::Responded { .. }
            | SimEvent::Completed { .. } => TraceKind::Bus,
            SimEvent::Snooped { .. } => TraceKind::Snoop,
        }
    }
}

impl fmt::Display for SimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimEvent::JobStarted { cache, job, hit } => {
                let how = if *hit { "hit" } else { "miss" };
                write!(f, "{cache}: {job} ({how})")
            }
            SimEvent::JobFinished { cache, job } => write!(f, "{cache}: finished {job}"),
            SimEvent::Evicted { cache, loc, state } => {
                write!(f, "{cache}: evicted {loc} in state {state}")
            }
            SimEvent::Granted { request } => write!(f, "bus: granted {request}"),
            SimEvent::DuplicateSkipped { request } => {
                write!(f, "bus: skipped already serviced {request}")
            }
            SimEvent::Snooped {
                cache,
                request,
                before,
                after,
                result,
            } => write!(
                f,
                "{cache}: snooped {} for {}: {before} -> {after} ({result})",
                request.command, request.loc
            ),
            SimEvent::Responded { response } => write!(f, "bus: response {response}"),
            SimEvent::Completed {
                cache,
                ordering,
                was_shared,
            } => write!(
                f,
                "bus: completed ord {ordering} for {cache}{}",
                if *was_shared { " (shared)" } else { "" }
            ),
        }
    }
}

/// events in the exact order the components produced them
#[derive(Debug, Default)]
pub struct EventLog {
    recording: bool,
    events: Vec<(Cycle, SimEvent)>,
}

impl EventLog {
    pub fn new(recording: bool) -> Self {
        Self {
            recording,
            events: Vec::new(),
        }
    }
    pub fn recording() -> Self {
        Self::new(true)
    }
    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }
    pub fn push(&mut self, cycle: Cycle, event: SimEvent) {
        log::debug!("#{cycle}: {event}");
        if self.recording {
            self.events.push((cycle, event));
        }
    }
    pub fn events(&self) -> &[(Cycle, SimEvent)] {
        &self.events
    }
    pub fn clear(&mut self) {
        self.events.clear();
    }
    pub fn len(&self) -> usize {
        self.events.len()
    }
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
