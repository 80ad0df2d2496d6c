//! Per-processor cache agent.
//!
//! A cache services one job at a time. A job that the local protocol table
//! resolves as a hit is charged the hit cost and never touches the bus; any
//! other job leaves a [`BusRequest`] outstanding until the arbiter signals
//! completion through [`Cache::bus_job_done`].

use std::collections::VecDeque;

use thiserror::Error;

use crate::{
    common::{Addr, CacheId, Cycle, Job},
    config::{Config, Geometry, Location},
    event::{EventLog, SimEvent},
    line::{CoherenceLine, LineState},
    message::{BusCommand, BusRequest, BusResponse, ResponseKind, SnoopResult},
    protocol::{CoherenceProtocol, ProtocolError},
    set::CoherenceSet,
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

#[cfg(feature = "stat")]
pub use self::stat::CacheStat;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("{cache}: set index {set} out of range for {num_sets} sets")]
    SetOutOfRange {
        cache: CacheId,
        set: usize,
        num_sets: usize,
    },
    #[error("{cache}: completion signalled without an outstanding bus request")]
    NoOutstandingRequest { cache: CacheId },
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy)]
struct InService {
    job: Job,
    loc: Location,
    /// state the line takes once the job is satisfied
    next: LineState,
    issued: Cycle,
    start: Cycle,
    cost: Cycle,
}

pub struct Cache {
    id: CacheId,
    geometry: Geometry,
    protocol: &'static dyn CoherenceProtocol,
    hit_cost: Cycle,
    memory_cost: Cycle,
    sets: Vec<CoherenceSet>,
    pending: VecDeque<Job>,
    current: Option<InService>,
    bus_request: Option<BusRequest>,
    responses: VecDeque<BusResponse>,
    #[cfg(feature = "stat")]
    stat: stat::CacheStat,
}

impl Cache {
    pub fn new(id: CacheId, config: &Config) -> Self {
        let geometry = config.geometry();
        Self {
            id,
            geometry,
            protocol: config.protocol.strategy(),
            hit_cost: config.hit_cost,
            memory_cost: config.memory_cost,
            sets: (0..geometry.num_sets())
                .map(|_| CoherenceSet::new(geometry.associativity))
                .collect(),
            pending: VecDeque::new(),
            current: None,
            bus_request: None,
            responses: VecDeque::new(),
            #[cfg(feature = "stat")]
            stat: stat::CacheStat::new(id),
        }
    }
    pub fn id(&self) -> CacheId {
        self.id
    }
    pub fn push_job(&mut self, job: Job) {
        self.pending.push_back(job);
    }
    pub fn pending_jobs(&self) -> impl Iterator<Item = &Job> {
        self.pending.iter()
    }
    pub fn has_pending_jobs(&self) -> bool {
        !self.pending.is_empty()
    }
    pub fn current_job(&self) -> Option<&Job> {
        self.current.as_ref().map(|s| &s.job)
    }
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }
    /// nothing queued, nothing in service
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.current.is_none()
    }
    pub fn decode(&self, addr: Addr) -> Location {
        self.geometry.decode(addr)
    }
    fn check_set(&self, loc: Location) -> Result<()> {
        if loc.set < self.sets.len() {
            Ok(())
        } else {
            Err(CacheError::SetOutOfRange {
                cache: self.id,
                set: loc.set,
                num_sets: self.sets.len(),
            })
        }
    }
    /// state of the line at `loc`; absent lines read as `Invalid`
    fn line_state(&self, loc: Location) -> Result<LineState> {
        self.check_set(loc)?;
        // only the decoded set; an equal tag in another set is a different line
        Ok(self.sets[loc.set]
            .find(loc.tag)
            .map_or(LineState::Invalid, |l| l.state))
    }
    /// memory cycles for fetching `loc`, doubled when a resident line has to go first
    fn total_memory_cost(&self, loc: Location) -> Result<Cycle> {
        self.check_set(loc)?;
        let set = &self.sets[loc.set];
        if !set.has_line(loc.tag) && set.is_full() {
            Ok(self.memory_cost * 2)
        } else {
            Ok(self.memory_cost)
        }
    }

    pub fn tick(&mut self, cycle: Cycle, log: &mut EventLog) -> Result<()> {
        if let Some(s) = &self.current {
            if self.bus_request.is_none() && s.start + s.cost <= cycle {
                log.push(
                    cycle,
                    SimEvent::JobFinished {
                        cache: self.id,
                        job: s.job,
                    },
                );
                self.current = None;
            }
        }
        if self.current.is_none() && !self.pending.is_empty() {
            self.handle_request(cycle, log)?;
        }
        Ok(())
    }

    fn handle_request(&mut self, cycle: Cycle, log: &mut EventLog) -> Result<()> {
        let Some(job) = self.pending.pop_front() else {
            return Ok(());
        };
        let loc = self.decode(job.addr);
        let state = self.line_state(loc)?;
        let transition = self.protocol.on_local(job.kind, state)?;
        let hit = transition.command.is_none();
        #[cfg(feature = "stat")]
        self.stat.on_access(job.kind, hit);
        log.push(
            cycle,
            SimEvent::JobStarted {
                cache: self.id,
                job,
                hit,
            },
        );
        match transition.command {
            None => {
                self.current = Some(InService {
                    job,
                    loc,
                    next: transition.next,
                    issued: cycle,
                    start: cycle,
                    cost: self.hit_cost,
                });
                self.fill(loc, transition.next, cycle, log)?;
            }
            Some(command) => {
                let cost = match command {
                    BusCommand::BusRdX => self.total_memory_cost(loc)?,
                    BusCommand::BusRd => self.memory_cost,
                };
                self.bus_request = Some(BusRequest {
                    command,
                    requester: self.id,
                    loc,
                    ordering: cycle,
                    cost,
                });
                self.current = Some(InService {
                    job,
                    loc,
                    next: transition.next,
                    issued: cycle,
                    start: cycle,
                    cost,
                });
            }
        }
        Ok(())
    }

    pub fn has_bus_request(&self) -> bool {
        self.bus_request.is_some()
    }
    /// outstanding request without marking it fetched
    pub fn peek_bus_request(&self) -> Option<&BusRequest> {
        self.bus_request.as_ref()
    }
    /// the request stays outstanding until [`Self::bus_job_done`].
    /// the job's service window restarts at `cycle`.
    pub fn get_bus_request(&mut self, cycle: Cycle) -> Option<BusRequest> {
        let request = self.bus_request?;
        if let Some(s) = &mut self.current {
            #[cfg(feature = "stat")]
            self.stat.on_bus_wait(cycle.saturating_sub(s.issued));
            s.start = cycle;
        }
        Some(request)
    }

    pub fn snoop_bus_request(
        &mut self,
        request: &BusRequest,
        cycle: Cycle,
        log: &mut EventLog,
    ) -> Result<SnoopResult> {
        self.check_set(request.loc)?;
        let Some(line) = self.sets[request.loc.set].find_mut(request.loc.tag) else {
            return Ok(SnoopResult::None);
        };
        let before = line.state;
        if !before.is_valid() {
            return Ok(SnoopResult::None);
        }
        let transition = self.protocol.on_snoop(request.command, before)?;
        line.state = transition.next;
        #[cfg(feature = "stat")]
        self.stat.on_snoop(transition.result, before, transition.next);
        log.push(
            cycle,
            SimEvent::Snooped {
                cache: self.id,
                request: *request,
                before,
                after: transition.next,
                result: transition.result,
            },
        );
        let result = ResponseKind::from_snoop(transition.result, transition.next);
        if result != ResponseKind::None {
            self.responses.push_back(BusResponse {
                result,
                sender: self.id,
                requester: request.requester,
                ordering: request.ordering,
            });
        }
        Ok(transition.result)
    }

    /// oldest snoop response this cache still has to put on the bus
    pub fn take_response(&mut self) -> Option<BusResponse> {
        self.responses.pop_front()
    }

    pub fn bus_job_done(&mut self, was_shared: bool, cycle: Cycle, log: &mut EventLog) -> Result<()> {
        let (Some(_), Some(s)) = (self.bus_request.take(), self.current) else {
            return Err(CacheError::NoOutstandingRequest { cache: self.id });
        };
        #[cfg(feature = "stat")]
        self.stat.on_complete(was_shared);
        #[cfg(not(feature = "stat"))]
        let _ = was_shared;
        self.fill(s.loc, s.next, cycle, log)
    }

    /// makes the line at `loc` resident in state `next`, evicting the LRU line if needed
    fn fill(&mut self, loc: Location, next: LineState, cycle: Cycle, log: &mut EventLog) -> Result<()> {
        self.check_set(loc)?;
        let set = &mut self.sets[loc.set];
        if !set.has_line(loc.tag) {
            if set.is_full() {
                if let Some(victim) = set.evict_lru_line() {
                    #[cfg(feature = "stat")]
                    self.stat.on_evict(victim.state);
                    log.push(
                        cycle,
                        SimEvent::Evicted {
                            cache: self.id,
                            loc: Location {
                                set: loc.set,
                                tag: victim.tag(),
                            },
                            state: victim.state,
                        },
                    );
                }
            }
            set.add_line(CoherenceLine::new(loc.tag, LineState::Invalid, cycle));
        }
        let line = set.get_line_mut(loc.tag);
        line.touch(cycle);
        if line.state != next {
            #[cfg(feature = "stat")]
            self.stat.on_transition();
            line.state = next;
        }
        Ok(())
    }

    /// state of `addr` in this cache; `None` when no line holds it
    pub fn probe(&self, addr: Addr) -> Option<LineState> {
        let loc = self.decode(addr);
        self.sets.get(loc.set)?.find(loc.tag).map(|l| l.state)
    }
    pub fn set(&self, index: usize) -> Option<&CoherenceSet> {
        self.sets.get(index)
    }
    /// resident lines with their set index
    pub fn lines(&self) -> impl Iterator<Item = (usize, &CoherenceLine)> {
        self.sets
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.lines().map(move |l| (i, l)))
    }
    #[cfg(feature = "stat")]
    pub fn stat(&self) -> &stat::CacheStat {
        &self.stat
    }
}

#[cfg(feature = "stat")]
impl AddStats for Cache {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat));
    }
}

#[cfg(feature = "stat")]
mod stat {
    use std::fmt;

    use crate::{
        common::{AccessKind, CacheId},
        line::LineState,
        message::SnoopResult,
        stat::*,
    };

    #[derive(Default, Clone, Copy, Debug)]
    pub struct CacheStat {
        pub id: CacheId,
        pub reads: u64,
        pub writes: u64,
        pub hits: u64,
        pub misses: u64,
        pub flushes: u64,
        pub invalidations: u64,
        pub evictions: u64,
        pub writebacks: u64,
        pub cache_shares: u64,
        pub memory_uses: u64,
        pub transitions: u64,
        pub bus_wait_cycles: u64,
    }

    impl CacheStat {
        pub fn new(id: CacheId) -> Self {
            Self {
                id,
                ..Default::default()
            }
        }
        pub fn on_access(&mut self, kind: AccessKind, hit: bool) {
            match kind {
                AccessKind::Read => self.reads += 1,
                AccessKind::Write => self.writes += 1,
            }
            if hit {
                self.hits += 1;
            } else {
                self.misses += 1;
            }
        }
        pub fn on_snoop(&mut self, result: SnoopResult, before: LineState, after: LineState) {
            if result == SnoopResult::Flush {
                self.flushes += 1;
            }
            if before != after {
                self.transitions += 1;
                if after == LineState::Invalid {
                    self.invalidations += 1;
                }
            }
        }
        pub fn on_evict(&mut self, state: LineState) {
            self.evictions += 1;
            if state == LineState::Modified {
                self.writebacks += 1;
            }
        }
        pub fn on_complete(&mut self, was_shared: bool) {
            if was_shared {
                self.cache_shares += 1;
            } else {
                self.memory_uses += 1;
            }
        }
        pub fn on_transition(&mut self) {
            self.transitions += 1;
        }
        pub fn on_bus_wait(&mut self, cycles: u64) {
            self.bus_wait_cycles += cycles;
        }
    }

    impl Stat for CacheStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(CacheStatView::new(self))
        }
    }

    pub struct CacheStatView<'a> {
        stat: &'a CacheStat,
    }

    impl<'a> CacheStatView<'a> {
        pub fn new(stat: &'a CacheStat) -> Self {
            Self { stat }
        }
    }

    impl StatView for CacheStatView<'_> {
        fn header(&self) -> String {
            format!("{} stat", self.stat.id)
        }
        fn width(&self) -> usize {
            36
        }
    }

    impl fmt::Display for CacheStatView<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let s = self.stat;
            let total = s.hits + s.misses;
            let hit_pct = percent(s.hits, total);
            let miss_pct = percent(s.misses, total);
            writeln!(f, "  reads / writes: {:>8} / {:<8}", s.reads, s.writes)?;
            writeln!(f, "            hit: {:>10} ({hit_pct:>6}%)", s.hits)?;
            writeln!(f, "           miss: {:>10} ({miss_pct:>6}%)", s.misses)?;
            writeln!(f, "          flush: {:>10}", s.flushes)?;
            writeln!(f, "     invalidate: {:>10}", s.invalidations)?;
            writeln!(f, "          evict: {:>10}", s.evictions)?;
            writeln!(f, "     write-back: {:>10}", s.writebacks)?;
            writeln!(f, "   cache shared: {:>10}", s.cache_shares)?;
            writeln!(f, "    from memory: {:>10}", s.memory_uses)?;
            writeln!(f, "    transitions: {:>10}", s.transitions)?;
            write!(f, "  bus wait (cy): {:>10}", s.bus_wait_cycles)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Protocol, line::LineState::*};

    fn config() -> Config {
        Config {
            processors: 2,
            address_bits: 16,
            set_bits: 2,
            offset_bits: 4,
            associativity: 2,
            hit_cost: 1,
            memory_cost: 10,
            propagation_delay: 2,
            ..Default::default()
        }
    }

    /// address of `tag` in `set` under [`config`]
    fn addr(set: u64, tag: u64) -> u64 {
        tag << 6 | set << 4
    }

    fn cache(config: &Config) -> Cache {
        Cache::new(CacheId::new(0), config)
    }

    /// drains the queue of `c`, granting and completing every request at once
    fn serve_alone(c: &mut Cache, cycle: &mut Cycle, log: &mut EventLog) {
        *cycle += 1;
        c.tick(*cycle, log).unwrap();
        loop {
            if c.has_bus_request() {
                c.get_bus_request(*cycle).unwrap();
                c.bus_job_done(false, *cycle, log).unwrap();
            }
            if !c.is_busy() {
                break;
            }
            *cycle += 1;
            c.tick(*cycle, log).unwrap();
        }
    }

    #[test]
    fn test_read_miss_issues_bus_rd() {
        let conf = config();
        let mut c = cache(&conf);
        let mut log = EventLog::recording();
        c.push_job(Job::read(addr(1, 3), 0));
        c.tick(1, &mut log).unwrap();
        let r = *c.peek_bus_request().unwrap();
        assert_eq!(r.command, BusCommand::BusRd);
        assert_eq!(r.loc, Location { set: 1, tag: 3 });
        assert_eq!(r.requester, CacheId::new(0));
        assert_eq!(r.ordering, 1);
        assert_eq!(r.cost, 10);
        assert!(c.is_busy());
        // nothing resident until the bus completes the job
        assert_eq!(c.probe(Addr::new(addr(1, 3))), None);
        assert_eq!(
            log.events()[0].1,
            SimEvent::JobStarted {
                cache: CacheId::new(0),
                job: Job::read(addr(1, 3), 0),
                hit: false
            }
        );
    }

    #[test]
    fn test_busy_until_completion_and_window() {
        let conf = config();
        let mut c = cache(&conf);
        let mut log = EventLog::default();
        c.push_job(Job::read(addr(0, 1), 0));
        c.tick(1, &mut log).unwrap();
        c.tick(50, &mut log).unwrap();
        assert!(c.is_busy(), "outstanding request keeps the cache busy");
        c.get_bus_request(3).unwrap();
        c.bus_job_done(false, 4, &mut log).unwrap();
        assert!(!c.has_bus_request());
        assert_eq!(c.probe(Addr::new(addr(0, 1))), Some(Shared));
        c.tick(12, &mut log).unwrap();
        assert!(c.is_busy(), "window started at grant (3) and costs 10");
        c.tick(13, &mut log).unwrap();
        assert!(!c.is_busy());
    }

    #[test]
    fn test_hits_skip_the_bus() {
        let conf = config();
        let mut c = cache(&conf);
        let mut log = EventLog::recording();
        let mut cycle = 0;
        c.push_job(Job::read(addr(2, 5), 0));
        serve_alone(&mut c, &mut cycle, &mut log);
        assert_eq!(c.probe(Addr::new(addr(2, 5))), Some(Shared));
        // read hit on Shared
        c.push_job(Job::read(addr(2, 5) + 3, 0));
        cycle += 1;
        c.tick(cycle, &mut log).unwrap();
        assert!(!c.has_bus_request());
        assert!(c.is_busy());
        cycle += 1;
        c.tick(cycle, &mut log).unwrap();
        assert!(!c.is_busy(), "hit cost is one cycle");
        // write on Shared needs the bus
        c.push_job(Job::write(addr(2, 5), 0));
        serve_alone(&mut c, &mut cycle, &mut log);
        assert_eq!(c.probe(Addr::new(addr(2, 5))), Some(Modified));
        // write and read hit on Modified stay Modified
        c.push_job(Job::write(addr(2, 5), 0));
        c.push_job(Job::read(addr(2, 5), 0));
        serve_alone(&mut c, &mut cycle, &mut log);
        assert!(!c.has_bus_request());
        serve_alone(&mut c, &mut cycle, &mut log);
        assert_eq!(c.probe(Addr::new(addr(2, 5))), Some(Modified));
        #[cfg(feature = "stat")]
        {
            assert_eq!(c.stat().hits, 3);
            assert_eq!(c.stat().misses, 2);
            assert_eq!(c.stat().memory_uses, 2);
        }
    }

    #[test]
    fn test_hit_updates_lru() {
        let conf = config();
        let mut c = cache(&conf);
        let mut log = EventLog::default();
        let mut cycle = 0;
        for job in [
            Job::read(addr(0, 1), 0),
            Job::read(addr(0, 2), 0),
            Job::read(addr(0, 1), 0),
            Job::read(addr(0, 3), 0),
        ] {
            c.push_job(job);
            serve_alone(&mut c, &mut cycle, &mut log);
        }
        // tag 1 was touched by the hit, so tag 2 was the victim
        assert_eq!(c.probe(Addr::new(addr(0, 1))), Some(Shared));
        assert_eq!(c.probe(Addr::new(addr(0, 2))), None);
        assert_eq!(c.probe(Addr::new(addr(0, 3))), Some(Shared));
    }

    #[test]
    fn test_eviction_on_fill() {
        let conf = Config {
            associativity: 1,
            ..config()
        };
        let mut c = cache(&conf);
        let mut log = EventLog::recording();
        let mut cycle = 0;
        c.push_job(Job::read(addr(3, 1), 0));
        serve_alone(&mut c, &mut cycle, &mut log);
        assert!(c.set(3).unwrap().has_line(1));
        c.push_job(Job::read(addr(3, 2), 0));
        serve_alone(&mut c, &mut cycle, &mut log);
        let set = c.set(3).unwrap();
        assert!(!set.has_line(1));
        assert!(set.has_line(2));
        assert_eq!(set.get_line(2).state, Shared);
        assert!(log.events().iter().any(|(_, e)| matches!(
            e,
            SimEvent::Evicted {
                loc: Location { set: 3, tag: 1 },
                state: Shared,
                ..
            }
        )));
    }

    #[test]
    fn test_write_miss_into_full_set_costs_double() {
        let conf = Config {
            associativity: 1,
            ..config()
        };
        let mut c = cache(&conf);
        let mut log = EventLog::default();
        let mut cycle = 0;
        c.push_job(Job::read(addr(0, 1), 0));
        serve_alone(&mut c, &mut cycle, &mut log);
        // upgrading the resident tag of a full set evicts nothing
        c.push_job(Job::write(addr(0, 1), 0));
        cycle += 1;
        c.tick(cycle, &mut log).unwrap();
        assert_eq!(c.peek_bus_request().unwrap().cost, 10);
        c.get_bus_request(cycle).unwrap();
        c.bus_job_done(false, cycle, &mut log).unwrap();
        while c.is_busy() {
            cycle += 1;
            c.tick(cycle, &mut log).unwrap();
        }
        c.push_job(Job::write(addr(0, 2), 0));
        cycle += 1;
        c.tick(cycle, &mut log).unwrap();
        assert_eq!(c.peek_bus_request().unwrap().cost, 20);
        // reads are charged the plain memory cost
        let mut c = cache(&conf);
        let mut cycle = 0;
        c.push_job(Job::read(addr(0, 1), 0));
        serve_alone(&mut c, &mut cycle, &mut log);
        c.push_job(Job::read(addr(0, 2), 0));
        cycle += 1;
        c.tick(cycle, &mut log).unwrap();
        assert_eq!(c.peek_bus_request().unwrap().cost, 10);
    }

    #[test]
    fn test_snoop() {
        let conf = config();
        let mut c = cache(&conf);
        let mut log = EventLog::default();
        let mut cycle = 0;
        c.push_job(Job::read(addr(1, 1), 0));
        c.push_job(Job::write(addr(1, 2), 0));
        serve_alone(&mut c, &mut cycle, &mut log);
        serve_alone(&mut c, &mut cycle, &mut log);
        let req = |command, tag| BusRequest {
            command,
            requester: CacheId::new(1),
            loc: Location { set: 1, tag },
            ordering: 99,
            cost: 10,
        };
        // absent
        assert_eq!(
            c.snoop_bus_request(&req(BusCommand::BusRd, 7), cycle, &mut log),
            Ok(SnoopResult::None)
        );
        // BusRd on Shared: memory answers
        assert_eq!(
            c.snoop_bus_request(&req(BusCommand::BusRd, 1), cycle, &mut log),
            Ok(SnoopResult::Shared)
        );
        assert_eq!(c.probe(Addr::new(addr(1, 1))), Some(Shared));
        // BusRd on Modified: flush and downgrade
        assert_eq!(
            c.snoop_bus_request(&req(BusCommand::BusRd, 2), cycle, &mut log),
            Ok(SnoopResult::Flush)
        );
        assert_eq!(c.probe(Addr::new(addr(1, 2))), Some(Shared));
        // BusRdX on Shared: invalidate, line stays resident
        assert_eq!(
            c.snoop_bus_request(&req(BusCommand::BusRdX, 1), cycle, &mut log),
            Ok(SnoopResult::None)
        );
        assert_eq!(c.probe(Addr::new(addr(1, 1))), Some(Invalid));
        // Invalid resident line: no action
        assert_eq!(
            c.snoop_bus_request(&req(BusCommand::BusRdX, 1), cycle, &mut log),
            Ok(SnoopResult::None)
        );
        let responses: Vec<_> = std::iter::from_fn(|| c.take_response()).collect();
        assert_eq!(
            responses.iter().map(|r| r.result).collect::<Vec<_>>(),
            vec![ResponseKind::Shared, ResponseKind::FlushModifiedToShared]
        );
        assert!(responses
            .iter()
            .all(|r| r.requester == CacheId::new(1) && r.ordering == 99));
    }

    #[test]
    fn test_snoop_flush_to_invalid() {
        let conf = config();
        let mut c = cache(&conf);
        let mut log = EventLog::default();
        let mut cycle = 0;
        c.push_job(Job::write(addr(0, 4), 0));
        serve_alone(&mut c, &mut cycle, &mut log);
        let r = BusRequest {
            command: BusCommand::BusRdX,
            requester: CacheId::new(1),
            loc: Location { set: 0, tag: 4 },
            ordering: 7,
            cost: 10,
        };
        assert_eq!(
            c.snoop_bus_request(&r, cycle, &mut log),
            Ok(SnoopResult::Flush)
        );
        assert_eq!(c.probe(Addr::new(addr(0, 4))), Some(Invalid));
        assert_eq!(
            c.take_response().map(|r| r.result),
            Some(ResponseKind::FlushModifiedToInvalid)
        );
    }

    #[test]
    fn test_contract_errors() {
        let conf = config();
        let mut c = cache(&conf);
        let mut log = EventLog::default();
        assert_eq!(
            c.bus_job_done(true, 1, &mut log),
            Err(CacheError::NoOutstandingRequest {
                cache: CacheId::new(0)
            })
        );
        let r = BusRequest {
            command: BusCommand::BusRd,
            requester: CacheId::new(1),
            loc: Location { set: 4, tag: 0 },
            ordering: 1,
            cost: 1,
        };
        assert!(matches!(
            c.snoop_bus_request(&r, 1, &mut log),
            Err(CacheError::SetOutOfRange { set: 4, .. })
        ));
    }

    #[test]
    fn test_unimplemented_protocol_fails_fast() {
        let conf = Config {
            protocol: Protocol::Mesi,
            ..config()
        };
        let mut c = cache(&conf);
        let mut log = EventLog::default();
        c.push_job(Job::read(0, 0));
        assert!(matches!(
            c.tick(1, &mut log),
            Err(CacheError::Protocol(ProtocolError::Unsupported { .. }))
        ));
    }
}
