use std::{collections::VecDeque, fmt};

use thiserror::Error;

use crate::{
    bus::BusArbiter,
    cache::{Cache, CacheError},
    common::{Addr, CacheId, Cycle, ExecuteMode, Job, SimulationOption, TraceKind},
    config::{Clock, Config, ConfigError, DispatchPolicy},
    event::{EventLog, SimEvent},
    line::LineState,
    protocol::ProtocolError,
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("cycle limit #{0} reached before every access was serviced")]
    CycleLimit(Cycle),
}

/// hands accesses from the trace to the caches
enum Dispatcher {
    /// next access only once every pending queue is empty
    Serialized(VecDeque<Job>),
    /// one queue per cache in trace order
    PerCache(Vec<VecDeque<Job>>),
}

impl Dispatcher {
    fn new(policy: DispatchPolicy, jobs: Vec<Job>, processors: usize) -> Self {
        match policy {
            DispatchPolicy::Serialized => Dispatcher::Serialized(jobs.into()),
            DispatchPolicy::PerCache => {
                let mut queues = vec![VecDeque::new(); processors];
                for job in jobs {
                    queues[job.route(processors).index()].push_back(job);
                }
                Dispatcher::PerCache(queues)
            }
        }
    }
    fn remaining(&self) -> usize {
        match self {
            Dispatcher::Serialized(q) => q.len(),
            Dispatcher::PerCache(qs) => qs.iter().map(VecDeque::len).sum(),
        }
    }
    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
    /// returns the number of accesses handed out
    fn dispatch(&mut self, caches: &mut [Cache]) -> usize {
        match self {
            Dispatcher::Serialized(q) => {
                if caches.iter().any(Cache::has_pending_jobs) {
                    return 0;
                }
                let Some(job) = q.pop_front() else {
                    return 0;
                };
                caches[job.route(caches.len()).index()].push_job(job);
                1
            }
            Dispatcher::PerCache(qs) => {
                let mut n = 0;
                for (cache, q) in caches.iter_mut().zip(qs.iter_mut()) {
                    if cache.has_pending_jobs() {
                        continue;
                    }
                    if let Some(job) = q.pop_front() {
                        cache.push_job(job);
                        n += 1;
                    }
                }
                n
            }
        }
    }
}

pub struct Simulator {
    config: Config,
    clock: Clock,
    caches: Vec<Cache>,
    bus: BusArbiter,
    dispatcher: Dispatcher,
    log: EventLog,
    keep_events: bool,
    cycle_limit: Option<Cycle>,
    dispatched: usize,
    fatal_error: Option<RuntimeError>,
    #[cfg(feature = "stat")]
    stat_builder: stat::SimStatBuilder,
}

impl Simulator {
    pub fn new(config: Config, jobs: Vec<Job>) -> Result<Self, ConfigError> {
        config.validate()?;
        if !config.protocol.is_implemented() {
            log::warn!(
                "{} has no transition tables; the first access will fail",
                config.protocol
            );
        }
        log::info!(
            "{} caches, {} sets x {} ways, {} accesses",
            config.processors,
            config.num_sets(),
            config.associativity,
            jobs.len()
        );
        Ok(Self {
            clock: Clock::new(),
            caches: (0..config.processors)
                .map(|i| Cache::new(CacheId::new(i), &config))
                .collect(),
            bus: BusArbiter::new(&config),
            dispatcher: Dispatcher::new(config.dispatch, jobs, config.processors),
            log: EventLog::new(false),
            keep_events: false,
            cycle_limit: None,
            dispatched: 0,
            fatal_error: None,
            #[cfg(feature = "stat")]
            stat_builder: stat::SimStatBuilder::new(),
            config,
        })
    }
    /// keep every event in the log instead of only the current cycle's
    pub fn record_events(&mut self, keep: bool) {
        self.keep_events = keep;
    }
    /// makes [`Self::single_cycle`] fail once the clock reaches `limit`
    pub fn set_cycle_limit(&mut self, limit: Option<Cycle>) {
        self.cycle_limit = limit;
    }

    /// trace drained, every cache idle, nothing on the bus
    pub fn is_finished(&self) -> bool {
        self.dispatcher.is_empty() && self.caches.iter().all(Cache::is_drained) && self.bus.is_idle()
    }

    /// advances the clock by one cycle
    fn step(&mut self, trace: TraceKind) -> Result<(), RuntimeError> {
        self.log.set_recording(self.keep_events || !trace.is_none());
        let from = self.log.len();
        let cycle = self.clock.tick();
        self.dispatched += self.dispatcher.dispatch(&mut self.caches);
        for cache in &mut self.caches {
            cache.tick(cycle, &mut self.log)?;
        }
        self.bus.tick(cycle, &mut self.caches, &mut self.log)?;
        if !trace.is_none() {
            print_trace(&self.log.events()[from..], trace);
        }
        if !self.keep_events {
            self.log.clear();
        }
        Ok(())
    }

    pub fn exit_sim(&mut self) {
        #[cfg(feature = "stat")]
        {
            self.stat_builder.cycle(self.clock.now());
            self.stat_builder.jobs(self.dispatched);
            self.stat_builder.stop_timer();
        }
        log::info!("simulation finished at cycle #{}", self.clock.now());
    }

    pub fn single_cycle(&mut self, opt: &SimulationOption) -> anyhow::Result<ControlFlow> {
        if self.fatal_error.is_some() {
            return Ok(ControlFlow::Break(BreakReason::CannotRestart));
        }
        macro_rules! execute {
            () => {
                if self.is_finished() {
                    self.exit_sim();
                    return Ok(ControlFlow::Exit);
                }
                if let Some(max) = self.cycle_limit.filter(|&max| self.clock.now() >= max) {
                    log::error!("cycle limit #{max} reached");
                    self.fatal_error = Some(RuntimeError::CycleLimit(max));
                    return Ok(ControlFlow::Break(BreakReason::Failed));
                }
                if let Err(e) = self.step(opt.trace) {
                    log::error!("{e}");
                    self.fatal_error = Some(e);
                    return Ok(ControlFlow::Break(BreakReason::Failed));
                }
            };
        }
        match &opt.mode {
            ExecuteMode::UntilCycle { cycle } => loop {
                if self.clock.now() >= *cycle {
                    return Ok(ControlFlow::Break(BreakReason::Reached(*cycle)));
                }
                execute!();
            },
            ExecuteMode::Run => loop {
                execute!();
            },
            ExecuteMode::RunStep(r) => {
                for _ in 0..r.get_step() {
                    execute!();
                }
                Ok(ControlFlow::Break(BreakReason::StepEnded))
            }
        }
    }

    /// runs until every access is serviced; returns the final cycle
    pub fn run_to_completion(&mut self, max_cycles: Option<Cycle>) -> Result<Cycle, RuntimeError> {
        if let Some(e) = &self.fatal_error {
            return Err(e.clone());
        }
        while !self.is_finished() {
            if let Some(max) = max_cycles {
                if self.clock.now() >= max {
                    self.fatal_error = Some(RuntimeError::CycleLimit(max));
                    return Err(RuntimeError::CycleLimit(max));
                }
            }
            if let Err(e) = self.step(TraceKind::none()) {
                self.fatal_error = Some(e.clone());
                return Err(e);
            }
        }
        self.exit_sim();
        Ok(self.clock.now())
    }

    pub fn cycle(&self) -> Cycle {
        self.clock.now()
    }
    pub fn config(&self) -> &Config {
        &self.config
    }
    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }
    pub fn cache(&self, id: usize) -> Option<&Cache> {
        self.caches.get(id)
    }
    pub fn bus(&self) -> &BusArbiter {
        &self.bus
    }
    pub fn remaining_jobs(&self) -> usize {
        self.dispatcher.remaining()
    }
    pub fn events(&self) -> &[(Cycle, SimEvent)] {
        self.log.events()
    }
    /// state of `addr` in each cache
    pub fn probe(&self, addr: Addr) -> Vec<(CacheId, Option<LineState>)> {
        self.caches.iter().map(|c| (c.id(), c.probe(addr))).collect()
    }
    pub fn dump_cache(&self, id: usize) -> Option<CacheDump<'_>> {
        self.caches.get(id).map(|cache| CacheDump {
            cache,
            config: &self.config,
        })
    }
    pub fn bus_status(&self) -> BusStatus<'_> {
        BusStatus { sim: self }
    }
    pub fn get_error_msg(&self) -> Option<String> {
        self.fatal_error.as_ref().map(|e| format!("{e}"))
    }
}

fn print_trace(events: &[(Cycle, SimEvent)], trace: TraceKind) {
    for (cycle, e) in events {
        if trace.contains(e.kind()) {
            println!("#{cycle:010}, {e}");
        }
    }
}

pub struct CacheDump<'a> {
    cache: &'a Cache,
    config: &'a Config,
}

impl fmt::Display for CacheDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let geometry = self.config.geometry();
        write!(f, "{}", self.cache.id())?;
        if let Some(job) = self.cache.current_job() {
            write!(f, " serving {job}")?;
        }
        let pending = self.cache.pending_jobs().count();
        if pending > 0 {
            write!(f, ", {pending} queued")?;
        }
        let mut empty = true;
        for (set, line) in self.cache.lines() {
            let addr = geometry.compose(crate::config::Location {
                set,
                tag: line.tag(),
            });
            write!(f, "\n  set {set:>4}: {line} {addr}")?;
            empty = false;
        }
        if empty {
            write!(f, "\n  (no resident lines)")?;
        }
        Ok(())
    }
}

pub struct BusStatus<'a> {
    sim: &'a Simulator,
}

impl fmt::Display for BusStatus<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sim.bus.transaction() {
            Some(t) => {
                let what = match t.payload {
                    crate::bus::Payload::Request(r) => r.to_string(),
                    crate::bus::Payload::Response(r) => r.to_string(),
                };
                write!(f, "busy #{}..#{}: {what}", t.start, t.end)?;
            }
            None => write!(f, "idle")?,
        }
        let waiting: Vec<_> = self
            .sim
            .caches
            .iter()
            .filter(|c| c.has_bus_request())
            .map(|c| c.id().to_string())
            .collect();
        if !waiting.is_empty() {
            write!(f, "; waiting: {}", waiting.join(", "))?;
        }
        Ok(())
    }
}

pub enum ControlFlow {
    Break(BreakReason),
    Exit,
}

pub enum ExitCode {
    Success,
    Failure,
}

impl ExitCode {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl ControlFlow {
    pub fn exit_code(&self) -> Option<ExitCode> {
        match self {
            Self::Exit => Some(ExitCode::Success),
            Self::Break(BreakReason::CannotRestart | BreakReason::Failed) => Some(ExitCode::Failure),
            Self::Break(_) => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum BreakReason {
    CannotRestart,
    Failed,
    Reached(Cycle),
    StepEnded,
}

impl Simulator {
    #[cfg(feature = "stat")]
    pub fn collect_stat(&self) -> Stats {
        let mut ss = Stats::default();
        self.add_stats(&mut ss);
        ss
    }
}

#[cfg(feature = "stat")]
impl AddStats for Simulator {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat_builder.finish()));
        self.bus.add_stats(buf);
        for cache in &self.caches {
            cache.add_stats(buf);
        }
    }
}

#[cfg(feature = "stat")]
mod stat {
    use crate::{common::Cycle, stat::*};

    use std::{fmt, time};

    pub struct SimStatBuilder {
        begin: time::Instant,
        cycle: Cycle,
        jobs: usize,
        elapsed: Option<time::Duration>,
    }

    impl SimStatBuilder {
        pub fn new() -> Self {
            Self {
                begin: time::Instant::now(),
                cycle: 0,
                jobs: 0,
                elapsed: None,
            }
        }
        pub fn cycle(&mut self, cycle: Cycle) {
            self.cycle = cycle
        }
        pub fn jobs(&mut self, jobs: usize) {
            self.jobs = jobs
        }
        pub fn stop_timer(&mut self) {
            self.elapsed = Some(self.begin.elapsed())
        }
        pub fn finish(&self) -> SimStat {
            SimStat {
                cycle: self.cycle,
                jobs: self.jobs,
                elapsed: self.elapsed.unwrap_or_else(|| self.begin.elapsed()),
            }
        }
    }

    impl Default for SimStatBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    pub struct SimStat {
        cycle: Cycle,
        jobs: usize,
        elapsed: time::Duration,
    }

    impl Stat for SimStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ SimStat {
        fn header(&self) -> String {
            "simulator stat".to_string()
        }
        fn width(&self) -> usize {
            33
        }
    }

    impl fmt::Display for &'_ SimStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let ms = format!("{} ms", self.elapsed.as_millis());
            writeln!(f, "  elapsed total: {ms:>10}")?;
            let cycle = format!("#{}", self.cycle);
            writeln!(f, "   cycles total: {cycle:>10}")?;
            write!(f, "       accesses: {:>10}", self.jobs)
        }
    }
}
