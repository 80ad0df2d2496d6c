//! The shared bus.
//!
//! At most one transaction occupies the bus for one propagation window. A
//! transaction either broadcasts a request to every other cache (their snoop
//! handlers react synchronously) or carries one snoop response back. Responses
//! preempt new requests; once none is left the requester is told that its job
//! is done.

use std::collections::BTreeSet;

use crate::{
    cache::{Cache, CacheError},
    common::{CacheId, Cycle},
    config::{ArbitrationPolicy, Config},
    event::{EventLog, SimEvent},
    message::{BusRequest, BusResponse},
    protocol::CoherenceProtocol,
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

#[cfg(feature = "stat")]
pub use self::stat::BusStat;

type Result<T, E = CacheError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Request(BusRequest),
    Response(BusResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub payload: Payload,
    pub start: Cycle,
    pub end: Cycle,
}

/// request whose requester has not been told it is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Completion {
    requester: CacheId,
    ordering: u64,
    was_shared: bool,
}

pub struct BusArbiter {
    protocol: &'static dyn CoherenceProtocol,
    policy: ArbitrationPolicy,
    propagation_delay: Cycle,
    transaction: Option<Transaction>,
    completion: Option<Completion>,
    /// per agent: ordering values already put on the bus
    ledgers: Vec<BTreeSet<u64>>,
    last_granted: Option<CacheId>,
    #[cfg(feature = "stat")]
    stat: stat::BusStat,
}

impl BusArbiter {
    pub fn new(config: &Config) -> Self {
        Self {
            protocol: config.protocol.strategy(),
            policy: config.arbitration,
            propagation_delay: config.propagation_delay,
            transaction: None,
            completion: None,
            ledgers: vec![BTreeSet::new(); config.processors],
            last_granted: None,
            #[cfg(feature = "stat")]
            stat: Default::default(),
        }
    }
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }
    /// no transaction on the bus and no requester left to notify
    pub fn is_idle(&self) -> bool {
        self.transaction.is_none() && self.completion.is_none()
    }
    pub fn has_serviced(&self, agent: CacheId, ordering: u64) -> bool {
        self.ledgers
            .get(agent.index())
            .map_or(false, |l| l.contains(&ordering))
    }

    fn start(&mut self, payload: Payload, cycle: Cycle) {
        self.transaction = Some(Transaction {
            payload,
            start: cycle,
            end: cycle + self.propagation_delay,
        });
    }

    /// agents in the order they are offered the bus this time
    fn scan_order(&self, agents: usize) -> impl Iterator<Item = usize> {
        let first = match (self.policy, self.last_granted) {
            (ArbitrationPolicy::RoundRobin, Some(last)) => last.index() + 1,
            _ => 0,
        };
        (0..agents).map(move |i| (first + i) % agents)
    }

    pub fn tick(&mut self, cycle: Cycle, caches: &mut [Cache], log: &mut EventLog) -> Result<()> {
        if self.ledgers.len() < caches.len() {
            self.ledgers.resize(caches.len(), BTreeSet::new());
        }

        // drain
        if let Some(t) = self.transaction {
            if t.end > cycle {
                #[cfg(feature = "stat")]
                self.stat.on_busy();
                return Ok(());
            }
            if let Payload::Response(response) = t.payload {
                if self.protocol.is_shared_response(response.result) {
                    if let Some(c) = &mut self.completion {
                        c.was_shared = true;
                    }
                }
            }
            self.transaction = None;
        }

        // responses go before any new request
        for i in 0..caches.len() {
            let Some(response) = caches[i].take_response() else {
                continue;
            };
            if response.is_trivial() {
                continue;
            }
            log.push(cycle, SimEvent::Responded { response });
            #[cfg(feature = "stat")]
            self.stat.on_response();
            self.start(Payload::Response(response), cycle);
            return Ok(());
        }

        if let Some(c) = self.completion.take() {
            caches[c.requester.index()].bus_job_done(c.was_shared, cycle, log)?;
            self.ledgers[c.requester.index()].remove(&c.ordering);
            log.push(
                cycle,
                SimEvent::Completed {
                    cache: c.requester,
                    ordering: c.ordering,
                    was_shared: c.was_shared,
                },
            );
        }

        // selection
        let mut selected = None;
        for i in self.scan_order(caches.len()) {
            let Some(request) = caches[i].peek_bus_request() else {
                continue;
            };
            if self.ledgers[i].contains(&request.ordering) {
                log.push(cycle, SimEvent::DuplicateSkipped { request: *request });
                #[cfg(feature = "stat")]
                self.stat.on_duplicate();
                continue;
            }
            selected = Some(i);
            break;
        }
        let Some(requester) = selected else {
            return Ok(());
        };
        let Some(request) = caches[requester].get_bus_request(cycle) else {
            return Ok(());
        };
        self.ledgers[requester].insert(request.ordering);
        self.last_granted = Some(CacheId::new(requester));
        self.completion = Some(Completion {
            requester: request.requester,
            ordering: request.ordering,
            was_shared: false,
        });
        log::trace!("servicing {} on the bus at cycle {cycle}", request.requester);
        log.push(cycle, SimEvent::Granted { request });
        #[cfg(feature = "stat")]
        self.stat.on_request();
        self.start(Payload::Request(request), cycle);

        // broadcast
        for (i, cache) in caches.iter_mut().enumerate() {
            if i != requester {
                cache.snoop_bus_request(&request, cycle, log)?;
            }
        }
        Ok(())
    }
    #[cfg(feature = "stat")]
    pub fn stat(&self) -> &stat::BusStat {
        &self.stat
    }
}

#[cfg(feature = "stat")]
impl AddStats for BusArbiter {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat));
    }
}

#[cfg(feature = "stat")]
mod stat {
    use std::fmt;

    use crate::stat::*;

    #[derive(Default, Clone, Copy, Debug)]
    pub struct BusStat {
        pub requests: u64,
        pub responses: u64,
        pub duplicates_skipped: u64,
        pub busy_cycles: u64,
    }

    impl BusStat {
        pub fn on_request(&mut self) {
            self.requests += 1;
        }
        pub fn on_response(&mut self) {
            self.responses += 1;
        }
        pub fn on_duplicate(&mut self) {
            self.duplicates_skipped += 1;
        }
        pub fn on_busy(&mut self) {
            self.busy_cycles += 1;
        }
    }

    impl Stat for BusStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ BusStat {
        fn header(&self) -> String {
            "bus stat".to_string()
        }
        fn width(&self) -> usize {
            33
        }
    }

    impl fmt::Display for &'_ BusStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            writeln!(f, "       requests: {:>10}", self.requests)?;
            writeln!(f, "      responses: {:>10}", self.responses)?;
            writeln!(f, "     duplicates: {:>10}", self.duplicates_skipped)?;
            write!(f, "    busy cycles: {:>10}", self.busy_cycles)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::{Addr, Job},
        line::LineState::*,
        message::{BusCommand, ResponseKind},
    };

    fn config() -> Config {
        Config {
            processors: 2,
            address_bits: 32,
            set_bits: 2,
            offset_bits: 4,
            associativity: 2,
            hit_cost: 1,
            memory_cost: 4,
            propagation_delay: 2,
            ..Default::default()
        }
    }

    struct Rig {
        cycle: Cycle,
        caches: Vec<Cache>,
        bus: BusArbiter,
        log: EventLog,
    }

    impl Rig {
        fn new(config: &Config) -> Self {
            Self {
                cycle: 0,
                caches: (0..config.processors)
                    .map(|i| Cache::new(CacheId::new(i), config))
                    .collect(),
                bus: BusArbiter::new(config),
                log: EventLog::recording(),
            }
        }
        fn step(&mut self) {
            self.cycle += 1;
            for c in &mut self.caches {
                c.tick(self.cycle, &mut self.log).unwrap();
            }
            self.bus.tick(self.cycle, &mut self.caches, &mut self.log).unwrap();
            assert!(
                self.bus.transaction().map_or(true, |t| t.start <= self.cycle && self.cycle < t.end),
                "transaction outside its window"
            );
        }
        fn settle(&mut self) {
            for _ in 0..1000 {
                if self.caches.iter().all(Cache::is_drained) && self.bus.is_idle() {
                    return;
                }
                self.step();
            }
            panic!("did not settle");
        }
        fn run(&mut self, cache: usize, job: Job) {
            self.caches[cache].push_job(job);
            self.settle();
        }
        fn state(&self, cache: usize, addr: u64) -> Option<crate::line::LineState> {
            self.caches[cache].probe(Addr::new(addr))
        }
        fn grants(&self) -> Vec<BusRequest> {
            self.log
                .events()
                .iter()
                .filter_map(|(_, e)| match e {
                    SimEvent::Granted { request } => Some(*request),
                    _ => None,
                })
                .collect()
        }
    }

    const A: u64 = 0x1230;

    #[test]
    fn test_simple_hit() {
        let mut r = Rig::new(&config());
        r.run(0, Job::read(A, 0));
        assert_eq!(r.state(0, A), Some(Shared));
        assert_eq!(r.grants().len(), 1);
        assert_eq!(r.grants()[0].command, BusCommand::BusRd);
        r.run(0, Job::read(A, 0));
        assert_eq!(r.state(0, A), Some(Shared));
        assert_eq!(r.grants().len(), 1, "second read is a hit");
        #[cfg(feature = "stat")]
        {
            assert_eq!(r.bus.stat().requests, 1);
            assert_eq!(r.caches[0].stat().hits, 1);
        }
    }

    #[test]
    fn test_write_after_read_invalidates() {
        let mut r = Rig::new(&config());
        r.run(0, Job::read(A, 0));
        r.run(1, Job::write(A, 1));
        assert_eq!(r.state(0, A), Some(Invalid));
        assert_eq!(r.state(1, A), Some(Modified));
        let g = r.grants();
        assert_eq!(g[1].command, BusCommand::BusRdX);
        assert_eq!(g[1].requester, CacheId::new(1));
    }

    #[test]
    fn test_read_of_modified_line_is_shared() {
        let mut r = Rig::new(&config());
        r.run(1, Job::write(A, 1));
        r.run(0, Job::read(A, 0));
        assert_eq!(r.state(0, A), Some(Shared));
        assert_eq!(r.state(1, A), Some(Shared));
        let completed: Vec<_> = r
            .log
            .events()
            .iter()
            .filter_map(|(_, e)| match e {
                SimEvent::Completed {
                    cache, was_shared, ..
                } => Some((cache.index(), *was_shared)),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![(1, false), (0, true)]);
        #[cfg(feature = "stat")]
        {
            assert_eq!(r.bus.stat().responses, 1);
            assert_eq!(r.caches[0].stat().cache_shares, 1);
            assert_eq!(r.caches[1].stat().flushes, 1);
        }
    }

    #[test]
    fn test_shared_response_does_not_count_under_msi() {
        let mut r = Rig::new(&config());
        r.run(0, Job::read(A, 0));
        r.run(1, Job::read(A, 1));
        assert_eq!(r.state(0, A), Some(Shared));
        assert_eq!(r.state(1, A), Some(Shared));
        // cache 0 still answered, occupying the bus for one window
        assert!(r.log.events().iter().any(|(_, e)| matches!(
            e,
            SimEvent::Responded { response } if response.result == ResponseKind::Shared
        )));
        assert!(r.log.events().iter().any(|(_, e)| matches!(
            e,
            SimEvent::Completed { cache, was_shared: false, .. } if cache.index() == 1
        )));
    }

    #[test]
    fn test_fixed_priority_order() {
        let mut r = Rig::new(&config());
        r.caches[1].push_job(Job::read(0x40, 1));
        r.caches[0].push_job(Job::read(0x80, 0));
        r.settle();
        let g = r.grants();
        assert_eq!(g[0].requester, CacheId::new(0));
        assert_eq!(g[1].requester, CacheId::new(1));
    }

    #[test]
    fn test_round_robin_order() {
        let conf = Config {
            processors: 3,
            arbitration: ArbitrationPolicy::RoundRobin,
            ..config()
        };
        let mut r = Rig::new(&conf);
        for round in 0..2u64 {
            for i in 0..3 {
                r.caches[i].push_job(Job::read(0x1000 * (round * 3 + i as u64 + 1), i as u32));
            }
        }
        r.settle();
        let order: Vec<_> = r.grants().iter().map(|g| g.requester.index()).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_at_most_one_in_flight() {
        let conf = Config {
            processors: 4,
            propagation_delay: 3,
            ..config()
        };
        let mut r = Rig::new(&conf);
        for i in 0..4 {
            for k in 0..6u64 {
                let addr = 0x10 * ((k + i as u64) % 5);
                let job = if (k + i as u64) % 3 == 0 {
                    Job::write(addr, i as u32)
                } else {
                    Job::read(addr, i as u32)
                };
                r.caches[i].push_job(job);
            }
        }
        r.settle();
        // every window starts no earlier than the previous one ended
        let starts: Vec<Cycle> = r
            .log
            .events()
            .iter()
            .filter(|(_, e)| matches!(e, SimEvent::Granted { .. } | SimEvent::Responded { .. }))
            .map(|(c, _)| *c)
            .collect();
        for w in starts.windows(2) {
            assert!(w[1] >= w[0] + 3, "{starts:?}");
        }
        assert!(!r.grants().is_empty());
    }

    #[test]
    fn test_no_duplicate_service() {
        let mut r = Rig::new(&config());
        r.caches[0].push_job(Job::read(A, 0));
        r.step();
        let ordering = r.caches[0].peek_bus_request().unwrap().ordering;
        assert!(r.bus.has_serviced(CacheId::new(0), ordering));
        // the bus frees up while the same request is still outstanding
        r.bus.transaction = None;
        r.bus.completion = None;
        for _ in 0..5 {
            r.step();
        }
        assert_eq!(r.grants().len(), 1);
        assert!(r.caches[0].has_bus_request());
        assert!(r.log.events().iter().any(|(_, e)| matches!(e, SimEvent::DuplicateSkipped { .. })));
    }

    #[test]
    fn test_ledger_retired_on_completion() {
        let mut r = Rig::new(&config());
        r.run(0, Job::read(A, 0));
        let ordering = r.grants()[0].ordering;
        assert!(!r.bus.has_serviced(CacheId::new(0), ordering));
    }
}
