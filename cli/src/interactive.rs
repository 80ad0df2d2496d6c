use std::io::{stdin, stdout, Write};

use anyhow::Result;
use bitmask_enum::bitmask;
use coherence_sim::{
    common::{Addr, Cycle, ExecuteMode, RunStep, SimulationOption, TraceKind},
    sim::{BreakReason, ControlFlow, Simulator},
};

#[cfg(feature = "stat")]
use terminal_size::terminal_size;

peg::parser!(grammar command() for str {
    rule usize() -> usize
        = n:$(quiet!{['0'..='9']+}) {? n.parse().map_err(|_| "usize") }
        / expected!("usize")
    rule cycle() -> Cycle
        = n:$(quiet!{['0'..='9']+}) {? n.parse().map_err(|_| "cycle") }
        / expected!("cycle")
    rule hex() -> u64
        = ("0" ['x' | 'X'])? n:$(quiet!{['0'..='9'|'a'..='f'|'A'..='F']+})
        {? u64::from_str_radix(n, 16).map_err(|_| "64-bit address") }
        / expected!("hexadecimal address")
    rule addr() -> Addr
        = a:hex() { Addr::new(a) }
    rule trace_kind() -> TraceKind
        = "job" "s"? { TraceKind::Job }
        / "bus" { TraceKind::Bus }
        / "snoop" "s"? { TraceKind::Snoop }
    rule dyn_command() -> ExecuteMode
        = "until" __ cycle:cycle() { ExecuteMode::UntilCycle { cycle } }
        / "run" { ExecuteMode::Run }
        / "step" step:(__ s:usize() { s })? { ExecuteMode::RunStep(RunStep::new(step)) }
    rule static_command() -> StaticCommand
        = "trace" __ "off" { StaticCommand::SetTrace(TraceKind::none()) }
        / "trace" __ k:trace_kind() { StaticCommand::ToggleTrace(k) }
        / "trace" (__ "on")? { StaticCommand::SetTrace(TraceKind::all()) }
        / "watch" __ w:watch_kind() { StaticCommand::Watch(Operation::Add, w) }
        / "unwatch" __ w:watch_kind() { StaticCommand::Watch(Operation::Remove, w) }
        / "show" __ sk:show_kind() { StaticCommand::Show(sk) }
    rule watch_kind() -> WatchingKind
        = "cycle" { WatchingKind::Cycle }
        / "bus" { WatchingKind::Bus }
        / "addr" __ a:addr() { WatchingKind::Addr(a) }
    rule show_kind() -> ShowKind
        = "cycle" { ShowKind::Cycle }
        / "bus" { ShowKind::Bus }
        / "stat" { ShowKind::Stat }
        / "trace" { ShowKind::Trace }
        / "watch" ("ing" "s"?)? { ShowKind::Watchings }
        / "cache" __ id:usize() { ShowKind::Cache(id) }
        / "addr" __ a:addr() { ShowKind::Addr(a) }
    pub(crate) rule parse_command() -> Command
        = _ s:static_command() _ { Command::Static(s) }
        / _ "exit" _ { Command::Exit }
        / _ d:dyn_command()? _ { Command::Dynamic(d) }
        / expected!("command")

    rule ws() = quiet!{[' ' | '\t' | '\r' | '\n']}
        / expected!("whitespace")
    rule _() = ws()*
    rule __() = ws()+
});

pub(crate) enum Command {
    Dynamic(Option<ExecuteMode>),
    Static(StaticCommand),
    Exit,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StaticCommand {
    SetTrace(TraceKind),
    ToggleTrace(TraceKind),
    Watch(Operation, WatchingKind),
    Show(ShowKind),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    Add,
    Remove,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WatchingKind {
    Cycle,
    Bus,
    Addr(Addr),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ShowKind {
    Cycle,
    Bus,
    Stat,
    Trace,
    Watchings,
    Cache(usize),
    Addr(Addr),
}

/// what is printed every time the simulator stops
#[bitmask(u8)]
enum WatchStatus {
    Cycle,
    Bus,
}

#[cfg(feature = "stat")]
fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(20))
}

fn show_addr(sim: &Simulator, addr: Addr) {
    let states = sim
        .probe(addr)
        .into_iter()
        .map(|(id, s)| match s {
            Some(s) => format!("{id}: {s}"),
            None => format!("{id}: -"),
        })
        .collect::<Vec<_>>()
        .join(", ");
    println!("{addr}: {states}");
}

pub fn execute_interactive(sim: &mut Simulator, trace: bool) -> Result<()> {
    let mut opt = SimulationOption {
        trace: if trace {
            TraceKind::all()
        } else {
            TraceKind::none()
        },
        mode: ExecuteMode::RunStep(RunStep::default()),
    };
    let mut watching = WatchStatus::none();
    let mut watching_addrs: Vec<Addr> = Vec::new();
    #[cfg(feature = "stat")]
    let width = get_terminal_width();
    println!("entering interactive.");
    'interactive: loop {
        let mut show = None;
        let update_mode = 'input: loop {
            if let Some(show) = show.take() {
                match show {
                    ShowKind::Cycle => {
                        println!(
                            "cycle #{}, {} accesses not dispatched",
                            sim.cycle(),
                            sim.remaining_jobs()
                        );
                    }
                    ShowKind::Bus => println!("bus: {}", sim.bus_status()),
                    ShowKind::Trace => println!("tracing {}", opt.trace),
                    #[cfg(feature = "stat")]
                    ShowKind::Stat => {
                        println!("{}", sim.collect_stat().view(width.unwrap_or(60) as usize));
                    }
                    #[cfg(not(feature = "stat"))]
                    ShowKind::Stat => {
                        println!("statistics are disabled; try compile with `--features stat`");
                    }
                    ShowKind::Cache(id) => match sim.dump_cache(id) {
                        Some(dump) => println!("{dump}"),
                        None => println!("no cache #{id} (have {})", sim.caches().len()),
                    },
                    ShowKind::Addr(addr) => show_addr(sim, addr),
                    ShowKind::Watchings => {
                        let mut printed = false;
                        if watching.contains(WatchStatus::Cycle) {
                            println!("\tcycle");
                            printed = true;
                        }
                        if watching.contains(WatchStatus::Bus) {
                            println!("\tbus");
                            printed = true;
                        }
                        if !watching_addrs.is_empty() {
                            println!(
                                "\taddresses: {}",
                                watching_addrs
                                    .iter()
                                    .map(|a| format!("{a}"))
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            );
                            printed = true;
                        }
                        if !printed {
                            println!("nothing to watch.");
                        }
                    }
                }
            }
            // prompt string
            match &opt.mode {
                ExecuteMode::Run => print!("run "),
                ExecuteMode::UntilCycle { cycle } => print!("until #{cycle} "),
                ExecuteMode::RunStep(n) => print!("step {} ", n.get_step()),
            }
            if !opt.trace.is_none() {
                print!("[trace {}] ", opt.trace);
            }
            print!("> ");
            stdout().flush()?;
            let mut str = String::new();
            if stdin().read_line(&mut str)? == 0 {
                break 'interactive;
            }
            let parsed = match command::parse_command(&str) {
                Ok(p) => p,
                Err(e) => {
                    println!("parse error: expected {}", e.expected);
                    continue;
                }
            };
            match parsed {
                Command::Dynamic(d) => {
                    break 'input d;
                }
                Command::Static(s) => {
                    match s {
                        StaticCommand::Show(s) => show = Some(s),
                        StaticCommand::SetTrace(k) => {
                            opt.trace = k;
                            show = Some(ShowKind::Trace);
                        }
                        StaticCommand::ToggleTrace(k) => {
                            opt.trace ^= k;
                            show = Some(ShowKind::Trace);
                        }
                        StaticCommand::Watch(Operation::Add, w) => {
                            match w {
                                WatchingKind::Cycle => watching |= WatchStatus::Cycle,
                                WatchingKind::Bus => watching |= WatchStatus::Bus,
                                WatchingKind::Addr(a) => {
                                    if !watching_addrs.contains(&a) {
                                        watching_addrs.push(a);
                                    }
                                }
                            }
                            show = Some(ShowKind::Watchings);
                        }
                        StaticCommand::Watch(Operation::Remove, w) => {
                            match w {
                                WatchingKind::Cycle => watching &= !WatchStatus::Cycle,
                                WatchingKind::Bus => watching &= !WatchStatus::Bus,
                                WatchingKind::Addr(a) => watching_addrs.retain(|aa| *aa != a),
                            }
                            show = Some(ShowKind::Watchings);
                        }
                    };
                    continue 'input;
                }
                Command::Exit => {
                    sim.exit_sim();
                    break 'interactive;
                }
            }
        };
        if let Some(mode) = update_mode {
            println!("mode: {mode}");
            opt.mode = mode;
        }
        match sim.single_cycle(&opt)? {
            ControlFlow::Break(reason) => {
                match reason {
                    BreakReason::Reached(c) => println!("reached #{c}"),
                    BreakReason::StepEnded => (),
                    BreakReason::CannotRestart => {
                        let e = sim.get_error_msg().unwrap_or_default();
                        println!("cannot restart simulator due to previous error: {e}")
                    }
                    BreakReason::Failed => {
                        let e = sim.get_error_msg().unwrap_or_default();
                        let cy = sim.cycle();
                        println!("failed at #{cy}: {e}")
                    }
                }
                if watching.contains(WatchStatus::Cycle) {
                    println!("cycle #{}", sim.cycle());
                }
                if watching.contains(WatchStatus::Bus) {
                    println!("bus: {}", sim.bus_status());
                }
                for &addr in &watching_addrs {
                    show_addr(sim, addr);
                }
                continue;
            }
            ControlFlow::Exit => {
                println!("every access serviced at cycle #{}", sim.cycle());
                break 'interactive;
            }
        }
    }
    println!("exiting interactive.");
    Ok(())
}
