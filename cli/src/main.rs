mod interactive;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coherence_sim::{
    common::{Cycle, SimulationOption, TraceKind},
    config::{ArbitrationPolicy, Config, DispatchPolicy, Protocol},
    sim::Simulator,
    trace::parse_trace,
};

#[cfg(feature = "stat")]
use terminal_size::terminal_size;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// simulate a memory-access trace
    Run(RunArgs),
    /// print the effective configuration as JSON
    Config(ConfigArgs),
}

/// configuration file and per-field overrides
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    processors: Option<usize>,
    #[arg(long)]
    address_bits: Option<u32>,
    #[arg(long)]
    set_bits: Option<u32>,
    #[arg(long)]
    offset_bits: Option<u32>,
    #[arg(long)]
    associativity: Option<usize>,
    /// msi, mesi or moesi
    #[arg(long)]
    protocol: Option<Protocol>,
    #[arg(long)]
    hit_cost: Option<Cycle>,
    #[arg(long)]
    memory_cost: Option<Cycle>,
    #[arg(long)]
    propagation_delay: Option<Cycle>,
    /// fixed or round-robin
    #[arg(long)]
    arbitration: Option<ArbitrationPolicy>,
    /// serialized or per-cache
    #[arg(long)]
    dispatch: Option<DispatchPolicy>,
}

impl ConfigArgs {
    fn load(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(p) => Config::from_json_file(p)
                .with_context(|| format!("failed to load configuration from {}", p.display()))?,
            None => Config::default(),
        };
        macro_rules! overrides {
            ($($field:ident),*) => {
                $(
                    if let Some(v) = self.$field {
                        config.$field = v;
                    }
                )*
            };
        }
        overrides!(
            processors,
            address_bits,
            set_bits,
            offset_bits,
            associativity,
            protocol,
            hit_cost,
            memory_cost,
            propagation_delay,
            arbitration,
            dispatch
        );
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// File path to input trace
    #[arg(short, long)]
    input: PathBuf,
    #[command(flatten)]
    config: ConfigArgs,
    /// Print every coherence event
    #[arg(long)]
    trace: bool,
    /// Enable interactive mode
    #[arg(long)]
    interactive: bool,
    /// Give up once the clock reaches this cycle
    #[arg(long)]
    max_cycles: Option<Cycle>,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    match args.command {
        Command::Run(RunArgs {
            input,
            config,
            trace,
            interactive,
            max_cycles,
            verbose,
        }) => {
            if verbose {
                env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                    .init();
            } else {
                env_logger::init();
            }
            let config = config.load()?;
            let src = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let jobs = parse_trace(&src)?;
            let mut sim = Simulator::new(config, jobs)?;
            sim.set_cycle_limit(max_cycles);
            execute(&mut sim, interactive, trace)?;
            log::info!("finished execution.");
            output_stat(&sim);
            Ok(())
        }
        Command::Config(args) => {
            env_logger::init();
            println!("{}", args.load()?.to_json()?);
            Ok(())
        }
    }
}

#[cfg(not(feature = "stat"))]
fn output_stat(sim: &Simulator) {
    println!("finished at cycle #{}", sim.cycle());
}

#[cfg(feature = "stat")]
fn output_stat(sim: &Simulator) {
    let max_width = get_terminal_width().unwrap_or(120) as usize;
    println!("{}", sim.collect_stat().view(max_width));
}

#[cfg(feature = "stat")]
fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(20))
}

fn execute(sim: &mut Simulator, interactive: bool, trace: bool) -> Result<()> {
    if interactive {
        interactive::execute_interactive(sim, trace)
    } else {
        let opt = SimulationOption {
            trace: if trace {
                TraceKind::all()
            } else {
                TraceKind::none()
            },
            ..Default::default()
        };
        loop {
            let r = sim.single_cycle(&opt)?;
            if let Some(c) = r.exit_code() {
                if c.is_success() {
                    break Ok(());
                } else {
                    let how = sim.get_error_msg().unwrap_or_default();
                    break Err(anyhow::anyhow!("simulator returns an error at cycle #{}: {how}. try executing process with --interactive to debug.", sim.cycle()));
                }
            }
        }
    }
}
