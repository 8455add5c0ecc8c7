use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use sos::{DEFAULT_HEADROOM, DEFAULT_RAM_SIZE, Program, Sim, SimConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// Assembly file to run
    #[arg(value_name = "PROGRAM")]
    program: PathBuf,

    /// Size of RAM in words
    #[arg(long, default_value_t = DEFAULT_RAM_SIZE)]
    ram_size: usize,

    /// Words allocated to the process (default: program size plus headroom)
    #[arg(short, long)]
    alloc: Option<usize>,

    /// Words of heap and stack added to the program size
    #[arg(long, default_value_t = DEFAULT_HEADROOM)]
    headroom: usize,

    /// Maximum number of instructions to execute
    #[arg(short, long)]
    max_instructions: Option<u64>,

    /// Seed for the keyboard device
    #[arg(long)]
    seed: Option<u64>,

    /// Print the assembled program before running it
    #[arg(short, long)]
    list: bool,

    /// Enable trace output (register dump and disassembly per instruction)
    #[arg(short, long)]
    trace: bool,
}

impl Args {
    fn sim_config(&self) -> SimConfig {
        SimConfig {
            ram_size: self.ram_size,
            alloc_size: self.alloc,
            headroom: self.headroom,
            instruction_limit: self.max_instructions,
            standard_devices: true,
            keyboard_seed: self.seed,
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let filter = if args.trace {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let source = fs::read_to_string(&args.program)
        .with_context(|| format!("reading {}", args.program.display()))?;
    let program = source
        .parse::<Program>()
        .with_context(|| format!("assembling {}", args.program.display()))?;
    if args.list {
        print!("{program}");
    }

    let mut sim = Sim::new(args.sim_config());
    let pid = sim.load(&program)?;
    info!(%pid, "running {}", args.program.display());
    let status = sim.run();

    for value in sim.output() {
        println!("{value}");
    }
    for (address, value) in sim.drain_console() {
        println!("console[{address}] = {value}");
    }
    println!(
        "{:?} after {} instructions",
        status,
        sim.cpu().instructions_executed()
    );
    println!("{}", sim.cpu().registers());

    Ok(if status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
