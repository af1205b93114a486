use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use haloca::engine::anneal::{self, AnnealConfig, GridInit};
use haloca::engine::driver::{self, RingConfig};
use haloca::engine::gpu::GpuStencil;
use haloca::engine::partition::{Partition, PartitionPolicy, TileGrid};
use haloca::error::{HalocaError, Result};
use haloca::ir::{population, InitialCondition, DEFAULT_STEPS, DEFAULT_WIDTH};
use haloca::output::{self, PbmTraceWriter};
use haloca::parser;
use haloca::rule::ElementaryRule;
use haloca::stats::Stats;

const PROGRAM: &str = "haloca";

/// Halo-exchange stencil engine for cellular automata
#[derive(Parser)]
#[command(name = "haloca", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a 1D elementary automaton on a ring and write its trace as P1 PBM
    Rule30(Rule30Args),
    /// Run the 2D anneal automaton on a torus and write the final grid as P4 PBM
    Anneal(AnnealArgs),
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RingBackend {
    Threads,
    Gpu,
    Mpi,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GridBackend {
    Cpu,
    Gpu,
}

#[derive(Args)]
struct Rule30Args {
    /// Number of cells in the ring [default: 1024]
    width: Option<usize>,

    /// Number of steps to record
    #[arg(default_value_t = DEFAULT_STEPS)]
    steps: usize,

    /// Worker threads (threads backend only)
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Elementary rule number
    #[arg(long, default_value_t = 30)]
    rule: u8,

    /// Require the width to divide evenly among workers
    #[arg(long)]
    exact: bool,

    #[arg(long, value_enum, default_value_t = RingBackend::Threads)]
    backend: RingBackend,

    /// Initial row from a one-row PBM file (its width becomes the ring width)
    #[arg(long)]
    init: Option<PathBuf>,

    /// Seed a random initial row instead of a single live cell
    #[arg(long, conflicts_with = "init")]
    random_seed: Option<u64>,

    /// Live-cell probability for --random-seed
    #[arg(long, default_value_t = 0.5)]
    density: f64,

    #[arg(short, long, default_value = "rule30.pbm")]
    output: PathBuf,

    /// Print run stats to stderr
    #[arg(long)]
    stats: bool,
}

#[derive(Args)]
struct AnnealArgs {
    #[arg(default_value_t = anneal::DEFAULT_STEPS)]
    steps: usize,

    #[arg(default_value_t = anneal::DEFAULT_SIDE)]
    width: usize,

    #[arg(default_value_t = anneal::DEFAULT_SIDE)]
    height: usize,

    /// Tile side for parallel evaluation (cpu backend)
    #[arg(long, default_value_t = anneal::DEFAULT_TILE)]
    tile: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long, default_value_t = anneal::DEFAULT_DENSITY)]
    density: f64,

    #[arg(long, value_enum, default_value_t = GridBackend::Cpu)]
    backend: GridBackend,

    /// Initial grid from a PBM file (its dimensions override width and height)
    #[arg(long)]
    init: Option<PathBuf>,

    #[arg(short, long, default_value = "anneal.pbm")]
    output: PathBuf,

    /// Print run stats to stderr
    #[arg(long)]
    stats: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Rule30(args) => run_rule30(&args).unwrap_or_else(|e| {
            eprintln!("rule30 error: {}", e);
            std::process::exit(1);
        }),
        Command::Anneal(args) => run_anneal(&args).unwrap_or_else(|e| {
            eprintln!("anneal error: {}", e);
            std::process::exit(1);
        }),
    }
}

/// Keep the error kind, prefix the message with the path.
fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> HalocaError + '_ {
    move |e| HalocaError::Io(std::io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))
}

fn read_bitmap(path: &Path) -> Result<parser::Bitmap> {
    let data = std::fs::read(path).map_err(io_at(path))?;
    parser::parse_pbm(&data)
}

/// Truncates `path`. Call only once the run configuration has been checked.
fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(io_at(path))?;
    Ok(BufWriter::new(file))
}

/// Everything a ring run on `workers` blocks can reject before it starts.
fn check_ring(config: &RingConfig, workers: usize) -> Result<()> {
    Partition::new(config.width, workers, config.policy)?;
    config.initial.validate(config.width)
}

fn ring_config(args: &Rule30Args) -> Result<RingConfig> {
    let (width, initial) = match (&args.init, args.random_seed) {
        (Some(path), _) => {
            let row = read_bitmap(path)?.into_row()?;
            if let Some(w) = args.width.filter(|&w| w != row.len()) {
                return Err(HalocaError::Config(format!(
                    "width {} conflicts with the {}-cell row in {}",
                    w,
                    row.len(),
                    path.display()
                )));
            }
            (row.len(), InitialCondition::Cells(row))
        }
        (None, Some(seed)) => (
            args.width.unwrap_or(DEFAULT_WIDTH),
            InitialCondition::Random {
                seed,
                density: args.density,
            },
        ),
        (None, None) => (args.width.unwrap_or(DEFAULT_WIDTH), InitialCondition::SingleCenter),
    };
    Ok(RingConfig {
        width,
        steps: args.steps,
        rule: ElementaryRule::new(args.rule),
        policy: if args.exact {
            PartitionPolicy::Exact
        } else {
            PartitionPolicy::Balanced
        },
        initial,
    })
}

fn run_rule30(args: &Rule30Args) -> Result<()> {
    let mut stats = if args.stats { Some(Stats::new()) } else { None };
    if args.workers != 1 && args.backend != RingBackend::Threads {
        return Err(HalocaError::Config(
            "--workers applies only to the threads backend".into(),
        ));
    }
    let config = ring_config(args)?;

    if args.backend == RingBackend::Mpi {
        return run_rule30_mpi(&config, &args.output, stats.as_mut());
    }

    // Nothing touches the output until the run is known to be valid.
    let gpu = match args.backend {
        RingBackend::Gpu => {
            let gpu = GpuStencil::new()?;
            gpu.check_ring(&config)?;
            Some(gpu)
        }
        _ => {
            check_ring(&config, args.workers)?;
            None
        }
    };
    let mut trace =
        PbmTraceWriter::new(create_output(&args.output)?, config.width, config.steps, PROGRAM)?;

    let start = Instant::now();
    let (last, backend, adapter) = match gpu {
        Some(gpu) => {
            let last = gpu.run_ring(&config, Some(&mut trace))?;
            (last, "gpu", Some(gpu.adapter_name().to_string()))
        }
        None => (
            driver::run_local(&config, args.workers, Some(&mut trace))?,
            "threads",
            None,
        ),
    };

    if let Some(ref mut stats) = stats {
        stats.add_phase("evaluate", start.elapsed());
        stats.backend = backend;
        stats.gpu_adapter = adapter;
        stats.workers = args.workers;
        stats.steps = config.steps;
        stats.cells_updated = (config.width * config.steps) as u64;
        if backend == "threads" {
            stats.halo_exchanges = 2 * (args.workers * config.steps) as u64;
        }
        stats.final_population = population(&last);
        stats.display();
    }
    Ok(())
}

#[cfg(feature = "distributed")]
fn run_rule30_mpi(config: &RingConfig, output: &Path, stats: Option<&mut Stats>) -> Result<()> {
    use haloca::engine::comm::{CommunicationBackend, ROOT};
    use haloca::engine::comm_mpi::MpiComm;

    let _universe = mpi::initialize()
        .ok_or_else(|| HalocaError::Comm("MPI is already initialized".into()))?;
    let comm = MpiComm::new();
    let rank = comm.rank();

    let start = Instant::now();
    let result = check_ring(config, comm.num_ranks()).and_then(|()| {
        if rank == ROOT {
            create_output(output)
                .and_then(|w| PbmTraceWriter::new(w, config.width, config.steps, PROGRAM))
                .and_then(|mut trace| driver::run_rank(&comm, config, Some(&mut trace)))
        } else {
            driver::run_rank(&comm, config, None)
        }
    });

    match result {
        Ok(last) => {
            if let (Some(stats), Some(last)) = (stats, last) {
                stats.add_phase("evaluate", start.elapsed());
                stats.backend = "mpi";
                stats.workers = comm.num_ranks();
                stats.steps = config.steps;
                stats.cells_updated = (config.width * config.steps) as u64;
                stats.halo_exchanges = 2 * (comm.num_ranks() * config.steps) as u64;
                stats.final_population = population(&last);
                stats.display();
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("rule30 error (rank {}): {}", rank, e);
            comm.abort(1)
        }
    }
}

#[cfg(not(feature = "distributed"))]
fn run_rule30_mpi(_config: &RingConfig, _output: &Path, _stats: Option<&mut Stats>) -> Result<()> {
    Err(HalocaError::Config(
        "the mpi backend requires building with the `distributed` feature".into(),
    ))
}

fn run_anneal(args: &AnnealArgs) -> Result<()> {
    let mut stats = if args.stats { Some(Stats::new()) } else { None };

    let initial = match &args.init {
        Some(path) => GridInit::Grid(read_bitmap(path)?.into_grid()?),
        None => GridInit::Random {
            seed: args.seed,
            density: args.density,
        },
    };
    let config = AnnealConfig {
        width: args.width,
        height: args.height,
        steps: args.steps,
        tile: args.tile,
        initial,
    };
    let (width, height) = config.dimensions();
    let gpu = match args.backend {
        GridBackend::Cpu => {
            config.validate()?;
            None
        }
        GridBackend::Gpu => {
            let gpu = GpuStencil::new()?;
            gpu.check_anneal(&config)?;
            Some(gpu)
        }
    };
    // Open the output before running so a bad path fails fast.
    let mut writer = create_output(&args.output)?;

    let start = Instant::now();
    let (grid, adapter) = match gpu {
        None => (anneal::run(&config)?, None),
        Some(gpu) => (gpu.run_anneal(&config)?, Some(gpu.adapter_name().to_string())),
    };
    let elapsed = start.elapsed();

    let write_start = Instant::now();
    output::write_pbm_p4(&grid, &mut writer, PROGRAM)?;

    if let Some(ref mut stats) = stats {
        stats.add_phase("evaluate", elapsed);
        stats.add_phase("write", write_start.elapsed());
        stats.backend = if adapter.is_some() { "gpu" } else { "cpu" };
        stats.gpu_adapter = adapter;
        stats.workers = rayon::current_num_threads();
        stats.steps = config.steps;
        stats.cells_updated = (width * height * config.steps) as u64;
        if args.backend == GridBackend::Cpu {
            let tiles = TileGrid::new(width, height, config.tile)?;
            stats.tiles_per_step = tiles.tiles_x() * tiles.tiles_y();
        }
        stats.final_population = grid.population();
        stats.display();
    }
    Ok(())
}
