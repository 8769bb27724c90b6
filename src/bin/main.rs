//! ksurf command line interface
//!
//! Reconstructs implicit surfaces from oriented xyz point clouds, evaluates
//! stored models on new points and prints kernel matrices.

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use ksurf::api::{FittedSurface, SurfaceReconstructor};
use ksurf::core::{EvaluationContext, KernelError, PointSet, Precision, Real, Result};
use ksurf::data::{write_values, XyzDataset};
use ksurf::kernel::{select_strategy, Kernel, KernelConfig, KernelKind, ProblemShape};
use ksurf::persistence::{SerializableGrid, SerializableModel};
use ksurf::solver::SolverScalar;
use log::{error, info};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "ksurf")]
#[command(about = "Implicit surface reconstruction with angular kernel ridge regression")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "ksurf contributors")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit an oriented point cloud and sample it on a grid
    Reconstruct(ReconstructArgs),
    /// Evaluate a stored model on points
    Predict(PredictArgs),
    /// Display model information
    Info(InfoArgs),
    /// Print the kernel matrix of a few points
    Kernel(KernelArgs),
}

#[derive(Args, Clone)]
struct KernelOptions {
    /// Kernel: neural-spline (ntk), arccosine or spherical-laplace
    #[arg(short, long)]
    kernel: Option<KernelKind>,

    /// Laplace scale
    #[arg(long, allow_hyphen_values = true)]
    alpha: Option<f64>,

    /// Laplace exponent
    #[arg(long)]
    gamma: Option<f64>,

    /// NTK variance
    #[arg(long)]
    variance: Option<f64>,

    /// Gaussian decay width for the spherical Laplace kernel
    #[arg(long)]
    decay: Option<f64>,
}

impl KernelOptions {
    fn apply(&self, config: &mut KernelConfig) {
        if let Some(kind) = self.kernel {
            config.kind = kind;
        }
        if let Some(alpha) = self.alpha {
            config.alpha = alpha;
        }
        if let Some(gamma) = self.gamma {
            config.gamma = gamma;
        }
        if let Some(variance) = self.variance {
            config.variance = variance;
        }
        if self.decay.is_some() {
            config.decay = self.decay;
        }
    }
}

#[derive(Args, Clone)]
struct ContextOptions {
    /// Floating point precision: float32 or float64
    #[arg(long, default_value = "float64")]
    dtype: Precision,

    /// Target the accelerator and allow precompiled device kernels
    #[arg(long)]
    accelerator: bool,

    /// Disable the symbolic formula engine
    #[arg(long)]
    no_symbolic: bool,

    /// Tile memory budget in MB
    #[arg(long)]
    memory_budget: Option<usize>,
}

impl ContextOptions {
    fn context<T: Real>(&self, debug: bool) -> EvaluationContext {
        let mut ctx = if self.accelerator {
            EvaluationContext::accelerator::<T>()
        } else {
            EvaluationContext::new::<T>()
        };
        ctx = ctx.with_symbolic_engine(!self.no_symbolic).with_debug(debug);
        if let Some(mb) = self.memory_budget {
            ctx = ctx.with_memory_budget(mb * 1024 * 1024);
        }
        ctx
    }
}

#[derive(Args, Clone)]
struct ReconstructArgs {
    /// Oriented point cloud (x y z nx ny nz per line)
    input: PathBuf,

    /// Output grid file (JSON)
    #[arg(short, long)]
    output: PathBuf,

    /// Reconstruction config file (JSON); flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    kernel: KernelOptions,

    /// Ridge penalty
    #[arg(long)]
    penalty: Option<f64>,

    /// Offset along normals for the inside and outside copies
    #[arg(long)]
    eps: Option<f64>,

    /// Voxels along the longest side of the bounding box
    #[arg(short, long)]
    grid_size: Option<usize>,

    /// Bounding box scale factor
    #[arg(long)]
    scale: Option<f64>,

    /// Normalize the cloud into the unit cube and pad the grid box by this
    /// fraction of its extent on every side (overrides --scale)
    #[arg(long)]
    padding: Option<f64>,

    /// Shuffle seed
    #[arg(long)]
    seed: Option<u64>,

    /// Number of chunks the grid is evaluated in
    #[arg(long)]
    chunks: Option<usize>,

    /// Also save the fitted model to this file
    #[arg(long)]
    save_model: Option<PathBuf>,

    /// Also save the labeled training points (x y z label) to this file
    #[arg(long)]
    save_points: Option<PathBuf>,

    #[command(flatten)]
    context: ContextOptions,
}

#[derive(Args)]
struct PredictArgs {
    /// Model file
    #[arg(short, long)]
    model: PathBuf,

    /// Points to evaluate (xyz, normals ignored)
    #[arg(long)]
    data: PathBuf,

    /// Output file (prints to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    context: ContextOptions,
}

#[derive(Args)]
struct InfoArgs {
    /// Model file
    model: PathBuf,
}

#[derive(Args)]
struct KernelArgs {
    #[command(flatten)]
    kernel: KernelOptions,

    /// Points file (xyz); a few points on the unit sphere when omitted
    #[arg(long)]
    data: Option<PathBuf>,

    /// Append the homogeneous bias coordinate
    #[arg(long)]
    bias: bool,

    #[command(flatten)]
    context: ContextOptions,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let debug = cli.debug;
    let result = match cli.command {
        Commands::Reconstruct(args) => match args.context.dtype {
            Precision::Single => reconstruct_command::<f32>(args, debug),
            Precision::Double => reconstruct_command::<f64>(args, debug),
        },
        Commands::Predict(args) => match args.context.dtype {
            Precision::Single => predict_command::<f32>(args, debug),
            Precision::Double => predict_command::<f64>(args, debug),
        },
        Commands::Info(args) => info_command(args),
        Commands::Kernel(args) => match args.context.dtype {
            Precision::Single => kernel_command::<f32>(args, debug),
            Precision::Double => kernel_command::<f64>(args, debug),
        },
    };

    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn reconstructor(args: &ReconstructArgs) -> Result<SurfaceReconstructor> {
    let base = match &args.config {
        Some(path) => {
            info!("Loading config from: {path:?}");
            SurfaceReconstructor::from_config_file(path)?
        }
        None => SurfaceReconstructor::new(),
    };
    let mut config = base.config().clone();
    args.kernel.apply(&mut config.kernel);
    if let Some(penalty) = args.penalty {
        config.penalty = penalty;
    }
    if let Some(eps) = args.eps {
        config.eps = eps;
    }
    if let Some(grid_size) = args.grid_size {
        config.grid_size = grid_size;
    }
    if let Some(scale) = args.scale {
        config.scale = scale;
    }
    if args.padding.is_some() {
        config.padding = args.padding;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(chunks) = args.chunks {
        config.chunks = chunks;
    }
    Ok(SurfaceReconstructor::from_config(config))
}

fn reconstruct_command<T: SolverScalar>(args: ReconstructArgs, debug: bool) -> Result<()> {
    let reconstructor = reconstructor(&args)?.with_context(args.context.context::<T>(debug));
    info!("Reconstructing {:?} in {}", args.input, T::PRECISION);

    let dataset = XyzDataset::from_file(&args.input)?;
    info!("Loaded {} points", dataset.len());
    let cloud = dataset.into_oriented()?.cast::<T>();

    let set = reconstructor.prepare(&cloud)?;
    if let Some(path) = &args.save_points {
        set.write_points(BufWriter::new(File::create(path)?))?;
        info!("Training points saved to: {path:?}");
    }

    let surface = reconstructor.fit_training_set(set)?;
    let config = reconstructor.config();
    let grid = surface.sample(config.grid_size, config.chunks)?;
    SerializableGrid::from_grid(&grid).save_to_file(&args.output)?;
    info!("Grid saved to: {:?}", args.output);

    if let Some((lo, hi)) = grid.range() {
        info!("Implicit function range: [{lo}, {hi}]");
    }

    if let Some(path) = &args.save_model {
        surface.to_model()?.save_to_file(path)?;
        info!("Model saved to: {path:?}");
    }
    Ok(())
}

fn predict_command<T: SolverScalar>(args: PredictArgs, debug: bool) -> Result<()> {
    info!("Loading model from: {:?}", args.model);
    let model = SerializableModel::load_from_file(&args.model)?;
    let surface = FittedSurface::<T>::from_model(&model, args.context.context::<T>(debug))?;

    let points = XyzDataset::from_file(&args.data)?.into_points();
    info!("Evaluating {} points", points.len());
    let values: Vec<f64> = surface
        .predict(&points.cast::<T>())?
        .into_iter()
        .map(Real::into_f64)
        .collect();

    match args.output {
        Some(path) => {
            let file = File::create(&path)?;
            write_values(BufWriter::new(file), &points, &values)?;
            info!("Predictions saved to: {path:?}");
        }
        None => write_values(io::stdout().lock(), &points, &values)?,
    }
    Ok(())
}

fn info_command(args: InfoArgs) -> Result<()> {
    info!("Loading model from: {:?}", args.model);
    let model = SerializableModel::load_from_file(&args.model)?;
    model.print_summary();

    println!("\nCoefficients:");
    let n_show = model.alpha.len().min(10);
    for (i, alpha) in model.alpha.iter().enumerate().take(n_show) {
        println!("  α{i}: {alpha:.6}");
    }
    if model.alpha.len() > n_show {
        println!("  ... ({} more)", model.alpha.len() - n_show);
    }
    Ok(())
}

fn kernel_command<T: Real>(args: KernelArgs, debug: bool) -> Result<()> {
    let mut config = KernelConfig::default();
    args.kernel.apply(&mut config);
    let kernel = config.build()?;

    let points = match &args.data {
        Some(path) => XyzDataset::from_file(path)?.into_points(),
        None => PointSet::from_rows(&[
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.6, 0.8, 0.0],
        ])?,
    };
    let points = if args.bias { points.with_bias() } else { points };
    let points = points.cast::<T>();
    if points.len() > 32 {
        return Err(KernelError::InvalidParameter(format!(
            "refusing to print a {0}x{0} matrix, use at most 32 points",
            points.len()
        )));
    }

    let ctx = args.context.context::<T>(debug);
    let shape = ProblemShape {
        rows: points.len(),
        cols: points.len(),
        dim: points.dim(),
    };
    println!("Kernel: {kernel}");
    println!(
        "Strategy: {:?}",
        select_strategy(&kernel.capabilities(), &shape, &ctx)
    );

    let block = kernel.compute_block(points.view(), points.view())?;
    for i in 0..block.rows() {
        let row: Vec<String> = block.row(i).iter().map(|v| format!("{:10.6}", v.into_f64())).collect();
        println!("{}", row.join(" "));
    }
    Ok(())
}
