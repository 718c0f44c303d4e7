use std::path::PathBuf;
use std::time::Instant;

use burn::backend::{Autodiff, NdArray};
use clap::Parser;

use taenite::{
    datatypes::{MaterialModel, OptimizationConfig, ProblemPreset},
    mesher,
    post_processor::{self, DensitySeriesWriter},
    solver::FeModel,
    trainer,
};

type Backend = Autodiff<NdArray<f32>>;

/// Topology optimization of a 2D beam with a density network.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Load case to optimize
    #[arg(long, value_enum, default_value = "fixed-beam")]
    problem: ProblemPreset,

    /// Mesh cells along x
    #[arg(long, default_value_t = 180)]
    nelx: usize,

    /// Mesh cells along y
    #[arg(long, default_value_t = 60)]
    nely: usize,

    /// Target fraction of the design domain to fill
    #[arg(long, default_value_t = 0.3)]
    volume_ratio: f64,

    /// Density penalization exponent
    #[arg(long, default_value_t = 3.0)]
    penal: f64,

    /// Adam learning rate
    #[arg(long, default_value_t = 0.01)]
    learning_rate: f64,

    /// Hidden layers in the density network
    #[arg(long, default_value_t = 5)]
    layers: usize,

    /// Neurons per hidden layer
    #[arg(long, default_value_t = 20)]
    neurons: usize,

    /// Gradient-norm clipping threshold
    #[arg(long, default_value_t = 0.1)]
    clip_threshold: f64,

    /// Epochs to run before early stopping may trigger
    #[arg(long, default_value_t = 20)]
    min_epochs: usize,

    /// Epoch count ceiling, including the uniform epoch 0
    #[arg(long, default_value_t = 500)]
    max_epochs: usize,

    /// Per-epoch increment of the volume-penalty weight
    #[arg(long, default_value_t = 0.05)]
    alpha_increment: f64,

    /// Grey-element fraction under which the design counts as converged
    #[arg(long, default_value_t = 0.01)]
    grey_threshold: f64,

    /// Epochs between progress lines
    #[arg(long, default_value_t = 1)]
    log_interval: usize,

    /// Root directory for run artifacts
    #[arg(long, default_value = "output")]
    output: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let config = OptimizationConfig {
        problem: cli.problem,
        nelx: cli.nelx,
        nely: cli.nely,
        volume_ratio: cli.volume_ratio,
        penal: cli.penal,
        learning_rate: cli.learning_rate,
        layers: cli.layers,
        neurons: cli.neurons,
        clip_threshold: cli.clip_threshold,
        min_epochs: cli.min_epochs,
        max_epochs: cli.max_epochs,
        alpha_increment: cli.alpha_increment,
        grey_threshold: cli.grey_threshold,
        log_interval: cli.log_interval,
        material: MaterialModel::default(),
        output_root: cli.output,
    };
    config.validate().unwrap();

    let start = Instant::now();

    let mesh = mesher::run(&config).unwrap();
    let fe_model = FeModel::new(&mesh, &config.material).unwrap();

    let run_directory =
        post_processor::create_run_directory(&config.output_root, config.problem.name()).unwrap();
    let mut series = DensitySeriesWriter::new(&run_directory, &mesh);

    let device = Default::default();
    let outcome = trainer::run::<Backend>(&config, &mesh, &fe_model, &mut series, &device).unwrap();

    series.finalize().unwrap();
    post_processor::csv_output(&outcome.records, &run_directory).unwrap();

    let elapsed = post_processor::format_elapsed(start.elapsed().as_secs());
    post_processor::write_metadata(&config, &outcome, &elapsed, &run_directory).unwrap();

    println!("info: finished in {elapsed}");
}
