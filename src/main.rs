//! Daylight optimizer CLI - Run a design optimization from a JSON run file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use daylight_optimizer::{
    compute::{
        analysis::{ResultAnalyzer, suggest_ranges},
        evolution::{
            CancelToken, CheckpointStore, FitnessCache, GeneticAlgorithm, Nsga2Optimizer,
            OptimizerError,
        },
        pipeline::{LocalResultReader, ParameterFileWriter, ProcessRunner, SimulationPipeline},
    },
    schema::{
        Individual, Objective, OptimizerConfig, OptimizerState, ParamVector, SearchAlgorithm,
        SimulationConfig,
    },
};

const CACHE_FILE: &str = "cache.json";

/// Everything one optimization run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunConfig {
    optimizer: OptimizerConfig,
    simulation: SimulationConfig,
    /// Directory for checkpoints and the fitness cache.
    #[serde(default = "default_checkpoint_dir")]
    checkpoint_dir: PathBuf,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

type Pipeline = SimulationPipeline<ParameterFileWriter, ProcessRunner, LocalResultReader>;

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_config();
        return;
    }

    if args.len() < 2 {
        eprintln!("Usage: {} <run.json> [--resume]", args[0]);
        eprintln!();
        eprintln!("Optimize a parametric shading design against a daylight simulation.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  run.json  Path to run configuration file");
        eprintln!("  --resume  Continue from the latest checkpoint and cached results");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    let run_path = PathBuf::from(&args[1]);
    let resume = args[2..].iter().any(|a| a == "--resume");

    let run_str = fs::read_to_string(&run_path).unwrap_or_else(|e| {
        eprintln!("Error reading run file: {}", e);
        std::process::exit(1);
    });
    let run: RunConfig = serde_json::from_str(&run_str).unwrap_or_else(|e| {
        eprintln!("Error parsing run file: {}", e);
        std::process::exit(1);
    });

    let store = CheckpointStore::new(&run.checkpoint_dir).unwrap_or_else(|e| {
        eprintln!("Error creating checkpoint directory: {}", e);
        std::process::exit(1);
    });
    let cache_path = run.checkpoint_dir.join(CACHE_FILE);

    let (cache, state) = if resume {
        load_session(&store, &cache_path)
    } else {
        (FitnessCache::new(), None)
    };

    let config = &run.optimizer;
    println!("Daylight Optimizer");
    println!("==================");
    println!("Project: {}", run.simulation.project_name);
    println!(
        "Parameters: {}",
        config
            .parameters
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "Objectives: {}",
        config
            .objectives
            .iter()
            .map(|o| format!("{:?} {}", o.goal, o.id))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "Population: {} x {} generations, {} concurrent",
        config.population.size,
        config.population.max_generations,
        config.evaluation.concurrency()
    );
    if let Some(state) = &state {
        println!("Resuming after generation {}", state.current_generation);
    }
    println!();

    let pipeline = SimulationPipeline::local(run.simulation.clone());
    let start = Instant::now();

    let cache = match &config.algorithm {
        SearchAlgorithm::GeneticAlgorithm(_) => {
            run_genetic(config, &pipeline, &store, &cache_path, cache, state).await
        }
        SearchAlgorithm::Nsga2(_) => {
            run_nsga2(config, &pipeline, store, &cache_path, cache, state).await
        }
    };

    report_analysis(config, &cache);
    println!();
    println!("Time: {:.1}s", start.elapsed().as_secs_f32());
}

async fn run_genetic(
    config: &OptimizerConfig,
    pipeline: &Pipeline,
    store: &CheckpointStore,
    cache_path: &Path,
    cache: FitnessCache,
    state: Option<OptimizerState>,
) -> FitnessCache {
    let mut engine = GeneticAlgorithm::new(config.clone())
        .unwrap_or_else(|e| {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        })
        .with_cache(cache);
    if let Some(state) = state {
        engine.load_state(state);
    }
    watch_ctrl_c(engine.cancel_handle());

    let result = engine
        .run(pipeline, |p| {
            println!(
                "  Generation {}/{}: best={:.3}, avg={:.3}, stagnant={}, evaluations={}, failures={}",
                p.generation,
                p.total_generations,
                p.best_fitness,
                p.avg_fitness,
                p.stagnation_count,
                p.stats.evaluations,
                p.stats.failures
            );
        })
        .await;

    // The single-objective search keeps no checkpoint store of its own.
    if let Err(e) = store.save(&engine.get_state()) {
        warn!("Failed to write checkpoint: {}", e);
    }
    save_cache(engine.cache(), cache_path);
    let result = result.unwrap_or_else(|e| exit_on_error(e));

    println!();
    println!(
        "Stopped: {:?} after {} generations",
        result.stats.stop_reason, result.stats.generations
    );
    match &result.best {
        Some(best) => {
            println!("Best design:");
            print_individual(best, &config.objectives);
        }
        None => println!("No design evaluated successfully"),
    }
    print_failures(result.stats.evaluations.failures, result.stats.evaluations.evaluations);

    engine.cache().clone()
}

async fn run_nsga2(
    config: &OptimizerConfig,
    pipeline: &Pipeline,
    store: CheckpointStore,
    cache_path: &Path,
    cache: FitnessCache,
    state: Option<OptimizerState>,
) -> FitnessCache {
    let mut engine = Nsga2Optimizer::new(config.clone())
        .unwrap_or_else(|e| {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        })
        .with_cache(cache)
        .with_checkpoints(store);
    if let Some(state) = state {
        engine.load_state(state);
    }
    watch_ctrl_c(engine.cancel_handle());

    let result = engine
        .run(pipeline, |p| {
            println!(
                "  Generation {}/{}: front={}, evaluations={}, cache hits={}, failures={}",
                p.generation,
                p.total_generations,
                p.front.len(),
                p.stats.evaluations,
                p.stats.cache_hits,
                p.stats.failures
            );
        })
        .await;

    save_cache(engine.cache(), cache_path);
    let result = result.unwrap_or_else(|e| exit_on_error(e));

    println!();
    println!("Pareto front ({} designs):", result.front.len());
    for (i, individual) in result.front.iter().enumerate() {
        println!("  #{}", i + 1);
        print_individual(individual, &config.objectives);
    }
    print_failures(result.stats.evaluations.failures, result.stats.evaluations.evaluations);

    engine.cache().clone()
}

fn load_session(store: &CheckpointStore, cache_path: &Path) -> (FitnessCache, Option<OptimizerState>) {
    let cache = if cache_path.exists() {
        FitnessCache::load_json(cache_path).unwrap_or_else(|e| {
            warn!("Ignoring unreadable cache {}: {}", cache_path.display(), e);
            FitnessCache::new()
        })
    } else {
        FitnessCache::new()
    };
    info!("Loaded {} cached evaluations", cache.len());

    let state = store.load_latest().unwrap_or_else(|e| {
        eprintln!("Error loading checkpoint: {}", e);
        std::process::exit(1);
    });
    if state.is_none() {
        warn!("No checkpoint found in {}, starting fresh", store.dir().display());
    }
    (cache, state)
}

/// Request cooperative cancellation on Ctrl-C.
fn watch_ctrl_c(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, stopping after in-flight evaluations...");
            cancel.cancel();
        }
    });
}

fn save_cache(cache: &FitnessCache, path: &Path) {
    match cache.save_json(path) {
        Ok(()) => info!("Saved {} cached evaluations to {}", cache.len(), path.display()),
        Err(e) => warn!("Failed to save cache to {}: {}", path.display(), e),
    }
}

fn exit_on_error(error: OptimizerError) -> ! {
    match error {
        OptimizerError::Cancelled => {
            eprintln!("Optimization cancelled. Continue with --resume.");
            std::process::exit(130);
        }
        OptimizerError::Config(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn format_params(params: &ParamVector) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_individual(individual: &Individual, objectives: &[Objective]) {
    println!("    Parameters: {}", format_params(&individual.params));
    for objective in objectives {
        match individual.metric(&objective.id) {
            Some(value) => println!(
                "    {}: {:.3}{}",
                objective.id,
                value,
                objective.unit.as_deref().unwrap_or("")
            ),
            None => println!("    {}: n/a", objective.id),
        }
    }
}

fn print_failures(failures: u64, evaluations: u64) {
    if failures > 0 {
        println!("Failed evaluations: {} of {}", failures, evaluations);
    }
}

fn report_analysis(config: &OptimizerConfig, cache: &FitnessCache) {
    let Some(primary) = config.objectives.first() else {
        return;
    };

    let ranges = suggest_ranges(cache, &config.parameters, primary.goal);
    if !ranges.is_empty() {
        println!();
        println!("Suggested ranges ({}):", primary.id);
        for range in &ranges {
            println!(
                "  {}: [{:.3}, {:.3}] from {} samples, best {:.3}{} at {:.3}",
                range.parameter,
                range.suggested_min,
                range.suggested_max,
                range.samples,
                range.best_solution.metric_value,
                range.best_solution.unit.as_deref().unwrap_or(""),
                range.best_solution.value
            );
        }
    }

    let analyzer = ResultAnalyzer::from_cache(cache);
    let sensitivity = analyzer.sensitivity();
    if !sensitivity.is_empty() {
        println!();
        println!("Sensitivity ({} evaluated designs):", analyzer.len());
        for s in &sensitivity {
            let correlation = s
                .correlation
                .map_or_else(|| "-".to_string(), |r| format!("{:+.2}", r));
            println!(
                "  {} -> {}: {} (r={}, n={})",
                s.parameter, s.metric, s.trend, correlation, s.samples
            );
        }
    }
}

fn print_example_config() {
    let run = RunConfig {
        optimizer: OptimizerConfig::default(),
        simulation: SimulationConfig::default(),
        checkpoint_dir: default_checkpoint_dir(),
    };
    match serde_json::to_string_pretty(&run) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing example: {}", e),
    }
}
