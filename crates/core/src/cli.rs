use aether_shared::{BotDiscovery, StrategyAnalyzer};
use clap::{Parser, Subcommand};
use comfy_table::{presets::NOTHING, ContentArrangement, Table};
use tracing::info;

use crate::collaborators::{MockAnalyzer, MockBotHunter};
use crate::config::AppConfig;
use crate::evolution::{EvolutionEngine, EvolutionOutcome, FitnessConfig, FitnessEvaluator, ParameterSpace};
use crate::shutdown::CancellationFlag;
use crate::RunOptions;

#[derive(Parser)]
#[command(
    name = "aether",
    version = env!("CARGO_PKG_VERSION"),
    about = "AETHER - supervised strategy evolution pipeline"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the Discover → Analyze → Evolve → Gate pipeline
    Run {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
        /// Keep all entities in memory instead of DATABASE_URL
        #[arg(long)]
        in_memory: bool,
    },
    /// Run the evolution engine once over mock metrics
    Evolve {
        /// Override EVOLUTION_SEED
        #[arg(long)]
        seed: Option<u64>,
        /// Override MAX_GENERATIONS
        #[arg(long)]
        generations: Option<u64>,
        /// Override POPULATION_SIZE
        #[arg(long)]
        population: Option<usize>,
        /// Print only the best candidate as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print version information
    Version,
}

pub async fn dispatch(cmd: Commands, cancel: CancellationFlag) -> anyhow::Result<()> {
    match cmd {
        Commands::Run { cycles, in_memory } => {
            let config = AppConfig::load()?;
            crate::run_pipeline(config, RunOptions { cycles, in_memory }, cancel).await
        }
        Commands::Evolve {
            seed,
            generations,
            population,
            json,
        } => evolve_command(seed, generations, population, json, &cancel).await,
        Commands::Version => {
            println!("AETHER v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn evolve_command(
    seed: Option<u64>,
    generations: Option<u64>,
    population: Option<usize>,
    json: bool,
    cancel: &CancellationFlag,
) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let mut params = config.evolution.clone();
    if let Some(seed) = seed {
        params.seed = seed;
    }
    if let Some(generations) = generations {
        params.max_generations = generations;
    }
    if let Some(population) = population {
        params.population_size = population;
    }

    let hunter = MockBotHunter::new(params.seed);
    let mut metrics = Vec::new();
    for chain in &config.supervisor.chains {
        for bot in hunter.discover(chain, config.supervisor.scan_window).await? {
            metrics.extend(MockAnalyzer.analyze(&bot).await?.into_metrics());
        }
    }
    info!(observations = metrics.len(), "🧪 Evolving over mock metrics");

    let mut engine = EvolutionEngine::new(
        params,
        ParameterSpace::default(),
        FitnessEvaluator::new(FitnessConfig::default()),
    )?;
    let outcome = engine.run(&metrics, cancel, |_| {})?;

    if !json {
        print_summary_table(&outcome);
    }
    let best = serde_json::to_string_pretty(&outcome.best_ever)?;
    println!("{best}");
    Ok(())
}

fn print_summary_table(outcome: &EvolutionOutcome) {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["GEN", "BEST", "BEST EVER", "MEAN", "STAGNANT"]);
    for s in &outcome.summaries {
        table.add_row(vec![
            s.generation.to_string(),
            format!("{:.4}", s.best_fitness),
            format!("{:.4}", s.best_ever_fitness),
            format!("{:.4}", s.mean_fitness),
            s.stagnant_generations.to_string(),
        ]);
    }
    println!("{table}");
    println!(
        "  stopped: {} after {} generations (now at generation {})",
        outcome.reason, outcome.generations_run, outcome.final_generation
    );
}
