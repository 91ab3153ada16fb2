#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::process;

use saob::config::{AnalysisConfig, Strategy};
use saob::diagnostics::emit;
use saob::ingest::{ObservationTable, Rater, load_all_raters, load_observations};
use saob::pipeline::run_analysis_with_renderer;
use saob::render::{DotRenderer, TreeRenderer};
use saob::report::{AnalysisReport, write_coefficient_tables};

#[derive(Args)]
pub struct RunArgs {
    /// Path to the trial spreadsheet (CSV, one 'pre' and one 'post' line per study and scale)
    #[arg(value_name = "INPUT_CSV")]
    pub input: PathBuf,

    /// Analysis configuration (.toml); defaults apply when omitted
    #[arg(long, value_name = "CONFIG_TOML")]
    pub config: Option<PathBuf>,

    /// Rater to analyse (Parents or Teachers). Repeat to select several; all by default
    #[arg(long = "raters", value_name = "RATER")]
    pub raters: Vec<Rater>,

    /// Modeling strategy to run (wls, ols, lasso_cv, lasso_aic, decision_tree).
    /// Repeat to select several; overrides the configuration file
    #[arg(long = "strategy", value_name = "STRATEGY")]
    pub strategies: Vec<Strategy>,

    /// Directory receiving report.toml and the coefficient tables
    #[arg(long, value_name = "DIR", default_value = "saob_results")]
    pub output_dir: PathBuf,

    /// Write each fitted decision tree as Graphviz DOT into the output directory
    #[arg(long)]
    pub tree_dot: bool,
}

#[derive(Parser)]
#[command(
    name = "saob",
    about = "Meta-analysis of factors influencing neurofeedback trial outcomes",
    long_about = "Computes within-subject effect sizes from pre/post trial summaries, rejects \
                 outliers, and relates the effect sizes to study factors with weighted and \
                 ordinary least squares, two Lasso variants and a regression tree."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis on a spreadsheet
    #[command(about = "Run the analysis (outputs: report.toml, <rater>_<strategy>.tsv)")]
    Run(RunArgs),

    /// Write the default configuration so it can be edited
    #[command(about = "Write the default configuration (outputs: saob.toml)")]
    Config {
        /// Destination of the configuration file
        #[arg(value_name = "OUTPUT_TOML", default_value = "saob.toml")]
        output: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::Config { output }) => write_default_config(&output),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn write_default_config(output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    AnalysisConfig::default().save(output)?;
    println!("Default configuration written to {}", output.display());
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<AnalysisConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            AnalysisConfig::load(path)?
        }
        None => AnalysisConfig::default(),
    };
    if !args.strategies.is_empty() {
        config.strategies = args.strategies.iter().copied().unique().collect();
    }
    config.validate()?;
    Ok(config)
}

fn load_tables(
    args: &RunArgs,
    config: &AnalysisConfig,
) -> Result<Vec<ObservationTable>, Box<dyn std::error::Error>> {
    if args.raters.is_empty() {
        return Ok(load_all_raters(&args.input, &config.factors)?);
    }
    let mut tables = Vec::with_capacity(args.raters.len());
    for rater in Rater::ALL.into_iter().filter(|r| args.raters.contains(r)) {
        let table = load_observations(&args.input, &config.factors, rater)?;
        if table.is_empty() {
            println!("No {rater} ratings in {}; skipping.", args.input.display());
            continue;
        }
        tables.push(table);
    }
    Ok(tables)
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args)?;
    let strategies: Vec<&str> = config.strategies.iter().map(|s| s.key()).collect();
    println!("Strategies: {}", strategies.join(", "));

    let tables = load_tables(&args, &config)?;
    if tables.is_empty() {
        return Err(format!("No observations found in {}", args.input.display()).into());
    }
    std::fs::create_dir_all(&args.output_dir)?;

    let mut report = AnalysisReport::default();
    for table in &tables {
        let label = table
            .observations()
            .first()
            .map(|obs| obs.rater.label().to_lowercase())
            .unwrap_or_else(|| "all".to_string());
        println!("Loaded {} observations ({label})", table.len());

        let renderer = args
            .tree_dot
            .then(|| DotRenderer::new(args.output_dir.join(format!("{label}_tree.dot"))));
        let rater_report = run_analysis_with_renderer(
            table,
            &config,
            renderer.as_ref().map(|r| r as &dyn TreeRenderer),
        )?;

        let notes: Vec<_> = rater_report.all_diagnostics().into_iter().cloned().collect();
        emit(&notes);
        println!("{rater_report}");

        for path in write_coefficient_tables(&rater_report, &args.output_dir)? {
            println!("Coefficients written to {}", path.display());
        }
        report.raters.push(rater_report);
    }

    let report_path = args.output_dir.join("report.toml");
    report.save(&report_path)?;
    println!("Report written to {}", report_path.display());
    Ok(())
}
