//! meal-recipes - Extract, check and repair meal recipes from plan PDFs
//!
//! The meal records live in a JSON store; recipes are read from the plan
//! documents under a root folder (`PHASE 1/`, `Month 8/`, ...).

use clap::{ArgAction, Parser, Subcommand};
use mealplan_recipes::format::parse_for_display;
use mealplan_recipes::pipeline::{discover_documents, inspect_page, PageView};
use mealplan_recipes::{
    ExtractError, Extractor, Grammar, JsonFileStore, Locator, MealFilter, MealStore, PdfSource,
    PipelineConfig, Repairer, RunSummary,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "meal-recipes")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file holding the meal records
    #[arg(short, long, global = true, default_value = "meals.json")]
    store: PathBuf,

    /// Pipeline configuration (JSON); built-in profiles when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fill in missing recipes from the plan documents
    Extract {
        /// Folder holding one sub-folder per phase
        root: PathBuf,
        /// Only documents of this phase
        #[arg(long)]
        phase: Option<String>,
        /// Print the run summary as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// List recipes that hold more than one meal
    Scan {
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        week: Option<u32>,
    },
    /// Re-extract merged recipes (dry run unless --apply)
    Repair {
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        week: Option<u32>,
        #[arg(long)]
        page: Option<u32>,
        /// Write repaired recipes to the store
        #[arg(long, action = ArgAction::SetTrue)]
        apply: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Show the reconstructed lines or regions of one page
    Inspect {
        pdf: PathBuf,
        /// Page number (1-indexed)
        #[arg(short, long)]
        page: u32,
        /// Profile name; defaults to the whole-page profile
        #[arg(long)]
        profile: Option<String>,
    },
    /// Print a meal's recipe in display form
    Show {
        id: u64,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, ExtractError> {
    let config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };

    match args.command {
        Command::Extract { root, phase, json } => {
            let store = JsonFileStore::open(&args.store)?;
            let mut jobs = discover_documents(&root)?;
            if let Some(phase) = &phase {
                jobs.retain(|job| &job.phase_id == phase);
            }
            println!("Found {} documents under {}", jobs.len(), root.display());

            let start = Instant::now();
            let extractor = Extractor::new(&store, config)?;
            let summary = extractor.run(&jobs);
            print_summary(&summary, json, start)?;
            Ok(exit_code(&summary))
        }
        Command::Scan { phase, week } => {
            let store = JsonFileStore::open(&args.store)?;
            let repairer = build_repairer(&store, &config)?;
            let reports = repairer.scan(&make_filter(phase, week, None))?;
            for report in &reports {
                println!(
                    "#{} {:?} ({}, {} chars): names {:?}, nutrition lines {}, servings tokens {}",
                    report.meal_id,
                    report.name,
                    report.group,
                    report.chars,
                    report.signals.other_names,
                    report.signals.nutrition_lines,
                    report.signals.servings_tokens
                );
            }
            println!("{} merged recipes", reports.len());
            Ok(ExitCode::SUCCESS)
        }
        Command::Repair {
            phase,
            week,
            page,
            apply,
            json,
        } => {
            let store = JsonFileStore::open(&args.store)?;
            let repairer = build_repairer(&store, &config)?.apply(apply);
            if !apply {
                println!("Dry run: pass --apply to write repaired recipes");
            }
            let start = Instant::now();
            let summary = repairer.run(&make_filter(phase, week, page))?;
            print_summary(&summary, json, start)?;
            Ok(exit_code(&summary))
        }
        Command::Inspect { pdf, page, profile } => {
            let name = profile.unwrap_or_else(|| config.default_profile.clone());
            let profile = config
                .profiles
                .get(&name)
                .ok_or_else(|| ExtractError::Config(format!("unknown profile {:?}", name)))?;
            let source = PdfSource::open(&pdf)?;

            match inspect_page(&source, page, profile)? {
                PageView::Lines(lines) => {
                    for line in lines {
                        println!("{:>7.1}  {}", line.y, line.text());
                    }
                }
                PageView::Regions(partition) => {
                    for region in &partition.regions {
                        println!("=== {} ({} fragments) ===", region.label, region.fragment_count);
                        println!("{}", region.text());
                        println!();
                    }
                    println!(
                        "{} fragments outside all regions ({:.0}%)",
                        partition.dropped,
                        partition.dropped_ratio() * 100.0
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { id, json } => {
            let store = JsonFileStore::open(&args.store)?;
            let meal = store
                .find(&MealFilter::new())?
                .into_iter()
                .find(|m| m.id == id)
                .ok_or(mealplan_recipes::StoreError::NotFound(id))?;
            let Some(text) = meal.recipe_text.as_deref() else {
                println!("{} has no recipe", meal.name);
                return Ok(ExitCode::SUCCESS);
            };

            match parse_for_display(text, &meal.name) {
                Some(recipe) if json => {
                    let out = serde_json::to_string_pretty(&recipe)
                        .map_err(|e| ExtractError::Parse(e.to_string()))?;
                    println!("{}", out);
                }
                Some(recipe) => {
                    println!("{}", recipe.title);
                    println!("{}", recipe.servings);
                    if let Some(info) = &recipe.nutritional_info {
                        println!("Nutrition: {}", info);
                    }
                    println!();
                    for ingredient in &recipe.ingredients {
                        println!("  - {}", ingredient);
                    }
                    println!();
                    for (i, step) in recipe.instructions.iter().enumerate() {
                        println!("  {}. {}", i + 1, step);
                    }
                }
                None => println!("{}", text),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_repairer<'s>(
    store: &'s dyn MealStore,
    config: &PipelineConfig,
) -> Result<Repairer<'s>, ExtractError> {
    Ok(Repairer::new(store)
        .with_config(config.repair.clone())
        .with_locator(Locator::new(config.locator.clone())?)
        .with_grammar(Grammar::new(&config.vocabulary)?))
}

fn make_filter(phase: Option<String>, week: Option<u32>, page: Option<u32>) -> MealFilter {
    let mut filter = MealFilter::new();
    if let Some(phase) = &phase {
        filter = filter.phase(phase);
    }
    if let Some(week) = week {
        filter = filter.week(week);
    }
    if let Some(page) = page {
        filter = filter.page(page);
    }
    filter
}

fn print_summary(summary: &RunSummary, json: bool, start: Instant) -> Result<(), ExtractError> {
    if json {
        let out = serde_json::to_string_pretty(summary)
            .map_err(|e| ExtractError::Parse(e.to_string()))?;
        println!("{}", out);
        return Ok(());
    }

    println!();
    println!("Summary");
    println!("=======");
    println!("Extracted:     {}", summary.extracted);
    println!("Repaired:      {}", summary.repaired);
    println!("Already clean: {}", summary.already_clean);
    println!("Skipped:       {}", summary.skipped);
    println!("Failed:        {}", summary.failed);
    if summary.documents_failed > 0 {
        println!("Unreadable documents: {}", summary.documents_failed);
    }
    println!("Time: {}ms", start.elapsed().as_millis());

    if !summary.failures.is_empty() {
        println!();
        println!("First problems:");
        for failure in &summary.failures {
            println!("  {}", failure);
        }
    }
    Ok(())
}

fn exit_code(summary: &RunSummary) -> ExitCode {
    if summary.failed > 0 || summary.documents_failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
