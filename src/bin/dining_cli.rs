use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dining_table::config::HarnessConfig;
use dining_table::scenario::{table_with_plan, Scenario};
use dining_table::telemetry::{
    EventCollector, EventSink, EventSummary, NoopSink, ProtocolMonitor, ProtocolViolation,
    SinkSet, TracingSink,
};
use dining_table::{init_logging, RunBound, RunReport};
use serde::Serialize;

/// Broadcast buffer for the live event summary; overflow is counted as lag.
const SUMMARY_BUFFER: usize = 65_536;
const SUMMARY_POLL: Duration = Duration::from_millis(5);

#[derive(Parser, Debug)]
#[command(
    name = "dining_cli",
    about = "Run and judge dining philosophers experiments"
)]
struct Cli {
    /// Log level for stderr output (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value_t = tracing::Level::WARN)]
    log_level: tracing::Level,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a table for a fixed duration and print its meal report
    Run {
        /// Scenario to run instead of the configured delay plan
        #[arg(long)]
        scenario: Option<Scenario>,
        #[command(flatten)]
        table: TableArgs,
    },
    /// List the built-in scenarios
    Scenarios {
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Run one scenario and exit with code 2 when its verdict fails
    Check {
        #[arg(long)]
        scenario: Scenario,
        #[command(flatten)]
        table: TableArgs,
    },
}

#[derive(Args, Debug)]
struct TableArgs {
    /// Number of philosophers (overrides the config file)
    #[arg(long)]
    seats: Option<usize>,
    /// Run duration in milliseconds (overrides scenario and config defaults)
    #[arg(long)]
    duration_ms: Option<u64>,
    /// Harness configuration JSON
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
    /// Emit every synchronization event through tracing
    #[arg(long)]
    trace: bool,
    /// Check mutual exclusion and tally events per seat. Every event then
    /// passes through shared locks, which perturbs the meal counts.
    #[arg(long)]
    monitor: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let trace = match &cli.command {
        Commands::Run { table, .. } | Commands::Check { table, .. } => table.trace,
        Commands::Scenarios { .. } => false,
    };
    init_logging(if trace {
        tracing::Level::TRACE
    } else {
        cli.log_level
    });

    match cli.command {
        Commands::Run { scenario, table } => run_table(scenario, table),
        Commands::Scenarios { format } => run_list(format),
        Commands::Check { scenario, table } => run_check(scenario, table),
    }
}

fn run_table(scenario: Option<Scenario>, args: TableArgs) -> Result<ExitCode> {
    let format = args.format;
    let outcome = execute(scenario, args)?;
    emit_outcome(&outcome, format)?;

    if !outcome.has_violations() {
        Ok(ExitCode::from(0))
    } else {
        Ok(ExitCode::from(2))
    }
}

fn run_check(scenario: Scenario, args: TableArgs) -> Result<ExitCode> {
    let format = args.format;
    let outcome = execute(Some(scenario), args)?;
    emit_outcome(&outcome, format)?;

    let passed = outcome.verdict.as_ref().is_some_and(|verdict| verdict.passed);
    if passed && !outcome.has_violations() {
        Ok(ExitCode::from(0))
    } else {
        Ok(ExitCode::from(2))
    }
}

fn run_list(format: OutputFormat) -> Result<ExitCode> {
    let entries: Vec<ScenarioEntry> = Scenario::ALL
        .into_iter()
        .map(|scenario| ScenarioEntry {
            name: scenario.name(),
            description: scenario.description(),
            default_duration_ms: scenario.default_duration().as_millis() as u64,
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Table => {
            for entry in entries {
                println!(
                    "{:<14} {:>6}ms  {}",
                    entry.name, entry.default_duration_ms, entry.description
                );
            }
        }
    }
    Ok(ExitCode::from(0))
}

fn load_config(path: Option<&Path>) -> HarnessConfig {
    match path {
        Some(path) => HarnessConfig::load_from_file(path),
        None => HarnessConfig::default(),
    }
}

fn execute(scenario: Option<Scenario>, args: TableArgs) -> Result<RunOutcome> {
    let mut config = load_config(args.config.as_deref());
    if let Some(seats) = args.seats {
        config.table.seats = seats;
    }
    if let Some(ms) = args.duration_ms {
        config.table.run_ms = ms;
    }
    config.trace_events |= args.trace;
    config
        .validate()
        .context("validating harness configuration")?;

    let duration = match (args.duration_ms, scenario) {
        (None, Some(scenario)) if args.config.is_none() => scenario.default_duration(),
        _ => config.table.run_duration(),
    };

    let mut sinks = SinkSet::new();
    let instruments = args.monitor.then(|| Instruments {
        monitor: Arc::new(ProtocolMonitor::new()),
        collector: Arc::new(EventCollector::new(SUMMARY_BUFFER, 0)),
    });
    if let Some(instruments) = &instruments {
        sinks = sinks
            .with(instruments.monitor.clone())
            .with(instruments.collector.clone());
    }
    if config.trace_events {
        sinks = sinks.with(Arc::new(TracingSink));
    }
    let sink: Arc<dyn EventSink> = if instruments.is_none() && !config.trace_events {
        Arc::new(NoopSink)
    } else {
        Arc::new(sinks)
    };

    let table = match scenario {
        Some(scenario) => scenario.build_table(config.table.seats, sink, config.table.join_grace()),
        None => table_with_plan(
            config.table.seats,
            config.delays.clone(),
            Duration::ZERO,
            sink,
            config.table.join_grace(),
        ),
    }
    .context("building dining table")?;

    let summarizer = instruments
        .as_ref()
        .map(|instruments| spawn_summarizer(&instruments.collector))
        .transpose()?;

    let result = table.run(RunBound::For(duration));
    let events = match summarizer {
        Some((done, handle)) => {
            done.store(true, Ordering::Release);
            Some(
                handle
                    .join()
                    .map_err(|_| anyhow!("event summary thread panicked"))?,
            )
        }
        None => None,
    };
    result.with_context(|| format!("running {} seats for {:?}", config.table.seats, duration))?;

    let report = table.report().context("collecting run report")?;
    let verdict = scenario.map(|scenario| {
        let verdict = scenario.judge(&report, &config.fairness);
        VerdictPayload {
            passed: verdict.passed,
            expectation: verdict.expectation,
        }
    });

    Ok(RunOutcome {
        scenario,
        report,
        verdict,
        events,
        violations: instruments.map(|instruments| instruments.monitor.violations()),
    })
}

struct Instruments {
    monitor: Arc<ProtocolMonitor>,
    collector: Arc<EventCollector>,
}

fn spawn_summarizer(
    collector: &EventCollector,
) -> Result<(Arc<AtomicBool>, JoinHandle<EventSummary>)> {
    let mut rx = collector.subscribe();
    let done = Arc::new(AtomicBool::new(false));
    let handle = thread::Builder::new()
        .name("event-summary".to_string())
        .spawn({
            let done = Arc::clone(&done);
            move || {
                let mut summary = EventSummary::default();
                while !done.load(Ordering::Acquire) {
                    summary.drain(&mut rx);
                    thread::sleep(SUMMARY_POLL);
                }
                summary.drain(&mut rx);
                summary
            }
        })
        .context("spawning event summary thread")?;
    Ok((done, handle))
}

fn emit_outcome(outcome: &RunOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome)?),
        OutputFormat::Table => print_table(outcome),
    }
    Ok(())
}

fn print_table(outcome: &RunOutcome) {
    let report = &outcome.report;
    if let Some(scenario) = outcome.scenario {
        println!("scenario: {scenario}");
    }
    println!("seats: {}  elapsed: {}ms", report.seats, report.elapsed_ms);
    match &outcome.events {
        Some(events) => {
            println!("{:>4} {:>10} {:>10} {:>10}", "seat", "meals", "attempts", "acquired");
            for (seat, meals) in report.meals.iter().enumerate() {
                let tally = events.seats.get(&seat).cloned().unwrap_or_default();
                println!(
                    "{:>4} {:>10} {:>10} {:>10}",
                    seat, meals, tally.attempts, tally.acquisitions
                );
            }
        }
        None => {
            println!("{:>4} {:>10}", "seat", "meals");
            for (seat, meals) in report.meals.iter().enumerate() {
                println!("{:>4} {:>10}", seat, meals);
            }
        }
    }
    let ratio = report
        .fairness_ratio
        .map(|ratio| format!("{ratio:.2}"))
        .unwrap_or_else(|| "n/a".to_string());
    println!(
        "min: {}  max: {}  total: {}  ratio: {}",
        report.min_meals, report.max_meals, report.total_meals, ratio
    );
    if let Some(events) = outcome.events.as_ref().filter(|events| events.lagged_events > 0) {
        println!(
            "events: {} summarized, {} lagged",
            events.total_events, events.lagged_events
        );
    }
    if let Some(verdict) = &outcome.verdict {
        let status = if verdict.passed { "PASS" } else { "FAIL" };
        println!("verdict: {status} ({})", verdict.expectation);
    }
    for violation in outcome.violations.iter().flatten() {
        println!("violation: {violation:?}");
    }
}

#[derive(Serialize)]
struct ScenarioEntry {
    name: &'static str,
    description: &'static str,
    default_duration_ms: u64,
}

#[derive(Serialize)]
struct VerdictPayload {
    passed: bool,
    expectation: String,
}

#[derive(Serialize)]
struct RunOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<Scenario>,
    report: RunReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    verdict: Option<VerdictPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<EventSummary>,
    /// Present only for monitored runs
    #[serde(skip_serializing_if = "Option::is_none")]
    violations: Option<Vec<ProtocolViolation>>,
}

impl RunOutcome {
    fn has_violations(&self) -> bool {
        self.violations
            .as_ref()
            .is_some_and(|violations| !violations.is_empty())
    }
}
