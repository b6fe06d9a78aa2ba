use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use rebook_bot::{
    logging::{init_logging, Verbosity},
    AvailabilityEngine, CalendarDate, Config, LoopSettings, PollingLoop, PollingState,
    SessionClient,
};

#[derive(Parser)]
#[command(name = "rebook-bot", version, about = "Watches the appointment portal and rebooks earlier slots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll for earlier appointments and rebook automatically
    Bot(BotArgs),
}

#[derive(Args, Debug)]
struct BotArgs {
    /// Currently booked date
    #[arg(short, long)]
    current: CalendarDate,

    /// Stop once a booking lands on or before this date
    #[arg(short, long)]
    target: Option<CalendarDate>,

    /// Never book earlier than this date
    #[arg(short, long)]
    min: Option<CalendarDate>,

    /// Log what would be booked without submitting
    #[arg(long)]
    dry_run: bool,

    /// Log request details
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bot(args) => bot(args).await,
    }
}

async fn bot(args: BotArgs) -> anyhow::Result<()> {
    init_logging(Verbosity::from_flag(args.verbose));

    let cfg = Config::from_env().context("invalid configuration")?;
    let engine = AvailabilityEngine::new(cfg.reschedule_min_improvement_days);

    info!(current = %args.current, "Initializing with current date");
    if args.dry_run {
        info!("[DRY RUN MODE] Bot will only log what would be booked without actually booking");
    }
    if let Some(target) = args.target {
        info!(%target, "Target date");
    }
    if let Some(min) = args.min {
        info!(%min, "Minimum date");
    }
    info!(
        days = cfg.reschedule_min_improvement_days,
        "Minimum reschedule improvement"
    );
    let threshold = engine
        .threshold(args.current)
        .context("cannot compute initial threshold")?;
    info!(%threshold, "Only considering dates before threshold");

    let client = SessionClient::from_config(&cfg).context("failed to build HTTP client")?;
    let settings = LoopSettings::from_config(&cfg, args.dry_run);
    let state = PollingState::new(args.current, args.target, args.min);

    let booked = PollingLoop::new(client, engine, settings, state).run().await;
    info!(%booked, "done");

    Ok(())
}
