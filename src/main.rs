use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use streakbot::api::ApiError;
use streakbot::backfill::{CandleAgent, ConsistencyReport};
use streakbot::db::{PositionStore, PostgresPersistence};
use streakbot::execution::{CycleOutcome, CycleRunner, OpenCheck};
use streakbot::settings::{Settings, DEFAULT_CONFIG_PATH};
use streakbot::TradingClient;
use tokio::time::{interval_at, Duration, Instant};

/// Delay after a bar boundary before the cycle runs, so the closed bar is published
const BOUNDARY_OFFSET_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "streakbot")]
#[command(about = "Candle streak trader for USDT-margined futures", long_about = None)]
struct Cli {
    /// Settings file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a cycle every poll interval until Ctrl+C
    Run,
    /// Run a single cycle and exit
    Cycle,
    /// Seed an empty series, or extend a stored one further into the past
    Backfill {
        /// Days of history (defaults to the configured seed_days)
        #[arg(long)]
        days: Option<i64>,
        /// Extra hours on top of the days
        #[arg(long, default_value_t = 0)]
        hours: i64,
    },
    /// Fetch candles newer than the newest stored one
    Sync,
    /// Report the first gap in the stored series
    CheckConsistency,
    /// Create the position-state row from the configured credentials
    InitPosition,
    /// Show the state and fill of the tracked stop-loss order
    OrderStatus,
}

type Store = PostgresPersistence;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)?;

    let store = Arc::new(lift(PostgresPersistence::new(&settings.database_url).await)?);

    match cli.command {
        Commands::Run => run(&settings, store).await,
        Commands::Cycle => {
            let runner = build_runner(&settings, store).await?;
            lift(runner.agent().seed(settings.market.seed_days, settings.market.page_limit).await)?;
            let outcome = lift(runner.run_cycle().await)?;
            log_outcome(&outcome);
            Ok(())
        }
        Commands::Backfill { days, hours } => {
            let agent = build_agent(&settings, store).await?;
            backfill(&agent, days.unwrap_or(settings.market.seed_days), hours, settings.market.page_limit).await
        }
        Commands::Sync => {
            let agent = build_agent(&settings, store).await?;
            let inserted = lift(agent.sync(settings.market.page_limit).await)?;
            tracing::info!("Sync complete: {} new candles", inserted);
            Ok(())
        }
        Commands::CheckConsistency => {
            let agent = build_agent(&settings, store).await?;
            match lift(agent.check_candles_consistency().await)? {
                ConsistencyReport::Consistent { .. } => Ok(()),
                ConsistencyReport::Gap {
                    previous_open_time,
                    next_open_time,
                } => Err(anyhow::anyhow!(
                    "Gap between {} and {}",
                    previous_open_time,
                    next_open_time
                )),
            }
        }
        Commands::InitPosition => init_position(&settings, &store).await,
        Commands::OrderStatus => order_status(&settings, &store).await,
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("streakbot=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Library calls return boxed errors; anyhow wants a concrete one
fn lift<T>(result: streakbot::Result<T>) -> anyhow::Result<T> {
    result.map_err(|e| anyhow::anyhow!(e))
}

async fn build_agent(settings: &Settings, store: Arc<Store>) -> anyhow::Result<CandleAgent<Store>> {
    let client = settings.market_client()?;
    lift(CandleAgent::new(client, store).await)
}

async fn build_runner(settings: &Settings, store: Arc<Store>) -> anyhow::Result<CycleRunner<Store>> {
    let agent = build_agent(settings, store.clone()).await?;
    Ok(CycleRunner::new(agent, store, settings.cycle_config()))
}

/// When the next `period`-aligned boundary (plus offset) will occur
fn next_boundary(period: Duration) -> Instant {
    let period_secs = period.as_secs().max(1);
    let now_secs = Utc::now().timestamp().max(0) as u64;
    let until_next = period_secs - (now_secs % period_secs);

    Instant::now() + Duration::from_secs(until_next + BOUNDARY_OFFSET_SECS)
}

// ============================================================================
// Commands
// ============================================================================

async fn run(settings: &Settings, store: Arc<Store>) -> anyhow::Result<()> {
    let runner = build_runner(settings, store).await?;
    lift(runner.agent().seed(settings.market.seed_days, settings.market.page_limit).await)?;

    let period = settings.poll_interval().max(Duration::from_secs(1));
    let mut ticker = interval_at(next_boundary(period), period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        "🚀 streakbot running: {} {} candles, cycle every {}s",
        settings.market.symbol,
        settings.market.interval,
        period.as_secs()
    );
    tracing::info!("Press Ctrl+C to stop...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = ticker.tick() => {
                tracing::info!("💹 [CYCLE] Tick at {}", Utc::now().format("%H:%M:%S"));
                match runner.run_cycle().await {
                    Ok(outcome) => log_outcome(&outcome),
                    Err(e) => tracing::error!("Cycle failed: {}", e),
                }
            }
        }
    }

    tracing::info!("👋 streakbot stopped");
    Ok(())
}

async fn backfill(
    agent: &CandleAgent<Store>,
    days: i64,
    hours: i64,
    limit: usize,
) -> anyhow::Result<()> {
    let seeded = lift(agent.seed(days, limit).await)?;
    if seeded > 0 {
        tracing::info!("Seeded {} candles", seeded);
        return Ok(());
    }

    let candles = lift(agent.fetch_past_candles(days, hours, limit).await)?;
    let inserted = lift(agent.save_to_db(&candles).await)?;
    tracing::info!("Backfill complete: {} new candles", inserted);
    Ok(())
}

async fn init_position(settings: &Settings, store: &Store) -> anyhow::Result<()> {
    let credentials = settings
        .credentials
        .clone()
        .ok_or_else(|| anyhow::anyhow!("No [credentials] configured"))?;

    match lift(store.load_position_state().await)? {
        Some(mut state) => {
            state.credentials = credentials;
            lift(store.save_position_state(&state).await)?;
            tracing::info!("Updated credentials on position state {}", state.id);
        }
        None => {
            let state = lift(store.create_position_state(&credentials).await)?;
            tracing::info!("Created position state {} ({:?})", state.id, state.credentials);
        }
    }

    Ok(())
}

async fn order_status(settings: &Settings, store: &Store) -> anyhow::Result<()> {
    let state = lift(store.load_position_state().await)?
        .ok_or_else(|| anyhow::anyhow!("No position state stored"))?;

    tracing::info!(
        "Position {}: active={} cursor={} sl_price={:?}",
        state.id,
        state.is_position_active,
        state.timestamp_cursor,
        state.sl_order_price
    );

    let Some(remote_id) = state.remote_id.as_deref() else {
        tracing::info!("No stop-loss order tracked");
        return Ok(());
    };

    let trading = TradingClient::new(settings.trading.base_url.clone(), state.credentials.clone())?;
    let coin = settings.trading.coin;

    let order_state = trading.get_order_state(coin, remote_id).await?;
    tracing::info!("Stop-loss {} state: {}", remote_id, order_state);

    match trading.get_order_fill_detail(coin, remote_id).await {
        Ok(fill) => tracing::info!("Stop-loss {} fill: {:?}", remote_id, fill),
        Err(ApiError::NoOrderFound) => tracing::info!("Stop-loss {} has no fills", remote_id),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Completed {
            position,
            open:
                OpenCheck::Opened {
                    direction,
                    quantity,
                    entry_price,
                    sl_order_id,
                    ..
                },
        } => {
            tracing::info!(
                "✅ Cycle complete: position {:?}, opened {:?} {} at {} (sl order {})",
                position,
                direction,
                quantity,
                entry_price,
                sl_order_id
            );
        }
        CycleOutcome::Completed { position, open } => {
            tracing::info!("Cycle complete: position {:?}, entry {:?}", position, open);
        }
        CycleOutcome::NoPositionState => {
            tracing::warn!("No position state stored; run `streakbot init-position`");
        }
        CycleOutcome::Busy => {
            tracing::info!("Cycle skipped, another worker holds the position");
        }
    }
}
