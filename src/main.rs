//! Triangular arbitrage engine entry point.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use triarb::api::{create_router, AppState};
use triarb::arbitrage::path::Pair;
use triarb::config::Config;
use triarb::controller::{Controller, ControllerStatus, Mode};
use triarb::exchange::{ExchangeApi, RestClient};
use triarb::metrics;
use triarb::orderbook::{BookCache, BookFeed, ReconnectConfig};
use triarb::portfolio::PortfolioCache;

/// Triangular arbitrage engine.
#[derive(Parser, Debug)]
#[command(name = "triarb")]
#[command(about = "Automated triangular arbitrage over a configured set of spot pairs")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scan/act loop (default).
    Run {
        /// Trading mode: `auto` executes, `monitor` only watches.
        #[arg(long, value_enum, default_value_t = CliMode::Monitor)]
        mode: CliMode,
    },

    /// Validate configuration and print a summary.
    CheckConfig,

    /// Query account balances over REST.
    CheckBalance,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliMode {
    /// Trading enabled.
    Auto,
    /// Evaluation and reporting only.
    Monitor,
}

impl From<CliMode> for Mode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Auto => Mode::Auto,
            CliMode::Monitor => Mode::Monitor,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;
    init_tracing(&config, args.verbose)?;

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(&config),
        Some(Command::CheckBalance) => cmd_check_balance(&config).await,
        Some(Command::Run { mode }) => cmd_run(config, mode.into()).await,
        None => cmd_run(config, Mode::Monitor).await,
    }
}

fn init_tracing(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("triarb=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match &config.log_file {
        Some(path) => {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            registry
                .with(fmt::layer())
                .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
                .init();
        }
        None => registry.with(fmt::layer()).init(),
    }
    Ok(())
}

/// All distinct pairs referenced by the configured paths.
fn subscribed_pairs(config: &Config) -> Vec<Pair> {
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();
    for path in &config.paths {
        for step in &path.steps {
            if seen.insert(step.pair.id()) {
                pairs.push(step.pair.clone());
            }
        }
    }
    pairs
}

async fn cmd_run(config: Config, mode: Mode) -> anyhow::Result<()> {
    metrics::init_metrics();

    if config.paths.is_empty() {
        anyhow::bail!("no arbitrage paths configured (set TRIARB_PATH1)");
    }

    let config = Arc::new(config);
    let books = Arc::new(BookCache::new());
    let portfolio = Arc::new(PortfolioCache::new());
    let client = Arc::new(RestClient::new(&config));

    info!(
        mode = %mode,
        paths = config.paths.len(),
        public_only = config.is_public_only(),
        "starting engine"
    );
    for path in &config.paths {
        info!(name = %path.name, route = %path, "configured path");
    }

    // Prime the cache with REST snapshots so the status surface has depth
    // before the feed's first message; the evaluator's freshness budget
    // still decides what is tradable.
    for pair in subscribed_pairs(&config) {
        match client.get_order_book(&pair, config.book_depth).await {
            Ok(book) => books.store(book),
            Err(e) => warn!(pair = %pair, error = %e, "initial snapshot failed"),
        }
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Depth feed task: sole writer of the book cache.
    let feed = BookFeed::new(
        books.clone(),
        subscribed_pairs(&config),
        config.ws_url.clone(),
        ReconnectConfig {
            max_delay: config.ws_reconnect_max_delay,
            ..ReconnectConfig::default()
        },
    );
    let feed_task = tokio::spawn(feed.run(shutdown_rx.clone()));

    // Balance sync task: sole writer of the portfolio cache.
    let sync_task = if config.is_public_only() {
        warn!("no API credentials: market data only, trading disabled");
        None
    } else {
        let portfolio = portfolio.clone();
        let client = client.clone();
        let interval = config.balance_refresh;
        let retries = config.network_retry_count;
        let delay = config.network_retry_delay;
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            portfolio
                .run_sync(client.as_ref(), interval, retries, delay, shutdown)
                .await;
        }))
    };

    // Controller: owns the scan/act loop.
    let mut controller = Controller::new(
        config.clone(),
        client,
        books.clone(),
        portfolio.clone(),
        mode,
    );

    // Status surface.
    let app_state = AppState::new(controller.shared());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.status_port));
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "status server listening");
    let router = create_router(app_state);
    let mut server_shutdown = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = server_shutdown.changed().await;
        };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!(error = %e, "status server failed");
        }
    });

    controller
        .start()
        .map_err(|e| anyhow::anyhow!("controller start failed: {e}"))?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");

    let status = controller.stop().await;
    let _ = shutdown_tx.send(true);
    let _ = feed_task.await;
    if let Some(task) = sync_task {
        let _ = task.await;
    }
    let _ = server_task.await;

    print_summary(&controller);

    if status == ControllerStatus::Error {
        anyhow::bail!("controller terminated with an error");
    }
    Ok(())
}

fn print_summary<E: ExchangeApi + 'static>(controller: &Controller<E>) {
    let stats = controller.stats();
    println!("=== session summary ===");
    println!("scans:            {}", stats.scans);
    println!("opportunities:    {}", stats.opportunities);
    println!("executions:       {}", stats.executions);
    println!("  successes:      {}", stats.successes);
    println!("  failures:       {}", stats.failures);
    println!("rejections:       {}", stats.rejections);
    println!("net profit:       {}", stats.net_profit);

    if let Some(risk) = controller.shared().risk_stats() {
        println!("risk level:       {}", risk.level);
        println!("trades today:     {}/{}", risk.trades_today, risk.max_daily_trades);
        println!("realized P&L:     {}", risk.realized_pnl_today);
        if !risk.rejections.is_empty() {
            println!("rejections by reason:");
            let mut reasons: Vec<_> = risk.rejections.iter().collect();
            reasons.sort_by(|a, b| b.1.cmp(a.1));
            for (reason, count) in reasons {
                println!("  {reason}: {count}");
            }
        }
    }
}

fn cmd_check_config(config: &Config) -> anyhow::Result<()> {
    println!("configuration OK");
    println!("  fee rate:              {}", config.fee_rate);
    for (pair, fee) in &config.fee_overrides {
        println!("  fee override {pair}:  {fee}");
    }
    println!("  slippage tolerance:    {}", config.slippage_tolerance);
    println!("  min profit threshold:  {}", config.min_profit_threshold);
    println!("  min trade amount:      {}", config.min_trade_amount);
    println!("  order timeout:         {:?}", config.order_timeout);
    println!("  monitor interval:      {:?}", config.monitor_interval);
    println!("  freshness budget:      {:?}", config.freshness_budget);
    println!("  max daily trades:      {}", config.max_daily_trades);
    println!("  max single trade:      {}", config.max_single_trade_ratio);
    println!("  max position ratio:    {}", config.max_position_ratio);
    println!("  stop loss ratio:       {}", config.stop_loss_ratio);
    println!("  credentials:           {}", if config.is_public_only() {
        "absent (public-only)"
    } else {
        "present"
    });
    println!("  paths:");
    for path in &config.paths {
        println!("    {}: {}", path.name, path);
    }
    if config.paths.is_empty() {
        println!("    (none configured)");
    }
    if !config.initial_holdings.is_empty() {
        println!("  declared holdings:");
        let mut assets: Vec<_> = config.initial_holdings.iter().collect();
        assets.sort_by(|a, b| a.0.cmp(b.0));
        for (asset, amount) in assets {
            println!("    {asset}: {amount}");
        }
    }
    Ok(())
}

async fn cmd_check_balance(config: &Config) -> anyhow::Result<()> {
    if config.is_public_only() {
        anyhow::bail!("no API credentials configured; balance check needs them");
    }

    let client = RestClient::new(config);
    let balances = client
        .get_balance()
        .await
        .map_err(|e| anyhow::anyhow!("balance query failed: {e}"))?;

    println!("account balances:");
    let mut assets: Vec<_> = balances.iter().collect();
    assets.sort_by(|a, b| a.0.cmp(b.0));
    for (asset, amount) in assets {
        println!("  {asset}: {amount}");
    }
    if balances.is_empty() {
        println!("  (no non-zero balances)");
    }
    Ok(())
}
