//! strategy-lab: backtest, optimize and select trading strategies from the CLI
//!
//! Usage:
//!   strategy-lab backtest --candles btc_1h.json --strategy trend_following
//!   strategy-lab optimize --candles btc_1h.json --strategy fvg_sweep --workers 8
//!   strategy-lab select --candles btc_1h.json

use anyhow::{bail, Context};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use engine::{
    BacktestConfig, BacktestEngine, BacktestResult, Candle, DeepOptimizer, OptimizerConfig,
    ParamValue, RegimeConfig, StrategyId, StrategyParameters,
};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

#[derive(Parser)]
#[command(name = "strategy-lab")]
#[command(about = "Backtest, optimize and select trading strategies", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Candle file (JSON array); falls back to STRATEGY_LAB_CANDLES
    #[arg(long, global = true)]
    candles: Option<PathBuf>,

    /// Starting balance
    #[arg(long, global = true, default_value = "10000")]
    balance: Decimal,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one strategy once
    Backtest {
        /// buy_and_hold, trend_following, fvg_sweep, order_block_choch
        #[arg(long)]
        strategy: String,
        /// Parameters as name=value pairs (comma-separated)
        #[arg(long, value_delimiter = ',')]
        params: Vec<String>,
    },
    /// Grid-search a strategy's parameters
    Optimize {
        #[arg(long)]
        strategy: String,
        /// Worker threads; falls back to STRATEGY_LAB_WORKERS, then all cores
        #[arg(long)]
        workers: Option<usize>,
        /// Number of top combinations to print
        #[arg(long, default_value_t = 5)]
        top_n: usize,
    },
    /// Run every built-in strategy and pick the best for the current regime
    Select,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,strategy_lab=debug")
    } else {
        EnvFilter::new("info,engine=info,strategy_lab=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let path = cli
        .candles
        .or_else(|| std::env::var("STRATEGY_LAB_CANDLES").ok().map(PathBuf::from))
        .context("no candle file given (use --candles or STRATEGY_LAB_CANDLES)")?;
    let candles = load_candles(&path)?;
    let config = BacktestConfig::default().with_initial_balance(cli.balance);

    match cli.command {
        Commands::Backtest { strategy, params } => cmd_backtest(&candles, &config, &strategy, &params),
        Commands::Optimize {
            strategy,
            workers,
            top_n,
        } => cmd_optimize(&candles, config, &strategy, workers, top_n),
        Commands::Select => cmd_select(&candles, cli.balance),
    }
}

fn load_candles(path: &Path) -> anyhow::Result<Vec<Candle>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut candles: Vec<Candle> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse candles from {}", path.display()))?;
    if candles.is_empty() {
        bail!("{} contains no candles", path.display());
    }
    candles.sort_by_key(|c| c.timestamp);
    info!(path = %path.display(), candles = candles.len(), "Loaded candles");
    Ok(candles)
}

fn parse_params(pairs: &[String]) -> anyhow::Result<StrategyParameters> {
    let mut params = StrategyParameters::new();
    for pair in pairs.iter().filter(|p| !p.trim().is_empty()) {
        let (name, value) = pair
            .split_once('=')
            .with_context(|| format!("expected name=value, got `{pair}`"))?;
        let value = match value.trim() {
            "true" => ParamValue::Bool(true),
            "false" => ParamValue::Bool(false),
            v => ParamValue::Number(
                v.parse()
                    .with_context(|| format!("`{}` is not a number", v))?,
            ),
        };
        params.set(name.trim(), value);
    }
    Ok(params)
}

fn cmd_backtest(
    candles: &[Candle],
    config: &BacktestConfig,
    strategy: &str,
    params: &[String],
) -> anyhow::Result<()> {
    let id = StrategyId::from_str(strategy)?;
    let params = parse_params(params)?;
    let mut strategy = id.build();
    strategy.initialize(&params)?;

    let result = BacktestEngine::evaluate(strategy.as_mut(), candles, config)?;
    print_result(&result);
    Ok(())
}

fn cmd_optimize(
    candles: &[Candle],
    backtest: BacktestConfig,
    strategy: &str,
    workers: Option<usize>,
    top_n: usize,
) -> anyhow::Result<()> {
    let id = StrategyId::from_str(strategy)?;
    let workers = match workers {
        Some(w) => Some(w),
        None => std::env::var("STRATEGY_LAB_WORKERS")
            .ok()
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("STRATEGY_LAB_WORKERS must be a positive integer")?,
    };
    let config = OptimizerConfig {
        backtest,
        workers,
        ..Default::default()
    };
    let grid = id.default_grid();

    println!("\n=== Optimizing {} ({} combinations) ===\n", id, grid.len());
    let optimizer = DeepOptimizer::new();
    let result = optimizer.optimize(|| id.build(), candles, &grid, &config)?;

    println!(
        "Tested {}/{} combinations in {:.1}s",
        result.combinations_tested,
        result.combinations_total,
        result.duration.as_secs_f64()
    );
    println!("\nTop {} Results:", result.all_results.len().min(top_n));
    println!(
        "  {:>3}  {:>10} {:>8} {:>8} {:>8} {:>7}  {}",
        "#", "Fitness", "Return%", "WR%", "DD%", "Trades", "Parameters"
    );
    println!("  {}", "-".repeat(90));
    for r in result.all_results.iter().take(top_n) {
        let fitness = if r.metrics.total_trades == 0 {
            "-".to_string()
        } else {
            format!("{:.3}", r.fitness)
        };
        println!(
            "  {:>3}  {:>10} {:>+8.2} {:>7.1}% {:>7.2}% {:>7}  {}",
            r.rank,
            fitness,
            r.metrics.total_return_pct,
            r.metrics.win_rate,
            r.metrics.max_drawdown_pct,
            r.metrics.total_trades,
            r.parameters,
        );
    }

    println!("\nBest: {}", result.best_parameters);
    print_result(&result.best_result);
    Ok(())
}

fn cmd_select(candles: &[Candle], balance: Decimal) -> anyhow::Result<()> {
    let strategies = StrategyId::all().iter().map(StrategyId::build).collect();
    let selection =
        engine::select_for_market(strategies, candles, balance, &RegimeConfig::default());

    println!("\n=== Strategy Selection ===\n");
    println!("Regime: {}", selection.regime);
    println!(
        "  {:<22} {:>8} {:>8} {:>10} {:>7}",
        "Strategy", "Score", "Sharpe", "Return%", "Trades"
    );
    println!("  {}", "-".repeat(60));
    for (name, result) in &selection.results {
        let marker = if selection.best.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<22} {:>8.3} {:>8.3} {:>+10.2} {:>7}",
            marker,
            name,
            selection.scores.get(name).copied().unwrap_or_default(),
            result.metrics.sharpe_ratio,
            result.metrics.total_return_pct,
            result.metrics.total_trades,
        );
    }

    match selection.best {
        Some(best) => println!("\nSelected: {best}"),
        None => println!("\nNo strategy produced a result."),
    }
    Ok(())
}

fn format_time(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_result(r: &BacktestResult) {
    let m = &r.metrics;
    println!("\n--- {} on {} ({}) ---", r.strategy_name, r.symbol, r.timeframe);
    println!(
        "Period:        {} -> {} ({:.1} days)",
        format_time(r.start_time),
        format_time(r.end_time),
        m.duration_days
    );
    println!("Balance:       {} -> {}", r.initial_balance, r.final_balance.round_dp(2));
    println!(
        "Return:        {:+.2}% (annualized {:+.2}%)",
        m.total_return_pct, m.annualized_return_pct
    );
    println!(
        "Max drawdown:  {:.2}% ({})",
        m.max_drawdown_pct,
        m.max_drawdown.round_dp(2)
    );
    println!("Sharpe:        {:.3} | Sortino: {:.3}", m.sharpe_ratio, m.sortino_ratio);
    println!(
        "Trades:        {} ({} won, {} lost, {:.1}% win rate)",
        m.total_trades, m.winning_trades, m.losing_trades, m.win_rate
    );
    println!(
        "Profit factor: {:.2} | Avg win {} | Avg loss {}",
        m.profit_factor,
        m.avg_win.round_dp(2),
        m.avg_loss.round_dp(2)
    );
    println!("Fees paid:     {}", m.total_fees.round_dp(2));
    if let Some(p) = &r.open_position {
        println!(
            "Open position: {:?} {} @ {}",
            p.side,
            p.quantity.round_dp(6),
            p.entry_price.round_dp(4)
        );
    }
}
