//! Folio CLI - Command line interface for portfolio analytics.
//!
//! Every command prints an `ApiResponse` JSON document on stdout; logs go to
//! stderr and are filtered with `RUST_LOG`.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use folio_core::{
    portfolio::{dividend_income, income_summary},
    normalize_ticker, AlertDirection, ApiResponse, EngineConfig, Holding, HoldingsStore,
    MarketDataProvider, Period, PortfolioAnalyzer, PriceMap, StaticMarketData,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Folio CLI - portfolio valuation, risk and rebalancing")]
#[command(version)]
struct Cli {
    /// Config file (defaults to FOLIO_CONFIG or ~/.folio/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Holdings table (overrides the configured location)
    #[arg(long, global = true)]
    portfolio: Option<PathBuf>,

    /// Market data JSON snapshot (overrides storage.market_data_file)
    #[arg(long, global = true)]
    market_data: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Holdings management commands
    Holdings {
        #[command(subcommand)]
        action: HoldingsAction,
    },
    /// Gross and net portfolio value
    Value,
    /// Per-holding allocation
    Allocation,
    /// Value by sector
    Sectors,
    /// Dividend income and transaction costs
    Income,
    /// Risk metrics against the benchmark
    Risk {
        /// Lookback period (1m, 3m, 6m, YTD, 1y, 3y, 5y)
        #[arg(short, long, default_value = "1y")]
        period: Period,
    },
    /// Cumulative returns, drawdowns and correlations
    Performance {
        #[arg(short, long, default_value = "1y")]
        period: Period,
    },
    /// Maximum-Sharpe allocation
    Optimize {
        #[arg(short, long, default_value = "1y")]
        period: Period,
        /// Also report the current allocation's metrics
        #[arg(long)]
        compare: bool,
    },
    /// Efficient frontier
    Frontier {
        #[arg(short, long, default_value = "1y")]
        period: Period,
    },
    /// Rebalancing plan
    Rebalance {
        /// Apply the plan to the stored holdings
        #[arg(long)]
        execute: bool,
    },
    /// Price alert commands
    Alerts {
        #[command(subcommand)]
        action: AlertAction,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum HoldingsAction {
    /// List all holdings
    List,
    /// Add a holding or add to an existing one
    Add {
        /// Stock ticker
        #[arg(short, long)]
        ticker: String,
        /// Number of shares
        #[arg(short = 'n', long)]
        quantity: f64,
        /// Target allocation (0..1)
        #[arg(long, default_value = "0")]
        target: f64,
        /// Dividends per share
        #[arg(long, default_value = "0")]
        dividends: f64,
        /// Transaction cost paid
        #[arg(long, default_value = "0")]
        cost: f64,
        #[arg(long)]
        sector: Option<String>,
        #[arg(long)]
        industry: Option<String>,
    },
    /// Remove a holding
    Remove {
        #[arg(short, long)]
        ticker: String,
    },
    /// Set the target allocation of a holding
    Target {
        #[arg(short, long)]
        ticker: String,
        #[arg(long)]
        target: f64,
    },
    /// Set dividends per share of a holding
    Dividends {
        #[arg(short, long)]
        ticker: String,
        #[arg(long)]
        amount: f64,
    },
    /// Ask the market data source which tickers it recognises
    Validate,
    /// Get, set or adjust the cash balance
    Cash {
        /// Cash amount to set
        #[arg(short, long)]
        set: Option<f64>,
        /// Amount to deposit (negative to withdraw)
        #[arg(short, long, allow_negative_numbers = true)]
        add: Option<f64>,
    },
}

#[derive(Subcommand)]
enum AlertAction {
    /// Check every holding against its alert
    Check {
        /// Store current prices as the new reference for triggered alerts
        #[arg(long)]
        record: bool,
    },
    /// Configure an alert on a holding
    Set {
        #[arg(short, long)]
        ticker: String,
        /// Threshold in percent
        #[arg(long)]
        threshold: f64,
        /// Above or Below; fires in both directions when omitted
        #[arg(long)]
        direction: Option<AlertDirection>,
    },
    /// Remove the alert from a holding
    Clear {
        #[arg(short, long)]
        ticker: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let output = match run(cli) {
        Ok(data) => serde_json::to_string_pretty(&ApiResponse::ok(data))?,
        Err(e) => {
            tracing::error!("{:#}", e);
            serde_json::to_string_pretty(&ApiResponse::<()>::err(format!("{:#}", e)))?
        }
    };

    println!("{}", output);
    Ok(())
}

/// Configuration plus the locations a command works with.
struct Session {
    config: EngineConfig,
    config_path: PathBuf,
    portfolio_path: PathBuf,
    market_data: Option<PathBuf>,
}

impl Session {
    fn load(cli: &Cli) -> anyhow::Result<Self> {
        let config_path = cli.config.clone().unwrap_or_else(EngineConfig::default_path);
        let config = EngineConfig::load_from(&config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?;
        let portfolio_path = cli
            .portfolio
            .clone()
            .unwrap_or_else(|| config.portfolio_path());
        let market_data = cli
            .market_data
            .clone()
            .or_else(|| config.storage.market_data_file.clone());

        Ok(Self {
            config,
            config_path,
            portfolio_path,
            market_data,
        })
    }

    fn store(&self) -> anyhow::Result<HoldingsStore> {
        HoldingsStore::open(self.portfolio_path.clone())
            .with_context(|| format!("loading holdings from {}", self.portfolio_path.display()))
    }

    fn analyzer(&self) -> anyhow::Result<PortfolioAnalyzer<StaticMarketData>> {
        let path = self.market_data.as_ref().ok_or_else(|| {
            anyhow!("no market data: pass --market-data or set storage.market_data_file")
        })?;
        let data = StaticMarketData::from_json_file(path)
            .with_context(|| format!("loading market data from {}", path.display()))?;
        Ok(PortfolioAnalyzer::with_config(data, self.config.clone()))
    }
}

fn run(cli: Cli) -> anyhow::Result<Value> {
    let ctx = Session::load(&cli)?;

    match cli.command {
        Commands::Holdings { action } => handle_holdings(&ctx, action),
        Commands::Value => {
            let store = ctx.store()?;
            Ok(json!(ctx.analyzer()?.value(store.portfolio())?))
        }
        Commands::Allocation => {
            let store = ctx.store()?;
            Ok(json!(ctx.analyzer()?.allocation(store.portfolio())?))
        }
        Commands::Sectors => {
            let store = ctx.store()?;
            Ok(json!(ctx.analyzer()?.sectors(store.portfolio())?))
        }
        Commands::Income => {
            let store = ctx.store()?;
            Ok(json!(income_summary(store.portfolio())))
        }
        Commands::Risk { period } => {
            let store = ctx.store()?;
            Ok(json!(ctx.analyzer()?.risk(store.portfolio(), period)?))
        }
        Commands::Performance { period } => {
            let store = ctx.store()?;
            Ok(json!(ctx.analyzer()?.performance(store.portfolio(), period)?))
        }
        Commands::Optimize { period, compare } => {
            let store = ctx.store()?;
            let analyzer = ctx.analyzer()?;
            if compare {
                Ok(json!(analyzer.compare(store.portfolio(), period)?))
            } else {
                Ok(json!(analyzer.optimize(store.portfolio(), period)?))
            }
        }
        Commands::Frontier { period } => {
            let store = ctx.store()?;
            let frontier = ctx.analyzer()?.frontier(store.portfolio(), period)?;
            Ok(json!({ "points": frontier }))
        }
        Commands::Rebalance { execute } => {
            let mut store = ctx.store()?;
            let plan = ctx.analyzer()?.rebalance(store.portfolio())?;
            let executed = execute && !plan.actions.is_empty();
            if executed {
                store.apply_rebalance(&plan)?;
                store.save()?;
            }
            Ok(json!({
                "plan": plan,
                "executed": executed,
                "cash": store.cash(),
            }))
        }
        Commands::Alerts { action } => handle_alerts(&ctx, action),
        Commands::Config { action } => handle_config(&ctx, action),
    }
}

fn handle_holdings(ctx: &Session, action: HoldingsAction) -> anyhow::Result<Value> {
    let mut store = ctx.store()?;

    match action {
        HoldingsAction::List => {
            let portfolio = store.portfolio();
            Ok(json!({
                "holdings": portfolio.holdings.values().collect::<Vec<_>>(),
                "holding_count": portfolio.len(),
                "cash": portfolio.cash_balance,
                "total_target_allocation": portfolio.total_target_allocation(),
                "dividend_income": dividend_income(portfolio),
            }))
        }
        HoldingsAction::Add {
            ticker,
            quantity,
            target,
            dividends,
            cost,
            sector,
            industry,
        } => {
            let mut holding = Holding::new(&ticker, quantity)
                .with_target(target)
                .with_dividends(dividends)
                .with_transaction_cost(cost);
            if let Some(sector) = sector {
                let industry = industry.unwrap_or_else(|| sector.clone());
                holding = holding.with_sector(&sector, &industry);
            }
            if let Some(path) = ctx.market_data.as_ref() {
                let data = StaticMarketData::from_json_file(path)?;
                holding.valid_ticker = data.validate_ticker(&holding.ticker)?;
            }

            let (holding, was_update) = store.add_holding(holding)?;
            store.save()?;
            Ok(json!({
                "holding": holding,
                "action": if was_update { "updated" } else { "added" },
            }))
        }
        HoldingsAction::Remove { ticker } => {
            let removed = store.remove_holding(&ticker)?;
            store.save()?;
            Ok(json!({ "removed": removed }))
        }
        HoldingsAction::Target { ticker, target } => {
            store.set_target(&ticker, target)?;
            store.save()?;
            Ok(json!({ "holding": store.get(&ticker) }))
        }
        HoldingsAction::Dividends { ticker, amount } => {
            store.set_dividends(&ticker, amount)?;
            store.save()?;
            Ok(json!({ "holding": store.get(&ticker) }))
        }
        HoldingsAction::Validate => {
            let analyzer = ctx.analyzer()?;
            let invalid = store.refresh_validity(analyzer.provider())?;
            store.save()?;
            Ok(json!({ "invalid": invalid }))
        }
        HoldingsAction::Cash { set, add } => {
            if let Some(amount) = set {
                store.set_cash(amount)?;
            }
            if let Some(amount) = add {
                store.add_cash(amount)?;
            }
            if set.is_some() || add.is_some() {
                store.save()?;
            }
            Ok(json!({ "cash": store.cash() }))
        }
    }
}

fn handle_alerts(ctx: &Session, action: AlertAction) -> anyhow::Result<Value> {
    let mut store = ctx.store()?;

    match action {
        AlertAction::Check { record } => {
            let analyzer = ctx.analyzer()?;
            let alerts = analyzer.alerts(store.portfolio())?;
            if record && !alerts.is_empty() {
                let triggered: PriceMap = alerts
                    .iter()
                    .map(|a| (a.ticker.as_str(), a.current_price))
                    .collect();
                store.record_prices(&triggered);
                store.save()?;
            }
            Ok(json!({ "alerts": alerts }))
        }
        AlertAction::Set {
            ticker,
            threshold,
            direction,
        } => {
            store.set_alert(&ticker, Some(threshold), direction)?;
            if store.get(&ticker).is_some_and(|h| h.previous_price.is_none()) {
                let prices = ctx.analyzer()?.prices(store.portfolio())?;
                let ticker = normalize_ticker(&ticker);
                if let Some(price) = prices.price(&ticker) {
                    store.record_prices(&PriceMap::new().with_price(&ticker, price));
                }
            }
            store.save()?;
            Ok(json!({ "holding": store.get(&ticker) }))
        }
        AlertAction::Clear { ticker } => {
            store.set_alert(&ticker, None, None)?;
            store.save()?;
            Ok(json!({ "holding": store.get(&ticker) }))
        }
    }
}

fn handle_config(ctx: &Session, action: ConfigAction) -> anyhow::Result<Value> {
    match action {
        ConfigAction::Show => Ok(json!({
            "path": ctx.config_path,
            "portfolio_path": ctx.portfolio_path,
            "config": ctx.config,
        })),
        ConfigAction::Init { force } => {
            if ctx.config_path.exists() && !force {
                return Err(anyhow!(
                    "{} already exists; use --force to overwrite",
                    ctx.config_path.display()
                ));
            }
            let config = EngineConfig::default();
            config.save_to(&ctx.config_path)?;
            Ok(json!({
                "path": ctx.config_path,
                "config": config,
            }))
        }
    }
}
