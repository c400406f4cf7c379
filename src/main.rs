/// Main entry point for the candle cache
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use candlecache::{
    chart::ChartService,
    config::{load_config_with_source, ConfigSource},
    data::{BarStore, FreshnessGuard, SqliteBarStore},
    ingest::{Backfiller, ChannelJobQueue, Dispatcher, JobQueue, LoadRequest},
    upstream::{BinanceSource, UpstreamClient},
    utils::Throttle,
    Config, Period, Resolution,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a chart slice as JSON
    Chart {
        #[arg(long)]
        symbol: String,

        /// 5m, 10m or 15m
        #[arg(long, default_value = "5m")]
        resolution: String,

        /// Defaults to `default_limit` from the config
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Backfill one symbol synchronously and print the report
    Backfill {
        #[arg(long)]
        symbol: String,

        /// day, week or month
        #[arg(long, default_value = "day")]
        period: String,
    },

    /// Queue a backfill per symbol and drain the queue
    Load {
        /// Comma-separated list of symbols (e.g. "BTCUSDT,ETHUSDT")
        #[arg(long)]
        symbols: String,

        #[arg(long, default_value = "day")]
        period: String,
    },

    /// Consume newline-delimited job envelopes from stdin until EOF
    Worker,
}

/// Application state
pub struct CacheApp {
    config: Arc<Config>,
    chart: ChartService,
    backfiller: Arc<Backfiller>,
}

impl CacheApp {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let store: Arc<dyn BarStore> = Arc::new(
            SqliteBarStore::open(&config.database_path)
                .with_context(|| format!("opening {}", config.database_path))?,
        );
        info!("Bar store opened at {}", config.database_path);

        let source = Arc::new(BinanceSource::new(
            config.upstream_base_url.clone(),
            Duration::from_secs(config.upstream_timeout_sec),
        )?);
        let client = Arc::new(UpstreamClient::new(
            source,
            Throttle::from_millis(config.upstream_request_delay_ms),
            config.upstream_batch_limit,
        ));

        let guard = FreshnessGuard::new(Arc::clone(&store), Arc::clone(&client));
        let chart = ChartService::new(&config, guard, Arc::clone(&store))?;
        let backfiller = Arc::new(Backfiller::new(
            Arc::clone(&store),
            Arc::clone(&client),
            config.flush_batch_size,
        ));

        Ok(CacheApp {
            config,
            chart,
            backfiller,
        })
    }

    fn dispatcher(&self, queue: Arc<ChannelJobQueue>) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            queue,
            Arc::clone(&self.backfiller),
            self.config.allow_list(),
            Duration::from_millis(self.config.nack_delay_ms),
        ))
    }

    async fn chart(
        &self,
        symbol: &str,
        resolution: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> anyhow::Result<()> {
        let resolution: Resolution = resolution.parse()?;
        let limit = limit.unwrap_or(self.config.default_limit);

        let slice = self.chart.get_slice(symbol, resolution, limit, offset).await?;
        println!("{}", serde_json::to_string_pretty(&slice)?);
        Ok(())
    }

    async fn backfill(&self, symbol: &str, period: &str) -> anyhow::Result<()> {
        let symbol = self.config.allow_list().parse(symbol)?;
        let period: Period = period.parse()?;

        let report = self.backfiller.backfill(&symbol, period).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }

    async fn load(&self, symbols: &str, period: &str) -> anyhow::Result<()> {
        let queue = Arc::new(ChannelJobQueue::new());
        let request = LoadRequest {
            symbols: symbols
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            period: period.to_string(),
        };

        let receipt = request.enqueue(&self.config.allow_list(), queue.as_ref()).await?;
        println!("{}", serde_json::to_string(&receipt)?);
        queue.close().await;

        let stats = self
            .dispatcher(Arc::clone(&queue))
            .run_workers(self.config.worker_count)
            .await?;
        info!(
            acked = stats.acked,
            dropped = stats.dropped,
            bars_stored = stats.bars_stored,
            "Load finished"
        );
        Ok(())
    }

    async fn worker(&self) -> anyhow::Result<()> {
        let queue = Arc::new(ChannelJobQueue::new());

        let feeder_queue = Arc::clone(&queue);
        let feeder = tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut published = 0usize;
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) if line.trim().is_empty() => continue,
                        Ok(Some(line)) => {
                            if let Err(e) = feeder_queue.publish(line.into_bytes()).await {
                                warn!("Failed to publish job: {}", e);
                                break;
                            }
                            published += 1;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Failed to read stdin: {}", e);
                            break;
                        }
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("Ctrl+C received - draining queued jobs");
                        break;
                    }
                }
            }
            feeder_queue.close().await;
            published
        });

        let stats = self
            .dispatcher(Arc::clone(&queue))
            .run_workers(self.config.worker_count)
            .await?;
        let published = feeder.await?;

        info!(
            published,
            acked = stats.acked,
            dropped = stats.dropped,
            bars_stored = stats.bars_stored,
            "Worker finished"
        );
        Ok(())
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let (config, source) = load_config_with_source(&config_path)?;
    init_logging(&config);
    match &source {
        ConfigSource::File(_) => info!("Starting candle cache (config: {})", source),
        ConfigSource::Defaults(_) => warn!("Starting candle cache with {}", source),
    }

    let app = CacheApp::new(config)?;

    match cli.command {
        Commands::Chart {
            symbol,
            resolution,
            limit,
            offset,
        } => app.chart(&symbol, &resolution, limit, offset).await,
        Commands::Backfill { symbol, period } => app.backfill(&symbol, &period).await,
        Commands::Load { symbols, period } => app.load(&symbols, &period).await,
        Commands::Worker => app.worker().await,
    }
}
