/// Show stored bar coverage per symbol
/// Usage: cargo run --bin store_stats --release
use candlecache::config::load_config_or_default;
use candlecache::data::{BarStore, SqliteBarStore};
use candlecache::utils::format_in_tz;
use candlecache::BASE_RESOLUTION;
use chrono_tz::Tz;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = load_config_or_default(&config_path)?;
    let tz: Tz = config
        .display_timezone
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid display_timezone: {}", e))?;

    println!("📊 Bar Store Status ({})", config.database_path);
    println!("====================\n");

    if !std::path::Path::new(&config.database_path).exists() {
        println!("❌ No database found yet.");
        println!("\n💡 To populate it, run:");
        println!("   cargo run --release -- backfill --symbol BTCUSDT --period day");
        return Ok(());
    }

    let store = SqliteBarStore::open(&config.database_path)?;
    let mut total = 0usize;

    for symbol in config.allow_list().symbols() {
        let count = store.count(&symbol, BASE_RESOLUTION).await?;
        total += count;

        if count == 0 {
            println!("   {:<10} {:>8} bars", symbol.as_str(), 0);
            continue;
        }

        let earliest = store
            .find_earliest_at_or_after(&symbol, BASE_RESOLUTION, i64::MIN)
            .await?;
        let latest = store
            .find_latest_at_or_after(&symbol, BASE_RESOLUTION, i64::MIN)
            .await?;

        let span = match (earliest, latest) {
            (Some(first), Some(last)) => format!(
                "{} .. {}",
                format_in_tz(first.open_time, &tz)?,
                format_in_tz(last.open_time, &tz)?
            ),
            _ => "-".to_string(),
        };
        println!("   {:<10} {:>8} bars   {}", symbol.as_str(), count, span);
    }

    println!("\n📈 Total {} bars: {}", BASE_RESOLUTION, total);
    Ok(())
}
