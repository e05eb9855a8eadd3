use crate::cli::{CacheFormatArg, EngineArgs, MissPolicyArg, SourceArg};
use brdata_engine::{Engine, EngineConfig, FetcherSet, MissPolicy, SourceMode};
use brdata_store::CacheFormat;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "BRDATA_LOG";

/// Install the stderr subscriber. `BRDATA_LOG` sets the filter unless
/// `--quiet` is given.
pub fn init_logging(quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Config file (or defaults) with command-line overrides applied.
pub fn load_config_or_exit(args: &EngineArgs) -> EngineConfig {
    let mut config = EngineConfig::discover(args.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    });

    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(url) = &args.remote_url {
        config.remote_url = Some(url.clone());
        config.remote_dir = None;
    }
    // Checked second so a mirror directory wins over a URL.
    if let Some(dir) = &args.remote_dir {
        config.remote_dir = Some(dir.clone());
        config.remote_url = None;
    }
    if let Some(dir) = &args.source_dir {
        config.source_dir = Some(dir.clone());
    }
    if let Some(path) = &args.registry {
        config.registry_path = Some(path.clone());
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(format) = args.cache_format {
        config.cache_format = map_cache_format(format);
    }
    config
}

pub fn build_engine_or_exit(config: &EngineConfig) -> Engine {
    config.build(FetcherSet::new()).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    })
}

pub fn load_engine_or_exit(args: &EngineArgs) -> (EngineConfig, Engine) {
    let config = load_config_or_exit(args);
    let engine = build_engine_or_exit(&config);
    (config, engine)
}

pub fn print_json(payload: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(payload).expect("json serialization")
    );
}

pub fn map_source(arg: SourceArg) -> SourceMode {
    match arg {
        SourceArg::Auto => SourceMode::Auto,
        SourceArg::Cache => SourceMode::Cache,
        SourceArg::Github => SourceMode::Github,
        SourceArg::Fresh => SourceMode::Fresh,
    }
}

pub fn map_miss_policy(arg: MissPolicyArg) -> MissPolicy {
    match arg {
        MissPolicyArg::ReturnNull => MissPolicy::ReturnNull,
        MissPolicyArg::Error => MissPolicy::Error,
    }
}

fn map_cache_format(arg: CacheFormatArg) -> CacheFormat {
    match arg {
        CacheFormatArg::Json => CacheFormat::Json,
        CacheFormatArg::Jsonl => CacheFormat::Jsonl,
    }
}

/// `3d 4h`-style rendering for ages and thresholds.
pub fn format_age(age: chrono::Duration) -> String {
    let days = age.num_days();
    let hours = age.num_hours() - days * 24;
    match (days, hours) {
        (0, 0) => format!("{}m", age.num_minutes()),
        (0, hours) => format!("{hours}h"),
        (days, 0) => format!("{days}d"),
        (days, hours) => format!("{days}d {hours}h"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn format_age_picks_the_largest_units() {
        assert_eq!(format_age(Duration::minutes(42)), "42m");
        assert_eq!(format_age(Duration::hours(5)), "5h");
        assert_eq!(format_age(Duration::days(14)), "14d");
        assert_eq!(format_age(Duration::hours(75)), "3d 3h");
    }
}
