use crate::cli::{CacheCommands, EngineArgs};
use crate::support;
use brdata_store::ClearScope;
use chrono::Utc;
use serde_json::json;

pub fn run(args: &EngineArgs, command: CacheCommands) {
    match command {
        CacheCommands::Status { json } => run_status(args, json),
        CacheCommands::List { json } => run_list(args, json),
        CacheCommands::Clear { names, all, json } => run_clear(args, names, all, json),
        CacheCommands::Update { names, json } => run_update(args, names, json),
    }
}

fn run_status(args: &EngineArgs, json_output: bool) {
    let (_, engine) = support::load_engine_or_exit(args);
    let rows = engine.check_cache_status(Utc::now()).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    });

    if json_output {
        support::print_json(&json!({
            "action": "cache.status",
            "cacheDir": engine.cache().root().display().to_string(),
            "datasets": rows,
        }));
        return;
    }

    let stale = rows.iter().filter(|row| row.stale).count();
    println!(
        "brdata cache status\n  Cache: {}\n  Datasets: {} ({} stale or missing)",
        engine.cache().root().display(),
        rows.len(),
        stale
    );
    for row in &rows {
        let age = row
            .age
            .map(support::format_age)
            .unwrap_or_else(|| "not cached".to_string());
        let threshold = row
            .threshold
            .map(support::format_age)
            .unwrap_or_else(|| "never".to_string());
        let state = if row.stale { "STALE" } else { "ok" };
        println!(
            "  - {:<16} {:<6} age {:<12} stale after {}",
            row.name, state, age, threshold
        );
    }
}

fn run_list(args: &EngineArgs, json_output: bool) {
    let (_, engine) = support::load_engine_or_exit(args);
    let rows = engine.cache().list().unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    });

    if json_output {
        support::print_json(&json!({
            "action": "cache.list",
            "cacheDir": engine.cache().root().display().to_string(),
            "count": rows.len(),
            "entries": rows,
        }));
        return;
    }

    println!(
        "brdata cache list\n  Cache: {}\n  Entries: {}",
        engine.cache().root().display(),
        rows.len()
    );
    for row in &rows {
        println!(
            "  - {} ({}, {} bytes, cached {})",
            row.name,
            row.format,
            row.size_bytes,
            row.cached_at.to_rfc3339()
        );
    }
}

fn run_clear(args: &EngineArgs, names: Vec<String>, all: bool, json_output: bool) {
    if !all && names.is_empty() {
        eprintln!("error: name at least one dataset, or pass --all");
        std::process::exit(1);
    }
    let scope = if all {
        ClearScope::All
    } else {
        ClearScope::Names(names)
    };

    let (_, engine) = support::load_engine_or_exit(args);
    let removed = engine.clear_cache(&scope).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    });

    if json_output {
        support::print_json(&json!({
            "action": "cache.clear",
            "all": all,
            "removed": removed,
        }));
        return;
    }

    println!("brdata cache clear\n  Removed: {}", removed.len());
    for name in &removed {
        println!("  - {name}");
    }
}

fn run_update(args: &EngineArgs, names: Vec<String>, json_output: bool) {
    let (_, engine) = support::load_engine_or_exit(args);
    let scope = if names.is_empty() {
        None
    } else {
        Some(names.as_slice())
    };
    let report = engine
        .update_cache_from_remote(scope, Utc::now())
        .unwrap_or_else(|e| {
            eprintln!("error: {e}");
            std::process::exit(1);
        });

    if json_output {
        support::print_json(&json!({
            "action": "cache.update",
            "updated": report.updated,
            "failed": report.failed,
        }));
    } else {
        println!(
            "brdata cache update\n  Updated: {}\n  Failed: {}",
            report.updated.len(),
            report.failed.len()
        );
        for name in &report.updated {
            println!("  + {name}");
        }
        for failure in &report.failed {
            println!("  ! {}: {}", failure.name, failure.reason);
        }
    }

    if !report.failed.is_empty() && report.updated.is_empty() {
        std::process::exit(1);
    }
}
