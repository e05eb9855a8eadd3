use crate::cli::EngineArgs;
use crate::support;
use chrono::Utc;
use serde_json::json;

pub fn run(args: &EngineArgs, name: String, json_output: bool) {
    let (_, engine) = support::load_engine_or_exit(args);
    let info = engine.get_dataset_info(&name, Utc::now()).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    });

    if json_output {
        support::print_json(&json!({
            "action": "info",
            "dataset": info,
        }));
        return;
    }

    let descriptor = &info.descriptor;
    println!("brdata info\n  Dataset: {}", descriptor.name);
    println!("  Title: {}", descriptor.title);
    if !descriptor.description.is_empty() {
        println!("  Description: {}", descriptor.description);
    }
    println!("  Source: {}", descriptor.source);
    println!("  Geography: {}", descriptor.geography);
    if !descriptor.categories.is_empty() {
        println!("  Categories: {}", descriptor.categories.join(", "));
    }
    println!("  Update frequency: {}", descriptor.update_frequency);
    println!("  Fetch binding: {}", descriptor.fetch_binding);
    if descriptor.tables.is_empty() {
        println!("  Tables: (single table)");
    } else {
        println!("  Tables:");
        for table in &descriptor.tables {
            let marker = if table.is_default { " (default)" } else { "" };
            match &table.title {
                Some(title) => println!("    - {}{marker}: {title}", table.key),
                None => println!("    - {}{marker}", table.key),
            }
        }
    }

    let cache = &info.cache;
    match (cache.cached_at, cache.age) {
        (Some(cached_at), Some(age)) => println!(
            "  Cache: {} ({} old, {})",
            cached_at.to_rfc3339(),
            support::format_age(age),
            if cache.stale { "stale" } else { "fresh" }
        ),
        _ => println!("  Cache: not cached"),
    }
}
