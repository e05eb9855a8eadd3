use crate::cli::{EngineArgs, MissPolicyArg, SourceArg};
use crate::support;
use brdata_engine::GetDataset;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::{Value, json};

pub struct Args {
    pub name: String,
    pub table: Option<String>,
    pub source: SourceArg,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub max_age_days: Option<u32>,
    pub miss_policy: Option<MissPolicyArg>,
    pub limit: usize,
    pub json: bool,
}

pub fn run(engine_args: &EngineArgs, args: Args) {
    let (config, engine) = support::load_engine_or_exit(engine_args);
    let source = support::map_source(args.source);
    let request = GetDataset {
        name: args.name.clone(),
        table: args.table,
        source,
        date_start: args.start,
        date_end: args.end,
        max_age: args.max_age_days.map(|days| Duration::days(i64::from(days))),
        miss_policy: args
            .miss_policy
            .map(support::map_miss_policy)
            .unwrap_or(config.miss_policy),
        quiet: engine_args.quiet,
        now: Utc::now(),
    };

    let envelope = engine.get_dataset(request).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    });

    let Some(envelope) = envelope else {
        if args.json {
            support::print_json(&json!({
                "action": "get",
                "dataset": args.name,
                "source": source.as_str(),
                "found": false,
            }));
        } else {
            println!(
                "brdata get\n  Dataset: {}\n  No data available from source `{source}`",
                args.name
            );
        }
        return;
    };

    if args.json {
        support::print_json(&json!({
            "action": "get",
            "found": true,
            "result": envelope,
        }));
        return;
    }

    let info = &envelope.metadata.info;
    println!("brdata get\n  Dataset: {}", info.dataset);
    if let Some(table) = &info.resolved_table {
        let marker = if info.is_default_table { " (default)" } else { "" };
        println!("  Table: {table}{marker}");
    }
    println!("  Source: {}", envelope.metadata.source);
    println!("  Fetched at: {}", envelope.metadata.fetched_at.to_rfc3339());
    println!("  Rows: {}", envelope.table.len());
    println!("  Columns: {}", envelope.table.columns().join(", "));
    for row in envelope.table.rows().iter().take(args.limit) {
        let cells: Vec<String> = row.iter().map(render_cell).collect();
        println!("    {}", cells.join("\t"));
    }
    if envelope.table.len() > args.limit {
        println!("    ... {} more rows", envelope.table.len() - args.limit);
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
