use crate::cli::{EngineArgs, RemoteCommands};
use crate::support;
use serde_json::json;

pub fn run(args: &EngineArgs, command: RemoteCommands) {
    match command {
        RemoteCommands::List { json } => run_list(args, json),
    }
}

fn run_list(args: &EngineArgs, json_output: bool) {
    let (_, engine) = support::load_engine_or_exit(args);
    let names = engine.list_remote().unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    });
    let location = engine
        .remote()
        .map(|remote| remote.describe())
        .unwrap_or_default();

    if json_output {
        support::print_json(&json!({
            "action": "remote.list",
            "remote": location,
            "count": names.len(),
            "artifacts": names,
        }));
        return;
    }

    println!(
        "brdata remote list\n  Remote: {location}\n  Artifacts: {}",
        names.len()
    );
    for name in &names {
        let marker = if engine.registry().get(name).is_some() {
            ""
        } else {
            " (not in registry)"
        };
        println!("  - {name}{marker}");
    }
}
