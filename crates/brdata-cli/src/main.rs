//! brdata CLI: the `brdata` command.

mod cli;
mod commands;
mod support;

use clap::Parser;
use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    support::init_logging(cli.engine.quiet);
    let engine = &cli.engine;

    match cli.command {
        Commands::List {
            org,
            geography,
            category,
            json,
        } => commands::list::run(engine, org, geography, category, json),

        Commands::Info { name, json } => commands::info::run(engine, name, json),

        Commands::Get {
            name,
            table,
            source,
            start,
            end,
            max_age_days,
            miss_policy,
            limit,
            json,
        } => commands::get::run(
            engine,
            commands::get::Args {
                name,
                table,
                source,
                start,
                end,
                max_age_days,
                miss_policy,
                limit,
                json,
            },
        ),

        Commands::Cache { command } => commands::cache::run(engine, command),

        Commands::Remote { command } => commands::remote::run(engine, command),
    }
}
