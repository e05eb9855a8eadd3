use crate::cli::EngineArgs;
use crate::support;
use brdata_core::DatasetFilter;
use serde_json::json;

pub fn run(
    args: &EngineArgs,
    org: Option<String>,
    geography: Option<String>,
    category: Option<String>,
    json_output: bool,
) {
    let (_, engine) = support::load_engine_or_exit(args);
    let filter = DatasetFilter {
        source: org,
        geography,
        category,
    };
    let datasets = engine.list_datasets(&filter);

    if json_output {
        support::print_json(&json!({
            "action": "list",
            "count": datasets.len(),
            "datasets": datasets,
        }));
        return;
    }

    println!("brdata list\n  Datasets: {}", datasets.len());
    for dataset in &datasets {
        let tables = if dataset.tables.is_empty() {
            String::new()
        } else {
            format!(" [{}]", dataset.tables.join(", "))
        };
        println!(
            "  - {} ({}, {}){}\n      {}",
            dataset.name, dataset.source, dataset.update_frequency, tables, dataset.title
        );
    }
}
