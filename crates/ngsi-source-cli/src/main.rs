//! # NGSI Source CLI
//!
//! Command-line utilities for inspecting entity formats and configuration.

use anyhow::{Context, Result};
use ngsi_source_agent::AgentConfig;
use ngsi_source_core::{normalized_to_key_values, MetadataExport};
use serde_json::Value;
use std::env;
use std::io::Read;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "flatten" => {
            let input = match args.get(2) {
                Some(json) if json != "-" => json.clone(),
                _ => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("Failed to read stdin")?;
                    buffer
                }
            };
            let entities: Value =
                serde_json::from_str(&input).context("Input is not valid JSON")?;
            let flattened = match &entities {
                Value::Array(batch) => {
                    Value::Array(batch.iter().map(normalized_to_key_values).collect())
                }
                entity => normalized_to_key_values(entity),
            };
            println!("{}", serde_json::to_string_pretty(&flattened)?);
        }
        "metadata" => {
            let config = AgentConfig::from_env().context("Failed to load configuration")?;
            let metadata = MetadataExport::from_config(&config.source)
                .to_value()
                .context("Failed to build metadata")?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"NGSI source CLI

USAGE:
    ngsi-source <COMMAND> [OPTIONS]

COMMANDS:
    flatten [json|-]  Convert normalized entities to key-values (reads stdin by default)
    metadata          Print the metadata export for the NGSI_SOURCE_* configuration
    help              Show this help message

EXAMPLES:
    ngsi-source flatten '{{"id":"e1","type":"T","a":{{"value":5}}}}'
    NGSI_SOURCE_ENTITY_TYPES=Room ngsi-source metadata
"#
    );
}
