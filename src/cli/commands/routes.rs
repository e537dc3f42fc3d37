use anyhow::Context;

use crate::api::API_PREFIX;
use crate::cli::utils::output_table;
use crate::cli::OutputFormat;
use crate::config::{config, SchemaConfig};
use crate::handlers::resource_modules;
use crate::router::RouteTable;
use crate::schema::Registry;

pub fn handle(schema: Option<String>, output_format: OutputFormat) -> anyhow::Result<()> {
    let registry = match schema {
        Some(path) => Registry::from_config(&SchemaConfig { path: Some(path) }),
        None => Registry::from_config(&config().schema),
    }
    .context("failed to load resource schema")?;

    let table = RouteTable::build(&registry, resource_modules())?;
    let rows: Vec<Vec<String>> = table
        .routes()
        .iter()
        .map(|b| vec![b.method.to_string(), format!("{}{}", API_PREFIX, b.path), b.source.to_string()])
        .collect();
    output_table(&output_format, &["method", "path", "source"], &rows)
}
