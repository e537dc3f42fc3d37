use serde_json::{json, Value};
use std::time::Duration;

use crate::cli::utils::{output_error, output_success};
use crate::cli::OutputFormat;

pub async fn handle(url: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;

    let response = match client.get(&health_url).send().await {
        Ok(response) => response,
        Err(e) => {
            output_error(&output_format, &format!("{} is unreachable: {}", url, e), Some("UNREACHABLE"))?;
            anyhow::bail!("health check failed");
        }
    };

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if status.is_success() {
        output_success(
            &output_format,
            &format!("{} is healthy", url),
            Some(json!({ "status": status.as_u16(), "health": body })),
        )
    } else {
        output_error(
            &output_format,
            &format!("{} responded with {}", url, status),
            Some("UNHEALTHY"),
        )?;
        anyhow::bail!("health check failed")
    }
}
