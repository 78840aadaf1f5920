use anyhow::Result;
use clap::Args;

use super::helpers;
use crate::output::{print_error, print_info, print_json, print_success, OutputMode};

#[derive(Args)]
pub struct HealthArgs;

pub async fn execute(
    _args: HealthArgs,
    mode: OutputMode,
    server: Option<String>,
    config_path: Option<String>,
) -> Result<()> {
    let base = helpers::resolve_base_url(server.as_deref(), config_path.as_deref())?;
    let reachable = reqwest::get(format!("{base}/healthz")).await.is_ok();

    match mode {
        OutputMode::Json => print_json(&serde_json::json!({
            "server": base,
            "reachable": reachable,
        }))?,
        OutputMode::Human => {
            if reachable {
                print_success("engine reachable");
            } else {
                print_error("engine unreachable");
            }
            print_info("Server", &base);
        }
    }

    Ok(())
}
