use anyhow::Result;
use clap::Subcommand;

use super::helpers;
use crate::output::{print_info, print_json, print_success, OutputMode};

#[derive(Subcommand)]
pub enum InstancesCmd {
    List,
    Get(GetArgs),
}

#[derive(clap::Args)]
pub struct GetArgs {
    #[arg(help = "Rule name")]
    rule: String,
    #[arg(help = "Process id")]
    pid: u32,
}

pub async fn execute(
    cmd: InstancesCmd,
    mode: OutputMode,
    server: Option<String>,
    config_path: Option<String>,
) -> Result<()> {
    let base = helpers::resolve_base_url(server.as_deref(), config_path.as_deref())?;

    match cmd {
        InstancesCmd::List => {
            let instances = helpers::get_json(&base, "/instances").await?;
            match mode {
                OutputMode::Json => print_json(&instances)?,
                OutputMode::Human => {
                    let list = instances.as_array().cloned().unwrap_or_default();
                    print_success(&format!("{} active instance(s)", list.len()));
                    for inst in list {
                        let rule = inst["rule"].as_str().unwrap_or("?");
                        let pid = inst["pid"].as_u64().unwrap_or(0);
                        let state = inst["state"].as_str().unwrap_or("?");
                        let admitted = inst["admitted_total"].as_u64().unwrap_or(0);
                        print_info(
                            &format!("{rule}/{pid}"),
                            &format!("{state}, {admitted} admitted"),
                        );
                    }
                }
            }
        }
        InstancesCmd::Get(args) => {
            let path = format!("/instances/{}/{}", args.rule, args.pid);
            let instance = helpers::get_json(&base, &path).await?;
            match mode {
                OutputMode::Json => print_json(&instance)?,
                OutputMode::Human => {
                    print_success(&format!("{}/{}", args.rule, args.pid));
                    print_info("State", instance["state"].as_str().unwrap_or("?"));
                    print_info(
                        "Fired",
                        &instance["fired_total"].as_u64().unwrap_or(0).to_string(),
                    );
                    print_info(
                        "Admitted",
                        &instance["admitted_total"].as_u64().unwrap_or(0).to_string(),
                    );
                    print_info(
                        "Throttled",
                        &instance["throttled_total"].as_u64().unwrap_or(0).to_string(),
                    );
                    if let Some(err) = instance["last_error"].as_object() {
                        print_info("Last error", &serde_json::Value::Object(err.clone()).to_string());
                    }
                }
            }
        }
    }

    Ok(())
}
