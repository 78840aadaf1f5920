use anyhow::Result;
use clap::Args;

use super::helpers;
use crate::output::{print_error, print_info, print_json, print_success, OutputMode};

#[derive(Args)]
pub struct RulesArgs;

pub async fn execute(
    _args: RulesArgs,
    mode: OutputMode,
    server: Option<String>,
    config_path: Option<String>,
) -> Result<()> {
    let base = helpers::resolve_base_url(server.as_deref(), config_path.as_deref())?;
    let rules = helpers::get_json(&base, "/rules").await?;

    match mode {
        OutputMode::Json => print_json(&rules)?,
        OutputMode::Human => {
            let generation = rules["generation"].as_u64().unwrap_or(0);
            print_success(&format!("rule generation {generation}"));
            for rule in rules["rules"].as_array().cloned().unwrap_or_default() {
                let name = rule["name"].as_str().unwrap_or("?");
                let actions = rule["actions"].as_array().map(|a| a.len()).unwrap_or(0);
                print_info(name, &format!("{actions} action(s)"));
            }
            for inert in rules["inert"].as_array().cloned().unwrap_or_default() {
                let name = inert["name"].as_str().unwrap_or("?");
                let error = inert["error"].as_str().unwrap_or("?");
                print_error(&format!("{name} (inert): {error}"));
            }
        }
    }

    Ok(())
}
