mod health;
pub(crate) mod helpers;
mod instances;
mod rules;

use anyhow::Result;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    Health(health::HealthArgs),
    #[command(subcommand)]
    Instances(instances::InstancesCmd),
    Rules(rules::RulesArgs),
}

pub async fn run(opts: crate::Opts) -> Result<()> {
    let mode = opts.output_mode();
    let server = opts.server.clone();
    let config = opts.config.clone();

    match opts.cmd {
        Commands::Health(args) => health::execute(args, mode, server, config).await,
        Commands::Instances(cmd) => instances::execute(cmd, mode, server, config).await,
        Commands::Rules(args) => rules::execute(args, mode, server, config).await,
    }
}
