use std::process;

use clap::Parser;

use wms_admin::{run, warehouse, Backend, Cli};
use wms_infra::WmsConfig;

#[tokio::main]
async fn main() {
    wms_observability::init();
    let cli = Cli::parse();

    let code = match execute(&cli).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            1
        }
    };
    process::exit(code);
}

async fn execute(cli: &Cli) -> anyhow::Result<()> {
    let config = WmsConfig::from_env()?;
    let backend = Backend::open(&config).await?;
    let warehouse = warehouse(&backend);

    let result = run(&cli.command, &backend, &warehouse).await;
    backend.close().await;

    let report = result?;
    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{rendered}");
    Ok(())
}
