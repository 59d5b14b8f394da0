use std::{process, sync::Arc};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cascade::{
    cli::Cli, config::load_config, error::Result, registry::TaskRegistry, tasks,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);

    match run_cascade(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "cascade=debug,tower_http=debug"
    } else {
        "cascade=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

async fn run_cascade(args: Cli) -> Result<()> {
    let mut config = load_config(&args.file)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let registry = Arc::new(TaskRegistry::new());
    let session = tasks::register_builtin_tasks(&registry, &config)?;

    let task = args.task.as_deref().unwrap_or("default");

    if args.dry_run {
        let order = registry.execution_order(task)?;
        println!("Task execution order: {}", order.join(" -> "));
        return Ok(());
    }

    registry.run(task).await?;

    // Serving tasks leave a live server behind; stay up until Ctrl-C.
    if session.is_serving() {
        info!("press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        info!("shutting down");
    }

    Ok(())
}
