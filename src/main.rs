use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use step_runner::{Changes, Runner, Settings, continuation, logging};

#[derive(Parser)]
#[command(name = "step-runner")]
#[command(about = "Build-then-run step plans with fail-fast semantics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory to read .step-runner/config.toml from
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Append logs to this file (bare flag: a timestamped file under the
    /// config dir)
    #[arg(long, global = true, num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,

    /// Run a sample checkout plan
    Demo {
        /// Make the payment step fail
        #[arg(long)]
        fail: bool,

        /// Override the async batch timeout
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.dir.as_deref())?;
    settings.logging.debug |= cli.debug;
    settings.logging.quiet |= cli.quiet;
    let run_name = match &cli.command {
        Commands::Config => "config",
        Commands::Demo { .. } => "demo",
    };
    if let Some(path) = logging::resolve_log_file(cli.log_file, run_name)? {
        settings.logging.file = Some(path);
    }
    settings.validate()?;

    logging::init_logging(
        settings.logging.debug,
        settings.logging.quiet,
        settings.logging.file.clone(),
    )?;

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings)?);
        }

        Commands::Demo { fail, timeout_ms } => {
            if let Some(ms) = timeout_ms {
                settings.runner = settings.runner.with_timeout(Duration::from_millis(ms));
            }

            match checkout(Runner::new(settings.runner), fail).finish().await {
                Ok(changes) => {
                    println!("{}", serde_json::to_string_pretty(&changes)?);
                }
                Err(failure) => {
                    eprintln!("✗ {}", failure);
                    println!("{}", serde_json::to_string_pretty(&failure.changes)?);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn int(changes: &Changes, key: &str) -> i64 {
    changes.get(key).and_then(Value::as_i64).unwrap_or_default()
}

/// Sample plan touching every step kind
fn checkout(runner: Runner, decline: bool) -> Runner {
    runner
        .put("order_id", 1042)
        .put("quantity", 3)
        .run_async("stock", |c| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!({ "available": int(&c, "quantity") <= 5 }))
        })
        .run_async("unit_price", |_| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(json!(1250))
        })
        .run("total", |c| Ok(json!(int(c, "unit_price") * int(c, "quantity"))))
        .branch(
            |c| int(c, "total") > 3000,
            |r| r.put("discount", 250),
        )
        .switch(move |c| {
            let in_stock = c
                .get("stock")
                .and_then(|s| s.get("available"))
                .and_then(Value::as_bool)
                .unwrap_or(false);

            if !in_stock {
                continuation(|r| r.put("backorder", true))
            } else if decline {
                continuation(|r| r.run("payment", |_| Err(json!("card declined"))))
            } else {
                continuation(|r| {
                    r.run("payment", |c| {
                        Ok(json!({
                            "charged": int(c, "total") - int(c, "discount"),
                            "status": "captured",
                        }))
                    })
                })
            }
        })
}
