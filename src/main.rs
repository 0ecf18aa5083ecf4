use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use diffbot_launch::launch::parse_override;
use diffbot_launch::{Env, LaunchDescription, Launcher, OutputMode, ParamValue};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "diffbot-launch",
    version,
    about = "Bring up the diffbot state publishers, RViz and ros2_control"
)]
struct Cli {
    /// Colon-separated ament prefixes. Defaults to `AMENT_PREFIX_PATH`.
    #[arg(long, global = true)]
    prefix_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the declared launch arguments and their defaults.
    ShowArgs,
    /// Print the launch description and resolved configurations as JSON.
    Describe {
        /// Launch argument overrides (`name:=value`).
        args: Vec<String>,
    },
    /// Spawn every node and supervise them until Ctrl-C.
    Run {
        /// Launch argument overrides (`name:=value`).
        args: Vec<String>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stdout).compact())
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(err) = run().await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let env = match &cli.prefix_path {
        Some(path) => Env::from_path(path),
        None => Env::from_env()?,
    };

    match cli.command {
        Command::ShowArgs => cmd_show_args(&env),
        Command::Describe { args } => cmd_describe(&env, &args),
        Command::Run { args } => cmd_run(&env, &args).await,
    }
}

fn parse_overrides(args: &[String]) -> Result<Vec<(String, String)>> {
    args.iter().map(|a| parse_override(a)).collect()
}

fn cmd_show_args(env: &Env) -> Result<()> {
    let description = diffbot_launch::generate_launch_description(env)?;
    println!("Arguments (pass arguments as '<name>:=<value>'):\n");
    for arg in description.arguments() {
        println!("    '{}':", arg.name);
        println!("        {}", arg.description);
        println!("        (default: '{}')\n", arg.default_value);
    }
    Ok(())
}

fn cmd_describe(env: &Env, args: &[String]) -> Result<()> {
    let description = diffbot_launch::generate_launch_description(env)?;
    let configs = description.configurations(&parse_overrides(args)?)?;
    let document = serde_json::json!({
        "configurations": configs,
        "description": description,
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn warn_on_empty_description(description: &LaunchDescription) {
    let empty = ParamValue::String(String::new());
    for node in description.nodes() {
        if node.parameter_value("robot_description") == Some(&empty) {
            tracing::warn!(
                node = node.display_name(),
                "robot_description is empty, the node will likely fail"
            );
        }
    }
}

async fn cmd_run(env: &Env, args: &[String]) -> Result<()> {
    let description = diffbot_launch::generate_launch_description(env)?;
    let configs = description.configurations(&parse_overrides(args)?)?;
    warn_on_empty_description(&description);

    let mut launcher = Launcher::new();
    for node in description.nodes() {
        let result = match launcher.launch_node(node, &configs, env).await {
            Ok(result) => result,
            Err(e) => {
                launcher.stop_all().await?;
                return Err(e).with_context(|| format!("Failed to launch {}", node.display_name()));
            }
        };

        tracing::debug!(node = %result.name, "Logging to {}", result.log_path.display());
        let prefix = format!("[{}-{}]", result.name, result.pid);
        let screen = result.output == OutputMode::Screen;
        let mut output_rx = result.output_rx;
        tokio::spawn(async move {
            while let Some(line) = output_rx.recv().await {
                if screen {
                    println!("{prefix} {line}");
                }
            }
        });
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = ticker.tick() => {
                launcher.cleanup_exited();
                if launcher.is_empty() {
                    tracing::info!("All processes have exited");
                    break;
                }
            }
        }
    }

    launcher.stop_all().await
}
