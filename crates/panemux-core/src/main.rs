use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, Command};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use panemux_agent::AgentCli;
use panemux_core::{Orchestrator, OrchestratorConfig, PaneId, RunEvent};
use panemux_vcs::GitCli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Command::new("panemux")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Pane lifecycle and merge-queue orchestrator")
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("base-path")
                .long("base-path")
                .value_parser(value_parser!(PathBuf))
                .help("Directory holding one checkout per pane"),
        )
        .arg(
            Arg::new("trunk")
                .long("trunk")
                .help("Integration branch (default: main)"),
        )
        .arg(
            Arg::new("remote")
                .long("remote")
                .help("Remote name (default: origin)"),
        )
        .arg(
            Arg::new("agent")
                .long("agent")
                .help("Change-agent binary (default: cursor-agent)"),
        )
        .arg(
            Arg::new("pool-size")
                .long("pool-size")
                .value_parser(value_parser!(u8))
                .help("Number of pane slots (default: 6)"),
        );

    let matches = cli.get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => OrchestratorConfig::from_toml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let base = matches
                .get_one::<PathBuf>("base-path")
                .context("--base-path (or --config) is required")?;
            OrchestratorConfig::new(base)
        }
    };
    if let Some(trunk) = matches.get_one::<String>("trunk") {
        config.trunk_branch = trunk.clone();
    }
    if let Some(remote) = matches.get_one::<String>("remote") {
        config.remote = remote.clone();
    }
    if let Some(agent) = matches.get_one::<String>("agent") {
        config.agent_program = agent.clone();
    }
    if let Some(pool) = matches.get_one::<u8>("pool-size") {
        config.pool_size = *pool;
    }

    let vcs = Arc::new(GitCli::new(config.remote.clone()));
    let agent = Arc::new(AgentCli::new(config.agent_program.clone()));
    let orchestrator = Orchestrator::new(config, vcs, agent);

    println!(
        "panemux console - commands: state | queue | create <id> | run <id> <instruction> | \
         merge <id> | discard <id> | title <id> [text] | quit"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }
        if let Err(err) = dispatch(&orchestrator, line).await {
            eprintln!("error: {err:#}");
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

async fn dispatch(orchestrator: &Orchestrator, line: &str) -> Result<()> {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    match command {
        "state" => {
            for snapshot in orchestrator.state().await {
                println!("{}", serde_json::to_string(&snapshot)?);
            }
        }
        "queue" => {
            println!("{}", serde_json::to_string(&orchestrator.merge_queue())?);
        }
        "create" => {
            let pane = parse_pane(parts.next())?;
            let branch = orchestrator.create_pane(pane).await?;
            println!("pane {pane} on branch {branch}");
        }
        "run" => {
            let pane = parse_pane(parts.next())?;
            let instruction = parts.next().context("usage: run <id> <instruction>")?;
            let mut stream = orchestrator.start_agent(pane, instruction).await?;
            while let Some(event) = stream.next().await {
                match event {
                    RunEvent::Output(text) => println!("{text}"),
                    RunEvent::Completed(exit) => {
                        println!("agent exited with code {:?}", exit.code);
                    }
                }
            }
        }
        "merge" => {
            let pane = parse_pane(parts.next())?;
            let newly_queued = orchestrator.enqueue_merge(pane).await?;
            println!(
                "{}",
                if newly_queued {
                    "queued"
                } else {
                    "already queued"
                }
            );
        }
        "discard" => {
            let pane = parse_pane(parts.next())?;
            orchestrator.discard(pane).await?;
            println!("pane {pane} back on trunk");
        }
        "title" => {
            let pane = parse_pane(parts.next())?;
            let title = parts.next().map(str::to_string);
            orchestrator.set_title(pane, title)?;
        }
        other => bail!("unknown command: {other}"),
    }
    Ok(())
}

fn parse_pane(arg: Option<&str>) -> Result<PaneId> {
    let raw = arg.context("missing pane id")?;
    let id: u8 = raw
        .parse()
        .with_context(|| format!("invalid pane id: {raw}"))?;
    Ok(PaneId(id))
}
