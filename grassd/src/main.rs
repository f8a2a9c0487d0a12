use std::path::PathBuf;

use grassd::config::{SessionSource, SyncConfig};
use grassd::daemon::{Command, GrassDaemon};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: grassd <command> [args]
  upload <cloud-path> <local-file>   Store a new file in your tree
  update <cloud-path> <local-file>   Replace the content of a file you own
  fetch <cloud-path>                 Download (or reuse the cached copy) and print its path
  delete <cloud-path>                Remove a file you own
  list [cloud-path]                  List a folder of your tree (default: root)
  shared                             List users who shared files with you";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run(Command),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(name) = args.next() else {
        return Ok(CliMode::Help);
    };
    let rest: Vec<String> = args.collect();
    let command = match (name.as_str(), rest.as_slice()) {
        ("--help" | "-h" | "help", _) => return Ok(CliMode::Help),
        ("upload", [path, local]) => Command::Upload {
            path: path.clone(),
            local: PathBuf::from(local),
        },
        ("update", [path, local]) => Command::Update {
            path: path.clone(),
            local: PathBuf::from(local),
        },
        ("fetch", [path]) => Command::Fetch { path: path.clone() },
        ("delete", [path]) => Command::Delete { path: path.clone() },
        ("list", []) => Command::List { path: "/".into() },
        ("list", [path]) => Command::List { path: path.clone() },
        ("shared", []) => Command::Shared,
        ("upload" | "update" | "fetch" | "delete" | "list" | "shared", _) => {
            anyhow::bail!("wrong number of arguments for {name}")
        }
        (other, _) => anyhow::bail!("unknown command: {other}"),
    };
    Ok(CliMode::Run(command))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("grassd=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let command = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("{USAGE}");
            return Ok(());
        }
        CliMode::Run(command) => command,
    };

    let config = SyncConfig::from_env()?;
    let source = SessionSource::from_env()?;
    let daemon = GrassDaemon::bootstrap(config, source).await?;
    let outcome = daemon.run(command).await;
    daemon.shutdown().await?;
    let text = outcome?.to_string();
    if text.ends_with('\n') {
        print!("{text}");
    } else {
        println!("{text}");
    }
    Ok(())
}
