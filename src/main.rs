//! portassign - assign a backend port to a subdomain and provision its vhost
//!
//! Usage:
//!   portassign [options] <name>           Assign ports and write PM2/nginx config
//!   portassign [options] assign <name>    Same as above
//!   portassign [options] show <name>      Show ports without writing anything
//!   portassign [options] list             List backend port assignments
//!
//! Options:
//!   -c, --config <path>    Config file (default: $PORTASSIGN_CONFIG or ./portassign.toml)
//!   --registry-only        Only update the port registry
//!   --json                 Report errors as JSON on stderr

use anyhow::Result;
use portassign::config::{Config, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE};
use portassign::error::{ErrorReport, PortError};
use portassign::provision::Provisioner;
use portassign::registry::FileRegistry;
use portassign::{PKG_NAME, VERSION};
use std::env;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, PartialEq)]
enum Command {
    Assign { name: String, registry_only: bool },
    Show { name: String },
    List,
    Help,
    Version,
}

#[derive(Debug, PartialEq)]
struct Options {
    config: Option<PathBuf>,
    command: Command,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Logs go to stderr; stdout carries only the result
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("portassign=info".parse().expect("valid log directive")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let json = args.iter().any(|a| a == "--json");

    if let Err(e) = run(&args).await {
        if json {
            eprintln!("{}", ErrorReport::from_anyhow(&e).to_json());
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run(args: &[String]) -> Result<()> {
    let options = parse_args(args)?;

    match options.command {
        Command::Help => print_help(),
        Command::Version => println!("{} {}", PKG_NAME, VERSION),
        Command::Assign { name, registry_only } => {
            let mut provisioner = load_provisioner(options.config)?;
            let assignment = if registry_only {
                provisioner.assign(&name)?
            } else {
                provisioner.provision(&name).await?.0
            };
            println!("{}", serde_json::to_string_pretty(&assignment)?);
        }
        Command::Show { name } => {
            let report = load_provisioner(options.config)?.show(&name)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::List => {
            let provisioner = load_provisioner(options.config)?;
            for mapping in provisioner.assigner().backend_mappings()? {
                println!("{}", mapping);
            }
        }
    }

    Ok(())
}

fn load_provisioner(config_path: Option<PathBuf>) -> Result<Provisioner<FileRegistry, FileRegistry>> {
    // A path named by flag or env var must exist; only the implicit file may be absent
    let config = match config_path.or_else(|| env::var_os(CONFIG_ENV_VAR).map(PathBuf::from)) {
        Some(path) => {
            let config = Config::load(&path)?;
            debug!(path = %path.display(), "Configuration loaded");
            config
        }
        None => Config::load_or_default(DEFAULT_CONFIG_FILE)?,
    };
    Ok(Provisioner::from_config(config))
}

fn parse_args(args: &[String]) -> Result<Options, PortError> {
    let mut config = None;
    let mut registry_only = false;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = iter.next().ok_or_else(|| {
                    PortError::InvalidArgument(format!("{} requires a path", arg))
                })?;
                config = Some(PathBuf::from(path));
            }
            // handled in main
            "--json" => {}
            "--registry-only" => registry_only = true,
            "-h" | "--help" => positional.insert(0, "help".to_string()),
            "-V" | "--version" => positional.insert(0, "version".to_string()),
            _ => positional.push(arg.clone()),
        }
    }

    let name_arg = |rest: &[String]| -> Result<String, PortError> {
        match rest.first() {
            Some(name) => Ok(name.clone()),
            None => Err(PortError::InvalidArgument("Subdomain is empty.".into())),
        }
    };

    let command = match positional.first().map(String::as_str) {
        None => return Err(PortError::InvalidArgument("Subdomain is empty.".into())),
        Some("help") => Command::Help,
        Some("version") => Command::Version,
        Some("list" | "ls") => Command::List,
        Some("show" | "info") => Command::Show {
            name: name_arg(&positional[1..])?,
        },
        Some("assign") => Command::Assign {
            name: name_arg(&positional[1..])?,
            registry_only,
        },
        Some(name) => Command::Assign {
            name: name.to_string(),
            registry_only,
        },
    };

    Ok(Options { config, command })
}

fn print_help() {
    println!(
        r#"{} {}

Assigns a stable backend port to a subdomain and provisions its nginx vhost.

USAGE:
    portassign [OPTIONS] <name>
    portassign [OPTIONS] <COMMAND>

COMMANDS:
    assign <name>    Assign ports and write PM2/nginx config (default)
    show <name>      Show ports without writing anything
    list             List backend port assignments
    help             Show this message
    version          Show version

OPTIONS:
    -c, --config <path>    Config file (default: ${} or ./{})
    --registry-only        Only update the port registry
    --json                 Report errors as JSON on stderr

Set RUST_LOG to adjust log verbosity (default: portassign=info)."#,
        PKG_NAME, VERSION, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE
    );
}
