use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

mod cache;
mod chain;
mod commands;
mod config;
mod convert;
mod source;
mod target;
mod tooling;
mod ui;
mod utils;

use commands::migrate::MigrateArgs;
use config::Config;
use source::SourceKind;

pub struct AppCtx {
    pub cfg: Config,
}

#[derive(Parser, Debug)]
#[command(
    name = "chain2raw",
    about = "Flatten a Hyper-V or XenServer differencing-disk chain into a raw image",
    arg_required_else_help = false,
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Optional TOML config; built-in defaults apply without it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    debug: bool,

    #[arg(long, global = true)]
    check_config: bool,

    #[arg(long, global = true)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Migrate a Hyper-V VHDX/AVHDX snapshot chain
    Hyperv(MigrateArgs),
    /// Migrate a XenServer VHD snapshot chain
    Xenserver(MigrateArgs),
}

fn init_tracing(debug: bool) {
    let default = if debug { "trace" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(debug)
        .with_line_number(debug)
        .without_time()
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if cli.command.is_none() && !cli.check_config && !cli.print_config {
        let mut cmd = Cli::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    }
    let cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if cli.check_config {
        tracing::info!("config OK");
        return Ok(());
    }
    if cli.print_config {
        println!("{}", cfg.to_toml()?);
        return Ok(());
    }

    let Some(cmd) = cli.command else {
        let mut cmd = Cli::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let ctx = AppCtx { cfg };

    match cmd {
        Cmd::Hyperv(args) => args.run(&ctx, SourceKind::HyperV),
        Cmd::Xenserver(args) => args.run(&ctx, SourceKind::XenServer),
    }
}
