mod cli;

use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, error};
use svc_restarter::{ServiceName, control, logging};

fn main() {
    let args = cli::Args::parse();
    let cmd = args.sub.unwrap_or(cli::Cmd::Run { name: None });

    // Service mode configures logging from its own store once the name is known.
    if !matches!(cmd, cli::Cmd::Service { .. }) {
        logging::init_stderr(LevelFilter::Info);
    }

    if let Err(e) = real_main(cmd, args.config.as_deref()) {
        if log::log_enabled!(log::Level::Error) {
            error!("{e:#}");
        } else {
            eprintln!("{e:#}");
        }
        std::process::exit(1);
    }
}

fn real_main(cmd: cli::Cmd, config: Option<&std::path::Path>) -> Result<()> {
    let name = ServiceName::resolve(cmd.name())?;

    match cmd {
        cli::Cmd::Run { .. } => control::run_console(&name, config),
        cli::Cmd::Service { .. } => control::run_service(&name, config),
        cli::Cmd::Install { .. } => {
            control::install(&name, config)?;
            println!("{name} installed");
            Ok(())
        }
        cli::Cmd::Delete { .. } => {
            control::delete(&name)?;
            println!("{name} deleted");
            Ok(())
        }
        cli::Cmd::Start { .. } => {
            control::start(&name)?;
            println!("{name} start requested");
            Ok(())
        }
        cli::Cmd::Stop { .. } => {
            control::stop(&name)?;
            println!("{name} stop requested");
            Ok(())
        }
    }
}
