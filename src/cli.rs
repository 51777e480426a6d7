use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Keeps a configured set of OS services running")]
pub struct Args {
    /// Read monitoring configuration from this TOML file instead of the platform default
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Sub‑commands (run, service, install, etc.)
    #[command(subcommand)]
    pub sub: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Supervise in the foreground until interrupted (default if no sub‑command)
    Run { name: Option<String> },
    /// Supervise as a managed service; only meaningful when launched by the service manager
    Service { name: Option<String> },
    /// Register this executable as a managed service
    Install { name: Option<String> },
    /// Unregister the managed service, stopping it first if needed
    Delete { name: Option<String> },
    /// Ask the service manager to start the service
    Start { name: Option<String> },
    /// Ask the service manager to stop the service
    Stop { name: Option<String> },
}

impl Cmd {
    pub fn name(&self) -> Option<&str> {
        match self {
            Cmd::Run { name }
            | Cmd::Service { name }
            | Cmd::Install { name }
            | Cmd::Delete { name }
            | Cmd::Start { name }
            | Cmd::Stop { name } => name.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_no_subcommand() {
        let args = Args::try_parse_from(["svcrestarter"]).unwrap();
        assert!(args.sub.is_none());
        assert!(args.config.is_none());
    }

    #[test]
    fn parses_verb_name_and_global_config() {
        let args =
            Args::try_parse_from(["svcrestarter", "service", "keeper", "--config", "/etc/k.toml"])
                .unwrap();
        let sub = args.sub.unwrap();
        assert!(matches!(sub, Cmd::Service { .. }));
        assert_eq!(sub.name(), Some("keeper"));
        assert_eq!(args.config, Some(PathBuf::from("/etc/k.toml")));
    }

    #[test]
    fn name_is_optional() {
        let args = Args::try_parse_from(["svcrestarter", "install"]).unwrap();
        assert_eq!(args.sub.unwrap().name(), None);
    }

    #[test]
    fn rejects_unknown_verbs() {
        assert!(Args::try_parse_from(["svcrestarter", "restart"]).is_err());
    }
}
