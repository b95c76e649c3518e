use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vpnshop-panel")]
#[command(about = "VPN subscription shop: bot, payment webhooks and ledger", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Start the web server, the bot and the stale purchase sweep
    Serve,
    /// Apply database migrations and exit
    Migrate,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default() {
        let cli = Cli::parse_from(["vpnshop-panel"]);
        assert_eq!(cli.command(), Commands::Serve);
        let cli = Cli::parse_from(["vpnshop-panel", "migrate"]);
        assert_eq!(cli.command(), Commands::Migrate);
    }
}
