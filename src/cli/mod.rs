use clap::Parser;

use crate::config::WebWalletConfig;
use crate::error::ConfigError;

#[derive(Parser, Debug)]
#[command(name = "scp-webwallet")]
#[command(about = "ScPrime Web Wallet", long_about = None)]
pub struct Cli {
    /// Config file, created with defaults when missing
    #[arg(long, default_value = "webwallet.toml")]
    pub config: String,
    /// Port of the wallet server
    #[arg(long)]
    pub port: Option<u16>,
    /// Node data directory
    #[arg(long)]
    pub dir: Option<String>,
    /// Listen on all interfaces and skip the browser
    #[arg(long)]
    pub headless: bool,
    /// Always build the consensus set locally
    #[arg(long)]
    pub no_bootstrap: bool,
    #[arg(long)]
    pub bootstrap_url: Option<String>,
    /// Default log level when RUST_LOG is unset
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Flags win over the config file.
    pub fn apply(&self, config: &mut WebWalletConfig) -> Result<(), ConfigError> {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = &self.dir {
            config.node.dir = dir.clone();
        }
        if self.headless {
            config.server.headless = true;
        }
        if self.no_bootstrap {
            config.node.bootstrap = false;
        }
        if let Some(url) = &self.bootstrap_url {
            config.node.bootstrap_url = url.clone();
        }
        if let Some(level) = &self.log_level {
            config.server.log_level = level.clone();
        }
        config.validate()
    }
}
