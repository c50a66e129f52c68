use std::path::PathBuf;

use api_gateway::MasterConfig;
use clap::Parser;

/// Run the Meridian master: the API server, the web console and the
/// controllers, in one process.
#[derive(Debug, Parser)]
#[command(name = "meridian-master", version, about)]
pub struct Args {
    /// YAML configuration file
    #[arg(long, short = 'c', env = "MERIDIAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "MERIDIAN_LOG_JSON")]
    pub log_json: bool,

    /// Address the API server listens on
    #[arg(long)]
    pub listen: Option<String>,

    /// Address the web console listens on
    #[arg(long)]
    pub asset_listen: Option<String>,

    /// URL clients use to reach the master
    #[arg(long)]
    pub master: Option<String>,

    /// URL the master advertises publicly, if it differs from --master
    #[arg(long)]
    pub public_master: Option<String>,

    /// Skip API documentation
    #[arg(long)]
    pub no_docs: bool,
}

impl Args {
    /// Command-line flags win over the file and the environment.
    pub fn apply(&self, config: &mut MasterConfig) {
        if let Some(addr) = &self.listen {
            config.master_bind_addr.clone_from(addr);
        }
        if let Some(addr) = &self.asset_listen {
            config.asset_bind_addr.clone_from(addr);
        }
        if let Some(addr) = &self.master {
            config.master_addr.clone_from(addr);
        }
        if let Some(addr) = &self.public_master {
            config.master_public_addr = Some(addr.clone());
        }
        if self.no_docs {
            config.enable_docs = false;
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn flags_override_loaded_values() {
        let args = Args::parse_from([
            "meridian-master",
            "--listen",
            "0.0.0.0:9443",
            "--public-master",
            "https://master.example.com",
            "--no-docs",
        ]);
        let mut config = MasterConfig::default();
        let master_addr = config.master_addr.clone();
        args.apply(&mut config);

        assert_eq!(config.master_bind_addr, "0.0.0.0:9443");
        assert_eq!(config.master_addr, master_addr);
        assert_eq!(config.master_public_addr(), "https://master.example.com");
        assert!(!config.enable_docs);
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let args = Args::parse_from(["meridian-master"]);
        let mut config = MasterConfig::default();
        let before = config.asset_bind_addr.clone();
        args.apply(&mut config);
        assert_eq!(config.asset_bind_addr, before);
        assert!(config.enable_docs);
    }
}
