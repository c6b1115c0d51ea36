//! CLI argument parsing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use rollup_config::SequencerConfig;

#[derive(Clone, Debug, FromArgs)]
#[argh(description = "Rollup sequencer")]
pub(crate) struct Args {
    #[argh(option, short = 'c', description = "path to configuration")]
    pub config: PathBuf,

    // Config overriding args
    /// Data directory; logs go to `<datadir>/logs` unless the config names a log dir.
    #[argh(option, short = 'd', description = "datadir path")]
    pub datadir: Option<PathBuf>,

    /// Rpc host that the sequencer will listen on.
    #[argh(option, description = "rpc host")]
    pub rpc_host: Option<String>,

    /// Rpc port that the sequencer will listen on.
    #[argh(option, description = "rpc port")]
    pub rpc_port: Option<u16>,
}

impl Args {
    /// Loads the config file and applies the overrides passed on the command line.
    pub(crate) fn load_config(&self) -> Result<SequencerConfig> {
        let mut config = SequencerConfig::from_file(&self.config)
            .with_context(|| format!("failed to load config {}", self.config.display()))?;
        self.apply_overrides(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut SequencerConfig) {
        if let Some(host) = &self.rpc_host {
            config.rpc.host = host.clone();
        }
        if let Some(port) = self.rpc_port {
            config.rpc.port = port;
        }
        if let Some(datadir) = &self.datadir {
            if config.logging.log_dir.is_none() {
                config.logging.log_dir = Some(datadir.join("logs"));
            }
        }
    }
}
