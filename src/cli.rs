//! Command-line and environment overrides.

use clap::Parser;

use crate::Error;
use crate::config::DEFAULT_FILENAME;

/// Koala runtime flags.
#[derive(Debug, Clone, Parser)]
#[command(about, long_about = None)]
pub struct Args {
    /// Server port, as `9003` or `:9003`.
    #[arg(long = "koala_server_port", env = "PORT")]
    pub server_port: Option<String>,

    /// Settings filename inside the `config` folder.
    #[arg(long = "koala_config_filename", env = "CONFIG_FILENAME", default_value = DEFAULT_FILENAME)]
    pub config_filename: String,

    /// Never send error details to clients.
    #[arg(long = "koala_knife_supress_error")]
    pub suppress_errors: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            server_port: None,
            config_filename: DEFAULT_FILENAME.to_string(),
            suppress_errors: false,
        }
    }
}

impl Args {
    /// The parsed port override, if any.
    pub fn port(&self) -> crate::Result<Option<u16>> {
        let Some(raw) = self.server_port.as_deref() else {
            return Ok(None);
        };
        let digits = raw.trim().trim_start_matches(':');
        digits
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("Invalid server port: {raw}")))
    }
}
