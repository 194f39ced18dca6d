//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config::active_path(global).display());
        }
        ConfigCommand::Show => {
            let settings = config::effective_settings(global)?;
            let token = if config::credentials(global).is_set() {
                "set"
            } else {
                "not set"
            };
            println!("# {}", config::active_path(global).display());
            println!("# token: {token}");
            print!("{}", toml::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}
