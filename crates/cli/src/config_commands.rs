use std::path::PathBuf;

use {
    anyhow::Result,
    clap::Subcommand,
    mucnotify_config::{find_config_file, write_default_config},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write a default config file unless one exists.
    Init,
    /// Print the config file that would be used.
    Path,
}

pub fn handle_config(action: ConfigAction, cli_config: Option<&PathBuf>) -> Result<()> {
    match action {
        ConfigAction::Init => init(cli_config),
        ConfigAction::Path => {
            match cli_config.cloned().or_else(find_config_file) {
                Some(path) => println!("{}", path.display()),
                None => println!("No config file found."),
            }
            Ok(())
        },
    }
}

fn init(cli_config: Option<&PathBuf>) -> Result<()> {
    if let Some(path) = cli_config {
        anyhow::bail!(
            "`config init` writes to the standard location; remove --config ({})",
            path.display()
        );
    }
    let (path, created) = write_default_config()?;
    if created {
        println!("Wrote {}", path.display());
    } else {
        println!("Config already exists at {}", path.display());
    }
    Ok(())
}
