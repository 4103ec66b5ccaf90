
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {

    /// Path to your configuration file. By default we will look for mount-box.toml and Config.toml.
    #[arg(index = 1)]
    pub configuration: Option<String>,

    /// Create a bare minimum example configuration file.
    #[arg(long)]
    pub init: bool,
}
