mod login;
mod photos;

mod util;

use std::time::Duration;

use clap::{Arg, Command};
use hearth::{config, Config};
use tokio_util::sync::CancellationToken;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // A config file in the working directory is picked up if present,
    // otherwise defaults apply. The `--config` argument points elsewhere.
    let mut config: Config = config::load().unwrap_or_default();

    let matches = cmd().get_matches();

    if let Some(config_path) = matches.get_one::<String>("config") {
        config = config::load_from(config_path)?;
    }
    if let Some(level) = matches.get_one::<String>("verbosity") {
        config.tracing.level = level.parse()?;
    }
    hearth::tracing::init(&config)?;

    // Ctrl-C abandons whatever is in flight
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!("Initiating graceful shutdown...");
                    cancel.cancel();
                },
                _ = cancel.cancelled() => {},
            }
        }
    });

    let result = match matches.subcommand() {
        Some(("photos", m)) => photos::run(m, &config, cancel.clone()).await,
        Some(("login", m)) => login::login(m, cancel.clone()).await,
        Some(("logout", m)) => login::logout(m, cancel.clone()).await,
        _ => Err(anyhow::Error::msg("unknown subcommand")),
    };

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_millis(300), watcher).await;

    result
}

pub fn cmd() -> Command {
    Command::new("hearth")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .infer_subcommands(true)
        .version(VERSION)
        .about("Upload and browse rental property photos from the command line")
        .subcommand(photos::cmd())
        .subcommand(login::cmd())
        .subcommand(login::logout_cmd())
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .global(true)
                .help("Load configuration from the given file"),
        )
        .arg(
            Arg::new("verbosity")
                .long("verbosity")
                .short('v')
                .display_order(100)
                .value_name("level")
                .default_value("info")
                .value_parser(["trace", "debug", "info", "warn", "error", "none"])
                .global(true)
                .help("Set the verbosity of the log output"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_well_formed() {
        cmd().debug_assert();
    }

    #[test]
    fn parses_upload() {
        let matches = cmd()
            .try_get_matches_from(["hearth", "photos", "upload", "9", "a.jpg", "b.png"])
            .unwrap();
        let (_, photos) = matches.subcommand().unwrap();
        let (name, upload) = photos.subcommand().unwrap();
        assert_eq!(name, "upload");
        assert_eq!(upload.get_one::<i64>("entity"), Some(&9));
        assert_eq!(upload.get_many::<std::path::PathBuf>("files").unwrap().count(), 2);
    }
}
