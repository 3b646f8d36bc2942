use anyhow::{Error, Result};
use clap::ArgMatches;
use tokio_util::sync::CancellationToken;

use crate::util::{remove_token, store_token};

pub fn cmd() -> clap::Command {
    use clap::{Arg, Command};
    Command::new("login")
        .about("Store the bearer token used for API calls")
        .long_about(
            "Store the bearer token used to authenticate against the photo API.\n\n\
            Provide the token with `--token`, or paste it into the interactive\n\
            prompt.",
        )
        .display_order(30)
        .arg(
            Arg::new("token")
                .display_order(11)
                .long("token")
                .short('t')
                .help("Provide a valid bearer token")
                .required(false),
        )
}

pub fn logout_cmd() -> clap::Command {
    clap::Command::new("logout")
        .about("Remove the stored bearer token")
        .display_order(31)
}

/// Stores the provided (or prompted for) token on the filesystem.
pub async fn login(matches: &ArgMatches, cancel: CancellationToken) -> Result<()> {
    let token = match matches.get_one::<String>("token") {
        Some(token) => token.to_string(),
        // nothing was provided, prompt for it
        None => rpassword::prompt_password("Your token: ")?,
    };

    if token.trim().is_empty() {
        return Err(Error::msg("token can't be empty"));
    }

    store_token(&token).await?;
    println!("token stored");

    cancel.cancel();
    Ok(())
}

/// Removes the previously stored token.
pub async fn logout(_matches: &ArgMatches, cancel: CancellationToken) -> Result<()> {
    if remove_token().await? {
        println!("token removed");
    } else {
        println!("no token stored");
    }

    cancel.cancel();
    Ok(())
}
