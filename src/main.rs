#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::{anyhow, bail, Result};
use apple_auth_strategy::{
    models::AuthenticateOptions,
    oauth::{build_authorization_request, ClientSecretSigner, NonceManager},
    settings::AppleAuthSettings,
    VERSION,
};

const USAGE: &str = "usage: apple-auth-strategy [authorize-url | client-secret | version]";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings =
        AppleAuthSettings::load().map_err(|e| anyhow!("Failed to load settings: {e}"))?;

    match std::env::args().nth(1).as_deref() {
        None | Some("authorize-url") => print_authorization_url(&settings),
        Some("client-secret") => print_client_secret(&settings).await,
        Some("version" | "--version") => {
            println!("apple-auth-strategy {VERSION}");
            Ok(())
        }
        Some(other) => {
            eprintln!("{USAGE}");
            bail!("unknown command '{other}'")
        }
    }
}

fn print_authorization_url(settings: &AppleAuthSettings) -> Result<()> {
    settings.strategy.validate()?;

    let nonces = NonceManager::default();
    let request =
        build_authorization_request(&settings.strategy, &AuthenticateOptions::default(), &nonces)?;

    println!("{}", request.url);
    if let Some(state) = &request.state {
        println!("state: {state}");
    }
    if let Some(nonce) = &request.nonce {
        println!("nonce: {nonce}");
    }
    Ok(())
}

async fn print_client_secret(settings: &AppleAuthSettings) -> Result<()> {
    let signer = ClientSecretSigner::from_options(&settings.strategy)?;
    let secret = signer.current_secret().await?;

    println!("{secret}");
    log::info!("Client secret valid for {:?}", signer.lifetime());
    Ok(())
}
