use clap::Parser;
use log::info;
use ble_tether::{init_logging, run, Cli};
use ble_tether::error::{AppRunError, ConfigError};

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("ble-tether ", env!("CARGO_PKG_VERSION")));

    let cli = Cli::parse();

    match run(cli).await {
        Err(AppRunError::Config { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("ble-tether is already running");
            Ok(())
        },
        Err(err) => {
            eprintln!("Unexpected error: {}", err);
            Err(err)
        }
        Ok(_) => Ok(())
    }
}
