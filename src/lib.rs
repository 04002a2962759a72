use std::env;

use clap::Parser;
use futures::channel::mpsc::channel;
use futures::channel::oneshot;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::device::adapter::BtleAdapter;
use crate::device::connection::{link_task, LinkCommand};
use crate::device::constants::EVENT_CHANNEL_CAPACITY;
use crate::device::types::{DeviceEvent, LinkSettings, PeripheralAddress};
use crate::error::AppRunError;

pub mod config;
pub mod device;
pub mod error;

pub fn init_logging() {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");

}

#[derive(Parser, Debug)]
#[command(
    name = "ble-tether",
    version,
    about = "Tethers to one BLE peripheral: scan, connect, resume scanning after a disconnect"
)]
pub struct Cli {
    /// Address of the peripheral to tether to, e.g. "F6:26:F2:4A:51:D4".
    /// Overrides targetAddress from the config file.
    pub address: Option<String>,

    /// Only scan for advertisements of this service uuid
    #[arg(long)]
    pub service_uuid: Option<String>,

    /// Stop the scan this many milliseconds after each start (duty cycling)
    #[arg(long)]
    pub scan_active_ms: Option<u64>,

    /// Restart a duty-cycled scan after this many milliseconds
    #[arg(long)]
    pub scan_pause_ms: Option<u64>,

    /// Wait this many milliseconds before rescanning after a disconnect
    #[arg(long)]
    pub rescan_delay_ms: Option<u64>,

    /// Write the effective settings back to the config file
    #[arg(long)]
    pub save_config: bool,
}

pub async fn run(cli: Cli) -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let mut config = config_io.read().await?;

    // command line settings win over the config file
    if let Some(address) = &cli.address {
        config.target_address = Some(address.clone());
    }
    if let Some(service_uuid) = &cli.service_uuid {
        config.service_uuid = Some(service_uuid.clone());
    }
    if let Some(active) = cli.scan_active_ms {
        config.scan.scan_active_ms = Some(active);
    }
    if let Some(pause) = cli.scan_pause_ms {
        config.scan.scan_pause_ms = Some(pause);
    }
    if let Some(delay) = cli.rescan_delay_ms {
        config.scan.rescan_delay_ms = delay;
    }

    if cli.save_config {
        config_io.save(config.clone()).await?;
    }

    let target: PeripheralAddress = config
        .target_address
        .as_deref()
        .ok_or(AppRunError::NoTarget)?
        .parse()?;
    let service_uuid = config.service_uuid()?;

    let mut settings = LinkSettings::new(target);
    settings.rescan_delay = config.scan.rescan_delay();
    settings.scan_cycle = config.scan.scan_cycle()?;

    let adapter = BtleAdapter::first_available(service_uuid).await?;

    let cancel = CancellationToken::new();
    let (event_sender, mut event_receiver) = channel::<DeviceEvent>(EVENT_CHANNEL_CAPACITY);
    info!("Tethering to {}", settings.target);
    let (mut commands, link_handle) = link_task(cancel.clone(), adapter, settings, vec![event_sender]);

    // the console is the ui sink: one line per transition
    let printer = tokio::spawn(async move {
        while let Some(event) = event_receiver.next().await {
            let DeviceEvent::Transition(transition) = event;
            println!("{}", transition);
        }
    });

    let (reply_sender, reply_receiver) = oneshot::channel();
    commands.send(LinkCommand::Start(reply_sender)).await?;
    reply_receiver.await.map_err(|_| AppRunError::LinkTaskGone)??;

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to wait for ctrl-c: {:?}", err);
    }

    info!("Shutting down");
    cancel.cancel();
    link_handle.await.expect("Failed to join link task")?;
    printer.await.expect("Failed to join printer task");

    Ok(())
}
