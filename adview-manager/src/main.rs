#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

use std::error::Error;

use clap::{crate_version, Arg, Command};
use futures::future::join_all;
use slog::{info, Logger};
use url::Url;

use adview_manager::{provider::HttpProvider, AdDeliveryEngine, Slot};
use adview_primitives::{
    config::{configuration, Environment},
    util::logging::new_logger,
    AdvertisementId, PlacementKey,
};

const DEFAULT_PROVIDER_URL: &str = "http://127.0.0.1:8010/v1";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Command::new("AdView manager")
        .version(crate_version!())
        .arg(
            Arg::new("config")
                .help("the config file for the ad delivery engine")
                .takes_value(true),
        )
        .arg(
            Arg::new("providerUrl")
                .long("providerUrl")
                .short('u')
                .help("the base URL of the ad service")
                .default_value(DEFAULT_PROVIDER_URL)
                .takes_value(true),
        )
        .arg(
            Arg::new("placement")
                .long("placement")
                .short('p')
                .help("a placement to mount, all configured placements are mounted if omitted")
                .takes_value(true)
                .multiple_occurrences(true),
        )
        .get_matches();

    let environment: Environment = serde_json::from_value(serde_json::Value::String(
        std::env::var("ENV").unwrap_or_else(|_| "development".into()),
    ))?;

    let config = configuration(environment, cli.value_of("config"))?;
    let provider_url: Url = cli
        .value_of("providerUrl")
        .ok_or("provider url missing")?
        .parse()?;
    let placements = match cli.values_of("placement") {
        Some(placements) => placements.map(PlacementKey::from).collect(),
        None => config.placement_keys(),
    };

    let logger = new_logger("adview-manager");

    let provider = HttpProvider::new(provider_url, config.fetch_timeout)?;
    info!(&logger, "Using ad service at {}", provider.base_url(); "environment" => ?environment);

    let engine = AdDeliveryEngine::new(config, provider, &logger);
    engine.start();

    let watchers = placements
        .iter()
        .map(|placement| tokio::spawn(log_rotation(engine.subscribe(placement), logger.clone())))
        .collect::<Vec<_>>();

    tokio::signal::ctrl_c().await?;

    info!(&logger, "Received Ctrl-C, shutting down");
    engine.shutdown();
    join_all(watchers).await;

    Ok(())
}

/// Logs every ad the slot shows, until it's unmounted.
async fn log_rotation(mut slot: Slot, logger: Logger) {
    let mut shown: Option<AdvertisementId> = None;

    while slot.changed().await {
        let state = slot.state();
        let current = state.current().map(|ad| ad.id.clone());

        if current != shown {
            info!(
                &logger,
                "Showing ad";
                "placement" => %state.placement_key,
                "ad" => ?current,
                "index" => state.current_index,
                "eligible" => state.eligible.len()
            );
            shown = current;
        }
    }
}
