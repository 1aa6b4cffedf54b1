use std::{process::exit, sync::Arc};

use anyhow::Context;
use config::ControllerConfig;
use controller::run_controller;
use kube::Client;
use provider::neutron::NeutronClient;

mod cache;
mod cluster;
mod config;
mod controller;
mod dispatch;
mod error;
mod fip;
mod helpers;
mod port;
mod provider;

#[cfg(test)]
mod testing;

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    configure_logger();

    let config = get_config();
    let client = create_client().await;
    let provider = NeutronClient::new(&config.provider).context("Couldn't create the provider client")?;

    run_controller(config, client, Arc::new(provider)).await;

    Ok(())
}

async fn create_client() -> Client {
    match Client::try_default().await {
        Ok(client) => client,
        Err(error) => {
            log::error!("Couldn't create client! {error:?}");
            exit(6)
        }
    }
}

fn get_config() -> ControllerConfig {
    match ControllerConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            log::error!("Couldn't load the controller configuration! {error}");
            exit(7)
        }
    }
}

fn configure_logger() {
    env_logger::builder()
        .default_format()
        .format_module_path(false)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init()
}
