use std::fs::File;
use std::io::Read as _;
use std::path::PathBuf;

use anyhow::Context as _;
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use clap::Parser;

mod alerts;
mod beacon;
mod codec;
mod config;
mod manager;
mod messages;
mod mqtt;
mod settings;
mod timer;
mod uart;

#[derive(Parser, Debug)]
#[command(about = "Smart-cushion monitor: BLE telemetry, beacon proximity, alerts over MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose mode: also deliver connect/disconnect/region status alerts
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let mut file = File::open(&cli.config)
        .with_context(|| format!("opening config file {}", cli.config.display()))?;
    let mut config_contents = String::new();
    file.read_to_string(&mut config_contents)?;

    let config: config::AppConfig = toml::de::from_str(&config_contents)?;

    let (mqtt_client, eventloop) = mqtt::MqttClient::new(&config.mqtt);
    mqtt_client.subscribe().await?;

    let bt_manager = Manager::new().await?;

    // get the first bluetooth adapter
    let adapters = bt_manager.adapters().await?;
    let central = adapters
        .into_iter()
        .next()
        .context("no Bluetooth adapter found")?;

    let core = manager::Manager::new(central, mqtt_client, eventloop, config, cli.debug);
    core.run_loop().await?;

    Ok(())
}
