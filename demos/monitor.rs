use std::env;

use branch_power_monitor::{MonitorConfig, RefreshCoordinator};
use inquire::Select;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    let mut config = MonitorConfig::new(port_name);
    if let Some(slave_id) = env::args().nth(2) {
        config.slave_id = slave_id.parse().expect("Slave id must be a number");
    }

    let mut coordinator = RefreshCoordinator::from_config(&config).expect("Invalid config");
    if let Err(err) = coordinator.start().await {
        error!("Monitor not ready, try again later: {err}");
        std::process::exit(1);
    }

    let mut updates = coordinator.subscribe();
    loop {
        let table = coordinator.sensor_table();
        for reading in table.circuits.iter().filter(|reading| reading.watts > 0) {
            println!("{:>10}: {:>5} W", reading.unique_id, reading.watts);
        }
        println!(
            "     total: {:>5} W  ({:.4} kWh this interval){}",
            table.total_power_w,
            table.energy_kwh,
            if table.stale { "  [stale]" } else { "" }
        );

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    coordinator.stop().await;
}
