use tracing::info;
use xdsmon::{ble::BleManager, ConnectionParams, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🔍 xdsmon Scanner Example");
    info!("Scanning for nearby peripherals...");

    let manager = BleManager::new().await?;
    let params = ConnectionParams::default();
    let sensors = manager.scan_for_sensors(&params).await?;

    if sensors.is_empty() {
        println!("No peripherals found. Is the sensor awake? (spin the cranks)");
        return Ok(());
    }

    println!("\n----------------------------------------------------------------");
    println!("    | # | Name                 | Address           | RSSI | Profile");
    println!("----------------------------------------------------------------");

    let mut recommended: Option<usize> = None;
    for (index, sensor) in sensors.iter().enumerate() {
        let star = if sensor.is_candidate() { "⭐" } else { "  " };
        if sensor.is_candidate() && recommended.is_none() {
            recommended = Some(index);
        }

        let name = if sensor.name.is_empty() {
            "<no name>"
        } else {
            sensor.name.as_str()
        };

        println!(
            "{star} | {index} | {name:20} | {:17} | {:4} | {}",
            sensor.mac_address.as_deref().unwrap_or("-"),
            sensor.rssi,
            sensor.profile()
        );
    }
    println!("----------------------------------------------------------------");

    if let Some(index) = recommended {
        println!("Recommended sensor: #{index} ({})", sensors[index].profile());
    } else {
        println!("No recognizable cycling sensor in range.");
    }

    Ok(())
}
