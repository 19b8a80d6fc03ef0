use std::io::Write;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};
use xdsmon::{Result, SensorMonitor};

/// After this long without a notification the sensor has probably gone to
/// sleep; the display says so instead of showing frozen numbers.
const NO_DATA_NOTICE_MS: u64 = 5000;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🚴 xdsmon Live Monitor Example");
    info!("Searching for cycling sensors...");

    let monitor = match SensorMonitor::connect_first().await {
        Ok(monitor) => {
            info!(
                "✅ Connected to: {} ({})",
                monitor.sensor_info().name,
                monitor.profile()
            );
            monitor
        }
        Err(e) => {
            error!("❌ Failed to connect: {e}");
            return Err(e);
        }
    };

    monitor.start_monitoring().await?;
    info!("Streaming... Press Ctrl+C to stop");

    let mut render_interval = interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                info!("Stop requested");
                monitor.stop();
                break;
            }
            _ = render_interval.tick() => {
                if monitor.is_stopped() {
                    println!();
                    break;
                }

                if monitor.millis_since_data() > NO_DATA_NOTICE_MS {
                    print!("\r\x1b[K[status] no data (sensor may be asleep)...");
                } else {
                    let snap = monitor.snapshot();
                    print!(
                        "\r\x1b[K⚡ {:4} W | 🔄 {:3} RPM | ⚖️  {:3}/{:3} | ❤ {:3} bpm | {:02}:{:02}",
                        snap.power,
                        snap.cadence,
                        snap.left_balance,
                        snap.right_balance,
                        snap.heart_rate,
                        snap.elapsed_secs / 60,
                        snap.elapsed_secs % 60,
                    );
                }
                std::io::stdout().flush().ok();
            }
        }
    }

    // Give the watchdog a moment to unsubscribe and disconnect.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let snap = monitor.snapshot();
    println!("\n📊 Session Summary:");
    println!(
        "  Duration: {:02}:{:02}",
        snap.elapsed_secs / 60,
        snap.elapsed_secs % 60
    );
    println!("  Avg Power: {} W (max {} W)", snap.avg_power, snap.max_power);
    println!("  Avg Cadence: {} RPM", snap.avg_cadence);

    info!("🎉 Monitoring completed");
    Ok(())
}
