use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;

use nearbyscan::logging::{set_debug_flags, DebugFlags};
use nearbyscan::{
    configure_logging, AppConfig, BtleplugManager, DiscoveryService, FakeBleManager,
    NativeBleManager, SessionHandle, SessionSnapshot,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    human_panic::setup_panic!();

    let config = AppConfig::load().context("loading settings")?;
    configure_logging(config.log_level, config.log_file.clone(), config.console_log)
        .map_err(anyhow::Error::msg)?;
    set_debug_flags(DebugFlags {
        all: config.debug_all,
        ..DebugFlags::default()
    });

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        None | Some("scan") => {
            let manager = BtleplugManager::new(&config.scan)
                .await
                .context("opening Bluetooth adapter")?;
            run_until_ctrl_c(Arc::new(manager), &config).await
        }
        Some("demo") => run_demo(&config).await,
        _ => {
            print_usage();
            Ok(())
        }
    }
}

async fn run_until_ctrl_c(manager: Arc<dyn NativeBleManager>, config: &AppConfig) -> anyhow::Result<()> {
    let service = DiscoveryService::new(manager, config.scan.clone());
    let handle = service.start_session()?;
    let printer = spawn_printer(&handle);

    println!("Scanning for nearby devices, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    service.stop_session(&handle).await;
    printer.abort();
    Ok(())
}

async fn run_demo(config: &AppConfig) -> anyhow::Result<()> {
    let fake = Arc::new(FakeBleManager::new());
    let service = DiscoveryService::new(fake.clone(), config.scan.clone());
    let handle = service.start_session()?;
    let printer = spawn_printer(&handle);

    let script = [
        json!({ "name": "Thermometer", "address": "AA:BB:CC:00:00:01", "uuid": "0d5b7c1e-0000-4000-8000-000000000001", "rssi": -48 }),
        json!({ "address": "AA:BB:CC:00:00:02", "uuid": "0d5b7c1e-0000-4000-8000-000000000002", "rssi": -81, "serviceUuids": [] }),
        json!({ "address": "AA:BB:CC:00:00:01", "uuid": "0d5b7c1e-0000-4000-8000-000000000001", "rssi": -52, "txPowerLevel": 4 }),
    ];

    tokio::time::sleep(Duration::from_millis(50)).await;
    fake.emit_state(5);
    for payload in script {
        tokio::time::sleep(Duration::from_millis(300)).await;
        fake.emit_device(payload);
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    fake.emit_state(4);
    tokio::time::sleep(Duration::from_millis(100)).await;

    service.stop_session(&handle).await;
    printer.abort();
    Ok(())
}

fn spawn_printer(handle: &SessionHandle) -> tokio::task::JoinHandle<()> {
    let (_, mut updates) = handle.subscribe();
    tokio::spawn(async move {
        while let Some(snapshot) = updates.recv().await {
            print_snapshot(&snapshot);
        }
    })
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    if let Some(progress) = &snapshot.progress {
        println!("{}: {}", progress.title, progress.message);
    }
    println!(
        "{} device(s), scanning: {}",
        snapshot.devices.len(),
        snapshot.is_scanning
    );
    for device in &snapshot.devices {
        println!(
            "  {:<40} {:<24} {:>4} dBm",
            device.identity_key.as_str(),
            device.name,
            device.rssi
        );
    }
}

fn print_usage() {
    println!("\nUsage:");
    println!("  nearbyscan scan    - Scan with the system Bluetooth adapter until Ctrl-C");
    println!("  nearbyscan demo    - Replay a scripted session against a fake adapter");
}
