//! list_cameras - enumerate video inputs and show which one the counter would pick

use anyhow::Result;
use clap::Parser;

use occupancy_counter::{backend_for_device, CapabilityNegotiator};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Enumerate a specific backend by device id (e.g. stub://front_door).
    #[arg(long, env = "COUNTER_CAMERA")]
    camera: Option<String>,
    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let negotiator = CapabilityNegotiator::new(backend_for_device(args.camera.as_deref())?);
    let devices = negotiator.list_cameras();
    let preferred = negotiator.select_preferred_device(&devices).ok();

    if args.json {
        let out = serde_json::json!({
            "backend": negotiator.backend_name(),
            "devices": devices,
            "preferred": preferred.as_ref().map(|device| device.id.clone()),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("no cameras found ({} backend)", negotiator.backend_name());
        return Ok(());
    }
    for device in &devices {
        let marker = if preferred.as_ref() == Some(device) { "*" } else { " " };
        let label = if device.label.is_empty() {
            "(no label)"
        } else {
            device.label.as_str()
        };
        println!("{} {:<24} {}", marker, device.id, label);
    }
    Ok(())
}
