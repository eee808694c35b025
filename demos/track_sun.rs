use std::time::Duration;

use spid_mount::ephemeris::catalog;
use spid_mount::util::init_tracing;
use spid_mount::{ConnectionConfig, EngineConfig, MountEngine, TrackingTarget};
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    init_tracing("spid_mount=info");

    let mut config = EngineConfig::default();
    config.tracking.tick_interval = Duration::from_secs(2);
    // Fast slew so the simulator catches up within the demo
    config.simulator.slew_rate_deg_per_s = Some(30.0);

    let engine = match MountEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return;
        }
    };

    println!("Observer: {:?}", engine.get_observer());
    let stars: Vec<&str> = catalog::names().collect();
    println!("Catalog: {}", stars.join(", "));
    for name in ["Sun", "Moon", "Jupiter", "Vega"] {
        match engine.locate(&TrackingTarget::parse(name)) {
            Ok(seen) => println!(
                "- {:<8} az {:7.2}° el {:6.2}°{}",
                name,
                seen.position.azimuth(),
                seen.position.elevation(),
                if seen.visible { "" } else { " (below horizon)" }
            ),
            Err(e) => println!("- {:<8} {}", name, e),
        }
    }

    if let Err(e) = engine.connect(ConnectionConfig::simulator()).await {
        eprintln!("Connect failed: {}", e);
        return;
    }

    match engine.start_tracking(TrackingTarget::Sun).await {
        Ok(()) => println!("\nTracking the Sun for 20 seconds..."),
        Err(e) => {
            // Night time, or the Sun sits outside the limits
            println!("\nCannot track the Sun now: {}", e);
            if let Err(e) = engine.disconnect().await {
                eprintln!("Disconnect failed: {}", e);
            }
            return;
        }
    }

    for _ in 0..10 {
        sleep(Duration::from_secs(2)).await;
        let state = engine.get_state().await;
        println!(
            "{:?}: at {} aiming {}",
            state.phase,
            state.last_known_position,
            state
                .target_position
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    if let Err(e) = engine.stop().await {
        eprintln!("Stop failed: {}", e);
    }
    if let Err(e) = engine.disconnect().await {
        eprintln!("Disconnect failed: {}", e);
    }
}
