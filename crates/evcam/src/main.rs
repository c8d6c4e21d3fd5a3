//! EvCam engine entry point.
//!
//! Runs the core against the simulated host capabilities; pass a config
//! file path as the first argument.

use std::path::Path;
use std::sync::Arc;

use capture_session::{OutputSink, PreviewSurface};
use evcam::host::{SimCameraProvider, SimEncoderFactory};
use evcam::{AppConfig, CoreHandle};
use tracing::{debug, info};
use vhal_signal::GrpcBus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    evcam::init_logging();
    info!("=== EvCam Core v{} ===", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1);
    let config = AppConfig::load(config_path.as_deref().map(Path::new))?;
    let slots: Vec<_> = config.slots.iter().map(|s| s.position).collect();

    let bus = Arc::new(GrpcBus::new(
        config.signal_bus.host.clone(),
        config.signal_bus.port,
    ));
    let core = CoreHandle::init(
        config,
        Arc::new(SimCameraProvider::new()),
        Arc::new(SimEncoderFactory::new()),
        bus,
    );
    core.run().await?;

    // The simulated host wires one preview surface per slot and opens
    // the cameras; on a real host the UI does this once its surfaces
    // exist.
    let orchestrator = core.orchestrator();
    for (index, position) in slots.into_iter().enumerate() {
        orchestrator
            .set_sink(
                position,
                OutputSink::Preview(PreviewSurface {
                    id: index as u64,
                    width: 1280,
                    height: 720,
                }),
            )
            .await?;
    }
    core.open_cameras().await?;

    let mut events = core.subscribe();
    info!("running; ctrl-c to exit");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => debug!(?event, "core event"),
                None => break,
            },
        }
    }

    core.release().await;
    info!("shut down cleanly");
    Ok(())
}
