//! itemflow demo host
//!
//! Wires a synthetic camera through a blur into a bright-spot detector, runs
//! it for a few seconds while nudging parameters, and reports what comes out.
//!
//! Usage: `itemflow [ENGINE_CONFIG.json] [SECONDS]`

use itemflow::{
    config::EngineConfig,
    error::ResultExt,
    pipeline::{
        nodes::{BrightSpotsItem, GaussianBlurItem, TestPatternSource},
        ItemEvent, ItemGraph, ItemRegistry, ItemType, ParamValue, Point, Sparse,
    },
};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = match args.next() {
        Some(path) => path.into(),
        None => EngineConfig::default_path()?,
    };
    let run_for = args
        .next()
        .map(|s| s.parse::<u64>())
        .transpose()
        .map_err(|e| anyhow::anyhow!("SECONDS must be a whole number: {}", e))?
        .map_or(Duration::from_secs(3), Duration::from_secs);

    let config = EngineConfig::load_or_default(&config_path);

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting itemflow demo with config {:?}", config_path);

    let (mut graph, bridge) = ItemGraph::new(
        ItemRegistry::with_builtins(),
        config.item_options(),
        config.event_channel_capacity,
    );

    let camera = graph.add_item::<TestPatternSource>()?;
    let blur = graph.add_item::<GaussianBlurItem>()?;
    let spots = graph.add_by_type_name("BrightSpots")?;
    graph
        .connect((camera, "image"), (blur, "input"))
        .context("Failed to wire camera into blur")?;
    graph
        .connect((blur, "output"), (spots, "image"))
        .context("Failed to wire blur into detector")?;

    // The parameter surface a control panel would render
    println!("{}", serde_json::to_string_pretty(&graph.topology())?);

    let overlay = graph
        .item(spots)?
        .output("spots")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{} has no spots output", BrightSpotsItem::TYPE_NAME))?;

    graph.start_all()?;

    let started = Instant::now();
    let mut tuned = false;
    while started.elapsed() < run_for {
        std::thread::sleep(Duration::from_millis(250));

        for event in bridge.drain() {
            match event {
                ItemEvent::IterationFailed { item, message }
                | ItemEvent::Faulted { item, message } => {
                    tracing::warn!("{:?} reported: {}", item, message);
                }
                other => tracing::debug!("{:?}", other),
            }
        }

        if let Some(object) = overlay.latest_object() {
            let found = Sparse::<Point>::from_stream_object(&object)?;
            tracing::info!(
                "frame {}x{}: {} bright spots",
                found.base_image().width(),
                found.base_image().height(),
                found.size()
            );
        }

        if !tuned && started.elapsed() >= run_for / 2 {
            tuned = true;
            graph
                .item(blur)?
                .set_param("sigma", ParamValue::Float(3.0))
                .context("Failed to tune blur")?;
            // Changing the threshold restarts the detector
            graph
                .item(spots)?
                .set_param("threshold", ParamValue::Int(120))
                .context("Failed to retune detector")?;
        }
    }

    graph.stop_all();
    for event in bridge.drain() {
        tracing::debug!("{:?}", event);
    }
    tracing::info!("itemflow demo finished");
    Ok(())
}
