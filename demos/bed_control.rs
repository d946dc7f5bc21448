use bedlink::{
    BedCommand, BedConfig, BedQuery, BtleConnector, Dispatcher, Percentage, Result,
    SessionRegistry,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🛏️ Bedlink Control Example");
    let config = BedConfig::default();

    let connector = BtleConnector::new().await?;
    let registry = match SessionRegistry::from_config(&config, Arc::new(connector)).await {
        Ok(registry) => {
            info!("✅ Connected: {}", registry.names().collect::<Vec<_>>().join(", "));
            Arc::new(registry)
        }
        Err(e) => {
            error!("❌ Failed to connect to the bed: {}", e);
            return Err(e);
        }
    };
    let dispatcher = Dispatcher::new(Arc::clone(&registry), config.max_travel_time);

    // Light on, then report what the primary side sees
    let outcome = BedCommand::LightOn.run(&dispatcher).await;
    info!("💡 Light on: {}", outcome);
    match BedQuery::light_state(&dispatcher).await {
        Ok(state) => info!("💡 Light is {}", state),
        Err(e) => warn!("Could not read light: {}", e),
    }

    // Raise the head a quarter of the way, then flatten
    for command in [BedCommand::MoveUpper(Percentage::new(25)?), BedCommand::Flat] {
        let outcome = command.run(&dispatcher).await;
        if outcome.is_success() {
            info!("✅ {}: {}", command, outcome);
        } else {
            warn!("⚠️ {}: {} (failed: {:?})", command, outcome.status(), outcome.failed);
        }
    }

    match BedQuery::UpperHeight.read(&dispatcher).await {
        Ok(height) => info!("📏 Upper lift at {}", height),
        Err(e) => warn!("Could not read upper lift: {}", e),
    }

    let outcome = BedCommand::LightOff.run(&dispatcher).await;
    info!("💡 Light off: {}", outcome);

    registry.shutdown().await;
    info!("👋 Done");
    Ok(())
}
