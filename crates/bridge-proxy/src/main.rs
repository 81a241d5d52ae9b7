use tile_bridge_proxy::config::Config;
use tile_bridge_proxy::{run, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (cfg, path) = Config::load()?;
    telemetry::init(&cfg.telemetry)?;
    match &path {
        Some(path) => info!("bridge.config path={}", path.display()),
        None => info!("bridge.config path=none defaults=true"),
    }
    run(cfg).await
}
