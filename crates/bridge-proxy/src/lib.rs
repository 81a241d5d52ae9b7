//! Capture side of the tile bridge: the liqi wire schema and decoder, the frame gate, the
//! orchestrator that owns the match pipeline, the control server and the remote input driver.

pub mod config;
pub mod config_loader;
pub mod control;
pub mod decoder;
pub mod gate;
pub mod input_driver;
pub mod liqi;
pub mod orchestrator;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use tile_bridge_core::agent::{AgentClient, AgentTransport, HttpAgent, LineAgent};
use tile_bridge_core::player::InputDispatcher;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::input_driver::RemoteInputDriver;
use crate::orchestrator::Bridge;

/// Runs the bridge until the control listener or a pipeline task stops.
pub async fn run(cfg: Config) -> anyhow::Result<()> {
    let agent: Arc<dyn AgentClient> = match cfg.agent.transport {
        AgentTransport::Tcp => Arc::new(LineAgent::new(cfg.agent.addr.clone())),
        AgentTransport::Http => Arc::new(HttpAgent::new(cfg.agent.addr.clone())),
    };
    info!(
        "bridge.agent transport={:?} addr={}",
        cfg.agent.transport, cfg.agent.addr
    );

    let input: Option<Arc<dyn InputDispatcher>> = match &cfg.input.driver_addr {
        Some(addr) => {
            let driver = RemoteInputDriver::connect(addr).await?;
            info!("bridge.input driver={addr}");
            Some(Arc::new(driver))
        }
        None => {
            info!("bridge.input driver=none autoplay=unavailable");
            None
        }
    };

    let listener = TcpListener::bind(&cfg.bridge.control_listen)
        .await
        .with_context(|| format!("bind control listener {}", cfg.bridge.control_listen))?;

    let bridge = Bridge::spawn(&cfg, Some(agent), input);
    let control_task = tokio::spawn(control::serve_control(listener, bridge.handle()));

    tokio::select! {
        res = control_task => match res {
            Ok(Ok(())) => info!("bridge.task.end lane=control result=ok"),
            Ok(Err(err)) => {
                error!("bridge.task.end lane=control error={err:#}");
                return Err(err);
            }
            Err(err) => {
                error!("bridge.task.end lane=control join_error={err}");
                return Err(err.into());
            }
        },
        res = bridge.join() => res?,
    }
    Ok(())
}
