//! Simulated page for the lazy-media engine.
//!
//! Registers one controller per configured target, scrolls a virtual viewport
//! down the page and reports where every target ended up.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use lazy_media::config::Configuration;
use lazy_media::loader::FileLoader;
use lazy_media::presentation::Phase;
use lazy_media::viewport::ScrollViewport;
use lazy_media::{CapabilityProbe, LazyLoader, LoadState, NativeEnvironment};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "lazy-media-sim", about = "Scroll a simulated page of lazily loaded media")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "page.yaml")]
    config: PathBuf,

    /// Pretend the host cannot observe visibility (degraded mode)
    #[arg(long)]
    no_observer: bool,

    /// Override scroll step (px)
    #[arg(long, value_name = "PX")]
    step: Option<f32>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("lazy_media={level}").parse()?)
        .add_directive(format!("lazy_media_sim={level}").parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(step) = cli.step {
        cfg.scroll.step = step;
    }
    if cli.no_observer {
        cfg.observation = false;
    }
    let cfg = cfg.validated().context("validating configuration")?;

    let probe = CapabilityProbe::install(NativeEnvironment::new(cfg.observation))
        .context("installing capability probe")?;
    let viewport = Arc::new(ScrollViewport::new(cfg.viewport.width, cfg.viewport.height));
    let engine = LazyLoader::new(
        probe,
        viewport.clone(),
        Arc::new(FileLoader::new(&cfg.asset_root)),
    );

    let mut controllers = Vec::with_capacity(cfg.targets.len());
    for target_cfg in &cfg.targets {
        let target = viewport.insert(target_cfg.rect);
        let controller = engine.register(target, target_cfg.descriptor(), cfg.watch);
        let id = target_cfg.id.clone();
        let blur = target_cfg.blur_placeholder;
        controller.on_state_change(move |state| {
            let phase = Phase::for_state(state, blur);
            info!(id = %id, state = %state, phase = phase.as_str(), "target updated");
        });
        controller.start();
        controllers.push((target_cfg, controller));
    }
    info!(targets = controllers.len(), observation = cfg.observation, "page ready");

    let cancel = CancellationToken::new();
    let scroll = tokio::spawn(lazy_media::tasks::scroll::run(
        viewport.clone(),
        cfg.scroll.clone(),
        cancel.clone(),
    ));
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let ticks = scroll.await.context("scroll task panicked")??;
    info!(ticks, "scroll finished; waiting for outstanding loads");

    let deadline = tokio::time::Instant::now() + cfg.scroll.settle;
    while tokio::time::Instant::now() < deadline && !cancel.is_cancelled() {
        if controllers
            .iter()
            .all(|(_, c)| c.state() != LoadState::Loading)
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    ctrl_c.abort();

    for (target_cfg, controller) in &controllers {
        let state = controller.state();
        let phase = Phase::for_state(state, target_cfg.blur_placeholder);
        let padding = target_cfg
            .aspect_ratio
            .map(|r| format!("{:.2}%", r.padding_percent()))
            .unwrap_or_else(|| "-".to_string());
        match controller.failure() {
            Some(reason) => warn!(id = %target_cfg.id, state = %state, phase = phase.as_str(), %reason, "summary"),
            None => info!(id = %target_cfg.id, state = %state, phase = phase.as_str(), padding = %padding, "summary"),
        }
    }

    for (_, controller) in &controllers {
        controller.dispose();
    }
    Ok(())
}
