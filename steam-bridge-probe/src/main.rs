mod cli;
mod envelope;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use steam_bridge::{Bridge, BridgeConfig, CallbackEvent, CallbackTag, InterfaceKind, OverlayManager};
use tracing_subscriber::EnvFilter;

use cli::ProbeArgs;
use envelope::{CallbackLine, Source};

fn main() -> Result<()> {
    let args = ProbeArgs::parse();

    let filter = EnvFilter::from_default_env()
        .add_directive(args.log_directive().parse()?)
        .add_directive("steam_bridge_probe=info".parse()?);
    if args.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = args.bridge_config()?;
    if let Some(app_id) = config.app_id()? {
        let value = app_id.to_string();
        // Safety: the runtime is not built yet; this is the only thread.
        unsafe {
            std::env::set_var("SteamAppId", &value);
            std::env::set_var("SteamGameId", &value);
        }
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args, config))
}

fn print_line(n: u64, source: Source, event: &CallbackEvent) {
    match serde_json::to_string(&CallbackLine::stamp(n, source, event)) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!("can't serialize {}: {e}", event.tag()),
    }
}

async fn run(args: ProbeArgs, config: BridgeConfig) -> Result<()> {
    let bridge = Bridge::steam();
    bridge.initialize(&config)?;

    for kind in InterfaceKind::ALL {
        let available = bridge.interface(kind).is_some();
        tracing::info!(interface = kind.name(), available, "interface");
    }
    if let Some(user) = bridge.interface(InterfaceKind::User) {
        match bridge.try_call(user, "GetSteamID", &[]) {
            Ok(id) => tracing::info!("logged in as {}", id.as_id().unwrap_or_default()),
            Err(e) => tracing::warn!("GetSteamID failed: {e}"),
        }
    }

    let seq = Arc::new(AtomicU64::new(0));
    for &tag in CallbackTag::KNOWN {
        let seq = seq.clone();
        bridge.on_callback(tag, move |event| {
            print_line(seq.fetch_add(1, Ordering::Relaxed), Source::Listener, event);
        });
    }

    if let Some(stats) = bridge.interface(InterfaceKind::UserStats) {
        let call = bridge.call_async_with_timeout(
            stats,
            "GetNumberOfCurrentPlayers",
            &[],
            Duration::from_secs(5),
        );
        let seq = seq.clone();
        tokio::spawn(async move {
            match call.await {
                Ok(event) => {
                    print_line(seq.fetch_add(1, Ordering::Relaxed), Source::CallResult, &event)
                }
                Err(e) => tracing::warn!("GetNumberOfCurrentPlayers failed: {e}"),
            }
        });
    }

    if let Some(dialog) = &args.overlay {
        let overlay = OverlayManager::new(bridge.clone());
        tracing::info!(enabled = overlay.is_enabled(), "overlay");
        overlay.activate(dialog.as_str());
    }

    bridge.spawn_pump(config.pump_interval())?;

    if args.seconds == 0 {
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.seconds)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    bridge.shutdown()?;
    if let Some(e) = bridge.last_error() {
        tracing::info!("last error during run: {e}");
    }
    tracing::info!("{} callbacks delivered", seq.load(Ordering::Relaxed));
    Ok(())
}
