//! Host process entry point: wires up the renderer (C8), the routing brain
//! (C9), and the control-thread loop that ticks the registry once a second.

use clap::Parser;
use radioform_core::registry::ReconcileAction;
use radioform_core::ring::{Ring, SampleFormat};
use radioform_host::config::Args;
use radioform_host::renderer::AudioRenderer;
use radioform_host::routing::{virtual_uid, CpalAudioObserver, RoutingBrain};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REGISTRY_TICK_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match radioform_host::config::load(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fatal: failed to load configuration: {err}");
            return ExitCode::from(1);
        }
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(true).with_file(true).with_line_number(true))
        .init();

    info!("starting radioform-host");

    let mut renderer = match AudioRenderer::new(args.device.as_deref()) {
        Ok(renderer) => renderer,
        Err(err) => {
            error!(%err, "failed to initialise audio renderer");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = renderer.start() {
        error!(%err, "failed to start audio stream");
        return ExitCode::from(1);
    }
    info!(sample_rate = renderer.sample_rate(), "renderer started");

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown)) {
        warn!(%err, "failed to register SIGINT handler");
    }
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown)) {
        warn!(%err, "failed to register SIGTERM handler");
    }

    let mut brain = RoutingBrain::new(
        CpalAudioObserver,
        config.ring_dir.clone(),
        config.auto_switch_default_output,
        config.forward_volume,
    );

    // The uid our own render device's virtual proxy is registered under —
    // CpalAudioObserver gives physicals a uid equal to their cpal name.
    let target_uid = virtual_uid(&renderer.device_name());
    let ring_dir = config.ring_dir.clone();
    let ring_duration_ms = config.ring_duration_ms;
    let sample_rate = renderer.sample_rate();
    let channels = renderer.channels();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        while !shutdown.load(Ordering::Relaxed) {
            let actions = brain.tick();
            for action in actions {
                match action {
                    ReconcileAction::Create(uid) if uid == target_uid => {
                        let ring_path = ring_dir.join(radioform_core::ring::uid_to_filename(&uid));
                        match Ring::create_or_open(&ring_path, sample_rate, channels, SampleFormat::F32, ring_duration_ms) {
                            Ok(ring) => {
                                info!(uid = %uid, "attaching renderer to virtual endpoint ring");
                                renderer.switch_ring(Some(ring));
                            }
                            Err(err) => warn!(%err, uid = %uid, "failed to attach ring for virtual endpoint"),
                        }
                    }
                    ReconcileAction::Destroy(uid) if uid == target_uid => {
                        info!(uid = %uid, "detaching renderer from virtual endpoint ring");
                        renderer.switch_ring(None);
                    }
                    _ => {}
                }
            }
            std::thread::sleep(REGISTRY_TICK_INTERVAL);
        }
    }));

    if let Err(err) = renderer.stop() {
        warn!(%err, "failed to stop renderer cleanly");
    }

    match result {
        Ok(()) => {
            info!("radioform-host shutting down");
            ExitCode::from(130)
        }
        Err(payload) => {
            error!("unrecoverable error in main loop: {}", panic_message(&payload));
            ExitCode::from(2)
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
