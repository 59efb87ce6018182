// SPDX-License-Identifier: MIT OR Apache-2.0
//! Screenplay demo - plays a small cue list.
//!
//! Usage: `screenplay_demo [config.ron]`
//!
//! The cue list mixes timed futures, a signal fired from another task,
//! a parallel group and a wait. Set `RUST_LOG` to adjust log output.

use screenplay::{
    Awaitable, Completion, CompletionEvent, LifecycleEvent, Screenplay, ScreenplayConfig, Signal,
    StepFn, Timeline,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Cue that finishes after `duration`
fn timed(name: &'static str, duration: Duration) -> impl Fn(Completion) + Send + Sync + 'static {
    move |complete: Completion| {
        tracing::info!("Cue {} running for {:?}", name, duration);
        complete.wait_for(Awaitable::settled(tokio::time::sleep(duration)));
    }
}

fn build_timeline(curtain: Arc<Signal>) -> Timeline {
    let lights: StepFn = Arc::new(timed("lights", Duration::from_millis(120)));
    let music: StepFn = Arc::new(move |complete: Completion| {
        tracing::info!("Cue music waiting for the curtain");
        complete.wait_for(curtain.clone());

        let curtain = curtain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            curtain.emit(CompletionEvent::TransitionEnd);
        });
    });

    let mut timeline = Timeline::new();
    timeline
        .mark("opening")
        .step(|complete: Completion| {
            tracing::info!("Cue house lights down");
            complete.done();
        })
        .step(timed("overture", Duration::from_millis(300)))
        .mark("scene")
        .parallel(vec![lights, music])
        .wait(Duration::from_millis(250))
        .step(|complete: Completion| {
            complete.wait_for(Awaitable::future(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err::<(), _>("spotlight jammed")
            }));
        })
        .mark("finale")
        .step(timed("bow", Duration::from_millis(100)));
    timeline
}

fn load_config() -> screenplay::Result<ScreenplayConfig> {
    match std::env::args().nth(1) {
        Some(path) => ScreenplayConfig::load(Path::new(&path)),
        None => Ok(ScreenplayConfig::default()),
    }
}

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("screenplay=debug,screenplay_demo=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return;
        }
    };
    tracing::info!("Starting screenplay demo with {:?}", config);

    let screenplay = Screenplay::new(build_timeline(Signal::new()), config);

    screenplay.on(LifecycleEvent::Before, |screenplay| {
        tracing::info!("Cue {:?} starting", screenplay.offset());
    });
    screenplay.on(LifecycleEvent::Loop, |screenplay| {
        tracing::info!("Looping, {} passes left", screenplay.remaining_loops());
    });
    screenplay.done(|_| tracing::info!("Curtain"));

    if let Ok(offset) = screenplay.resolve("finale") {
        tracing::info!("Finale cued at offset {}", offset);
    }

    screenplay.play();
    screenplay.finished().await;
    tracing::info!("Screenplay demo finished");
}
