use embassy_futures::yield_now;
use embassy_time::{Duration, Instant, Timer};
use embedded_graphics::pixelcolor::{Rgb565, RgbColor};
use embedded_graphics::prelude::DrawTarget;
use frame_stream::{BlockStorage, Canvas, DisplayLink, LoadEvent, Outcome, Pipeline};

use defmt::*;

use crate::config;

const STATS_PERIOD: Duration = Duration::from_secs(5);

/// Play frames forever at `config::TARGET_FPS`.
///
/// Between presentations the loop keeps feeding the loader and only sleeps
/// when there is nothing left to load before the next frame is due.
pub async fn run<
    S: BlockStorage,
    D: DisplayLink,
    const BYTES: usize,
    const N: usize,
    const EXTENT: usize,
    const STAGE: usize,
    const DEPTH: usize,
>(
    mut pipeline: Pipeline<'_, S, D, BYTES, N, EXTENT, STAGE, DEPTH>,
) -> ! {
    if pipeline.total_frames() == 0 {
        error!("player: nothing to play");
        error_pattern(&mut pipeline).await;
    }

    let frame_budget = Duration::from_micros(1_000_000 / config::TARGET_FPS);
    let mut next_due = Instant::now();
    let mut last_report = Instant::now();
    let mut shown_at_report = 0;

    loop {
        let load = pipeline.advance_loader();
        let idle = matches!(load, LoadEvent::Idle | LoadEvent::Deferred);
        if Instant::now() < next_due {
            if idle {
                Timer::at(next_due).await;
            }
            continue;
        }

        match pipeline.present() {
            Outcome::Shown { pause_ms, .. } => {
                next_due = match pause_ms {
                    Some(ms) => Instant::now() + Duration::from_millis(ms as u64),
                    None => next_due + frame_budget,
                };
                // Never try to catch up on frames that were late.
                next_due = next_due.max(Instant::now());
            }
            Outcome::Waiting { .. } if idle => Timer::after_micros(100).await,
            Outcome::Waiting { .. } => yield_now().await,
            Outcome::Rejected { .. } => Timer::after_millis(100).await,
            Outcome::Empty => error_pattern(&mut pipeline).await,
        }

        if last_report.elapsed() >= STATS_PERIOD {
            let stats = pipeline.loader().stats();
            let shown = pipeline.frames_shown();
            info!(
                "player: {} fps, load avg {} us, last {} us, {} failures",
                (shown - shown_at_report) / STATS_PERIOD.as_secs(),
                stats.avg_load_us,
                stats.last_load_us,
                stats.failures
            );
            shown_at_report = shown;
            last_report = Instant::now();
        }
    }
}

/// Cycle solid colours so a board without content is visibly alive.
async fn error_pattern<
    S: BlockStorage,
    D: DisplayLink,
    const BYTES: usize,
    const N: usize,
    const EXTENT: usize,
    const STAGE: usize,
    const DEPTH: usize,
>(
    pipeline: &mut Pipeline<'_, S, D, BYTES, N, EXTENT, STAGE, DEPTH>,
) -> ! {
    let geometry = pipeline.pool().geometry();
    let colours = [Rgb565::RED, Rgb565::GREEN, Rgb565::BLUE];
    let mut next = 0;
    loop {
        let colour = colours[next];
        next = (next + 1) % colours.len();
        let shown = pipeline.show_scratch(0, |buffer| {
            if let Some(mut canvas) = Canvas::new(buffer, geometry) {
                let _ = canvas.clear(colour);
            }
        });
        if let Err(e) = shown {
            error!("player: cannot draw status screen: {:?}", e);
        }
        Timer::after_millis(config::ERROR_PATTERN_MS).await;
    }
}
