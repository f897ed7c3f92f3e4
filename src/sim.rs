//! Run lifecycle: park bring-up, arrival injection, the timed close, and
//! the teardown joins.
//!
//! Ordering at close matters: visitors are joined before the service
//! threads so the cashier's final exit drain observes every report, and
//! guides stay alive to walk the last (possibly partial) groups out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::log::{EventLog, Tag};
use crate::park::{sleep_ms, Park, Tourist};

const CLOSE_POLL_MS: u64 = 100;
const MAX_AGE: u64 = 75;

/// Run one full simulation. Returns once every thread has been joined and
/// the final `MAIN STOP` line is in the log.
pub fn run(cfg: Config) -> crate::Result<()> {
    cfg.validate()?;
    let log = Arc::new(EventLog::create(&cfg.log_path)?);
    let park = Arc::new(Park::new(cfg, Arc::clone(&log)));

    log.emit(Tag::Main, "START");
    tracing::info!(seed = park.cfg.seed, "park open");
    let services = Arc::clone(&park).start();

    // SIGINT/SIGTERM close the park early through the same path as the
    // duration expiry.
    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(err) = signal_hook::flag::register(sig, Arc::clone(&shutdown)) {
            tracing::warn!("signal handler registration failed: {err}");
        }
    }

    let closes_at = Instant::now() + Duration::from_millis(park.cfg.duration_ms);

    let mut visitors = Vec::with_capacity(park.cfg.tourists_total as usize);
    for id in 1..=park.cfg.tourists_total {
        if shutdown.load(Ordering::SeqCst) || Instant::now() >= closes_at {
            break;
        }
        let age = park.rng.int_in(0, MAX_AGE) as u32;
        let vip = park.rng.chance(park.cfg.vip_prob);
        let tourist = Tourist::new(id, age, vip);
        let park_for_thread = Arc::clone(&park);
        visitors.push(thread::spawn(move || tourist.run(park_for_thread)));
        sleep_ms(park.rng.int_in(0, park.cfg.arrival_jitter_ms));
    }

    while !shutdown.load(Ordering::SeqCst) && Instant::now() < closes_at {
        sleep_ms(CLOSE_POLL_MS);
    }

    tracing::info!("closing park");
    park.close();

    for handle in visitors {
        if handle.join().is_err() {
            tracing::error!("visitor thread panicked");
        }
    }
    park.stop(services);

    log.emit(Tag::Main, "STOP");
    tracing::info!("simulation finished");
    Ok(())
}
