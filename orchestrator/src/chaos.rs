//! Test-only fault injection, compiled in with the `chaos` feature.
//!
//! Hooks: a pre-dispatch filter on incoming agent frames, a pre-bind veto
//! in the scheduler, and heartbeat attenuation in the registry. Rates come
//! from environment variables so harnesses can dial failure in without
//! rebuilding.

use std::sync::OnceLock;

struct ChaosRates {
    drop_frame: f64,
    bind_veto: f64,
    heartbeat: f64,
}

fn rates() -> &'static ChaosRates {
    static RATES: OnceLock<ChaosRates> = OnceLock::new();
    RATES.get_or_init(|| {
        let parse = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0)
                .clamp(0.0, 1.0)
        };
        ChaosRates {
            drop_frame: parse("STARK_CHAOS_DROP_FRAME"),
            bind_veto: parse("STARK_CHAOS_BIND_VETO"),
            heartbeat: parse("STARK_CHAOS_HEARTBEAT"),
        }
    })
}

fn roll(rate: f64) -> bool {
    rate > 0.0 && rand::random::<f64>() < rate
}

/// Drop an incoming agent frame before dispatch.
pub fn drop_frame() -> bool {
    roll(rates().drop_frame)
}

/// Veto a bind, leaving the pod with a `ChaosInjected` outcome.
pub fn bind_veto() -> bool {
    roll(rates().bind_veto)
}

/// Swallow a heartbeat so health transitions can be exercised.
pub fn attenuate_heartbeat() -> bool {
    roll(rates().heartbeat)
}
