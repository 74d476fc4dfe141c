//! Volume reduction for admitted records.
//!
//! Four strategies: probabilistic (thread-local xorshift draw), windowed
//! rate limiting, every-Nth, and an adaptive probability that tracks a
//! target accept rate. All state is atomic; monotonic ordering is enough
//! for the counters.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::record::Record;

const XORSHIFT_MULT: u64 = 0x2545F4914F6CDD1D;

#[inline]
fn xorshift64star(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    *state = x;
    x.wrapping_mul(XORSHIFT_MULT)
}

thread_local! {
    static THREAD_PRNG: Cell<u64> = Cell::new({
        // Seed from the thread id hash; never zero.
        let id = std::thread::current().id();
        let mut hasher = std::hash::DefaultHasher::new();
        std::hash::Hash::hash(&id, &mut hasher);
        std::hash::Hasher::finish(&hasher) | 1
    });
}

fn thread_draw() -> u64 {
    THREAD_PRNG.with(|cell| {
        let mut state = cell.get();
        let draw = xorshift64star(&mut state);
        cell.set(state);
        draw
    })
}

fn probability_threshold(p: f64) -> u64 {
    if p >= 1.0 {
        u64::MAX
    } else if p <= 0.0 {
        0
    } else {
        (p * (u64::MAX as f64)) as u64
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// A sampling strategy.
pub enum Sampler {
    /// Accept a record with probability `p`. A deterministic seed replaces
    /// the thread-local PRNG for reproducible tests.
    Probability {
        threshold: u64,
        seeded_state: Option<AtomicU64>,
    },
    /// Accept at most `max` records per `window_ms` window; the counter
    /// resets when wall time crosses a window boundary.
    RateLimit {
        max: u64,
        window_ms: u64,
        window: AtomicU64,
        count: AtomicU64,
    },
    /// Accept every `n`-th record.
    EveryN { n: u64, counter: AtomicU64 },
    /// Track a target accept rate (records/second) by adjusting the current
    /// probability multiplicatively every `adjust_ms`, clamped to
    /// `[min_p, max_p]`.
    Adaptive {
        target_rate: f64,
        min_p: f64,
        max_p: f64,
        adjust_ms: u64,
        current_p_bits: AtomicU64,
        window: AtomicU64,
        accepted_in_window: AtomicU64,
    },
}

impl Sampler {
    pub fn probability(p: f64) -> Sampler {
        Sampler::Probability {
            threshold: probability_threshold(p),
            seeded_state: None,
        }
    }

    /// Probability sampling with a fixed seed; draws are reproducible
    /// across runs (shared between threads).
    pub fn probability_seeded(p: f64, seed: u64) -> Sampler {
        Sampler::Probability {
            threshold: probability_threshold(p),
            seeded_state: Some(AtomicU64::new(seed | 1)),
        }
    }

    pub fn rate_limit(max: u64, window_ms: u64) -> Sampler {
        Sampler::RateLimit {
            max,
            window_ms: window_ms.max(1),
            window: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn every_n(n: u64) -> Sampler {
        Sampler::EveryN {
            n: n.max(1),
            counter: AtomicU64::new(0),
        }
    }

    pub fn adaptive(target_rate: f64, min_p: f64, max_p: f64, adjust_ms: u64) -> Sampler {
        Sampler::Adaptive {
            target_rate,
            min_p,
            max_p,
            adjust_ms: adjust_ms.max(1),
            current_p_bits: AtomicU64::new(max_p.to_bits()),
            window: AtomicU64::new(0),
            accepted_in_window: AtomicU64::new(0),
        }
    }

    /// Decides whether the record survives sampling.
    pub fn accept(&self, _record: &Record) -> bool {
        match self {
            Sampler::Probability {
                threshold,
                seeded_state,
            } => {
                let draw = match seeded_state {
                    Some(state) => {
                        let mut s = state.load(Ordering::Relaxed);
                        let draw = xorshift64star(&mut s);
                        state.store(s, Ordering::Relaxed);
                        draw
                    }
                    None => thread_draw(),
                };
                *threshold == u64::MAX || draw < *threshold
            }
            Sampler::RateLimit {
                max,
                window_ms,
                window,
                count,
            } => {
                let current_window = now_ms() / window_ms;
                let seen = window.load(Ordering::Relaxed);
                if seen != current_window
                    && window
                        .compare_exchange(seen, current_window, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                {
                    count.store(0, Ordering::Relaxed);
                }
                count.fetch_add(1, Ordering::Relaxed) < *max
            }
            Sampler::EveryN { n, counter } => counter.fetch_add(1, Ordering::Relaxed) % n == 0,
            Sampler::Adaptive {
                target_rate,
                min_p,
                max_p,
                adjust_ms,
                current_p_bits,
                window,
                accepted_in_window,
            } => {
                let now = now_ms();
                let current_window = now / adjust_ms;
                let seen = window.load(Ordering::Relaxed);
                if seen != current_window
                    && window
                        .compare_exchange(seen, current_window, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                {
                    // Close the previous window: compare its accept rate to
                    // the target and scale the probability toward it.
                    let accepted = accepted_in_window.swap(0, Ordering::Relaxed);
                    if seen != 0 {
                        let window_secs = *adjust_ms as f64 / 1000.0;
                        let measured = accepted as f64 / window_secs;
                        let current = f64::from_bits(current_p_bits.load(Ordering::Relaxed));
                        let factor = if measured > 0.0 {
                            target_rate / measured
                        } else {
                            2.0
                        };
                        let adjusted = (current * factor).clamp(*min_p, *max_p);
                        current_p_bits.store(adjusted.to_bits(), Ordering::Relaxed);
                    }
                }
                let p = f64::from_bits(current_p_bits.load(Ordering::Relaxed));
                let threshold = probability_threshold(p);
                let accepted = threshold == u64::MAX || thread_draw() < threshold;
                if accepted {
                    accepted_in_window.fetch_add(1, Ordering::Relaxed);
                }
                accepted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::Level;

    fn record() -> Record {
        Record::new(Level::Info, "INFO", "sampled").unwrap()
    }

    #[test]
    fn test_probability_extremes() {
        let always = Sampler::probability(1.0);
        let never = Sampler::probability(0.0);
        let r = record();
        for _ in 0..100 {
            assert!(always.accept(&r));
            assert!(!never.accept(&r));
        }
    }

    #[test]
    fn test_probability_seeded_is_deterministic() {
        let r = record();
        let collect = |seed: u64| {
            let sampler = Sampler::probability_seeded(0.5, seed);
            (0..64).map(|_| sampler.accept(&r)).collect::<Vec<bool>>()
        };
        assert_eq!(collect(42), collect(42));
        // A 64-draw run at p=0.5 has both outcomes with overwhelming odds.
        let run = collect(42);
        assert!(run.iter().any(|&b| b));
        assert!(run.iter().any(|&b| !b));
    }

    #[test]
    fn test_probability_roughly_half() {
        let sampler = Sampler::probability_seeded(0.5, 7);
        let r = record();
        let accepted = (0..10_000).filter(|_| sampler.accept(&r)).count();
        assert!((3500..6500).contains(&accepted), "accepted {}", accepted);
    }

    #[test]
    fn test_every_n() {
        let sampler = Sampler::every_n(3);
        let r = record();
        let pattern: Vec<bool> = (0..9).map(|_| sampler.accept(&r)).collect();
        assert_eq!(
            pattern,
            vec![true, false, false, true, false, false, true, false, false]
        );
    }

    #[test]
    fn test_every_one_accepts_all() {
        let sampler = Sampler::every_n(1);
        let r = record();
        assert!((0..10).all(|_| sampler.accept(&r)));
    }

    #[test]
    fn test_rate_limit_caps_window() {
        // A generous window so the test stays inside one.
        let sampler = Sampler::rate_limit(5, 60_000);
        let r = record();
        let accepted = (0..100).filter(|_| sampler.accept(&r)).count();
        assert_eq!(accepted, 5);
    }

    #[test]
    fn test_adaptive_stays_within_clamp() {
        let sampler = Sampler::adaptive(10.0, 0.1, 0.9, 50);
        let r = record();
        for _ in 0..1000 {
            sampler.accept(&r);
        }
        if let Sampler::Adaptive { current_p_bits, .. } = &sampler {
            let p = f64::from_bits(current_p_bits.load(Ordering::Relaxed));
            assert!((0.1..=0.9).contains(&p), "p drifted to {}", p);
        } else {
            unreachable!();
        }
    }
}
