use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::zoning::age_secs;

/// Newest raw sample accepted into a session if seen this recently.
const SIGNAL_FRESHNESS_SECS: f64 = 10.0;
/// Samples needed before the stability test applies.
const STABLE_MIN_COUNT: usize = 30;
/// Standard deviation (dBm) under which the last window counts as stable.
const STABLE_MAX_STDEV: f64 = 2.0;
/// Stability is not trusted before this much wall clock.
const STABLE_MIN_ELAPSED: f64 = 15.0;
/// A session this old finishes regardless of stability.
const HARD_STOP_ELAPSED: f64 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationAction {
    Start,
    Status,
}

/// Strongest-recent-sample cache entry, fed by the ingestion router.
#[derive(Debug, Clone, Copy)]
pub struct RecentSignal {
    pub rssi: i32,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct Session {
    start: DateTime<Utc>,
    readings: Vec<i32>,
}

/// Reply to the admin layer. Reference persistence is the admin's call;
/// the session only measures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CalibrationReply {
    Started {
        status: String,
        satellite: String,
    },
    Error {
        error: String,
    },
    Status {
        progress: u8,
        stable: bool,
        count: usize,
        elapsed: f64,
        avg_rssi: f64,
    },
}

/// One-metre reference measurement sessions, one per satellite, in memory
/// only. Each `status` poll pulls at most one sample from the router's
/// recent-signal cache, so the sample rate is the admin's poll rate.
#[derive(Debug, Default)]
pub struct CalibrationSessions {
    sessions: HashMap<String, Session>,
}

impl CalibrationSessions {
    pub fn new() -> CalibrationSessions {
        CalibrationSessions::default()
    }

    pub fn start(&mut self, sat_id: &str, now: DateTime<Utc>) -> CalibrationReply {
        self.sessions.insert(
            sat_id.to_string(),
            Session {
                start: now,
                readings: Vec::new(),
            },
        );
        CalibrationReply::Started {
            status: "started".to_string(),
            satellite: sat_id.to_string(),
        }
    }

    pub fn status(
        &mut self,
        sat_id: &str,
        recent: Option<&RecentSignal>,
        now: DateTime<Utc>,
    ) -> CalibrationReply {
        let Some(session) = self.sessions.get_mut(sat_id) else {
            return CalibrationReply::Error {
                error: "no active calibration session".to_string(),
            };
        };

        if let Some(signal) = recent
            && age_secs(now, signal.at) < SIGNAL_FRESHNESS_SECS
        {
            session.readings.push(signal.rssi);
        }

        let elapsed = age_secs(now, session.start);
        let count = session.readings.len();

        let mut stable = count >= STABLE_MIN_COUNT
            && stdev(&session.readings[count - STABLE_MIN_COUNT..]) < STABLE_MAX_STDEV
            && elapsed > STABLE_MIN_ELAPSED;
        if elapsed >= HARD_STOP_ELAPSED {
            stable = true;
        }

        let progress = if stable {
            100
        } else {
            std::cmp::min(99, (elapsed / 25.0 * 100.0) as i64).max(0) as u8
        };

        let avg_rssi = if progress == 100 && count > 10 {
            trimmed_mean(&session.readings)
        } else if count > 0 {
            mean(&session.readings)
        } else {
            -100.0
        };

        CalibrationReply::Status {
            progress,
            stable,
            count,
            elapsed,
            avg_rssi,
        }
    }
}

fn mean(values: &[i32]) -> f64 {
    values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len() as f64
}

/// Sample standard deviation.
fn stdev(values: &[i32]) -> f64 {
    let m = mean(values);
    let var = values
        .iter()
        .map(|&v| (f64::from(v) - m).powi(2))
        .sum::<f64>()
        / (values.len() - 1) as f64;
    var.sqrt()
}

/// Mean with the lowest and highest decile (at least one sample each)
/// dropped, so a stray reflection cannot skew the reference.
fn trimmed_mean(values: &[i32]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let trim = std::cmp::max(1, sorted.len() / 10);
    let kept = &sorted[trim..sorted.len() - trim];
    if kept.is_empty() {
        return mean(values);
    }
    mean(kept)
}
