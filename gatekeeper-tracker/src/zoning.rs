use chrono::{DateTime, Utc};
use tracing::{debug, info};

use gatekeeper_domain::satellite::UNASSIGNED_ROOM;

use crate::state::{DeviceState, NOT_HOME_ROOM, UNKNOWN_ROOM};

/// Knobs for room arbitration. Distances are metres, times seconds.
#[derive(Debug, Clone)]
pub struct ZoningParams {
    /// A source older than this is ignored ("not alive").
    pub absence_timeout: f64,
    /// Candidate must be this much closer than the incumbent room.
    pub hysteresis_dist: f64,
    /// Candidate must hold its lead this long before the switch commits.
    pub debounce_time: f64,
}

impl Default for ZoningParams {
    fn default() -> ZoningParams {
        ZoningParams {
            absence_timeout: 60.0,
            hysteresis_dist: 0.8,
            debounce_time: 5.0,
        }
    }
}

/// Republish cadence while nothing changes.
pub const HEARTBEAT_SECS: f64 = 30.0;

/// A would-be room switch waiting out the debounce window.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSwitch {
    pub room: String,
    pub since: DateTime<Utc>,
}

pub fn age_secs(now: DateTime<Utc>, then: DateTime<Utc>) -> f64 {
    (now - then).num_milliseconds() as f64 / 1000.0
}

/// Re-arbitrate the room for one device after a source update.
///
/// Arbitration happens in distance space: the estimate is monotonic with
/// proximity no matter how each satellite is calibrated, and the
/// hysteresis margin plus debounce keep adjacent rooms with noisy, close
/// distances from flapping.
///
/// Returns `true` when the caller must publish (room change, or the
/// 30 s heartbeat while holding a room).
pub fn evaluate(
    state: &mut DeviceState,
    pending: &mut Option<PendingSwitch>,
    params: &ZoningParams,
    now: DateTime<Utc>,
) -> bool {
    // Alive sources only; the best one is the closest, ties broken by the
    // stronger smoothed RSSI, then by the lexicographically first id
    // (sources iterate in id order).
    let mut best: Option<(&String, f64, f64)> = None;
    for (sat_id, reading) in &state.sources {
        if age_secs(now, reading.last_seen) >= params.absence_timeout {
            continue;
        }
        let closer = match best {
            None => true,
            Some((_, best_dist, best_rssi)) => {
                reading.distance < best_dist
                    || (reading.distance == best_dist && reading.smooth_rssi > best_rssi)
            }
        };
        if closer {
            best = Some((sat_id, reading.distance, reading.smooth_rssi));
        }
    }
    let Some((best_sat, candidate_dist, candidate_rssi)) = best else {
        return false;
    };
    let candidate_room = state.sources[best_sat].room_name.clone();

    let current_room = state.room.clone();

    // A device that is nowhere yet takes the first real room it sees.
    if matches!(
        current_room.as_str(),
        UNKNOWN_ROOM | UNASSIGNED_ROOM | NOT_HOME_ROOM
    ) && candidate_room != UNASSIGNED_ROOM
    {
        change_room(state, &candidate_room, candidate_rssi, candidate_dist);
        *pending = None;
        return true;
    }

    // Incumbent room metrics over its alive sources.
    let mut current_min_dist = f64::INFINITY;
    let mut current_best_rssi = f64::NEG_INFINITY;
    for reading in state.sources.values() {
        if age_secs(now, reading.last_seen) < params.absence_timeout
            && reading.room_name == current_room
            && reading.distance < current_min_dist
        {
            current_min_dist = reading.distance;
            current_best_rssi = reading.smooth_rssi;
        }
    }

    // Every satellite of the incumbent room went quiet: no evidence to
    // defend it, switch without debounce.
    if current_min_dist.is_infinite() {
        info!(
            device = %state.identifier,
            from = %current_room,
            to = %candidate_room,
            "current room lost all sources, switching"
        );
        change_room(state, &candidate_room, candidate_rssi, candidate_dist);
        *pending = None;
        return true;
    }

    if candidate_dist < current_min_dist - params.hysteresis_dist {
        let pending_since = pending
            .as_ref()
            .filter(|p| p.room == candidate_room)
            .map(|p| p.since);
        if let Some(since) = pending_since {
            if age_secs(now, since) >= params.debounce_time {
                info!(
                    device = %state.identifier,
                    from = %current_room,
                    to = %candidate_room,
                    margin_m = current_min_dist - candidate_dist,
                    "debounce satisfied, switching room"
                );
                change_room(state, &candidate_room, candidate_rssi, candidate_dist);
                *pending = None;
                return true;
            }
        } else {
            info!(
                device = %state.identifier,
                from = %current_room,
                to = %candidate_room,
                distance_m = candidate_dist,
                "pending room change"
            );
            *pending = Some(PendingSwitch {
                room: candidate_room.clone(),
                since: now,
            });
        }
    } else if candidate_room == current_room {
        if let Some(p) = pending.take() {
            debug!(
                device = %state.identifier,
                dropped = %p.room,
                "current room is best again, pending switch dropped"
            );
        }
    }
    // Otherwise partial evidence keeps accumulating; leave pending alone.

    // No switch: refresh fused metrics from the incumbent room and
    // heartbeat if the last publication is stale.
    state.rssi = current_best_rssi;
    state.distance = current_min_dist;
    age_secs(now, state.last_published) > HEARTBEAT_SECS
}

fn change_room(state: &mut DeviceState, room: &str, rssi: f64, distance: f64) {
    let old = std::mem::replace(&mut state.room, room.to_string());
    state.rssi = rssi;
    state.distance = distance;
    state.present = true;
    info!(device = %state.identifier, %old, new = %room, rssi, distance_m = distance, "zone change");
}
