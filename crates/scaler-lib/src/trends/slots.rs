//! Decay weighting and time-of-day slot aggregation

use crate::models::{PerformanceHistoryEvent, ScaleAction, SlotReasons};
use chrono::FixedOffset;

pub const SECONDS_PER_DAY: i64 = 86_400;
pub const MILLIS_PER_DAY: i64 = SECONDS_PER_DAY * 1000;

/// Horizon for `recent_count`, independent of the decay rate
pub const RECENT_HORIZON_SECS: f64 = 259_200.0;

/// Seconds since local midnight for an epoch-millisecond timestamp
pub fn time_of_day(timestamp_ms: i64, offset: &FixedOffset) -> i64 {
    (timestamp_ms.div_euclid(1000) + i64::from(offset.local_minus_utc()))
        .rem_euclid(SECONDS_PER_DAY)
}

/// Epoch millis of the next occurrence of `time_of_day` at or after `now_ms`
pub fn next_occurrence(time_of_day_secs: i64, now_ms: i64, offset: &FixedOffset) -> i64 {
    let now_tod = time_of_day(now_ms, offset);
    let midnight_ms = (now_ms.div_euclid(1000) - now_tod) * 1000;
    let candidate = midnight_ms + time_of_day_secs * 1000;
    if candidate < now_ms {
        candidate + MILLIS_PER_DAY
    } else {
        candidate
    }
}

/// Signed distance from `slot_time` to `tod`, wrapped into [-12h, 12h)
pub fn wrapped_diff(tod: i64, slot_time: i64) -> i64 {
    (tod - slot_time + SECONDS_PER_DAY / 2).rem_euclid(SECONDS_PER_DAY) - SECONDS_PER_DAY / 2
}

/// `exp(-λ·age)`. Ages are clamped to zero; an undefined product resolves to
/// full weight at zero age and no weight otherwise.
pub fn decay_weight(lambda: f64, age_secs: f64) -> f64 {
    let age = if age_secs.is_nan() { 0.0 } else { age_secs.max(0.0) };
    let w = (-lambda * age).exp();
    if w.is_finite() {
        w
    } else if age == 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Success score as it enters the weighted sums: absent means 1, NaN means 0
pub fn effective_success(event: &PerformanceHistoryEvent) -> f64 {
    match event.success_score {
        None => 1.0,
        Some(s) if s.is_nan() => 0.0,
        Some(s) => s.clamp(0.0, 1.0),
    }
}

/// History event annotated with everything the analysis derives from it
#[derive(Debug, Clone)]
pub struct WeightedEvent<'a> {
    pub event: &'a PerformanceHistoryEvent,
    pub time_of_day: i64,
    pub age_secs: f64,
    pub weight: f64,
    pub success: f64,
}

impl<'a> WeightedEvent<'a> {
    pub fn new(
        event: &'a PerformanceHistoryEvent,
        now_ms: i64,
        lambda: f64,
        offset: &FixedOffset,
    ) -> Self {
        let age_secs = (now_ms - event.event_timestamp) as f64 / 1000.0;
        Self {
            event,
            time_of_day: time_of_day(event.event_timestamp, offset),
            age_secs,
            weight: decay_weight(lambda, age_secs),
            success: effective_success(event),
        }
    }

    pub fn action(&self) -> ScaleAction {
        self.event.action()
    }
}

/// Aggregate for one (slot, action) pair
#[derive(Debug, Clone, PartialEq)]
pub struct SlotStats {
    pub time_of_day: i64,
    pub action: ScaleAction,
    pub confidence: f64,
    pub pods: u32,
    pub reasons: SlotReasons,
}

/// Events whose time of day lies in `[slot_time - half, slot_time + half)`
pub fn select_slot<'e, 'a>(
    events: &'e [WeightedEvent<'a>],
    slot_time: i64,
    slot_secs: i64,
    action: ScaleAction,
) -> Vec<&'e WeightedEvent<'a>> {
    let half = slot_secs / 2;
    events
        .iter()
        .filter(|e| e.action() == action)
        .filter(|e| {
            let diff = wrapped_diff(e.time_of_day, slot_time);
            diff >= -half && diff < half
        })
        .collect()
}

/// Weighted aggregate of the events in one slot, `None` when the slot is empty
pub fn aggregate_slot(
    selected: &[&WeightedEvent<'_>],
    slot_time: i64,
    action: ScaleAction,
) -> Option<SlotStats> {
    if selected.is_empty() {
        return None;
    }

    let mut weight_sum = 0.0;
    let mut weighted_success_sum = 0.0;
    let mut weighted_pods_sum = 0.0;
    let mut weighted_elu_sum = 0.0;
    let mut weighted_heap_sum = 0.0;
    let mut recent_count = 0;

    for e in selected {
        weight_sum += e.weight;
        weighted_success_sum += e.weight * e.success;
        weighted_pods_sum += e.event.pods_added.unsigned_abs() as f64 * e.weight * e.success;
        weighted_elu_sum += e.event.pre_elu_mean * e.weight;
        weighted_heap_sum += e.event.pre_heap_mean * e.weight;
        if e.age_secs <= RECENT_HORIZON_SECS {
            recent_count += 1;
        }
    }

    let confidence = weighted_success_sum / (weight_sum + 1.0);
    let avg_pods = weighted_pods_sum / (weighted_success_sum + 1.0);

    Some(SlotStats {
        time_of_day: slot_time,
        action,
        confidence: if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        },
        pods: avg_pods.ceil().clamp(0.0, f64::from(u32::MAX)) as u32,
        reasons: SlotReasons {
            event_count: selected.len(),
            recent_count,
            avg_success: weighted_success_sum / (weight_sum + 0.001),
            avg_elu: weighted_elu_sum / (weight_sum + 0.001),
            avg_heap: weighted_heap_sum / (weight_sum + 0.001),
        },
    })
}

/// Every non-empty (slot, action) aggregate of the day, in slot order
pub fn slot_table(events: &[WeightedEvent<'_>], slot_secs: i64) -> Vec<SlotStats> {
    let slot_secs = slot_secs.clamp(1, SECONDS_PER_DAY);
    let slot_count = (SECONDS_PER_DAY + slot_secs - 1) / slot_secs;

    (0..slot_count)
        .flat_map(|slot| [(slot, ScaleAction::Up), (slot, ScaleAction::Down)])
        .filter_map(|(slot, action)| {
            let slot_time = slot * slot_secs;
            let selected = select_slot(events, slot_time, slot_secs, action);
            aggregate_slot(&selected, slot_time, action)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::history_event;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_time_of_day_respects_offset() {
        // 2023-11-14T00:00:00Z + 14h
        let ts = 1_699_920_000_000 + 14 * 3_600_000;
        assert_eq!(time_of_day(ts, &utc()), 14 * 3600);

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(time_of_day(ts, &plus_two), 16 * 3600);

        let minus_fifteen = FixedOffset::west_opt(15 * 3600).unwrap();
        assert_eq!(time_of_day(ts, &minus_fifteen), 23 * 3600);
    }

    #[test]
    fn test_next_occurrence_today_or_tomorrow() {
        let midnight = 1_699_920_000_000;
        let now = midnight + 10 * 3_600_000;

        assert_eq!(next_occurrence(14 * 3600, now, &utc()), midnight + 14 * 3_600_000);
        assert_eq!(
            next_occurrence(8 * 3600, now, &utc()),
            midnight + MILLIS_PER_DAY + 8 * 3_600_000
        );
        assert_eq!(next_occurrence(10 * 3600, now, &utc()), now);
    }

    #[test]
    fn test_wrapped_diff_crosses_midnight() {
        assert_eq!(wrapped_diff(86_300, 0), -100);
        assert_eq!(wrapped_diff(100, 86_300), 200);
        assert_eq!(wrapped_diff(50_400, 50_400), 0);
    }

    #[test]
    fn test_decay_weight_degenerate_rates() {
        assert_eq!(decay_weight(0.0, 1e9), 1.0);
        assert_eq!(decay_weight(f64::INFINITY, 0.0), 1.0);
        assert_eq!(decay_weight(f64::INFINITY, 10.0), 0.0);
        assert_eq!(decay_weight(1.0, -50.0), 1.0);
        assert_eq!(decay_weight(1.0, f64::NAN), 1.0);
    }

    #[test]
    fn test_more_recent_event_weighs_more() {
        let lambda = std::f64::consts::LN_2 / 259_200.0;
        let recent = decay_weight(lambda, 3_600.0);
        let older = decay_weight(lambda, 3_600.0 + 86_400.0);
        assert!(recent > older);
        assert!((decay_weight(lambda, 259_200.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_slot_selection_half_open_boundaries() {
        let midnight = 1_699_920_000_000;
        let events = vec![
            history_event("app", midnight + (50_400 - 900) * 1000, 1, Some(1.0)),
            history_event("app", midnight + (50_400 + 899) * 1000, 1, Some(1.0)),
            history_event("app", midnight + (50_400 + 900) * 1000, 1, Some(1.0)),
            history_event("app", midnight + 50_400 * 1000, -1, Some(1.0)),
        ];
        let now = midnight + MILLIS_PER_DAY;
        let weighted: Vec<_> = events
            .iter()
            .map(|e| WeightedEvent::new(e, now, 0.0, &utc()))
            .collect();

        let up = select_slot(&weighted, 50_400, 1800, ScaleAction::Up);
        assert_eq!(up.len(), 2);
        let next = select_slot(&weighted, 52_200, 1800, ScaleAction::Up);
        assert_eq!(next.len(), 1);
        let down = select_slot(&weighted, 50_400, 1800, ScaleAction::Down);
        assert_eq!(down.len(), 1);
    }

    #[test]
    fn test_slot_aggregate_formulas() {
        let events = vec![
            history_event("app", 0, 4, Some(1.0)),
            history_event("app", 0, 2, Some(0.5)),
        ];
        let weighted: Vec<_> = events
            .iter()
            .map(|e| WeightedEvent::new(e, 0, 0.0, &utc()))
            .collect();
        let selected: Vec<_> = weighted.iter().collect();
        let stats = aggregate_slot(&selected, 0, ScaleAction::Up).unwrap();

        // weight_sum = 2, weighted_success = 1.5, weighted_pods = 4 + 1
        assert!((stats.confidence - 1.5 / 3.0).abs() < 1e-12);
        assert_eq!(stats.pods, 2);
        assert!((stats.reasons.avg_success - 1.5 / 2.001).abs() < 1e-12);
        assert_eq!(stats.reasons.event_count, 2);
        assert_eq!(stats.reasons.recent_count, 2);
    }

    #[test]
    fn test_slot_table_covers_both_actions() {
        let midnight = 1_699_920_000_000;
        let events = vec![
            history_event("app", midnight + 3_600_000, 2, Some(1.0)),
            history_event("app", midnight + 3_700_000, -2, Some(1.0)),
            history_event("app", midnight + 7_200_000, 1, None),
        ];
        let weighted: Vec<_> = events
            .iter()
            .map(|e| WeightedEvent::new(e, midnight + MILLIS_PER_DAY, 0.0, &utc()))
            .collect();

        let table = slot_table(&weighted, 1800);
        assert_eq!(table.len(), 3);
        assert_eq!((table[0].time_of_day, table[0].action), (3600, ScaleAction::Up));
        assert_eq!((table[1].time_of_day, table[1].action), (3600, ScaleAction::Down));
        assert_eq!((table[2].time_of_day, table[2].action), (7200, ScaleAction::Up));
    }

    #[test]
    fn test_success_clamped_before_sums() {
        let mut negative = history_event("app", 0, 3, Some(-4.0));
        let mut nan = history_event("app", 0, 3, Some(f64::NAN));
        assert_eq!(effective_success(&negative), 0.0);
        assert_eq!(effective_success(&nan), 0.0);
        negative.success_score = Some(7.0);
        nan.success_score = None;
        assert_eq!(effective_success(&negative), 1.0);
        assert_eq!(effective_success(&nan), 1.0);
    }
}
