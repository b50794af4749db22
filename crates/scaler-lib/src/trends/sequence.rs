//! Scale-down steps learned from what followed scale-ups in a slot

use super::slots::WeightedEvent;
use crate::models::{ScaleAction, SequenceReasons};

/// One learned scale-down step relative to its parent scale-up
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceStep {
    /// Seconds after the scale-up
    pub offset_secs: f64,
    pub pods: u32,
    pub reasons: SequenceReasons,
}

#[derive(Default)]
struct OrdinalAccumulator {
    seq_count: usize,
    weight_sum: f64,
    weighted_offset_sum: f64,
    weighted_pods_sum: f64,
}

/// Group the scale-downs following each scale-up by ordinal position and
/// average each position.
///
/// `ups` are the scale-up events of one slot; `all` is the full weighted
/// history, from which scale-downs strictly after each up and within
/// `window_secs` are taken.
pub fn learn_steps(
    ups: &[&WeightedEvent<'_>],
    all: &[WeightedEvent<'_>],
    window_secs: i64,
) -> Vec<SequenceStep> {
    let mut downs: Vec<&WeightedEvent<'_>> = all
        .iter()
        .filter(|e| e.action() == ScaleAction::Down)
        .collect();
    downs.sort_by_key(|e| e.event.event_timestamp);

    let window_ms = window_secs * 1000;
    let mut ordinals: Vec<OrdinalAccumulator> = Vec::new();

    for up in ups {
        let start = up.event.event_timestamp;
        let following = downs.iter().filter(|d| {
            let ts = d.event.event_timestamp;
            ts > start && ts - start <= window_ms
        });

        for (ordinal, down) in following.enumerate() {
            if ordinals.len() <= ordinal {
                ordinals.resize_with(ordinal + 1, OrdinalAccumulator::default);
            }
            let acc = &mut ordinals[ordinal];
            let w = down.weight * down.success;
            let offset_secs = (down.event.event_timestamp - start) as f64 / 1000.0;

            acc.seq_count += 1;
            acc.weight_sum += w;
            acc.weighted_offset_sum += w * offset_secs;
            acc.weighted_pods_sum += w * down.event.pods_added.unsigned_abs() as f64;
        }
    }

    let mut steps: Vec<SequenceStep> = ordinals
        .into_iter()
        .filter(|acc| acc.seq_count > 0)
        .map(|acc| {
            let avg_offset = acc.weighted_offset_sum / (acc.weight_sum + 0.001);
            let avg_pods = acc.weighted_pods_sum / (acc.weight_sum + 0.001);
            SequenceStep {
                offset_secs: avg_offset.max(1.0),
                pods: avg_pods.ceil().clamp(1.0, f64::from(u32::MAX)) as u32,
                reasons: SequenceReasons {
                    seq_count: acc.seq_count,
                    avg_offset,
                    avg_pods,
                },
            }
        })
        .collect();

    steps.sort_by(|a, b| a.offset_secs.total_cmp(&b.offset_secs));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::history_event;
    use chrono::FixedOffset;

    #[test]
    fn test_steps_grouped_by_ordinal() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let mut events = Vec::new();
        for day in 0..3 {
            let base = day * 86_400_000;
            events.push(history_event("app", base, 10, Some(1.0)));
            events.push(history_event("app", base + 180_000, -3, Some(1.0)));
            events.push(history_event("app", base + 480_000, -7, Some(1.0)));
            // outside the window
            events.push(history_event("app", base + 900_000, -1, Some(1.0)));
        }
        let now = 3 * 86_400_000;
        let weighted: Vec<_> = events
            .iter()
            .map(|e| WeightedEvent::new(e, now, 0.0, &utc))
            .collect();
        let ups: Vec<_> = weighted
            .iter()
            .filter(|e| e.action() == ScaleAction::Up)
            .collect();

        let steps = learn_steps(&ups, &weighted, 600);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].reasons.seq_count, 3);
        assert!((steps[0].offset_secs - 180.0).abs() < 1.0);
        assert_eq!(steps[0].pods, 3);
        assert!((steps[1].offset_secs - 480.0).abs() < 1.0);
        assert_eq!(steps[1].pods, 7);
    }

    #[test]
    fn test_no_following_downs_yields_no_steps() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let events = vec![
            history_event("app", 1_000_000, 2, Some(1.0)),
            history_event("app", 900_000, -2, Some(1.0)),
        ];
        let weighted: Vec<_> = events
            .iter()
            .map(|e| WeightedEvent::new(e, 2_000_000, 0.0, &utc))
            .collect();
        let ups: Vec<_> = weighted.iter().take(1).collect();
        assert!(learn_steps(&ups, &weighted, 600).is_empty());
    }

    #[test]
    fn test_zero_success_downs_stay_bounded() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let events = vec![
            history_event("app", 0, 2, Some(1.0)),
            history_event("app", 60_000, -2, Some(0.0)),
        ];
        let weighted: Vec<_> = events
            .iter()
            .map(|e| WeightedEvent::new(e, 120_000, 0.0, &utc))
            .collect();
        let ups: Vec<_> = weighted.iter().take(1).collect();
        let steps = learn_steps(&ups, &weighted, 600);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].offset_secs, 1.0);
        assert_eq!(steps[0].pods, 1);
    }
}
