//! Scoring of a completed scaling action

/// Spread of ELU+heap variability at which the stability terms reach zero
const VARIABILITY_SCALE: f64 = 0.2;

/// Inputs to the success score of one action
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub pods_added: i64,
    pub pod_count: u32,
    pub pre_elu_mean: f64,
    pub post_elu_mean: f64,
    pub post_heap_mean: f64,
    pub sigma_elu: f64,
    pub sigma_heap: f64,
    pub elu_threshold: f64,
    pub heap_threshold: f64,
}

/// Stability term shared by responsiveness and performance
fn stability(sigma_elu: f64, sigma_heap: f64) -> f64 {
    (1.0 - (sigma_elu + sigma_heap) / VARIABILITY_SCALE).max(0.0)
}

/// 0.7 when both means landed under their thresholds, plus 0.3 scaled by stability
pub fn responsiveness(inputs: &ScoreInputs) -> f64 {
    let under = inputs.post_elu_mean < inputs.elu_threshold
        && inputs.post_heap_mean < inputs.heap_threshold;
    0.7 * f64::from(u8::from(under)) + 0.3 * stability(inputs.sigma_elu, inputs.sigma_heap)
}

/// Pods needed to bring the pre-action ELU under the threshold
pub fn optimal_pods(pre_elu_mean: f64, pod_count: u32, elu_threshold: f64) -> f64 {
    let threshold = if elu_threshold > 0.0 {
        elu_threshold
    } else {
        f64::EPSILON
    };
    (pre_elu_mean * f64::from(pod_count) / threshold).ceil()
}

pub fn resource_score(inputs: &ScoreInputs) -> f64 {
    let pod_count = inputs.pod_count.max(1);
    let optimal = optimal_pods(inputs.pre_elu_mean, pod_count, inputs.elu_threshold);
    let excess = inputs.pods_added.unsigned_abs() as f64 - optimal;
    (1.0 - excess / f64::from(pod_count)).max(0.0)
}

/// Success score of a prediction-driven action, clamped to [0, 1]
pub fn prediction_success(inputs: &ScoreInputs) -> f64 {
    let score = 0.6 * responsiveness(inputs) + 0.4 * resource_score(inputs);
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Auxiliary score handed to the clustering collaborator; not persisted
pub fn performance_score(delta_elu: f64, delta_heap: f64, sigma_elu: f64, sigma_heap: f64) -> f64 {
    let improvement = (-(delta_elu + delta_heap) / VARIABILITY_SCALE).clamp(0.0, 1.0);
    0.6 * improvement + 0.4 * stability(sigma_elu, sigma_heap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> ScoreInputs {
        ScoreInputs {
            pods_added: 4,
            pod_count: 4,
            pre_elu_mean: 0.75,
            post_elu_mean: 0.5,
            post_heap_mean: 0.5,
            sigma_elu: 0.05,
            sigma_heap: 0.05,
            elu_threshold: 0.75,
            heap_threshold: 0.85,
        }
    }

    #[test]
    fn test_responsiveness_components() {
        let i = inputs();
        assert!((responsiveness(&i) - (0.7 + 0.3 * 0.5)).abs() < 1e-9);

        let hot = ScoreInputs {
            post_elu_mean: 0.95,
            ..i
        };
        assert!((responsiveness(&hot) - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_resource_score_rewards_right_sizing() {
        // optimal = ceil(0.75 * 4 / 0.75) = 4
        assert_eq!(optimal_pods(0.75, 4, 0.75), 4.0);
        assert!((resource_score(&inputs()) - 1.0).abs() < 1e-9);

        // under-provisioning is not capped here; the success score clamps
        let under = ScoreInputs {
            pods_added: 2,
            ..inputs()
        };
        assert!((resource_score(&under) - 1.5).abs() < 1e-9);

        let overshoot = ScoreInputs {
            pods_added: 8,
            ..inputs()
        };
        assert!((resource_score(&overshoot) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_prediction_success_combines_scores() {
        let expected = 0.6 * 0.85 + 0.4 * 1.0;
        assert!((prediction_success(&inputs()) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs_stay_bounded() {
        let degenerate = ScoreInputs {
            pod_count: 0,
            elu_threshold: 0.0,
            sigma_elu: f64::NAN,
            ..inputs()
        };
        let score = prediction_success(&degenerate);
        assert!(score.is_finite());
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_performance_score() {
        assert!((performance_score(-0.2, 0.0, 0.0, 0.0) - 1.0).abs() < 1e-9);
        assert!((performance_score(0.3, 0.1, 0.2, 0.1) - 0.0).abs() < 1e-9);
    }
}
