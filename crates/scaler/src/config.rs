//! Scaler configuration

use anyhow::{Context, Result};
use scaler_lib::{
    EvaluationConfig, LeaderConfig, ScalingThresholds, SchedulerConfig, TrendsConfig,
    TriggerConfig,
};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "SCALER_CONFIG_FILE";

/// Scaler configuration
///
/// Every field has a default, so an empty source yields a runnable
/// single-replica configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    /// Unique identity of this replica, used as the lease holder
    pub replica_id: String,
    /// API server port for health/metrics
    pub api_port: u16,

    pub lease_name: String,
    pub lease_ttl_secs: u64,
    pub leader_poll_secs: u64,

    pub periodic_trigger_secs: u64,
    pub analysis_interval_secs: u64,
    pub debounce_window_secs: u64,
    pub post_scaling_window_secs: u64,

    pub scheduler_max_wait_secs: u64,
    pub scheduler_retry_secs: u64,

    pub elu_threshold: f64,
    pub heap_threshold: f64,
    pub scale_down_elu_threshold: f64,
    pub scale_down_heap_threshold: f64,

    pub max_history_events: usize,
    pub half_life_secs: f64,
    pub slot_secs: i64,
    pub sequence_window_secs: i64,
    pub confidence_threshold: f64,
    pub prediction_window_secs: u64,
    /// Offset from UTC used for time-of-day bucketing
    pub utc_offset_secs: i32,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        let leader = LeaderConfig::default();
        let trigger = TriggerConfig::default();
        let scheduler = SchedulerConfig::default();
        let thresholds = ScalingThresholds::default();
        let trends = TrendsConfig::default();

        Self {
            replica_id: std::env::var("HOSTNAME").unwrap_or(leader.holder_id),
            api_port: 8080,
            lease_name: leader.lease_name,
            lease_ttl_secs: leader.lease_ttl.as_secs(),
            leader_poll_secs: leader.poll_interval.as_secs(),
            periodic_trigger_secs: trigger.periodic_trigger.as_secs(),
            analysis_interval_secs: trigger.analysis_interval.as_secs(),
            debounce_window_secs: scaler_lib::debounce::DEFAULT_DEBOUNCE_WINDOW.as_secs(),
            post_scaling_window_secs: EvaluationConfig::default().post_scaling_window.as_secs(),
            scheduler_max_wait_secs: scheduler.max_wait.as_secs(),
            scheduler_retry_secs: scheduler.retry_interval.as_secs(),
            elu_threshold: thresholds.elu,
            heap_threshold: thresholds.heap,
            scale_down_elu_threshold: thresholds.scale_down_elu,
            scale_down_heap_threshold: thresholds.scale_down_heap,
            max_history_events: trends.max_history_events,
            half_life_secs: trends.half_life_secs,
            slot_secs: trends.slot_secs,
            sequence_window_secs: trends.sequence_window_secs,
            confidence_threshold: trends.confidence_threshold,
            prediction_window_secs: trends.prediction_window.as_secs(),
            utc_offset_secs: trends.utc_offset_secs,
        }
    }
}

impl ScalerConfig {
    /// Load from the optional config file and `SCALER_*` environment variables
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }
        let source = builder
            .add_source(config::Environment::with_prefix("SCALER").try_parsing(true))
            .build()
            .context("failed to read scaler configuration")?;
        Self::from_source(source)
    }

    pub fn from_source(source: config::Config) -> Result<Self> {
        let config: Self = source
            .try_deserialize()
            .context("invalid scaler configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.periodic_trigger_secs == 0 || self.analysis_interval_secs == 0 {
            anyhow::bail!("trigger intervals must be positive");
        }
        if self.leader_poll_secs == 0 || self.lease_ttl_secs <= self.leader_poll_secs {
            anyhow::bail!("lease_ttl_secs must exceed leader_poll_secs");
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            anyhow::bail!("confidence_threshold must be within [0, 1]");
        }
        Ok(())
    }

    pub fn leader(&self) -> LeaderConfig {
        LeaderConfig {
            lease_name: self.lease_name.clone(),
            holder_id: self.replica_id.clone(),
            lease_ttl: Duration::from_secs(self.lease_ttl_secs),
            poll_interval: Duration::from_secs(self.leader_poll_secs),
        }
    }

    pub fn trigger(&self) -> TriggerConfig {
        TriggerConfig {
            periodic_trigger: Duration::from_secs(self.periodic_trigger_secs),
            analysis_interval: Duration::from_secs(self.analysis_interval_secs),
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_wait: Duration::from_secs(self.scheduler_max_wait_secs),
            retry_interval: Duration::from_secs(self.scheduler_retry_secs),
        }
    }

    pub fn thresholds(&self) -> ScalingThresholds {
        ScalingThresholds {
            elu: self.elu_threshold,
            heap: self.heap_threshold,
            scale_down_elu: self.scale_down_elu_threshold,
            scale_down_heap: self.scale_down_heap_threshold,
        }
    }

    pub fn evaluation(&self) -> EvaluationConfig {
        EvaluationConfig {
            post_scaling_window: Duration::from_secs(self.post_scaling_window_secs),
            thresholds: self.thresholds(),
            ..Default::default()
        }
    }

    pub fn trends(&self) -> TrendsConfig {
        TrendsConfig {
            max_history_events: self.max_history_events,
            half_life_secs: self.half_life_secs,
            slot_secs: self.slot_secs,
            sequence_window_secs: self.sequence_window_secs,
            confidence_threshold: self.confidence_threshold,
            prediction_window: Duration::from_secs(self.prediction_window_secs),
            utc_offset_secs: self.utc_offset_secs,
        }
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_uses_defaults() {
        let source = config::Config::builder().build().unwrap();
        let config = ScalerConfig::from_source(source).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.trigger().periodic_trigger, Duration::from_secs(30));
        assert_eq!(config.trigger().analysis_interval, Duration::from_secs(3600));
        assert_eq!(config.evaluation().post_scaling_window, Duration::from_secs(300));
        assert_eq!(config.thresholds(), ScalingThresholds::default());
    }

    #[test]
    fn test_overrides_flow_into_library_configs() {
        let source = config::Config::builder()
            .set_override("replica_id", "scaler-2")
            .unwrap()
            .set_override("periodic_trigger_secs", 10)
            .unwrap()
            .set_override("utc_offset_secs", 7200)
            .unwrap()
            .build()
            .unwrap();
        let config = ScalerConfig::from_source(source).unwrap();

        assert_eq!(config.leader().holder_id, "scaler-2");
        assert_eq!(config.trigger().periodic_trigger, Duration::from_secs(10));
        assert_eq!(config.trends().utc_offset_secs, 7200);
    }

    #[test]
    fn test_rejects_lease_shorter_than_poll() {
        let source = config::Config::builder()
            .set_override("lease_ttl_secs", 2)
            .unwrap()
            .set_override("leader_poll_secs", 5)
            .unwrap()
            .build()
            .unwrap();
        assert!(ScalerConfig::from_source(source).is_err());
    }
}
