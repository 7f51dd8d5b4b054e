//! Learning/threshold service seam.
//!
//! The engine never computes its own Kelly fraction or decision thresholds;
//! it polls them from here every cycle. The static implementation hands back
//! configuration; a real deployment plugs in whatever learns from fills.

use crate::state::Config;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub kelly_fraction: f64,
    /// Regime-adjusted minimum consensus confidence to act
    pub min_confidence: f64,
    /// Regime-adjusted minimum consensus coherence to act
    pub min_coherence: f64,
}

pub trait LearningService: Send {
    fn poll(&self) -> Thresholds;
}

/// Configuration-backed thresholds; no adaptation.
pub struct StaticLearning {
    thresholds: Thresholds,
}

impl StaticLearning {
    pub fn new(cfg: &Config) -> Self {
        Self {
            thresholds: Thresholds {
                kelly_fraction: 0.25,
                min_confidence: cfg.confidence_threshold,
                min_coherence: cfg.coherence_threshold,
            },
        }
    }

    pub fn with_kelly(mut self, fraction: f64) -> Self {
        self.thresholds.kelly_fraction = fraction.clamp(0.0, 1.0);
        self
    }
}

impl LearningService for StaticLearning {
    fn poll(&self) -> Thresholds {
        self.thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_learning_reflects_config() {
        let mut cfg = Config::from_env();
        cfg.confidence_threshold = 0.61;
        cfg.coherence_threshold = 0.47;
        let svc = StaticLearning::new(&cfg);
        let t = svc.poll();
        assert!((t.min_confidence - 0.61).abs() < 1e-9);
        assert!((t.min_coherence - 0.47).abs() < 1e-9);
    }

    #[test]
    fn test_with_kelly_clamps() {
        let cfg = Config::from_env();
        let svc = StaticLearning::new(&cfg).with_kelly(1.7);
        assert_eq!(svc.poll().kelly_fraction, 1.0);
    }
}
