//! Fixed-budget Newton-Raphson iteration for a single node voltage.

use crate::error::{StageError, Result};

/// Iteration budget and rail bounds for a node solve.
///
/// The iteration count is fixed rather than tolerance-driven so every call
/// costs the same amount of work. Rail clamping after each step keeps the
/// candidate inside the physically reachable range even when the budget runs
/// out before convergence. Unset rails follow the stage's supply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonConfig {
    /// Number of Newton steps per solve.
    pub iterations: usize,
    /// Lower rail (volts); ground when unset.
    pub rail_low: Option<f64>,
    /// Upper rail (volts); the supply when unset.
    pub rail_high: Option<f64>,
    /// Added to the derivative before dividing.
    pub epsilon: f64,
}

impl Default for NewtonConfig {
    /// Five steps between ground and the supply.
    fn default() -> Self {
        Self {
            iterations: 5,
            rail_low: None,
            rail_high: None,
            epsilon: f64::MIN_POSITIVE,
        }
    }
}

impl NewtonConfig {
    /// Set the iteration count.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the derivative guard.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Pin both rails instead of following the supply.
    pub fn with_rails(mut self, low: f64, high: f64) -> Self {
        self.rail_low = Some(low);
        self.rail_high = Some(high);
        self
    }

    /// Rails for a stage running from `supply`.
    pub fn rails(&self, supply: f64) -> (f64, f64) {
        (self.rail_low.unwrap_or(0.0), self.rail_high.unwrap_or(supply))
    }

    /// Check the budget, and that the rails sit inside `[0, supply]`.
    pub fn validate(&self, stage: &'static str, supply: f64) -> Result<()> {
        if self.iterations == 0 {
            return Err(StageError::config(stage, "newton iteration count must be at least 1"));
        }
        let (low, high) = self.rails(supply);
        if !(low.is_finite() && high.is_finite()) || low >= high {
            return Err(StageError::config(
                stage,
                format!("newton rails must satisfy low < high, got [{}, {}]", low, high),
            ));
        }
        if low < 0.0 || high > supply {
            return Err(StageError::config(
                stage,
                format!(
                    "newton rails [{}, {}] must lie within the supply [0, {}]",
                    low, high, supply
                ),
            ));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(StageError::config(stage, "newton epsilon must be positive"));
        }
        Ok(())
    }
}

/// Newton-Raphson solver on one unknown voltage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSolver {
    iterations: usize,
    rail_low: f64,
    rail_high: f64,
    epsilon: f64,
}

impl NodeSolver {
    /// Create a solver from a configuration validated against `supply`.
    pub fn new(config: &NewtonConfig, supply: f64) -> Self {
        let (rail_low, rail_high) = config.rails(supply);
        Self {
            iterations: config.iterations,
            rail_low,
            rail_high,
            epsilon: config.epsilon,
        }
    }

    /// The rails every solve is clamped to.
    pub fn rails(&self) -> (f64, f64) {
        (self.rail_low, self.rail_high)
    }

    /// Midpoint of the rails, the default starting point.
    pub fn midpoint(&self) -> f64 {
        0.5 * (self.rail_low + self.rail_high)
    }

    /// Solve `f(v) = 0` starting at `guess`.
    ///
    /// `residual` returns the node current sum and its derivative with
    /// respect to `v`. Always runs the full iteration budget and always
    /// returns a value inside the rails.
    #[inline]
    pub fn solve(&self, guess: f64, residual: impl Fn(f64) -> (f64, f64)) -> f64 {
        let (low, high) = (self.rail_low, self.rail_high);

        let mut v = guess.clamp(low, high);
        for _ in 0..self.iterations {
            let (i, g) = residual(v);
            v = (v - i / (g + self.epsilon)).clamp(low, high);
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_converges_in_one_step() {
        let solver = NodeSolver::new(&NewtonConfig::default().with_iterations(1), 9.0);
        // 1 mS conductance to a 3 V source
        let v = solver.solve(4.5, |v| (1e-3 * (v - 3.0), 1e-3));
        assert_relative_eq!(v, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_clamps_to_rails() {
        let solver = NodeSolver::new(&NewtonConfig::default(), 9.0);
        let v = solver.solve(4.5, |v| (v - 20.0, 1.0));
        assert_eq!(v, 9.0);
        let v = solver.solve(4.5, |v| (v + 20.0, 1.0));
        assert_eq!(v, 0.0);
    }

    #[test]
    fn test_zero_derivative_stays_finite() {
        let solver = NodeSolver::new(&NewtonConfig::default(), 9.0);
        let v = solver.solve(4.5, |_| (0.0, 0.0));
        assert_eq!(v, 4.5);
        let v = solver.solve(4.5, |_| (1e-3, 0.0));
        assert!(v.is_finite());
        assert!((0.0..=9.0).contains(&v));
    }

    #[test]
    fn test_quadratic_root() {
        let solver = NodeSolver::new(&NewtonConfig::default().with_iterations(8), 9.0);
        let v = solver.solve(4.5, |v| (v * v - 2.0, 2.0 * v));
        assert_relative_eq!(v, 2.0f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_rails_follow_supply() {
        let config = NewtonConfig::default();
        assert_eq!(config.rails(12.0), (0.0, 12.0));
        let solver = NodeSolver::new(&config, 12.0);
        assert_eq!(solver.rails(), (0.0, 12.0));
        assert_eq!(solver.midpoint(), 6.0);
        assert_eq!(solver.solve(6.0, |v| (v - 20.0, 1.0)), 12.0);

        let pinned = NewtonConfig::default().with_rails(1.0, 8.0);
        assert_eq!(NodeSolver::new(&pinned, 12.0).rails(), (1.0, 8.0));
    }

    #[test]
    fn test_validate() {
        assert!(NewtonConfig::default().validate("cmos", 9.0).is_ok());
        assert!(NewtonConfig::default()
            .with_iterations(0)
            .validate("cmos", 9.0)
            .is_err());
        assert!(NewtonConfig::default().validate("cmos", -1.0).is_err());
        assert!(NewtonConfig::default()
            .with_epsilon(0.0)
            .validate("cmos", 9.0)
            .is_err());
    }

    #[test]
    fn test_validate_rails_inside_supply() {
        let config = NewtonConfig::default().with_rails(0.0, 9.0);
        assert!(config.validate("cmos", 9.0).is_ok());
        assert!(config.validate("cmos", 12.0).is_ok());
        assert!(config.validate("cmos", 6.0).is_err());
        assert!(NewtonConfig::default()
            .with_rails(-1.0, 9.0)
            .validate("cmos", 9.0)
            .is_err());
        assert!(NewtonConfig::default()
            .with_rails(5.0, 2.0)
            .validate("cmos", 9.0)
            .is_err());
    }
}
