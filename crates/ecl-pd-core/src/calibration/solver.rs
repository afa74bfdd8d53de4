use serde::{Deserialize, Serialize};

use crate::config::BisectionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BisectionOutcome {
    pub root: f64,
    pub iterations: u32,
    /// f(root) - target
    pub residual: f64,
    /// Whether the target lay within [f(lower), f(upper)].
    pub bracketed: bool,
}

/// Solve `f(x) = target` for an increasing `f` by bisection.
///
/// Each step keeps the half whose image still straddles the target; the
/// midpoint of the final bracket is returned. An unbracketed target drives
/// the bracket onto the nearer bound and reports `bracketed = false` instead
/// of failing.
pub fn bisect<F>(settings: &BisectionSettings, target: f64, f: F) -> BisectionOutcome
where
    F: Fn(f64) -> f64,
{
    let mut lo = settings.lower;
    let mut hi = settings.upper;
    let bracketed = f(lo) <= target && target <= f(hi);

    let mut iterations = 0;
    while iterations < settings.iterations {
        let mid = (lo + hi) / 2.0;
        let val = f(mid);
        iterations += 1;
        if settings.tolerance > 0.0 && (val - target).abs() <= settings.tolerance {
            return BisectionOutcome {
                root: mid,
                iterations,
                residual: val - target,
                bracketed,
            };
        }
        if val > target {
            hi = mid;
        } else {
            lo = mid;
        }
    }

    let root = (lo + hi) / 2.0;
    BisectionOutcome {
        root,
        iterations,
        residual: f(root) - target,
        bracketed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_linear_root() {
        let out = bisect(&BisectionSettings::default(), 3.0, |x| 2.0 * x + 1.0);
        assert!(out.bracketed);
        assert_eq!(out.iterations, 100);
        assert!(approx_eq(out.root, 1.0, 1e-12), "root = {}", out.root);
        assert!(out.residual.abs() < 1e-12);
    }

    #[test]
    fn test_tolerance_exits_early() {
        let settings = BisectionSettings {
            tolerance: 1e-3,
            ..BisectionSettings::default()
        };
        let out = bisect(&settings, 0.5, |x| x);
        assert!(out.iterations < 100);
        assert!(out.residual.abs() <= 1e-3);
    }

    #[test]
    fn test_unbracketed_target_converges_to_bound() {
        let out = bisect(&BisectionSettings::default(), 100.0, |x| x);
        assert!(!out.bracketed);
        assert!(approx_eq(out.root, 20.0, 1e-9));

        let out = bisect(&BisectionSettings::default(), -100.0, |x| x);
        assert!(!out.bracketed);
        assert!(approx_eq(out.root, -20.0, 1e-9));
    }

    #[test]
    fn test_sigmoid_target() {
        let sigmoid = |c: f64| 1.0 / (1.0 + (-c).exp());
        let out = bisect(&BisectionSettings::default(), 0.25, sigmoid);
        assert!(approx_eq(out.root, (1.0f64 / 3.0).ln(), 1e-9));
    }
}
