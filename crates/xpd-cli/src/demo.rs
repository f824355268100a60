//! Built-in demo experiment: estimates the integral of x^2 over [0, 1].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use xpd_core::{ErrorInfo, XpdError};
use xpd_dispatch::FunctionRegistry;

const EXACT: f64 = 1.0 / 3.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    #[default]
    MonteCarlo,
    Trapezoid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegrateParams {
    /// Samples or intervals.
    #[serde(rename = "N")]
    pub n: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub method: Method,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    pub estimate: f64,
    pub error: f64,
}

pub fn integrate(params: IntegrateParams) -> Result<Estimate, XpdError> {
    if params.n == 0 {
        return Err(XpdError::Execution(
            ErrorInfo::new("task_failed", "N must be positive").with_context("N", "0"),
        ));
    }
    let n = params.n as f64;
    let estimate = match params.method {
        Method::MonteCarlo => {
            let mut rng = StdRng::seed_from_u64(params.seed);
            (0..params.n)
                .map(|_| {
                    let x: f64 = rng.gen();
                    x * x
                })
                .sum::<f64>()
                / n
        }
        Method::Trapezoid => {
            let h = 1.0 / n;
            let inner: f64 = (1..params.n).map(|i| (i as f64 * h).powi(2)).sum();
            h * (0.5 + inner)
        }
    };
    Ok(Estimate {
        estimate,
        error: (estimate - EXACT).abs(),
    })
}

/// Functions the `xpd run-batch` subcommand can evaluate.
pub fn registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry.register_typed("demo", "integrate", integrate);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xpd_core::task;

    fn params(n: usize, method: Method) -> IntegrateParams {
        IntegrateParams { n, seed: 3, method }
    }

    #[test]
    fn trapezoid_converges_quadratically() {
        let coarse = integrate(params(10, Method::Trapezoid)).unwrap();
        let fine = integrate(params(100, Method::Trapezoid)).unwrap();
        assert!(fine.error < coarse.error / 50.0);
        assert!((coarse.estimate - 0.335).abs() < 1e-12);
    }

    #[test]
    fn monte_carlo_is_seeded() {
        let a = integrate(params(1000, Method::MonteCarlo)).unwrap();
        let b = integrate(params(1000, Method::MonteCarlo)).unwrap();
        assert_eq!(a, b);
        assert!(a.error < 0.05);
    }

    #[test]
    fn zero_samples_fail() {
        let err = integrate(params(0, Method::Trapezoid)).unwrap_err();
        assert_eq!(err.code(), "task_failed");
    }

    #[test]
    fn registry_decodes_task_records() {
        let f = registry().resolve("demo", "integrate").unwrap();
        let value = f(&task([("N", json!(4)), ("method", json!("trapezoid"))])).unwrap();
        assert!((value["estimate"].as_f64().unwrap() - 0.34375).abs() < 1e-12);
    }
}
