//! Named experiments over the dining table.
//!
//! Each scenario is a table composed from a fork behaviour and a delay plan,
//! plus the rule its outcome is judged by. None of them changes the fork
//! order, so all are deadlock free; they only differ in how timing biases
//! the scheduler.
//!
//! | scenario        | timing                                          | verdict                     |
//! |-----------------|-------------------------------------------------|-----------------------------|
//! | `baseline`      | none                                            | someone ate                 |
//! | `traced`        | wait `id * 20ms` when hungry, forks held 100ms  | run completes               |
//! | `single-slow`   | philosopher 0 eats for 1s                       | busiest ate > floor         |
//! | `weak-unfair`   | even think 10ms, odd think 100ms                | everyone ate                |
//! | `strong-unfair` | even think 50ms, odd never think                | `max >= ratio * min`        |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::FairnessConfig;
use crate::error::TableError;
use crate::fork::{DefaultFork, DelayedFork, Fork};
use crate::philosopher::Philosopher;
use crate::strategy::{DelayPlan, DelayRule, OrderedStrategy};
use crate::table::{DiningTable, RunBound, RunReport};
use crate::telemetry::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    Baseline,
    Traced,
    SingleSlow,
    WeakUnfair,
    StrongUnfair,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Baseline,
        Scenario::Traced,
        Scenario::SingleSlow,
        Scenario::WeakUnfair,
        Scenario::StrongUnfair,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Baseline => "baseline",
            Scenario::Traced => "traced",
            Scenario::SingleSlow => "single-slow",
            Scenario::WeakUnfair => "weak-unfair",
            Scenario::StrongUnfair => "strong-unfair",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Scenario::Baseline => "Resource ordering with no delays; someone must eat",
            Scenario::Traced => {
                "Staggered hunger and slow forks; the run must complete without deadlock"
            }
            Scenario::SingleSlow => {
                "Philosopher 0 eats for a second per meal; the others must keep eating"
            }
            Scenario::WeakUnfair => {
                "Even seats think 10ms, odd seats 100ms; nobody may starve outright"
            }
            Scenario::StrongUnfair => {
                "Even seats think 50ms, odd seats never; the meal ratio must exceed the threshold"
            }
        }
    }

    pub fn delay_plan(self) -> DelayPlan {
        match self {
            Scenario::Baseline => DelayPlan::default(),
            Scenario::Traced => DelayPlan::default().pre_acquire(DelayRule::PerId { step_ms: 20 }),
            Scenario::SingleSlow => DelayPlan::default().eating(DelayRule::Only {
                philosopher: 0,
                ms: 1_000,
            }),
            Scenario::WeakUnfair => DelayPlan::default().post_eat(DelayRule::Parity {
                even_ms: 10,
                odd_ms: 100,
            }),
            Scenario::StrongUnfair => DelayPlan::default().post_eat(DelayRule::Parity {
                even_ms: 50,
                odd_ms: 0,
            }),
        }
    }

    /// How long a fork stays with its holder right after being acquired.
    pub fn fork_hold(self) -> Duration {
        match self {
            Scenario::Traced => Duration::from_millis(100),
            _ => Duration::ZERO,
        }
    }

    pub fn default_duration(self) -> Duration {
        match self {
            Scenario::Baseline | Scenario::SingleSlow => Duration::from_secs(2),
            Scenario::Traced | Scenario::WeakUnfair | Scenario::StrongUnfair => {
                Duration::from_secs(1)
            }
        }
    }

    pub fn build_table(
        self,
        seats: usize,
        sink: Arc<dyn EventSink>,
        join_grace: Duration,
    ) -> Result<DiningTable, TableError> {
        table_with_plan(seats, self.delay_plan(), self.fork_hold(), sink, join_grace)
    }

    /// Judge a finished run.
    pub fn judge(self, report: &RunReport, fairness: &FairnessConfig) -> ScenarioVerdict {
        let (passed, expectation) = match self {
            Scenario::Baseline => (report.max_meals > 0, "max_meals > 0".to_string()),
            Scenario::Traced => (true, "run completes".to_string()),
            Scenario::SingleSlow => (
                report.max_meals > fairness.slow_meal_floor,
                format!("max_meals > {}", fairness.slow_meal_floor),
            ),
            Scenario::WeakUnfair => (report.min_meals > 0, "min_meals > 0".to_string()),
            Scenario::StrongUnfair => (
                report.ratio_reached(fairness.max_ratio),
                format!("max_meals >= {} * min_meals", fairness.max_ratio),
            ),
        };
        ScenarioVerdict {
            scenario: self,
            passed,
            expectation,
            report: report.clone(),
        }
    }

    /// Build, run and judge in one go.
    pub fn run(
        self,
        seats: usize,
        duration: Duration,
        sink: Arc<dyn EventSink>,
        join_grace: Duration,
        fairness: &FairnessConfig,
    ) -> Result<ScenarioVerdict, TableError> {
        let table = self.build_table(seats, sink, join_grace)?;
        table.run(RunBound::For(duration))?;
        let report = table.report()?;
        let verdict = self.judge(&report, fairness);
        log::info!(
            "[Scenario] {} seats={} passed={} ({}) meals={:?}",
            self,
            seats,
            verdict.passed,
            verdict.expectation,
            report.meals
        );
        Ok(verdict)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| TableError::InvalidConfig {
                reason: format!("unknown scenario '{}'", s),
            })
    }
}

/// Outcome of a judged scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioVerdict {
    pub scenario: Scenario,
    pub passed: bool,
    pub expectation: String,
    pub report: RunReport,
}

/// Table whose philosophers all follow `plan`, with forks held for
/// `fork_hold` after each acquisition.
pub fn table_with_plan(
    seats: usize,
    plan: DelayPlan,
    fork_hold: Duration,
    sink: Arc<dyn EventSink>,
    join_grace: Duration,
) -> Result<DiningTable, TableError> {
    let strategy = Arc::new(OrderedStrategy::new(plan));
    DiningTable::builder(seats)
        .forks(move |id| -> Arc<dyn Fork> {
            if fork_hold.is_zero() {
                Arc::new(DefaultFork::new(id))
            } else {
                Arc::new(DelayedFork::new(id, fork_hold))
            }
        })
        .philosophers(move |id| Philosopher::with_strategy(id, strategy.clone()))
        .event_sink(sink)
        .join_grace(join_grace)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(meals: Vec<u64>) -> RunReport {
        let min_meals = *meals.iter().min().unwrap();
        let max_meals = *meals.iter().max().unwrap();
        RunReport {
            seats: meals.len(),
            elapsed_ms: 1_000,
            total_meals: meals.iter().sum(),
            fairness_ratio: (min_meals > 0).then(|| max_meals as f64 / min_meals as f64),
            meals,
            min_meals,
            max_meals,
        }
    }

    #[test]
    fn test_names_roundtrip() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>().unwrap(), scenario);
            assert!(!scenario.description().is_empty());
        }
        assert!("nope".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_plans_match_experiments() {
        assert!(Scenario::Baseline.delay_plan().is_idle());
        assert_eq!(Scenario::Traced.fork_hold(), Duration::from_millis(100));
        assert_eq!(
            Scenario::StrongUnfair.delay_plan().post_eat,
            DelayRule::Parity {
                even_ms: 50,
                odd_ms: 0
            }
        );
        assert_eq!(
            Scenario::SingleSlow.delay_plan().eating,
            DelayRule::Only {
                philosopher: 0,
                ms: 1_000
            }
        );
    }

    #[test]
    fn test_judge_uses_thresholds() {
        let fairness = FairnessConfig::default();

        assert!(Scenario::Baseline.judge(&report(vec![0, 3]), &fairness).passed);
        assert!(!Scenario::Baseline.judge(&report(vec![0, 0]), &fairness).passed);

        assert!(!Scenario::WeakUnfair.judge(&report(vec![0, 3]), &fairness).passed);
        assert!(Scenario::WeakUnfair.judge(&report(vec![1, 3]), &fairness).passed);

        assert!(Scenario::StrongUnfair.judge(&report(vec![10, 15]), &fairness).passed);
        assert!(!Scenario::StrongUnfair.judge(&report(vec![10, 14]), &fairness).passed);

        assert!(!Scenario::SingleSlow.judge(&report(vec![1, 1000]), &fairness).passed);
        assert!(Scenario::SingleSlow.judge(&report(vec![1, 1001]), &fairness).passed);
    }

    #[test]
    fn test_baseline_scenario_runs() {
        let verdict = Scenario::Baseline
            .run(
                3,
                Duration::from_millis(200),
                Arc::new(crate::telemetry::NoopSink),
                Duration::from_secs(2),
                &FairnessConfig::default(),
            )
            .unwrap();
        assert!(verdict.passed);
        assert_eq!(verdict.report.seats, 3);
    }
}
