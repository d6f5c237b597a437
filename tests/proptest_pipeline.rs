//! Property-based checks of the filter, signal and backtest invariants over
//! random price paths.

use kalman_pairtrade::backtest::{
    max_drawdown, run_backtest, run_backtest_on_columns, sharpe_ratio, CostModel,
};
use kalman_pairtrade::kalman::{run_filter, run_filter_on_pair, FilterParams};
use kalman_pairtrade::series::PricePair;
use kalman_pairtrade::signal::{generate_signals, SignalThresholds};
use proptest::prelude::*;

fn walk(start: f64, steps: &[f64]) -> Vec<f64> {
    steps
        .iter()
        .scan(start, |p, s| {
            *p += s;
            Some(*p)
        })
        .collect()
}

fn noisy_pair(x_steps: &[f64], noise: &[f64], k: f64) -> PricePair {
    let x = walk(50.0, x_steps);
    let y = x.iter().zip(noise).map(|(v, e)| k * v + e).collect();
    PricePair::from_prices(x, y).unwrap()
}

proptest! {
    #[test]
    fn positions_stay_in_range(
        x_steps in prop::collection::vec(-1.0f64..1.0, 30..200),
        noise in prop::collection::vec(-2.0f64..2.0, 200),
        k in 0.5f64..3.0,
        entry in 0.5f64..3.0,
        exit_frac in -0.5f64..0.9,
    ) {
        let pair = noisy_pair(&x_steps, &noise, k);
        let filter = run_filter_on_pair(&FilterParams::default(), &pair).unwrap();
        let thresholds = SignalThresholds::new(entry, entry * exit_frac);
        let signals = generate_signals(&filter, &thresholds).unwrap();
        prop_assert_eq!(signals.len(), pair.len());
        for s in &signals {
            prop_assert!(matches!(s.position, -1 | 0 | 1));
            prop_assert!(s.z_score.is_finite());
        }
    }

    #[test]
    fn drawdown_never_positive_and_equity_ends_at_total(
        x_steps in prop::collection::vec(-1.0f64..1.0, 30..200),
        noise in prop::collection::vec(-2.0f64..2.0, 200),
        k in 0.5f64..3.0,
        cost in 0.0f64..0.01,
    ) {
        let pair = noisy_pair(&x_steps, &noise, k);
        let filter = run_filter_on_pair(&FilterParams::default(), &pair).unwrap();
        let signals = generate_signals(&filter, &SignalThresholds::default()).unwrap();
        let result = run_backtest(&signals, &filter, &pair, &CostModel::new(cost)).unwrap();
        prop_assert!(result.max_drawdown <= 0.0);
        prop_assert!(result.steps.iter().all(|s| s.drawdown <= 0.0));
        prop_assert_eq!(result.equity_curve.last().copied(), Some(result.total_pnl));
        prop_assert!(result.sharpe_ratio.is_finite());
    }

    #[test]
    fn non_negative_net_has_no_drawdown(
        y_steps in prop::collection::vec(0.0f64..2.0, 2..100),
    ) {
        // long the spread with zero hedge on a non-decreasing leg
        let y = walk(10.0, &y_steps);
        let n = y.len();
        let result = run_backtest_on_columns(
            &vec![1; n],
            &vec![0.0; n],
            &vec![5.0; n],
            &y,
            &CostModel::new(0.0),
        )
        .unwrap();
        prop_assert!(result.net_pnl().iter().all(|v| *v >= 0.0));
        prop_assert_eq!(result.max_drawdown, 0.0);
    }

    #[test]
    fn identical_net_scores_zero_sharpe(value in -10.0f64..10.0, n in 1usize..300) {
        prop_assert_eq!(sharpe_ratio(&vec![value; n], 252.0), 0.0);
    }

    #[test]
    fn drawdown_bounded_by_zero(equity in prop::collection::vec(-100.0f64..100.0, 1..100)) {
        prop_assert!(max_drawdown(&equity) <= 0.0);
    }

    #[test]
    fn unreachable_entry_is_always_flat(
        x_steps in prop::collection::vec(-1.0f64..1.0, 10..150),
        noise in prop::collection::vec(-5.0f64..5.0, 150),
    ) {
        let pair = noisy_pair(&x_steps, &noise, 1.2);
        let filter = run_filter_on_pair(&FilterParams::default(), &pair).unwrap();
        let signals = generate_signals(&filter, &SignalThresholds::new(1e9, 0.0)).unwrap();
        prop_assert!(signals.iter().all(|s| s.position == 0));
        let result = run_backtest(&signals, &filter, &pair, &CostModel::default()).unwrap();
        prop_assert_eq!(result.total_pnl, 0.0);
    }

    #[test]
    fn signal_replay_is_deterministic(
        x_steps in prop::collection::vec(-1.0f64..1.0, 10..150),
        noise in prop::collection::vec(-3.0f64..3.0, 150),
    ) {
        let pair = noisy_pair(&x_steps, &noise, 0.9);
        let filter = run_filter_on_pair(&FilterParams::default(), &pair).unwrap();
        let th = SignalThresholds::new(1.5, 0.2);
        let first = generate_signals(&filter, &th).unwrap();
        let second = generate_signals(&filter, &th).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn proportional_series_converges_to_ratio(
        x_steps in prop::collection::vec(-1.0f64..1.0, 20..200),
        k in 0.5f64..3.0,
        initial in -5.0f64..5.0,
    ) {
        let x = walk(50.0, &x_steps);
        let y: Vec<f64> = x.iter().map(|v| k * v).collect();
        let params = FilterParams::default().with_initial_state(initial, 1.0);
        let out = run_filter(&params, &x, &y).unwrap();
        let last = out.last().unwrap();
        prop_assert!((last.beta - k).abs() < 1e-6, "beta={} k={}", last.beta, k);
        prop_assert!(last.spread.abs() <= out[0].spread.abs());
    }
}
