use approx::assert_relative_eq;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use saob::lars::lasso_aic;
use saob::lasso::{LassoSettings, lasso_cv};
use saob::preprocess::FactorMatrix;
use saob::regression::{ordinary_least_squares, weighted_least_squares};
use saob::tree::{TreeSettings, decision_tree};

/// `y = 2·x0 - 1·x1 + noise`; the remaining columns are pure noise.
fn sparse_problem(n: usize, p: usize, seed: u64) -> (FactorMatrix, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let values = Array2::from_shape_fn((n, p), |_| normal.sample(&mut rng));
    let noise = Normal::new(0.0, 0.1).unwrap();
    let y = Array1::from_shape_fn(n, |i| {
        2.0 * values[[i, 0]] - values[[i, 1]] + noise.sample(&mut rng)
    });
    let names = (0..p).map(|j| format!("f{j}")).collect();
    (FactorMatrix { names, values }, y)
}

#[test]
fn equal_weights_reproduce_ordinary_least_squares() {
    let (x, y) = sparse_problem(40, 4, 7);
    let ols = ordinary_least_squares(&x, &y).unwrap();
    let wls = weighted_least_squares(&x, &y, &Array1::from_elem(40, 3.0)).unwrap();

    for (a, b) in ols.coefficients.iter().zip(&wls.coefficients) {
        assert_eq!(a.name, b.name);
        assert_relative_eq!(a.coef, b.coef, epsilon = 1e-10);
        assert_relative_eq!(a.std_err, b.std_err, epsilon = 1e-10);
    }
    assert_relative_eq!(ols.r_squared, wls.r_squared, epsilon = 1e-10);
    assert_relative_eq!(ols.f_statistic, wls.f_statistic, epsilon = 1e-6);
}

#[test]
fn unequal_weights_change_the_fit() {
    let (x, mut y) = sparse_problem(30, 2, 11);
    // A gross error on a light observation barely moves the weighted fit.
    y[0] += 100.0;
    let mut weights = Array1::from_elem(30, 50.0);
    weights[0] = 1e-4;
    let ols = ordinary_least_squares(&x, &y).unwrap();
    let wls = weighted_least_squares(&x, &y, &weights).unwrap();

    assert!(wls.coefficient("const").unwrap().coef.abs() < 0.1);
    assert!((wls.coefficient("f0").unwrap().coef - 2.0).abs() < 0.1);
    assert!(ols.coefficient("const").unwrap().coef > 1.0);
}

#[test]
fn cross_validated_lasso_keeps_the_signal() {
    let (x, y) = sparse_problem(40, 8, 3);
    let result = lasso_cv(&x, &y, &LassoSettings::default()).unwrap();

    assert_eq!(result.alphas.len(), 100);
    assert_eq!(result.mse_path.dim(), (100, 40));
    assert!(result.coefficient("f0").unwrap() > 1.5);
    assert!(result.coefficient("f1").unwrap() < -0.5);
    let selected: Vec<&str> = result.selected().map(|c| c.name.as_str()).collect();
    assert!(selected.contains(&"f0") && selected.contains(&"f1"));

    let mean = result.mean_mse();
    let best = mean.iter().cloned().fold(f64::INFINITY, f64::min);
    let chosen = result
        .alphas
        .iter()
        .position(|&a| a == result.alpha)
        .unwrap();
    assert_eq!(mean[chosen], best);
}

#[test]
fn aic_lasso_agrees_on_the_sign_pattern() {
    let (x, y) = sparse_problem(60, 6, 5);
    let result = lasso_aic(&x, &y).unwrap();
    assert!(result.coefficient("f0").unwrap() > 1.5);
    assert!(result.coefficient("f1").unwrap() < -0.5);
    assert_eq!(result.alphas.len(), result.criterion.len());
    let best = result.criterion.iter().cloned().fold(f64::INFINITY, f64::min);
    assert!(result.criterion.iter().any(|&c| c == best));
}

#[test]
fn tree_leaves_respect_the_minimum_and_fit_a_step() {
    let mut rng = StdRng::seed_from_u64(21);
    let n = 64;
    let values = Array2::from_shape_fn((n, 2), |_| rng.gen_range(0.0..10.0));
    let y = values.column(0).mapv(|v| if v < 5.0 { -1.0 } else { 1.0 });
    let x = FactorMatrix {
        names: vec!["step".to_string(), "noise".to_string()],
        values,
    };

    let settings = TreeSettings { min_samples_leaf: 8 };
    let result = decision_tree(&x, &y, &settings).unwrap();
    for node in result.tree.nodes().iter().filter(|n| n.split.is_none()) {
        assert!(node.samples >= 8);
    }
    assert!(result.r_squared > 0.99);
    assert!(result.importances[0].importance > result.importances[1].importance);
    let total: f64 = result.importances.iter().map(|i| i.importance).sum();
    assert_relative_eq!(total, 1.0, epsilon = 1e-12);
}
