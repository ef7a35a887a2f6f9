//! Gradient-boosted regression trees on SmartCore decision trees
//!
//! Squared-error boosting: start from the target mean, then fit each shallow
//! tree to the current residuals on a row subsample and add it with
//! shrinkage. No feature scaling is needed.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};
use std::fmt;
use tracing::debug;

use crate::error::PipelineError;

type Tree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Fixed boosting hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: u16,
    pub min_samples_leaf: usize,
    /// Fraction of rows sampled (without replacement) per tree
    pub subsample: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            learning_rate: 0.05,
            max_depth: 5,
            min_samples_leaf: 10,
            subsample: 0.8,
            seed: 42,
        }
    }
}

impl BoostingParams {
    fn tree_parameters(&self) -> DecisionTreeRegressorParameters {
        DecisionTreeRegressorParameters::default()
            .with_max_depth(self.max_depth)
            .with_min_samples_leaf(self.min_samples_leaf.max(1))
            .with_min_samples_split((self.min_samples_leaf * 2).max(2))
    }
}

#[derive(Serialize, Deserialize)]
pub struct GradientBoostedRegressor {
    pub params: BoostingParams,
    n_features: usize,
    init: f64,
    trees: Vec<Tree>,
}

impl fmt::Debug for GradientBoostedRegressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradientBoostedRegressor")
            .field("params", &self.params)
            .field("n_features", &self.n_features)
            .field("init", &self.init)
            .field("trees", &self.trees.len())
            .finish()
    }
}

impl GradientBoostedRegressor {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: BoostingParams) -> Result<Self, PipelineError> {
        if x.is_empty() || y.is_empty() {
            return Err(PipelineError::Training("cannot train on empty dataset".into()));
        }
        if x.len() != y.len() {
            return Err(PipelineError::Training(format!(
                "feature and target count mismatch: {} rows, {} targets",
                x.len(),
                y.len()
            )));
        }
        if !(params.subsample > 0.0 && params.subsample <= 1.0) {
            return Err(PipelineError::Training(format!(
                "subsample must be in (0, 1], got {}",
                params.subsample
            )));
        }

        let n = x.len();
        let n_features = x[0].len();
        let full = to_matrix(x, n_features)?;
        let init = y.iter().sum::<f64>() / n as f64;
        let mut current = vec![init; n];
        let mut rng = StdRng::seed_from_u64(params.seed);
        let sample_size = ((n as f64 * params.subsample).round() as usize).clamp(1, n);
        let tree_params = params.tree_parameters();
        let mut trees = Vec::with_capacity(params.n_estimators);

        for round in 0..params.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&current).map(|(t, p)| t - p).collect();

            let mut rows = if sample_size < n {
                rand::seq::index::sample(&mut rng, n, sample_size).into_vec()
            } else {
                (0..n).collect()
            };
            rows.sort_unstable();

            let xs: Vec<Vec<f64>> = rows.iter().map(|&i| x[i].clone()).collect();
            let ys: Vec<f64> = rows.iter().map(|&i| residuals[i]).collect();
            let tree = Tree::fit(&to_matrix(&xs, n_features)?, &ys, tree_params.clone())
                .map_err(|e| PipelineError::Training(format!("tree {round} failed: {e:?}")))?;

            let update = tree
                .predict(&full)
                .map_err(|e| PipelineError::Training(format!("tree {round} predict failed: {e:?}")))?;
            for (p, u) in current.iter_mut().zip(&update) {
                *p += params.learning_rate * u;
            }
            trees.push(tree);
        }

        debug!(rows = n, trees = trees.len(), "boosted ensemble fitted");

        Ok(Self {
            params,
            n_features,
            init,
            trees,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError> {
        if x.is_empty() {
            return Ok(Vec::new());
        }
        let matrix = to_matrix(x, self.n_features)?;
        let mut out = vec![self.init; x.len()];
        for tree in &self.trees {
            let update = tree
                .predict(&matrix)
                .map_err(|e| PipelineError::Training(format!("prediction failed: {e:?}")))?;
            for (p, u) in out.iter_mut().zip(&update) {
                *p += self.params.learning_rate * u;
            }
        }
        Ok(out)
    }
}

fn to_matrix(x: &[Vec<f64>], n_features: usize) -> Result<DenseMatrix<f64>, PipelineError> {
    let mut flat = Vec::with_capacity(x.len() * n_features);
    for row in x {
        if row.len() != n_features {
            return Err(PipelineError::Training(format!(
                "all feature vectors must have {} values, got {}",
                n_features,
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    Ok(DenseMatrix::new(x.len(), n_features, flat, false))
}
