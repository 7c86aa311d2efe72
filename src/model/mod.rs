//! Estimators
//!
//! Three model families, all deterministic and serializable:
//!
//! - [`Sarimax`]: seasonal ARIMA with exogenous regressors
//! - [`Prophet`]: piecewise-linear trend with optional multi-year cycle
//! - [`BoostedTrees`]: gradient-boosted regression trees
//!
//! [`FittedModel`] is the tagged union persisted inside a model blob.

pub mod boost;
pub(crate) mod linalg;
pub mod optim;
pub mod prophet;
pub mod sarimax;

pub use boost::{BoostConfig, BoostedTrees, TreeKind};
pub use prophet::{Growth, Prophet, ProphetConfig, SeasonalityMode};
pub use sarimax::{Order, Sarimax, SarimaxSpec, SeasonalOrder, Trend};

use serde::{Deserialize, Serialize};

/// Any fitted estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum FittedModel {
    /// SARIMAX (univariate or with exogenous regressors)
    Sarimax(Sarimax),
    /// Additive/multiplicative trend model
    Prophet(Prophet),
    /// Boosted trees over the integer time index
    Boosted(BoostedTrees),
}

impl FittedModel {
    /// Short family name for logs.
    #[must_use]
    pub const fn family(&self) -> &'static str {
        match self {
            Self::Sarimax(_) => "sarimax",
            Self::Prophet(_) => "prophet",
            Self::Boosted(_) => "boosted_trees",
        }
    }
}
