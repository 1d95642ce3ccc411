use crate::error::{Error, Result};

/// Default reciprocal-rank-fusion constant.
pub const DEFAULT_RRF_K: usize = 60;

/// Default weight applied to the full-text source during fusion.
pub const DEFAULT_FULLTEXT_WEIGHT: f32 = 0.4;

/// Default weight applied to the vector source during fusion.
pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.6;

/// Default number of results returned by a query.
pub const DEFAULT_LIMIT: usize = 10;

/// Each source is asked for `limit * DEFAULT_OVERFETCH_FACTOR` candidates
/// so fusion has room to reorder.
pub const DEFAULT_OVERFETCH_FACTOR: usize = 2;

pub const RRF_K_ENV_VAR: &str = "DOCRANK_RRF_K";
pub const FULLTEXT_WEIGHT_ENV_VAR: &str = "DOCRANK_FULLTEXT_WEIGHT";
pub const VECTOR_WEIGHT_ENV_VAR: &str = "DOCRANK_VECTOR_WEIGHT";

/// Tunables for weighted reciprocal rank fusion.
///
/// Construct through [`FusionConfig::new`] or [`FusionConfig::from_env`] so
/// the invariants (`k >= 1`, weights in `[0, 1]`) are checked once.
///
/// # Examples
///
/// ```
/// use docrank::config::FusionConfig;
///
/// let config = FusionConfig::new(60, 0.8, 0.2).unwrap();
/// assert_eq!(config.k(), 60);
/// assert!(FusionConfig::new(0, 0.4, 0.6).is_err());
/// assert!(FusionConfig::new(60, 1.5, 0.6).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    k: usize,
    fulltext_weight: f32,
    vector_weight: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_RRF_K,
            fulltext_weight: DEFAULT_FULLTEXT_WEIGHT,
            vector_weight: DEFAULT_VECTOR_WEIGHT,
        }
    }
}

impl FusionConfig {
    pub fn new(k: usize, fulltext_weight: f32, vector_weight: f32) -> Result<Self> {
        if k == 0 {
            return Err(Error::Config(
                "rrf k must be a positive integer".to_string(),
            ));
        }
        check_weight("fulltext", fulltext_weight)?;
        check_weight("vector", vector_weight)?;

        Ok(Self {
            k,
            fulltext_weight,
            vector_weight,
        })
    }

    /// Defaults overridden by `DOCRANK_RRF_K`, `DOCRANK_FULLTEXT_WEIGHT`
    /// and `DOCRANK_VECTOR_WEIGHT` when set.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let k = env_override(RRF_K_ENV_VAR)?.unwrap_or(defaults.k);
        let fulltext_weight = env_override(FULLTEXT_WEIGHT_ENV_VAR)?
            .unwrap_or(defaults.fulltext_weight);
        let vector_weight = env_override(VECTOR_WEIGHT_ENV_VAR)?
            .unwrap_or(defaults.vector_weight);
        Self::new(k, fulltext_weight, vector_weight)
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn fulltext_weight(&self) -> f32 {
        self.fulltext_weight
    }

    pub fn vector_weight(&self) -> f32 {
        self.vector_weight
    }
}

fn check_weight(name: &str, weight: f32) -> Result<()> {
    if (0.0..=1.0).contains(&weight) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{name} weight must be within [0, 1], got {weight}"
        )))
    }
}

fn env_override<T: std::str::FromStr>(var: &str) -> Result<Option<T>> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            Error::Config(format!("invalid value for {var}: {raw:?}"))
        }),
        Err(_) => Ok(None),
    }
}

/// Query-time defaults shared by the CLI and library callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchDefaults {
    pub limit: usize,
    pub overfetch_factor: usize,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }
}

impl SearchDefaults {
    /// Number of candidates to request from each source for `limit` results.
    pub fn overfetch(&self, limit: usize) -> usize {
        limit.saturating_mul(self.overfetch_factor.max(1))
    }
}
