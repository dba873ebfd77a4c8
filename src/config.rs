use crate::tictac::TreeSize;

/// Default probability of checking the journal for a folded record.
pub const DEFAULT_JOURNAL_CHECK_PROBABILITY: f64 = 0.2;

/// Configuration for query runners
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Probability that a hash or tree fold confirms a record is still in
    /// the journal before including it (default: 0.2)
    pub journal_check_probability: f64,

    /// Tree size used when a tree query does not name one (default: Small)
    pub tree_size: TreeSize,

    /// Seed for the journal check sampler; `None` seeds from entropy
    pub sampler_seed: Option<u64>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            journal_check_probability: DEFAULT_JOURNAL_CHECK_PROBABILITY,
            tree_size: TreeSize::Small,
            sampler_seed: None,
        }
    }
}

impl QueryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the journal check probability, clamped to [0, 1]
    pub fn journal_check_probability(mut self, probability: f64) -> Self {
        self.journal_check_probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    /// Set the default tree size
    pub fn tree_size(mut self, size: TreeSize) -> Self {
        self.tree_size = size;
        self
    }

    /// Seed the journal check sampler
    pub fn sampler_seed(mut self, seed: u64) -> Self {
        self.sampler_seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueryConfig::default();
        assert_eq!(config.journal_check_probability, 0.2);
        assert_eq!(config.tree_size, TreeSize::Small);
        assert_eq!(config.sampler_seed, None);
    }

    #[test]
    fn test_config_builder() {
        let config = QueryConfig::new()
            .journal_check_probability(1.5)
            .tree_size(TreeSize::Large)
            .sampler_seed(9);

        assert_eq!(config.journal_check_probability, 1.0);
        assert_eq!(config.tree_size, TreeSize::Large);
        assert_eq!(config.sampler_seed, Some(9));

        let config = QueryConfig::new().journal_check_probability(f64::NAN);
        assert_eq!(config.journal_check_probability, 0.0);
    }
}
