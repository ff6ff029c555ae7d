//! Incoming projections and the row-length bounds of their connectors.

use std::fmt;

/// Quantile used to bound the row length of random connectors.
pub const ROW_LENGTH_QUANTILE: f64 = 0.9999;

/// Default atoms per core of a pre-synaptic population.
pub const DEFAULT_PRE_ATOMS_PER_CORE: u32 = 256;

/// How pre-synaptic atoms connect to post-synaptic atoms
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Connector {
    /// Every pre atom connects to every post atom
    AllToAll,

    /// Pre atom `i` connects to post atom `i`
    OneToOne,

    /// Each pair connects independently with `probability`
    FixedProbability {
        /// Connection probability in `[0, 1]`
        probability: f64,
    },

    /// Explicit connection list
    FromList {
        /// Longest row (post targets of one pre atom) in the list
        max_row_length: u32,
    },
}

impl Connector {
    /// Upper bound on synapses in one row when the post side has `n_post` atoms
    pub fn max_row_length(&self, n_post: u32) -> u32 {
        match *self {
            Self::AllToAll => n_post,
            Self::OneToOne => 1.min(n_post),
            Self::FixedProbability { probability } => {
                binomial_ppf(n_post, probability, ROW_LENGTH_QUANTILE)
            }
            Self::FromList { max_row_length } => max_row_length.min(n_post),
        }
    }

    /// Expected connections arriving at one post atom from `n_pre` atoms
    pub fn expected_in_degree(&self, n_pre: u32) -> f64 {
        match *self {
            Self::AllToAll => f64::from(n_pre),
            Self::OneToOne => 1.0,
            Self::FixedProbability { probability } => f64::from(n_pre) * probability,
            Self::FromList { max_row_length } => f64::from(max_row_length.min(n_pre)),
        }
    }

    /// Words of on-chip generator parameters
    pub const fn generator_words(&self) -> u64 {
        match self {
            Self::AllToAll => 1,
            Self::OneToOne => 0,
            Self::FixedProbability { .. } => 5,
            Self::FromList { .. } => 2,
        }
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllToAll => f.write_str("all-to-all"),
            Self::OneToOne => f.write_str("one-to-one"),
            Self::FixedProbability { probability } => write!(f, "fixed-probability({probability})"),
            Self::FromList { max_row_length } => write!(f, "from-list(max row {max_row_length})"),
        }
    }
}

/// Smallest `k` with `P(X <= k) >= q` for `X ~ Binomial(n, p)`.
///
/// Terms are walked in log space so large `n` with small `p` does not
/// underflow the recurrence.
pub fn binomial_ppf(n: u32, p: f64, q: f64) -> u32 {
    if n == 0 || p <= 0.0 {
        return 0;
    }
    if p >= 1.0 {
        return n;
    }

    let ln_p = p.ln();
    let ln_not_p = (1.0 - p).ln();
    let mut ln_pmf = f64::from(n) * ln_not_p;
    let mut cdf = ln_pmf.exp();
    let mut k = 0;
    while cdf < q && k < n {
        ln_pmf += f64::from(n - k).ln() - f64::from(k + 1).ln() + ln_p - ln_not_p;
        k += 1;
        cdf += ln_pmf.exp();
    }
    k
}

/// A projection arriving at the population being partitioned
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Label for logs
    pub label: String,

    /// Atoms in the pre-synaptic population
    pub pre_n_atoms: u32,

    /// Atoms per core of the pre-synaptic population
    pub pre_max_atoms_per_core: u32,

    /// Connectivity
    pub connector: Connector,

    /// Target synapse type (0 = excitatory, 1 = inhibitory for the built-in models)
    pub synapse_type: u32,

    /// Largest absolute weight
    pub weight: f64,

    /// Matrix is expanded on chip from generator parameters
    pub generate_on_chip: bool,
}

impl Projection {
    /// Projection with unit weight onto synapse type 0, generated on chip
    pub fn new(label: impl Into<String>, pre_n_atoms: u32, connector: Connector) -> Self {
        Self {
            label: label.into(),
            pre_n_atoms,
            pre_max_atoms_per_core: DEFAULT_PRE_ATOMS_PER_CORE,
            connector,
            synapse_type: 0,
            weight: 1.0,
            generate_on_chip: true,
        }
    }

    /// Set the pre-synaptic atoms per core
    #[must_use]
    pub fn with_pre_max_atoms_per_core(mut self, atoms: u32) -> Self {
        self.pre_max_atoms_per_core = atoms.max(1);
        self
    }

    /// Set the target synapse type
    #[must_use]
    pub fn with_synapse_type(mut self, synapse_type: u32) -> Self {
        self.synapse_type = synapse_type;
        self
    }

    /// Set the weight
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Choose host or on-chip matrix generation
    #[must_use]
    pub fn with_generate_on_chip(mut self, generate_on_chip: bool) -> Self {
        self.generate_on_chip = generate_on_chip;
        self
    }

    /// Pre-synaptic machine vertices feeding this projection
    pub fn pre_vertices(&self) -> u32 {
        self.pre_n_atoms.div_ceil(self.pre_max_atoms_per_core.max(1))
    }

    /// Atom counts of the pre-synaptic machine vertices
    pub fn pre_vertex_sizes(&self) -> impl Iterator<Item = u32> + '_ {
        let per_core = self.pre_max_atoms_per_core.max(1);
        (0..self.pre_vertices())
            .map(move |i| per_core.min(self.pre_n_atoms - i * per_core))
    }
}
