//! Verification run configuration.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields take the defaults below.

use std::path::Path;

use attnmerge::dtype::DType;
use attnmerge::{Error, Result};
use serde::{Deserialize, Serialize};

/// One verification case: input dimensions, input generation and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyConfig {
    #[serde(default = "default_num_tokens")]
    pub num_tokens: usize,
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,
    #[serde(default = "default_head_size")]
    pub head_size: usize,
    /// Dtype of the partial and merged outputs. LSEs are always F32.
    #[serde(default = "default_dtype")]
    pub dtype: DType,
    #[serde(default)]
    pub seed: u64,
    /// Probability that an LSE entry is replaced by the `+inf` sentinel.
    #[serde(default = "default_sentinel_rate")]
    pub sentinel_rate: f64,
    /// Keep positions where both LSEs drew the sentinel. By default they
    /// are cleared so every pair has at least one contributing chunk.
    #[serde(default)]
    pub allow_dual_sentinel: bool,
    #[serde(default = "default_want_lse")]
    pub want_lse: bool,
    #[serde(default = "default_warmup_iters")]
    pub warmup_iters: usize,
    #[serde(default = "default_repeat_iters")]
    pub repeat_iters: usize,
}

fn default_num_tokens() -> usize {
    256
}

fn default_num_heads() -> usize {
    16
}

fn default_head_size() -> usize {
    128
}

fn default_dtype() -> DType {
    DType::F16
}

fn default_sentinel_rate() -> f64 {
    0.1
}

fn default_want_lse() -> bool {
    true
}

fn default_warmup_iters() -> usize {
    2
}

fn default_repeat_iters() -> usize {
    20
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            num_tokens: default_num_tokens(),
            num_heads: default_num_heads(),
            head_size: default_head_size(),
            dtype: default_dtype(),
            seed: 0,
            sentinel_rate: default_sentinel_rate(),
            allow_dual_sentinel: false,
            want_lse: default_want_lse(),
            warmup_iters: default_warmup_iters(),
            repeat_iters: default_repeat_iters(),
        }
    }
}

impl VerifyConfig {
    /// Load configuration from a JSON file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// result fails [`validate`](Self::validate).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run can use.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.head_size == 0 {
            return Err(Error::Config("head_size must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.sentinel_rate) {
            return Err(Error::Config(format!(
                "sentinel_rate must be in [0, 1], got {}",
                self.sentinel_rate
            )));
        }
        if self.repeat_iters == 0 {
            return Err(Error::Config("repeat_iters must be at least 1".into()));
        }
        Ok(())
    }
}

/// A grid of cases sharing everything but their dimensions and dtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_tokens")]
    pub num_tokens: Vec<usize>,
    #[serde(default = "default_sweep_heads")]
    pub num_heads: Vec<usize>,
    #[serde(default = "default_sweep_head_sizes")]
    pub head_sizes: Vec<usize>,
    #[serde(default = "default_sweep_dtypes")]
    pub dtypes: Vec<DType>,
    /// Settings applied to every case; its own dimensions are ignored.
    #[serde(default)]
    pub base: VerifyConfig,
}

fn default_sweep_tokens() -> Vec<usize> {
    vec![256, 512, 613, 1536, 1724, 4096]
}

fn default_sweep_heads() -> Vec<usize> {
    vec![8, 16, 32]
}

fn default_sweep_head_sizes() -> Vec<usize> {
    vec![128]
}

fn default_sweep_dtypes() -> Vec<DType> {
    vec![DType::F16, DType::BF16]
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            num_tokens: default_sweep_tokens(),
            num_heads: default_sweep_heads(),
            head_sizes: default_sweep_head_sizes(),
            dtypes: default_sweep_dtypes(),
            base: VerifyConfig::default(),
        }
    }
}

impl SweepConfig {
    /// Load a sweep from a JSON file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// result fails [`validate`](Self::validate).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every case of the grid.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an empty axis or an invalid case.
    pub fn validate(&self) -> Result<()> {
        if self.num_tokens.is_empty()
            || self.num_heads.is_empty()
            || self.head_sizes.is_empty()
            || self.dtypes.is_empty()
        {
            return Err(Error::Config("sweep axes must not be empty".into()));
        }
        self.cases().iter().try_for_each(VerifyConfig::validate)
    }

    /// Expand the grid, dtype outermost and token count innermost.
    #[must_use]
    pub fn cases(&self) -> Vec<VerifyConfig> {
        let mut cases = Vec::new();
        for &dtype in &self.dtypes {
            for &head_size in &self.head_sizes {
                for &num_heads in &self.num_heads {
                    for &num_tokens in &self.num_tokens {
                        cases.push(VerifyConfig {
                            num_tokens,
                            num_heads,
                            head_size,
                            dtype,
                            ..self.base.clone()
                        });
                    }
                }
            }
        }
        cases
    }
}
