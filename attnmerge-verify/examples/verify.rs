//! Correctness verification: compare every CPU merge implementation against
//! the reference on the same inputs.
//!
//! Runs one case (optionally loaded from a JSON config) or the full sweep,
//! prints per-candidate timing and max abs diffs, and exits non-zero if any
//! case mismatches.
//!
//! Usage:
//!   cargo run --release -p attnmerge-verify --example verify -- \
//!     --tokens 1724 --heads 32 --dtype bf16
//!   cargo run --release -p attnmerge-verify --example verify -- --sweep

use std::path::PathBuf;

use attnmerge::{DType, Result};
use attnmerge_verify::{SweepConfig, Verifier, VerifyConfig, VerifyReport};
use clap::Parser;

/// Verify split-KV attention state merging across CPU implementations.
#[derive(Parser)]
#[command(name = "verify")]
struct Cli {
    /// JSON file with a single-case config
    #[arg(
        short,
        long,
        env = "ATTNMERGE_VERIFY_CONFIG",
        conflicts_with_all = ["sweep", "sweep_config"]
    )]
    config: Option<PathBuf>,

    /// Run the token/head/dtype sweep instead of a single case
    #[arg(long)]
    sweep: bool,

    /// JSON file with a sweep config (implies --sweep)
    #[arg(long)]
    sweep_config: Option<PathBuf>,

    /// Number of tokens
    #[arg(short, long)]
    tokens: Option<usize>,

    /// Number of query heads
    #[arg(long)]
    heads: Option<usize>,

    /// Features per head
    #[arg(long)]
    head_size: Option<usize>,

    /// Output dtype (f32, f16, bf16)
    #[arg(long)]
    dtype: Option<DType>,

    /// RNG seed for input generation
    #[arg(long)]
    seed: Option<u64>,

    /// Probability of a +inf sentinel per LSE entry
    #[arg(long)]
    sentinel_rate: Option<f64>,

    /// Keep pairs where both chunks drew the sentinel
    #[arg(long)]
    allow_dual_sentinel: bool,

    /// Skip computing and comparing the merged LSE
    #[arg(long)]
    no_lse: bool,

    /// Candidate to compare the others against
    #[arg(long, default_value = "reference")]
    reference: String,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Apply command-line overrides on top of `base`.
    fn apply(&self, mut base: VerifyConfig) -> VerifyConfig {
        if let Some(tokens) = self.tokens {
            base.num_tokens = tokens;
        }
        if let Some(heads) = self.heads {
            base.num_heads = heads;
        }
        if let Some(head_size) = self.head_size {
            base.head_size = head_size;
        }
        if let Some(dtype) = self.dtype {
            base.dtype = dtype;
        }
        if let Some(seed) = self.seed {
            base.seed = seed;
        }
        if let Some(rate) = self.sentinel_rate {
            base.sentinel_rate = rate;
        }
        base.allow_dual_sentinel |= self.allow_dual_sentinel;
        base.want_lse &= !self.no_lse;
        base
    }
}

fn print_report(report: &VerifyReport) {
    let c = &report.config;
    println!(
        "\ntokens={} heads={} head_size={} dtype={} want_lse={}",
        c.num_tokens, c.num_heads, c.head_size, c.dtype, c.want_lse
    );
    for timing in &report.timings {
        let speedup = report
            .speedup(&timing.name, &report.reference)
            .map_or_else(String::new, |s| format!(" ({s:.2}x vs {})", report.reference));
        println!("  {:<18} {:>10.4}ms{speedup}", timing.name, timing.avg_ms);
    }
    for cmp in &report.comparisons {
        let lse = cmp
            .lse_max_diff
            .map_or_else(|| "-".to_string(), |d| format!("{d:e}"));
        println!(
            "  {} vs {}: output max diff {:e}, lse max diff {lse}",
            cmp.candidate, cmp.reference, cmp.output_max_diff
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut verifier = Verifier::with_cpu_backends();
    verifier.set_reference(&cli.reference)?;

    let results = if cli.sweep || cli.sweep_config.is_some() {
        let mut sweep = match &cli.sweep_config {
            Some(path) => SweepConfig::from_file(path)?,
            None => SweepConfig::default(),
        };
        sweep.base = cli.apply(sweep.base);
        verifier.run_sweep(&sweep)?
    } else {
        let base = match &cli.config {
            Some(path) => VerifyConfig::from_file(path)?,
            None => VerifyConfig::default(),
        };
        vec![verifier.run(&cli.apply(base))]
    };

    let total = results.len();
    let mut reports: Vec<VerifyReport> = Vec::with_capacity(total);
    let mut failures = 0usize;
    for result in results {
        match result {
            Ok(report) => {
                if !cli.json {
                    print_report(&report);
                }
                reports.push(report);
            }
            Err(e) => {
                failures += 1;
                println!("✗ FAIL: {e}");
            }
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    if failures > 0 {
        println!("\n✗ FAIL: {failures} of {total} case(s) mismatched");
        std::process::exit(1);
    }
    if !cli.json {
        println!("\n✓ PASS: {total} case(s) match");
    }
    Ok(())
}
