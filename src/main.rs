//! Proof Eval CLI
//!
//! Grades ranked formal-proof candidates with an external kernel and reports
//! Pass@k, QES and AUC@Time.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use proof_eval::{
    compare, prepare_verifier, report, AggregateReport, AxiomPolicy, CandidateSets, EvalRunner,
    GradeConfig, ProblemSet, Verifier,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proof-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Inputs and overrides shared by the grading commands
#[derive(Args)]
struct RunArgs {
    /// Problem set (JSONL)
    #[arg(long)]
    problems: PathBuf,

    /// Ranked candidates (JSON object: id -> [proof, ...])
    #[arg(long)]
    candidates: PathBuf,

    /// Run configuration (YAML); CLI flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verifier working directory (kernel project root)
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Seconds per verifier invocation
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade every problem with early exit over ranked candidates
    Grade {
        #[command(flatten)]
        run: RunArgs,

        /// Max candidates per problem
        #[arg(short, long)]
        k: Option<usize>,

        /// Axiom penalty policy (permissive|constructive)
        #[arg(long)]
        policy: Option<AxiomPolicy>,

        /// Drop candidates that use banned tactics
        #[arg(long)]
        ban_strong: bool,

        /// AUC@Time threshold in seconds
        #[arg(long)]
        auc_t: Option<f64>,

        /// QES weight on normalized kernel time (λ1)
        #[arg(long)]
        lambda_time: Option<f64>,

        /// QES weight on normalized proof length (λ2)
        #[arg(long)]
        lambda_length: Option<f64>,

        /// QES weight on mean axiom penalty (λ3)
        #[arg(long)]
        lambda_axiom: Option<f64>,

        /// Wrapper template file
        #[arg(long)]
        template: Option<PathBuf>,

        /// Also write every rendered program here
        #[arg(long)]
        dump_dir: Option<PathBuf>,

        /// Output report (JSON)
        #[arg(long, default_value = "out/report.json")]
        out: PathBuf,

        /// Also write a markdown report
        #[arg(long)]
        markdown: Option<PathBuf>,
    },

    /// Verify top-ranked single tactics in chunked compilation units
    Batch {
        #[command(flatten)]
        run: RunArgs,

        /// Items per compilation unit
        #[arg(long)]
        batch_size: Option<usize>,

        /// Grade at most this many items (0 = all)
        #[arg(long)]
        limit: Option<usize>,

        /// Keep going after a failed chunk
        #[arg(long)]
        continue_on_failure: bool,
    },

    /// Compare a candidate report against a baseline report
    Compare {
        #[arg(long)]
        baseline: PathBuf,

        #[arg(long)]
        candidate: PathBuf,

        /// Significance threshold
        #[arg(long, default_value_t = compare::DEFAULT_ALPHA)]
        alpha: f64,
    },

    /// Summarize every report matching a glob pattern
    Summarize {
        #[arg(long, default_value = "out/*.json")]
        pattern: String,
    },

    /// Print the program rendered for one problem and candidate
    Render {
        #[arg(long)]
        problems: PathBuf,

        #[arg(long)]
        candidates: PathBuf,

        /// Problem id
        #[arg(long)]
        id: String,

        /// Candidate rank position
        #[arg(long, default_value = "0")]
        index: usize,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        template: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<GradeConfig> {
    path.map_or_else(
        || Ok(GradeConfig::default()),
        |p| GradeConfig::load(p).with_context(|| format!("loading config {}", p.display())),
    )
}

fn load_inputs(run: &RunArgs) -> Result<(GradeConfig, ProblemSet, CandidateSets)> {
    let mut config = load_config(run.config.as_ref())?;
    if let Some(workdir) = &run.workdir {
        config.verifier.workdir.clone_from(workdir);
    }
    if let Some(timeout) = run.timeout {
        config.timeout_secs = timeout;
    }

    let problems = ProblemSet::load(&run.problems)
        .with_context(|| format!("loading problems {}", run.problems.display()))?;
    let candidates = CandidateSets::load(&run.candidates)
        .with_context(|| format!("loading candidates {}", run.candidates.display()))?;
    Ok((config, problems, candidates))
}

#[allow(clippy::too_many_lines)]
fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Grade {
            run,
            k,
            policy,
            ban_strong,
            auc_t,
            lambda_time,
            lambda_length,
            lambda_axiom,
            template,
            dump_dir,
            out,
            markdown,
        } => {
            let (mut config, problems, candidates) = load_inputs(&run)?;
            if let Some(k) = k {
                config.k = k;
            }
            if let Some(policy) = policy {
                config.axiom_policy = policy;
            }
            config.ban_strong |= ban_strong;
            if let Some(auc_t) = auc_t {
                config.auc_t = auc_t;
            }
            config.weights.time = lambda_time.unwrap_or(config.weights.time);
            config.weights.length = lambda_length.unwrap_or(config.weights.length);
            config.weights.axiom = lambda_axiom.unwrap_or(config.weights.axiom);
            if template.is_some() {
                config.verifier.template = template;
            }
            if dump_dir.is_some() {
                config.dump_dir = dump_dir;
            }

            let verifier = prepare_verifier(&config).context("preflight failed")?;
            tracing::info!(
                problems = problems.len(),
                candidates = candidates.len(),
                workdir = %verifier.workdir().display(),
                "Starting grading run"
            );

            let report = EvalRunner::new(&verifier, config).grade_all(&problems, &candidates);
            report
                .write(&out)
                .with_context(|| format!("writing report {}", out.display()))?;
            if let Some(md_path) = markdown {
                std::fs::write(&md_path, report.to_markdown())
                    .with_context(|| format!("writing markdown {}", md_path.display()))?;
            }

            println!("{}", report.to_text());
            println!("Report written to {}", out.display());
        }
        Commands::Batch {
            run,
            batch_size,
            limit,
            continue_on_failure,
        } => {
            let (mut config, problems, candidates) = load_inputs(&run)?;
            if let Some(size) = batch_size {
                config.batch.batch_size = size;
            }
            if let Some(limit) = limit {
                config.batch.limit = limit;
            }
            config.batch.fail_fast &= !continue_on_failure;

            let verifier = prepare_verifier(&config)
                .context("preflight failed")?
                .with_file_name("Batch.lean");
            let (chunks, summary) =
                EvalRunner::new(&verifier, config).run_batch(&problems, &candidates);

            for chunk in chunks.iter().filter(|c| !c.success) {
                println!(
                    "[chunk {}] FAILED ({} items: {})\n{}",
                    chunk.index,
                    chunk.size(),
                    chunk.problem_ids.join(", "),
                    chunk.diagnostic_tail
                );
                if let Some(hint) = &chunk.remediation {
                    println!("Hint: {hint}");
                }
            }
            println!(
                "[done] success@1={}/{}={:.3} in {:.1}s{}",
                summary.ok,
                summary.total,
                summary.success_rate,
                summary.elapsed_secs,
                if summary.halted { " (halted)" } else { "" }
            );
        }
        Commands::Compare {
            baseline,
            candidate,
            alpha,
        } => {
            let base = AggregateReport::load(&baseline)
                .with_context(|| format!("loading baseline {}", baseline.display()))?;
            let cand = AggregateReport::load(&candidate)
                .with_context(|| format!("loading candidate {}", candidate.display()))?;
            println!("{}", compare::compare(&base, &cand, alpha).to_text());
        }
        Commands::Summarize { pattern } => {
            let rows = report::summarize(&pattern)?;
            println!("{}", report::summary_table(&rows));
        }
        Commands::Render {
            problems,
            candidates,
            id,
            index,
            config,
            template,
        } => {
            let mut config = load_config(config.as_ref())?;
            if template.is_some() {
                config.verifier.template = template;
            }
            let problems = ProblemSet::load(&problems)?;
            let candidates = CandidateSets::load(&candidates)?;

            let Some(problem) = problems.get(&id) else {
                bail!("unknown problem id {id}");
            };
            let Some(proof) = candidates.ranked(&id).get(index) else {
                bail!("problem {id} has no candidate at index {index}");
            };

            let verifier =
                proof_eval::KernelVerifier::from_settings(&config.verifier, config.timeout())?;
            println!("{}", verifier.render(&problem.proposition, proof));
        }
    }

    Ok(())
}
