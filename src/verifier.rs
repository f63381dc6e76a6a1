//! External proof-kernel adapter.
//!
//! Provides binary accept/reject ground truth by rendering a proposition and a
//! candidate proof into a complete program and handing it to the kernel as a
//! child process. The kernel is the only judge: exit code 0 means accepted.

use crate::axioms::{extract_axioms, AxiomSet};
use crate::config::{ConfigError, VerifierSettings};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use thiserror::Error;
use wait_timeout::ChildExt;

/// Errors during a verifier invocation
#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("Verifier IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to start verifier `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Verification timeout after {limit:?} (ran {elapsed:?})")]
    Timeout {
        limit: Duration,
        elapsed: Duration,
        diagnostic: String,
    },
}

/// Result of one kernel invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    /// Kernel accepted the program
    pub success: bool,
    /// Wall-clock time of the child process
    pub duration: Duration,
    /// Combined stdout and stderr
    pub raw_diagnostic: String,
    /// Process exit code (None when killed or never started)
    pub exit_code: Option<i32>,
}

impl VerificationOutcome {
    /// Failed outcome standing in for an invocation that errored.
    ///
    /// Timeouts keep their measured elapsed time so cumulative timing stays
    /// honest; other adapter errors carry no kernel time.
    #[must_use]
    pub fn from_error(err: &VerifierError) -> Self {
        match err {
            VerifierError::Timeout {
                elapsed, diagnostic, ..
            } => Self {
                success: false,
                duration: *elapsed,
                raw_diagnostic: format!("{diagnostic}\n{err}"),
                exit_code: None,
            },
            other => Self {
                success: false,
                duration: Duration::ZERO,
                raw_diagnostic: other.to_string(),
                exit_code: None,
            },
        }
    }

    /// Last `n` lines of the diagnostic text
    #[must_use]
    pub fn diagnostic_tail(&self, n: usize) -> String {
        tail_lines(&self.raw_diagnostic, n)
    }
}

pub(crate) fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Capability interface to a proof kernel.
///
/// Graders only talk to the kernel through this trait so a stub can stand in
/// for deterministic tests.
pub trait Verifier {
    /// Render a proposition and a proof body into a complete program
    fn render(&self, proposition: &str, proof: &str) -> String;

    /// Check a complete program
    ///
    /// # Errors
    ///
    /// Returns `VerifierError::Timeout` when the budget expires, or an IO /
    /// spawn error when the kernel could not be run at all.
    fn execute(&self, program: &str) -> Result<VerificationOutcome, VerifierError>;

    /// Axioms reported in a successful run's diagnostic
    fn parse_axioms(&self, diagnostic: &str) -> AxiomSet {
        extract_axioms(diagnostic)
    }
}

/// Run the verifier and fold every error into a failed outcome
pub fn attempt<V: Verifier + ?Sized>(verifier: &V, program: &str) -> VerificationOutcome {
    match verifier.execute(program) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(error = %err, "verifier attempt failed");
            VerificationOutcome::from_error(&err)
        }
    }
}

const DEFAULT_TEMPLATE: &str = "import Mathlib
set_option autoImplicit false

theorem candidate_goal : {{ proposition }} := by
{{ proof }}

#print axioms candidate_goal
";

static PLACEHOLDER: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\{\{\s*(proposition|proof|PROP|PROOF)\s*\}\}")
        .expect("placeholder pattern is a valid literal")
});

/// Wrapper template with `{{ proposition }}` / `{{ proof }}` placeholders.
///
/// `proof` receives the body indented by two spaces, for templates that
/// already write `:= by`. `PROOF` receives the body verbatim, for templates
/// that expect a complete proof term. `PROP` is an alias of `proposition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramTemplate {
    source: String,
}

impl Default for ProgramTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl ProgramTemplate {
    #[must_use]
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
        }
    }

    /// Load a template file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        Ok(Self::new(&std::fs::read_to_string(path)?))
    }

    /// Substitute the proposition and proof into the template
    #[must_use]
    pub fn render(&self, proposition: &str, proof: &str) -> String {
        let indented = indent_body(proof);
        PLACEHOLDER
            .replace_all(&self.source, |caps: &regex::Captures<'_>| match &caps[1] {
                "proposition" | "PROP" => proposition.to_string(),
                "proof" => indented.clone(),
                _ => proof.to_string(),
            })
            .into_owned()
    }
}

/// Indent every non-blank line by two spaces
#[must_use]
pub fn indent_body(body: &str) -> String {
    body.lines()
        .map(|line| {
            if line.trim().is_empty() {
                line.to_string()
            } else {
                format!("  {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Verifier backed by a real kernel process
#[derive(Debug, Clone)]
pub struct KernelVerifier {
    argv: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    template: ProgramTemplate,
    file_name: String,
}

impl KernelVerifier {
    /// Build from verifier settings
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the command is unusable or the template
    /// file cannot be read.
    pub fn from_settings(settings: &VerifierSettings, timeout: Duration) -> Result<Self, ConfigError> {
        let argv = settings.command_argv()?;
        let template = match &settings.template {
            Some(path) => ProgramTemplate::load(path)?,
            None => ProgramTemplate::default(),
        };
        Ok(Self {
            argv,
            workdir: settings.workdir.clone(),
            timeout,
            template,
            file_name: "Candidate.lean".to_string(),
        })
    }

    /// Override the file name the program is written under
    #[must_use]
    pub fn with_file_name(mut self, name: &str) -> Self {
        self.file_name = name.to_string();
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}

impl Verifier for KernelVerifier {
    fn render(&self, proposition: &str, proof: &str) -> String {
        self.template.render(proposition, proof)
    }

    fn execute(&self, program: &str) -> Result<VerificationOutcome, VerifierError> {
        verify(&self.argv, program, &self.file_name, &self.workdir, self.timeout)
    }
}

/// Write `program` to scoped temporary storage and check it with `argv`.
///
/// The program path is appended as the last argument; the process runs in
/// `workdir` with stdout and stderr sharing one capture file. Timing covers
/// spawn to exit only. The temporary directory is removed on every path.
///
/// On unix the kernel leads its own process group, so a timeout also takes
/// down any workers a build driver such as `lake` started.
///
/// # Errors
///
/// See [`Verifier::execute`].
pub fn verify(
    argv: &[String],
    program: &str,
    file_name: &str,
    workdir: &Path,
    timeout: Duration,
) -> Result<VerificationOutcome, VerifierError> {
    let scratch = TempDir::new()?;
    let program_path = scratch.path().join(file_name);
    std::fs::write(&program_path, program)?;

    let log_path = scratch.path().join("verifier.log");
    let log = File::create(&log_path)?;
    let log_err = log.try_clone()?;

    let Some((program_name, args)) = argv.split_first() else {
        return Err(VerifierError::SpawnFailed {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        });
    };

    let mut cmd = Command::new(program_name);
    cmd.args(args)
        .arg(&program_path)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| VerifierError::SpawnFailed {
        program: program_name.clone(),
        source,
    })?;

    let waited = match child.wait_timeout(timeout) {
        Ok(waited) => waited,
        Err(e) => {
            kill_tree(&mut child);
            return Err(e.into());
        }
    };
    let Some(status) = waited else {
        kill_tree(&mut child);
        let elapsed = start.elapsed();
        tracing::debug!(?elapsed, ?timeout, "verifier killed after timeout");
        return Err(VerifierError::Timeout {
            limit: timeout,
            elapsed,
            diagnostic: read_capture(&log_path),
        });
    };
    let duration = start.elapsed();

    Ok(VerificationOutcome {
        success: status.success(),
        duration,
        raw_diagnostic: read_capture(&log_path),
        exit_code: status.code(),
    })
}

/// SIGKILL the child's process group, falling back to the child alone, then
/// reap it.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    let killed = i32::try_from(child.id()).is_ok_and(|pid| {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        killpg(Pid::from_raw(pid), Signal::SIGKILL).is_ok()
    });
    #[cfg(not(unix))]
    let killed = false;

    if !killed {
        child.kill().ok();
    }
    child.wait().ok();
}

fn read_capture(path: &Path) -> String {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
