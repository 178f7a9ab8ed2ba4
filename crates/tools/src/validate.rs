//! Post-write syntax validation.
//!
//! After the file tool writes a source file, a few read-only checks for its
//! language run against just that file. The result is appended to the tool's
//! success text; a failing check never undoes the write.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest checker output kept in a report.
const MAX_OUTPUT_CHARS: usize = 2000;

/// Syntax-checks `sys.argv[1]` without writing bytecode.
const PYTHON_PARSE: &str = "import ast, sys; ast.parse(open(sys.argv[1], 'rb').read(), sys.argv[1])";

/// Languages with known checkers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Go,
    Python,
    JavaScript,
    Shell,
    Rust,
}

impl Language {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "go" => Some(Self::Go),
            "py" => Some(Self::Python),
            "js" | "mjs" | "cjs" => Some(Self::JavaScript),
            "sh" | "bash" => Some(Self::Shell),
            "rs" => Some(Self::Rust),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Go => "Go",
            Self::Python => "Python",
            Self::JavaScript => "JavaScript",
            Self::Shell => "Shell",
            Self::Rust => "Rust",
        }
    }

    fn checks(&self, file: &str) -> Vec<Check> {
        let file = file.to_string();
        match self {
            Self::Go => vec![
                Check::new("gofmt", "gofmt", ["-l".into(), file.clone()]).fail_on_output(),
                // Vet the package so symbols from sibling files resolve.
                Check::new("go vet", "go", ["vet".into(), ".".into()]),
            ],
            // Parse only; py_compile would drop a __pycache__ next to the file.
            Self::Python => vec![Check::new(
                "python syntax",
                "python3",
                ["-c".into(), PYTHON_PARSE.into(), file],
            )],
            Self::JavaScript => vec![Check::new("node --check", "node", ["--check".into(), file])],
            Self::Shell => vec![Check::new("bash -n", "bash", ["-n".into(), file])],
            Self::Rust => vec![Check::new(
                "rustfmt --check",
                "rustfmt",
                ["--check".into(), "--edition".into(), "2021".into(), file],
            )],
        }
    }
}

#[derive(Debug, Clone)]
struct Check {
    label: &'static str,
    program: &'static str,
    args: Vec<String>,
    /// Exit status 0 with output still counts as a failure (`gofmt -l`).
    fail_on_output: bool,
}

impl Check {
    fn new(label: &'static str, program: &'static str, args: impl Into<Vec<String>>) -> Self {
        Self {
            label,
            program,
            args: args.into(),
            fail_on_output: false,
        }
    }

    fn fail_on_output(mut self) -> Self {
        self.fail_on_output = true;
        self
    }
}

/// What happened when a checker ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed { success: bool, output: String },
    /// The program is not installed.
    NotFound,
    TimedOut,
    Failed(String),
}

/// Runs external checker programs. Swapped out in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], cwd: &Path, timeout: Duration) -> CommandOutcome;
}

/// Runs checkers as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], cwd: &Path, timeout: Duration) -> CommandOutcome {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, command.output()).await {
            Err(_) => {
                warn!(program, ?timeout, "Validation command timed out");
                CommandOutcome::TimedOut
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => CommandOutcome::NotFound,
            Ok(Err(e)) => CommandOutcome::Failed(e.to_string()),
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let combined = match (stdout.trim(), stderr.trim()) {
                    (out, "") => out.to_string(),
                    ("", err) => err.to_string(),
                    (out, err) => format!("{out}\n{err}"),
                };
                CommandOutcome::Completed {
                    success: output.status.success(),
                    output: combined,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub label: String,
    pub status: CheckStatus,
}

/// The outcome of validating one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub language: Language,
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        !self
            .checks
            .iter()
            .any(|c| matches!(c.status, CheckStatus::Failed(_)))
    }

    /// Labels of failing checks, comma separated.
    pub fn failures(&self) -> String {
        self.checks
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Failed(_)))
            .map(|c| c.label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn render(&self) -> String {
        let verdict = if self.passed() { "passed" } else { "FAILED" };
        let mut out = format!("{} validation {verdict}:", self.language.name());
        for check in &self.checks {
            match &check.status {
                CheckStatus::Passed => out.push_str(&format!("\n  [pass] {}", check.label)),
                CheckStatus::Skipped(why) => {
                    out.push_str(&format!("\n  [skip] {}: {why}", check.label))
                }
                CheckStatus::Failed(output) => {
                    out.push_str(&format!("\n  [fail] {}", check.label));
                    for line in output.lines() {
                        out.push_str("\n      ");
                        out.push_str(line);
                    }
                }
            }
        }
        out
    }
}

/// Picks and runs the checks for a written file.
#[derive(Clone)]
pub struct Validator {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Validator {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Validator backed by real child processes.
    pub fn with_processes(timeout: Duration) -> Self {
        Self::new(Arc::new(ProcessRunner), timeout)
    }

    /// Validate `path` if its language is known and the directory already
    /// holds other files with the same extension.
    pub async fn validate(&self, path: &Path) -> Option<ValidationReport> {
        let ext = path.extension()?.to_str()?;
        let language = Language::from_extension(ext)?;
        let dir = path.parent()?;

        if !has_sibling_with_extension(dir, path, ext).await {
            debug!(path = %path.display(), "No sibling sources; skipping validation");
            return None;
        }

        let file = path.to_string_lossy();
        let mut checks = Vec::new();
        for check in language.checks(&file) {
            let outcome = self
                .runner
                .run(check.program, &check.args, dir, self.timeout)
                .await;
            let status = match outcome {
                CommandOutcome::Completed { success: true, output }
                    if check.fail_on_output && !output.is_empty() =>
                {
                    CheckStatus::Failed(clip(output))
                }
                CommandOutcome::Completed { success: true, .. } => CheckStatus::Passed,
                CommandOutcome::Completed { success: false, output } => {
                    CheckStatus::Failed(clip(output))
                }
                CommandOutcome::NotFound => {
                    CheckStatus::Skipped(format!("{} is not installed", check.program))
                }
                CommandOutcome::TimedOut => {
                    CheckStatus::Skipped(format!("timed out after {}s", self.timeout.as_secs()))
                }
                CommandOutcome::Failed(e) => CheckStatus::Skipped(format!("could not run: {e}")),
            };
            checks.push(CheckResult {
                label: check.label.to_string(),
                status,
            });
        }

        Some(ValidationReport { language, checks })
    }
}

async fn has_sibling_with_extension(dir: &Path, path: &Path, ext: &str) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let candidate: PathBuf = entry.path();
        if candidate == path {
            continue;
        }
        let same_ext = candidate.extension().and_then(|e| e.to_str()) == Some(ext);
        if same_ext && entry.file_type().await.is_ok_and(|t| t.is_file()) {
            return true;
        }
    }
    false
}

fn clip(mut output: String) -> String {
    if output.chars().count() > MAX_OUTPUT_CHARS {
        output = output.chars().take(MAX_OUTPUT_CHARS).collect();
        output.push_str("\n... (output truncated)");
    }
    output
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records invocations and answers from a fixed table keyed by program.
    #[derive(Default)]
    pub(crate) struct FakeRunner {
        pub calls: Mutex<Vec<(String, Vec<String>)>>,
        pub answers: Vec<(&'static str, CommandOutcome)>,
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, program: &str, args: &[String], _cwd: &Path, _timeout: Duration) -> CommandOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            self.answers
                .iter()
                .find(|(p, _)| *p == program)
                .map(|(_, o)| o.clone())
                .unwrap_or(CommandOutcome::Completed {
                    success: true,
                    output: String::new(),
                })
        }
    }

    fn validator(runner: Arc<FakeRunner>) -> Validator {
        Validator::new(runner, Duration::from_secs(5))
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(Language::from_extension("go"), Some(Language::Go));
        assert_eq!(Language::from_extension("mjs"), Some(Language::JavaScript));
        assert_eq!(Language::from_extension("txt"), None);
    }

    #[tokio::test]
    async fn lone_file_is_not_validated() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.go");
        std::fs::write(&file, "package main\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let runner = Arc::new(FakeRunner::default());
        assert!(validator(runner.clone()).validate(&file).await.is_none());
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_extension_is_not_validated() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();
        std::fs::write(dir.path().join("b.txt"), "y").unwrap();
        let runner = Arc::new(FakeRunner::default());
        assert!(validator(runner).validate(&file).await.is_none());
    }

    #[tokio::test]
    async fn go_runs_gofmt_and_vet() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.go");
        std::fs::write(&file, "package main\n").unwrap();
        std::fs::write(dir.path().join("util.go"), "package main\n").unwrap();

        let runner = Arc::new(FakeRunner {
            answers: vec![(
                "gofmt",
                CommandOutcome::Completed {
                    success: true,
                    output: "main.go".into(),
                },
            )],
            ..Default::default()
        });
        let report = validator(runner.clone()).validate(&file).await.unwrap();

        let programs: Vec<_> = runner
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect();
        assert_eq!(programs, vec!["gofmt", "go"]);
        assert_eq!(runner.calls.lock().unwrap()[1].1, vec!["vet".to_string(), ".".to_string()]);
        assert!(!report.passed());
        assert_eq!(report.failures(), "gofmt");
        let text = report.render();
        assert!(text.starts_with("Go validation FAILED"));
        assert!(text.contains("[pass] go vet"));
    }

    #[tokio::test]
    async fn missing_checker_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "x = 1\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "y = 2\n").unwrap();

        let runner = Arc::new(FakeRunner {
            answers: vec![("python3", CommandOutcome::NotFound)],
            ..Default::default()
        });
        let report = validator(runner).validate(&file).await.unwrap();
        assert!(report.passed());
        assert!(report.render().contains("[skip] python syntax: python3 is not installed"));
    }

    #[tokio::test]
    async fn python_check_leaves_directory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "x = 1\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "y = 2\n").unwrap();

        let listing = || {
            let mut names: Vec<_> = std::fs::read_dir(dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name())
                .collect();
            names.sort();
            names
        };
        let before = listing();
        let report = Validator::with_processes(Duration::from_secs(30))
            .validate(&file)
            .await
            .unwrap();
        assert!(report.passed(), "{}", report.render());
        assert_eq!(listing(), before);
    }

    #[tokio::test]
    async fn python_syntax_error_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.py");
        std::fs::write(&file, "def f(:\n").unwrap();
        std::fs::write(dir.path().join("ok.py"), "y = 2\n").unwrap();

        let report = Validator::with_processes(Duration::from_secs(30))
            .validate(&file)
            .await
            .unwrap();
        // Hosts without python3 report a skip instead.
        let skipped = matches!(report.checks[0].status, CheckStatus::Skipped(_));
        assert!(skipped || !report.passed());
    }

    #[test]
    fn long_output_is_clipped() {
        let clipped = clip("x".repeat(MAX_OUTPUT_CHARS + 10));
        assert!(clipped.ends_with("(output truncated)"));
    }
}
