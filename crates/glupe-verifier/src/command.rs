//! Process execution for verifier commands.
//!
//! Commands are split into a program and arguments and executed directly,
//! never through a shell.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

pub const FILE_PLACEHOLDER: &str = "%FILE%";
pub const OUT_PLACEHOLDER: &str = "%OUT%";

/// Split a command line on whitespace, honoring double and single quotes.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        args.push(current);
    }
    args
}

/// Expand a user build command template.
///
/// A token equal to `%FILE%` becomes every source path; other occurrences
/// of `%FILE%` and `%OUT%` are replaced inside the token.
pub fn expand_template(template: &str, sources: &[PathBuf], output: &Path) -> Vec<String> {
    let joined = sources
        .iter()
        .map(|s| s.display().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let out = output.display().to_string();

    let mut args = Vec::new();
    for token in split_command_line(template) {
        if token == FILE_PLACEHOLDER {
            args.extend(sources.iter().map(|s| s.display().to_string()));
        } else {
            args.push(token.replace(FILE_PLACEHOLDER, &joined).replace(OUT_PLACEHOLDER, &out));
        }
    }
    args
}

/// Result of one process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// `None` if the process could not start, was killed or timed out
    pub exit_code: Option<i32>,
    /// stdout then stderr
    pub output: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `argv` in `cwd` with a timeout.
pub async fn run(argv: &[String], cwd: &Path, timeout: Duration) -> CommandOutcome {
    let start = Instant::now();

    let Some((program, args)) = argv.split_first() else {
        return CommandOutcome {
            exit_code: None,
            output: "empty command".to_string(),
            duration: Duration::ZERO,
            timed_out: false,
        };
    };

    debug!(command = %argv.join(" "), cwd = %cwd.display(), "Running verifier command");

    let result = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let duration = start.elapsed();

    match result {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            CommandOutcome {
                exit_code: output.status.code(),
                output: format!("{}{}", stdout, stderr),
                duration,
                timed_out: false,
            }
        }
        Ok(Err(e)) => CommandOutcome {
            exit_code: None,
            output: format!("Failed to run {}: {}", program, e),
            duration,
            timed_out: false,
        },
        Err(_) => CommandOutcome {
            exit_code: None,
            output: format!("Timeout after {:?}", timeout),
            duration,
            timed_out: true,
        },
    }
}

/// Run `argv` in the foreground with inherited stdio and no timeout.
pub async fn run_attached(argv: &[String], cwd: &Path) -> io::Result<ExitStatus> {
    let Some((program, args)) = argv.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
    };
    debug!(command = %argv.join(" "), "Running output");
    Command::new(program).args(args).current_dir(cwd).status().await
}

/// Add the owner execute bit.
#[cfg(unix)]
pub fn mark_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o100);
    std::fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
pub fn mark_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Project build script found in an exported directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildScript {
    Makefile,
    CMake,
    Shell,
}

impl BuildScript {
    /// First build script present in `dir`, by priority.
    pub fn detect(dir: &Path) -> Option<Self> {
        if dir.join("Makefile").is_file() {
            Some(BuildScript::Makefile)
        } else if dir.join("CMakeLists.txt").is_file() {
            Some(BuildScript::CMake)
        } else if dir.join("build.sh").is_file() {
            Some(BuildScript::Shell)
        } else {
            None
        }
    }

    /// Commands to run in order; the build fails at the first failure.
    pub fn commands(&self) -> Vec<Vec<String>> {
        let argv = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        match self {
            BuildScript::Makefile => vec![argv(&["make"])],
            BuildScript::CMake => vec![
                argv(&["cmake", "-S", ".", "-B", "build"]),
                argv(&["cmake", "--build", "build"]),
            ],
            BuildScript::Shell => vec![argv(&["bash", "build.sh"])],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuildScript::Makefile => "Makefile",
            BuildScript::CMake => "CMakeLists.txt",
            BuildScript::Shell => "build.sh",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command_line() {
        assert_eq!(split_command_line("g++ -std=gnu++17"), vec!["g++", "-std=gnu++17"]);
        assert_eq!(
            split_command_line("cc \"my file.c\" -o 'out bin'"),
            vec!["cc", "my file.c", "-o", "out bin"]
        );
        assert_eq!(split_command_line("  a   b "), vec!["a", "b"]);
        assert_eq!(split_command_line("x \"\""), vec!["x", ""]);
        assert!(split_command_line("   ").is_empty());
    }

    #[test]
    fn test_expand_template() {
        let sources = vec![PathBuf::from("a.c"), PathBuf::from("b.c")];
        let args = expand_template("clang %FILE% -o %OUT%", &sources, Path::new("bin"));
        assert_eq!(args, vec!["clang", "a.c", "b.c", "-o", "bin"]);

        let args = expand_template("tool --in=%FILE%", &sources[..1], Path::new("o"));
        assert_eq!(args, vec!["tool", "--in=a.c"]);
    }

    #[test]
    fn test_build_script_priority() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(BuildScript::detect(dir.path()), None);
        std::fs::write(dir.path().join("build.sh"), "true").unwrap();
        assert_eq!(BuildScript::detect(dir.path()), Some(BuildScript::Shell));
        std::fs::write(dir.path().join("Makefile"), "all:").unwrap();
        assert_eq!(BuildScript::detect(dir.path()), Some(BuildScript::Makefile));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let argv = vec!["definitely-not-a-real-program-glupe".to_string()];
        let outcome = run(&argv, dir.path(), Duration::from_secs(5)).await;
        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, None);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn test_empty_command() {
        let outcome = run(&[], Path::new("."), Duration::from_secs(1)).await;
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_run_attached_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_attached(&[], dir.path()).await.is_err());
        let missing = vec!["definitely-not-a-real-program-glupe".to_string()];
        assert!(run_attached(&missing, dir.path()).await.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_mark_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app");
        std::fs::write(&path, "").unwrap();
        mark_executable(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o100, 0o100);
    }
}
