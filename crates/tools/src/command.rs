//! Launch command for the tool server process.

use std::path::{Path, PathBuf};

use proto::ConfigError;

/// Program, arguments, and working directory used to start a tool server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ServerCommand {
    /// Creates a command with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Appends arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory of the child.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Picks a launcher for a server project, script, or binary.
    ///
    /// Directories and `.csproj` files run through `dotnet run --project`,
    /// `.dll` through `dotnet`, `.py` through `python`, `.js` through `node`.
    /// `.exe` files and other executables are started directly.
    pub fn resolve(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(invalid(path, "path does not exist"));
        }
        let display = path.to_string_lossy().to_string();

        if path.is_dir() {
            return Ok(Self::new("dotnet").with_args(["run", "--project", &display, "--no-build"]));
        }

        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());

        let command = match extension.as_deref() {
            Some("csproj") => {
                Self::new("dotnet").with_args(["run", "--project", &display, "--no-build"])
            }
            Some("dll") => Self::new("dotnet").with_args([display]),
            Some("py") => Self::new("python").with_args([display]),
            Some("js") => Self::new("node").with_args([display]),
            Some("exe") => Self::new(display),
            _ if is_executable(path) => Self::new(display),
            _ => return Err(invalid(path, "unsupported server file type")),
        };
        Ok(command)
    }

    /// Renders the command line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn invalid(path: &Path, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: "server.path".to_string(),
        reason: format!("{reason}: {}", path.display()),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}
