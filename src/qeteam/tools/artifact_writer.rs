//! Sandboxed writer for the artifacts a QE team produces.
//!
//! Every path is resolved relative to a root directory (`outputs/` by default). Absolute
//! paths, `..` components and symlinks leading outside the root are refused, and an optional
//! extension allow-list restricts what can be written.
//!
//! When no file name is supplied, [`ArtifactKind`] derives a timestamped one, e.g.
//! `Test_Cases_03142025_101502.csv` or `steps_03142025_101502.py`. An existing file is never
//! overwritten by a generated name; a numeric suffix is appended instead.
//!
//! ```rust,no_run
//! use qeteam::tools::artifact_writer::{ArtifactKind, ArtifactWriter};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let writer = ArtifactWriter::new("outputs");
//! let path = writer
//!     .write_generated(ArtifactKind::TestCases, "id,title\n1,valid login\n")
//!     .await?;
//! println!("wrote {}", path.display());
//! # Ok(())
//! # }
//! ```

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactError {
    /// Path escapes the artifact root.
    PathTraversal(String),
    /// Absolute, empty or otherwise unusable path.
    InvalidPath(String),
    ExtensionNotAllowed(String),
    IOError(String),
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactError::PathTraversal(msg) => {
                write!(f, "Path traversal attempt blocked: {}", msg)
            }
            ArtifactError::InvalidPath(msg) => write!(f, "Invalid path: {}", msg),
            ArtifactError::ExtensionNotAllowed(msg) => write!(f, "Extension not allowed: {}", msg),
            ArtifactError::IOError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl Error for ArtifactError {}

/// Category of generated artifact; decides the generated file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// CSV test cases.
    #[serde(rename = "test_case")]
    TestCases,
    /// Python step definitions.
    #[serde(rename = "step_definition")]
    StepDefinitions,
}

impl ArtifactKind {
    /// Parse the `type` argument accepted by the `write_file` tool.
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "test_case" | "test_cases" => Some(ArtifactKind::TestCases),
            "step_definition" | "step_definitions" => Some(ArtifactKind::StepDefinitions),
            _ => None,
        }
    }

    /// Timestamped file name for this kind (local time, `MMDDYYYY_HHMMSS`).
    pub fn generated_name(&self) -> String {
        let stamp = Local::now().format("%m%d%Y_%H%M%S");
        match self {
            ArtifactKind::TestCases => format!("Test_Cases_{}.csv", stamp),
            ArtifactKind::StepDefinitions => format!("steps_{}.py", stamp),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
    allowed_extensions: Option<Vec<String>>,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            allowed_extensions: None,
        }
    }

    /// Only allow files with these extensions (case-insensitive, without the dot).
    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `content` to `relative` under the root, creating parent directories.
    /// Returns the written path (root-prefixed).
    pub async fn write(&self, relative: &str, content: &str) -> Result<PathBuf, ArtifactError> {
        let target = self.resolve(relative)?;
        self.check_extension(&target)?;
        self.ensure_parent_within_root(&target).await?;

        tokio::fs::write(&target, content)
            .await
            .map_err(|e| ArtifactError::IOError(format!("{}: {}", target.display(), e)))?;

        log::info!(
            "wrote artifact {} ({} bytes)",
            target.display(),
            content.len()
        );
        Ok(target)
    }

    /// Write under a generated, timestamped name for `kind`.
    pub async fn write_generated(
        &self,
        kind: ArtifactKind,
        content: &str,
    ) -> Result<PathBuf, ArtifactError> {
        self.write_generated_in("", kind, content).await
    }

    /// Like [`ArtifactWriter::write_generated`] but inside `subdir` of the root.
    pub async fn write_generated_in(
        &self,
        subdir: &str,
        kind: ArtifactKind,
        content: &str,
    ) -> Result<PathBuf, ArtifactError> {
        let name = kind.generated_name();
        let mut candidate = join_relative(subdir, &name);
        let mut attempt = 1;
        while self.resolve(&candidate)?.exists() {
            let (stem, ext) = name.rsplit_once('.').unwrap_or((name.as_str(), ""));
            candidate = join_relative(subdir, &format!("{}_{}.{}", stem, attempt, ext));
            attempt += 1;
        }
        self.write(&candidate, content).await
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, ArtifactError> {
        let path = Path::new(relative);
        if relative.trim().is_empty() {
            return Err(ArtifactError::InvalidPath("empty file name".to_string()));
        }
        if path.is_absolute() {
            return Err(ArtifactError::InvalidPath(
                "Absolute paths are not allowed".to_string(),
            ));
        }

        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(ArtifactError::PathTraversal(relative.to_string()));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ArtifactError::InvalidPath(relative.to_string()));
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(ArtifactError::InvalidPath(relative.to_string()));
        }

        Ok(self.root.join(normalized))
    }

    fn check_extension(&self, path: &Path) -> Result<(), ArtifactError> {
        if let Some(allowed) = &self.allowed_extensions {
            let ext = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !allowed.iter().any(|a| a.to_lowercase() == ext) {
                return Err(ArtifactError::ExtensionNotAllowed(format!(
                    "Extension .{} not allowed",
                    ext
                )));
            }
        }
        Ok(())
    }

    // Symlinked directories inside the root could still point elsewhere; compare the
    // canonical parent against the canonical root once it exists.
    async fn ensure_parent_within_root(&self, target: &Path) -> Result<(), ArtifactError> {
        let parent = target
            .parent()
            .ok_or_else(|| ArtifactError::InvalidPath("Path has no parent".to_string()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ArtifactError::IOError(format!("{}: {}", parent.display(), e)))?;

        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| ArtifactError::IOError(format!("Cannot canonicalize root: {}", e)))?;
        let parent = tokio::fs::canonicalize(parent)
            .await
            .map_err(|e| ArtifactError::IOError(format!("Cannot canonicalize parent: {}", e)))?;

        if !parent.starts_with(&root) {
            return Err(ArtifactError::PathTraversal(format!(
                "{} resolves outside {}",
                target.display(),
                root.display()
            )));
        }
        Ok(())
    }
}

fn join_relative(subdir: &str, name: &str) -> String {
    if subdir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", subdir.trim_end_matches('/'), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(dir.path());

        let path = writer
            .write("java/LoginSteps.java", "public class LoginSteps {}")
            .await
            .unwrap();

        assert!(path.ends_with("java/LoginSteps.java"));
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "public class LoginSteps {}");
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(dir.path());

        assert!(matches!(
            writer.write("../escape.txt", "x").await,
            Err(ArtifactError::PathTraversal(_))
        ));
        assert!(matches!(
            writer.write("/etc/passwd", "x").await,
            Err(ArtifactError::InvalidPath(_))
        ));
        assert!(matches!(
            writer.write("  ", "x").await,
            Err(ArtifactError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_extension_allow_list() {
        let dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(dir.path()).with_allowed_extensions(["csv", "py"]);

        assert!(writer.write("cases.CSV", "a,b").await.is_ok());
        assert!(matches!(
            writer.write("notes.txt", "hello").await,
            Err(ArtifactError::ExtensionNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn test_generated_names_never_overwrite() {
        let dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(dir.path());

        let first = writer
            .write_generated(ArtifactKind::TestCases, "one")
            .await
            .unwrap();
        let second = writer
            .write_generated(ArtifactKind::TestCases, "two")
            .await
            .unwrap();

        assert_ne!(first, second);
        let first_name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(first_name.starts_with("Test_Cases_"));
        assert!(first_name.ends_with(".csv"));
        assert_eq!(tokio::fs::read_to_string(&first).await.unwrap(), "one");
    }

    #[test]
    fn test_kind_from_type_name() {
        assert_eq!(
            ArtifactKind::from_type_name("step_definition"),
            Some(ArtifactKind::StepDefinitions)
        );
        assert_eq!(ArtifactKind::from_type_name("gherkin"), None);
        assert!(ArtifactKind::StepDefinitions
            .generated_name()
            .starts_with("steps_"));
    }
}
