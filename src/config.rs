//! Tracer configuration.
//!
//! Loaded from TOML, usually the file named by `ALLOC_TRACER_CONFIG`. Every
//! field has a default, so an empty file (or no file) is a valid config.
//! The admission predicate cannot be expressed in TOML and is attached in
//! code with [`TracerOptions::with_admission`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tracer::Request;

/// Environment variable holding the path of the TOML config file.
pub const CONFIG_ENV: &str = "ALLOC_TRACER_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tracer config: {0}")]
    Parse(#[from] toml::de::Error),
}

// ─── Admission ───────────────────────────────────────────────────

/// Decides whether a starting request is traced at all.
#[derive(Clone)]
pub struct Admission(Arc<dyn Fn(&Request) -> bool + Send + Sync>);

impl Admission {
    pub fn new(predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Admits every request.
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    pub fn admits(&self, request: &Request) -> bool {
        (self.0)(request)
    }
}

impl Default for Admission {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Admission(..)")
    }
}

// ─── Options ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerOptions {
    /// Idle allocation records kept for reuse. 0 disables pooling.
    pub max_pool_size: usize,

    /// Requests whose path starts with any of these are never traced.
    pub ignored_path_prefixes: Vec<String>,

    pub reporter: ReporterOptions,

    #[serde(skip)]
    pub admission: Admission,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterOptions {
    pub enabled: bool,

    /// Most types listed per report.
    pub type_breakdown_limit: usize,

    /// Most namespaces listed per report.
    pub namespace_breakdown_limit: usize,

    /// Decimal places of the kilobyte figures.
    pub kilobyte_precision: u32,

    /// Requests allocating fewer bytes than this are not reported.
    pub min_allocation_threshold_bytes: Option<u64>,

    /// Splits a type name into namespace and type at its last occurrence.
    pub namespace_separator: String,
}

impl Default for TracerOptions {
    fn default() -> Self {
        Self {
            max_pool_size: 100,
            ignored_path_prefixes: Vec::new(),
            reporter: ReporterOptions::default(),
            admission: Admission::all(),
        }
    }
}

impl Default for ReporterOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            type_breakdown_limit: 10,
            namespace_breakdown_limit: 5,
            kilobyte_precision: 2,
            min_allocation_threshold_bytes: None,
            namespace_separator: ".".to_owned(),
        }
    }
}

impl TracerOptions {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Reads the file named by [`CONFIG_ENV`], or returns the defaults when
    /// the variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn with_admission(
        mut self,
        predicate: impl Fn(&Request) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.admission = Admission::new(predicate);
        self
    }

    /// Ignored prefixes first, then the admission predicate.
    pub fn admits(&self, request: &Request) -> bool {
        let ignored = self
            .ignored_path_prefixes
            .iter()
            .any(|prefix| request.path.starts_with(prefix.as_str()));
        !ignored && self.admission.admits(request)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let options = TracerOptions::from_toml_str("").unwrap();
        assert_eq!(options.max_pool_size, 100);
        assert!(options.ignored_path_prefixes.is_empty());
        assert_eq!(options.reporter, ReporterOptions::default());
        assert_eq!(options.reporter.type_breakdown_limit, 10);
        assert_eq!(options.reporter.namespace_breakdown_limit, 5);
        assert_eq!(options.reporter.kilobyte_precision, 2);
        assert_eq!(options.reporter.min_allocation_threshold_bytes, None);
        assert_eq!(options.reporter.namespace_separator, ".");
    }

    #[test]
    fn partial_file_overrides_only_what_it_names() {
        let options = TracerOptions::from_toml_str(
            r#"
            max_pool_size = 0
            ignored_path_prefixes = ["/health"]

            [reporter]
            type_breakdown_limit = 3
            min_allocation_threshold_bytes = 500000
            "#,
        )
        .unwrap();

        assert_eq!(options.max_pool_size, 0);
        assert_eq!(options.ignored_path_prefixes, ["/health"]);
        assert_eq!(options.reporter.type_breakdown_limit, 3);
        assert_eq!(options.reporter.namespace_breakdown_limit, 5);
        assert_eq!(options.reporter.min_allocation_threshold_bytes, Some(500_000));
        assert!(options.reporter.enabled);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = TracerOptions::from_toml_str("max_pool_size = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = TracerOptions::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn admission_combines_prefixes_and_predicate() {
        let mut options = TracerOptions::default().with_admission(|r| r.verb != "OPTIONS");
        options.ignored_path_prefixes = vec!["/api/alloc/".to_owned()];

        assert!(options.admits(&Request::new("1", "GET", "/api/demo")));
        assert!(!options.admits(&Request::new("2", "GET", "/api/alloc/stats")));
        assert!(!options.admits(&Request::new("3", "OPTIONS", "/api/demo")));
        assert!(TracerOptions::default().admits(&Request::new("4", "GET", "/")));
    }
}
