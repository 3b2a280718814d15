//! Semantic configuration validation
//!
//! Field-level rules live on the configuration types (`validator` derive).
//! This module covers checks that span fields or need parsing, and collects
//! warnings from [`lint`].

use std::fmt;

use crate::{AcmeDirectory, CertdConfig};

pub mod lint;

/// Category of a validation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Node,
    Cluster,
    Acme,
    Issuance,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Node => "node",
            ErrorCategory::Cluster => "cluster",
            ErrorCategory::Acme => "acme",
            ErrorCategory::Issuance => "issuance",
        };
        write!(f, "{}", name)
    }
}

/// A configuration error that prevents startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// A configuration issue worth reporting that does not prevent startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Accumulated errors and warnings
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run cross-field checks and lints
pub fn validate_config(config: &CertdConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let AcmeDirectory::Custom(ref directory) = config.acme.directory {
        match url::Url::parse(directory) {
            Ok(url) if url.scheme() == "https" => {}
            Ok(url) => result.add_error(ValidationError::new(
                ErrorCategory::Acme,
                format!(
                    "ACME directory must use https, got '{}' ({})",
                    directory,
                    url.scheme()
                ),
            )),
            Err(e) => result.add_error(ValidationError::new(
                ErrorCategory::Acme,
                format!(
                    "ACME directory '{}' is neither 'production', 'staging' nor a URL: {}",
                    directory, e
                ),
            )),
        }
    }

    if config.node.hostname.chars().any(char::is_whitespace) {
        result.add_error(ValidationError::new(
            ErrorCategory::Node,
            format!("Hostname '{}' contains whitespace", config.node.hostname),
        ));
    }

    if config
        .cluster
        .members
        .iter()
        .any(|member| member.trim().is_empty())
    {
        result.add_error(ValidationError::new(
            ErrorCategory::Cluster,
            "Cluster member names must not be empty",
        ));
    }

    result.merge(lint::lint_config(config));
    result
}
