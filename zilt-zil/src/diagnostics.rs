//! The warning sink.
//!
//! Warnings accumulate in order; errors abort. Suppression is decided
//! when the warning is raised, so a suppressed warning never occupies a
//! slot in the output list and never trips `warn_as_error`.

use crate::environ::{CompileOptions, ZilError, ZilResult};
use std::fmt;

/// A recorded warning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    /// Diagnostic code, e.g. `ZIL0204` or `MDL0428`.
    pub code: &'static str,
    /// Human-readable text.
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Collects warnings according to the suppression and promotion options.
#[derive(Clone, Debug)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
    suppress_all: bool,
    suppressed: Vec<String>,
    warn_as_error: bool,
}

impl Diagnostics {
    /// Create a sink configured from `options`.
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            warnings: Vec::new(),
            suppress_all: options.suppress_all_warnings,
            suppressed: options.suppressed_warnings.clone(),
            warn_as_error: options.warn_as_error,
        }
    }

    fn is_suppressed(&self, code: &str) -> bool {
        self.suppress_all || self.suppressed.iter().any(|p| code.starts_with(p.as_str()))
    }

    /// Record a warning, or fail if warnings are promoted to errors.
    pub fn warn(&mut self, code: &'static str, message: String) -> ZilResult<()> {
        if self.is_suppressed(code) {
            return Ok(());
        }
        if self.warn_as_error {
            return Err(ZilError::WarningAsError {
                code: code.to_string(),
                message,
            });
        }
        self.warnings.push(Warning { code, message });
        Ok(())
    }

    /// The warnings recorded so far, in order.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Yield the recorded warnings.
    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zilt_codegen::Version;

    #[test]
    fn prefix_suppression() {
        let mut options = CompileOptions::new(Version::V3);
        options.suppressed_warnings.push("ZIL02".to_string());
        let mut diags = Diagnostics::new(&options);

        diags.warn("ZIL0204", "suppressed".to_string()).unwrap();
        diags.warn("ZIL0410", "kept".to_string()).unwrap();
        assert_eq!(diags.warnings().len(), 1);
        assert_eq!(diags.warnings()[0].code, "ZIL0410");
    }

    #[test]
    fn promotion() {
        let mut options = CompileOptions::new(Version::V3);
        options.warn_as_error = true;
        let mut diags = Diagnostics::new(&options);

        let err = diags.warn("MDL0428", "boom".to_string()).unwrap_err();
        match err {
            ZilError::WarningAsError { code, .. } => assert_eq!(code, "MDL0428"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn suppress_all_beats_promotion() {
        let mut options = CompileOptions::new(Version::V3);
        options.warn_as_error = true;
        options.suppress_all_warnings = true;
        let mut diags = Diagnostics::new(&options);
        diags.warn("ZIL0204", "quiet".to_string()).unwrap();
        assert!(diags.warnings().is_empty());
    }
}
