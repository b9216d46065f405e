use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[schemars(description = "Malformed input or impossible computation; value forced to a safe default")]
    Critical,
    #[schemars(description = "Produced number disagrees with the recomputed one beyond tolerance")]
    Grave,
    #[schemars(description = "Auto-corrected or unusual data; does not block approval")]
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Critical => "critical",
            Severity::Grave => "grave",
            Severity::Warning => "warning",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditFinding {
    pub severity: Severity,
    /// Name of the check that produced the finding, e.g. "raw_data" or "abc_category".
    pub check: String,
    pub message: String,
}

impl AuditFinding {
    pub fn new(severity: Severity, check: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            check: check.to_string(),
            message: message.into(),
        }
    }

    pub fn critical(check: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, check, message)
    }

    pub fn grave(check: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Grave, check, message)
    }

    pub fn warning(check: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, check, message)
    }
}

impl fmt::Display for AuditFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.check, self.message)
    }
}

/// A value the audit replaced with its own recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Correction {
    pub check: String,
    pub target: String,
    pub original: Option<f64>,
    pub corrected: Option<f64>,
    pub message: String,
}

impl Correction {
    pub fn new(check: &str, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            target: target.into(),
            original: None,
            corrected: None,
            message: message.into(),
        }
    }

    pub fn values(mut self, original: f64, corrected: f64) -> Self {
        self.original = Some(original);
        self.corrected = Some(corrected);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationRecord {
    pub check: String,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditReport {
    pub approved: bool,
    pub critical_errors: Vec<AuditFinding>,
    pub grave_errors: Vec<AuditFinding>,
    pub warnings: Vec<AuditFinding>,
    pub corrections: Vec<Correction>,
    pub validations: Vec<ValidationRecord>,
}

impl AuditReport {
    pub fn findings(&self) -> impl Iterator<Item = &AuditFinding> {
        self.critical_errors
            .iter()
            .chain(self.grave_errors.iter())
            .chain(self.warnings.iter())
    }

    pub fn has_findings_for(&self, check: &str) -> bool {
        self.findings().any(|f| f.check == check)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} critical, {} grave, {} warnings, {} corrections, {}/{} checks passed",
            if self.approved { "APPROVED" } else { "REJECTED" },
            self.critical_errors.len(),
            self.grave_errors.len(),
            self.warnings.len(),
            self.corrections.len(),
            self.validations.iter().filter(|v| v.passed).count(),
            self.validations.len()
        )
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        output.push_str("# Audit Report\n\n");
        output.push_str(&format!("**Status:** {}\n\n", self.summary()));

        let sections: [(&str, &Vec<AuditFinding>); 3] = [
            ("Critical Errors", &self.critical_errors),
            ("Grave Errors", &self.grave_errors),
            ("Warnings", &self.warnings),
        ];
        for (title, findings) in sections {
            if findings.is_empty() {
                continue;
            }
            output.push_str(&format!("## {}\n\n", title));
            for finding in findings {
                output.push_str(&format!("- `{}` {}\n", finding.check, finding.message));
            }
            output.push('\n');
        }

        if !self.corrections.is_empty() {
            output.push_str("## Corrections\n\n");
            for correction in &self.corrections {
                match (correction.original, correction.corrected) {
                    (Some(original), Some(corrected)) => output.push_str(&format!(
                        "- `{}` {}: {:.2} -> {:.2}\n",
                        correction.check, correction.target, original, corrected
                    )),
                    _ => output.push_str(&format!(
                        "- `{}` {}: {}\n",
                        correction.check, correction.target, correction.message
                    )),
                }
            }
            output.push('\n');
        }

        output.push_str("## Checks\n\n");
        for validation in &self.validations {
            let marker = if validation.passed { "x" } else { " " };
            output.push_str(&format!(
                "- [{}] {}: {}\n",
                marker, validation.check, validation.message
            ));
        }

        output
    }
}

/// Collects findings during a single audit call.
#[derive(Debug, Default)]
pub(crate) struct ReportBuilder {
    critical: Vec<AuditFinding>,
    grave: Vec<AuditFinding>,
    warnings: Vec<AuditFinding>,
    corrections: Vec<Correction>,
    validations: Vec<ValidationRecord>,
}

impl ReportBuilder {
    pub(crate) fn push(&mut self, finding: AuditFinding) {
        match finding.severity {
            Severity::Critical => {
                warn!("{}", finding);
                self.critical.push(finding);
            }
            Severity::Grave => {
                warn!("{}", finding);
                self.grave.push(finding);
            }
            Severity::Warning => {
                debug!("{}", finding);
                self.warnings.push(finding);
            }
        }
    }

    pub(crate) fn extend(&mut self, findings: impl IntoIterator<Item = AuditFinding>) {
        for finding in findings {
            self.push(finding);
        }
    }

    pub(crate) fn correct(&mut self, correction: Correction) {
        debug!(
            "Correction on {} ({}): {}",
            correction.target, correction.check, correction.message
        );
        self.corrections.push(correction);
    }

    pub(crate) fn record(&mut self, check: &str, passed: bool, message: impl Into<String>) {
        self.validations.push(ValidationRecord {
            check: check.to_string(),
            passed,
            message: message.into(),
        });
    }

    pub(crate) fn finish(self) -> AuditReport {
        AuditReport {
            approved: self.critical.is_empty() && self.grave.is_empty(),
            critical_errors: self.critical,
            grave_errors: self.grave,
            warnings: self.warnings,
            corrections: self.corrections,
            validations: self.validations,
        }
    }
}
