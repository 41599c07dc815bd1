//! Synthesis report summarizing one run.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::{Configuration, CoreTopology, ExecutionTarget, OutputLayout};
use crate::emitter::{DefinedFunction, EmittedText, Sink};
use crate::error::Result;
use crate::lifecycle::{Lifecycle, Stage};

/// Size and content digest of one emitted stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SinkSummary {
    pub sink: Sink,
    pub bytes: usize,
    pub lines: usize,
    /// SHA-256 of the stream text, lowercase hex.
    pub sha256: String,
}

impl SinkSummary {
    fn new(sink: Sink, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self {
            sink,
            bytes: text.len(),
            lines: text.lines().count(),
            sha256: hex_encode(&hasher.finalize()),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Summary report of a synthesis run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SynthesisReport {
    /// Device descriptor name.
    pub device: String,
    pub target: ExecutionTarget,
    pub topology: CoreTopology,
    pub layout: OutputLayout,
    /// One entry per non-empty sink, in sink order.
    pub sinks: Vec<SinkSummary>,
    /// Emitted functions in definition order.
    pub functions: Vec<DefinedFunction>,
    /// Stage the generated program ends in.
    pub final_stage: Stage,
    pub stages: Vec<Stage>,
    /// Number of emitted fatal checks.
    pub fatal_checks: usize,
    /// Advisory warnings raised during synthesis.
    pub warnings: Vec<String>,
}

impl SynthesisReport {
    pub(crate) fn new(
        config: &Configuration,
        device: &str,
        text: &EmittedText,
        lifecycle: &Lifecycle,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            device: device.to_string(),
            target: config.target(),
            topology: config.topology(),
            layout: config.layout(),
            sinks: text
                .streams
                .iter()
                .map(|(sink, body)| SinkSummary::new(*sink, body))
                .collect(),
            functions: text.functions.clone(),
            final_stage: lifecycle.stage(),
            stages: lifecycle.history().to_vec(),
            fatal_checks: lifecycle.fatal_checks(),
            warnings,
        }
    }

    /// Digest of `sink`, if it received any output.
    pub fn digest(&self, sink: Sink) -> Option<&str> {
        self.sinks
            .iter()
            .find(|s| s.sink == sink)
            .map(|s| s.sha256.as_str())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for SynthesisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Synthesis Report ===")?;
        writeln!(f, "Device: {}", self.device)?;
        writeln!(f, "Target: {} ({})", self.target, self.topology)?;
        writeln!(f)?;

        writeln!(f, "--- Outputs ---")?;
        for s in &self.sinks {
            writeln!(
                f,
                "  {:<12} {:>7} bytes {:>5} lines  sha256:{}",
                s.sink.name(),
                s.bytes,
                s.lines,
                s.sha256
            )?;
        }

        writeln!(f)?;
        writeln!(f, "--- Functions ({}) ---", self.functions.len())?;
        for func in &self.functions {
            writeln!(f, "  {} [{}]", func.name, func.sink)?;
        }

        writeln!(f)?;
        let path: Vec<String> = self.stages.iter().map(|s| s.to_string()).collect();
        writeln!(f, "--- Lifecycle: {} ---", self.final_stage)?;
        writeln!(f, "  {}", path.join(" -> "))?;
        writeln!(f, "  Fatal checks: {}", self.fatal_checks)?;

        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "--- Warnings ({}) ---", self.warnings.len())?;
            for w in &self.warnings {
                writeln!(f, "  {w}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample() -> SynthesisReport {
        let mut streams = BTreeMap::new();
        streams.insert(Sink::Main, "int main(void)\n{\n}\n".to_string());
        let text = EmittedText {
            streams,
            functions: vec![DefinedFunction {
                sink: Sink::Main,
                name: "main".into(),
            }],
        };
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(Stage::Delegated).unwrap();
        let config = Configuration::builder().groups([0]).build().unwrap();
        SynthesisReport::new(&config, "ai85", &text, &lifecycle, vec!["advisory".into()])
    }

    #[test]
    fn digest_is_sha256_hex() {
        let report = sample();
        let digest = report.digest(Sink::Main).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(report.digest(Sink::Api).is_none());
        assert_eq!(report.sinks[0].lines, 3);
    }

    #[test]
    fn report_display() {
        let text = sample().to_string();
        assert!(text.starts_with("=== Synthesis Report ===\n"));
        assert!(text.contains("Device: ai85"));
        assert!(text.contains("Target: simulation (single-core)"));
        assert!(text.contains("uninitialized -> delegated"));
        assert!(text.contains("--- Warnings (1) ---"));
    }

    #[test]
    fn report_json_uses_kebab_case() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"final-stage\": \"delegated\""));
        assert!(json.contains("\"fatal-checks\": 0"));
    }
}
