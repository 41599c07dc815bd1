//! Synthesis pipeline orchestrator.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cnnsynth_device::{validate_device, CapabilityDescriptor, DeviceError, Severity};
use serde::{Deserialize, Serialize};

use crate::classify::FcWeights;
use crate::config::{Configuration, OutputWidth, ResultRetrieval};
use crate::emitter::Sink;
use crate::error::{ConfigError, Result, SynthesisError};
use crate::report::SynthesisReport;
use crate::sequencer::Sequencer;

/// Array data consumed by the classification emitter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SynthesisInputs {
    /// Weights of the fully-connected classification layer.
    pub fc_weights: Option<FcWeights>,
    pub fc_bias: Option<Vec<i64>>,
    /// Golden output of the classification layer.
    pub fc_expected: Option<Vec<i64>>,
}

impl SynthesisInputs {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// Output of a successful synthesis run.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    /// Text of every sink that received output.
    pub streams: BTreeMap<Sink, String>,
    /// File name each sink is written to.
    pub file_names: BTreeMap<Sink, String>,
    pub report: SynthesisReport,
}

impl SynthesisOutput {
    pub fn stream(&self, sink: Sink) -> Option<&str> {
        self.streams.get(&sink).map(String::as_str)
    }

    /// Write every non-empty sink into `dir`, returning the paths written.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for (sink, text) in &self.streams {
            let Some(name) = self.file_names.get(sink) else {
                continue;
            };
            let path = dir.join(name);
            fs::write(&path, text)?;
            tracing::debug!(sink = %sink, path = %path.display(), "wrote sink");
            written.push(path);
        }
        Ok(written)
    }
}

/// File name for `sink` under `config`.
pub fn sink_file_name(config: &Configuration, sink: Sink) -> String {
    match sink {
        Sink::Main => "main.c".into(),
        Sink::Api => "cnn.c".into(),
        Sink::Weights => config.weights_header().to_string(),
        Sink::SampleData => config.sample_header().to_string(),
    }
}

/// Run a full synthesis: device checks -> input checks -> sequencing ->
/// report.
pub fn synthesize(
    config: &Configuration,
    caps: &CapabilityDescriptor,
    inputs: &SynthesisInputs,
) -> Result<SynthesisOutput> {
    let mut warnings = check_device(caps)?;
    check_support(config, caps)?;
    check_inputs(config, inputs)?;
    warnings.extend(advisories(config));
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    let program = Sequencer::new(config, caps, inputs)?.run()?;
    let report = SynthesisReport::new(
        config,
        &caps.name,
        &program.text,
        &program.lifecycle,
        warnings,
    );
    tracing::info!(
        device = %caps.name,
        target = %config.target(),
        topology = %config.topology(),
        functions = report.functions.len(),
        stage = %report.final_stage,
        "synthesis complete"
    );

    let file_names = program
        .text
        .streams
        .keys()
        .map(|&sink| (sink, sink_file_name(config, sink)))
        .collect();
    Ok(SynthesisOutput {
        streams: program.text.streams,
        file_names,
        report,
    })
}

/// Structural validation; errors abort, warnings are returned.
fn check_device(caps: &CapabilityDescriptor) -> Result<Vec<String>> {
    let Err(issues) = validate_device(caps) else {
        return Ok(Vec::new());
    };
    let (errors, warnings): (Vec<_>, Vec<_>) = issues
        .into_iter()
        .partition(|issue| issue.severity == Severity::Error);
    if !errors.is_empty() {
        let detail = errors
            .iter()
            .map(|issue| issue.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(DeviceError::Validation { detail }.into());
    }
    Ok(warnings
        .into_iter()
        .map(|issue| format!("device {}: {}", caps.name, issue.message))
        .collect())
}

/// Features the configuration asks of the device.
fn check_support(config: &Configuration, caps: &CapabilityDescriptor) -> Result<()> {
    if config.topology().is_dual_core() && !caps.has_companion_core() {
        return Err(SynthesisError::UnsupportedByDevice {
            feature: "dual-core topology",
            device: caps.name.clone(),
        });
    }
    if config.pll && !caps.supports_pll() {
        return Err(SynthesisError::UnsupportedByDevice {
            feature: "PLL accelerator clock",
            device: caps.name.clone(),
        });
    }
    Ok(())
}

fn check_inputs(config: &Configuration, inputs: &SynthesisInputs) -> Result<()> {
    if inputs.fc_expected.is_some() && config.retrieval() != ResultRetrieval::FullyConnected {
        return Err(ConfigError::FullyConnectedRequired {
            feature: "classification golden output",
        }
        .into());
    }
    if (inputs.fc_weights.is_some() || inputs.fc_bias.is_some())
        && config.retrieval() != ResultRetrieval::FullyConnected
    {
        tracing::debug!("fully-connected weights supplied but not used");
    }
    Ok(())
}

/// Combinations that synthesize but are probably not what was meant.
fn advisories(config: &Configuration) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.retrieval() == ResultRetrieval::SoftmaxOnly && config.output_width() == OutputWidth::W8 {
        warnings.push("softmax-only classification should be used with 32-bit output width".into());
    }
    if config.forever && config.boost.is_some() {
        warnings.push("the boost circuit is never switched off in forever mode".into());
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoostPin, CoreTopology, ExecutionTarget};

    fn config() -> crate::config::ConfigurationBuilder {
        Configuration::builder().groups([0, 1, 2, 3])
    }

    #[test]
    fn inputs_from_json() {
        let inputs = SynthesisInputs::from_json(
            r#"{ "fc-weights": { "rows": 1, "cols": 2, "values": [1, -2] }, "fc-bias": [3] }"#,
        )
        .unwrap();
        assert_eq!(inputs.fc_weights.unwrap().values, vec![1, -2]);
        assert_eq!(inputs.fc_bias, Some(vec![3]));
        assert!(inputs.fc_expected.is_none());
    }

    #[test]
    fn unknown_input_field_rejected() {
        assert!(SynthesisInputs::from_json(r#"{ "weights": [] }"#).is_err());
    }

    #[test]
    fn dual_core_needs_companion() {
        let cfg = config()
            .target(ExecutionTarget::Embedded)
            .topology(CoreTopology::ArmHost)
            .build()
            .unwrap();
        let err = synthesize(&cfg, &CapabilityDescriptor::ai84(), &SynthesisInputs::default()).unwrap_err();
        assert!(matches!(err, SynthesisError::UnsupportedByDevice { .. }));
    }

    #[test]
    fn pll_needs_device_support() {
        let cfg = config().pll(true).build().unwrap();
        let err = synthesize(&cfg, &CapabilityDescriptor::ai85(), &SynthesisInputs::default()).unwrap_err();
        assert!(err.to_string().contains("PLL"));
    }

    #[test]
    fn golden_output_needs_fully_connected() {
        let cfg = config().build().unwrap();
        let inputs = SynthesisInputs {
            fc_expected: Some(vec![1, 2]),
            ..Default::default()
        };
        let err = synthesize(&cfg, &CapabilityDescriptor::ai85(), &inputs).unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::Config(ConfigError::FullyConnectedRequired { .. })
        ));
    }

    #[test]
    fn invalid_device_rejected() {
        let mut caps = CapabilityDescriptor::ai85();
        caps.clocks.apb_mhz = 0;
        let cfg = config().build().unwrap();
        let err = synthesize(&cfg, &caps, &SynthesisInputs::default()).unwrap_err();
        assert!(matches!(err, SynthesisError::Device(_)));
    }

    #[test]
    fn advisories_are_reported() {
        let cfg = config()
            .target(ExecutionTarget::Embedded)
            .retrieval(ResultRetrieval::SoftmaxOnly)
            .forever(true)
            .boost(Some(BoostPin { port: 2, pin: 5 }))
            .build()
            .unwrap();
        let out = synthesize(&cfg, &CapabilityDescriptor::ai85(), &SynthesisInputs::default()).unwrap();
        assert_eq!(out.report.warnings.len(), 2);
    }

    #[test]
    fn file_names_follow_config() {
        let cfg = config().weights_header("w.h").build().unwrap();
        assert_eq!(sink_file_name(&cfg, Sink::Weights), "w.h");
        assert_eq!(sink_file_name(&cfg, Sink::Main), "main.c");
        assert_eq!(sink_file_name(&cfg, Sink::SampleData), "sampledata.h");
    }
}
