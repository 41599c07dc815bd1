//! `cnnsynth.toml` manifest parsing and device resolution.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cnnsynth_codegen::ConfigurationBuilder;
use cnnsynth_device::{discover_devices, load_device_toml, CapabilityDescriptor};
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE: &str = "cnnsynth.toml";

/// The top-level manifest structure for a cnnsynth project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthManifest {
    /// Project metadata (required).
    pub project: ProjectConfig,
    /// Synthesis axes; everything not given keeps its default.
    #[serde(default)]
    pub synthesis: ConfigurationBuilder,
    #[serde(default)]
    pub inputs: InputsConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Project metadata section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (required).
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Built-in device name, or the stem of a file in `devices/`.
    #[serde(default = "default_device")]
    pub device: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_device() -> String {
    "ai85".to_string()
}

/// Array inputs for the classification layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputsConfig {
    /// JSON file with `fc-weights`, `fc-bias` and `fc-expected`, relative to
    /// the project directory.
    #[serde(default)]
    pub arrays: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory generated sources are written to.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

impl SynthManifest {
    /// Search upward from `start_dir` for a `cnnsynth.toml` file, parse and
    /// return it along with the directory it was found in.
    pub fn find_and_load(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join(MANIFEST_FILE);
            if candidate.is_file() {
                let content = std::fs::read_to_string(&candidate)
                    .with_context(|| format!("reading {}", candidate.display()))?;
                let manifest: SynthManifest = toml::from_str(&content)
                    .with_context(|| format!("parsing {}", candidate.display()))?;
                return Ok(Some((manifest, dir)));
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(None)
    }

    /// Parse a manifest from a TOML string.
    #[cfg(test)]
    pub fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing cnnsynth.toml")
    }

    /// Absolute path of the array input file, if one is configured.
    pub fn inputs_path(&self, project_dir: &Path) -> Option<PathBuf> {
        self.inputs.arrays.as_ref().map(|p| project_dir.join(p))
    }

    pub fn output_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.output.dir)
    }

    /// Generate the default template for `cnnsynth init`.
    pub fn template(name: &str) -> String {
        format!(
            r#"[project]
name = "{name}"
version = "0.1.0"
device = "ai85"

[synthesis]
target = "embedded"
groups = [0, 1, 2, 3]
retrieval = "unload"
output-width = 8

[inputs]
arrays = "inputs.json"

[output]
dir = "out"
"#
        )
    }
}

/// Resolve a device name: project files in `devices/` shadow the built-ins.
pub fn resolve_device(project_dir: &Path, name: &str) -> Result<CapabilityDescriptor> {
    let project_devices = discover_devices(project_dir)
        .with_context(|| format!("scanning {}/devices", project_dir.display()))?;
    if let Some((_, path)) = project_devices.iter().find(|(n, _)| n == name) {
        tracing::debug!(device = name, path = %path.display(), "using project device file");
        return load_device_toml(path).with_context(|| format!("loading {}", path.display()));
    }
    match cnnsynth_device::resolve_device(name) {
        Some(device) => Ok(device),
        None => bail!(
            "unknown device: '{name}'. Use 'cnnsynth device list' to see available devices."
        ),
    }
}
