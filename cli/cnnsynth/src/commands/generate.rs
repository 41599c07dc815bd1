//! `cnnsynth generate`: resolve the device, synthesize, write the sources.

use std::path::Path;

use anyhow::{Context, Result};
use cnnsynth_codegen::{synthesize, SynthesisInputs, SynthesisOutput};

use crate::manifest::{resolve_device, SynthManifest};

/// Options given on the command line that override the manifest.
#[derive(Debug, Default)]
pub struct GenerateOptions<'a> {
    pub device: Option<&'a str>,
    pub output: Option<&'a str>,
    /// Print the report as JSON instead of text.
    pub json: bool,
    /// Synthesize and report without writing any file.
    pub dry_run: bool,
}

pub fn run(project_dir: &Path, manifest: &SynthManifest, opts: &GenerateOptions<'_>) -> Result<()> {
    let output = synthesize_project(project_dir, manifest, opts.device)?;

    if opts.json {
        println!("{}", output.report.to_json()?);
    } else {
        print!("{}", output.report);
    }
    if opts.dry_run {
        return Ok(());
    }

    let out_dir = match opts.output {
        Some(dir) => project_dir.join(dir),
        None => manifest.output_dir(project_dir),
    };
    let written = output
        .write_to(&out_dir)
        .with_context(|| format!("writing sources to {}", out_dir.display()))?;
    if !opts.json {
        println!();
        for path in &written {
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

/// Run synthesis for the project without touching the output directory.
pub(crate) fn synthesize_project(
    project_dir: &Path,
    manifest: &SynthManifest,
    device: Option<&str>,
) -> Result<SynthesisOutput> {
    let device_name = device.unwrap_or(&manifest.project.device);
    let caps = resolve_device(project_dir, device_name)?;

    let config = manifest
        .synthesis
        .clone()
        .build()
        .context("invalid [synthesis] configuration")?;

    let inputs = match manifest.inputs_path(project_dir) {
        Some(path) => SynthesisInputs::load(&path)
            .with_context(|| format!("loading inputs from {}", path.display()))?,
        None => SynthesisInputs::default(),
    };

    tracing::debug!(
        project = %manifest.project.name,
        device = %caps.name,
        "synthesizing"
    );
    synthesize(&config, &caps, &inputs)
        .with_context(|| format!("synthesis for device '{}' failed", caps.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::init::create_project;
    use cnnsynth_codegen::Sink;

    fn project(name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        create_project(&path, name).unwrap();
        (dir, path)
    }

    fn load(path: &Path) -> SynthManifest {
        SynthManifest::find_and_load(path).unwrap().unwrap().0
    }

    #[test]
    fn generate_writes_sources() {
        let (_dir, path) = project("gen");
        let manifest = load(&path);

        run(&path, &manifest, &GenerateOptions::default()).unwrap();

        let main = std::fs::read_to_string(path.join("out/main.c")).unwrap();
        assert!(main.contains("int main(void)"));
        assert!(main.contains("cnn_unload((uint32_t *) ml_data32);"));
    }

    #[test]
    fn dry_run_writes_nothing() {
        let (_dir, path) = project("dry");
        let manifest = load(&path);
        let opts = GenerateOptions {
            dry_run: true,
            ..Default::default()
        };

        run(&path, &manifest, &opts).unwrap();
        assert!(!path.join("out/main.c").exists());
    }

    #[test]
    fn output_override() {
        let (_dir, path) = project("override");
        let manifest = load(&path);
        let opts = GenerateOptions {
            output: Some("build/src"),
            ..Default::default()
        };

        run(&path, &manifest, &opts).unwrap();
        assert!(path.join("build/src/main.c").is_file());
    }

    #[test]
    fn device_override_and_unknown_device() {
        let (_dir, path) = project("devices");
        let manifest = load(&path);

        let out = synthesize_project(&path, &manifest, Some("ai87")).unwrap();
        assert_eq!(out.report.device, "ai87");
        assert!(out.stream(Sink::Main).unwrap().contains("MXC_GCFR->reg0"));

        let err = synthesize_project(&path, &manifest, Some("ai99")).unwrap_err();
        assert!(format!("{err:#}").contains("unknown device"));
    }

    #[test]
    fn classification_inputs_are_loaded() {
        let (_dir, path) = project("fc");
        let toml = SynthManifest::template("fc")
            .replace("retrieval = \"unload\"", "retrieval = \"fully-connected\"");
        std::fs::write(path.join("cnnsynth.toml"), toml).unwrap();
        std::fs::write(
            path.join("inputs.json"),
            r#"{ "fc-weights": { "rows": 2, "cols": 2, "values": [1, 2, 3, 4] } }"#,
        )
        .unwrap();
        let manifest = load(&path);

        let out = synthesize_project(&path, &manifest, None).unwrap();
        assert!(out.stream(Sink::Weights).unwrap().contains("#define FC_WEIGHTS"));
    }

    #[test]
    fn invalid_configuration_is_reported() {
        let (_dir, path) = project("bad");
        let toml = SynthManifest::template("bad").replace("groups = [0, 1, 2, 3]", "groups = []");
        std::fs::write(path.join("cnnsynth.toml"), toml).unwrap();
        let manifest = load(&path);

        let err = synthesize_project(&path, &manifest, None).unwrap_err();
        assert!(format!("{err:#}").contains("invalid [synthesis] configuration"));
    }
}
