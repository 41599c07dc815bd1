//! `cnnsynth init`: project scaffolding.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::manifest::{SynthManifest, MANIFEST_FILE};

/// Create a new cnnsynth project in the directory `name`, relative to cwd.
pub fn run(name: &str) -> Result<()> {
    create_project(Path::new(name), name)
}

pub(crate) fn create_project(project_dir: &Path, name: &str) -> Result<()> {
    if project_dir.exists() {
        bail!("directory '{}' already exists", project_dir.display());
    }

    fs::create_dir_all(project_dir.join("devices")).context("creating devices/ directory")?;
    fs::create_dir_all(project_dir.join("out")).context("creating out/ directory")?;

    fs::write(project_dir.join(MANIFEST_FILE), SynthManifest::template(name))
        .context("writing cnnsynth.toml")?;
    // No classification arrays until the retrieval mode needs them.
    fs::write(project_dir.join("inputs.json"), "{}\n").context("writing inputs.json")?;
    fs::write(project_dir.join(".gitignore"), "out/\n").context("writing .gitignore")?;

    println!("Created project '{name}'");
    println!("  {name}/{MANIFEST_FILE}");
    println!("  {name}/inputs.json");
    println!("  {name}/devices/");
    println!("  {name}/out/");
    println!("  {name}/.gitignore");

    Ok(())
}
