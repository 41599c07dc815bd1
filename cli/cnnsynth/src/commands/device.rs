//! `cnnsynth device`: descriptor listing, description, validation and
//! templates.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use cnnsynth_device::{
    builtin_devices, device_to_toml, discover_devices, generate_template, validate_device,
    CapabilityDescriptor, Severity,
};

use crate::manifest::resolve_device;

/// List built-in devices and any found in the project's `devices/`.
pub fn list(project_dir: &Path) -> Result<()> {
    println!("Built-in devices:");
    println!();
    for (name, description) in builtin_devices() {
        println!("  {name:<12} {description}");
    }

    let project_devices = discover_devices(project_dir)?;
    if !project_devices.is_empty() {
        println!();
        println!("Project devices:");
        println!();
        for (name, path) in &project_devices {
            println!("  {name:<12} {}", path.display());
        }
    }
    println!();
    println!("Use 'cnnsynth device describe <name>' for details.");
    Ok(())
}

/// Describe a device in detail, as text, TOML or JSON.
pub fn describe(project_dir: &Path, name: &str, format: Option<&str>) -> Result<()> {
    let device = resolve_device(project_dir, name)?;
    match format {
        None | Some("text") => print!("{}", render(&device)),
        Some("toml") => print!("{}", device_to_toml(&device)?),
        Some("json") => println!("{}", serde_json::to_string_pretty(&device)?),
        Some(other) => bail!("unknown format '{other}' (expected text, toml or json)"),
    }
    Ok(())
}

fn render(device: &CapabilityDescriptor) -> String {
    let mut out = String::new();
    let mut line = |s: String| {
        out.push_str(&s);
        out.push('\n');
    };
    line(format!("=== Device: {} ===", device.name));
    line(format!("Family: {:?}", device.family));
    line(String::new());

    line("--- Accelerator ---".into());
    line(format!("  CNN base:       0x{:08x}", device.cnn_base_address()));
    line(format!("  Groups:         {}", device.group_count));
    line(format!("  Group stride:   0x{:08x}", device.group_stride));
    for group in 0..device.group_count {
        line(format!("    group {group} ctl: 0x{:08x}", device.ctl_address(group)));
    }
    line(format!(
        "  Power control:  {} ({})",
        device.power_controller.block(),
        device.power_controller.header()
    ));
    line(String::new());

    line("--- Clocks ---".into());
    line(format!("  IPO: {} MHz", device.clocks.ipo_mhz));
    line(format!("  APB: {} MHz", device.clocks.apb_mhz));
    match device.clocks.pll_mhz {
        Some(pll) => line(format!("  PLL: {pll} MHz")),
        None => line("  PLL: none".into()),
    }
    line(String::new());

    line("--- Features ---".into());
    line(format!("  Modern simulation:    {}", device.modern_sim));
    line(format!("  One-shot clear:       {}", device.require_oneshot_clear));
    line(format!("  Semaphore wake bit:   {}", device.require_sema_lpwken));
    match &device.companion {
        Some(mem) => line(format!(
            "  Companion core:       yes (flash 0x{:08x}, sram 0x{:08x})",
            mem.code_origin, mem.sram_origin
        )),
        None => line("  Companion core:       no".into()),
    }
    out
}

/// Validate a device descriptor; errors fail the command.
pub fn validate(project_dir: &Path, name: &str) -> Result<()> {
    let device = resolve_device(project_dir, name)?;
    let issues = match validate_device(&device) {
        Ok(()) => {
            println!("Device '{name}' is valid.");
            return Ok(());
        }
        Err(issues) => issues,
    };

    let mut errors = 0;
    for issue in &issues {
        match issue.severity {
            Severity::Error => {
                errors += 1;
                eprintln!("error: {}", issue.message);
            }
            Severity::Warning => eprintln!("warning: {}", issue.message),
        }
    }
    if errors > 0 {
        bail!("device '{name}' has {errors} error(s)");
    }
    println!("Device '{name}' is valid ({} warning(s)).", issues.len());
    Ok(())
}

/// Write `devices/<name>.device.toml` seeded from the default preset.
pub fn template(project_dir: &Path, name: &str) -> Result<()> {
    let devices_dir = project_dir.join("devices");
    let path = devices_dir.join(format!("{name}.device.toml"));
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    fs::create_dir_all(&devices_dir).context("creating devices/ directory")?;
    fs::write(&path, generate_template(name)?)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Created {}", path.display());
    Ok(())
}
