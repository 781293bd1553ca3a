//! Elementwise GPU demo - add each element's index to it via OpenCL
//!
//! This application selects a GPU through OpenCL, compiles a small
//! kernel from inline source, uploads an integer array, runs
//! `array[i] += i` on the device and prints a before/after comparison,
//! one `<old> -> <new>` line per element.

mod opencl;

use crate::opencl::{ArrayModifier, ArrayModifierConfig};

use anyhow::{bail, Context, Result};
use clap::Parser;
use opencl3::{
    device::{get_device_ids, Device, CL_DEVICE_TYPE_GPU},
    platform::get_platforms,
};
use rand::Rng;
use std::io::{self, BufRead, Write};

/// Command line arguments for the index-add demo
#[derive(Parser, Debug)]
#[clap(
    name = "idxadd",
    about = "Run an elementwise array[i] += i kernel on a GPU and print the before/after comparison.",
    version
)]
struct Args {
    /// Number of array elements. Prompted for on stdin when omitted.
    #[clap(short, long)]
    size: Option<usize>,

    /// GPU device index to use (0 for first GPU)
    #[clap(short, long, default_value = "0")]
    device: usize,

    /// OpenCL platform index
    #[clap(short, long, default_value = "0")]
    platform: usize,

    /// Enable verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// List available OpenCL platforms and devices and exit
    #[clap(long)]
    list_devices: bool,
}

/// Parses a line of console input as a positive element count.
pub(crate) fn parse_size_input(line: &str) -> Result<usize> {
    let size: usize = line
        .trim()
        .parse()
        .with_context(|| format!("Invalid size: '{}'", line.trim()))?;
    if size == 0 {
        bail!("Size must be greater than zero");
    }
    Ok(size)
}

/// Prompts for the array size on stdout and reads one integer from stdin.
fn prompt_for_size() -> Result<usize> {
    println!("Enter size (multiple of 256)");
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read size from stdin")?;
    parse_size_input(&line)
}

/// Lists available OpenCL devices.
fn list_opencl_devices() -> Result<()> {
    println!("Available OpenCL Platforms and Devices:");
    let platforms = get_platforms().context("Failed to get OpenCL platforms")?;
    if platforms.is_empty() {
        println!("  No OpenCL platforms found.");
        return Ok(());
    }

    for (plat_idx, platform) in platforms.iter().enumerate() {
        let plat_name = platform
            .name()
            .unwrap_or_else(|_| "Unknown Platform".to_string());
        println!("\nPlatform {}: {}", plat_idx, plat_name);

        match get_device_ids(platform.id(), CL_DEVICE_TYPE_GPU) {
            Ok(device_ids) => {
                if device_ids.is_empty() {
                    println!("  No GPU devices found on this platform.");
                } else {
                    for (dev_idx, device_id) in device_ids.iter().enumerate() {
                        let device = Device::new(*device_id);
                        let dev_name = device
                            .name()
                            .unwrap_or_else(|_| "Unknown Device".to_string());
                        let dev_vendor = device
                            .vendor()
                            .unwrap_or_else(|_| "Unknown Vendor".to_string());
                        let max_wg = device.max_work_group_size().unwrap_or(0);
                        println!(
                            "  Device {}: {} ({}) - Max work-group size: {}",
                            dev_idx, dev_name, dev_vendor, max_wg
                        );
                    }
                }
            }
            Err(e) => {
                println!("  Error getting devices for this platform: {}", e);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_devices {
        return list_opencl_devices();
    }

    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let size = match args.size {
        Some(size) => {
            if size == 0 {
                bail!("Size must be greater than zero");
            }
            size
        }
        None => prompt_for_size()?,
    };

    let config = ArrayModifierConfig {
        platform_index: args.platform,
        device_index: args.device,
    };
    let modifier = ArrayModifier::new(&config).context("Failed to set up OpenCL")?;

    log::info!(
        "Dispatching {} element(s) on {} (work-group size {})",
        size,
        modifier.device_name(),
        modifier.work_group_size()
    );

    let mut rng = rand::thread_rng();
    let original: Vec<i32> = (0..size).map(|_| rng.gen_range(0..10_000)).collect();
    let mut modified = original.clone();

    modifier
        .run(&mut modified)
        .context("Kernel dispatch failed")?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (old, new) in original.iter().zip(modified.iter()) {
        writeln!(out, "{} -> {}", old, new).context("Failed to write comparison")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_size_input;

    #[test]
    fn size_input_parses_plain_integer() {
        assert_eq!(parse_size_input("512").unwrap(), 512);
    }

    #[test]
    fn size_input_ignores_surrounding_whitespace() {
        assert_eq!(parse_size_input("  256\n").unwrap(), 256);
    }

    #[test]
    fn size_input_rejects_zero() {
        assert!(parse_size_input("0").is_err());
    }

    #[test]
    fn size_input_rejects_garbage() {
        assert!(parse_size_input("lots").is_err());
        assert!(parse_size_input("").is_err());
        assert!(parse_size_input("-4").is_err());
    }
}
