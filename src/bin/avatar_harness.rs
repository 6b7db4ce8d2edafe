use std::env;
use std::fs::{self, File};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use marionette::cli::CliOverrides;
use marionette::config::RuntimeConfig;
use marionette::script_harness::{load_fixture, run_fixture_with_config, HarnessOutput};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(err) = run_cli() {
        log::error!("[avatar-harness] {err:?}");
        eprintln!("[avatar-harness] error: {err:?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let opts = parse_args()?;
    let mut config = match &opts.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    let overrides = opts.overrides.into_config_overrides();
    if !overrides.is_empty() {
        log::info!("[avatar-harness] overriding {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
    }

    let fixture = load_fixture(&opts.fixture)?;
    let output = run_fixture_with_config(&fixture, &config)?;

    if let Some(path) = &opts.write_output {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating output directory '{}'", parent.display()))?;
            }
        }
        let file = File::create(path).with_context(|| format!("writing harness output to '{}'", path.display()))?;
        serde_json::to_writer_pretty(file, &output).with_context(|| "serializing harness output")?;
        println!("[avatar-harness] wrote {}", path.display());
    }

    if let Some(path) = &opts.check_golden {
        let file = File::open(path).with_context(|| format!("opening golden file '{}'", path.display()))?;
        let expected: HarnessOutput = serde_json::from_reader(file).with_context(|| "parsing golden JSON")?;
        if expected != output {
            bail!(
                "golden mismatch for {} (use --write-output to refresh):\nexpected: {}\nactual:   {}",
                opts.fixture.display(),
                serde_json::to_string(&expected).unwrap_or_default(),
                serde_json::to_string(&output).unwrap_or_default(),
            );
        }
        println!("[avatar-harness] matched golden {}", path.display());
    } else if opts.write_output.is_none() {
        serde_json::to_writer_pretty(std::io::stdout(), &output)?;
        println!();
    }

    Ok(())
}

struct CliOptions {
    fixture: PathBuf,
    config: Option<PathBuf>,
    write_output: Option<PathBuf>,
    check_golden: Option<PathBuf>,
    overrides: CliOverrides,
}

fn parse_args() -> Result<CliOptions> {
    let mut fixture = None;
    let mut config = None;
    let mut write_output = None;
    let mut check_golden = None;
    let mut overrides = CliOverrides::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixture" | "-f" => fixture = args.next().map(PathBuf::from),
            "--config" | "-c" => config = args.next().map(PathBuf::from),
            "--write-output" | "-o" => write_output = args.next().map(PathBuf::from),
            "--golden" | "-g" => check_golden = args.next().map(PathBuf::from),
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => {
                let value = args.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?;
                overrides.apply(&flag[2..], flag, &value)?;
            }
            other => {
                return Err(anyhow!("unknown argument '{other}'"));
            }
        }
    }
    let Some(fixture) = fixture else { return Err(anyhow!("--fixture <path> is required")) };
    Ok(CliOptions { fixture, config, write_output, check_golden, overrides })
}

fn print_help() {
    println!("Usage: avatar_harness --fixture <path> [--config <path>] [--golden <path>] [--write-output <path>]");
    println!("  -f, --fixture          Path to a harness fixture JSON file");
    println!("  -c, --config           Optional runtime config JSON");
    println!("  -g, --golden           Optional golden output file to compare against");
    println!("  -o, --write-output     Optional path to write the actual output JSON");
    println!("      --fault-threshold  Consecutive faults before a script is disabled (0 = never)");
    println!("      --max-operations   Default per-call operation budget");
    println!("      --trace            on/off; log every avatar event");
}
