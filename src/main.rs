use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use docx_mender::config::{init_default_config, load_or_default};
use docx_mender::docx::rules::{validate_file, ValidationReport};
use docx_mender::docx::vocab::Registry;
use docx_mender::docx::{order, widths};
use docx_mender::edit::script::{needs_more_context, EditScript};
use docx_mender::edit::EditSession;

#[derive(Parser, Debug)]
#[command(name = "docx-mender")]
#[command(about = "DOCX repair, validation and review editing (comments + tracked changes)", long_about = None)]
struct Args {
    /// Write a default docx-mender.toml, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input .docx
    #[arg(value_name = "DOCX")]
    input: Option<PathBuf>,

    /// Output .docx (default: <input_stem>.mended.docx)
    #[arg(short, long, value_name = "DOCX")]
    output: Option<PathBuf>,

    /// Config file path (default: search for docx-mender.toml upwards, or DOCX_MENDER_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Apply a TOML edit script (comments + tracked changes)
    #[arg(long, value_name = "TOML")]
    edits: Option<PathBuf>,

    /// Rewrite cell widths that disagree with the table grid
    #[arg(long)]
    fix_table_widths: bool,

    /// Reorder elements into schema sequence
    #[arg(long)]
    fix_order: bool,

    /// Check business rules (default when no other action is given)
    #[arg(long)]
    validate: bool,

    /// Print the validation report as JSON
    #[arg(long)]
    json: bool,
}

fn default_output_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    input.with_file_name(format!("{stem}.mended.docx"))
}

fn print_report(report: &ValidationReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report).context("serialize report")?);
        return Ok(());
    }
    for w in &report.warnings {
        println!("Warning: {w}");
    }
    for e in &report.errors {
        println!("Error: {e}");
    }
    if report.passed() {
        println!("Validation passed");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let input = match args.input {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  docx-mender <input.docx> [--edits edits.toml] [--fix-order] [--validate]\n\nTIPS:\n  - Default config search: docx-mender.toml (upwards), or set DOCX_MENDER_CONFIG.\n"
            );
            return Ok(());
        }
    };
    if !input.is_file() {
        anyhow::bail!("input not found: {}", input.display());
    }

    let (cfg, cfg_path) = load_or_default(args.config.as_deref())?;
    if let Some(p) = cfg_path.as_ref() {
        info!(config = %p.display(), "loaded config");
    }
    let rules = cfg.rule_settings();

    let modifies = args.edits.is_some() || args.fix_table_widths || args.fix_order;
    let output = args.output.clone().unwrap_or_else(|| default_output_for(&input));
    // Each step reads the previous step's result.
    let mut current = input.clone();

    if let Some(edits) = args.edits.as_ref() {
        let script = EditScript::load(edits)?;
        let mut session = EditSession::open(&input, cfg.session_options())
            .with_context(|| format!("open {}", input.display()))?;
        if let Err(e) = script.apply(&mut session) {
            if needs_more_context(&e) {
                eprintln!("Hint: add `context` (surrounding text) to the failing operation to pick one match.");
            }
            return Err(e.context(format!("edit script {} not applied; output not written", edits.display())));
        }
        session.commit(&output)?;
        current = output.clone();
    }

    if args.fix_table_widths {
        let n = widths::fix_file(&current, &output, rules.width_tolerance)?;
        eprintln!("Table widths fixed: {n}");
        current = output.clone();
    }

    if args.fix_order {
        let registry = Registry::standard();
        let n = order::fix_file(&current, &output, &registry)?;
        eprintln!("Element order fixes: {n}");
        current = output.clone();
    }

    if modifies {
        eprintln!("Wrote: {}", output.display());
    }

    if args.validate || !modifies {
        let report = validate_file(&current, &rules);
        print_report(&report, args.json)?;
        if !report.passed() {
            std::process::exit(1);
        }
    }
    Ok(())
}
