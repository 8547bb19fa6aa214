//! mobi-unpack: extract the HTML, images and metadata of a MOBI or PalmDOC
//! book into a directory of loose OEB files.
//!
//! `mobi-unpack book.mobi [-o outdir] [--options]`

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use mobi_core::error::MobiError;
use mobi_core::options::DecodeOptions;
use mobi_core::pipeline::PipelineBuilder;
use mobi_core::plugin::UnpackResult;
use mobi_output::OebOutputPlugin;
use mobi_reader::{ImageCrateCodec, MobiInputPlugin};

const APP_NAME: &str = "mobi-unpack";
const LOCAL_CONFIG: &str = ".mobi-unpack.toml";

#[derive(Parser, Debug)]
#[command(name = "mobi-unpack", version, about = "Unpack MOBI ebooks into HTML, images and an OPF")]
struct Cli {
    /// Input MOBI/PRC/PDB file
    input: PathBuf,

    /// Output directory (default: <input stem>_unpacked next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Character encoding used when the book's own is unknown
    #[arg(long)]
    encoding: Option<String>,

    /// Recompute trailing-entry flags from the text records
    #[arg(long)]
    extra_data_fix: bool,

    /// Keep the raw markup next to the output
    #[arg(long)]
    debug: bool,

    /// JPEG quality for re-encoded images (1-100, default 90)
    #[arg(long)]
    jpeg_quality: Option<u8>,

    /// Skip image extraction
    #[arg(long)]
    no_images: bool,

    /// Do not write toc.ncx
    #[arg(long)]
    no_ncx: bool,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the unpack result as JSON instead of a summary
    #[arg(long)]
    json: bool,

    /// Dump effective merged config as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

/// Load config from global and project-local TOML files.
/// Keys in later files override earlier ones. Missing files are silently ignored.
fn load_config() -> (DecodeOptions, Vec<String>) {
    let mut paths = Vec::new();
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join(APP_NAME).join("config.toml"));
    }
    paths.push(PathBuf::from(LOCAL_CONFIG));

    let sources: Vec<(PathBuf, String)> = paths
        .into_iter()
        .filter_map(|path| {
            let contents = std::fs::read_to_string(&path).ok()?;
            Some((path, contents))
        })
        .collect();
    merge_config(&sources)
}

/// Merge TOML sources in order. Problems come back as warnings: the logger
/// is configured from the merged options, so it does not exist yet.
fn merge_config(sources: &[(PathBuf, String)]) -> (DecodeOptions, Vec<String>) {
    let mut warnings = Vec::new();
    let mut merged = toml::Table::new();
    for (path, contents) in sources {
        match contents.parse::<toml::Table>() {
            Ok(table) => merge_tables(&mut merged, table),
            Err(e) => warnings.push(format!("Failed to parse {}: {}", path.display(), e)),
        }
    }

    match toml::Value::Table(merged).try_into::<DecodeOptions>() {
        Ok(opts) => (opts, warnings),
        Err(e) => {
            warnings.push(format!("Ignoring invalid configuration: {}", e));
            (DecodeOptions::default(), warnings)
        }
    }
}

/// Overlay `from` onto `base`, key by key.
fn merge_tables(base: &mut toml::Table, from: toml::Table) {
    for (key, value) in from {
        base.insert(key, value);
    }
}

/// Apply CLI flags on top of config-loaded options.
/// Only overrides when the flag was given.
fn apply_cli_overrides(opts: &mut DecodeOptions, cli: &Cli) {
    if cli.verbose > 0 {
        opts.verbose = cli.verbose;
    }
    if cli.encoding.is_some() {
        opts.user_encoding = cli.encoding.clone();
    }
    if cli.extra_data_fix {
        opts.try_extra_data_fix = true;
    }
    if cli.debug {
        opts.debug = true;
    }
    if let Some(quality) = cli.jpeg_quality {
        opts.jpeg_quality = quality.clamp(1, 100);
    }
    if cli.no_images {
        opts.extract_images = false;
    }
    if cli.no_ncx {
        opts.generate_ncx = false;
    }
}

fn default_output_dir(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());
    input
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(format!("{}_unpacked", stem))
}

fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn main() {
    let cli = Cli::parse();

    let (mut options, config_warnings) = load_config();
    apply_cli_overrides(&mut options, &cli);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(options.verbose)))
        .init();
    for warning in &config_warnings {
        log::warn!("{}", warning);
    }

    if cli.dump_config {
        match toml::to_string_pretty(&options) {
            Ok(s) => {
                println!("{}", s);
                process::exit(0);
            }
            Err(e) => {
                eprintln!("Error serializing config: {}", e);
                process::exit(1);
            }
        }
    }

    let out_dir = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_dir(&cli.input));

    match run_unpack(&cli.input, &out_dir, &options) {
        Ok(result) if cli.json => match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing result: {}", e);
                process::exit(1);
            }
        },
        Ok(result) => print_summary(&result),
        Err(e) => {
            log::debug!("{:#}", e);
            let kind = e
                .downcast_ref::<MobiError>()
                .map(MobiError::kind)
                .unwrap_or("Error");
            eprintln!("error: {}: {}", kind, cli.input.display());
            process::exit(1);
        }
    }
}

fn run_unpack(input: &Path, out_dir: &Path, options: &DecodeOptions) -> Result<UnpackResult> {
    log::info!("Unpacking {} → {}", input.display(), out_dir.display());

    let pipeline = PipelineBuilder::new()
        .input(Box::new(MobiInputPlugin))
        .output(Box::new(OebOutputPlugin))
        .image_codec(Box::new(ImageCrateCodec))
        .progress_reporter(Box::new(|frac, msg| {
            if frac < 1.0 {
                log::info!("[{:3.0}%] {}", frac * 100.0, msg);
            } else {
                log::info!("Done!");
            }
        }))
        .build()?;

    let result = pipeline
        .run(input, out_dir, options)
        .with_context(|| format!("Failed to unpack {}", input.display()))?;
    Ok(result)
}

fn print_summary(result: &UnpackResult) {
    println!("HTML:   {}", result.html_path.display());
    println!("OPF:    {}", result.opf_path.display());
    if let Some(ncx) = &result.ncx_path {
        println!("NCX:    {}", ncx.display());
    }
    if let Some(raw) = &result.raw_markup_path {
        println!("Raw:    {}", raw.display());
    }
    println!("Images: {}", result.images.len());
}
