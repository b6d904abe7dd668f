use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use celestial_mask::naming::encode_name;
use celestial_mask::{
    write_mask_fits, DiagnosticLevel, KeywordMap, MaskCatalog, MaskConfig, Raster, TileName,
};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const ARCSEC_PER_DEG: f64 = 3600.0;

#[derive(Parser)]
#[command(name = "mask-check")]
#[command(about = "Inspect mask tile directories and test sky positions against them")]
#[command(version)]
struct Cli {
    /// Directory of mask tiles
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Field center right ascension in degrees (defaults to the query position)
    #[arg(long, global = true, allow_hyphen_values = true)]
    field_ra: Option<f64>,

    /// Field center declination in degrees (defaults to the query position)
    #[arg(long, global = true, allow_hyphen_values = true)]
    field_dec: Option<f64>,

    /// Field radius in degrees
    #[arg(long, global = true, default_value = "1.0")]
    field_radius: f64,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test whether a sky disc is free of masked pixels
    Check {
        /// Right ascension in degrees
        #[arg(allow_hyphen_values = true)]
        ra: f64,
        /// Declination in degrees
        #[arg(allow_hyphen_values = true)]
        dec: f64,
        /// Disc radius in arcseconds
        #[arg(long, default_value = "3.0")]
        radius: f64,
        /// Report every covering tile
        #[arg(long)]
        detailed: bool,
    },
    /// Load the tiles overlapping the field and list them
    Tiles,
    /// Decode a tile file name
    Decode {
        /// File name, e.g. mask_0.1_0.12_-30_150.fits
        name: String,
    },
    /// Write a synthetic mask tile into --dir
    Synth {
        /// Tile center right ascension in degrees
        #[arg(long, allow_hyphen_values = true)]
        ra: f64,
        /// Tile center declination in degrees
        #[arg(long, allow_hyphen_values = true)]
        dec: f64,
        /// Width in pixels
        #[arg(long, default_value = "100")]
        nx: usize,
        /// Height in pixels
        #[arg(long, default_value = "100")]
        ny: usize,
        /// Pixel scale in arcseconds
        #[arg(long, default_value = "1.0")]
        scale: f64,
        /// Masked pixel as X,Y (1-based), may be repeated
        #[arg(long = "flag", value_parser = parse_pixel)]
        flags: Vec<(usize, usize)>,
        /// File name prefix
        #[arg(long, default_value = "mask")]
        prefix: String,
        /// Record the extent in the file name instead of writing a legacy name
        #[arg(long)]
        with_extent: bool,
        /// Gzip the output
        #[arg(long)]
        gzip: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => MaskConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => MaskConfig::default(),
    };

    match &cli.command {
        Commands::Check {
            ra,
            dec,
            radius,
            detailed,
        } => {
            if *detailed {
                config.diagnostics = DiagnosticLevel::Detailed;
            }
            let field_ra = cli.field_ra.unwrap_or(*ra);
            let field_dec = cli.field_dec.unwrap_or(*dec);
            let catalog = load_catalog(&cli, config, field_ra, field_dec)?;

            let radius_deg = radius / ARCSEC_PER_DEG;
            let assessment = catalog.assess(*ra, *dec, radius_deg)?;
            for verdict in &assessment.verdicts {
                let tile = &catalog.tiles()[verdict.tile_index];
                println!(
                    "{}  pixel ({}, {})  {}",
                    tile.path().display(),
                    verdict.pixel.x,
                    verdict.pixel.y,
                    if verdict.contaminated { "contaminated" } else { "clean" }
                );
            }
            println!("{}", if assessment.clear { "clear" } else { "contaminated" });
        }
        Commands::Tiles => {
            let (Some(field_ra), Some(field_dec)) = (cli.field_ra, cli.field_dec) else {
                bail!("--field-ra and --field-dec are required to list tiles");
            };
            let catalog = load_catalog(&cli, config, field_ra, field_dec)?;
            for tile in catalog.tiles() {
                let fp = tile.footprint();
                println!(
                    "{}  {}x{}  center {}  extent {:.5} x {:.5} deg  {} masked",
                    tile.path().display(),
                    tile.nx(),
                    tile.ny(),
                    fp.center,
                    fp.ra_extent,
                    fp.dec_extent,
                    tile.raster().count_contaminated()
                );
            }
        }
        Commands::Decode { name } => {
            let decoded = TileName::decode(name)?;
            println!("prefix:    {}", decoded.prefix);
            println!("extension: {}", decoded.extension);
            println!("RA:        {}", decoded.center_ra);
            println!("Dec:       {}", decoded.center_dec);
            match decoded.extent {
                Some(extent) => println!("extent:    {} x {} deg", extent.ra, extent.dec),
                None => println!("extent:    (legacy name)"),
            }
        }
        Commands::Synth {
            ra,
            dec,
            nx,
            ny,
            scale,
            flags,
            prefix,
            with_extent,
            gzip,
        } => {
            let dir = require_dir(&cli)?;
            let mut raster = Raster::zeros(*nx, *ny)?;
            for &(x, y) in flags {
                if !raster.set(x, y, 1) {
                    bail!("pixel ({}, {}) is outside a {}x{} tile", x, y, nx, ny);
                }
            }

            let scale_deg = scale / ARCSEC_PER_DEG;
            let extension = if *gzip { "fits.gz" } else { "fits" };
            let name = if *with_extent {
                let cos_dec = dec.to_radians().cos();
                encode_name(
                    prefix,
                    extension,
                    *ra,
                    *dec,
                    *nx as f64 * scale_deg / cos_dec,
                    *ny as f64 * scale_deg,
                )
            } else {
                format!("{}_{}_{}.{}", prefix, dec, ra, extension)
            };

            let path = dir.join(name);
            let keywords = KeywordMap::tan_tile(*nx, *ny, *ra, *dec, scale_deg);
            write_mask_fits(&path, &raster, &keywords, *gzip)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("celestial_mask={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn require_dir(cli: &Cli) -> Result<&Path> {
    cli.dir
        .as_deref()
        .context("--dir is required for this command")
}

fn load_catalog(cli: &Cli, config: MaskConfig, field_ra: f64, field_dec: f64) -> Result<MaskCatalog> {
    let dir = require_dir(cli)?;
    let mut catalog = MaskCatalog::new(config);
    let report = catalog
        .initialise(dir, field_ra, field_dec, cli.field_radius)
        .with_context(|| format!("loading mask tiles from {}", dir.display()))?;
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(catalog)
}

fn parse_pixel(s: &str) -> Result<(usize, usize), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got '{}'", s))?;
    let x = x.trim().parse().map_err(|e| format!("bad X in '{}': {}", s, e))?;
    let y = y.trim().parse().map_err(|e| format!("bad Y in '{}': {}", s, e))?;
    Ok((x, y))
}
