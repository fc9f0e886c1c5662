//! Boothprint CLI
//!
//! Commands: watch, compose, check-template
//! `compose` and `check-template` print JSON to stdout; logs go to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use boothprint_core::{
    archive::Archive,
    compositor::{CollageRenderer, Compositor},
    config::BoothConfig,
    monitor::{copy_source, install_interrupt_handler, Monitor},
    templates::{
        find_transparent_regions, load_template, CollageLayout, DEFAULT_ALPHA_THRESHOLD,
        DEFAULT_MIN_WINDOW_SIDE,
    },
};

#[derive(Parser)]
#[command(name = "boothprint-cli")]
#[command(about = "Boothprint CLI - photo booth collage printer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory the camera software writes photos to
    #[arg(long, global = true)]
    input_dir: Option<PathBuf>,

    /// Root for collages and archived photos
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Template image with three transparent windows
    #[arg(long, global = true)]
    template: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the input directory and print collages as photos arrive
    Watch {
        /// Default copies per collage
        #[arg(long)]
        copies: Option<u32>,

        /// Use the default copy count instead of asking for each collage
        #[arg(long)]
        no_prompt: bool,

        /// Also batch images already in the input directory
        #[arg(long)]
        scan_existing: bool,
    },

    /// Build one collage from three photos
    Compose {
        #[arg(num_args = 3, required = true)]
        photos: Vec<PathBuf>,
    },

    /// Compare the template's transparent windows with the fixed layout
    CheckTemplate,
}

fn load_config(cli: &Cli) -> Result<BoothConfig, String> {
    let mut config = match &cli.config {
        Some(path) => BoothConfig::load(path).map_err(|e| e.to_string())?,
        None => BoothConfig::default(),
    };
    if let Some(dir) = &cli.input_dir {
        config.input_dir = dir.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(template) = &cli.template {
        config.template_path = template.clone();
    }
    Ok(config)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boothprint_core=info,boothprint_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(r#"{{"error": "Failed to load config: {}"}}"#, e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Watch { copies, no_prompt, scan_existing } => {
            if let Some(copies) = copies {
                config.default_copies = copies;
            }
            if no_prompt {
                config.prompt_copies = false;
            }
            config.scan_existing |= scan_existing;
            watch(config)
        }
        Commands::Compose { photos } => compose(&config, photos),
        Commands::CheckTemplate => check_template(&config),
    }
}

fn watch(config: BoothConfig) -> ExitCode {
    let interrupt = match install_interrupt_handler() {
        Ok(interrupt) => interrupt,
        Err(e) => {
            tracing::error!(error = %e, "CRITICAL ERROR");
            return ExitCode::FAILURE;
        }
    };

    let monitor = match copy_source(&config, &interrupt).and_then(|copies| Monitor::new(config, copies)) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "CRITICAL ERROR");
            return ExitCode::FAILURE;
        }
    };

    let result = monitor.run(interrupt.flag());
    // The queue is flushed on every exit path.
    let flushed = monitor.shutdown();

    match result {
        Ok(()) if flushed => ExitCode::SUCCESS,
        Ok(()) => ExitCode::from(3),
        Err(e) => {
            tracing::error!(error = %e, "CRITICAL ERROR");
            ExitCode::FAILURE
        }
    }
}

fn compose(config: &BoothConfig, photos: Vec<PathBuf>) -> ExitCode {
    let photos: [PathBuf; 3] = match photos.try_into() {
        Ok(p) => p,
        Err(_) => {
            println!(r#"{{"success": false, "error": "exactly three photos are required"}}"#);
            return ExitCode::FAILURE;
        }
    };

    let layout = CollageLayout::photo_strip();
    let renderer = load_template(&config.template_path, &layout)
        .map_err(|e| e.to_string())
        .and_then(|template| Compositor::new(template, layout).map_err(|e| e.to_string()))
        .and_then(|compositor| {
            Archive::new(&config.output_dir)
                .map(|archive| (CollageRenderer::new(compositor, archive.clone()), archive))
                .map_err(|e| e.to_string())
        });
    let (renderer, archive) = match renderer {
        Ok(r) => r,
        Err(e) => {
            println!("{}", serde_json::json!({ "success": false, "error": e }));
            return ExitCode::FAILURE;
        }
    };

    let stamp = Archive::stamp();
    let rendered = renderer.render_paths(&photos, &stamp);

    let archived: Vec<_> = photos
        .iter()
        .map(|p| match archive.archive_source(p, &stamp) {
            Ok(dest) => serde_json::json!({ "from": p, "to": dest }),
            Err(e) => serde_json::json!({ "from": p, "error": e.to_string() }),
        })
        .collect();

    match rendered {
        Ok((path, composite)) => {
            let output = serde_json::json!({
                "success": true,
                "collage": path,
                "slots": composite.slots,
                "archived": archived,
            });
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(e) => {
            let output = serde_json::json!({
                "success": false,
                "error": e.to_string(),
                "archived": archived,
            });
            println!("{}", output);
            ExitCode::from(2)
        }
    }
}

fn check_template(config: &BoothConfig) -> ExitCode {
    let template = match image::open(&config.template_path) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            println!(r#"{{"error": "Failed to load template: {}"}}"#, e);
            return ExitCode::FAILURE;
        }
    };

    let layout = CollageLayout::photo_strip();
    let detected = find_transparent_regions(&template, DEFAULT_ALPHA_THRESHOLD, DEFAULT_MIN_WINDOW_SIDE);
    let matches = detected.len() >= 3
        && detected.iter().zip(layout.regions.iter()).all(|(d, r)| d.as_region() == *r);

    let output = serde_json::json!({
        "template": config.template_path,
        "size": [template.width(), template.height()],
        "layout": layout.regions,
        "requiredSize": layout.required_size(),
        "detected": detected,
        "layoutFits": layout.check_fits(template.width(), template.height()).is_ok(),
        "layoutMatches": matches,
    });
    println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());

    if matches {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
