use clap::{Parser, Subcommand};
use static_export::{config, export, manifest, output, paths, progress, render};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup — trivial, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "static-export")]
#[command(about = "One-shot static export of a prebuilt site")]
#[command(long_about = "\
One-shot static export of a prebuilt site

Reads the manifests a prior build wrote into the build directory, renders
every exportable path to plain HTML and data files, and lays the result out
as a directly servable tree.

Build directory layout:

  .next-build/
  ├── BUILD_ID                     # Opaque build identifier
  ├── pages-manifest.json          # page path → render bundle locator
  ├── prerender-manifest.json     # Routes already rendered at build time
  ├── routes-manifest.json        # Routing features (locale routing is fatal)
  ├── export-marker.json          # Build-time export settings
  ├── static/                      # Immutable assets → out/_next/static/
  └── server/pages/                # Prerendered .html/.json pairs

Run 'static-export gen-config' to generate a documented export.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Build directory produced by the build step
    #[arg(long, default_value = ".next-build", global = true)]
    build_dir: PathBuf,

    /// Destination directory for the exported site
    #[arg(long, default_value = "out", global = true)]
    out_dir: PathBuf,

    /// Project-level static assets copied verbatim to the destination root
    #[arg(long, default_value = "public", global = true)]
    public_dir: PathBuf,

    /// Config file
    #[arg(long, default_value = "export.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Flag overrides for the export run. Flags win over export.toml.
#[derive(clap::Args, Clone)]
struct RunArgs {
    /// Render worker count (defaults to config, then CPU cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Per-path render deadline in milliseconds (0 disables)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Emit directory/index.html instead of flat .html files
    #[arg(long)]
    trailing_slash: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full export pipeline
    Export(RunArgs),
    /// Show which paths an export would render, without rendering
    Resolve,
    /// Print a stock export.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Export(ref run_args) => {
            let cfg = config::load_config(&cli.config)?;
            let options = export_options(&cli, &cfg, run_args);

            let pages = manifest::PagesManifest::load(&cli.build_dir)?;
            let renderer = render::BundleRenderer::new(&cli.build_dir, pages.0.clone());

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    output::print_progress_event(&event);
                }
            });

            let coordinator = export::ExportCoordinator::new(
                options,
                Arc::new(renderer),
                progress::ProgressReporter::new(Some(tx)),
            );
            let result = coordinator.run(None);
            // The reporter's sender lives inside the coordinator; drop it so
            // the printer loop terminates.
            drop(coordinator);
            printer.join().unwrap();

            let report = result?;
            output::print_report(&report);
        }
        Command::Resolve => {
            let pages = manifest::PagesManifest::load(&cli.build_dir)?;
            let prerender = manifest::PrerenderManifest::load(&cli.build_dir)?;
            let resolution = paths::resolve(&pages, &prerender, None, true)?;
            output::print_resolution(&resolution);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Merge config-file settings with CLI flag overrides into run options.
/// Borrows the parsed CLI; the subcommand payload stays in place.
fn export_options(
    cli: &Cli,
    cfg: &config::ExportConfig,
    run_args: &RunArgs,
) -> export::ExportOptions {
    let pool_size = run_args
        .threads
        .unwrap_or_else(|| config::effective_pool_size(&cfg.workers));
    let timeout_ms = run_args.timeout_ms.unwrap_or(cfg.workers.timeout_ms);

    export::ExportOptions {
        build_dir: cli.build_dir.clone(),
        out_dir: cli.out_dir.clone(),
        public_dir: cli.public_dir.clone(),
        trailing_slash: run_args.trailing_slash || cfg.export.trailing_slash,
        variant_tag: cfg.export.variant_tag.clone(),
        pool_size,
        timeout: Duration::from_millis(timeout_ms),
        max_restarts: cfg.workers.max_restarts,
        exclude_api_pages: true,
    }
}
