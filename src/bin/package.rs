//! package - build a release archive of a cargo project
//!
//! Runs clean → copy_source → compile → relocate → strip → write_metadata →
//! bundle against the project directory. The stage tree is left in
//! `build/stage` and the archive in `dist/`.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use yolo_det::config::AppConfig;
use yolo_det::ui::Ui;
use yolo_det::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "package", about = "Compile, strip and bundle a cargo project")]
struct Args {
    /// Project root containing Cargo.toml
    #[arg(long, default_value = ".", value_name = "DIR")]
    project_dir: PathBuf,

    /// Pipeline config (TOML with a [package] table); defaults to $YOLO_DET_CONFIG
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = match &args.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::load()?,
    };

    let output = Pipeline::new(&args.project_dir, cfg.package).run(&ui)?;

    println!(
        "package: {} {} ({})",
        output.metadata.package.name,
        output.metadata.package.version,
        output.metadata.package.target
    );
    for artifact in &output.metadata.artifacts {
        let short = artifact.sha256.get(..12).unwrap_or(&artifact.sha256);
        println!("  {:>10}  {}  {}", artifact.size, short, artifact.path);
    }
    println!("stage:   {}", output.stage_dir.display());
    println!("archive: {}", output.archive.display());
    Ok(())
}
