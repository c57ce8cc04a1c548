//! Release packaging pipeline.
//!
//! Seven stages run in a fixed order against a project root: clean, copy the
//! sources to `build/pkg`, compile there, relocate the compiled artifacts to
//! `build/stage`, strip sources and intermediates, write `package.toml`, and
//! bundle the stage into `dist/`. The first failing stage aborts the run and
//! leaves the tree as it is.

pub mod command;
mod fsops;
pub mod metadata;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::ui::Ui;
use command::{expand, run_checked};
use fsops::{copy_dir_all, is_hidden, remove_if_exists, walk_files};
use metadata::{collect_artifacts, Manifest, PackageMetadata, METADATA_FILE};

const WORK_DIR: &str = "pkg";
const STAGE_DIR: &str = "stage";

/// Editor and merge leftovers removed from the source tree by `clean`.
const LEFTOVER_SUFFIXES: &[&str] = &[".orig", ".rej", "~"];
/// Never copied into the work tree.
const SKIP_DIRS: &[&str] = &["target", "build", "dist"];
/// Removed from the stage by `strip`.
const STRIP_EXTENSIONS: &[&str] = &["rs", "d", "rmeta", "o"];
const LIB_EXTENSIONS: &[&str] = &["so", "dylib", "dll", "a", "lib", "rlib"];

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub build_dir: PathBuf,
    pub dist_dir: PathBuf,
    pub manifest: PathBuf,
    /// Copied alongside the manifest when they exist.
    pub extra_files: Vec<PathBuf>,
    pub source_dirs: Vec<PathBuf>,
    pub readme: PathBuf,
    pub compile: Vec<String>,
    /// Where `compile` leaves its output, relative to the work tree.
    pub artifact_dir: PathBuf,
    pub bundle: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("build"),
            dist_dir: PathBuf::from("dist"),
            manifest: PathBuf::from("Cargo.toml"),
            extra_files: vec![PathBuf::from("Cargo.lock"), PathBuf::from("build.rs")],
            source_dirs: vec![PathBuf::from("src")],
            readme: PathBuf::from("README.md"),
            compile: ["cargo", "build", "--release"]
                .into_iter()
                .map(String::from)
                .collect(),
            artifact_dir: PathBuf::from("target/release"),
            bundle: ["tar", "-czf", "{archive}", "-C", "{stage}", "."]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.compile.is_empty() {
            bail!("package.compile must name a command");
        }
        if self.bundle.is_empty() {
            bail!("package.bundle must name a command");
        }
        if self.source_dirs.is_empty() {
            bail!("package.source_dirs must list at least one directory");
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Clean,
    CopySource,
    Compile,
    Relocate,
    Strip,
    WriteMetadata,
    Bundle,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Clean,
        Stage::CopySource,
        Stage::Compile,
        Stage::Relocate,
        Stage::Strip,
        Stage::WriteMetadata,
        Stage::Bundle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Clean => "clean",
            Stage::CopySource => "copy_source",
            Stage::Compile => "compile",
            Stage::Relocate => "relocate",
            Stage::Strip => "strip",
            Stage::WriteMetadata => "write_metadata",
            Stage::Bundle => "bundle",
        }
    }
}

/// Absolute directories used by one pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub build: PathBuf,
    pub work: PathBuf,
    pub stage: PathBuf,
    pub dist: PathBuf,
}

#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub stage_dir: PathBuf,
    pub archive: PathBuf,
    pub metadata: PackageMetadata,
}

pub struct Pipeline {
    root: PathBuf,
    config: PipelineConfig,
    layout: Layout,
}

impl Pipeline {
    pub fn new(root: impl Into<PathBuf>, config: PipelineConfig) -> Self {
        let root = root.into();
        let build = root.join(&config.build_dir);
        let layout = Layout {
            work: build.join(WORK_DIR),
            stage: build.join(STAGE_DIR),
            dist: root.join(&config.dist_dir),
            build,
        };
        Self {
            root,
            config,
            layout,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Run every stage in order.
    pub fn run(&self, ui: &Ui) -> Result<PipelineOutput> {
        self.config.validate()?;
        log::info!("packaging {}", self.root.display());
        let total = Stage::ALL.len();

        let removed = run_stage(ui, Stage::Clean, total, || self.clean())?;
        log::debug!("clean removed {} leftovers", removed);
        run_stage(ui, Stage::CopySource, total, || self.copy_source())?;
        run_stage(ui, Stage::Compile, total, || self.compile())?;
        run_stage(ui, Stage::Relocate, total, || self.relocate())?;
        run_stage(ui, Stage::Strip, total, || self.strip())?;
        let metadata = run_stage(ui, Stage::WriteMetadata, total, || self.write_metadata())?;
        let archive = run_stage(ui, Stage::Bundle, total, || self.bundle(&metadata))?;

        Ok(PipelineOutput {
            stage_dir: self.layout.stage.clone(),
            archive,
            metadata,
        })
    }

    /// Remove `build/` and `dist/` plus leftover files in the sources.
    /// Returns the number of leftovers removed.
    pub fn clean(&self) -> Result<usize> {
        remove_if_exists(&self.layout.build)?;
        remove_if_exists(&self.layout.dist)?;

        let mut removed = 0;
        for dir in &self.config.source_dirs {
            let dir = self.root.join(dir);
            if !dir.is_dir() {
                continue;
            }
            for file in walk_files(&dir)? {
                if is_leftover(&file) {
                    log::debug!("removing leftover {}", file.display());
                    remove_if_exists(&file)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Copy the manifest, the extra files and the source directories into
    /// the work tree. Returns the number of files copied.
    pub fn copy_source(&self) -> Result<u64> {
        let work = &self.layout.work;
        fs::create_dir_all(work).with_context(|| format!("failed to create {}", work.display()))?;

        let manifest = self.root.join(&self.config.manifest);
        if !manifest.is_file() {
            bail!("manifest not found: {}", manifest.display());
        }
        let mut copied = 0;
        let mut files = vec![&self.config.manifest];
        files.extend(self.config.extra_files.iter());
        for rel in files {
            let src = self.root.join(rel);
            if !src.is_file() {
                continue;
            }
            let dst = work.join(rel);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::copy(&src, &dst)
                .with_context(|| format!("failed to copy {}", src.display()))?;
            copied += 1;
        }

        let skip = |path: &Path| {
            is_hidden(path)
                || (path.is_dir()
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| SKIP_DIRS.contains(&name)))
        };
        for rel in &self.config.source_dirs {
            let src = self.root.join(rel);
            if !src.is_dir() {
                bail!("source directory not found: {}", src.display());
            }
            copied += copy_dir_all(&src, &work.join(rel), &skip)?;
        }
        Ok(copied)
    }

    /// Run the compile command inside the work tree.
    pub fn compile(&self) -> Result<()> {
        let vars = [
            ("work", self.layout.work.display().to_string()),
            ("target", metadata::target_triple()),
        ];
        run_checked(&expand(&self.config.compile, &vars), &self.layout.work)
    }

    /// Copy the top-level files of the artifact directory into
    /// `stage/lib` (libraries) or `stage/bin` (everything else).
    pub fn relocate(&self) -> Result<usize> {
        let artifacts = self.layout.work.join(&self.config.artifact_dir);
        if !artifacts.is_dir() {
            bail!(
                "artifact directory not found after compile: {}",
                artifacts.display()
            );
        }
        let mut entries = fs::read_dir(&artifacts)
            .with_context(|| format!("failed to read {}", artifacts.display()))?
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("failed to list {}", artifacts.display()))?;
        entries.sort_by_key(|entry| entry.file_name());

        let mut moved = 0;
        for entry in entries {
            let path = entry.path();
            if !entry
                .file_type()
                .with_context(|| format!("failed to stat {}", path.display()))?
                .is_file()
            {
                continue;
            }
            let subdir = if has_extension(&path, LIB_EXTENSIONS) {
                "lib"
            } else {
                "bin"
            };
            let dst_dir = self.layout.stage.join(subdir);
            fs::create_dir_all(&dst_dir)
                .with_context(|| format!("failed to create {}", dst_dir.display()))?;
            let dst = dst_dir.join(entry.file_name());
            fs::copy(&path, &dst).with_context(|| {
                format!("failed to copy {} to {}", path.display(), dst.display())
            })?;
            moved += 1;
        }
        Ok(moved)
    }

    /// Delete sources, intermediates and hidden files from the stage, then
    /// the work tree. Returns the number of staged files removed.
    pub fn strip(&self) -> Result<usize> {
        let mut removed = 0;
        if self.layout.stage.is_dir() {
            for file in walk_files(&self.layout.stage)? {
                if is_hidden(&file) || has_extension(&file, STRIP_EXTENSIONS) {
                    log::debug!("stripping {}", file.display());
                    remove_if_exists(&file)?;
                    removed += 1;
                }
            }
        }
        remove_if_exists(&self.layout.work)?;
        Ok(removed)
    }

    /// Write `package.toml` describing the stage, copying the README in.
    pub fn write_metadata(&self) -> Result<PackageMetadata> {
        let manifest = Manifest::read(&self.root.join(&self.config.manifest))?;
        fs::create_dir_all(&self.layout.stage)
            .with_context(|| format!("failed to create {}", self.layout.stage.display()))?;

        let readme_src = self.root.join(&self.config.readme);
        let readme = match readme_src.file_name().and_then(|name| name.to_str()) {
            Some(name) if readme_src.is_file() => {
                let dst = self.layout.stage.join(name);
                fs::copy(&readme_src, &dst)
                    .with_context(|| format!("failed to copy {}", readme_src.display()))?;
                Some(name.to_string())
            }
            _ => None,
        };

        let skip: Vec<&str> = readme.iter().map(String::as_str).collect();
        let artifacts = collect_artifacts(&self.layout.stage, &skip)?;
        if artifacts.is_empty() {
            bail!("no artifacts staged in {}", self.layout.stage.display());
        }

        let metadata = PackageMetadata::new(manifest, readme, artifacts);
        metadata.write(&self.layout.stage.join(METADATA_FILE))?;
        Ok(metadata)
    }

    /// Run the bundle command from the build directory. The command must
    /// create the archive.
    pub fn bundle(&self, metadata: &PackageMetadata) -> Result<PathBuf> {
        let dist = &self.layout.dist;
        fs::create_dir_all(dist).with_context(|| format!("failed to create {}", dist.display()))?;
        let archive = dist.join(metadata.archive_name());

        let vars = [
            ("archive", archive.display().to_string()),
            ("stage", self.layout.stage.display().to_string()),
            ("dist", dist.display().to_string()),
            ("name", metadata.package.name.clone()),
            ("version", metadata.package.version.clone()),
            ("target", metadata.package.target.clone()),
        ];
        run_checked(&expand(&self.config.bundle, &vars), &self.layout.build)?;
        if !archive.is_file() {
            bail!(
                "bundle command finished but {} was not created",
                archive.display()
            );
        }
        Ok(archive)
    }
}

fn run_stage<T: StageSummary>(
    ui: &Ui,
    stage: Stage,
    total: usize,
    body: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let step = Stage::ALL.iter().position(|s| *s == stage).unwrap_or(0) + 1;
    let guard = ui.stage(step, total, stage.name());
    let value = body().with_context(|| format!("stage {} failed", stage.name()))?;
    guard.finish(value.summary());
    Ok(value)
}

trait StageSummary {
    fn summary(&self) -> Option<String>;
}

impl StageSummary for () {
    fn summary(&self) -> Option<String> {
        None
    }
}

impl StageSummary for usize {
    fn summary(&self) -> Option<String> {
        Some(format!("{self} files"))
    }
}

impl StageSummary for u64 {
    fn summary(&self) -> Option<String> {
        Some(format!("{self} files"))
    }
}

impl StageSummary for PackageMetadata {
    fn summary(&self) -> Option<String> {
        Some(format!("{} artifacts", self.artifacts.len()))
    }
}

impl StageSummary for PathBuf {
    fn summary(&self) -> Option<String> {
        Some(self.display().to_string())
    }
}

fn is_leftover(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| LEFTOVER_SUFFIXES.iter().any(|s| name.ends_with(s)))
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}
