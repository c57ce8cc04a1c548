//! Package metadata written next to the staged artifacts.

use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::fsops::walk_files;

pub const METADATA_FILE: &str = "package.toml";

/// The `[package]` fields read from a Cargo manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub license: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    package: Option<ManifestPackage>,
}

#[derive(Debug, Deserialize)]
struct ManifestPackage {
    name: Option<String>,
    version: Option<toml::Value>,
    description: Option<String>,
    license: Option<String>,
}

impl Manifest {
    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid manifest {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let file: ManifestFile = toml::from_str(raw)?;
        let package = file
            .package
            .ok_or_else(|| anyhow!("missing [package] table"))?;
        let name = package
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| anyhow!("missing package.name"))?;
        // `version.workspace = true` and friends are not resolved here.
        let version = match package.version {
            Some(toml::Value::String(version)) => version,
            Some(_) => return Err(anyhow!("package.version must be a literal string")),
            None => "0.0.0".to_string(),
        };
        Ok(Self {
            name,
            version,
            description: package.description,
            license: package.license,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub package: PackageInfo,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    pub target: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Path relative to the stage root, `/`-separated.
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

impl PackageMetadata {
    pub fn new(manifest: Manifest, readme: Option<String>, artifacts: Vec<Artifact>) -> Self {
        Self {
            package: PackageInfo {
                name: manifest.name,
                version: manifest.version,
                description: manifest.description,
                license: manifest.license,
                readme,
                target: target_triple(),
            },
            artifacts,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self).context("failed to encode package metadata")?;
        fs::write(path, raw).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid package metadata {}", path.display()))
    }

    /// `<name>-<version>-<target>.tar.gz`
    pub fn archive_name(&self) -> String {
        format!(
            "{}-{}-{}.tar.gz",
            self.package.name, self.package.version, self.package.target
        )
    }
}

/// `<arch>-<os>` of the host, e.g. `x86_64-linux`.
pub fn target_triple() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

/// Every file under `stage`, except the metadata file itself and `skip`,
/// with its size and digest. Sorted by path.
pub fn collect_artifacts(stage: &Path, skip: &[&str]) -> Result<Vec<Artifact>> {
    let mut artifacts = Vec::new();
    for file in walk_files(stage)? {
        let rel = file
            .strip_prefix(stage)
            .with_context(|| format!("{} is outside {}", file.display(), stage.display()))?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rel == METADATA_FILE || skip.contains(&rel.as_str()) {
            continue;
        }
        let (size, sha256) = digest_file(&file)?;
        artifacts.push(Artifact {
            path: rel,
            size,
            sha256,
        });
    }
    artifacts.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(artifacts)
}

fn digest_file(path: &Path) -> Result<(u64, String)> {
    let mut file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_package_table() {
        let manifest = Manifest::parse(
            r#"
            [package]
            name = "demo"
            version = "1.2.3"
            license = "MIT"

            [dependencies]
            anyhow = "1"
            "#,
        )
        .unwrap();
        assert_eq!(manifest.name, "demo");
        assert_eq!(manifest.version, "1.2.3");
        assert_eq!(manifest.license.as_deref(), Some("MIT"));
        assert_eq!(manifest.description, None);
    }

    #[test]
    fn rejects_manifest_without_package() {
        assert!(Manifest::parse("[workspace]\nmembers = []\n").is_err());
        assert!(Manifest::parse("[package]\nversion = \"1.0.0\"\n").is_err());
        assert!(Manifest::parse("[package]\nname = \"x\"\nversion.workspace = true\n").is_err());
    }

    #[test]
    fn artifacts_are_sorted_and_hashed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("lib/libdemo.so"), b"lib").unwrap();
        fs::write(dir.path().join("bin/demo"), b"").unwrap();
        fs::write(dir.path().join("README.md"), b"readme").unwrap();
        fs::write(dir.path().join(METADATA_FILE), b"old").unwrap();

        let artifacts = collect_artifacts(dir.path(), &["README.md"]).unwrap();
        let paths: Vec<&str> = artifacts.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["bin/demo", "lib/libdemo.so"]);
        assert_eq!(artifacts[0].size, 0);
        assert_eq!(
            artifacts[0].sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(artifacts[1].size, 3);
    }

    #[test]
    fn metadata_survives_a_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest {
            name: "demo".into(),
            version: "0.1.0".into(),
            description: None,
            license: Some("MIT".into()),
        };
        let meta = PackageMetadata::new(
            manifest,
            None,
            vec![Artifact {
                path: "bin/demo".into(),
                size: 1,
                sha256: "00".into(),
            }],
        );
        let path = dir.path().join(METADATA_FILE);
        meta.write(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("[[artifacts]]"));
        assert!(!raw.contains("description"));
        assert_eq!(PackageMetadata::read(&path).unwrap(), meta);
        assert!(meta.archive_name().starts_with("demo-0.1.0-"));
        assert!(meta.archive_name().ends_with(".tar.gz"));
    }
}
