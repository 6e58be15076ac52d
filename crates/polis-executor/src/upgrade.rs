//! Verified execution of upgrade packages.
//!
//! The runtime fetches the package, checks its BLAKE3 hash against the
//! ratified value and only then hands it to a sandbox together with a copy
//! of the state. The sandbox sees nothing but the package bytes, the
//! snapshot and the request; it has no filesystem, network or clock.

use crate::error::{Error, Result};
use async_trait::async_trait;
use polis_crdt::{CommandId, ConfigRecord, ConfigUpdate, GlobalState, Timestamp, UpgradeRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// What a ratified `execute_upgrade` command asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub package_ref: String,
    pub expected_hash: String,
    pub version: String,
    pub command_id: CommandId,
    /// Deterministic timestamp for anything the upgrade records.
    pub applied_at: Timestamp,
}

/// The verified-execution contract.
#[async_trait]
pub trait UpgradeRuntime: Send + Sync {
    /// Fetch, verify and run a package against `snapshot`, returning the
    /// transformed state.
    async fn verify_and_run(&self, request: &UpgradeRequest, snapshot: GlobalState) -> Result<GlobalState>;
}

#[async_trait]
impl<R: UpgradeRuntime + ?Sized> UpgradeRuntime for std::sync::Arc<R> {
    async fn verify_and_run(&self, request: &UpgradeRequest, snapshot: GlobalState) -> Result<GlobalState> {
        (**self).verify_and_run(request, snapshot).await
    }
}

/// Where package bytes come from.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn fetch(&self, package_ref: &str) -> Result<Vec<u8>>;
}

/// Deterministic interpreter for verified packages.
pub trait Sandbox: Send + Sync {
    fn run(&self, package: &[u8], snapshot: GlobalState, request: &UpgradeRequest) -> Result<GlobalState>;
}

/// Hash check in front of a sandbox.
pub struct VerifiedRuntime<S, B> {
    source: S,
    sandbox: B,
}

impl<S: PackageSource, B: Sandbox> VerifiedRuntime<S, B> {
    pub fn new(source: S, sandbox: B) -> Self {
        Self { source, sandbox }
    }
}

/// Hex BLAKE3 of package bytes.
pub fn package_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[async_trait]
impl<S: PackageSource, B: Sandbox> UpgradeRuntime for VerifiedRuntime<S, B> {
    async fn verify_and_run(&self, request: &UpgradeRequest, snapshot: GlobalState) -> Result<GlobalState> {
        let bytes = self.source.fetch(&request.package_ref).await?;
        let actual = package_hash(&bytes);
        if !actual.eq_ignore_ascii_case(&request.expected_hash) {
            return Err(Error::HashMismatch {
                expected: request.expected_hash.clone(),
                actual,
            });
        }
        debug!("package {} verified ({} bytes)", request.package_ref, bytes.len());
        self.sandbox.run(&bytes, snapshot, request)
    }
}

/// Packages stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, package_ref: &str) -> Result<PathBuf> {
        let relative = Path::new(package_ref);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if package_ref.is_empty() || !plain {
            return Err(Error::PackageNotFound(package_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl PackageSource for DirectorySource {
    async fn fetch(&self, package_ref: &str) -> Result<Vec<u8>> {
        let path = self.resolve(package_ref)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::PackageNotFound(package_ref.to_string()),
            _ => Error::Io(e.to_string()),
        })
    }
}

/// Packages held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    packages: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, package_ref: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.packages.insert(package_ref.into(), bytes.into());
        self
    }
}

#[async_trait]
impl PackageSource for MemorySource {
    async fn fetch(&self, package_ref: &str) -> Result<Vec<u8>> {
        self.packages
            .get(package_ref)
            .cloned()
            .ok_or_else(|| Error::PackageNotFound(package_ref.to_string()))
    }
}

/// Declarative upgrade package: a protocol version bump plus parameter
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpgradeManifest {
    pub version: String,
    #[serde(default)]
    pub config: Vec<ConfigUpdate>,
}

/// Sandbox that interprets [`UpgradeManifest`] packages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestSandbox;

impl Sandbox for ManifestSandbox {
    fn run(&self, package: &[u8], mut snapshot: GlobalState, request: &UpgradeRequest) -> Result<GlobalState> {
        let manifest: UpgradeManifest =
            serde_json::from_slice(package).map_err(|e| Error::Sandbox(format!("bad manifest: {}", e)))?;
        if manifest.version != request.version {
            return Err(Error::Sandbox(format!(
                "manifest is version {}, command expects {}",
                manifest.version, request.version
            )));
        }
        if snapshot.upgrades.contains_key(&manifest.version) {
            return Err(Error::Sandbox(format!("version {} already applied", manifest.version)));
        }

        for (i, update) in manifest.config.iter().enumerate() {
            snapshot.add_config_record(ConfigRecord {
                applied_at: request.applied_at,
                id: format!("upgrade:{}:{}", manifest.version, i),
                update: update.clone(),
            });
        }
        snapshot.add_upgrade(UpgradeRecord {
            applied_at: request.applied_at,
            version: manifest.version.clone(),
            package_hash: request.expected_hash.to_lowercase(),
            command_id: request.command_id.clone(),
        });
        info!(
            "upgrade {} applied with {} parameter overrides",
            manifest.version,
            manifest.config.len()
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{"version":"1.1.0","config":[{"key":"tax_rate_bps","value":250}]}"#;

    fn request(hash: String) -> UpgradeRequest {
        UpgradeRequest {
            package_ref: "v1.1.0.json".into(),
            expected_hash: hash,
            version: "1.1.0".into(),
            command_id: "cmd-1".into(),
            applied_at: 77,
        }
    }

    #[tokio::test]
    async fn verified_manifest_applies() {
        let runtime = VerifiedRuntime::new(
            MemorySource::new().with_package("v1.1.0.json", MANIFEST),
            ManifestSandbox,
        );
        let out = runtime
            .verify_and_run(&request(package_hash(MANIFEST.as_bytes())), GlobalState::new())
            .await
            .unwrap();
        let config = out.config();
        assert_eq!(config.protocol_version, "1.1.0");
        assert_eq!(config.tax_rate_bps, 250);
    }

    #[tokio::test]
    async fn hash_mismatch_is_refused() {
        let runtime = VerifiedRuntime::new(
            MemorySource::new().with_package("v1.1.0.json", MANIFEST),
            ManifestSandbox,
        );
        let err = runtime
            .verify_and_run(&request(package_hash(b"something else")), GlobalState::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn directory_source_reads_files_and_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("v1.1.0.json"), MANIFEST).unwrap();
        let source = DirectorySource::new(dir.path());

        assert_eq!(source.fetch("v1.1.0.json").await.unwrap(), MANIFEST.as_bytes());
        assert!(matches!(
            source.fetch("../etc/passwd").await,
            Err(Error::PackageNotFound(_))
        ));
        assert!(matches!(
            source.fetch("missing.json").await,
            Err(Error::PackageNotFound(_))
        ));
    }

    #[test]
    fn sandbox_rejects_version_mismatch_and_replay() {
        let sandbox = ManifestSandbox;
        let mut req = request(package_hash(MANIFEST.as_bytes()));
        req.version = "2.0.0".into();
        assert!(matches!(
            sandbox.run(MANIFEST.as_bytes(), GlobalState::new(), &req),
            Err(Error::Sandbox(_))
        ));

        let req = request(package_hash(MANIFEST.as_bytes()));
        let once = sandbox.run(MANIFEST.as_bytes(), GlobalState::new(), &req).unwrap();
        assert!(sandbox.run(MANIFEST.as_bytes(), once, &req).is_err());
    }
}
