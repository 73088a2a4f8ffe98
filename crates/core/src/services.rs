//! Read-only collaborator services consumed while validating and lowering a graph.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::{json_abi::JsonAbi, primitives::Address};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Byte range of an unlinked library address inside bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReference {
    pub start: usize,
    pub length: usize,
}

/// Source name -> library name -> placeholder offsets.
pub type LinkReferences = BTreeMap<String, BTreeMap<String, Vec<LinkReference>>>;

/// A compiled contract artifact in the hardhat layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    #[serde(default)]
    pub source_name: String,
    pub abi: JsonAbi,
    /// Creation bytecode. Kept as text because unlinked bytecode is not valid hex.
    pub bytecode: String,
    #[serde(default)]
    pub link_references: LinkReferences,
}

impl Artifact {
    /// Whether the artifact carries deployable bytecode.
    pub fn has_bytecode(&self) -> bool {
        let code = self.bytecode.trim_start_matches("0x");
        !code.is_empty()
    }

    /// Names of every library this artifact must be linked against.
    pub fn required_libraries(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .link_references
            .values()
            .flat_map(|libs| libs.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Artifact lookup by contract name.
pub trait ArtifactSource {
    fn has_artifact(&self, name: &str) -> bool;

    fn get_artifact(&self, name: &str) -> Result<Artifact>;
}

impl ArtifactSource for BTreeMap<String, Artifact> {
    fn has_artifact(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn get_artifact(&self, name: &str) -> Result<Artifact> {
        self.get(name)
            .cloned()
            .with_context(|| format!("Artifact not found: {}", name))
    }
}

/// Account and address queries against the target chain.
pub trait ChainAccounts {
    fn accounts(&self) -> Vec<Address>;

    fn is_valid_address(&self, address: &str) -> bool {
        is_valid_address(address)
    }

    fn has_signer(&self, address: &Address) -> bool {
        self.accounts().contains(address)
    }

    /// The account used when a declaration does not name a sender.
    fn default_sender(&self) -> Option<Address> {
        self.accounts().first().copied()
    }
}

/// A fixed list of unlocked accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAccounts(pub Vec<Address>);

impl ChainAccounts for StaticAccounts {
    fn accounts(&self) -> Vec<Address> {
        self.0.clone()
    }
}

/// The services handed to validators and the transformer.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub artifacts: &'a dyn ArtifactSource,
    pub chain: &'a dyn ChainAccounts,
}

/// Syntactic address check.
///
/// Accepts 40 hex digits with an optional `0x` prefix. Mixed-case input must carry
/// a valid EIP-55 checksum; all-lowercase and all-uppercase input is accepted as is.
pub fn is_valid_address(address: &str) -> bool {
    let digits = address.strip_prefix("0x").unwrap_or(address);
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }

    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Address::parse_checksummed(format!("0x{}", digits), None).is_ok();
    }

    true
}

/// Parse an address that already passed [`is_valid_address`].
pub fn parse_address(address: &str) -> Option<Address> {
    if !is_valid_address(address) {
        return None;
    }
    let digits = address.strip_prefix("0x").unwrap_or(address);
    format!("0x{}", digits).parse().ok()
}

/// Artifacts read from a directory of hardhat artifact JSON files.
///
/// The directory is indexed once by file stem; `*.dbg.json` debug files are skipped.
#[derive(Debug, Clone)]
pub struct ArtifactDirectory {
    root: PathBuf,
    index: BTreeMap<String, PathBuf>,
}

impl ArtifactDirectory {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            anyhow::bail!("Artifacts directory not found: {}", root.display());
        }

        let mut index = BTreeMap::new();
        Self::index_dir(&root, &mut index)?;

        tracing::debug!(
            root = %root.display(),
            artifacts = index.len(),
            "Indexed artifacts directory"
        );

        Ok(Self { root, index })
    }

    fn index_dir(dir: &Path, index: &mut BTreeMap<String, PathBuf>) -> Result<()> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;

        for entry in entries {
            let path = entry.context("Failed to read directory entry")?.path();
            if path.is_dir() {
                Self::index_dir(&path, index)?;
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.ends_with(".dbg.json") {
                continue;
            }
            if let Some(name) = file_name.strip_suffix(".json") {
                index.entry(name.to_string()).or_insert(path.clone());
            }
        }

        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }
}

impl ArtifactSource for ArtifactDirectory {
    fn has_artifact(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn get_artifact(&self, name: &str) -> Result<Artifact> {
        let path = self
            .index
            .get(name)
            .with_context(|| format!("Artifact not found: {}", name))?;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))
    }
}
