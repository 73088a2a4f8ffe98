//! Append-only JSON-lines journal of a deployment run.
//!
//! The first line describes the execution graph; every following line is one
//! applied [`DeployStateCommand`].

use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::{
    graph::VertexId,
    transform::{ExecutionGraph, StepKind},
};

use super::{DeployState, DeployStateCommand};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderVertex {
    pub id: VertexId,
    pub label: String,
    pub step: StepKind,
    pub dependencies: Vec<VertexId>,
}

/// What a run was started against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphHeader {
    pub module_id: String,
    /// SHA-256 of the serialized execution graph.
    pub graph_hash: String,
    pub vertices: Vec<HeaderVertex>,
    pub outputs: BTreeMap<String, VertexId>,
}

impl GraphHeader {
    pub fn from_graph(graph: &ExecutionGraph) -> Result<Self> {
        Ok(Self {
            module_id: graph.module_id.clone(),
            graph_hash: graph.compute_hash()?,
            vertices: graph
                .vertices
                .values()
                .map(|v| HeaderVertex {
                    id: v.id,
                    label: v.label.clone(),
                    step: v.step(),
                    dependencies: v.dependencies.clone(),
                })
                .collect(),
            outputs: graph.outputs.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", content = "data", rename_all = "lowercase")]
enum JournalRecord {
    Header(GraphHeader),
    Command(DeployStateCommand),
}

/// Writer for a journal file.
#[derive(Debug)]
pub struct DeployJournal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl DeployJournal {
    /// Start a new journal, replacing any existing file.
    pub fn create(path: impl AsRef<Path>, header: &GraphHeader) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create journal directory: {}", parent.display())
            })?;
        }

        let file = File::create(path)
            .with_context(|| format!("Failed to create journal: {}", path.display()))?;
        let mut journal = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        };
        journal.write(&JournalRecord::Header(header.clone()))?;

        tracing::debug!(path = %path.display(), graph_hash = %header.graph_hash, "Created deployment journal");
        Ok(journal)
    }

    /// Read a journal back: its header and every recorded command.
    ///
    /// A malformed final line is a record torn by a crash while it was being
    /// written; it is dropped. Malformed records anywhere else are errors.
    pub fn read(path: impl AsRef<Path>) -> Result<(GraphHeader, Vec<DeployStateCommand>)> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;

        let mut lines = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read journal: {}", path.display()))?;
            if !line.trim().is_empty() {
                lines.push((index + 1, line));
            }
        }

        let mut header = None;
        let mut commands = Vec::new();
        let last = lines.len();
        for (position, (number, line)) in lines.iter().enumerate() {
            let record: JournalRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(err) if position + 1 == last && header.is_some() => {
                    tracing::warn!(
                        path = %path.display(),
                        line = number,
                        %err,
                        "Dropping torn final journal record"
                    );
                    break;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("Malformed journal record at {}:{}", path.display(), number)
                    });
                }
            };
            match (record, header.is_some()) {
                (JournalRecord::Header(h), false) => header = Some(h),
                (JournalRecord::Command(c), true) => commands.push(c),
                (JournalRecord::Header(_), true) => {
                    bail!("Duplicate journal header at {}:{}", path.display(), number)
                }
                (JournalRecord::Command(_), false) => {
                    bail!("Journal {} does not start with a header", path.display())
                }
            }
        }

        let header = header.with_context(|| format!("Journal is empty: {}", path.display()))?;
        Ok((header, commands))
    }

    /// Reopen an existing journal for another attempt at the same graph.
    ///
    /// The file is rewritten to hold only the commands the resumed state keeps.
    /// The new contents go to a sibling file that replaces the journal only once
    /// fully written, so a crash leaves either the old or the new journal.
    pub fn resume(path: impl AsRef<Path>, header: &GraphHeader) -> Result<(Self, DeployState)> {
        let path = path.as_ref();
        let (recorded, commands) = Self::read(path)?;
        if recorded.graph_hash != header.graph_hash {
            bail!(
                "Journal {} was written for a different deployment graph (hash {}, expected {})",
                path.display(),
                recorded.graph_hash,
                header.graph_hash
            );
        }

        let state = DeployState::resume(header, &commands);

        let rewrite = Self::rewrite_path(path);
        let mut journal = Self::create(&rewrite, header)?;
        for command in state.history() {
            journal.append(command)?;
        }
        journal.sync()?;
        drop(journal);

        std::fs::rename(&rewrite, path).with_context(|| {
            format!("Failed to replace journal {} with {}", path.display(), rewrite.display())
        })?;
        let journal = Self::open_append(path)?;

        tracing::info!(
            path = %path.display(),
            recorded = commands.len(),
            kept = state.history().len(),
            "Resumed deployment journal"
        );
        Ok((journal, state))
    }

    /// Resume `path` if it exists, otherwise start a fresh journal.
    pub fn open_or_create(path: impl AsRef<Path>, header: &GraphHeader) -> Result<(Self, DeployState)> {
        let path = path.as_ref();
        if path.exists() {
            Self::resume(path, header)
        } else {
            Ok((Self::create(path, header)?, DeployState::new(header)))
        }
    }

    fn rewrite_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".rewrite");
        path.with_file_name(name)
    }

    /// Append to an existing journal without checking or rewriting it.
    fn open_append(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, command: &DeployStateCommand) -> Result<()> {
        self.write(&JournalRecord::Command(command.clone()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered records and force them to disk.
    fn sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .and_then(|_| self.writer.get_ref().sync_all())
            .with_context(|| format!("Failed to sync journal: {}", self.path.display()))
    }

    fn write(&mut self, record: &JournalRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to serialize journal record")?;
        writeln!(self.writer, "{}", line)
            .and_then(|_| self.writer.flush())
            .with_context(|| format!("Failed to write journal: {}", self.path.display()))
    }
}
