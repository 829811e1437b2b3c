use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sha2::{Digest, Sha256};
use similar::TextDiff;
use tracing::{debug, info, warn};

use crate::config::{CmdrefConfig, TargetAssignment};
use crate::format::build_section_blocks;
use crate::runtime::{ResolvedPaths, normalize_for_display};
use crate::sections::parse_sections;
use crate::splice::{SectionSplice, splice_document};

#[derive(Debug, Clone)]
pub struct LoadedTarget {
    pub assignment: TargetAssignment,
    pub path: PathBuf,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct SyncInputs {
    pub master_path: PathBuf,
    pub master_text: String,
    pub targets: Vec<LoadedTarget>,
    pub missing_targets: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DocumentPlan {
    pub assignment: TargetAssignment,
    pub path: PathBuf,
    pub original: String,
    pub updated: String,
    pub sections: Vec<SectionSplice>,
}

impl DocumentPlan {
    pub fn changed(&self) -> bool {
        self.original != self.updated
    }

    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }

    pub fn unified_diff(&self) -> String {
        let name = self.file_name();
        TextDiff::from_lines(&self.original, &self.updated)
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{name}"), &format!("b/{name}"))
            .to_string()
    }
}

/// Every target planned in memory. Nothing has been written yet.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub master_path: PathBuf,
    pub section_count: usize,
    pub block_count: usize,
    /// Sections present in the master that no target claims.
    pub unassigned: Vec<u32>,
    pub missing_targets: Vec<PathBuf>,
    pub documents: Vec<DocumentPlan>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub file: String,
    pub path: String,
    pub first: u32,
    pub last: u32,
    pub changed: bool,
    pub written: bool,
    pub before_hash: String,
    pub after_hash: String,
    pub sections: Vec<SectionSplice>,
}

impl DocumentReport {
    pub fn summary(&self) -> String {
        match (self.changed, self.written) {
            (true, true) => format!("Updated {}", self.file),
            (true, false) => format!("Would update {}", self.file),
            (false, _) => format!("No changes for {}", self.file),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub master_path: String,
    pub dry_run: bool,
    pub section_count: usize,
    pub block_count: usize,
    pub unassigned: Vec<u32>,
    pub missing_targets: Vec<String>,
    pub documents: Vec<DocumentReport>,
}

impl SyncReport {
    pub fn updated_count(&self) -> usize {
        self.documents.iter().filter(|doc| doc.written).count()
    }
}

/// Reads the master and every target that exists. Fails before any write
/// when the master is missing or no target can be found.
pub fn load_sync_inputs(paths: &ResolvedPaths, config: &CmdrefConfig) -> Result<SyncInputs> {
    config.validate()?;

    let master_path = paths.master_path(config);
    if !master_path.is_file() {
        let mut searched = vec![master_path.clone()];
        if paths.master_override.is_none() {
            searched.extend(
                paths
                    .searched_roots
                    .iter()
                    .map(|root| root.join(&config.master))
                    .filter(|candidate| *candidate != master_path),
            );
        }
        bail!(
            "master document not found.\nSearched:\n{}",
            format_path_list(&searched)
        );
    }
    let master_text = fs::read_to_string(&master_path)
        .with_context(|| format!("failed to read {}", master_path.display()))?;

    let mut targets = Vec::new();
    let mut missing_targets = Vec::new();
    for assignment in &config.targets {
        let path = paths.target_path(assignment);
        if !path.is_file() {
            warn!(path = %normalize_for_display(&path), "target document not found");
            missing_targets.push(path);
            continue;
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        targets.push(LoadedTarget {
            assignment: assignment.clone(),
            path,
            text,
        });
    }
    if targets.is_empty() {
        bail!(
            "no target documents found.\nSearched:\n{}",
            format_path_list(&missing_targets)
        );
    }

    Ok(SyncInputs {
        master_path,
        master_text,
        targets,
        missing_targets,
    })
}

pub fn plan_sync(inputs: SyncInputs, config: &CmdrefConfig) -> Result<SyncPlan> {
    let sections = parse_sections(&inputs.master_text, &config.classify);
    let blocks = build_section_blocks(&sections, config.target_column);
    debug!(
        sections = sections.len(),
        blocks = blocks.len(),
        "parsed master document"
    );

    let unassigned = sections
        .numbers()
        .filter(|number| config.target_for(*number).is_none())
        .collect::<Vec<_>>();
    if !unassigned.is_empty() {
        info!(?unassigned, "sections not claimed by any target");
    }

    let mut documents = Vec::with_capacity(inputs.targets.len());
    for target in inputs.targets {
        let spliced = splice_document(&target.text, target.assignment.sections(), &blocks)
            .with_context(|| format!("failed to splice {}", target.path.display()))?;
        documents.push(DocumentPlan {
            assignment: target.assignment,
            path: target.path,
            original: target.text,
            updated: spliced.text,
            sections: spliced.sections,
        });
    }

    Ok(SyncPlan {
        master_path: inputs.master_path,
        section_count: sections.len(),
        block_count: blocks.len(),
        unassigned,
        missing_targets: inputs.missing_targets,
        documents,
    })
}

impl SyncPlan {
    pub fn changed_documents(&self) -> impl Iterator<Item = &DocumentPlan> {
        self.documents.iter().filter(|doc| doc.changed())
    }

    /// Writes every changed document, or nothing when `dry_run` is set.
    pub fn apply(&self, options: SyncOptions) -> Result<SyncReport> {
        let mut documents = Vec::with_capacity(self.documents.len());
        for doc in &self.documents {
            let changed = doc.changed();
            let written = changed && !options.dry_run;
            if written {
                fs::write(&doc.path, &doc.updated)
                    .with_context(|| format!("failed to write {}", doc.path.display()))?;
                info!(path = %normalize_for_display(&doc.path), "updated target document");
            }
            documents.push(DocumentReport {
                file: doc.file_name(),
                path: normalize_for_display(&doc.path),
                first: doc.assignment.first,
                last: doc.assignment.last,
                changed,
                written,
                before_hash: compute_hash(&doc.original),
                after_hash: compute_hash(&doc.updated),
                sections: doc.sections.clone(),
            });
        }

        Ok(SyncReport {
            master_path: normalize_for_display(&self.master_path),
            dry_run: options.dry_run,
            section_count: self.section_count,
            block_count: self.block_count,
            unassigned: self.unassigned.clone(),
            missing_targets: self
                .missing_targets
                .iter()
                .map(|path| normalize_for_display(path))
                .collect(),
            documents,
        })
    }
}

pub fn run_sync(
    paths: &ResolvedPaths,
    config: &CmdrefConfig,
    options: SyncOptions,
) -> Result<SyncReport> {
    let inputs = load_sync_inputs(paths, config)?;
    let plan = plan_sync(inputs, config)?;
    plan.apply(options)
}

fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| normalize_for_display(path))
}

fn format_path_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| format!("  - {}", normalize_for_display(path)))
        .collect::<Vec<_>>()
        .join("\n")
}
