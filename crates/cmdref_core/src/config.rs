use std::collections::BTreeSet;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::format::DEFAULT_TARGET_COLUMN;
use crate::sections::LineClassifier;

pub const DEFAULT_MASTER_FILENAME: &str = "command_summary.txt";
pub const CONFIG_FILENAME: &str = "cmdref.toml";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CmdrefConfig {
    pub master: String,
    pub target_column: usize,
    pub classify: LineClassifier,
    pub targets: Vec<TargetAssignment>,
}

/// One target document and the inclusive range of sections it owns.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TargetAssignment {
    pub path: String,
    pub first: u32,
    pub last: u32,
}

impl TargetAssignment {
    pub fn new(path: &str, first: u32, last: u32) -> Self {
        Self {
            path: path.to_string(),
            first,
            last,
        }
    }

    pub fn sections(&self) -> RangeInclusive<u32> {
        self.first..=self.last
    }

    pub fn owns(&self, number: u32) -> bool {
        self.sections().contains(&number)
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

impl Default for CmdrefConfig {
    fn default() -> Self {
        Self {
            master: DEFAULT_MASTER_FILENAME.to_string(),
            target_column: DEFAULT_TARGET_COLUMN,
            classify: LineClassifier::default(),
            targets: default_targets(),
        }
    }
}

pub fn default_targets() -> Vec<TargetAssignment> {
    vec![
        TargetAssignment::new("system-admin.html", 1, 10),
        TargetAssignment::new("devops-tools.html", 11, 23),
        TargetAssignment::new("monitoring-security.html", 24, 29),
    ]
}

impl CmdrefConfig {
    /// Rejects configurations where a section could be claimed twice or never
    /// be reachable.
    pub fn validate(&self) -> Result<()> {
        if self.master.trim().is_empty() {
            bail!("master document path cannot be empty");
        }
        if self.target_column < 2 {
            bail!(
                "target_column must be at least 2 (got {})",
                self.target_column
            );
        }
        if self.targets.is_empty() {
            bail!("at least one [[targets]] entry is required");
        }

        let mut seen_paths = BTreeSet::new();
        for target in &self.targets {
            if target.path.trim().is_empty() {
                bail!("target path cannot be empty");
            }
            if !seen_paths.insert(target.path.as_str()) {
                bail!("target {} is listed more than once", target.path);
            }
            if target.first == 0 || target.first > target.last {
                bail!(
                    "target {} has an invalid section range {}-{} (expected 1 <= first <= last)",
                    target.path,
                    target.first,
                    target.last
                );
            }
        }

        for (index, left) in self.targets.iter().enumerate() {
            for right in &self.targets[index + 1..] {
                if left.overlaps(right) {
                    bail!(
                        "section ranges overlap: {} ({}-{}) and {} ({}-{})",
                        left.path,
                        left.first,
                        left.last,
                        right.path,
                        right.first,
                        right.last
                    );
                }
            }
        }
        Ok(())
    }

    pub fn target_for(&self, number: u32) -> Option<&TargetAssignment> {
        self.targets.iter().find(|target| target.owns(number))
    }
}

/// Load and validate a config file. A missing file yields the defaults.
pub fn load_config(config_path: &Path) -> Result<CmdrefConfig> {
    if !config_path.exists() {
        return Ok(CmdrefConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: CmdrefConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    parsed
        .validate()
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    let defaults = CmdrefConfig::default();
    let mut out = String::from(
        "# cmdref configuration (materialized by `cmdref init`)\n# Paths are relative to the project root.\n\n",
    );
    out.push_str(&format!("master = \"{}\"\n", defaults.master));
    out.push_str(&format!("target_column = {}\n\n", defaults.target_column));
    out.push_str("[classify]\n# any | lowercase | none\nletters = \"any\"\nleading = [\"/\", \".\", \"~\"]\nskip_prefixes = []\n");
    for target in &defaults.targets {
        out.push_str(&format!(
            "\n[[targets]]\npath = \"{}\"\nfirst = {}\nlast = {}\n",
            target.path, target.first, target.last
        ));
    }
    out
}
