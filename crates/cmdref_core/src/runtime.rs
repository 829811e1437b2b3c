use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{CONFIG_FILENAME, CmdrefConfig, DEFAULT_MASTER_FILENAME, TargetAssignment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub master: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub home_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let home_dir = env::var_os("HOME")
            .or_else(|| env::var_os("USERPROFILE"))
            .map(PathBuf::from);
        Ok(Self {
            cwd,
            home_dir,
            temp_dir: Some(env::temp_dir()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub master_override: Option<PathBuf>,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
    pub master_source: ValueSource,
    /// Directories probed for the project root, in probe order.
    pub searched_roots: Vec<PathBuf>,
}

impl ResolvedPaths {
    pub fn master_path(&self, config: &CmdrefConfig) -> PathBuf {
        match &self.master_override {
            Some(path) => path.clone(),
            None => absolutize(Path::new(&config.master), &self.project_root),
        }
    }

    pub fn target_path(&self, target: &TargetAssignment) -> PathBuf {
        absolutize(Path::new(&target.path), &self.project_root)
    }

    pub fn diagnostics(&self) -> String {
        let searched = if self.searched_roots.is_empty() {
            "<none>".to_string()
        } else {
            self.searched_roots
                .iter()
                .map(|path| normalize_for_display(path))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "project_root={} ({})\nconfig_path={} ({})\nmaster_override={} ({})\nsearched_roots={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            self.master_override
                .as_deref()
                .map(normalize_for_display)
                .unwrap_or_else(|| "<none>".to_string()),
            self.master_source.as_str(),
            searched
        )
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let mut searched_roots = Vec::new();
    let (project_root, root_source) = if let Some(path) = overrides.project_root.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup("CMDREF_PROJECT_ROOT") {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        searched_roots = candidate_roots(context);
        match detect_project_root(&searched_roots) {
            Some(root) => (root, ValueSource::Heuristic),
            None => (context.cwd.clone(), ValueSource::Default),
        }
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup("CMDREF_CONFIG") {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else {
        (project_root.join(CONFIG_FILENAME), ValueSource::Default)
    };

    let (master_override, master_source) = if let Some(path) = overrides.master.as_deref() {
        (Some(absolutize(path, &context.cwd)), ValueSource::Flag)
    } else if let Some(value) = lookup("CMDREF_MASTER") {
        (
            Some(absolutize(Path::new(&value), &project_root)),
            ValueSource::Env,
        )
    } else {
        (None, ValueSource::Config)
    };

    Ok(ResolvedPaths {
        project_root,
        config_path,
        master_override,
        root_source,
        config_source,
        master_source,
        searched_roots,
    })
}

/// Default discovery only: current directory, its parent and grandparent,
/// then home and temp.
fn candidate_roots(context: &ResolutionContext) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut cursor = Some(context.cwd.as_path());
    for _ in 0..3 {
        let Some(current) = cursor else {
            break;
        };
        out.push(current.to_path_buf());
        cursor = current.parent();
    }
    out.extend(context.home_dir.iter().cloned());
    out.extend(context.temp_dir.iter().cloned());

    let mut seen = HashSet::new();
    out.retain(|path| seen.insert(normalize_for_display(path)));
    out
}

fn detect_project_root(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|candidate| {
            candidate.join(CONFIG_FILENAME).is_file()
                || candidate.join(DEFAULT_MASTER_FILENAME).is_file()
        })
        .cloned()
}

/// Writes the default config unless one exists and `force` is off.
/// Returns `true` when a write occurred.
pub fn init_config(paths: &ResolvedPaths, force: bool) -> Result<bool> {
    write_text_file(
        &paths.config_path,
        &crate::config::render_default_config(),
        force,
    )
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
