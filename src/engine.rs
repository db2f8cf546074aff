//! Run orchestration
//!
//! [`DiskManager`] resolves one instance's configuration, builds the filter
//! for its disposition and drives the matching walker over the input tree.
//! Only configuration problems are returned as errors; everything that goes
//! wrong with individual files or directories is logged and skipped.
//!
//! Runs must not overlap on the same input tree. Two concurrent runs race on
//! existence checks, partial archives and directory pruning.

use crate::archive::ArchiveWriter;
use crate::classifier::AgeClassifier;
use crate::config::{DiskManagerConfig, InstanceConfig, Properties, StaticProperties};
use crate::filters::{ArchiveFilter, DeleteFilter, FileFilter, MoveFilter};
use crate::policy::{ArchiveMode, ArchivePolicy, DispositionRules, RetentionPolicy};
use crate::walker::{FailedSubtreeWalker, MountLayout, MountPoints, TreeWalker, WalkStats};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

const DEFAULT_DIRECTORY_DEPTH: &str = "2";

/// The tech pack / set type / set name triple a run belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub tech_pack: String,
    pub set_type: String,
    pub set_name: String,
}

impl From<&InstanceConfig> for Instance {
    fn from(config: &InstanceConfig) -> Self {
        Self {
            tech_pack: config.tech_pack.clone(),
            set_type: config.set_type.clone(),
            set_name: config.set_name.clone(),
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.tech_pack, self.set_type, self.set_name)
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub mode: &'static str,
    pub files_acted_on: u64,
    pub total_files_seen: u64,
    pub bytes_transferred: u64,
    pub elapsed_ms: u64,
    pub archives: Vec<PathBuf>,
}

impl RunSummary {
    fn empty(mode: ArchiveMode, started: Instant) -> Self {
        Self {
            mode: mode.as_str(),
            files_acted_on: 0,
            total_files_seen: 0,
            bytes_transferred: 0,
            elapsed_ms: elapsed_millis(started),
            archives: Vec::new(),
        }
    }
}

pub struct DiskManager {
    instance: Instance,
    mode: ArchiveMode,
    in_dir: PathBuf,
    max_depth: usize,
    prune_empty: bool,
    props: Properties,
    statics: StaticProperties,
    rules: DispositionRules,
    etldata_marker: String,
    failed_marker: String,
    mounts: Box<dyn MountPoints>,
}

impl DiskManager {
    /// Resolve the run parameters.
    ///
    /// Checks `archiveMode`, `inDir` and `directoryDepth`. Policy validation
    /// happens in [`DiskManager::build_filter`].
    pub fn new(config: &DiskManagerConfig) -> Result<Self> {
        let props = config.properties();

        let mode = ArchiveMode::from_code(props.require("archiveMode")?)?;
        let in_dir = props.require_path("inDir")?;

        let depth = props.get_or("directoryDepth", DEFAULT_DIRECTORY_DEPTH);
        let max_depth = depth
            .parse::<usize>()
            .with_context(|| format!("Parameter directoryDepth is invalid [{depth}]"))?;
        let prune_empty = props.get_bool("deleteEmptyDirectories", false);

        Ok(Self {
            instance: Instance::from(&config.instance),
            mode,
            in_dir,
            max_depth,
            prune_empty,
            statics: config.static_properties(),
            props,
            rules: DispositionRules::from_config(&config.policy),
            etldata_marker: config.policy.etldata_marker.clone(),
            failed_marker: config.policy.failed_marker.clone(),
            mounts: Box::new(MountLayout::from_config(&config.mounts)),
        })
    }

    /// Replace the mount layout used by the failed-subtree walk
    pub fn with_mount_points(mut self, mounts: impl MountPoints + 'static) -> Self {
        self.mounts = Box::new(mounts);
        self
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn mode(&self) -> ArchiveMode {
        self.mode
    }

    pub fn in_dir(&self) -> &Path {
        &self.in_dir
    }

    /// Build the filter for the configured disposition.
    ///
    /// Fails on any invalid policy or unusable output directory. Nothing is
    /// written to disk.
    pub fn build_filter(&self) -> Result<Box<dyn FileFilter>> {
        let retention = RetentionPolicy::from_properties(&self.props, &self.statics)?;
        let classifier = AgeClassifier::new(retention);

        let filter: Box<dyn FileFilter> = match self.mode {
            ArchiveMode::Move => {
                let out_dir = self.props.require_path("outDir")?;
                Box::new(MoveFilter::new(classifier, out_dir)?)
            }
            ArchiveMode::ZipSequence | ArchiveMode::ZipMinMax | ArchiveMode::ZipCreationTime => {
                let naming = self
                    .mode
                    .naming()
                    .context("Archive mode has no naming policy")?;
                let policy = ArchivePolicy::from_properties(&self.props, &self.statics, naming)?;
                Box::new(ArchiveFilter::new(
                    classifier,
                    ArchiveWriter::new(&policy),
                    self.rules.clone(),
                    &policy.output_format,
                ))
            }
            ArchiveMode::Delete => Box::new(DeleteFilter::new(classifier, self.rules.clone())),
        };
        Ok(filter)
    }

    /// Run one pass over the input tree
    pub fn execute(&self) -> Result<RunSummary> {
        let span = tracing::info_span!(
            "diskmanager",
            tech_pack = %self.instance.tech_pack,
            set_type = %self.instance.set_type,
            set_name = %self.instance.set_name,
        );
        let _guard = span.enter();
        let started = Instant::now();

        if let Err(e) = fs::read_dir(&self.in_dir) {
            tracing::warn!("Input directory {} can't be read ({}). Exiting.", self.in_dir.display(), e);
            return Ok(RunSummary::empty(self.mode, started));
        }

        tracing::info!("Managing directory {}", self.in_dir.display());

        match self.run(started) {
            Ok(summary) => {
                tracing::info!(
                    "Successfully managed {}/{} files ({}B) in {} ms",
                    summary.files_acted_on,
                    summary.total_files_seen,
                    summary.bytes_transferred,
                    summary.elapsed_ms
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::warn!(
                    "Manage {} failed in {} ms: {:#}",
                    self.in_dir.display(),
                    elapsed_millis(started),
                    e
                );
                Err(e)
            }
        }
    }

    fn run(&self, started: Instant) -> Result<RunSummary> {
        let mut filter = self.build_filter()?;

        let stats = self.walk(filter.as_mut());
        filter.finish();

        tracing::debug!(
            "{}: {} directories listed, {} pruned, {} skipped",
            filter.name(),
            stats.directories_listed,
            stats.directories_pruned,
            stats.branches_skipped
        );

        let counters = filter.counters();
        Ok(RunSummary {
            mode: self.mode.as_str(),
            files_acted_on: counters.files_acted_on,
            total_files_seen: counters.total_files_seen,
            bytes_transferred: counters.bytes_transferred,
            elapsed_ms: elapsed_millis(started),
            archives: filter.archives().to_vec(),
        })
    }

    fn walk(&self, filter: &mut dyn FileFilter) -> WalkStats {
        if !self.uses_failed_layout() {
            return TreeWalker::new(self.max_depth, self.prune_empty).walk(&self.in_dir, filter);
        }

        let mut walker = FailedSubtreeWalker::new(self.failed_marker.as_str());
        if self.mode == ArchiveMode::Delete {
            walker = walker.with_candidates(self.rules.clone());
        }

        let mut roots = self.mounts.expand();
        if roots.is_empty() {
            tracing::debug!("Single directory structure, no mount points to expand");
            roots.push(self.in_dir.clone());
        }

        let mut stats = WalkStats::default();
        for root in &roots {
            tracing::debug!("Walking failed directories under {}", root.display());
            stats += walker.walk(root, filter);
        }
        stats
    }

    /// Archive and delete runs under the ETL data tree only clean failed directories
    fn uses_failed_layout(&self) -> bool {
        if self.mode == ArchiveMode::Move || self.etldata_marker.is_empty() {
            return false;
        }
        std::path::absolute(&self.in_dir)
            .unwrap_or_else(|_| self.in_dir.clone())
            .to_string_lossy()
            .contains(&self.etldata_marker)
    }
}

fn elapsed_millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
