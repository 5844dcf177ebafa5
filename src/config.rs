use crate::LdvMode;
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
};

/// The slice timer is signed, lengths must fit into it
pub const MAX_SLICE_LENGTH: u64 = i64::MAX as u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Output base name, per-thread files go to {output}.T.{tid}.bb
    pub output: String,
    /// Slice size in instructions
    pub slice_size: u64,
    /// Resolve slice end markers to image + offset
    pub symbolic: bool,
    /// Emit the first slice
    pub emit_first: bool,
    /// Emit the last slice even if it is shorter than slice_size
    pub emit_last: bool,
    /// Emit execution counts of preceding blocks; block ids are then assigned
    /// in first execution order
    pub emit_previous_block_counts: bool,
    /// LRU stack distance vector collection
    pub ldv: LdvMode,
    /// Add the process id to output file names
    pub use_pid: bool,
    /// Per-thread slice length files, `path` or `path:tidN`
    pub length_files: Vec<String>,
    /// Recorded in the C: line of each profile
    pub command_line: String,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            output: "out".to_string(),
            slice_size: 100_000_000,
            symbolic: true,
            emit_first: true,
            emit_last: true,
            emit_previous_block_counts: false,
            ldv: LdvMode::None,
            use_pid: false,
            length_files: vec![],
            command_line: String::new(),
        }
    }
}

impl ProfilerConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read(path.as_ref())
            .with_context(|| format!("Failed to read config {}", path.as_ref().display()))?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.slice_size == 0 {
            bail!("Slice size must be positive");
        }
        if self.slice_size > MAX_SLICE_LENGTH {
            bail!("Slice size {} is too large", self.slice_size);
        }
        if self.output.is_empty() {
            bail!("Output base name must not be empty");
        }
        Ok(())
    }

    pub fn output_path(&self, pid: Option<u32>, tid: u32) -> PathBuf {
        match pid {
            Some(pid) => PathBuf::from(format!("{}.T.{}.{}.bb", self.output, pid, tid)),
            None => PathBuf::from(format!("{}.T.{}.bb", self.output, tid)),
        }
    }

    /// Parse all length files, keyed by thread id
    pub fn load_slice_lengths(&self) -> anyhow::Result<HashMap<u32, SliceLengths>> {
        let mut result = HashMap::new();
        for arg in &self.length_files {
            let (path, tid) = match parse_tid_suffix(arg)? {
                (path, Some(tid)) => (path, tid),
                // skipping the suffix is fine for a single file, which goes to thread 0
                (path, None) if self.length_files.len() == 1 => (path, 0),
                (_, None) => bail!("missing ':tidN' suffix to length file: {}", arg),
            };
            let lengths = SliceLengths::read(path)?;
            if result.insert(tid, lengths).is_some() {
                bail!("More than one length file for thread {}", tid);
            }
        }
        Ok(result)
    }
}

/// Split `path:tidN` into the path and the thread id
pub fn parse_tid_suffix(arg: &str) -> anyhow::Result<(&str, Option<u32>)> {
    match arg.rfind(":tid") {
        Some(pos) => {
            let tid = &arg[pos + 4..];
            let tid: u32 = tid
                .parse()
                .with_context(|| format!("Invalid thread id in length file argument: {}", arg))?;
            Ok((&arg[..pos], Some(tid)))
        }
        None => Ok((arg, None)),
    }
}

/// Externally supplied slice lengths of one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceLengths {
    /// length of the first slice
    pub initial: u64,
    /// lengths of the following slices, the fixed slice size is used once empty
    pub queue: VecDeque<u64>,
}

impl SliceLengths {
    pub fn read<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Could not open length file: {}", path.as_ref().display()))?;
        Self::parse(&content)
            .with_context(|| format!("Malformed length file: {}", path.as_ref().display()))
    }

    /// One instruction count per line, blank lines and `#` comments are skipped
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut lengths = VecDeque::new();
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let length: u64 = line
                .parse()
                .with_context(|| format!("Line {}: invalid length {:?}", line_num + 1, line))?;
            if length == 0 || length > MAX_SLICE_LENGTH {
                bail!("Line {}: slice length out of range: {}", line_num + 1, length);
            }
            lengths.push_back(length);
        }
        match lengths.pop_front() {
            Some(initial) => Ok(Self {
                initial,
                queue: lengths,
            }),
            None => bail!("No slice lengths found"),
        }
    }
}
