//! Reader for the per-thread `.bb` profiles
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

/// Slice boundary: an instruction address and how often its block had executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub addr: u64,
    pub count: u64,
    /// (image name, image low address), None for raw or `no_image` markers
    pub image: Option<(String, u64)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BbSlice {
    /// cumulative instruction count at the end of the slice
    pub end_instruction: u64,
    /// (block id, instructions executed in the block during the slice)
    pub blocks: Vec<(u32, u64)>,
    /// (reuse distance bucket, count)
    pub ldv: Vec<(u32, u64)>,
    pub end_marker: Option<Marker>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BbBlockSummary {
    pub id: u32,
    pub start: u64,
    pub end: u64,
    pub static_instructions: u64,
    pub block_count: u64,
    pub size: u64,
    /// (previous block id, count), empty unless previous block counts are emitted
    pub predecessors: Vec<(u32, u64)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BbProfile {
    pub tid: Option<u32>,
    pub command: Option<String>,
    /// G: records, (name, low address)
    pub images: Vec<(String, u64)>,
    pub start_marker: Option<Marker>,
    pub slices: Vec<BbSlice>,
    pub dynamic_instruction_count: Option<u64>,
    pub slice_size: Option<u64>,
    pub blocks: Vec<BbBlockSummary>,
    /// `End of bb` was seen
    pub complete: bool,
}

fn parse_hex(s: &str) -> anyhow::Result<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).with_context(|| format!("Invalid hex number {:?}", s))
}

/// `:a:b :c:d ` after the leading `T`
fn parse_pairs(s: &str) -> anyhow::Result<Vec<(u32, u64)>> {
    let mut pairs = vec![];
    for token in s.split_whitespace() {
        let Some((key, value)) = token.strip_prefix(':').and_then(|t| t.split_once(':')) else {
            bail!("Invalid pair {:?}", token);
        };
        pairs.push((key.parse()?, value.parse()?));
    }
    Ok(pairs)
}

fn parse_marker(line: &str) -> anyhow::Result<Marker> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        bail!("Truncated marker {:?}", line);
    }
    let addr = parse_hex(tokens[1])?;
    let count = tokens[2].parse()?;
    let image = if tokens[0] == "S:" {
        // S: addr count name... low + offset
        if tokens.len() < 7 || tokens[tokens.len() - 2] != "+" {
            bail!("Invalid symbolic marker {:?}", line);
        }
        let name = tokens[3..tokens.len() - 3].join(" ");
        Some((name, parse_hex(tokens[tokens.len() - 3])?))
    } else {
        None
    };
    Ok(Marker { addr, count, image })
}

fn parse_block_summary(line: &str) -> anyhow::Result<BbBlockSummary> {
    // Block id: 3 0x100:0x10c static instructions: 4 block count: 10 block size: 16 [previous-block counts: ( 0:1 2:9 )]
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 13 {
        bail!("Truncated block summary {:?}", line);
    }
    let Some((start, end)) = tokens[3].split_once(':') else {
        bail!("Invalid block range {:?}", tokens[3]);
    };
    let mut predecessors = vec![];
    if tokens.len() > 13 {
        for token in &tokens[13..] {
            if let Some((prev, count)) = token.split_once(':') {
                if prev.chars().all(|c| c.is_ascii_digit()) {
                    predecessors.push((prev.parse()?, count.parse()?));
                }
            }
        }
    }
    Ok(BbBlockSummary {
        id: tokens[2].parse()?,
        start: parse_hex(start)?,
        end: parse_hex(end)?,
        static_instructions: tokens[6].parse()?,
        block_count: tokens[9].parse()?,
        size: tokens[12].parse()?,
        predecessors,
    })
}

impl BbProfile {
    pub fn read<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.as_ref().display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut profile = BbProfile::default();
        // T lines seen since the last "# Slice ending" line
        let mut t_lines = 0;
        for (line_num, line) in content.lines().enumerate() {
            profile
                .parse_line(line, &mut t_lines)
                .with_context(|| format!("Line {}: {:?}", line_num + 1, line))?;
        }
        Ok(profile)
    }

    fn parse_line(&mut self, line: &str, t_lines: &mut usize) -> anyhow::Result<()> {
        if let Some(rest) = line.strip_prefix("P: ") {
            self.tid = Some(rest.trim().parse()?);
        } else if let Some(rest) = line.strip_prefix("C: ") {
            let rest = rest.strip_prefix("sum:dummy Command:").unwrap_or(rest);
            self.command = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("G: ") {
            let Some((name, low)) = rest.rsplit_once(" LowAddress: ") else {
                bail!("Invalid image record");
            };
            self.images.push((name.to_string(), parse_hex(low.trim())?));
        } else if line.starts_with("S: ") || line.starts_with("M: ") {
            let marker = parse_marker(line)?;
            match self.slices.last_mut() {
                Some(slice) => slice.end_marker = Some(marker),
                None => self.start_marker = Some(marker),
            }
        } else if let Some(rest) = line.strip_prefix("# Slice ending at ") {
            self.slices.push(BbSlice {
                end_instruction: rest.trim().parse()?,
                ..Default::default()
            });
            *t_lines = 0;
        } else if let Some(rest) = line.strip_prefix('T') {
            let Some(slice) = self.slices.last_mut() else {
                bail!("Slice vector before any slice");
            };
            match *t_lines {
                0 => slice.blocks = parse_pairs(rest)?,
                1 => slice.ldv = parse_pairs(rest)?,
                _ => bail!("Too many slice vectors"),
            }
            *t_lines += 1;
        } else if let Some(rest) = line.strip_prefix("Dynamic instruction count ") {
            self.dynamic_instruction_count = Some(rest.trim().parse()?);
        } else if let Some(rest) = line.strip_prefix("SliceSize: ") {
            self.slice_size = Some(rest.trim().parse()?);
        } else if line.starts_with("Block id: ") {
            self.blocks.push(parse_block_summary(line)?);
        } else if line == "End of bb" {
            self.complete = true;
        }
        Ok(())
    }

    /// Instructions per block id, summed over all slices
    pub fn block_totals(&self) -> BTreeMap<u32, u64> {
        let mut totals = BTreeMap::new();
        for slice in &self.slices {
            for (id, count) in &slice.blocks {
                *totals.entry(*id).or_insert(0) += count;
            }
        }
        totals
    }

    /// Instructions covered by the emitted slice vectors
    pub fn total_instructions(&self) -> u64 {
        self.block_totals().values().sum()
    }
}
