//! Replayable log of execution-monitoring events
//!
//! A log is a zstd-compressed stream of JSON objects, one event per line.
//! Replaying it through [`replay_event`] drives a [`Profiler`] the same way a
//! live monitoring layer would.
use crate::{ExecutionObserver, ImageId, IntervalKey, Profiler};
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use zstd::{Encoder, stream::read::Decoder};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// image ids are assigned in load order
    ImageLoaded { name: String, low_address: u64 },
    ImageUnloaded { image: u32 },
    BlockDiscovered {
        /// first instruction
        start: u64,
        /// last instruction
        end: u64,
        /// block size in bytes
        size: u64,
        instructions: u64,
        image: Option<u32>,
    },
    ThreadStart { tid: u32 },
    ThreadEnd { tid: u32 },
    /// the block containing `addr` was executed
    BlockExecuted { addr: u64, tid: u32 },
    MemoryAccess { addr: u64, tid: u32 },
}

pub struct EventLogEncoder<W: Write> {
    encoder: Encoder<'static, BufWriter<W>>,
    pub num_events: usize,
}

impl<W: Write> EventLogEncoder<W> {
    pub fn open(writer: W) -> anyhow::Result<Self> {
        Ok(Self {
            encoder: Encoder::new(BufWriter::new(writer), 0)?,
            num_events: 0,
        })
    }

    pub fn record(&mut self, event: &Event) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.encoder, event)?;
        self.encoder.write_all(b"\n")?;
        self.num_events += 1;
        Ok(())
    }

    pub fn finish(self) -> anyhow::Result<usize> {
        let mut writer = self.encoder.finish()?;
        writer.flush()?;
        Ok(self.num_events)
    }
}

pub struct EventLogDecoder<R: Read> {
    lines: std::io::Lines<BufReader<Decoder<'static, BufReader<R>>>>,
    line_num: usize,
}

impl<R: Read> EventLogDecoder<R> {
    pub fn open(reader: R) -> anyhow::Result<Self> {
        Ok(Self {
            lines: BufReader::new(Decoder::new(reader)?).lines(),
            line_num: 0,
        })
    }
}

impl<R: Read> Iterator for EventLogDecoder<R> {
    type Item = anyhow::Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    return Some(Err(err).context("Failed to read from zstd compressed stream"));
                }
            };
            self.line_num += 1;
            if line.trim().is_empty() {
                continue;
            }
            let line_num = self.line_num;
            return Some(
                serde_json::from_str(&line)
                    .with_context(|| format!("Malformed event at line {}", line_num)),
            );
        }
    }
}

/// Forwards one event to the profiler
pub fn replay_event(profiler: &Profiler, event: &Event) -> anyhow::Result<()> {
    match event {
        Event::ImageLoaded { name, low_address } => {
            profiler.on_image_loaded(name, *low_address)?;
        }
        Event::ImageUnloaded { image } => {
            if *image as usize >= profiler.num_images() {
                bail!("Unload of unknown image {}", image);
            }
            profiler.on_image_unloaded(ImageId(*image));
        }
        Event::BlockDiscovered {
            start,
            end,
            size,
            instructions,
            image,
        } => {
            let key = IntervalKey::try_new(*start, *end, *size)?;
            if profiler.find_overlap(&key).is_some() {
                bail!("Block 0x{:x}:0x{:x} overlaps a known block", start, end);
            }
            if let Some(image) = image {
                if *image as usize >= profiler.num_images() {
                    bail!("Block 0x{:x} refers to unknown image {}", start, image);
                }
            }
            profiler.on_block_discovered(key, *instructions, image.map(ImageId));
        }
        Event::ThreadStart { tid } => profiler.on_thread_start(*tid),
        Event::ThreadEnd { tid } => profiler.on_thread_end(*tid)?,
        Event::BlockExecuted { addr, tid } => match profiler.find_containing(*addr) {
            Some(block) => profiler.on_block_executed(block, *tid)?,
            None => bail!("No block discovered at 0x{:x}", addr),
        },
        Event::MemoryAccess { addr, tid } => profiler.on_memory_access(*addr, *tid),
    }
    Ok(())
}
