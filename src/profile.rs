use crate::{
    Block, BlockHandle, BlockMap, ImageId, ImageRegistry, ProfilerConfig, ReuseHistogram,
    SliceLengths,
};
use log::debug;
use std::{
    collections::{BTreeMap, VecDeque},
    io::Write,
};

/// Dynamic counters of one block for one thread
#[derive(Debug, Clone, Default)]
pub struct BlockSlot {
    /// times the block was executed in the current slice
    pub slice_count: u64,
    /// times the block was executed prior to the current slice
    pub global_count: u64,
    /// id assigned on first execution, 0 until then
    pub lazy_id: u32,
    /// previous block id -> count, id 0 stands for "no previous block"
    pub predecessors: BTreeMap<u32, u64>,
}

impl BlockSlot {
    pub fn id_for(&self, block: &Block) -> u32 {
        if block.id() != 0 { block.id() } else { self.lazy_id }
    }

    pub fn total_count(&self) -> u64 {
        self.global_count + self.slice_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// output is open (image records may arrive before the thread starts)
    Uninitialized,
    Active,
    Finished,
}

/// Shared state needed to write slice records
pub struct SliceContext<'a> {
    pub config: &'a ProfilerConfig,
    pub blocks: &'a BlockMap,
    pub images: &'a ImageRegistry,
}

/// Slicing state machine and output stream of one thread
pub struct ThreadProfile {
    tid: u32,
    out: Box<dyn Write + Send>,
    state: ThreadState,
    /// instructions left in the current slice, goes negative at a boundary
    slice_timer: i64,
    /// value the timer started the current slice with
    current_slice_size: i64,
    global_instruction_count: u64,
    /// no slice emitted yet
    first: bool,
    first_eip: Option<u64>,
    last_block: Option<BlockHandle>,
    length_queue: VecDeque<u64>,
    ldv: Option<ReuseHistogram>,
    /// indexed by block handle, grown on demand
    slots: Vec<BlockSlot>,
    /// blocks in first execution order when ids are assigned lazily, id = index + 1
    lazy_order: Vec<BlockHandle>,
    lazy_ids: bool,
}

impl ThreadProfile {
    pub fn new(
        tid: u32,
        out: Box<dyn Write + Send>,
        config: &ProfilerConfig,
        lengths: Option<SliceLengths>,
    ) -> Self {
        let (initial, length_queue) = match lengths {
            Some(lengths) => (lengths.initial, lengths.queue),
            None => (config.slice_size, VecDeque::new()),
        };
        Self {
            tid,
            out,
            state: ThreadState::Uninitialized,
            slice_timer: initial as i64,
            current_slice_size: initial as i64,
            global_instruction_count: 0,
            first: true,
            first_eip: None,
            last_block: None,
            length_queue,
            ldv: config.ldv.new_tracker().map(ReuseHistogram::new),
            slots: vec![],
            lazy_order: vec![],
            lazy_ids: config.emit_previous_block_counts,
        }
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn global_instruction_count(&self) -> u64 {
        self.global_instruction_count
    }

    pub fn start(&mut self) {
        assert!(
            self.state == ThreadState::Uninitialized,
            "thread {} started in state {:?}",
            self.tid,
            self.state
        );
        self.state = ThreadState::Active;
    }

    /// Counts one execution of a block, returns true if the slice is exhausted
    pub fn execute(&mut self, handle: BlockHandle, blocks: &BlockMap) -> bool {
        let block = blocks.get(handle);
        if self.slots.len() <= handle.index() {
            self.slots.resize_with(blocks.len(), BlockSlot::default);
        }
        if self.first_eip.is_none() {
            self.first_eip = Some(block.key().start());
        }

        if self.lazy_ids {
            let prev_id = match self.last_block {
                Some(prev) => self.slots[prev.index()].lazy_id,
                None => 0,
            };
            let slot = &mut self.slots[handle.index()];
            if slot.lazy_id == 0 {
                self.lazy_order.push(handle);
                slot.lazy_id = self.lazy_order.len() as u32;
            }
            *slot.predecessors.entry(prev_id).or_insert(0) += 1;
        }
        self.slots[handle.index()].slice_count += 1;

        self.slice_timer -= block.static_instructions() as i64;
        self.last_block = Some(handle);
        self.slice_timer < 0
    }

    pub fn access_memory(&mut self, addr: u64) {
        if let Some(ldv) = &mut self.ldv {
            ldv.access(addr);
        }
    }

    /// Closes the current slice at the last instruction of `handle`
    pub fn end_slice(&mut self, handle: BlockHandle, ctx: &SliceContext) -> anyhow::Result<()> {
        self.global_instruction_count += (self.current_slice_size - self.slice_timer) as u64;
        let next = self
            .length_queue
            .pop_front()
            .unwrap_or(ctx.config.slice_size) as i64;
        // carry the overshoot of the triggering block into the next slice
        self.slice_timer = next + self.slice_timer.min(0);
        self.current_slice_size = self.slice_timer;

        let block = ctx.blocks.get(handle);
        self.emit_slice(block.key().end(), block.image(), ctx)
    }

    fn emit_slice(
        &mut self,
        end_marker: u64,
        image: Option<ImageId>,
        ctx: &SliceContext,
    ) -> anyhow::Result<()> {
        if self.first {
            writeln!(self.out, "I: 0")?;
            writeln!(self.out, "P: {}", self.tid)?;
            writeln!(self.out, "C: sum:dummy Command:{}", ctx.config.command_line)?;
            let first_eip = self.first_eip.unwrap_or(0);
            let first_image = ctx
                .blocks
                .find_containing(first_eip)
                .and_then(|handle| ctx.blocks.get(handle).image());
            self.write_marker(first_eip, 1, first_image, ctx)?;
        }

        writeln!(
            self.out,
            "# Slice ending at {}",
            self.global_instruction_count
        )?;
        debug!(
            "Thread {} slice ending at {} (0x{:x})",
            self.tid, self.global_instruction_count, end_marker
        );

        // without the first slice its counts carry over into the next one
        let emit_body = !self.first || ctx.config.emit_first;
        if emit_body {
            write!(self.out, "T")?;
        }
        let mut marker_count = 0;
        for (handle, block) in ctx.blocks.iter_by_address() {
            let Some(slot) = self.slots.get_mut(handle.index()) else {
                continue;
            };
            if block.key().contains(end_marker) {
                marker_count += slot.total_count();
            }
            if emit_body && slot.slice_count != 0 {
                write!(
                    self.out,
                    ":{}:{} ",
                    slot.id_for(block),
                    slot.slice_count * block.static_instructions()
                )?;
                slot.global_count += slot.slice_count;
                slot.slice_count = 0;
            }
        }
        if emit_body {
            writeln!(self.out)?;
            if let Some(ldv) = &mut self.ldv {
                write!(self.out, "T")?;
                ldv.emit(&mut self.out)?;
                writeln!(self.out)?;
            }
        }

        if self.state == ThreadState::Active {
            self.write_marker(end_marker, marker_count, image, ctx)?;
        }
        self.out.flush()?;
        self.first = false;
        Ok(())
    }

    fn write_marker(
        &mut self,
        addr: u64,
        count: u64,
        image: Option<ImageId>,
        ctx: &SliceContext,
    ) -> anyhow::Result<()> {
        if !ctx.config.symbolic {
            writeln!(self.out, "M: 0x{:x} {}", addr, count)?;
            return Ok(());
        }
        match image.and_then(|id| ctx.images.get(id)) {
            Some(info) => writeln!(
                self.out,
                "S: 0x{:x} {} {} 0x{:x} + 0x{:x}",
                addr,
                count,
                info.name,
                info.low_address,
                addr.wrapping_sub(info.low_address)
            )?,
            None => writeln!(self.out, "M: 0x{:x} {} no_image 0", addr, count)?,
        }
        Ok(())
    }

    pub fn write_image_record(&mut self, name: &str, low_address: u64) -> anyhow::Result<()> {
        if self.state == ThreadState::Finished {
            return Ok(());
        }
        writeln!(self.out, "G: {} LowAddress: 0x{:x}", name, low_address)?;
        self.out.flush()?;
        Ok(())
    }

    /// Emits the last partial slice and the program end summary
    pub fn finish(&mut self, ctx: &SliceContext) -> anyhow::Result<()> {
        assert!(
            self.state == ThreadState::Active,
            "thread {} ended in state {:?}",
            self.tid,
            self.state
        );
        if ctx.config.emit_last && self.slice_timer != self.current_slice_size {
            if let Some(last) = self.last_block {
                self.end_slice(last, ctx)?;
            }
        }
        self.state = ThreadState::Finished;

        writeln!(
            self.out,
            "Dynamic instruction count {}",
            self.global_instruction_count
        )?;
        writeln!(self.out, "SliceSize: {}", ctx.config.slice_size)?;
        if self.lazy_ids {
            // in the order blocks were first executed
            for handle in self.lazy_order.clone() {
                self.write_block_summary(handle, ctx)?;
            }
        } else {
            for (handle, _) in ctx.blocks.iter() {
                self.write_block_summary(handle, ctx)?;
            }
        }
        writeln!(self.out, "End of bb")?;
        self.out.flush()?;
        Ok(())
    }

    fn write_block_summary(&mut self, handle: BlockHandle, ctx: &SliceContext) -> anyhow::Result<()> {
        let Some(slot) = self.slots.get(handle.index()) else {
            return Ok(());
        };
        if slot.global_count == 0 {
            return Ok(());
        }
        let block = ctx.blocks.get(handle);
        write!(
            self.out,
            "Block id: {} 0x{:x}:0x{:x} static instructions: {} block count: {} block size: {}",
            slot.id_for(block),
            block.key().start(),
            block.key().end(),
            block.static_instructions(),
            slot.global_count,
            block.key().size()
        )?;
        if self.lazy_ids {
            write!(self.out, " previous-block counts: ( ")?;
            for (prev_id, count) in &slot.predecessors {
                write!(self.out, "{}:{} ", prev_id, count)?;
            }
            write!(self.out, ")")?;
        }
        writeln!(self.out)?;
        Ok(())
    }
}
