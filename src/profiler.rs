use crate::{
    BlockHandle, BlockMap, ImageId, ImageRegistry, IntervalKey, ProfilerConfig, SliceContext,
    SliceLengths, ThreadProfile, ThreadState,
};
use log::{error, info, trace};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufWriter, Write},
    sync::Arc,
};

/// Callbacks of the execution-monitoring layer.
///
/// `on_block_discovered` and `on_image_loaded` are serialized by the monitoring
/// layer. The other callbacks may run concurrently, but never concurrently for
/// the same thread id.
pub trait ExecutionObserver {
    fn on_block_discovered(
        &self,
        key: IntervalKey,
        static_instructions: u64,
        image: Option<ImageId>,
    ) -> BlockHandle;
    fn on_block_executed(&self, block: BlockHandle, tid: u32) -> anyhow::Result<()>;
    fn on_memory_access(&self, addr: u64, tid: u32);
    fn on_thread_start(&self, tid: u32);
    fn on_thread_end(&self, tid: u32) -> anyhow::Result<()>;
    fn on_image_loaded(&self, name: &str, low_address: u64) -> anyhow::Result<ImageId>;
    fn on_image_unloaded(&self, image: ImageId);
}

#[derive(Clone, Default)]
enum ThreadSlot {
    /// never seen
    #[default]
    Vacant,
    Profiling(Arc<Mutex<ThreadProfile>>),
    /// output could not be opened, events are dropped
    Skipped,
}

/// Basic block profiler producing per-thread slice vectors
pub struct Profiler {
    config: ProfilerConfig,
    pid: Option<u32>,
    slice_lengths: HashMap<u32, SliceLengths>,
    blocks: RwLock<BlockMap>,
    images: RwLock<ImageRegistry>,
    /// keyed by thread id, only written when a thread starts or thread 0 is
    /// opened for image records
    threads: RwLock<HashMap<u32, ThreadSlot>>,
}

impl Profiler {
    pub fn new(config: ProfilerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let slice_lengths = config.load_slice_lengths()?;
        let pid = config.use_pid.then(std::process::id);
        info!(
            "Profiling with slice size {}, ldv {}, output {}",
            config.slice_size, config.ldv, config.output
        );
        Ok(Self {
            blocks: RwLock::new(BlockMap::new(!config.emit_previous_block_counts)),
            images: RwLock::new(ImageRegistry::default()),
            threads: RwLock::new(HashMap::new()),
            config,
            pid,
            slice_lengths,
        })
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn find_containing(&self, addr: u64) -> Option<BlockHandle> {
        self.blocks.read().find_containing(addr)
    }

    pub fn find_overlap(&self, key: &IntervalKey) -> Option<BlockHandle> {
        self.blocks.read().find_overlap(key)
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn num_images(&self) -> usize {
        self.images.read().len()
    }

    fn slot(&self, tid: u32) -> ThreadSlot {
        self.threads.read().get(&tid).cloned().unwrap_or_default()
    }

    /// Slot of a thread that must have been started
    fn started(&self, tid: u32) -> Option<Arc<Mutex<ThreadProfile>>> {
        match self.slot(tid) {
            ThreadSlot::Profiling(profile) => Some(profile),
            ThreadSlot::Skipped => None,
            ThreadSlot::Vacant => panic!("event for thread {} before thread start", tid),
        }
    }

    fn open_profile(&self, tid: u32) -> ThreadSlot {
        let path = self.config.output_path(self.pid, tid);
        match File::create(&path) {
            Ok(file) => {
                info!("Writing profile of thread {} to {}", tid, path.display());
                let out: Box<dyn Write + Send> = Box::new(BufWriter::new(file));
                let lengths = self.slice_lengths.get(&tid).cloned();
                ThreadSlot::Profiling(Arc::new(Mutex::new(ThreadProfile::new(
                    tid,
                    out,
                    &self.config,
                    lengths,
                ))))
            }
            Err(err) => {
                error!(
                    "Could not open {} for thread {}, skipping it: {}",
                    path.display(),
                    tid,
                    err
                );
                ThreadSlot::Skipped
            }
        }
    }

    /// Returns the slot of `tid`, opening its output if it was never seen
    fn open_slot(&self, tid: u32) -> ThreadSlot {
        self.threads
            .write()
            .entry(tid)
            .or_insert_with(|| self.open_profile(tid))
            .clone()
    }
}

impl ExecutionObserver for Profiler {
    fn on_block_discovered(
        &self,
        key: IntervalKey,
        static_instructions: u64,
        image: Option<ImageId>,
    ) -> BlockHandle {
        self.blocks
            .write()
            .insert_or_get(key, static_instructions, image)
    }

    fn on_block_executed(&self, block: BlockHandle, tid: u32) -> anyhow::Result<()> {
        let Some(profile) = self.started(tid) else {
            return Ok(());
        };
        let mut profile = profile.lock();
        assert!(
            profile.state() == ThreadState::Active,
            "block executed on thread {} in state {:?}",
            tid,
            profile.state()
        );
        let blocks = self.blocks.read();
        if profile.execute(block, &blocks) {
            let images = self.images.read();
            let ctx = SliceContext {
                config: &self.config,
                blocks: &blocks,
                images: &images,
            };
            profile.end_slice(block, &ctx)?;
        }
        Ok(())
    }

    fn on_memory_access(&self, addr: u64, tid: u32) {
        trace!("Thread {} accessed 0x{:x}", tid, addr);
        let Some(profile) = self.started(tid) else {
            return;
        };
        let mut profile = profile.lock();
        assert!(
            profile.state() == ThreadState::Active,
            "memory access on thread {} in state {:?}",
            tid,
            profile.state()
        );
        profile.access_memory(addr);
    }

    fn on_thread_start(&self, tid: u32) {
        info!("Thread {} started", tid);
        // a finished thread id may be reused, it gets a fresh profile
        let finished = match self.slot(tid) {
            ThreadSlot::Profiling(profile) => profile.lock().state() == ThreadState::Finished,
            ThreadSlot::Skipped => true,
            ThreadSlot::Vacant => false,
        };
        if finished {
            let fresh = self.open_profile(tid);
            self.threads.write().insert(tid, fresh);
        }
        if let ThreadSlot::Profiling(profile) = self.open_slot(tid) {
            profile.lock().start();
        }
    }

    fn on_thread_end(&self, tid: u32) -> anyhow::Result<()> {
        info!("Thread {} finished", tid);
        let Some(profile) = self.started(tid) else {
            return Ok(());
        };
        let mut profile = profile.lock();
        let blocks = self.blocks.read();
        let images = self.images.read();
        let ctx = SliceContext {
            config: &self.config,
            blocks: &blocks,
            images: &images,
        };
        profile.finish(&ctx)?;
        info!(
            "Thread {} executed {} instructions",
            tid,
            profile.global_instruction_count()
        );
        Ok(())
    }

    fn on_image_loaded(&self, name: &str, low_address: u64) -> anyhow::Result<ImageId> {
        let id = self.images.write().add(name, low_address);
        info!("Loaded image {:?} {} at 0x{:x}", id, name, low_address);
        // image records go to the profile of thread 0
        if let ThreadSlot::Profiling(profile) = self.open_slot(0) {
            profile.lock().write_image_record(name, low_address)?;
        }
        Ok(id)
    }

    fn on_image_unloaded(&self, image: ImageId) {
        info!("Unloaded image {:?}", image);
        self.images.write().mark_unloaded(image);
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        BbProfile, BlockHandle, ExecutionObserver, ImageId, IntervalKey, LdvMode, Profiler,
        ProfilerConfig,
    };
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn new_profiler(
        dir: &TempDir,
        slice_size: u64,
        f: impl FnOnce(&mut ProfilerConfig),
    ) -> Profiler {
        let mut config = ProfilerConfig {
            output: dir.path().join("out").display().to_string(),
            slice_size,
            command_line: " app --run".to_string(),
            ..Default::default()
        };
        f(&mut config);
        Profiler::new(config).unwrap()
    }

    fn read_profile(profiler: &Profiler, tid: u32) -> BbProfile {
        BbProfile::read(profiler.config().output_path(None, tid)).unwrap()
    }

    fn read_text(profiler: &Profiler, tid: u32) -> String {
        std::fs::read_to_string(profiler.config().output_path(None, tid)).unwrap()
    }

    /// blocks of 40, 30 and 50 instructions inside image 0
    fn three_blocks(profiler: &Profiler) -> Vec<BlockHandle> {
        let image = profiler.on_image_loaded("/bin/app", 0x1000).unwrap();
        vec![
            profiler.on_block_discovered(IntervalKey::new(0x1000, 0x1027, 0x2a), 40, Some(image)),
            profiler.on_block_discovered(IntervalKey::new(0x1028, 0x1045, 0x20), 30, Some(image)),
            profiler.on_block_discovered(IntervalKey::new(0x1046, 0x1077, 0x34), 50, Some(image)),
        ]
    }

    fn run(profiler: &Profiler, tid: u32, blocks: &[BlockHandle], trace: &[usize]) {
        profiler.on_thread_start(tid);
        for index in trace {
            profiler.on_block_executed(blocks[*index], tid).unwrap();
        }
        profiler.on_thread_end(tid).unwrap();
    }

    /// instructions per block start address, over all slices
    fn totals_by_address(profile: &BbProfile) -> BTreeMap<u64, u64> {
        let starts: BTreeMap<u32, u64> = profile.blocks.iter().map(|b| (b.id, b.start)).collect();
        profile
            .block_totals()
            .into_iter()
            .map(|(id, count)| (starts[&id], count))
            .collect()
    }

    #[test]
    fn test_first_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |_| {});
        let blocks = three_blocks(&profiler);
        run(&profiler, 0, &blocks, &[0, 1, 2]);

        let profile = read_profile(&profiler, 0);
        assert_eq!(profile.tid, Some(0));
        assert_eq!(profile.command.as_deref(), Some(" app --run"));
        assert_eq!(profile.images, vec![("/bin/app".to_string(), 0x1000)]);
        let start = profile.start_marker.as_ref().unwrap();
        assert_eq!((start.addr, start.count), (0x1000, 1));

        assert_eq!(profile.slices.len(), 2);
        assert_eq!(profile.slices[0].end_instruction, 70);
        assert_eq!(profile.slices[0].blocks, vec![(1, 40), (2, 30)]);
        let marker = profile.slices[0].end_marker.as_ref().unwrap();
        assert_eq!(marker.addr, 0x1045);
        assert_eq!(marker.count, 1);
        assert_eq!(marker.image, Some(("/bin/app".to_string(), 0x1000)));

        // last partial slice ends at the last executed block
        assert_eq!(profile.slices[1].end_instruction, 120);
        assert_eq!(profile.slices[1].blocks, vec![(3, 50)]);
        assert_eq!(profile.slices[1].end_marker.as_ref().unwrap().addr, 0x1077);

        assert_eq!(profile.dynamic_instruction_count, Some(120));
        assert_eq!(profile.slice_size, Some(60));
        assert_eq!(profile.blocks.len(), 3);
        assert_eq!(profile.blocks[0].start, 0x1000);
        assert_eq!(profile.blocks[0].end, 0x1027);
        assert_eq!(profile.blocks[0].size, 0x2a);
        assert_eq!(profile.blocks[2].static_instructions, 50);
        assert!(profile.blocks.iter().all(|b| b.block_count == 1));
        assert!(profile.complete);

        let text = read_text(&profiler, 0);
        assert!(text.contains("S: 0x1045 1 /bin/app 0x1000 + 0x45\n"));
        assert!(text.ends_with("End of bb\n"));
    }

    #[test]
    fn test_totals_and_monotonic_slices() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 100, |_| {});
        let blocks = three_blocks(&profiler);
        let trace: Vec<usize> = (0..500).map(|i| (i * i + i / 7) % 3).collect();
        run(&profiler, 0, &blocks, &trace);

        let profile = read_profile(&profiler, 0);
        let statics = [40u64, 30, 50];
        let mut expected = BTreeMap::new();
        for index in &trace {
            *expected.entry(index + 1).or_insert(0u64) += statics[*index];
        }
        let expected: BTreeMap<u32, u64> =
            expected.into_iter().map(|(k, v)| (k as u32, v)).collect();
        assert_eq!(profile.block_totals(), expected);

        let ends: Vec<u64> = profile.slices.iter().map(|s| s.end_instruction).collect();
        assert!(ends.windows(2).all(|w| w[0] < w[1]), "{:?}", ends);
        let total: u64 = expected.values().sum();
        assert_eq!(*ends.last().unwrap(), total);
        assert_eq!(profile.dynamic_instruction_count, Some(total));

        // overshoot of a boundary block is charged to the next slice
        for (i, end) in ends[..ends.len() - 1].iter().enumerate() {
            assert!(*end > 100 * (i as u64 + 1), "{:?}", ends);
            assert!(*end <= 100 * (i as u64 + 1) + 50, "{:?}", ends);
        }
    }

    #[test]
    fn test_previous_block_counts() {
        let trace = [2, 0, 1, 0, 1, 2, 2, 0, 1, 1, 2, 0];

        let dir = tempfile::tempdir().unwrap();
        let plain = new_profiler(&dir, 70, |_| {});
        let blocks = three_blocks(&plain);
        run(&plain, 0, &blocks, &trace);
        let plain_profile = read_profile(&plain, 0);

        let dir = tempfile::tempdir().unwrap();
        let tracking = new_profiler(&dir, 70, |c| c.emit_previous_block_counts = true);
        let blocks = three_blocks(&tracking);
        run(&tracking, 0, &blocks, &trace);
        let tracking_profile = read_profile(&tracking, 0);

        assert_eq!(
            totals_by_address(&plain_profile),
            totals_by_address(&tracking_profile)
        );
        assert!(plain_profile.blocks.iter().all(|b| b.predecessors.is_empty()));

        // ids follow first execution: block 2 ran first
        let ids: Vec<(u32, u64)> = tracking_profile
            .blocks
            .iter()
            .map(|b| (b.id, b.start))
            .collect();
        assert_eq!(ids, vec![(1, 0x1046), (2, 0x1000), (3, 0x1028)]);
        assert_eq!(tracking_profile.slices[0].blocks[0], (2, 40));

        // block 0x1046 (id 1): first block, then after 1 (id 3) twice, after itself once
        assert_eq!(
            tracking_profile.blocks[0].predecessors,
            vec![(0, 1), (1, 1), (3, 2)]
        );
        let text = read_text(&tracking, 0);
        assert!(text.contains("previous-block counts: ( 0:1 1:1 3:2 )"));
    }

    #[test]
    fn test_emit_last() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |c| c.emit_last = false);
        let blocks = three_blocks(&profiler);
        run(&profiler, 0, &blocks, &[0, 1, 2]);
        let without = read_profile(&profiler, 0);
        assert_eq!(without.slices.len(), 1);
        // counts of the dropped slice are not part of the summary
        assert_eq!(without.dynamic_instruction_count, Some(70));
        assert_eq!(without.blocks.len(), 2);

        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |_| {});
        let blocks = three_blocks(&profiler);
        run(&profiler, 0, &blocks, &[0, 1, 2]);
        let with = read_profile(&profiler, 0);
        assert_eq!(with.slices.len(), without.slices.len() + 1);

        // nothing executed since the last boundary
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |_| {});
        let blocks = three_blocks(&profiler);
        run(&profiler, 0, &blocks, &[0, 1]);
        assert_eq!(read_profile(&profiler, 0).slices.len(), 1);
    }

    #[test]
    fn test_emit_first_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |c| c.emit_first = false);
        let blocks = three_blocks(&profiler);
        run(&profiler, 0, &blocks, &[0, 1, 2]);

        let profile = read_profile(&profiler, 0);
        assert_eq!(profile.slices.len(), 2);
        assert!(profile.slices[0].blocks.is_empty());
        // the first slice carries into the second
        assert_eq!(profile.slices[1].blocks, vec![(1, 40), (2, 30), (3, 50)]);
        assert_eq!(profile.total_instructions(), 120);
    }

    #[test]
    fn test_markers() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |c| c.symbolic = false);
        let blocks = three_blocks(&profiler);
        run(&profiler, 0, &blocks, &[0, 1, 2]);
        let text = read_text(&profiler, 0);
        assert!(text.contains("M: 0x1045 1\n"));
        assert!(!text.contains("S: "));

        // blocks outside any image
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 10, |_| {});
        let key = IntervalKey::new(0x9000, 0x900f, 16);
        let block = profiler.on_block_discovered(key, 11, None);
        run(&profiler, 3, &[block], &[0, 0]);
        let profile = read_profile(&profiler, 3);
        let marker = profile.slices[0].end_marker.as_ref().unwrap();
        assert_eq!((marker.addr, marker.count, marker.image.clone()), (0x900f, 1, None));
        // second execution ended the last slice, the marker counts both
        assert_eq!(profile.slices[1].end_marker.as_ref().unwrap().count, 2);
        assert!(read_text(&profiler, 3).contains("M: 0x900f 1 no_image 0\n"));
    }

    #[test]
    fn test_reuse_histogram() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 10, |c| c.ldv = LdvMode::Exact);
        let key = IntervalKey::new(0x2000, 0x200f, 16);
        let block = profiler.on_block_discovered(key, 4, None);
        profiler.on_thread_start(0);
        profiler.on_block_executed(block, 0).unwrap();
        for addr in [0x8000, 0x8008, 0x8010] {
            profiler.on_memory_access(addr, 0);
        }
        for _ in 0..5 {
            profiler.on_block_executed(block, 0).unwrap();
        }
        profiler.on_thread_end(0).unwrap();

        let profile = read_profile(&profiler, 0);
        assert_eq!(profile.slices.len(), 2);
        // one cold miss, then the same line twice
        assert_eq!(profile.slices[0].ldv, vec![(0, 2), (30, 1)]);
        assert!(profile.slices[1].ldv.is_empty());
    }

    #[test]
    fn test_slice_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let lengths = dir.path().join("lengths.txt");
        std::fs::write(&lengths, "# regions\n30\n50\n").unwrap();
        let profiler = new_profiler(&dir, 1000, |c| {
            c.length_files = vec![format!("{}:tid0", lengths.display())]
        });
        let key = IntervalKey::new(0x3000, 0x3009, 10);
        let block = profiler.on_block_discovered(key, 10, None);
        run(&profiler, 0, &[block], &[0; 12]);

        let profile = read_profile(&profiler, 0);
        let ends: Vec<u64> = profile.slices.iter().map(|s| s.end_instruction).collect();
        assert_eq!(ends, vec![40, 90, 120]);
        let counts: Vec<u64> = profile
            .slices
            .iter()
            .map(|s| s.end_marker.as_ref().unwrap().count)
            .collect();
        assert_eq!(counts, vec![4, 9, 12]);
        assert_eq!(profile.slice_size, Some(1000));
    }

    #[test]
    fn test_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProfilerConfig {
            output: dir.path().join("out").display().to_string(),
            length_files: vec!["a.txt".to_string(), "b.txt:tid1".to_string()],
            ..Default::default()
        };
        assert!(Profiler::new(config).is_err());
        let config = ProfilerConfig {
            slice_size: 0,
            ..Default::default()
        };
        assert!(Profiler::new(config).is_err());
    }

    #[test]
    fn test_threads() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 100, |_| {});
        let blocks = three_blocks(&profiler);

        std::thread::scope(|s| {
            for tid in 1..=4u32 {
                let profiler = &profiler;
                let blocks = &blocks;
                s.spawn(move || {
                    let trace: Vec<usize> = (0..200 * tid as usize)
                        .map(|i| (i + tid as usize) % 3)
                        .collect();
                    run(profiler, tid, blocks, &trace);
                });
            }
        });

        for tid in 1..=4u32 {
            let profile = read_profile(&profiler, tid);
            assert_eq!(profile.tid, Some(tid));
            let mut expected = BTreeMap::new();
            for i in 0..200 * tid as usize {
                let index = (i + tid as usize) % 3;
                *expected.entry(index as u32 + 1).or_insert(0u64) += [40, 30, 50][index];
            }
            assert_eq!(profile.block_totals(), expected, "thread {}", tid);
        }
        // image records go to thread 0, which never started
        let text = read_text(&profiler, 0);
        assert_eq!(text, "G: /bin/app LowAddress: 0x1000\n");
    }

    #[test]
    fn test_thread_id_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |_| {});
        let blocks = three_blocks(&profiler);
        run(&profiler, 1, &blocks, &[0, 1, 2]);
        run(&profiler, 1, &blocks, &[2]);
        // the new thread overwrote the profile
        let profile = read_profile(&profiler, 1);
        assert_eq!(profile.total_instructions(), 50);
    }

    #[test]
    #[should_panic]
    fn test_double_start() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |_| {});
        profiler.on_thread_start(1);
        profiler.on_thread_start(1);
    }

    #[test]
    #[should_panic]
    fn test_event_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |_| {});
        let blocks = three_blocks(&profiler);
        let _ = profiler.on_block_executed(blocks[0], 5);
    }

    #[test]
    fn test_unwritable_output_skips_thread() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |c| {
            c.output = dir.path().join("missing").join("out").display().to_string()
        });
        let key = IntervalKey::new(0x100, 0x10f, 16);
        let block = profiler.on_block_discovered(key, 40, None);
        profiler.on_thread_start(2);
        profiler.on_block_executed(block, 2).unwrap();
        profiler.on_block_executed(block, 2).unwrap();
        profiler.on_memory_access(0x40, 2);
        profiler.on_thread_end(2).unwrap();
        assert!(!profiler.config().output_path(None, 2).exists());
        assert_eq!(profiler.on_image_loaded("/bin/app", 0).unwrap(), ImageId(0));
    }

    #[test]
    fn test_block_larger_than_slice() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 10, |_| {});
        let big = profiler.on_block_discovered(IntervalKey::new(0x4000, 0x40c7, 0xc8), 50, None);
        let small = profiler.on_block_discovered(IntervalKey::new(0x5000, 0x5013, 0x14), 5, None);
        profiler.on_thread_start(0);
        for _ in 0..3 {
            profiler.on_block_executed(big, 0).unwrap();
        }
        for _ in 0..30 {
            profiler.on_block_executed(small, 0).unwrap();
        }
        profiler.on_thread_end(0).unwrap();

        let profile = read_profile(&profiler, 0);
        let ends: Vec<u64> = profile.slices.iter().map(|s| s.end_instruction).collect();
        // one boundary per execution, no slicing within the block
        assert_eq!(ends[..3], [50, 100, 150]);
        let big_counts: Vec<u64> = profile.slices[..3]
            .iter()
            .map(|s| s.end_marker.as_ref().unwrap().count)
            .collect();
        assert_eq!(big_counts, vec![1, 2, 3]);
        for slice in &profile.slices[..3] {
            assert_eq!(slice.blocks, vec![(1, 50)]);
        }

        // the carried debt of 110 instructions ends a slice on every small block
        // until it is paid off, then slices are back to 10 instructions
        let mut expected = vec![50, 100, 150];
        expected.extend((1..=23).map(|i| 150 + 5 * i));
        expected.extend([275, 285, 295, 300]);
        assert_eq!(ends, expected);
        assert_eq!(profile.block_totals()[&2], 150);
        assert_eq!(profile.dynamic_instruction_count, Some(300));
    }

    #[test]
    fn test_huge_slice_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProfilerConfig {
            output: dir.path().join("out").display().to_string(),
            slice_size: u64::MAX,
            ..Default::default()
        };
        assert!(Profiler::new(config).is_err());

        // largest accepted size never ends a slice early
        let profiler = new_profiler(&dir, i64::MAX as u64, |_| {});
        let block = profiler.on_block_discovered(IntervalKey::new(0x100, 0x10f, 16), 4, None);
        run(&profiler, 0, &[block], &[0; 5]);
        let profile = read_profile(&profiler, 0);
        assert_eq!(profile.slices.len(), 1);
        assert_eq!(profile.slices[0].end_instruction, 20);
    }

    #[test]
    fn test_large_thread_id() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |_| {});
        let blocks = three_blocks(&profiler);
        run(&profiler, u32::MAX, &blocks, &[0, 1, 2]);
        let profile = read_profile(&profiler, u32::MAX);
        assert_eq!(profile.tid, Some(u32::MAX));
        assert_eq!(profile.total_instructions(), 120);
    }

    #[test]
    #[should_panic]
    fn test_memory_access_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |c| c.ldv = LdvMode::Exact);
        // the image load opens thread 0 before it starts
        three_blocks(&profiler);
        profiler.on_memory_access(0x8000, 0);
    }

    #[test]
    #[should_panic]
    fn test_memory_access_after_end() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = new_profiler(&dir, 60, |c| c.ldv = LdvMode::Exact);
        let blocks = three_blocks(&profiler);
        run(&profiler, 1, &blocks, &[0]);
        profiler.on_memory_access(0x8000, 1);
    }
}
