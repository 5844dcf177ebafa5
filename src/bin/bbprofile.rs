//! Replay a monitoring event log and write basic block profiles for SimPoint
use bbv_profiler::{
    EventLogDecoder, LdvMode, Profiler, ProfilerConfig, get_command_line, get_tqdm_style,
    replay_event,
};
use clap::{Parser, ValueEnum};
use log::info;
use std::{fs::File, path::PathBuf};

#[derive(Copy, Clone, ValueEnum)]
enum Ldv {
    /// No LRU stack distance vectors
    None,
    /// Logarithmic buckets with random replacement
    Approx,
    /// Exact stack distances
    Exact,
}

impl From<Ldv> for LdvMode {
    fn from(value: Ldv) -> Self {
        match value {
            Ldv::None => LdvMode::None,
            Ldv::Approx => LdvMode::Approx,
            Ldv::Exact => LdvMode::Exact,
        }
    }
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to event log
    event_path: PathBuf,

    /// Load profiler configuration from a json file, flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output base name, e.g.,
    /// thread 0 goes to: {output}.T.0.bb
    #[arg(short, long)]
    output: Option<String>,

    /// Slice size in instructions
    #[arg(short, long)]
    slice_size: Option<u64>,

    /// Do not emit symbolic information for markers
    #[arg(long)]
    nosymbolic: bool,

    /// Do not emit the first slice
    #[arg(long)]
    no_emit_first: bool,

    /// Do not emit the last slice when it is shorter than the slice size
    #[arg(long)]
    no_emit_last: bool,

    /// Emit execution counts of preceding blocks in ( blk:count ... ) format
    #[arg(long)]
    emit_previous_block_counts: bool,

    /// Collect LRU stack distance vectors
    #[arg(long, value_enum)]
    ldv_type: Option<Ldv>,

    /// Use PID for naming files
    #[arg(long)]
    pid: bool,

    /// Length (instruction count) of slices, one file per thread with a
    /// ':tidN' suffix, may be repeated
    #[arg(long)]
    lengthfile: Vec<String>,
}

impl Cli {
    fn profiler_config(&self) -> anyhow::Result<ProfilerConfig> {
        let mut config = match &self.config {
            Some(path) => ProfilerConfig::from_json_file(path)?,
            None => ProfilerConfig::default(),
        };
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(slice_size) = self.slice_size {
            config.slice_size = slice_size;
        }
        if self.nosymbolic {
            config.symbolic = false;
        }
        if self.no_emit_first {
            config.emit_first = false;
        }
        if self.no_emit_last {
            config.emit_last = false;
        }
        if self.emit_previous_block_counts {
            config.emit_previous_block_counts = true;
        }
        if let Some(ldv) = self.ldv_type {
            config.ldv = ldv.into();
        }
        if self.pid {
            config.use_pid = true;
        }
        if !self.lengthfile.is_empty() {
            config.length_files = self.lengthfile.clone();
        }
        config.command_line = get_command_line();
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();
    let config = args.profiler_config()?;
    let profiler = Profiler::new(config)?;

    let file = File::open(&args.event_path)?;
    println!("Replaying events from {}", args.event_path.display());

    // progress follows the compressed bytes consumed
    let pbar = indicatif::ProgressBar::new(file.metadata()?.len());
    pbar.set_style(get_tqdm_style()?);

    let mut num_events: u64 = 0;
    for event in EventLogDecoder::open(pbar.wrap_read(file))? {
        replay_event(&profiler, &event?)?;
        num_events += 1;
    }
    pbar.finish();

    info!("Replayed {} events", num_events);
    println!(
        "Replayed {} events, {} blocks, {} images, profiles written to {}.T.*.bb",
        num_events,
        profiler.num_blocks(),
        profiler.num_images(),
        profiler.config().output
    );
    Ok(())
}
