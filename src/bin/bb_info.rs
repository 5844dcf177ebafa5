//! Display statistics of a basic block profile
use bbv_profiler::BbProfile;
use clap::Parser;
use cli_table::{Cell, Table, print_stdout};
use std::{collections::HashMap, path::PathBuf};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to .bb file
    profile: PathBuf,

    /// Number of blocks to list
    #[arg(short, long, default_value = "10")]
    top: usize,

    /// Dump the parsed profile as json instead
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();
    let profile = BbProfile::read(&args.profile)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }

    if let Some(tid) = profile.tid {
        println!("Thread {}", tid);
    }
    if let Some(command) = &profile.command {
        println!("Command:{}", command);
    }
    for (name, low_address) in &profile.images {
        println!("Image {} at 0x{:x}", name, low_address);
    }
    println!(
        "Got {} slices and {} executed blocks{}",
        profile.slices.len(),
        profile.blocks.len(),
        if profile.complete { "" } else { " (truncated)" }
    );

    let total_instructions = profile.total_instructions();
    println!("Instructions in slice vectors: {}", total_instructions);
    if let Some(count) = profile.dynamic_instruction_count {
        println!("Dynamic instruction count: {}", count);
    }
    if let Some(size) = profile.slice_size {
        println!("Slice size: {}", size);
    }
    let ldv_slices = profile.slices.iter().filter(|s| !s.ldv.is_empty()).count();
    if ldv_slices > 0 {
        let mut buckets = [0u64; 32];
        for slice in &profile.slices {
            for (bucket, count) in &slice.ldv {
                buckets[(*bucket as usize).min(31)] += count;
            }
        }
        println!("Reuse distance buckets over {} slices:", ldv_slices);
        for (bucket, count) in buckets.iter().enumerate() {
            if *count > 0 {
                println!("- bucket {}: {}", bucket, count);
            }
        }
    }

    println!("Top blocks by instruction count:");
    let summaries: HashMap<u32, _> = profile.blocks.iter().map(|b| (b.id, b)).collect();
    let mut items: Vec<(u32, u64)> = profile.block_totals().into_iter().collect();
    items.sort_by_key(|(_, count)| *count);
    let mut table = vec![];
    for (id, count) in items.iter().rev().take(args.top) {
        let range = match summaries.get(id) {
            Some(summary) => format!("0x{:08x}:0x{:08x}", summary.start, summary.end),
            None => "?".to_string(),
        };
        table.push(vec![
            id.cell(),
            range.cell(),
            count.cell(),
            format!(
                "{:.2}",
                *count as f64 * 100.0 / total_instructions.max(1) as f64
            )
            .cell(),
        ]);
    }
    let table = table.table().title(vec![
        "Block Id".cell(),
        "Address Range".cell(),
        "Instructions".cell(),
        "Share (%)".cell(),
    ]);
    print_stdout(table)?;

    Ok(())
}
