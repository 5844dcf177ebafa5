pub fn get_tqdm_style() -> anyhow::Result<indicatif::ProgressStyle> {
    Ok(indicatif::ProgressStyle::with_template(
            "{percent:>3}% |{wide_bar}| {pos}/{len} [{elapsed_precise}<{eta_precise}, {custom_per_sec}]",
        )?
        .with_key(
            "custom_per_sec",
            |s: &indicatif::ProgressState, w: &mut dyn std::fmt::Write| {
                let _ = write!(w, "{:.2} MiB/s", s.per_sec() / 1048576.0);
            },
        )
        .progress_chars("██ "))
}

/// Command line of this process, each argument preceded by a space
pub fn get_command_line() -> String {
    std::env::args().map(|arg| format!(" {}", arg)).collect()
}
