use clap::Parser;
use driftsync::config::Args;
use driftsync::events::{EventSink, ProgressEvent};
use driftsync::ignore::{Matcher, PatternMatcher};
use driftsync::scanner::{walk, ScanConfig};
use driftsync::version::ShortId;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Drives the progress bar from scan progress events.
struct BarSink {
    bar: ProgressBar,
}

impl EventSink for BarSink {
    fn scan_progress(&self, event: ProgressEvent) {
        self.bar.set_length(event.total);
        self.bar.set_position(event.current);
        self.bar
            .set_message(format!("{:.1} MiB/s", event.rate / (1024.0 * 1024.0)));
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    // Descriptors go to stdout, so logging must go to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let matcher: Option<Arc<dyn Matcher>> = if args.exclude.is_empty() {
        None
    } else {
        Some(Arc::new(PatternMatcher::new(&args.exclude)?))
    };

    let (bar, events) = if args.progress {
        let bar = ProgressBar::new(1);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap(),
        );
        (
            Some(bar.clone()),
            Some(Arc::new(BarSink { bar }) as Arc<dyn EventSink>),
        )
    } else {
        (None, None)
    };

    let config = ScanConfig {
        folder: args.dir.display().to_string(),
        dir: args.dir.clone(),
        subs: args.sub.clone(),
        block_size: args.block_size,
        matcher,
        temp_lifetime: Duration::from_secs(args.temp_lifetime * 3600),
        ignore_perms: args.ignore_perms,
        auto_normalize: args.auto_normalize,
        hashers: args.hashers,
        short_id: ShortId(args.id),
        progress_tick_interval_s: args.progress_interval,
        use_weak_hashes: args.weak_hashes,
        follow_symlinks: args.follow_symlink.clone(),
        events,
        ..ScanConfig::default()
    };

    info!("Scanning {:?}...", args.dir);
    let entries = match walk(config) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Scan failed: {}", e);
            std::process::exit(1);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut changed = 0usize;
    for entry in entries.iter() {
        serde_json::to_writer(&mut out, &entry)?;
        writeln!(out)?;
        changed += 1;
    }

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    info!("Scan complete: {} changed entries.", changed);

    Ok(())
}
