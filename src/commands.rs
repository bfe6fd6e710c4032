use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};
use segdl::utils::default_file_name;
use segdl::{
    DownloadCoordinator, DownloadError, DownloadRequest, DownloadSummary, ProgressState, Resource,
};
use tokio::task::JoinHandle;

use crate::cli::Args;

pub async fn run_download(args: Args) -> Result<()> {
    let resource = Resource::parse(&args.url, args.credentials())?;
    let destination = match &args.output {
        Some(path) => path.clone(),
        None => default_file_name(&resource).into(),
    };
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let request = DownloadRequest {
        resource,
        destination,
    };
    let coordinator = DownloadCoordinator::new(args.options());

    let token = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping segments");
            token.cancel();
        }
    });

    let pb = progress_bar(args.no_progress || args.json);
    let monitor = spawn_monitor(coordinator.progress(), pb.clone());

    let result = coordinator.run(&request).await;
    monitor.abort();

    match result {
        Ok(summary) => {
            pb.finish_and_clear();
            print_summary(&summary, args.json)?;
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            report_failure(&e, &request);
            Err(e.into())
        }
    }
}

fn progress_bar(hidden: bool) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if hidden {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return pb;
    }
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb
}

/// Mirrors the shared counters into the progress bar until aborted.
fn spawn_monitor(progress: ProgressState, pb: ProgressBar) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let total = progress.total();
            if total > 0 && pb.length() != Some(total) {
                pb.set_length(total);
            }
            pb.set_position(progress.position());
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
}

fn print_summary(summary: &DownloadSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    if summary.segments == 0 {
        println!(
            "{} is already complete ({})",
            summary.destination.display(),
            HumanBytes(summary.total_size)
        );
        return Ok(());
    }

    println!(
        "Downloaded {} to {} ({} in {:.2}s, {}/s)",
        summary.url,
        summary.destination.display(),
        HumanBytes(summary.bytes_transferred),
        summary.elapsed_secs,
        HumanBytes(summary.bytes_per_second as u64),
    );
    if summary.resumed_from > 0 {
        println!("Resumed after {}", HumanBytes(summary.resumed_from));
    }
    Ok(())
}

fn report_failure(error: &DownloadError, request: &DownloadRequest) {
    match error {
        DownloadError::SegmentsFailed(failures) => {
            for failure in failures {
                tracing::debug!(index = failure.index, bytes = failure.bytes_written, error = ?failure.error, "segment failure");
            }
            eprintln!(
                "Completed segments were kept; rerun with --continue to resume {}",
                request.destination.display()
            );
        }
        DownloadError::Cancelled => {
            eprintln!(
                "Stopped; rerun with --continue to resume {}",
                request.destination.display()
            );
        }
        e if e.is_fatal() => {
            eprintln!("Nothing was written to {}", request.destination.display());
        }
        _ => {}
    }
}
