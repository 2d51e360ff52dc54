//! Command handlers and their human-readable output.

use std::io::Write;

use anyhow::{Context, Result};

use queuectl_core::{Job, JobId};
use queuectl_infra::{JobStore, Queue, QueueStatus, WorkerPool, WorkerState};

const RULE: &str = "----------------------------------------";

pub fn enqueue<S: JobStore + 'static>(
    queue: &Queue<S>,
    input: &str,
    out: &mut impl Write,
) -> Result<()> {
    let job = queue.enqueue(input).context("failed to enqueue job")?;
    writeln!(out, "Enqueued job: {}", job.id)?;
    Ok(())
}

/// Runs in the foreground until a stop request or Ctrl+C drains the pool.
pub fn worker_start<S: JobStore + 'static>(
    pool: &WorkerPool<S>,
    count: usize,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(
        out,
        "Started {count} worker(s). Run 'queuectl worker stop' or press Ctrl+C to stop them."
    )?;
    out.flush()?;

    let report = pool.start(count).context("worker pool failed")?;
    let totals = &report.totals;
    writeln!(
        out,
        "All workers stopped: {} completed, {} requeued, {} dead-lettered.",
        totals.completed, totals.requeued, totals.dead_lettered
    )?;
    if totals.lost > 0 {
        writeln!(
            out,
            "{} finished job(s) could not be recorded; see the error log.",
            totals.lost
        )?;
    }
    Ok(())
}

pub fn worker_stop<S: JobStore + 'static>(queue: &Queue<S>, out: &mut impl Write) -> Result<()> {
    queue.stop_workers().context("failed to send stop signal")?;
    writeln!(out, "Stop signal sent; workers finish their current job and exit.")?;
    Ok(())
}

pub fn status<S: JobStore + 'static>(queue: &Queue<S>, out: &mut impl Write) -> Result<()> {
    render_status(&queue.status(), out)
}

fn render_status(status: &QueueStatus, out: &mut impl Write) -> Result<()> {
    writeln!(out, "Queue status")?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "Pending jobs   : {}", status.pending)?;
    writeln!(out, "Processed jobs : {}", status.processed)?;
    writeln!(out, "Failed jobs    : {}", status.failed)?;
    match (&status.activity, status.workers) {
        (Some(activity), WorkerState::Running | WorkerState::Stopping) => writeln!(
            out,
            "Worker state   : {} ({} worker(s), pid {}, since {})",
            status.workers,
            activity.workers,
            activity.pid,
            activity.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?,
        _ => writeln!(out, "Worker state   : {}", status.workers)?,
    }
    writeln!(out, "{RULE}")?;
    if !status.pending_jobs.is_empty() {
        writeln!(out, "Pending job details:")?;
        for job in &status.pending_jobs {
            writeln!(out, "  - {} -> {}", job.id, job.command)?;
        }
        writeln!(out, "{RULE}")?;
    }
    Ok(())
}

pub fn list<S: JobStore + 'static>(
    queue: &Queue<S>,
    state: &str,
    out: &mut impl Write,
) -> Result<()> {
    let jobs = queue.list(state)?;
    writeln!(out, "Jobs ({})", state.to_uppercase())?;
    writeln!(out, "{RULE}")?;
    if jobs.is_empty() {
        writeln!(out, "No jobs found.")?;
    }
    for job in &jobs {
        writeln!(out, "{}", job_line(job))?;
    }
    writeln!(out, "{RULE}")?;
    Ok(())
}

pub fn dlq_list<S: JobStore + 'static>(queue: &Queue<S>, out: &mut impl Write) -> Result<()> {
    let jobs = queue.dlq().list();
    writeln!(out, "Dead-letter queue")?;
    writeln!(out, "{RULE}")?;
    if jobs.is_empty() {
        writeln!(out, "No jobs in the dead-letter queue.")?;
    }
    for job in &jobs {
        match job.last_error() {
            Some(err) => writeln!(out, "{} | error: {err}", job_line(job))?,
            None => writeln!(out, "{}", job_line(job))?,
        }
    }
    writeln!(out, "{RULE}")?;
    Ok(())
}

pub fn dlq_retry<S: JobStore + 'static>(
    queue: &Queue<S>,
    job_id: &str,
    out: &mut impl Write,
) -> Result<()> {
    let job = queue.dlq().retry(&JobId::from(job_id))?;
    writeln!(out, "Job '{}' moved back to the queue for retry.", job.id)?;
    Ok(())
}

pub fn dlq_discard<S: JobStore + 'static>(
    queue: &Queue<S>,
    job_id: &str,
    out: &mut impl Write,
) -> Result<()> {
    let job = queue.dlq().discard(&JobId::from(job_id))?;
    writeln!(out, "Job '{}' removed from the dead-letter queue.", job.id)?;
    Ok(())
}

pub fn config_show<S: JobStore + 'static>(queue: &Queue<S>, out: &mut impl Write) -> Result<()> {
    let config = queue.config().show().context("failed to read configuration")?;
    writeln!(out, "Current configuration")?;
    writeln!(out, "{RULE}")?;
    for (key, value) in config.entries() {
        writeln!(out, "{key}: {value}")?;
    }
    writeln!(out, "{RULE}")?;
    Ok(())
}

pub fn config_get<S: JobStore + 'static>(
    queue: &Queue<S>,
    key: &str,
    out: &mut impl Write,
) -> Result<()> {
    let value = queue.config().get(key)?;
    writeln!(out, "{key}: {value}")?;
    Ok(())
}

pub fn config_set<S: JobStore + 'static>(
    queue: &Queue<S>,
    key: &str,
    value: &str,
    out: &mut impl Write,
) -> Result<()> {
    let config = queue.config().set(key, value)?;
    writeln!(out, "Config updated: {key} = {}", config.get(key)?)?;
    Ok(())
}

fn job_line(job: &Job) -> String {
    format!(
        "- {} | {} | retries: {}",
        job.id, job.command, job.retries
    )
}
