//! Measured process execution: one invocation with concurrent CPU and
//! memory sampling.
//!
//! The sampling loop and the exit-wait race each other; the loop stops as
//! soon as the child is observed to have exited, and a final sample at the
//! exit wall time is always recorded. Individual poll failures (the process
//! exited between the existence check and the metric read) are tolerated
//! silently.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ExecError;
use crate::executor::{kill_process_tree, spawn, spawn_drains, Invocation};
use crate::models::MetricSample;

/// Outcome of a sampled run. A timeout is reported in-band with a synthetic
/// exit code instead of an error so captured logs and samples survive.
#[derive(Debug)]
pub struct RunPhase {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub total_cpu_time_ms: u64,
    pub peak_rss_bytes: u64,
    pub samples: Vec<MetricSample>,
    pub timed_out: bool,
}

/// Number of cores used to scale CPU percentages.
pub fn core_count() -> u64 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u64)
        .unwrap_or(1)
}

/// Cumulative CPU time (user + system) of a process in milliseconds.
///
/// Reads `/proc/<pid>/stat`; `None` when the process is already gone.
fn read_cpu_time_ms(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // comm may contain spaces; fields are positional after the last ')'.
    let rest = stat.rsplit_once(')')?.1;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // utime and stime are fields 14 and 15 of stat, i.e. 11 and 12 past comm.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let ticks_per_sec = clock_ticks_per_sec();
    Some((utime + stime) * 1000 / ticks_per_sec)
}

fn clock_ticks_per_sec() -> u64 {
    nix::unistd::sysconf(nix::unistd::SysconfVar::CLK_TCK)
        .ok()
        .flatten()
        .filter(|t| *t > 0)
        .map(|t| t as u64)
        .unwrap_or(100)
}

/// Resident set size of a process in bytes, from `/proc/<pid>/status`.
fn read_rss_bytes(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

/// Run the invocation while polling CPU time and RSS once per
/// `sampling_interval_ms`, bounded by the invocation's timeout.
pub async fn run_with_sampling(
    inv: &Invocation,
    sampling_interval_ms: u64,
) -> Result<RunPhase, ExecError> {
    debug!(
        program = %inv.program,
        args = ?inv.args,
        timeout_ms = inv.timeout_ms(),
        sampling_interval_ms,
        "sampled run start"
    );

    let start = Instant::now();
    let mut child = spawn(inv)?;
    let drains = spawn_drains(&mut child);
    let pid = child.id();

    let cores = core_count() as f64;
    let deadline = tokio::time::Instant::now() + inv.timeout;
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + Duration::from_millis(sampling_interval_ms),
        Duration::from_millis(sampling_interval_ms),
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut samples: Vec<MetricSample> = Vec::new();
    let mut cpu_prev_ms: u64 = 0;
    let mut wall_prev_ms: u64 = 0;
    let mut last_seen_cpu_ms: u64 = 0;
    let mut peak_rss: u64 = 0;
    let mut last_rss: u64 = 0;

    enum LoopEnd {
        Exited(std::io::Result<std::process::ExitStatus>),
        TimedOut,
    }

    let end = loop {
        tokio::select! {
            status = child.wait() => {
                break LoopEnd::Exited(status);
            }
            _ = tokio::time::sleep_until(deadline) => {
                break LoopEnd::TimedOut;
            }
            _ = ticker.tick() => {
                let Some(pid) = pid else { continue };
                let wall_now_ms = start.elapsed().as_millis() as u64;

                // Both reads race process exit; a miss skips the tick.
                let Some(cpu_now_ms) = read_cpu_time_ms(pid) else { continue };
                last_seen_cpu_ms = last_seen_cpu_ms.max(cpu_now_ms);
                let rss = read_rss_bytes(pid).unwrap_or(0);
                peak_rss = peak_rss.max(rss);
                last_rss = rss;

                let cpu_delta = cpu_now_ms.saturating_sub(cpu_prev_ms) as f64;
                let wall_delta = wall_now_ms.saturating_sub(wall_prev_ms) as f64;
                // Clamp at zero to absorb clock-skew noise between reads.
                let cpu_pct = if wall_delta > 0.0 {
                    (cpu_delta / wall_delta * cores * 100.0).max(0.0)
                } else {
                    0.0
                };

                samples.push(MetricSample { t: wall_now_ms, cpu_pct, rss_bytes: rss });
                cpu_prev_ms = cpu_now_ms;
                wall_prev_ms = wall_now_ms;
            }
        }
    };

    let exit_status = match end {
        LoopEnd::Exited(status) => status,
        LoopEnd::TimedOut => {
            // Grab the last CPU reading while the process still exists.
            if let Some(pid) = pid {
                if let Some(cpu) = read_cpu_time_ms(pid) {
                    last_seen_cpu_ms = last_seen_cpu_ms.max(cpu);
                }
            }
            kill_process_tree(&mut child).await;
            warn!(
                program = %inv.program,
                timeout_ms = inv.timeout_ms(),
                samples = samples.len(),
                "sampled run timeout, process tree killed"
            );
            let (stdout, mut stderr) = drains.join().await;
            stderr.push_str(&format!("\nTimeout after {} ms", inv.timeout_ms()));
            let duration_ms = start.elapsed().as_millis() as u64;
            return Ok(RunPhase {
                exit_code: -1,
                stdout,
                stderr,
                duration_ms,
                total_cpu_time_ms: last_seen_cpu_ms,
                peak_rss_bytes: peak_rss,
                samples,
                timed_out: true,
            });
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let (stdout, stderr) = drains.join().await;

    let status = exit_status.map_err(|e| ExecError::Io {
        program: inv.program.clone(),
        source: e,
    })?;
    let exit_code = status.code().unwrap_or(-1);

    // Guarantee a data point at or after process end even if sampling
    // missed it.
    if samples.last().map(|s| s.t < duration_ms).unwrap_or(true) {
        samples.push(MetricSample {
            t: duration_ms,
            cpu_pct: 0.0,
            rss_bytes: last_rss,
        });
    }

    debug!(
        program = %inv.program,
        exit_code,
        duration_ms,
        total_cpu_time_ms = last_seen_cpu_ms,
        samples = samples.len(),
        "sampled run end"
    );

    Ok(RunPhase {
        exit_code,
        stdout,
        stderr,
        duration_ms,
        total_cpu_time_ms: last_seen_cpu_ms,
        peak_rss_bytes: peak_rss,
        samples,
        timed_out: false,
    })
}
