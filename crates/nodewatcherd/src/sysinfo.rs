//! System metrics from /proc and uname

use crate::error::{NodewatcherError, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// USER_HZ; /proc/stat counts in these ticks
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// Memory figures in kB as printed by /proc/meminfo
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub buffers: u64,
    pub cached: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub runnable: u32,
    pub procs: u32,
}

/// Everything the report needs about the host itself
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemSnapshot {
    pub memory: MemInfo,
    pub load: LoadAvg,
    pub uptime_secs: f64,
    pub idle_secs: f64,
    pub kernel_version: String,
}

impl SystemSnapshot {
    /// Read the live system
    pub fn read() -> Result<Self> {
        Self::read_from(Path::new("/proc"))
    }

    /// Read from an alternate procfs root
    pub fn read_from(proc_root: &Path) -> Result<Self> {
        let snapshot = Self {
            memory: parse_meminfo(&read_proc(proc_root, "meminfo")?)?,
            load: parse_loadavg(&read_proc(proc_root, "loadavg")?)?,
            uptime_secs: parse_uptime(&read_proc(proc_root, "uptime")?)?,
            idle_secs: parse_stat_idle(&read_proc(proc_root, "stat")?)?,
            kernel_version: kernel_release()?,
        };
        debug!(?snapshot, "Read system snapshot");
        Ok(snapshot)
    }
}

fn read_proc(root: &Path, name: &str) -> Result<String> {
    let path = root.join(name);
    fs::read_to_string(&path).map_err(|e| NodewatcherError::Proc {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn proc_error(path: &str, reason: impl Into<String>) -> NodewatcherError {
    NodewatcherError::Proc {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// Parse the fields of /proc/meminfo the report uses
pub fn parse_meminfo(content: &str) -> Result<MemInfo> {
    let mut info = MemInfo::default();
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let slot = match key {
            "MemTotal" => &mut info.total,
            "MemFree" => &mut info.free,
            "MemAvailable" => &mut info.available,
            "Buffers" => &mut info.buffers,
            "Cached" => &mut info.cached,
            _ => continue,
        };
        let value = rest.split_whitespace().next().unwrap_or_default();
        *slot = value
            .parse()
            .map_err(|_| proc_error("meminfo", format!("bad value for {key}: {value:?}")))?;
    }

    if info.total == 0 {
        return Err(proc_error("meminfo", "MemTotal missing"));
    }
    Ok(info)
}

/// Parse "0.20 0.18 0.12 1/80 11206"
pub fn parse_loadavg(content: &str) -> Result<LoadAvg> {
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(proc_error("loadavg", "too few fields"));
    }

    let load = |i: usize| -> Result<f64> {
        fields[i]
            .parse()
            .map_err(|_| proc_error("loadavg", format!("bad load value {:?}", fields[i])))
    };
    let (runnable, procs) = fields[3]
        .split_once('/')
        .ok_or_else(|| proc_error("loadavg", "missing runnable/total"))?;

    Ok(LoadAvg {
        load1: load(0)?,
        load5: load(1)?,
        load15: load(2)?,
        runnable: runnable
            .parse()
            .map_err(|_| proc_error("loadavg", "bad runnable count"))?,
        procs: procs
            .parse()
            .map_err(|_| proc_error("loadavg", "bad process count"))?,
    })
}

/// First field of /proc/uptime
pub fn parse_uptime(content: &str) -> Result<f64> {
    content
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| proc_error("uptime", "missing uptime"))
}

/// Aggregate idle time from the `cpu` line of /proc/stat, in seconds
pub fn parse_stat_idle(content: &str) -> Result<f64> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| proc_error("stat", "missing cpu line"))?;

    // cpu user nice system idle ...
    let idle: u64 = line
        .split_whitespace()
        .nth(4)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| proc_error("stat", "missing idle field"))?;

    Ok(idle as f64 / CLOCK_TICKS_PER_SEC)
}

#[cfg(target_os = "linux")]
fn kernel_release() -> Result<String> {
    let uts = nix::sys::utsname::uname().map_err(|e| NodewatcherError::Proc {
        path: "uname".to_string(),
        reason: e.to_string(),
    })?;
    Ok(uts.release().to_string_lossy().into_owned())
}

#[cfg(not(target_os = "linux"))]
fn kernel_release() -> Result<String> {
    Ok(String::new())
}
