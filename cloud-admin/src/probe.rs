use std::collections::{BTreeMap, HashMap};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use crate::error::Result;
use crate::ssh::SshTarget;

const SECTION: &str = "@@cloud-admin@@";

/// Memory figures in MiB
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub swap_used: u64,
}

impl MemoryStats {
    /// `value` as a percentage of total memory; zero when total is unknown
    pub fn percent_of_total(&self, value: u64) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            value as f64 * 100.0 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostMetrics {
    pub memory: MemoryStats,
    /// Per-CPU utilisation percentage keyed by CPU index
    pub cpus: BTreeMap<u32, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemInfo {
    pub distro: String,
    pub version: String,
    pub arch: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            distro: "-".to_string(),
            version: "-".to_string(),
            arch: "-".to_string(),
        }
    }
}

/// Collects resource usage and platform details from a single host
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn metrics(&self, target: &SshTarget) -> Result<HostMetrics>;
    async fn system_info(&self, target: &SshTarget) -> Result<SystemInfo>;
}

/// Reads `/proc` and `/etc/os-release` over SSH
pub struct SshProbe;

#[async_trait]
impl HostProbe for SshProbe {
    async fn metrics(&self, target: &SshTarget) -> Result<HostMetrics> {
        let script = format!(
            "cat /proc/meminfo; echo {s}; cat /proc/stat; sleep 1; echo {s}; cat /proc/stat",
            s = SECTION
        );
        let output = target.run(&script).await?;
        Ok(parse_metrics(&output))
    }

    async fn system_info(&self, target: &SshTarget) -> Result<SystemInfo> {
        let script = format!("cat /etc/os-release; echo {}; uname -m", SECTION);
        let output = target.run(&script).await?;
        Ok(parse_system_info(&output))
    }
}

/// Metrics for every target, at most `concurrency` hosts at a time.
/// A host that cannot be sampled reports zeros.
pub async fn collect_metrics(
    probe: &dyn HostProbe,
    targets: Vec<SshTarget>,
    concurrency: usize,
) -> BTreeMap<String, HostMetrics> {
    stream::iter(targets)
        .map(|target| async move {
            let metrics = probe.metrics(&target).await.unwrap_or_else(|e| {
                tracing::warn!("Metrics unavailable for {}: {}", target.host(), e);
                HostMetrics::default()
            });
            (target.host().to_string(), metrics)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// System info for every target; unreachable hosts report `-` fields
pub async fn collect_system_info(
    probe: &dyn HostProbe,
    targets: Vec<SshTarget>,
    concurrency: usize,
) -> BTreeMap<String, SystemInfo> {
    stream::iter(targets)
        .map(|target| async move {
            let info = probe.system_info(&target).await.unwrap_or_else(|e| {
                tracing::warn!("System info unavailable for {}: {}", target.host(), e);
                SystemInfo::default()
            });
            (target.host().to_string(), info)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

fn parse_metrics(output: &str) -> HostMetrics {
    let mut sections = output.split(SECTION);
    let meminfo = sections.next().unwrap_or_default();
    let before = parse_cpu_times(sections.next().unwrap_or_default());
    let after = parse_cpu_times(sections.next().unwrap_or_default());

    HostMetrics {
        memory: parse_meminfo(meminfo),
        cpus: cpu_usage(&before, &after),
    }
}

/// Memory from `/proc/meminfo`. Missing fields count as zero.
pub fn parse_meminfo(meminfo: &str) -> MemoryStats {
    let fields: HashMap<&str, u64> = meminfo
        .lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let kib = rest.split_whitespace().next()?.parse().ok()?;
            Some((name.trim(), kib))
        })
        .collect();
    let mib = |name: &str| fields.get(name).copied().unwrap_or(0) / 1024;

    let total = mib("MemTotal");
    let free = mib("MemFree");
    MemoryStats {
        total,
        free,
        used: total.saturating_sub(free),
        swap_used: mib("SwapTotal").saturating_sub(mib("SwapFree")),
    }
}

/// (busy, total) jiffies per CPU from `/proc/stat`, excluding the aggregate line
fn parse_cpu_times(stat: &str) -> BTreeMap<u32, (u64, u64)> {
    stat.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let index = fields.next()?.strip_prefix("cpu")?.parse::<u32>().ok()?;
            let values: Vec<u64> = fields.filter_map(|v| v.parse().ok()).collect();
            if values.len() < 4 {
                return None;
            }
            let total: u64 = values.iter().sum();
            let idle = values[3] + values.get(4).copied().unwrap_or(0);
            Some((index, (total - idle, total)))
        })
        .collect()
}

fn cpu_usage(
    before: &BTreeMap<u32, (u64, u64)>,
    after: &BTreeMap<u32, (u64, u64)>,
) -> BTreeMap<u32, f64> {
    after
        .iter()
        .filter_map(|(cpu, (busy_after, total_after))| {
            let (busy_before, total_before) = before.get(cpu)?;
            let total = total_after.saturating_sub(*total_before);
            let busy = busy_after.saturating_sub(*busy_before);
            let percent = if total == 0 { 0.0 } else { busy as f64 * 100.0 / total as f64 };
            Some((*cpu, percent))
        })
        .collect()
}

pub fn parse_system_info(output: &str) -> SystemInfo {
    let (os_release, arch) = output.split_once(SECTION).unwrap_or((output, ""));
    let vars: HashMap<&str, &str> = os_release
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once('=')?;
            Some((name.trim(), value.trim().trim_matches('"')))
        })
        .collect();

    let field = |value: Option<&&str>| {
        value
            .map(|v| v.to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "-".to_string())
    };

    SystemInfo {
        distro: field(vars.get("ID")),
        version: field(vars.get("VERSION_ID")),
        arch: field(Some(&arch.trim())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdminError;
    use crate::ssh::ConnectParams;

    /// Answers for every host except "down"
    struct CannedProbe;

    #[async_trait]
    impl HostProbe for CannedProbe {
        async fn metrics(&self, target: &SshTarget) -> Result<HostMetrics> {
            if target.host() == "down" {
                return Err(AdminError::Remote {
                    host: target.host().to_string(),
                    message: "connection refused".to_string(),
                });
            }
            Ok(HostMetrics {
                memory: parse_meminfo(MEMINFO),
                cpus: BTreeMap::from([(0, 12.5)]),
            })
        }

        async fn system_info(&self, target: &SshTarget) -> Result<SystemInfo> {
            if target.host() == "down" {
                return Err(AdminError::Timeout {
                    host: target.host().to_string(),
                    after: std::time::Duration::from_secs(1),
                });
            }
            Ok(SystemInfo {
                distro: "centos".to_string(),
                version: "7".to_string(),
                arch: "x86_64".to_string(),
            })
        }
    }

    fn targets() -> Vec<SshTarget> {
        let params = ConnectParams::new("root");
        vec![params.target("up-1"), params.target("down"), params.target("up-2")]
    }

    const MEMINFO: &str = "\
MemTotal:        8388608 kB
MemFree:         2097152 kB
MemAvailable:    4194304 kB
SwapTotal:       1048576 kB
SwapFree:         524288 kB
";

    const STAT_BEFORE: &str = "\
cpu  400 0 200 1400 0 0 0 0 0 0
cpu0 100 0 100 800 0 0 0 0 0 0
cpu1 300 0 100 600 0 0 0 0 0 0
intr 12345
";

    const STAT_AFTER: &str = "\
cpu  500 0 300 1600 0 0 0 0 0 0
cpu0 150 0 150 900 0 0 0 0 0 0
cpu1 300 0 100 700 0 0 0 0 0 0
";

    #[test]
    fn test_parse_meminfo() {
        let memory = parse_meminfo(MEMINFO);
        assert_eq!(memory.total, 8192);
        assert_eq!(memory.free, 2048);
        assert_eq!(memory.used, 6144);
        assert_eq!(memory.swap_used, 512);
        assert!((memory.percent_of_total(memory.used) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_total_memory_is_zero_percent() {
        let memory = parse_meminfo("");
        assert_eq!(memory, MemoryStats::default());
        assert_eq!(memory.percent_of_total(100), 0.0);
    }

    #[test]
    fn test_cpu_usage_from_two_samples() {
        let output = format!("{MEMINFO}{SECTION}\n{STAT_BEFORE}{SECTION}\n{STAT_AFTER}");
        let metrics = parse_metrics(&output);

        assert_eq!(metrics.cpus.len(), 2, "aggregate cpu line must be excluded");
        assert!((metrics.cpus[&0] - 50.0).abs() < 1e-9);
        assert!((metrics.cpus[&1] - 0.0).abs() < 1e-9);
        assert_eq!(metrics.memory.total, 8192);
    }

    #[test]
    fn test_parse_system_info() {
        let output = format!(
            "NAME=\"CentOS Linux\"\nID=\"centos\"\nVERSION_ID=\"7\"\n{}\nx86_64\n",
            SECTION
        );
        let info = parse_system_info(&output);
        assert_eq!(info.distro, "centos");
        assert_eq!(info.version, "7");
        assert_eq!(info.arch, "x86_64");
    }

    #[tokio::test]
    async fn test_collect_metrics_treats_failures_as_zero() {
        let metrics = collect_metrics(&CannedProbe, targets(), 2).await;

        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics["up-1"].memory.total, 8192);
        assert_eq!(metrics["up-2"].cpus[&0], 12.5);
        assert_eq!(metrics["down"], HostMetrics::default());
    }

    #[tokio::test]
    async fn test_collect_system_info() {
        let infos = collect_system_info(&CannedProbe, targets(), 8).await;

        assert_eq!(infos["up-1"].distro, "centos");
        assert_eq!(infos["down"], SystemInfo::default());
    }

    #[test]
    fn test_parse_system_info_missing_fields() {
        let info = parse_system_info("");
        assert_eq!(info, SystemInfo::default());
    }
}
