//! Checkpoint decider (spec §4.5): given a candidate commit carrying
//! `eos.checkpoint-target`, decide whether this machine may cross to the
//! new branch.

use anyhow::Result;
use glob::Pattern;

use crate::config::Config;
use crate::error::ConfigError;
use crate::repo::Repository;
use crate::types::{Commit, Refspec};

/// Environment variable that forces a checkpoint to be followed
/// regardless of gating predicates. Intended for QA images and tests.
pub const FORCE_CHECKPOINT_ENV: &str = "EOS_UPDATER_FORCE_CHECKPOINT";

/// Narrow interface onto host facts a checkpoint's gating predicates
/// consult. Kept as a trait so tests can supply a fake machine profile
/// without touching `/sys` or `/proc`.
pub trait SystemInfo: Send + Sync {
    fn dmi_vendor(&self) -> Option<String>;
    fn dmi_product(&self) -> Option<String>;
    fn cpu_model(&self) -> Option<String>;
    fn kernel_arch(&self) -> String;
    fn kernel_cmdline(&self) -> String;
    fn is_split_disk_layout(&self) -> bool;
}

/// Reads real host facts from `/sys/class/dmi/id`, `/proc/cpuinfo`,
/// `uname()` and `/proc/cmdline`.
pub struct HostSystemInfo;

impl HostSystemInfo {
    fn read_trimmed(path: &str) -> Option<String> {
        std::fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl SystemInfo for HostSystemInfo {
    fn dmi_vendor(&self) -> Option<String> {
        Self::read_trimmed("/sys/class/dmi/id/sys_vendor")
    }

    fn dmi_product(&self) -> Option<String> {
        Self::read_trimmed("/sys/class/dmi/id/product_name")
    }

    fn cpu_model(&self) -> Option<String> {
        let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
        cpuinfo.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim() == "model name" {
                Some(value.trim().to_string())
            } else {
                None
            }
        })
    }

    fn kernel_arch(&self) -> String {
        std::env::consts::ARCH.to_string()
    }

    fn kernel_cmdline(&self) -> String {
        std::fs::read_to_string("/proc/cmdline").unwrap_or_default()
    }

    fn is_split_disk_layout(&self) -> bool {
        std::path::Path::new("/sysroot").is_dir() && std::path::Path::new("/var/lib").exists()
            && !std::path::Path::new("/ostree").is_symlink()
    }
}

/// Configured gating rules for the checkpoint decider.
#[derive(Clone, Debug, Default)]
pub struct CheckpointGates {
    pub dmi_denylist: Vec<(String, String)>,
    pub cpu_model_denylist: Vec<String>,
    pub kernel_arch_denylist: Vec<String>,
    /// `(source_ref_glob, target_ref_glob)` pairs; a checkpoint is only
    /// allowed when both the booted ref and the target ref match one
    /// pair's respective glob.
    pub ref_glob_pairs: Vec<(String, String)>,
}

impl CheckpointGates {
    /// Load gate rules from the `[Checkpoint]` group (spec §4.1/§4.5).
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let dmi_denylist = config
            .string_list("Checkpoint", "DmiDenylist")?
            .into_iter()
            .filter_map(|entry| match entry.split_once('/') {
                Some((vendor, product)) => Some((vendor.to_string(), product.to_string())),
                None => {
                    log::warn!("ignoring malformed DmiDenylist entry '{}', expected 'vendor/product'", entry);
                    None
                }
            })
            .collect();
        let ref_glob_pairs = config
            .string_list("Checkpoint", "RefGlobPairs")?
            .into_iter()
            .filter_map(|entry| match entry.split_once('=') {
                Some((src, tgt)) => Some((src.to_string(), tgt.to_string())),
                None => {
                    log::warn!("ignoring malformed RefGlobPairs entry '{}', expected 'src-glob=tgt-glob'", entry);
                    None
                }
            })
            .collect();
        Ok(CheckpointGates {
            dmi_denylist,
            cpu_model_denylist: config.string_list("Checkpoint", "CpuModelDenylist")?,
            kernel_arch_denylist: config.string_list("Checkpoint", "ArchDenylist")?,
            ref_glob_pairs,
        })
    }
}

/// Outcome of the checkpoint decision.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CheckpointDecision {
    /// Stay on the booted ref; either there was no (valid) checkpoint, a
    /// gate vetoed, or newer commits exist on the booted ref already.
    StayOnBooted,
    /// Cross to this refspec.
    Follow(String),
}

/// Parse a checkpoint target string, stripping a `remote:` prefix that
/// differs from the booted remote (spec §4.5 step 1). Returns `None` (and
/// logs a warning) if the string fails to parse as a bare ref at all.
fn parse_checkpoint_target(target: &str, booted_remote: &str) -> Option<String> {
    let bare_ref = if let Some((remote, ref_name)) = target.split_once(':') {
        if remote != booted_remote {
            log::warn!(
                "checkpoint target '{}' names remote '{}', which differs from booted remote \
                 '{}'; stripping remote prefix",
                target,
                remote,
                booted_remote
            );
        }
        ref_name
    } else {
        target
    };

    if !is_valid_ref_name(bare_ref) {
        log::warn!(
            "Failed to parse eos.checkpoint-target ref '{}', ignoring it",
            target
        );
        return None;
    }
    Some(bare_ref.to_string())
}

/// A conservative bare-ref validity check: non-empty, no whitespace, no
/// `..`, and restricted to the characters OSTree ref names allow.
fn is_valid_ref_name(r: &str) -> bool {
    if r.is_empty() || r.contains("..") || r.contains(char::is_whitespace) {
        return false;
    }
    r.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
}

/// Does any newer commit exist on `booted_ref` beyond `checkpoint_commit`
/// (spec §4.5 step 2)? Walks forward is impossible in a DAG addressed
/// only by parent pointers, so instead we compare the ref's current head
/// against the checkpoint commit's own checksum: if they differ, and the
/// head isn't a descendant reachable only via the checkpoint, maintenance
/// continued on the old branch.
fn has_newer_commit_on_booted_ref(
    repo: &Repository,
    remote: &str,
    booted_ref: &str,
    checkpoint_commit: &Commit,
) -> Result<bool> {
    let refspec = format!("{}:{}", remote, booted_ref);
    let head = repo.resolve_refspec(&refspec)?;
    let head = match head {
        Some(h) => h,
        None => return Ok(false),
    };
    if head == checkpoint_commit.checksum {
        return Ok(false);
    }
    let head_commit = repo.load_commit(&head)?;
    Ok(head_commit.timestamp > checkpoint_commit.timestamp)
}

fn gate_vetoes(gates: &CheckpointGates, info: &dyn SystemInfo, booted_ref: &str, target_ref: &str) -> Option<String> {
    if let (Some(vendor), Some(product)) = (info.dmi_vendor(), info.dmi_product()) {
        for (deny_vendor, deny_product) in &gates.dmi_denylist {
            if &vendor == deny_vendor && &product == deny_product {
                return Some(format!("DMI vendor/product '{}/{}' is denylisted", vendor, product));
            }
        }
    }
    if let Some(cpu) = info.cpu_model() {
        if gates.cpu_model_denylist.iter().any(|d| d == &cpu) {
            return Some(format!("CPU model '{}' is denylisted", cpu));
        }
    }
    let arch = info.kernel_arch();
    if gates.kernel_arch_denylist.iter().any(|d| d == &arch) {
        return Some(format!("kernel architecture '{}' is denylisted", arch));
    }
    if is_readonly_rootfs(&info.kernel_cmdline()) {
        return Some("root filesystem is read-only per kernel command line".to_string());
    }
    if info.is_split_disk_layout() {
        return Some("disk layout is a split layout".to_string());
    }
    if !gates.ref_glob_pairs.is_empty() {
        let matches_any = gates.ref_glob_pairs.iter().any(|(src, tgt)| {
            Pattern::new(src)
                .map(|p| p.matches(booted_ref))
                .unwrap_or(false)
                && Pattern::new(tgt)
                    .map(|p| p.matches(target_ref))
                    .unwrap_or(false)
        });
        if !matches_any {
            return Some(format!(
                "ref pair ({}, {}) does not match any configured source/target glob",
                booted_ref, target_ref
            ));
        }
    }
    None
}

fn is_readonly_rootfs(cmdline: &str) -> bool {
    cmdline
        .split_whitespace()
        .any(|token| token == "eos.rootfs=ro" || token == "ostree.rofiles=1")
}

/// Decide whether to follow a checkpoint carried by `checkpoint_commit`
/// on `booted_refspec`.
pub fn decide(
    repo: &Repository,
    gates: &CheckpointGates,
    system_info: &dyn SystemInfo,
    booted_refspec: &Refspec,
    checkpoint_commit: &Commit,
) -> Result<CheckpointDecision> {
    let target = match &checkpoint_commit.checkpoint_target {
        Some(t) => t,
        None => return Ok(CheckpointDecision::StayOnBooted),
    };

    let target_ref = match parse_checkpoint_target(target, &booted_refspec.remote) {
        Some(r) => r,
        None => return Ok(CheckpointDecision::StayOnBooted),
    };

    if has_newer_commit_on_booted_ref(
        repo,
        &booted_refspec.remote,
        &booted_refspec.ref_name,
        checkpoint_commit,
    )? {
        log::info!(
            "newer commit exists on booted ref '{}' past the checkpoint; staying on it",
            booted_refspec.ref_name
        );
        return Ok(CheckpointDecision::StayOnBooted);
    }

    if std::env::var_os(FORCE_CHECKPOINT_ENV).is_some() {
        log::warn!("{} set, forcing checkpoint crossing to '{}'", FORCE_CHECKPOINT_ENV, target_ref);
        return Ok(CheckpointDecision::Follow(target_ref));
    }

    if let Some(reason) = gate_vetoes(gates, system_info, &booted_refspec.ref_name, &target_ref) {
        log::info!("checkpoint to '{}' refused: {}", target_ref, reason);
        return Ok(CheckpointDecision::StayOnBooted);
    }

    Ok(CheckpointDecision::Follow(target_ref))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSystemInfo {
        dmi: Option<(String, String)>,
        cpu: Option<String>,
        arch: String,
        cmdline: String,
        split: bool,
    }

    impl Default for FakeSystemInfo {
        fn default() -> Self {
            FakeSystemInfo {
                dmi: None,
                cpu: None,
                arch: "x86_64".to_string(),
                cmdline: String::new(),
                split: false,
            }
        }
    }

    impl SystemInfo for FakeSystemInfo {
        fn dmi_vendor(&self) -> Option<String> {
            self.dmi.as_ref().map(|(v, _)| v.clone())
        }
        fn dmi_product(&self) -> Option<String> {
            self.dmi.as_ref().map(|(_, p)| p.clone())
        }
        fn cpu_model(&self) -> Option<String> {
            self.cpu.clone()
        }
        fn kernel_arch(&self) -> String {
            self.arch.clone()
        }
        fn kernel_cmdline(&self) -> String {
            self.cmdline.clone()
        }
        fn is_split_disk_layout(&self) -> bool {
            self.split
        }
    }

    #[test]
    fn malformed_target_is_treated_as_absent() {
        assert!(parse_checkpoint_target("$^^@*invalid", "eos").is_none());
    }

    #[test]
    fn valid_target_with_matching_remote_parses() {
        assert_eq!(
            parse_checkpoint_target("os/eos/amd64/eos3", "eos"),
            Some("os/eos/amd64/eos3".to_string())
        );
    }

    #[test]
    fn valid_target_with_foreign_remote_prefix_strips_it() {
        assert_eq!(
            parse_checkpoint_target("other:os/eos/amd64/eos3", "eos"),
            Some("os/eos/amd64/eos3".to_string())
        );
    }

    #[test]
    fn arch_denylist_vetoes() {
        let gates = CheckpointGates {
            kernel_arch_denylist: vec!["armhf".to_string()],
            ..Default::default()
        };
        let info = FakeSystemInfo {
            arch: "armhf".to_string(),
            ..Default::default()
        };
        assert!(gate_vetoes(&gates, &info, "a", "b").is_some());
    }

    #[test]
    fn no_gates_means_no_veto() {
        let gates = CheckpointGates::default();
        let info = FakeSystemInfo::default();
        assert!(gate_vetoes(&gates, &info, "a", "b").is_none());
    }

    #[test]
    fn ref_glob_pair_must_match() {
        let gates = CheckpointGates {
            ref_glob_pairs: vec![("os/eos/amd64/master".to_string(), "os/eos/amd64/eos4".to_string())],
            ..Default::default()
        };
        let info = FakeSystemInfo::default();
        assert!(gate_vetoes(&gates, &info, "os/eos/amd64/master", "os/eos/amd64/eos4").is_none());
        assert!(gate_vetoes(&gates, &info, "os/eos/amd64/master", "os/eos/amd64/other").is_some());
    }
}
