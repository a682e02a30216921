//! Pluggable flatpak operations backend: shells out and parses output
//! so the engine's delta logic can be unit-tested against a fake.

use std::process::Command;

use anyhow::{Context, Result};

/// A single flatpak operation outcome that the engine special-cases
/// (spec §4.8 "Per-action semantics").
#[derive(Debug)]
pub enum FlatpakOpError {
    AlreadyInstalled,
    NotInstalled,
    Other(anyhow::Error),
}

impl std::fmt::Display for FlatpakOpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlatpakOpError::AlreadyInstalled => write!(f, "already installed"),
            FlatpakOpError::NotInstalled => write!(f, "not installed"),
            FlatpakOpError::Other(e) => write!(f, "{:#}", e),
        }
    }
}

/// A narrow interface onto flatpak operations, so the engine's delta and
/// squash logic can be tested without a real flatpak installation.
pub trait FlatpakBackend: Send + Sync {
    fn is_installed(&self, remote: &str, ref_name: &str) -> Result<bool>;
    fn install(&self, remote: &str, ref_name: &str) -> Result<(), FlatpakOpError>;
    fn update(&self, remote: &str, ref_name: &str) -> Result<(), FlatpakOpError>;
    fn uninstall(&self, remote: &str, ref_name: &str) -> Result<(), FlatpakOpError>;
}

/// Shells out to the `flatpak` CLI in system scope.
pub struct CliFlatpakBackend;

impl CliFlatpakBackend {
    fn run(&self, args: &[&str]) -> Result<std::process::Output, std::io::Error> {
        Command::new("flatpak").arg("--system").args(args).output()
    }
}

impl FlatpakBackend for CliFlatpakBackend {
    fn is_installed(&self, _remote: &str, ref_name: &str) -> Result<bool> {
        let output = self
            .run(&["info", ref_name])
            .context("running 'flatpak info'")?;
        Ok(output.status.success())
    }

    fn install(&self, remote: &str, ref_name: &str) -> Result<(), FlatpakOpError> {
        let output = self
            .run(&["install", "-y", remote, ref_name])
            .map_err(|e| FlatpakOpError::Other(e.into()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("already installed") {
            return Err(FlatpakOpError::AlreadyInstalled);
        }
        Err(FlatpakOpError::Other(anyhow::anyhow!("flatpak install failed: {}", stderr)))
    }

    fn update(&self, _remote: &str, ref_name: &str) -> Result<(), FlatpakOpError> {
        let output = self
            .run(&["update", "-y", ref_name])
            .map_err(|e| FlatpakOpError::Other(e.into()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not installed") {
            return Err(FlatpakOpError::NotInstalled);
        }
        Err(FlatpakOpError::Other(anyhow::anyhow!("flatpak update failed: {}", stderr)))
    }

    fn uninstall(&self, _remote: &str, ref_name: &str) -> Result<(), FlatpakOpError> {
        let output = self
            .run(&["uninstall", "-y", ref_name])
            .map_err(|e| FlatpakOpError::Other(e.into()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not installed") {
            return Err(FlatpakOpError::NotInstalled);
        }
        Err(FlatpakOpError::Other(anyhow::anyhow!("flatpak uninstall failed: {}", stderr)))
    }
}
