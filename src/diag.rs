//! Platform diagnostics surface for `{diag.*}` placeholders and health
//! checks.
//!
//! Collection itself is an external concern: the default snapshot carries
//! what the standard library knows (OS, architecture, core count) and leaves
//! the rest unknown. Applications plug a richer provider via
//! [`set_diag_provider`].

use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::Serialize;

/// A point-in-time view of the host, rendered by `{diag.os}`,
/// `{diag.arch}`, `{diag.cpu}`, `{diag.cores}`, `{diag.ram_total_mb}`, and
/// `{diag.ram_avail_mb}`.
#[derive(Debug, Clone, Serialize)]
pub struct DiagSnapshot {
    pub os: String,
    pub arch: String,
    pub cpu: String,
    pub cores: usize,
    pub ram_total_mb: u64,
    pub ram_avail_mb: u64,
}

impl Default for DiagSnapshot {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu: "unknown".to_string(),
            cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            ram_total_mb: 0,
            ram_avail_mb: 0,
        }
    }
}

impl DiagSnapshot {
    /// Resolves one `diag.<field>` placeholder key.
    pub fn field(&self, key: &str) -> Option<String> {
        match key {
            "os" => Some(self.os.clone()),
            "arch" => Some(self.arch.clone()),
            "cpu" => Some(self.cpu.clone()),
            "cores" => Some(self.cores.to_string()),
            "ram_total_mb" => Some(self.ram_total_mb.to_string()),
            "ram_avail_mb" => Some(self.ram_avail_mb.to_string()),
            _ => None,
        }
    }
}

type Provider = dyn Fn() -> DiagSnapshot + Send + Sync;

static PROVIDER: Lazy<ArcSwap<Option<Arc<Provider>>>> = Lazy::new(|| ArcSwap::from_pointee(None));

/// Installs a diagnostics provider consulted on every snapshot request.
pub fn set_diag_provider(provider: impl Fn() -> DiagSnapshot + Send + Sync + 'static) {
    PROVIDER.store(Arc::new(Some(Arc::new(provider))));
}

/// Returns the current diagnostics snapshot.
pub fn snapshot() -> DiagSnapshot {
    match PROVIDER.load().as_ref() {
        Some(provider) => provider(),
        None => DiagSnapshot::default(),
    }
}
