//! eagerfree-demo: allocate, touch and lazily free memory in a loop while
//! reporting resident memory.
//!
//! On macOS with eagerfree active, resident memory drops right after each
//! `MADV_FREE` instead of lingering until the system is under pressure. On
//! Linux the calls are intercepted and counted but rss stays put.

use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use eagerfree::{PatchState, Stats};
use log::{debug, info, warn};

const MIB: usize = 1024 * 1024;

#[derive(Parser)]
#[command(name = "eagerfree-demo")]
#[command(version, about = "Allocate, touch and MADV_FREE memory, reporting RSS")]
struct Cli {
    /// Size of each allocation in MiB
    #[arg(short, long, default_value_t = 512)]
    size: usize,

    /// Number of iterations (default: run until interrupted)
    #[arg(short = 'n', long)]
    iterations: Option<u64>,

    /// Pause between iterations in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// An anonymous read+write mapping, unmapped on drop.
struct Mapping {
    addr: *mut libc::c_void,
    len: usize,
}

impl Mapping {
    fn new(len: usize) -> Result<Self> {
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("mmap of {} MiB failed", len / MIB));
        }
        Ok(Self { addr, len })
    }

    fn touch(&mut self, value: u8) {
        unsafe { std::ptr::write_bytes(self.addr as *mut u8, value, self.len) };
    }

    /// Lazily free the whole mapping through libc, which eagerfree intercepts.
    fn lazy_free(&self) -> Result<()> {
        let rc = unsafe { libc::madvise(self.addr, self.len, libc::MADV_FREE) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error()).context("madvise(MADV_FREE) failed");
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.addr, self.len) };
    }
}

/// Current resident set size in bytes.
#[cfg(target_os = "linux")]
fn resident_bytes() -> Result<usize> {
    let statm = std::fs::read_to_string("/proc/self/statm").context("reading /proc/self/statm")?;
    let pages: usize = statm
        .split_whitespace()
        .nth(1)
        .context("short /proc/self/statm")?
        .parse()
        .context("parsing /proc/self/statm")?;
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    Ok(pages * page)
}

/// Peak resident set size in bytes; the closest portable figure.
#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> Result<usize> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } != 0 {
        return Err(std::io::Error::last_os_error()).context("getrusage failed");
    }
    // macOS reports bytes, the BSDs kilobytes.
    let scale = if cfg!(target_os = "macos") { 1 } else { 1024 };
    Ok(usage.ru_maxrss as usize * scale)
}

fn describe(state: PatchState) -> String {
    match state {
        PatchState::Unpatched => "unpatched".to_string(),
        PatchState::Patched(p) => format!("patched at 0x{:x}", p.entry),
    }
}

fn report(iteration: u64, phase: &str, stats: Stats) -> Result<()> {
    let rss = resident_bytes()?;
    println!(
        "[{iteration}] {phase:<8} rss={:>6} MiB  intercepted={} corrected={} failures={}",
        rss / MIB,
        stats.intercepted,
        stats.corrected,
        stats.failures
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if cli.size == 0 {
        bail!("--size must be at least 1 MiB");
    }
    let len = cli.size.checked_mul(MIB).context("--size overflows the address space")?;

    // The constructor normally installed the patch already; this also keeps
    // the library linked in when nothing else references it.
    if eagerfree::state() == PatchState::Unpatched {
        warn!("eagerfree constructor did not run, installing explicitly");
        eagerfree::install().context("installing eagerfree")?;
    }
    info!("eagerfree {}", describe(eagerfree::state()));
    if !eagerfree::RELEASES_EAGERLY {
        warn!("revoke/restore does not release MADV_FREE pages on this platform; rss will not drop");
    }

    let mut iteration = 0u64;
    while cli.iterations.is_none_or(|n| iteration < n) {
        let mut mapping = Mapping::new(len)?;
        mapping.touch(iteration as u8 | 1);
        report(iteration, "touched", eagerfree::stats())?;

        mapping.lazy_free()?;
        report(iteration, "advised", eagerfree::stats())?;

        drop(mapping);
        debug!("iteration {} done", iteration);
        iteration += 1;
        if cli.iterations.is_none_or(|n| iteration < n) {
            thread::sleep(Duration::from_millis(cli.interval_ms));
        }
    }

    Ok(())
}
