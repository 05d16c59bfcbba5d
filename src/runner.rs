//! Run a unit of work on pinned worker threads, one worker per node.
//!
//! Every worker pins itself through an [`AffinityDispatcher`], logs where it
//! landed, and drives a group of execution handles on threads pinned to the
//! same node until the configured duration (or iteration count) is reached.
//! Optionally the buffers of each handle are audited against the worker's
//! node afterwards.

use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use crate::audit::{LocalityReport, MemoryAuditor};
use crate::dispatch::AffinityDispatcher;
use crate::error::{Error, Result};
use crate::locator::{ThreadLocation, ThreadLocator};
use crate::platform::Platform;
use crate::topology::{NumaNode, TopologyCatalog};
use crate::workload::{BufferSpan, CompiledUnit, ExecutionHandle};

/// Configuration options for [`PinnedRunner`].
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Number of workers; `None` runs one worker per node.
    pub workers: Option<usize>,

    /// Execution handles driven by each worker.
    pub handles_per_worker: usize,

    /// How long each handle keeps executing.
    pub duration: Duration,

    /// Fixed number of executions per handle; overrides `duration`.
    pub iterations: Option<u64>,

    /// Whether to audit handle buffers after the run.
    pub audit_buffers: bool,

    /// Dispatch template applied before the workers start.
    pub template: Option<Vec<i64>>,
}

impl Default for RunnerOptions {
    fn default() -> RunnerOptions {
        RunnerOptions {
            workers: None,
            handles_per_worker: 4,
            duration: Duration::from_secs(10),
            iterations: None,
            audit_buffers: false,
            template: None,
        }
    }
}

impl RunnerOptions {
    /// Create the default options.
    #[inline]
    pub fn new() -> RunnerOptions {
        RunnerOptions::default()
    }

    /// Set the number of workers.
    #[inline]
    pub fn workers(mut self, workers: usize) -> RunnerOptions {
        self.workers = Some(workers);
        self
    }

    /// Set the number of execution handles per worker.
    #[inline]
    pub fn handles_per_worker(mut self, handles: usize) -> RunnerOptions {
        self.handles_per_worker = handles;
        self
    }

    /// Run each handle for `duration`.
    #[inline]
    pub fn duration(mut self, duration: Duration) -> RunnerOptions {
        self.duration = duration;
        self
    }

    /// Run each handle exactly `iterations` times.
    #[inline]
    pub fn iterations(mut self, iterations: u64) -> RunnerOptions {
        self.iterations = Some(iterations);
        self
    }

    /// Audit handle buffers after the run.
    #[inline]
    pub fn audit_buffers(mut self, audit: bool) -> RunnerOptions {
        self.audit_buffers = audit;
        self
    }

    /// Dispatch workers through `template`.
    #[inline]
    pub fn template(mut self, template: Vec<i64>) -> RunnerOptions {
        self.template = Some(template);
        self
    }
}

/// Locality of one buffer after a run.
#[derive(Debug, Clone)]
pub struct BufferAudit {
    /// Index of the handle within its worker.
    pub handle: usize,

    /// The audited buffer.
    pub buffer: BufferSpan,

    /// Whether every page is resident on the worker's node.
    pub resident: bool,

    /// Coalesced page locality.
    pub report: LocalityReport,
}

/// Outcome of one worker.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Worker index passed to the dispatcher.
    pub worker: usize,

    /// Node the worker was pinned to.
    pub node: NumaNode,

    /// Where the worker thread was running right after pinning.
    pub location: ThreadLocation,

    /// Executions summed over all handles.
    pub iterations: u64,

    /// Wall time of the execution phase.
    pub elapsed: Duration,

    /// Buffer audits, empty unless auditing was enabled.
    pub audits: Vec<BufferAudit>,
}

impl WorkerReport {
    /// Returns `true` if every audited buffer was resident on the worker's node.
    pub fn all_resident(&self) -> bool {
        self.audits.iter().all(|a| a.resident)
    }
}

/// Drives a [`CompiledUnit`] on NUMA-pinned threads.
#[derive(Debug, Clone, Default)]
pub struct PinnedRunner {
    options: RunnerOptions,
}

impl PinnedRunner {
    /// Create a runner.
    #[inline]
    pub fn new(options: RunnerOptions) -> PinnedRunner {
        PinnedRunner { options }
    }

    /// The runner's options.
    #[inline]
    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Run `unit` on one pinned worker per configured slot and collect
    /// their reports in worker order.
    ///
    /// The first worker error is returned once every worker has finished.
    pub fn run<P, U>(&self, catalog: &TopologyCatalog, platform: &P, unit: &U) -> Result<Vec<WorkerReport>>
    where
        P: Platform + ?Sized,
        U: CompiledUnit,
    {
        if self.options.handles_per_worker == 0 {
            return Err(Error::InvalidArgument("handles_per_worker must be at least 1".into()));
        }

        let mut dispatcher = AffinityDispatcher::new(catalog, platform)?;
        if let Some(template) = &self.options.template {
            dispatcher.set_dispatch_template(template)?;
        }
        let dispatcher = &dispatcher;

        let workers = self.options.workers.unwrap_or_else(|| catalog.node_count());
        tracing::info!(workers, handles = self.options.handles_per_worker, "launching pinned workers");

        thread::scope(|s| {
            let spawned = (0..workers)
                .map(|worker| {
                    thread::Builder::new()
                        .name(format!("numabind-worker-{}", worker))
                        .spawn_scoped(s, move || self.run_worker(worker, dispatcher, platform, unit))
                })
                .collect::<std::io::Result<Vec<_>>>()?;

            spawned.into_iter().map(join).collect::<Result<Vec<_>>>()
        })
    }

    fn run_worker<P, U>(
        &self,
        worker: usize,
        dispatcher: &AffinityDispatcher<'_, P>,
        platform: &P,
        unit: &U,
    ) -> Result<WorkerReport>
    where
        P: Platform + ?Sized,
        U: CompiledUnit,
    {
        let node = *dispatcher.pin_current_thread(worker as i64)?;
        let location = ThreadLocator::new(dispatcher.catalog(), platform).locate()?;
        tracing::info!(worker, node = node.id, %location, "worker pinned");

        let started = Instant::now();
        let outcomes = thread::scope(|s| {
            let spawned = (0..self.options.handles_per_worker)
                .map(|slot| {
                    thread::Builder::new()
                        .name(format!("numabind-worker-{}-{}", worker, slot))
                        .spawn_scoped(s, move || self.run_handle(worker, slot, node, dispatcher, platform, unit))
                })
                .collect::<std::io::Result<Vec<_>>>()?;

            spawned.into_iter().map(join).collect::<Result<Vec<_>>>()
        })?;
        let elapsed = started.elapsed();

        let mut iterations = 0;
        let mut audits = Vec::new();
        for (count, mut handle_audits) in outcomes {
            iterations += count;
            audits.append(&mut handle_audits);
        }

        tracing::info!(worker, node = node.id, iterations, elapsed_ms = elapsed.as_millis() as u64, "worker finished");
        Ok(WorkerReport {
            worker,
            node,
            location,
            iterations,
            elapsed,
            audits,
        })
    }

    fn run_handle<P, U>(
        &self,
        worker: usize,
        slot: usize,
        node: NumaNode,
        dispatcher: &AffinityDispatcher<'_, P>,
        platform: &P,
        unit: &U,
    ) -> Result<(u64, Vec<BufferAudit>)>
    where
        P: Platform + ?Sized,
        U: CompiledUnit,
    {
        dispatcher.pin_current_thread(worker as i64)?;
        let mut handle = unit.create_handle()?;

        let started = Instant::now();
        let mut iterations = 0u64;
        while self.keep_running(iterations, started) {
            handle.execute()?;
            iterations += 1;
        }

        let audits = if self.options.audit_buffers {
            audit_handle(worker, slot, node, &handle, platform)?
        } else {
            Vec::new()
        };
        Ok((iterations, audits))
    }

    fn keep_running(&self, iterations: u64, started: Instant) -> bool {
        match self.options.iterations {
            Some(limit) => iterations < limit,
            None => started.elapsed() < self.options.duration,
        }
    }
}

fn audit_handle<P, H>(worker: usize, slot: usize, node: NumaNode, handle: &H, platform: &P) -> Result<Vec<BufferAudit>>
where
    P: Platform + ?Sized,
    H: ExecutionHandle,
{
    let auditor = MemoryAuditor::new(platform);

    handle
        .buffers()
        .into_iter()
        .filter(|buffer| buffer.len > 0)
        .map(|buffer| {
            let report = auditor.regions(buffer.address, buffer.len)?;
            let resident = report.is_resident_on(node.id);
            if !resident {
                tracing::warn!(
                    worker,
                    handle = slot,
                    buffer = %buffer.name,
                    node = node.id,
                    "buffer not resident on its worker's node:\n{}",
                    report.render("    ")
                );
            }
            Ok(BufferAudit {
                handle: slot,
                buffer,
                resident,
                report,
            })
        })
        .collect()
}

fn join<T>(handle: ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}
