//! Pinned workload example for the numabind library.
//!
//! Runs a synthetic compute kernel on one pinned worker per NUMA node, then
//! reports where each worker ran and where its buffers ended up.
//!
//! ```text
//! cargo run --example pinned_workload -- [seconds] [template...]
//! NUMABIND_LOG=debug cargo run --example pinned_workload -- 2 1 0
//! ```

use std::time::Duration;

use numabind::platform::{self, simulated::SimulatedPlatform, Platform};
use numabind::{
    BufferSpan, CompiledUnit, ExecutionHandle, PinnedRunner, RunnerOptions, ThreadLocator, TopologyCatalog,
};
use tracing_subscriber::filter::EnvFilter;

const LOG_ENV: &str = "NUMABIND_LOG";

/// A fixed-size dot-product kernel standing in for a compiled model.
struct DotKernel {
    len: usize,
}

/// Per-thread input and output of [`DotKernel`].
struct DotRequest {
    input: Vec<f32>,
    weights: Vec<f32>,
    output: f32,
}

impl CompiledUnit for DotKernel {
    type Handle = DotRequest;

    fn create_handle(&self) -> numabind::Result<DotRequest> {
        // allocated and touched on the pinned thread, so pages land locally
        let input: Vec<f32> = (0..self.len).map(|i| (i % 17) as f32).collect();
        let weights: Vec<f32> = (0..self.len).map(|i| 1.0 / (1 + i % 5) as f32).collect();
        Ok(DotRequest {
            input,
            weights,
            output: 0.0,
        })
    }
}

impl ExecutionHandle for DotRequest {
    fn execute(&mut self) -> numabind::Result<()> {
        self.output = self.input.iter().zip(&self.weights).map(|(a, b)| a * b).sum();
        Ok(())
    }

    fn buffers(&self) -> Vec<BufferSpan> {
        vec![
            BufferSpan::from_slice("input", &self.input),
            BufferSpan::from_slice("weights", &self.weights),
        ]
    }
}

fn run<P: Platform>(platform: &P, options: RunnerOptions) -> Result<(), Box<dyn std::error::Error>> {
    numabind::utils::reset_stats();
    let catalog = TopologyCatalog::discover(platform)?;
    catalog.log_topology();
    println!("{}", catalog.summary());

    let locator = ThreadLocator::new(&catalog, platform);
    println!("Application: {}", locator.locate()?);

    let kernel = DotKernel { len: 256 * 1024 };
    let reports = PinnedRunner::new(options).run(&catalog, platform, &kernel)?;

    for report in &reports {
        println!(
            "Worker {} -> node {} at {}: {} executions in {:.2}s",
            report.worker,
            report.node.id,
            report.location,
            report.iterations,
            report.elapsed.as_secs_f64()
        );
        for audit in &report.audits {
            println!(
                "  handle {} buffer {:<8} resident={}",
                audit.handle, audit.buffer.name, audit.resident
            );
            println!("{}", audit.report.render("    "));
        }
    }

    let stats = numabind::utils::get_stats();
    println!("\nStatistics:");
    println!("  Pins: {}", stats.pin_count);
    println!("  Audits: {} ({} pages)", stats.audit_count, stats.pages_audited);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::builder()
        .with_default_directive("info".parse()?)
        .with_env_var(LOG_ENV)
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let seconds: u64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(10);
    let template = args.map(|s| s.parse()).collect::<Result<Vec<i64>, _>>()?;

    println!("numabind Pinned Workload Example");
    println!("================================");

    let mut options = RunnerOptions::new()
        .duration(Duration::from_secs(seconds))
        .audit_buffers(true);
    if !template.is_empty() {
        options = options.template(template);
    }

    if numabind::has_numa_support() {
        run(&platform::native(), options)
    } else {
        println!("NUMA queries unavailable, using a simulated two-node machine");
        run(&SimulatedPlatform::with_nodes(2, 4), options)
    }
}
