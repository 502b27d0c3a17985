//! Topology ownership and the cooperative driver loop.
//!
//! A topology owns its leaf processors; every leaf owns its upstream chain.
//! One call to [`Topology::process`] gives each leaf one cooperative tick,
//! which recursively pulls records down from the sources. Exactly one OS
//! thread drives a topology; multiple topologies in one process are
//! independent values.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rill_log::StartOffset;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::metrics::{Metric, MetricTags};
use crate::processor::Processor;

/// Identity of the application owning a topology; flows into metric tags
/// and storage paths.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub app_id: String,
    pub instance_id: String,
    pub topology_id: String,
}

impl AppContext {
    /// `app_id__instance`, the first storage path segment.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}__{}", self.app_id, self.instance_id)
    }

    /// Application-level metric tags; processors add their own on top.
    #[must_use]
    pub fn base_tags(&self) -> MetricTags {
        MetricTags::new()
            .with("app_id", &self.app_id)
            .with("app_instance", &self.instance_id)
            .with("topology", &self.topology_id)
    }
}

/// Creates topologies that share one application identity and config.
pub struct TopologyBuilder {
    app_id: String,
    instance_id: String,
    config: RuntimeConfig,
    next_topology: usize,
}

impl TopologyBuilder {
    #[must_use]
    pub fn new(app_id: &str, instance_id: &str, config: RuntimeConfig) -> Self {
        Self {
            app_id: app_id.to_string(),
            instance_id: instance_id.to_string(),
            config,
            next_topology: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn create_topology(&mut self) -> Topology {
        let topology_id = format!("topology-{}", self.next_topology);
        self.next_topology += 1;
        Topology::new(
            AppContext {
                app_id: self.app_id.clone(),
                instance_id: self.instance_id.clone(),
                topology_id,
            },
            self.config.clone(),
        )
    }
}

/// One processing graph and its driver state.
pub struct Topology {
    ctx: AppContext,
    config: RuntimeConfig,
    processors: Vec<Box<dyn Processor>>,
    metrics_initialized: bool,
    stop: Arc<AtomicBool>,
    closed: bool,
}

impl Topology {
    #[must_use]
    pub fn new(ctx: AppContext, config: RuntimeConfig) -> Self {
        tracing::info!(
            app = %ctx.app_id,
            topology = %ctx.topology_id,
            "topology created"
        );
        Self {
            ctx,
            config,
            processors: Vec::new(),
            metrics_initialized: false,
            stop: Arc::new(AtomicBool::new(false)),
            closed: false,
        }
    }

    #[must_use]
    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Storage directory for a store-owning processor.
    #[must_use]
    pub fn store_dir(&self, processor_name: &str, partition: i32) -> PathBuf {
        rill_paths::store_dir(
            &self.config.storage_root,
            &self.ctx.identity(),
            &self.ctx.topology_id,
            processor_name,
            partition,
        )
    }

    /// Register a leaf processor. The leaf owns its whole upstream chain.
    pub fn add(&mut self, processor: impl Processor + 'static) {
        self.processors.push(Box::new(processor));
    }

    /// Shared stop flag; setting it makes [`run`](Topology::run) return.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Stamp every metric in the graph with identity and processor tags.
    pub fn init_metrics(&mut self) {
        for p in &mut self.processors {
            p.init_metrics(&self.ctx);
        }
        self.metrics_initialized = true;
    }

    pub fn start(&mut self, offset: StartOffset) -> Result<()> {
        if !self.metrics_initialized {
            self.init_metrics();
        }
        for p in &mut self.processors {
            p.start(offset)?;
        }
        tracing::info!(topology = %self.ctx.topology_id, ?offset, "topology started");
        Ok(())
    }

    /// One cooperative tick over every leaf.
    pub fn process(&mut self, now: i64) -> usize {
        if self.closed {
            return 0;
        }
        self.processors.iter_mut().map(|p| p.process(now)).sum()
    }

    #[must_use]
    pub fn eof(&self) -> bool {
        self.processors.iter().all(|p| p.eof())
    }

    /// Write back progress everywhere. A failure is fatal: the topology
    /// closes before the error is returned.
    pub fn commit(&mut self, flush: bool) -> Result<()> {
        for p in &mut self.processors {
            if let Err(e) = p.commit(flush) {
                tracing::error!(topology = %self.ctx.topology_id, error = %e, "commit failed");
                self.close();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drive every leaf to EOF, punctuate, and commit durably.
    pub fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(crate::error::Error::Closed);
        }
        for p in &mut self.processors {
            if let Err(e) = p.flush() {
                tracing::error!(topology = %self.ctx.topology_id, error = %e, "flush failed");
                self.close();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stop and release everything. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop.store(true, Ordering::Release);
        for p in &mut self.processors {
            p.close();
        }
        self.closed = true;
        tracing::info!(topology = %self.ctx.topology_id, "topology closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn for_each_metric(&self, f: &mut dyn FnMut(&Metric)) {
        for p in &self.processors {
            p.for_each_metric(f);
        }
    }

    /// The driver loop: tick, commit on an interval, sleep when idle. Runs
    /// until the stop flag is set.
    pub fn run(&mut self) -> Result<()> {
        let mut last_commit = Instant::now();
        while !self.stop.load(Ordering::Acquire) {
            let processed = self.process(crate::now_ms());
            if last_commit.elapsed() >= self.config.commit_interval {
                self.commit(false)?;
                last_commit = Instant::now();
            }
            if processed == 0 {
                std::thread::sleep(self.config.tick_interval);
            }
        }
        self.commit(true)
    }
}

impl Drop for Topology {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_numbers_topologies() {
        let mut builder = TopologyBuilder::new("app", "a1", RuntimeConfig::default());
        let t0 = builder.create_topology();
        let t1 = builder.create_topology();
        assert_eq!(t0.context().topology_id, "topology-0");
        assert_eq!(t1.context().topology_id, "topology-1");
    }

    #[test]
    fn store_dir_layout() {
        let mut config = RuntimeConfig::default();
        config.storage_root = PathBuf::from("/data");
        let mut builder = TopologyBuilder::new("ingest", "prod-1", config);
        let t = builder.create_topology();
        assert_eq!(
            t.store_dir("ktable(users)", 3),
            PathBuf::from("/data/ingest__prod-1/topology-0/ktable(users)#3")
        );
    }

    #[test]
    fn empty_topology_is_at_eof() {
        let mut builder = TopologyBuilder::new("app", "i", RuntimeConfig::default());
        let mut t = builder.create_topology();
        assert!(t.eof());
        assert_eq!(t.process(0), 0);
        t.close();
        t.close();
        assert!(t.is_closed());
    }
}
