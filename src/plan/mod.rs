//! Task planning and the sequential, fail-fast task executor.

mod tasks;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::aggregate::{CountsAccumulator, MandatoryProperties, OwnerDomain, Owners};
use crate::cache::{CacheStore, SlotLayout};
use crate::check::schema::SchemaContext;
use crate::check::{Checker, RecordChecks};
use crate::config::{CheckConfig, CheckFlags};
use crate::distribution::QueueDistribution;
use crate::error::{CheckError, Result};
use crate::multipass::MultiPassStore;
use crate::pool::PoolSettings;
use crate::progress::{ProgressListener, ProgressMonitorFactory};
use crate::record::{Record, TokenKind};
use crate::report::Reporter;
use crate::scan::{CheckingProcessor, Scan, ScanMode};
use crate::stage::CheckStage;
use crate::stats::{Statistics, StatisticsSnapshot};
use crate::store::{IndexAccessor, RecordStore, StoreAccess};

use self::tasks::TaskKind;

/// One unit of planned work, bound to a stage and a store.
#[derive(Clone)]
pub struct ConsistencyTask {
    name: String,
    stage: CheckStage,
    kind: TaskKind,
}

impl ConsistencyTask {
    fn new(name: impl Into<String>, stage: CheckStage, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            stage,
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> CheckStage {
        self.stage
    }

    /// Name of the store this task reads.
    pub fn store_name(&self, stores: &StoreAccess) -> String {
        self.kind.store(stores).0
    }

    /// High id of the store this task reads.
    pub fn high_id(&self, stores: &StoreAccess) -> u64 {
        self.kind.store(stores).1
    }
}

impl fmt::Debug for ConsistencyTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsistencyTask")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .finish()
    }
}

/// Builds the ordered task list for a run.
///
/// The order is fixed; flags only drop tasks. Stages never interleave.
pub fn plan(flags: &CheckFlags) -> Vec<ConsistencyTask> {
    use CheckStage as S;
    let mut tasks = Vec::new();
    let mut add = |name: &str, stage: CheckStage, kind: TaskKind| {
        tasks.push(ConsistencyTask::new(name, stage, kind));
    };

    if flags.check_graph {
        add("node_labels", S::NodeLabels, TaskKind::NodeLabels);
        add("relationship_counts", S::RelationshipCounts, TaskKind::RelationshipCounts);
        add("counts", S::RelationshipCounts, TaskKind::ReconcileCounts);
        add("node_next_rel", S::NodeNextRel, TaskKind::NodeNextRel);
        add("relationship_nodes", S::RelationshipNodes, TaskKind::RelationshipNodes);
        add("node_next_rel_check", S::NodeNextRelCheck, TaskKind::NodeNextRelCheck);
        add(
            "relationship_chain_forward",
            S::RelationshipChainForward,
            TaskKind::RelationshipChain,
        );
        add(
            "relationship_chain_backward",
            S::RelationshipChainBackward,
            TaskKind::RelationshipChain,
        );
        add("relationship_groups", S::RelationshipGroups, TaskKind::Groups);
        add("properties", S::Properties, TaskKind::Properties);
        if flags.check_label_scan_store {
            add("node_label_index", S::Properties, TaskKind::NodeLabelIndex);
        }
        add(
            "node_property_references",
            S::Properties,
            TaskKind::PropertyReferences(MultiPassStore::Nodes),
        );
        add(
            "relationship_property_references",
            S::Properties,
            TaskKind::PropertyReferences(MultiPassStore::Relationships),
        );
        if flags.check_property_owners {
            add(
                "property_owners",
                S::Properties,
                TaskKind::FinalizeOwners(vec![OwnerDomain::Property]),
            );
        }
        add("strings", S::Dynamics, TaskKind::Dynamic(OwnerDomain::String));
        add("arrays", S::Dynamics, TaskKind::Dynamic(OwnerDomain::Array));
        add(
            "dynamic_owners",
            S::Dynamics,
            TaskKind::FinalizeOwners(vec![OwnerDomain::String, OwnerDomain::Array]),
        );
    }

    // The rule and obligation passes share one context; the chain pass does not.
    let schema = SchemaContext::shared();
    add("schema_chains", S::Schema, TaskKind::SchemaChains);
    add("schema_rules", S::Schema, TaskKind::SchemaRules(Arc::clone(&schema)));
    add("schema_obligations", S::Schema, TaskKind::SchemaObligations(schema));

    if flags.check_graph {
        let kinds = [
            (TokenKind::RelationshipType, "relationship_type"),
            (TokenKind::PropertyKey, "property_key"),
            (TokenKind::Label, "label"),
        ];
        for (kind, name) in kinds {
            add(&format!("{name}_tokens"), S::Tokens, TaskKind::Tokens(kind));
            add(&format!("{name}_names"), S::Tokens, TaskKind::TokenNames(kind));
        }
        add(
            "token_name_owners",
            S::Tokens,
            TaskKind::FinalizeOwners(
                kinds
                    .iter()
                    .map(|&(kind, _)| OwnerDomain::names_of(kind))
                    .collect(),
            ),
        );
    }

    if flags.check_label_scan_store {
        add("label_scan", S::ScanStores, TaskKind::LabelScan);
        add("type_scan", S::ScanStores, TaskKind::TypeScan);
    }

    add("structures", S::Structures, TaskKind::Structures);

    if flags.check_indexes {
        add("index_structure", S::Indexes, TaskKind::IndexStructure);
        add("index_content", S::Indexes, TaskKind::IndexContent);
    }
    tasks
}

/// Aggregators and shared state that outlive single tasks.
pub struct SharedState {
    pub owners: Arc<Owners>,
    pub counts: Arc<CountsAccumulator>,
    pub mandatory: Arc<MandatoryProperties>,
    pub statistics: Arc<Statistics>,
    /// Indexes that passed structural verification so far.
    pub online_indexes: Mutex<Vec<Arc<dyn IndexAccessor>>>,
}

impl SharedState {
    pub fn new(stores: &StoreAccess, mandatory: MandatoryProperties) -> Self {
        Self {
            owners: Arc::new(Owners::new()),
            counts: Arc::new(CountsAccumulator::new()),
            mandatory: Arc::new(mandatory),
            statistics: Arc::new(Statistics::new()),
            online_indexes: Mutex::new(stores.indexes.clone()),
        }
    }
}

/// Everything a running task can reach.
pub struct RunContext<'a> {
    pub stores: &'a StoreAccess,
    pub config: &'a CheckConfig,
    pub flags: CheckFlags,
    pub checks: &'a RecordChecks,
    pub cache: &'a CacheStore,
    pub reporter: &'a dyn Reporter,
    pub progress: &'a dyn ProgressListener,
    pub shared: &'a SharedState,
    stage: CheckStage,
}

impl RunContext<'_> {
    /// Scan settings for the current stage.
    ///
    /// Endpoint affinity partitions node ids whatever store is scanned.
    pub(crate) fn scan(&self, distribution: QueueDistribution, high_id: u64) -> Scan {
        let mode = if self.stage.parallel() {
            let partition_high_id = match distribution {
                QueueDistribution::EndpointAffinity => self.stores.nodes.high_id(),
                QueueDistribution::RoundRobin => high_id,
            };
            ScanMode::Parallel {
                pool: PoolSettings {
                    workers: self.config.threads,
                    queue_capacity: self.config.queue_capacity,
                    poll_interval: self.config.poll_interval(),
                },
                distribution,
                partition_high_id,
            }
        } else {
            ScanMode::Sequential
        };
        Scan {
            mode,
            forward: self.stage.forward(),
            warm_up: false,
        }
    }

    pub(crate) fn run_scan<R: Record>(
        &self,
        scan: Scan,
        store: &dyn RecordStore<R>,
        check: Checker<R>,
    ) -> Result<u64> {
        let processor =
            CheckingProcessor::new(check, self.stores, self.reporter, &self.shared.statistics);
        scan.run(store, self.cache, &processor, self.progress)
    }

    /// Runs `check` over every record of `store`.
    pub(crate) fn check_store<R: Record>(
        &self,
        store: &dyn RecordStore<R>,
        check: Checker<R>,
        distribution: QueueDistribution,
    ) -> Result<()> {
        let scan = self.scan(distribution, store.high_id());
        self.run_scan(scan, store, check).map(drop)
    }
}

/// Timing and statistics of one finished task.
#[derive(Clone, Debug, Serialize)]
pub struct TaskRun {
    pub name: String,
    pub stage: CheckStage,
    pub store: String,
    pub elapsed_ms: u64,
    pub statistics: StatisticsSnapshot,
}

/// Runs planned tasks one after another, stopping at the first failure.
pub struct Executor<'a> {
    pub stores: &'a StoreAccess,
    pub config: &'a CheckConfig,
    pub flags: CheckFlags,
    pub checks: &'a RecordChecks,
    pub reporter: &'a dyn Reporter,
    pub progress: &'a dyn ProgressMonitorFactory,
    pub shared: &'a SharedState,
}

impl Executor<'_> {
    pub fn execute(&self, tasks: &[ConsistencyTask]) -> Result<Vec<TaskRun>> {
        let mut cache = CacheStore::new();
        let mut current = None;
        let mut runs = Vec::with_capacity(tasks.len());
        for task in tasks {
            if current != Some(task.stage) {
                self.enter_stage(&mut cache, task.stage);
                current = Some(task.stage);
            }
            runs.push(self.run_task(task, &cache)?);
        }
        cache.reset();
        Ok(runs)
    }

    /// Installs the stage's cache layout. Holding `&mut` here is the barrier
    /// between the workers of consecutive stages.
    fn enter_stage(&self, cache: &mut CacheStore, stage: CheckStage) {
        let sizes = stage.cache_slot_sizes();
        if !stage.node_keyed_cache() {
            if !cache.layout().is_empty() {
                cache.reset();
            }
        } else if !stage.inherits_cache() || cache.layout().sizes() != sizes {
            cache.prepare_for_processing_of_single_store(
                self.stores.nodes.high_id(),
                SlotLayout::new(sizes),
            );
        }
        cache.set_forward(stage.forward());
        info!(stage = %stage, purpose = stage.purpose(), "check.stage.start");
    }

    fn run_task(&self, task: &ConsistencyTask, cache: &CacheStore) -> Result<TaskRun> {
        let (store, high_id) = task.kind.store(self.stores);
        info!(task = %task.name, stage = %task.stage, store = %store, high_id, "check.task.start");
        let started = Instant::now();
        let listener = self.progress.listener(&task.name);
        let ctx = RunContext {
            stores: self.stores,
            config: self.config,
            flags: self.flags,
            checks: self.checks,
            cache,
            reporter: self.reporter,
            progress: listener.as_ref(),
            shared: self.shared,
            stage: task.stage,
        };
        let outcome = task.kind.run(&ctx);
        let statistics = self.shared.statistics.reset();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Err(source) = outcome {
            error!(task = %task.name, stage = %task.stage, error = %source, "check.task.failed");
            return Err(CheckError::TaskFailed {
                task: task.name.clone(),
                stage: task.stage.to_string(),
                store,
                high_id,
                source: Box::new(source),
            });
        }
        if self.config.verbose {
            info!(task = %task.name, elapsed_ms, statistics = ?statistics, "check.task.finish");
        } else {
            debug!(task = %task.name, elapsed_ms, statistics = ?statistics, "check.task.finish");
        }
        Ok(TaskRun {
            name: task.name.clone(),
            stage: task.stage,
            store,
            elapsed_ms,
            statistics,
        })
    }
}
