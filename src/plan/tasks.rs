//! What each planned task does when it runs.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::aggregate::{CountsReconciliation, OwnerDomain};
use crate::check::builtin::live;
use crate::check::schema::{self, SchemaContext};
use crate::check::{cached, decorate, index, Checker};
use crate::distribution::QueueDistribution;
use crate::error::{CheckError, Result};
use crate::multipass::{property_heads_in, MultiPassStore};
use crate::record::{NodeRecord, Record, RelationshipRecord, TokenKind};
use crate::report::Finding;
use crate::store::{RecordStore, StoreAccess};
use crate::types::{RecordType, NONE};

use super::RunContext;

/// The work behind one planned task.
#[derive(Clone)]
pub(crate) enum TaskKind {
    NodeLabels,
    RelationshipCounts,
    ReconcileCounts,
    NodeNextRel,
    RelationshipNodes,
    NodeNextRelCheck,
    RelationshipChain,
    Groups,
    Properties,
    NodeLabelIndex,
    PropertyReferences(MultiPassStore),
    FinalizeOwners(Vec<OwnerDomain>),
    Dynamic(OwnerDomain),
    SchemaChains,
    SchemaRules(Arc<Mutex<SchemaContext>>),
    SchemaObligations(Arc<Mutex<SchemaContext>>),
    Tokens(TokenKind),
    TokenNames(TokenKind),
    LabelScan,
    TypeScan,
    Structures,
    IndexStructure,
    IndexContent,
}

impl TaskKind {
    /// Name and high id of the store the task reads.
    pub(crate) fn store(&self, stores: &StoreAccess) -> (String, u64) {
        fn of<R: Record>(store: &dyn RecordStore<R>) -> (String, u64) {
            (store.name().to_string(), store.high_id())
        }
        match self {
            TaskKind::NodeLabels
            | TaskKind::NodeNextRel
            | TaskKind::NodeNextRelCheck
            | TaskKind::NodeLabelIndex => of(stores.nodes.as_ref()),
            TaskKind::RelationshipCounts
            | TaskKind::RelationshipNodes
            | TaskKind::RelationshipChain => of(stores.relationships.as_ref()),
            TaskKind::ReconcileCounts => match &stores.counts {
                Some(counts) => (counts.name().to_string(), 0),
                None => ("counts".to_string(), 0),
            },
            TaskKind::Groups => of(stores.groups.as_ref()),
            TaskKind::Properties => of(stores.properties.as_ref()),
            TaskKind::PropertyReferences(MultiPassStore::Relationships) => {
                of(stores.relationships.as_ref())
            }
            TaskKind::PropertyReferences(MultiPassStore::Nodes) => of(stores.nodes.as_ref()),
            TaskKind::FinalizeOwners(domains) => {
                let names: Vec<String> = domains
                    .iter()
                    .map(|domain| domain.record_type().to_string())
                    .collect();
                (names.join(","), 0)
            }
            TaskKind::Dynamic(domain) => match stores.dynamic(*domain) {
                Some(store) => of(store.as_ref()),
                None => (domain.record_type().to_string(), 0),
            },
            TaskKind::SchemaChains | TaskKind::SchemaRules(_) | TaskKind::SchemaObligations(_) => {
                of(stores.schema.as_ref())
            }
            TaskKind::Tokens(kind) => of(stores.tokens(*kind).as_ref()),
            TaskKind::TokenNames(kind) => match stores.dynamic(OwnerDomain::names_of(*kind)) {
                Some(store) => of(store.as_ref()),
                None => (kind.record_type().to_string(), 0),
            },
            TaskKind::LabelScan => match &stores.label_scan {
                Some(store) => of(store.as_ref()),
                None => ("label_scan".to_string(), 0),
            },
            TaskKind::TypeScan => match &stores.type_scan {
                Some(store) => of(store.as_ref()),
                None => ("type_scan".to_string(), 0),
            },
            TaskKind::Structures => ("structures".to_string(), stores.structures.len() as u64),
            TaskKind::IndexStructure | TaskKind::IndexContent => {
                ("indexes".to_string(), stores.indexes.len() as u64)
            }
        }
    }

    pub(crate) fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let stores = ctx.stores;
        let shared = ctx.shared;
        match self {
            TaskKind::NodeLabels => {
                let mut check = ctx.checks.node.clone();
                if ctx.flags.check_property_owners {
                    check = decorate::claiming_properties(check, Arc::clone(&shared.owners));
                }
                if !shared.mandatory.is_empty() {
                    check =
                        decorate::requiring_node_properties(check, Arc::clone(&shared.mandatory));
                }
                check = decorate::counting_nodes(check, Arc::clone(&shared.counts));
                ctx.check_store(
                    stores.nodes.as_ref(),
                    cached::cache_labels(check),
                    QueueDistribution::RoundRobin,
                )
            }
            TaskKind::RelationshipCounts => {
                let mut check = ctx.checks.relationship.clone();
                if ctx.flags.check_property_owners {
                    check = decorate::claiming_properties(check, Arc::clone(&shared.owners));
                }
                if !shared.mandatory.is_empty() {
                    check = decorate::requiring_relationship_properties(
                        check,
                        Arc::clone(&shared.mandatory),
                    );
                }
                check = decorate::counting_relationships(check, Arc::clone(&shared.counts));
                ctx.check_store(stores.relationships.as_ref(), check, QueueDistribution::RoundRobin)
            }
            TaskKind::ReconcileCounts => reconcile_counts(ctx),
            TaskKind::NodeNextRel => ctx.check_store(
                stores.nodes.as_ref(),
                cached::cache_next_rel(Arc::clone(&shared.statistics)),
                QueueDistribution::RoundRobin,
            ),
            TaskKind::RelationshipNodes => ctx.check_store(
                stores.relationships.as_ref(),
                cached::check_endpoints(),
                QueueDistribution::EndpointAffinity,
            ),
            TaskKind::NodeNextRelCheck => ctx.check_store(
                stores.nodes.as_ref(),
                cached::check_next_rel_seen(),
                QueueDistribution::RoundRobin,
            ),
            TaskKind::RelationshipChain => ctx.check_store(
                stores.relationships.as_ref(),
                cached::check_chain_links(Arc::clone(&shared.statistics)),
                QueueDistribution::EndpointAffinity,
            ),
            TaskKind::Groups => ctx.check_store(
                stores.groups.as_ref(),
                ctx.checks.group.clone(),
                QueueDistribution::RoundRobin,
            ),
            TaskKind::Properties => {
                let check = decorate::owning_property_values(
                    ctx.checks.property.clone(),
                    Arc::clone(&shared.owners),
                    ctx.flags.check_property_owners,
                );
                let mut scan = ctx.scan(QueueDistribution::RoundRobin, stores.properties.high_id());
                scan.warm_up = ctx.config.warm_up;
                ctx.run_scan(scan, stores.properties.as_ref(), check).map(drop)
            }
            TaskKind::NodeLabelIndex => {
                if stores.label_scan.is_none() {
                    debug!("check.label_index.skipped");
                    return Ok(());
                }
                ctx.check_store(
                    stores.nodes.as_ref(),
                    index::node_in_label_index(),
                    QueueDistribution::RoundRobin,
                )
            }
            TaskKind::PropertyReferences(target) => property_references(ctx, *target),
            TaskKind::FinalizeOwners(domains) => {
                for &domain in domains {
                    finalize_owners(ctx, domain)?;
                }
                Ok(())
            }
            TaskKind::Dynamic(domain) => dynamic_chains(ctx, *domain),
            TaskKind::SchemaChains => ctx.check_store(
                stores.schema.as_ref(),
                schema::chains(ctx.checks.schema.clone()),
                QueueDistribution::RoundRobin,
            ),
            TaskKind::SchemaRules(context) => ctx.check_store(
                stores.schema.as_ref(),
                schema::rules(Arc::clone(context)),
                QueueDistribution::RoundRobin,
            ),
            TaskKind::SchemaObligations(context) => {
                ctx.check_store(
                    stores.schema.as_ref(),
                    schema::obligations(Arc::clone(context)),
                    QueueDistribution::RoundRobin,
                )?;
                let mut context = context.lock();
                debug!(rules = context.rules(), "check.schema.verified");
                ctx.reporter.report_all(context.unresolved());
                Ok(())
            }
            TaskKind::Tokens(kind) => ctx.check_store(
                stores.tokens(*kind).as_ref(),
                decorate::claiming_token_names(
                    ctx.checks.token.clone(),
                    Arc::clone(&shared.owners),
                ),
                QueueDistribution::RoundRobin,
            ),
            TaskKind::TokenNames(kind) => dynamic_chains(ctx, OwnerDomain::names_of(*kind)),
            TaskKind::LabelScan => match &stores.label_scan {
                Some(store) => ctx.check_store(
                    store.as_ref(),
                    index::label_scan_entry(),
                    QueueDistribution::RoundRobin,
                ),
                None => {
                    debug!("check.label_scan.skipped");
                    Ok(())
                }
            },
            TaskKind::TypeScan => match &stores.type_scan {
                Some(store) => ctx.check_store(
                    store.as_ref(),
                    index::type_scan_entry(),
                    QueueDistribution::RoundRobin,
                ),
                None => {
                    debug!("check.type_scan.skipped");
                    Ok(())
                }
            },
            TaskKind::Structures => {
                ctx.progress.started(stores.structures.len() as u64);
                for (position, check) in stores.structures.iter().enumerate() {
                    ctx.reporter.report_all(index::structure(position, check.as_ref()));
                    ctx.progress.add(1);
                }
                ctx.progress.done();
                Ok(())
            }
            TaskKind::IndexStructure => {
                let mut online = shared.online_indexes.lock();
                ctx.progress.started(online.len() as u64);
                online.retain(|accessor| {
                    let (findings, sound) = index::index_structure(accessor.as_ref());
                    ctx.reporter.report_all(findings);
                    ctx.progress.add(1);
                    if !sound {
                        info!(index = accessor.name(), "check.index.offline");
                    }
                    sound
                });
                ctx.progress.done();
                Ok(())
            }
            TaskKind::IndexContent => {
                let online = shared.online_indexes.lock().clone();
                ctx.progress.started(online.len() as u64);
                for accessor in &online {
                    ctx.reporter.report_all(index::index_content(accessor.as_ref(), stores)?);
                    ctx.progress.add(1);
                }
                ctx.progress.done();
                Ok(())
            }
        }
    }
}

fn reconcile_counts(ctx: &RunContext<'_>) -> Result<()> {
    match ctx.shared.counts.reconcile(ctx.stores.counts.as_deref())? {
        CountsReconciliation::Checked(mismatches) => {
            let findings = mismatches
                .into_iter()
                .enumerate()
                .map(|(position, mismatch)| {
                    Finding::error(
                        RecordType::Counts,
                        position as u64,
                        format!(
                            "count for {} is {} but the counts store holds {}",
                            mismatch.key, mismatch.expected, mismatch.persisted
                        ),
                    )
                })
                .collect();
            ctx.reporter.report_all(findings);
        }
        CountsReconciliation::StoreUnavailable(reason) => {
            ctx.reporter.report(Finding::error(
                RecordType::Counts,
                0,
                format!("counts store unavailable, counts were not checked: {reason}"),
            ));
        }
    }
    Ok(())
}

fn property_references(ctx: &RunContext<'_>, target: MultiPassStore) -> Result<()> {
    let windows =
        MultiPassStore::windows(ctx.stores.properties.high_id(), ctx.config.records_per_pass);
    debug!(store = ?target, passes = windows.len(), "check.multipass.start");
    for window in windows {
        match target {
            MultiPassStore::Relationships => ctx.check_store(
                ctx.stores.relationships.as_ref(),
                property_heads_in::<RelationshipRecord>(window),
                QueueDistribution::RoundRobin,
            )?,
            MultiPassStore::Nodes => ctx.check_store(
                ctx.stores.nodes.as_ref(),
                property_heads_in::<NodeRecord>(window),
                QueueDistribution::RoundRobin,
            )?,
        }
    }
    Ok(())
}

fn dynamic_chains(ctx: &RunContext<'_>, domain: OwnerDomain) -> Result<()> {
    let store = dynamic_store(ctx.stores, domain)?;
    let check: Checker<_> = decorate::owning_dynamic_chain(
        (ctx.checks.dynamic)(domain),
        Arc::clone(&ctx.shared.owners),
        domain,
    );
    ctx.check_store(store.as_ref(), check, QueueDistribution::RoundRobin)
}

fn dynamic_store(
    stores: &StoreAccess,
    domain: OwnerDomain,
) -> Result<&Arc<dyn RecordStore<crate::record::DynamicRecord>>> {
    stores
        .dynamic(domain)
        .ok_or_else(|| CheckError::invariant(format!("{domain:?} has no dynamic store")))
}

/// Reports the chains of `domain` that nothing references.
fn finalize_owners(ctx: &RunContext<'_>, domain: OwnerDomain) -> Result<()> {
    let stores = ctx.stores;
    let tracker = ctx.shared.owners.get(domain);
    let orphans = match domain {
        OwnerDomain::Property => tracker.finalize(|id| {
            Ok(live(stores.properties.as_ref(), id)?
                .is_some_and(|record| record.prev_prop == NONE))
        })?,
        _ => {
            let store = dynamic_store(stores, domain)?;
            tracker.finalize(|id| Ok(live(store.as_ref(), id)?.is_some()))?
        }
    };
    info!(domain = ?domain, orphans = orphans.len(), "check.owner.orphans");
    let record_type = domain.record_type();
    ctx.reporter.report_all(
        orphans
            .into_iter()
            .map(|id| Finding::error(record_type, id, "chain is not referenced by any record"))
            .collect(),
    );
    Ok(())
}
