// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Dependency coordination
//!
//! Every module carries a [`Settlement`]: a counter of children it is still
//! waiting on, a flag recording that its own compile step has returned, and
//! a one-shot outcome broadcast to waiters. A module settles exactly once,
//! when the flag is set and the counter is zero.
//!
//! Requesters record "awaiting" edges to the modules they wait on. Before
//! waiting on a module, the coordinator walks those edges: if the target
//! (transitively) awaits the requester, waiting would close a cycle, so
//! the requester takes the in-flight interface instead.

use crate::error::{ModuleError, Result};
use crate::module_system::module::{Module, ModuleState};
use futures::channel::oneshot;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Per-module settlement bookkeeping
#[derive(Default)]
pub(crate) struct Settlement {
    outstanding: usize,
    compiled: bool,
    outcome: Option<Result<()>>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    awaiting: Vec<Weak<Module>>,
    dependents: Vec<Weak<Module>>,
}

impl Settlement {
    /// Bookkeeping of a module that is complete from the start
    pub(crate) fn settled() -> Self {
        Self {
            compiled: true,
            outcome: Some(Ok(())),
            ..Self::default()
        }
    }
}

/// How a requester relates to a module it obtained from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    /// The requester may wait on the module
    Linked,
    /// The module (transitively) waits on the requester
    Cyclic,
}

/// Tracks outstanding children and gates settlement notifications
#[derive(Default)]
pub(crate) struct DependencyCoordinator {
    graph: Mutex<()>,
}

impl DependencyCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record that `requester` waits on the freshly reserved `target`
    pub(crate) fn attach(&self, requester: &Arc<Module>, target: &Arc<Module>) {
        let _graph = self.graph.lock();
        requester
            .settlement
            .lock()
            .awaiting
            .push(Arc::downgrade(target));
    }

    /// Record that `requester` waits on the in-flight `target`, unless that
    /// would close a cycle
    pub(crate) fn link(&self, requester: &Arc<Module>, target: &Arc<Module>) -> Link {
        let _graph = self.graph.lock();
        if Arc::ptr_eq(requester, target) || awaits(target, requester) {
            debug!(
                "Cycle: {} is waiting on {}",
                target.location(),
                requester.location()
            );
            return Link::Cyclic;
        }
        requester
            .settlement
            .lock()
            .awaiting
            .push(Arc::downgrade(target));
        Link::Linked
    }

    /// Drop the awaiting edge `requester -> target`
    pub(crate) fn detach(&self, requester: &Arc<Module>, target: &Arc<Module>) {
        let _graph = self.graph.lock();
        requester
            .settlement
            .lock()
            .awaiting
            .retain(|edge| !std::ptr::eq(edge.as_ptr(), Arc::as_ptr(target)));
    }

    /// Count one more outstanding child of `parent`.
    ///
    /// Returns false when `parent` has already reached a terminal outcome,
    /// in which case nothing was counted.
    pub(crate) fn open_child(&self, parent: &Module) -> bool {
        let mut settlement = parent.settlement.lock();
        if settlement.outcome.is_some() {
            return false;
        }
        settlement.outstanding += 1;
        true
    }

    /// One outstanding child of `parent` has completed
    pub(crate) fn close_child(&self, parent: &Arc<Module>) {
        let ready = {
            let mut settlement = parent.settlement.lock();
            if settlement.outcome.is_some() {
                return;
            }
            settlement.outstanding = settlement.outstanding.saturating_sub(1);
            settlement.compiled && settlement.outstanding == 0
        };
        if ready {
            self.settle(parent);
        }
    }

    /// Make `dependent` wait for `target` to settle.
    ///
    /// Returns false (and counts nothing) when `target` already has an
    /// outcome.
    pub(crate) fn add_dependent(&self, target: &Arc<Module>, dependent: &Arc<Module>) -> bool {
        let _graph = self.graph.lock();
        let mut settlement = target.settlement.lock();
        if settlement.outcome.is_some() || !self.open_child(dependent) {
            return false;
        }
        trace!("{} waits for {}", dependent.location(), target.location());
        settlement.dependents.push(Arc::downgrade(dependent));
        true
    }

    /// The module's own compile step (or native bind) has returned
    pub(crate) fn compile_returned(&self, module: &Arc<Module>) {
        let ready = {
            let mut settlement = module.settlement.lock();
            if settlement.outcome.is_some() {
                return;
            }
            settlement.compiled = true;
            if settlement.outstanding > 0 {
                module.advance(ModuleState::AwaitingChildren);
            }
            settlement.outstanding == 0
        };
        if ready {
            self.settle(module);
        }
    }

    fn settle(&self, module: &Arc<Module>) {
        let (waiters, dependents) = {
            let mut settlement = module.settlement.lock();
            if settlement.outcome.is_some() {
                return;
            }
            settlement.outcome = Some(Ok(()));
            settlement.awaiting.clear();
            module.advance(ModuleState::Settled);
            (
                std::mem::take(&mut settlement.waiters),
                std::mem::take(&mut settlement.dependents),
            )
        };

        debug!("Settled {}", module.location());
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
        for dependent in dependents.iter().filter_map(Weak::upgrade) {
            self.close_child(&dependent);
        }
    }

    /// Fail `module` and deliver `err` to everything waiting on it.
    ///
    /// Dependents are released, not failed: the error belongs to the
    /// immediate waiter.
    pub(crate) fn fail(&self, module: &Arc<Module>, err: &ModuleError) {
        let (waiters, dependents) = {
            let mut settlement = module.settlement.lock();
            if settlement.outcome.is_some() {
                return;
            }
            settlement.outcome = Some(Err(err.clone()));
            settlement.awaiting.clear();
            module.advance(ModuleState::Failed);
            (
                std::mem::take(&mut settlement.waiters),
                std::mem::take(&mut settlement.dependents),
            )
        };

        debug!("Failed {}: {}", module.location(), err);
        for waiter in waiters {
            let _ = waiter.send(Err(err.clone()));
        }
        for dependent in dependents.iter().filter_map(Weak::upgrade) {
            self.close_child(&dependent);
        }
    }

    /// Terminal outcome of `module`, if it has one
    pub(crate) fn outcome(&self, module: &Module) -> Option<Result<()>> {
        module.settlement.lock().outcome.clone()
    }

    /// Wait until `module` settles or fails
    pub(crate) async fn wait(&self, module: &Arc<Module>) -> Result<()> {
        let receiver = {
            let mut settlement = module.settlement.lock();
            if let Some(outcome) = &settlement.outcome {
                return outcome.clone();
            }
            let (sender, receiver) = oneshot::channel();
            settlement.waiters.push(sender);
            receiver
        };

        receiver
            .await
            .unwrap_or_else(|_| Err(ModuleError::Suspended(module.location().to_string())))
    }
}

/// Whether `from` transitively waits on `target` through live awaiting edges
fn awaits(from: &Arc<Module>, target: &Arc<Module>) -> bool {
    let mut visited: HashSet<*const Module> = HashSet::new();
    let mut stack = vec![Arc::clone(from)];

    while let Some(node) = stack.pop() {
        if !visited.insert(Arc::as_ptr(&node)) {
            continue;
        }
        let edges: Vec<Arc<Module>> = node
            .settlement
            .lock()
            .awaiting
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|edge| !edge.state().is_terminal())
            .collect();
        for edge in edges {
            if Arc::ptr_eq(&edge, target) {
                return true;
            }
            stack.push(edge);
        }
    }
    false
}
