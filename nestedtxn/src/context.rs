// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution contexts and their scope stacks
//!
//! An execution context identifies one logical caller (a request, a worker, a
//! thread). The registry maps every context to the stack of scopes it has
//! open; the innermost scope names the context's current transaction.

use crate::error::TxnError;
use crate::txn::{SavepointId, TransactionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Identity of a logical caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

thread_local! {
    static THREAD_CONTEXT: ContextId = ContextId::new();
}

impl ContextId {
    /// Create a fresh context identity
    pub fn new() -> Self {
        ContextId(Uuid::new_v4())
    }

    /// Stable context identity of the calling thread
    pub fn current_thread() -> Self {
        THREAD_CONTEXT.with(|ctx| *ctx)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ContextId {
    fn from(uuid: Uuid) -> Self {
        ContextId(uuid)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx_{}", self.0.simple())
    }
}

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one begin/commit (or begin/rollback) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    pub(crate) fn next() -> Self {
        ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope_{}", self.0)
    }
}

/// Handle returned by `begin`, naming one open scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHandle {
    context: ContextId,
    transaction: TransactionId,
    scope: ScopeId,
    depth: usize,
}

impl TransactionHandle {
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// The root transaction this scope belongs to
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Nesting depth, 0 for the outermost scope
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_outermost(&self) -> bool {
        self.depth == 0
    }
}

/// One entry of a context's scope stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScopeFrame {
    pub scope: ScopeId,
    pub transaction: TransactionId,
    /// Implicit savepoint backing a nested scope; `None` for the outermost
    pub savepoint: Option<SavepointId>,
    pub rollback_only: bool,
}

/// Registry of open scopes per context
#[derive(Debug, Default)]
pub(crate) struct ContextRegistry {
    stacks: RwLock<HashMap<ContextId, Vec<ScopeFrame>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Innermost scope of `ctx`
    pub fn current(&self, ctx: ContextId) -> Option<TransactionHandle> {
        let stacks = self.stacks.read();
        let frames = stacks.get(&ctx)?;
        frames.last().map(|frame| TransactionHandle {
            context: ctx,
            transaction: frame.transaction,
            scope: frame.scope,
            depth: frames.len() - 1,
        })
    }

    pub fn depth(&self, ctx: ContextId) -> usize {
        self.stacks.read().get(&ctx).map(Vec::len).unwrap_or(0)
    }

    pub fn innermost(&self, ctx: ContextId) -> Option<ScopeFrame> {
        self.stacks
            .read()
            .get(&ctx)
            .and_then(|frames| frames.last().cloned())
    }

    /// Open a new innermost scope
    pub fn push(&self, ctx: ContextId, frame: ScopeFrame) -> TransactionHandle {
        let mut stacks = self.stacks.write();
        let frames = stacks.entry(ctx).or_default();
        let handle = TransactionHandle {
            context: ctx,
            transaction: frame.transaction,
            scope: frame.scope,
            depth: frames.len(),
        };
        frames.push(frame);
        handle
    }

    /// Resolve `handle` to its frame, which must be the innermost one
    pub fn check_innermost(&self, handle: &TransactionHandle) -> Result<ScopeFrame, TxnError> {
        let stacks = self.stacks.read();
        let frames = stacks.get(&handle.context).map(Vec::as_slice).unwrap_or(&[]);

        match frames.last() {
            Some(top) if top.scope == handle.scope => Ok(top.clone()),
            Some(top) if frames.iter().any(|f| f.scope == handle.scope) => {
                Err(TxnError::NestingViolation {
                    reason: format!(
                        "{} is not the innermost scope of {} (innermost is {})",
                        handle.scope, handle.context, top.scope
                    ),
                })
            }
            _ => Err(TxnError::StateError {
                transaction: handle.transaction,
                reason: format!("{} has already been resolved", handle.scope),
            }),
        }
    }

    /// Close `scope` if it is the innermost scope of `ctx`
    pub fn pop(&self, ctx: ContextId, scope: ScopeId) -> Option<ScopeFrame> {
        let mut stacks = self.stacks.write();
        let frames = stacks.get_mut(&ctx)?;
        if frames.last().map(|f| f.scope) != Some(scope) {
            return None;
        }
        let frame = frames.pop();
        if frames.is_empty() {
            stacks.remove(&ctx);
        }
        frame
    }

    /// Flag the innermost scope of `ctx` so that committing it rolls back
    pub fn set_rollback_only(&self, ctx: ContextId) -> Result<TransactionHandle, TxnError> {
        let mut stacks = self.stacks.write();
        let frames = stacks
            .get_mut(&ctx)
            .ok_or(TxnError::NoActiveTransaction { context: ctx })?;
        let depth = frames.len().saturating_sub(1);
        let top = frames
            .last_mut()
            .ok_or(TxnError::NoActiveTransaction { context: ctx })?;
        top.rollback_only = true;
        Ok(TransactionHandle {
            context: ctx,
            transaction: top.transaction,
            scope: top.scope,
            depth,
        })
    }

    /// Number of contexts with at least one open scope
    pub fn active_contexts(&self) -> usize {
        self.stacks.read().len()
    }
}
