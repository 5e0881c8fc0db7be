//! Per-type handler pools.
//!
//! Each registered handler type gets a producer coroutine that keeps a
//! bounded stock of ready instances. Capacity is enforced with a permit
//! channel: the producer consumes one permit per instance it builds and
//! blocks when none are left; each checkout returns a permit, so the
//! producer never runs more than `capacity` instances ahead of demand.
//!
//! `soft_stop` closes the permit channel. The producer drains out, already
//! built instances remain claimable, and once the item channel is empty
//! every further checkout reports [`Error::PoolClosed`].

use crate::error::{Error, Result};
use crate::handler::{HandlerFactory, HandlerInstance, HandlerKind, Registration};
use may::sync::mpsc;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub struct HandlerPool {
    name: String,
    kind: HandlerKind,
    items: mpsc::Receiver<HandlerInstance>,
    permits: Mutex<Option<mpsc::Sender<()>>>,
    producer: Mutex<Option<may::coroutine::JoinHandle<()>>>,
    closed: AtomicBool,
    produced: AtomicU64,
}

impl HandlerPool {
    /// Spawn the producer and pre-fill the pool up to `capacity`.
    pub(crate) fn new(
        name: &str,
        kind: HandlerKind,
        capacity: usize,
        factory: HandlerFactory,
        stack_size: usize,
    ) -> Result<Self> {
        let (permit_tx, permit_rx) = mpsc::channel::<()>();
        let (item_tx, item_rx) = mpsc::channel::<HandlerInstance>();
        for _ in 0..capacity {
            let _ = permit_tx.send(());
        }
        let pool_name = name.to_string();
        let producer_name = format!("pool-{name}");
        // SAFETY: stack_size is a plain usize from runtime config and the
        // producer closure owns the factory and both channel ends.
        #[allow(unsafe_code)]
        let handle = unsafe {
            may::coroutine::Builder::new()
                .name(producer_name)
                .stack_size(stack_size)
                .spawn(move || {
                    while permit_rx.recv().is_ok() {
                        if item_tx.send(factory()).is_err() {
                            break;
                        }
                    }
                    debug!(pool = %pool_name, "producer stopped");
                })
        }
        .map_err(|e| Error::Config(format!("cannot spawn producer for `{name}`: {e}")))?;
        Ok(HandlerPool {
            name: name.to_string(),
            kind,
            items: item_rx,
            permits: Mutex::new(Some(permit_tx)),
            producer: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
            produced: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of instances handed out so far.
    #[must_use]
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Claim a ready instance, blocking until the producer catches up.
    ///
    /// After `soft_stop` this keeps returning instances until the stock
    /// runs out, then fails with [`Error::PoolClosed`].
    pub fn checkout(&self) -> Result<HandlerInstance> {
        let instance = self.items.recv().map_err(|_| Error::PoolClosed)?;
        self.produced.fetch_add(1, Ordering::Relaxed);
        if let Ok(permits) = self.permits.lock() {
            if let Some(tx) = permits.as_ref() {
                // Producer may already be gone during shutdown.
                let _ = tx.send(());
            }
        }
        Ok(instance)
    }

    /// Stop the producer and wait for it to exit. Idempotent.
    pub fn soft_stop(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut permits) = self.permits.lock() {
            permits.take();
        }
        let handle = match self.producer.lock() {
            Ok(mut producer) => producer.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(pool = %self.name, "producer exited abnormally");
            }
        }
    }
}

/// All pools of an application, keyed by handler type.
#[derive(Default)]
pub struct PoolRegistry {
    pools: HashMap<TypeId, HandlerPool>,
    names: HashMap<String, TypeId>,
}

impl PoolRegistry {
    /// Register a handler type. Registering the same type again is a
    /// no-op, so route declarations can share types freely.
    pub fn register(
        &mut self,
        registration: &Registration,
        capacity: usize,
        stack_size: usize,
    ) -> Result<()> {
        let type_id = registration.type_id;
        let name = registration.name;
        if self.pools.contains_key(&type_id) {
            return Ok(());
        }
        if self.names.contains_key(name) {
            return Err(Error::Config(format!(
                "handler name `{name}` already registered for a different type"
            )));
        }
        let pool = HandlerPool::new(
            name,
            registration.kind,
            capacity,
            Arc::clone(&registration.factory),
            stack_size,
        )?;
        info!(handler = name, capacity, "handler pool started");
        self.names.insert(name.to_string(), type_id);
        self.pools.insert(type_id, pool);
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn checkout(&self, name: &str) -> Result<HandlerInstance> {
        self.pool(name)?.checkout()
    }

    pub fn pool(&self, name: &str) -> Result<&HandlerPool> {
        let type_id = self
            .names
            .get(name)
            .ok_or_else(|| Error::UnknownHandler(name.to_string()))?;
        self.pools
            .get(type_id)
            .ok_or_else(|| Error::UnknownHandler(name.to_string()))
    }

    /// Stop every producer and wait for them all.
    pub fn soft_stop(&self) {
        for pool in self.pools.values() {
            pool.soft_stop();
        }
    }
}
