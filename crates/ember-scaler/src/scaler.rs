//! Per-application scaler — the Assign/Idle control plane.
//!
//! One `Scaler` exists per application `Meta`. It owns the instance
//! registry and idle pool (one lock), the waiter queue (its own lock), the
//! creation governor (an atomic counter of in-flight creations), the
//! background GC loop, and the runtime cost estimator.
//!
//! ```text
//! Scaler
//!   ├── Registry (instance records + MRU-front/LRU-back idle pool)
//!   ├── WaiterQueue (FIFO of blocked Assign calls)
//!   ├── creating_num (in-flight slot creations)
//!   ├── RuntimeStatus (EWMA cost time + in-flight window)
//!   └── GC loop (background LRU eviction)
//! ```
//!
//! Lock order: waiter-queue lock may wrap the registry lock, never the
//! reverse. Platform calls are always made with no locks held.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ember_core::{
    AssignReply, AssignRequest, Assignment, IdleReply, IdleRequest, Instance, Meta, ScalerConfig,
    SlotResourceConfig, Stats, Status,
};
use ember_platform::PlatformClient;

use crate::error::{ScalerError, ScalerResult};
use crate::status::{RuntimeSnapshot, RuntimeStatus};

/// Deadline for slot destruction issued by the GC loop.
const DESTROY_DEADLINE: Duration = Duration::from_secs(30);

/// Registry entry: the wire-visible instance plus its scheduling state.
/// `last_idle_at` is meaningful only while `busy` is false.
struct InstanceState {
    instance: Instance,
    busy: bool,
    last_idle_at: Instant,
}

/// Instance records and the idle pool, guarded by one lock.
///
/// The pool is ordered MRU-front / LRU-back: warm hits pop the front,
/// returns push the front, GC evicts from the back.
#[derive(Default)]
struct Registry {
    instances: HashMap<String, InstanceState>,
    idle: VecDeque<String>,
}

impl Registry {
    /// Flip an instance to busy and return its application key.
    fn mark_busy(&mut self, instance_id: &str) -> Option<String> {
        let entry = self.instances.get_mut(instance_id)?;
        entry.busy = true;
        Some(entry.instance.meta.key.clone())
    }
}

/// A blocked Assign call: a single-shot delivery channel carrying an
/// instance id, plus an id used to unlink the waiter on cancellation.
struct Waiter {
    id: u64,
    tx: oneshot::Sender<String>,
}

#[derive(Default)]
struct WaiterQueue {
    queue: VecDeque<Waiter>,
    next_id: u64,
}

impl WaiterQueue {
    fn push(&mut self, tx: oneshot::Sender<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back(Waiter { id, tx });
        id
    }

    fn pop_front(&mut self) -> Option<Waiter> {
        self.queue.pop_front()
    }

    /// Unlink a waiter that gave up. Returns false if notify already
    /// dequeued it.
    fn remove(&mut self, waiter_id: u64) -> bool {
        match self.queue.iter().position(|w| w.id == waiter_id) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// The per-application instance scaler.
pub struct Scaler {
    config: Arc<ScalerConfig>,
    meta: Meta,
    platform: Arc<dyn PlatformClient>,
    registry: Mutex<Registry>,
    waiters: Mutex<WaiterQueue>,
    /// In-flight CreateSlot+Init count; the creation budget.
    creating_num: AtomicI64,
    /// First observed creation latency in ms, informational.
    creating_duration_ms: AtomicU64,
    status: RuntimeStatus,
    shutdown_tx: watch::Sender<bool>,
}

impl Scaler {
    /// Create a scaler for `meta` and start its GC loop.
    pub fn new(
        meta: Meta,
        config: Arc<ScalerConfig>,
        platform: Arc<dyn PlatformClient>,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scaler = Arc::new(Self {
            status: RuntimeStatus::new(config.rct_rate),
            meta,
            platform,
            registry: Mutex::new(Registry::default()),
            waiters: Mutex::new(WaiterQueue::default()),
            creating_num: AtomicI64::new(0),
            creating_duration_ms: AtomicU64::new(0),
            shutdown_tx,
            config,
        });

        info!(app = %scaler.meta.key, "scaler created");
        tokio::spawn(gc_loop(
            Arc::downgrade(&scaler),
            scaler.config.gc_interval,
            scaler.meta.key.clone(),
            shutdown_rx,
        ));

        scaler
    }

    /// Get an instance for a pending invocation.
    ///
    /// Serves from the idle pool when possible; otherwise blocks as a FIFO
    /// waiter until an instance is handed off or `cancel` resolves. The
    /// caller supplies `cancel` (typically a deadline sleep); on
    /// cancellation the waiter is unlinked and any instance delivered in
    /// the race is routed back through notify.
    pub async fn assign(
        self: &Arc<Self>,
        request: AssignRequest,
        cancel: impl Future<Output = ()> + Send,
    ) -> ScalerResult<AssignReply> {
        self.status.assign_start(Instant::now()).await;
        debug!(request_id = %request.request_id, app = %request.meta_data.key, "assign");
        let result = self.do_assign(&request, cancel).await;
        self.status.assign_return(&request.request_id).await;
        result
    }

    async fn do_assign(
        self: &Arc<Self>,
        request: &AssignRequest,
        cancel: impl Future<Output = ()> + Send,
    ) -> ScalerResult<AssignReply> {
        let started = Instant::now();

        // Warm hit: reuse the most recently used idle instance.
        {
            let mut registry = self.registry.lock().await;
            if let Some(instance_id) = registry.idle.pop_front() {
                let meta_key = registry
                    .mark_busy(&instance_id)
                    .unwrap_or_else(|| self.meta().key.clone());
                drop(registry);
                debug!(
                    request_id = %request.request_id,
                    %instance_id,
                    elapsed = ?started.elapsed(),
                    "assign served from idle pool"
                );
                return Ok(ok_assign_reply(request, meta_key, instance_id));
            }
        }

        // Miss: enqueue as a waiter. Each waiter not yet covered by an
        // in-flight creation spawns exactly one new creation.
        let (tx, mut rx) = oneshot::channel();
        let waiter_id = {
            let mut waiters = self.waiters.lock().await;
            let waiter_id = waiters.push(tx);
            if waiters.len() as i64 > self.creating_num.load(Ordering::SeqCst) {
                let scaler = Arc::clone(self);
                let meta = request.meta_data.clone();
                let request_id = request.request_id.clone();
                tokio::spawn(async move {
                    scaler.create_instance(meta, request_id).await;
                });
            }
            waiter_id
        };

        let outcome = tokio::select! {
            delivered = &mut rx => Some(delivered),
            _ = cancel => None,
        };

        match outcome {
            Some(Ok(instance_id)) => {
                let meta_key = {
                    let mut registry = self.registry.lock().await;
                    registry
                        .mark_busy(&instance_id)
                        .unwrap_or_else(|| self.meta().key.clone())
                };
                debug!(
                    request_id = %request.request_id,
                    %instance_id,
                    elapsed = ?started.elapsed(),
                    "assign served by handoff"
                );
                Ok(ok_assign_reply(request, meta_key, instance_id))
            }
            // The sender only disappears when the scaler shuts down.
            Some(Err(_)) => Err(ScalerError::Cancelled(request.request_id.clone())),
            None => {
                self.abandon_waiter(waiter_id, rx).await;
                info!(request_id = %request.request_id, "assign cancelled while waiting");
                Err(ScalerError::Cancelled(request.request_id.clone()))
            }
        }
    }

    /// Clean up after a cancelled Assign.
    ///
    /// Normally the waiter is still queued and is simply unlinked. If
    /// notify dequeued it in the race, the channel is closed and any
    /// instance it delivered is routed back through notify.
    async fn abandon_waiter(self: &Arc<Self>, waiter_id: u64, mut rx: oneshot::Receiver<String>) {
        let removed = self.waiters.lock().await.remove(waiter_id);
        if removed {
            return;
        }
        rx.close();
        if let Ok(instance_id) = rx.try_recv() {
            debug!(%instance_id, "reclaiming instance delivered to cancelled waiter");
            let scaler = Arc::clone(self);
            tokio::spawn(async move {
                scaler.notify(instance_id).await;
            });
        }
    }

    /// Return an instance after an invocation finished.
    ///
    /// Prefers handing the instance to a blocked waiter over pooling it.
    /// `need_destroy` removes the instance from circulation and destroys
    /// its slot. Returning an already-idle instance is a no-op.
    pub async fn idle(self: &Arc<Self>, request: IdleRequest) -> ScalerResult<IdleReply> {
        let assignment = request
            .assignment
            .as_ref()
            .ok_or(ScalerError::InvalidArgument("assignment is nil"))?;
        self.status.idle_start(&assignment.request_id).await;

        let need_destroy = request
            .result
            .as_ref()
            .and_then(|r| r.need_destroy)
            .unwrap_or(false);
        let instance_id = assignment.instance_id.clone();

        let mut registry = self.registry.lock().await;
        let (slot_id, busy) = match registry.instances.get(&instance_id) {
            Some(entry) => (entry.instance.slot.id.clone(), entry.busy),
            None => return Err(ScalerError::NotFound(instance_id)),
        };

        if need_destroy {
            registry.instances.remove(&instance_id);
            registry.idle.retain(|id| id != &instance_id);
            drop(registry);
            info!(
                request_id = %assignment.request_id,
                %instance_id,
                "instance flagged for destruction"
            );
            let scaler = Arc::clone(self);
            let request_id = assignment.request_id.clone();
            tokio::spawn(async move {
                scaler
                    .delete_slot(&request_id, &slot_id, &instance_id, "bad instance")
                    .await;
            });
            return Ok(ok_idle_reply());
        }

        if !busy {
            debug!(request_id = %assignment.request_id, %instance_id, "instance already idle");
            return Ok(ok_idle_reply());
        }
        drop(registry);

        let scaler = Arc::clone(self);
        tokio::spawn(async move {
            scaler.notify(instance_id).await;
        });
        Ok(ok_idle_reply())
    }

    /// Route a newly-available instance to the oldest live waiter, or to
    /// the front of the idle pool if no waiter wants it.
    ///
    /// This is the only path that moves an instance from busy back into
    /// circulation. A waiter whose receiver is gone (cancelled caller) is
    /// skipped; the instance goes to the next waiter in FIFO order.
    async fn notify(&self, instance_id: String) {
        let mut pending = instance_id;
        {
            let mut waiters = self.waiters.lock().await;
            while let Some(waiter) = waiters.pop_front() {
                match waiter.tx.send(pending) {
                    Ok(()) => {
                        debug!("instance handed to waiter");
                        return;
                    }
                    Err(returned) => pending = returned,
                }
            }
        }

        let now = Instant::now();
        let mut registry = self.registry.lock().await;
        if registry.idle.iter().any(|id| id == &pending) {
            // A racing return already pooled it.
            return;
        }
        let Some(entry) = registry.instances.get_mut(&pending) else {
            return;
        };
        entry.busy = false;
        entry.last_idle_at = now;
        debug!(instance_id = %pending, "instance returned to idle pool");
        registry.idle.push_front(pending);
    }

    /// Create one slot + instance and hand it into circulation.
    ///
    /// `creating_num` covers the whole platform round-trip so the waiter
    /// admission check sees an accurate in-flight count. Platform failures
    /// are logged and absorbed; the triggering waiter is either served by
    /// another creation or times out.
    async fn create_instance(self: Arc<Self>, meta: Meta, request_id: String) {
        let started = Instant::now();
        self.creating_num.fetch_add(1, Ordering::SeqCst);
        let created = self.provision(&meta, &request_id).await;
        self.creating_num.fetch_sub(1, Ordering::SeqCst);

        let Some(instance_id) = created else { return };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.notify(instance_id).await;
        let _ = self.creating_duration_ms.compare_exchange(
            0,
            elapsed_ms,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    async fn provision(self: &Arc<Self>, meta: &Meta, request_id: &str) -> Option<String> {
        let instance_id = Uuid::new_v4().to_string();
        let resource_config = SlotResourceConfig {
            memory_in_mb: meta.memory_in_mb,
        };

        let slot = match self.platform.create_slot(request_id, &resource_config).await {
            Ok(slot) => slot,
            Err(error) => {
                warn!(%request_id, %error, "create slot failed");
                return None;
            }
        };
        let slot_id = slot.id.clone();

        let instance = match self
            .platform
            .init(request_id, &instance_id, slot, meta.clone())
            .await
        {
            Ok(instance) => instance,
            Err(error) => {
                warn!(%request_id, %slot_id, %error, "instance init failed");
                // Reclaim the slot left behind by the failed init.
                let scaler = Arc::clone(self);
                let request_id = request_id.to_string();
                tokio::spawn(async move {
                    scaler
                        .delete_slot(&request_id, &slot_id, &instance_id, "init failed")
                        .await;
                });
                return None;
            }
        };

        info!(
            %request_id,
            instance_id = %instance.id,
            app = %instance.meta.key,
            init_ms = instance.init_duration_in_ms,
            "instance created"
        );

        let mut registry = self.registry.lock().await;
        let id = instance.id.clone();
        registry.instances.insert(
            id.clone(),
            InstanceState {
                instance,
                busy: false,
                last_idle_at: Instant::now(),
            },
        );
        Some(id)
    }

    async fn delete_slot(&self, request_id: &str, slot_id: &str, instance_id: &str, reason: &str) {
        info!(%instance_id, %slot_id, app = %self.meta.key, %reason, "destroying instance slot");
        if let Err(error) = self.platform.destroy_slot(request_id, slot_id, reason).await {
            error!(%instance_id, %slot_id, %error, "destroy slot failed");
        }
    }

    /// One GC pass: evict expired instances from the LRU end of the pool.
    async fn sweep_idle_instances(self: &Arc<Self>) {
        loop {
            let mut registry = self.registry.lock().await;
            let Some(instance_id) = registry.idle.back().cloned() else {
                break;
            };
            let idle_for = match registry.instances.get(&instance_id) {
                Some(entry) => entry.last_idle_at.elapsed(),
                None => {
                    // Stale id left behind by a destroy; drop it.
                    registry.idle.pop_back();
                    continue;
                }
            };
            if idle_for <= self.config.idle_duration_before_gc {
                // LRU-ordered at the back: nothing older remains.
                break;
            }

            registry.idle.pop_back();
            let Some(entry) = registry.instances.remove(&instance_id) else {
                continue;
            };
            drop(registry);

            let slot_id = entry.instance.slot.id.clone();
            info!(
                %instance_id,
                idle_secs = idle_for.as_secs_f64(),
                "evicting idle instance"
            );
            let scaler = Arc::clone(self);
            let idle_gc = self.config.idle_duration_before_gc;
            tokio::spawn(async move {
                let reason = format!(
                    "idle duration {:.1}s exceeds configured {:.1}s",
                    idle_for.as_secs_f64(),
                    idle_gc.as_secs_f64()
                );
                let destroy_request_id = Uuid::new_v4().to_string();
                let destroy = scaler.delete_slot(&destroy_request_id, &slot_id, &instance_id, &reason);
                if tokio::time::timeout(DESTROY_DEADLINE, destroy).await.is_err() {
                    error!(%slot_id, "gc destroy timed out");
                }
            });
        }
    }

    /// Point-in-time instance counts.
    pub async fn stats(&self) -> Stats {
        let registry = self.registry.lock().await;
        Stats {
            total_instance: registry.instances.len(),
            total_idle_instance: registry.idle.len(),
        }
    }

    /// Estimator view for stats endpoints.
    pub async fn runtime_snapshot(&self) -> RuntimeSnapshot {
        self.status.snapshot().await
    }

    /// Reserved liveness probe.
    pub fn check_live(&self) -> bool {
        true
    }

    /// Reserved: proportional release of idle instances.
    pub fn clear(&self, _rate: f64) {}

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Current number of in-flight creations.
    pub fn creating_num(&self) -> i64 {
        self.creating_num.load(Ordering::SeqCst)
    }

    /// First observed creation latency in ms (zero until one completes).
    pub fn creating_duration_ms(&self) -> u64 {
        self.creating_duration_ms.load(Ordering::SeqCst)
    }

    /// Stop the GC loop. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn ok_assign_reply(request: &AssignRequest, meta_key: String, instance_id: String) -> AssignReply {
    AssignReply {
        status: Status::Ok,
        assignment: Some(Assignment {
            request_id: request.request_id.clone(),
            meta_key,
            instance_id,
        }),
        error_message: None,
    }
}

fn ok_idle_reply() -> IdleReply {
    IdleReply {
        status: Status::Ok,
        error_message: None,
    }
}

/// Background reclaimer: every `gc_interval`, sweep expired instances off
/// the LRU end of the idle pool. Exits on shutdown or when the scaler is
/// dropped.
async fn gc_loop(
    scaler: Weak<Scaler>,
    gc_interval: Duration,
    app_key: String,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(app = %app_key, "gc loop started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(gc_interval) => {
                let Some(scaler) = scaler.upgrade() else { break };
                scaler.sweep_idle_instances().await;
            }
            _ = shutdown.changed() => break,
        }
    }
    info!(app = %app_key, "gc loop stopped");
}
