// Per-context render sequencing.
//
// Every logical UI tree (context) gets one ContextRenderQueue. The queue
// orders all outstanding units of work (attribute changes, view-model
// updates, queued render requests) behind monotonically increasing update
// ids and guarantees that at most one RenderRequest is being applied to the
// context's view tree at any instant. Different contexts make progress
// fully independently.
//
// Lock discipline: the internal mutex is held only to mutate queue/set
// bookkeeping and is always released before calling into the view-tree
// applier or into completion callbacks.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::request::{ContextId, RenderRequest};

/// Identifier for one outstanding unit of work within a context. Monotonic,
/// unique for the context's lifetime, never reused.
pub type UpdateId = u32;

/// Sentinel returned by `enqueue_update` on a destroyed context. Real ids
/// start at 1, so the sentinel can never collide.
pub const INVALID_UPDATE_ID: UpdateId = 0;

/// Which thread drives a context's view tree.
///
/// Main-thread contexts defer application: `enqueue_render_request` returns
/// an id and the owner triggers `run_render_request` from its own loop.
/// Background contexts apply synchronously on enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadAffinity {
    MainThread,
    Background,
}

/// External view-tree applier seam.
///
/// `apply` consumes the request's entry sequence; a `false` return reports
/// a downstream application failure. The queue's own bookkeeping (FIFO pop,
/// update completion) happens regardless, so the queue never wedges.
pub trait RenderHandler: Send + Sync {
    fn apply(&self, request: &RenderRequest) -> bool;

    /// Called once after the context transitions to destroyed.
    fn on_context_destroyed(&self) {}
}

/// Task queue of the thread that owns a context's view tree.
///
/// The synchronous wait pumps this queue when called on the owning thread
/// instead of blocking it: a completion scheduled back onto that thread
/// could otherwise never run.
pub trait TaskPump: Send + Sync {
    fn is_current_thread(&self) -> bool;

    /// Runs one queued task; returns false when the queue is empty.
    fn pump_one(&self) -> bool;
}

struct QueueState {
    destroyed: bool,
    /// A request is currently being applied (lock released around the
    /// applier call); guards single-flight together with the FIFO.
    applying: bool,
    next_update_id: UpdateId,
    outstanding: HashSet<UpdateId>,
    pending: VecDeque<(UpdateId, RenderRequest)>,
    completion_callbacks: Vec<Box<dyn FnOnce() + Send>>,
    handler: Option<Arc<dyn RenderHandler>>,
}

/// Sequences update ids and render requests for one context.
///
/// State machine: Active → Destroyed (terminal). Every operation on a
/// destroyed queue is a safe no-op returning an empty/false result; callers
/// must not treat that as an error, since contexts may be torn down
/// concurrently with in-flight triggers from other threads.
pub struct ContextRenderQueue {
    context_id: ContextId,
    affinity: ThreadAffinity,
    pump: Option<Arc<dyn TaskPump>>,
    state: Mutex<QueueState>,
    progress: Condvar,
}

impl ContextRenderQueue {
    pub fn new(
        context_id: ContextId,
        affinity: ThreadAffinity,
        handler: Arc<dyn RenderHandler>,
        pump: Option<Arc<dyn TaskPump>>,
    ) -> Self {
        Self {
            context_id,
            affinity,
            pump,
            state: Mutex::new(QueueState {
                destroyed: false,
                applying: false,
                next_update_id: 1,
                outstanding: HashSet::new(),
                pending: VecDeque::new(),
                completion_callbacks: Vec::new(),
                handler: Some(handler),
            }),
            progress: Condvar::new(),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    pub fn pending_render_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn has_outstanding_updates(&self) -> bool {
        !self.lock().outstanding.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("render queue poisoned")
    }

    /// Allocates the next update id and adds it to the outstanding set.
    /// Returns `INVALID_UPDATE_ID` once the context is destroyed.
    pub fn enqueue_update(&self) -> UpdateId {
        let mut state = self.lock();
        if state.destroyed {
            return INVALID_UPDATE_ID;
        }
        let id = state.next_update_id;
        state.next_update_id += 1;
        state.outstanding.insert(id);
        id
    }

    /// Appends a request to the FIFO under a fresh update id.
    ///
    /// Background-affinity contexts apply the front synchronously and
    /// return `None`; main-thread contexts return the id for a later
    /// `run_render_request` trigger. Destroyed contexts drop the request
    /// and return `None`.
    pub fn enqueue_render_request(&self, request: RenderRequest) -> Option<UpdateId> {
        {
            let mut state = self.lock();
            if state.destroyed {
                return None;
            }
            let id = state.next_update_id;
            state.next_update_id += 1;
            state.outstanding.insert(id);
            state.pending.push_back((id, request));
            if self.affinity == ThreadAffinity::MainThread {
                return Some(id);
            }
        }
        self.apply_front(None);
        None
    }

    /// Applies the front of the FIFO only if its id matches `id`. Stale or
    /// duplicate triggers (the request already applied or superseded) are
    /// silent no-ops.
    pub fn run_render_request(&self, id: UpdateId) {
        self.apply_front(Some(id));
    }

    /// Applies pending requests until the FIFO is empty.
    pub fn flush_render_requests(&self) {
        while self.apply_front(None) {}
    }

    /// Pops and applies the front request, with the lock released during
    /// application. Returns whether a request was applied.
    fn apply_front(&self, expected: Option<UpdateId>) -> bool {
        let (id, request, handler) = {
            let mut state = self.lock();
            if state.destroyed || state.applying {
                return false;
            }
            match state.pending.front() {
                Some((front_id, _)) => {
                    if let Some(expected) = expected {
                        if *front_id != expected {
                            return false;
                        }
                    }
                }
                None => return false,
            }
            let (id, request) = match state.pending.pop_front() {
                Some(front) => front,
                None => return false,
            };
            state.applying = true;
            (id, request, state.handler.clone())
        };

        let ok = match &handler {
            Some(handler) => handler.apply(&request),
            None => false,
        };
        if !ok {
            eprintln!(
                "[render-queue] context {}: applier reported failure for update {}",
                self.context_id, id
            );
        }
        drop(request);

        self.lock().applying = false;
        self.mark_update_completed(id);
        self.progress.notify_all();
        true
    }

    /// Removes `id` from the outstanding set. When the set drains, takes
    /// ownership of all queued completion callbacks and invokes them
    /// outside the lock.
    pub fn mark_update_completed(&self, id: UpdateId) {
        let callbacks = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.outstanding.remove(&id);
            if state.outstanding.is_empty() {
                std::mem::take(&mut state.completion_callbacks)
            } else {
                Vec::new()
            }
        };
        for callback in callbacks {
            callback();
        }
        self.progress.notify_all();
    }

    /// Invokes `callback` once all outstanding work has drained:
    /// immediately if nothing is outstanding (or the context is destroyed),
    /// otherwise when `mark_update_completed` empties the set.
    pub fn wait_until_all_updates_completed(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.lock();
            if !state.destroyed && !state.outstanding.is_empty() {
                state.completion_callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Blocks the calling thread until the outstanding set drains.
    ///
    /// On the thread that owns the context's view tree this cooperatively
    /// pumps that thread's task queue instead of sleeping. Off-thread it
    /// waits on the progress condvar; with `flush_renders` set, a wakeup
    /// that brings no progress flushes pending renders from here, favoring
    /// forward progress over responsiveness (requests may be arriving on
    /// unrelated threads).
    pub fn wait_until_all_updates_completed_sync(&self, flush_renders: bool) {
        if let Some(pump) = self.pump.clone() {
            if pump.is_current_thread() {
                loop {
                    {
                        let state = self.lock();
                        if state.destroyed || state.outstanding.is_empty() {
                            return;
                        }
                    }
                    if !pump.pump_one() {
                        if flush_renders {
                            self.flush_render_requests();
                        } else {
                            std::thread::yield_now();
                        }
                    }
                }
            }
        }

        let mut state = self.lock();
        loop {
            if state.destroyed || state.outstanding.is_empty() {
                return;
            }
            if flush_renders {
                let before = state.outstanding.len();
                let has_pending = !state.pending.is_empty();
                let (guard, timeout) = self
                    .progress
                    .wait_timeout(state, Duration::from_millis(2))
                    .expect("render queue poisoned");
                state = guard;
                let stalled = timeout.timed_out() && state.outstanding.len() >= before;
                if stalled && has_pending && !state.applying {
                    drop(state);
                    self.flush_render_requests();
                    state = self.lock();
                }
            } else {
                state = self.progress.wait(state).expect("render queue poisoned");
            }
        }
    }

    /// Transitions the context to its terminal state.
    ///
    /// One critical section swaps out the handler, outstanding set, FIFO
    /// and callback list; queued requests are discarded without being
    /// applied, remaining completion callbacks fire as completed so no
    /// caller stays blocked, and the handler is notified last.
    pub fn destroy(&self) {
        let (pending, callbacks, handler) = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.outstanding.clear();
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.completion_callbacks),
                state.handler.take(),
            )
        };

        println!(
            "[render-queue] context {} destroyed, {} queued request(s) discarded",
            self.context_id,
            pending.len()
        );
        drop(pending);

        for callback in callbacks {
            callback();
        }
        if let Some(handler) = handler {
            handler.on_context_destroyed();
        }
        self.progress.notify_all();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ContextId, ElementId, Entry, RenderRequest};
    use crate::value::AttachedValueTable;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct RecordingHandler {
        applied: StdMutex<Vec<u32>>,
        destroyed: AtomicBool,
    }

    impl RecordingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                applied: StdMutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            })
        }

        fn applied(&self) -> Vec<u32> {
            self.applied.lock().unwrap().clone()
        }
    }

    impl RenderHandler for RecordingHandler {
        fn apply(&self, request: &RenderRequest) -> bool {
            let marker = request
                .entries()
                .get(0)
                .and_then(Entry::element_id)
                .map(|id| id.0)
                .unwrap_or(0);
            self.applied.lock().unwrap().push(marker);
            true
        }

        fn on_context_destroyed(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }
    }

    fn request_with_marker(marker: u32) -> RenderRequest {
        let mut request =
            RenderRequest::new(ContextId(1), AttachedValueTable::empty(), None, None);
        request.entries_mut().append(Entry::SetRootElement {
            element_id: ElementId(marker),
        });
        request
    }

    fn deferred_queue(handler: Arc<RecordingHandler>) -> ContextRenderQueue {
        ContextRenderQueue::new(ContextId(1), ThreadAffinity::MainThread, handler, None)
    }

    #[test]
    fn test_deferred_fifo_order() {
        let handler = RecordingHandler::new();
        let queue = deferred_queue(handler.clone());

        let ids: Vec<UpdateId> = (1..=4)
            .map(|n| queue.enqueue_render_request(request_with_marker(n)).unwrap())
            .collect();
        assert_eq!(queue.pending_render_count(), 4);
        assert!(handler.applied().is_empty());

        for id in &ids {
            queue.run_render_request(*id);
        }
        assert_eq!(handler.applied(), vec![1, 2, 3, 4]);
        assert_eq!(queue.pending_render_count(), 0);
        assert!(!queue.has_outstanding_updates());
    }

    #[test]
    fn test_out_of_order_and_duplicate_triggers_are_noops() {
        let handler = RecordingHandler::new();
        let queue = deferred_queue(handler.clone());

        let first = queue
            .enqueue_render_request(request_with_marker(1))
            .unwrap();
        let second = queue
            .enqueue_render_request(request_with_marker(2))
            .unwrap();

        // Not the front: nothing happens.
        queue.run_render_request(second);
        assert!(handler.applied().is_empty());

        queue.run_render_request(first);
        // Duplicate trigger: already applied, silently ignored.
        queue.run_render_request(first);
        assert_eq!(handler.applied(), vec![1]);

        queue.run_render_request(second);
        assert_eq!(handler.applied(), vec![1, 2]);
    }

    #[test]
    fn test_background_affinity_applies_immediately() {
        let handler = RecordingHandler::new();
        let queue = ContextRenderQueue::new(
            ContextId(1),
            ThreadAffinity::Background,
            handler.clone(),
            None,
        );

        assert!(queue.enqueue_render_request(request_with_marker(7)).is_none());
        assert_eq!(handler.applied(), vec![7]);
        assert_eq!(queue.pending_render_count(), 0);
        assert!(!queue.has_outstanding_updates());
    }

    #[test]
    fn test_flush_drains_everything() {
        let handler = RecordingHandler::new();
        let queue = deferred_queue(handler.clone());
        for n in 1..=3 {
            queue.enqueue_render_request(request_with_marker(n));
        }
        queue.flush_render_requests();
        assert_eq!(handler.applied(), vec![1, 2, 3]);
    }

    #[test]
    fn test_update_ids_are_monotonic() {
        let queue = deferred_queue(RecordingHandler::new());
        let a = queue.enqueue_update();
        let b = queue.enqueue_update();
        let c = queue.enqueue_update();
        assert!(a < b && b < c);
        assert_ne!(a, INVALID_UPDATE_ID);
    }

    #[test]
    fn test_wait_callback_fires_immediately_when_idle() {
        let queue = deferred_queue(RecordingHandler::new());
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        queue.wait_until_all_updates_completed(move || flag.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_callback_fires_on_drain() {
        let queue = deferred_queue(RecordingHandler::new());
        let a = queue.enqueue_update();
        let b = queue.enqueue_update();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        queue.wait_until_all_updates_completed(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        queue.mark_update_completed(a);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        queue.mark_update_completed(b);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Unknown ids are harmless.
        queue.mark_update_completed(9999);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroy_discards_requests_and_completes_waiters() {
        let handler = RecordingHandler::new();
        let queue = deferred_queue(handler.clone());

        let update_a = queue.enqueue_update();
        let update_b = queue.enqueue_update();
        for n in 1..=3 {
            queue.enqueue_render_request(request_with_marker(n));
        }

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        queue.wait_until_all_updates_completed(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        queue.destroy();

        // Callbacks fired exactly once, no request ever applied.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(handler.applied().is_empty());
        assert!(handler.destroyed.load(Ordering::SeqCst));
        assert!(queue.is_destroyed());

        // Everything afterwards is a safe no-op.
        assert_eq!(queue.enqueue_update(), INVALID_UPDATE_ID);
        assert!(queue.enqueue_render_request(request_with_marker(9)).is_none());
        queue.run_render_request(update_a);
        queue.mark_update_completed(update_b);
        queue.flush_render_requests();
        assert!(handler.applied().is_empty());

        let late = Arc::new(AtomicBool::new(false));
        let flag = late.clone();
        queue.wait_until_all_updates_completed(move || flag.store(true, Ordering::SeqCst));
        assert!(late.load(Ordering::SeqCst));

        // Idempotent.
        queue.destroy();
    }

    #[test]
    fn test_sync_wait_blocks_until_drain() {
        let queue = Arc::new(deferred_queue(RecordingHandler::new()));
        let id = queue.enqueue_update();

        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                queue.wait_until_all_updates_completed_sync(false);
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        queue.mark_update_completed(id);
        waiter.join().unwrap();
    }

    #[test]
    fn test_sync_wait_with_flush_makes_progress() {
        let handler = RecordingHandler::new();
        let queue = Arc::new(deferred_queue(handler.clone()));
        queue.enqueue_render_request(request_with_marker(1));
        queue.enqueue_render_request(request_with_marker(2));

        // Nobody else will run these requests; the waiter must flush them
        // itself to drain.
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                queue.wait_until_all_updates_completed_sync(true);
            })
        };
        waiter.join().unwrap();
        assert_eq!(handler.applied(), vec![1, 2]);
    }

    #[test]
    fn test_sync_wait_returns_immediately_when_destroyed() {
        let queue = deferred_queue(RecordingHandler::new());
        queue.enqueue_update();
        queue.destroy();
        queue.wait_until_all_updates_completed_sync(false);
        queue.wait_until_all_updates_completed_sync(true);
    }

    struct PumpedTasks {
        tasks: StdMutex<VecDeque<Box<dyn FnOnce() + Send>>>,
        owner: std::thread::ThreadId,
    }

    impl PumpedTasks {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                tasks: StdMutex::new(VecDeque::new()),
                owner: std::thread::current().id(),
            })
        }

        fn post(&self, task: impl FnOnce() + Send + 'static) {
            self.tasks.lock().unwrap().push_back(Box::new(task));
        }
    }

    impl TaskPump for PumpedTasks {
        fn is_current_thread(&self) -> bool {
            std::thread::current().id() == self.owner
        }

        fn pump_one(&self) -> bool {
            let task = self.tasks.lock().unwrap().pop_front();
            match task {
                Some(task) => {
                    task();
                    true
                }
                None => false,
            }
        }
    }

    #[test]
    fn test_sync_wait_pumps_owning_thread() {
        // A completion scheduled back onto the waiting thread must still
        // run; a blocking wait here would deadlock.
        let pump = PumpedTasks::new();
        let queue = Arc::new(ContextRenderQueue::new(
            ContextId(1),
            ThreadAffinity::MainThread,
            RecordingHandler::new(),
            Some(pump.clone()),
        ));

        let id = queue.enqueue_update();
        let queue_for_task = queue.clone();
        pump.post(move || queue_for_task.mark_update_completed(id));

        queue.wait_until_all_updates_completed_sync(false);
        assert!(!queue.has_outstanding_updates());
    }
}
