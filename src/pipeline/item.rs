//! Items and their execution contexts.
//!
//! Each item runs on its own OS thread. The thread loops over
//! [`Item::iterate`], reading whatever its inputs currently hold and staging
//! publishes through the [`IterationContext`]. Staged publishes are committed
//! only when the iteration returns `Ok`, so a failing iteration leaves every
//! output untouched.
//!
//! Between iterations the thread parks on a doorbell channel that is rung by
//! new input data, by stop requests and, for items without inputs, by the
//! source period timing out.
//!
//! # Control
//!
//! [`ItemHandle::start`], [`ItemHandle::stop`] and [`ItemHandle::restart`] are
//! serialised by a control mutex. `stop` blocks until the thread has exited,
//! so once it returns the item is not in flight and will not publish again.
//! Calling `stop` or `restart` from the item's own thread (for example from a
//! parameter change made inside `iterate`) cannot join itself; such requests
//! are recorded and honoured at the next iteration boundary. Dropping the
//! last handle of a running item stops it as well.

use crate::pipeline::bridge::{EventSink, ItemEvent};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::ItemId;
use crate::pipeline::param::{ParamDescriptor, ParamStore, ParamValue};
use crate::pipeline::port::{AnyInput, AnyOutput, Input, Output, PortDescriptor};
use crate::pipeline::stream::{StreamObject, StreamType};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// What the execution context does after an iteration fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log, report and keep iterating.
    #[default]
    Retry,
    /// Log, report and stop iterating until the item is stopped or restarted.
    Halt,
}

/// Lifecycle state of an item's execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ItemState {
    Stopped,
    Running,
    /// Halted after a failure. Counts as running for `restart`.
    Faulted,
}

/// Opaque handle to an item's display widget.
///
/// The host decides what a widget is; items only hand one out.
#[derive(Clone)]
pub struct WidgetHandle(Arc<dyn Any + Send + Sync>);

impl WidgetHandle {
    pub fn new<W: Any + Send + Sync>(widget: W) -> Self {
        Self(Arc::new(widget))
    }

    pub fn downcast_ref<W: Any>(&self) -> Option<&W> {
        self.0.downcast_ref::<W>()
    }
}

impl fmt::Debug for WidgetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WidgetHandle(..)")
    }
}

/// One entry of an item's context menu.
#[derive(Clone)]
pub struct MenuEntry {
    pub label: String,
    action: Arc<dyn Fn() + Send + Sync>,
}

impl MenuEntry {
    pub fn new(label: impl Into<String>, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            action: Arc::new(action),
        }
    }

    pub fn trigger(&self) {
        (self.action)();
    }
}

impl fmt::Debug for MenuEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuEntry").field("label", &self.label).finish()
    }
}

/// Per-iteration context handed to [`Item::iterate`].
pub struct IterationContext {
    item: ItemId,
    /// Time since the execution context started.
    pub timestamp: Duration,
    /// Time since the previous iteration began.
    pub dt: Duration,
    /// Monotonic iteration counter, starting at zero for each start.
    pub iteration: u64,
    staged: Vec<(AnyOutput, StreamObject)>,
}

impl IterationContext {
    pub fn new(item: ItemId, timestamp: Duration, dt: Duration, iteration: u64) -> Self {
        Self {
            item,
            timestamp,
            dt,
            iteration,
            staged: Vec::new(),
        }
    }

    pub fn item(&self) -> ItemId {
        self.item
    }

    /// Stage `value` for publication on `output` once this iteration succeeds.
    pub fn emit<T: StreamType>(&mut self, output: &Output<T>, value: T) {
        self.staged.push((output.erased(), StreamObject::new(value)));
    }

    pub fn emit_arc<T: StreamType>(&mut self, output: &Output<T>, value: Arc<T>) {
        self.staged
            .push((output.erased(), StreamObject::from_arc(value)));
    }

    /// Number of publishes waiting for the iteration to succeed.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Publish everything staged, in staging order. Returns how many landed.
    pub fn commit(&mut self) -> usize {
        let mut published = 0;
        for (output, object) in self.staged.drain(..) {
            match output.publish_object(object) {
                Ok(_) => published += 1,
                Err(e) => tracing::warn!(
                    item = %self.item,
                    output = %output.name(),
                    "publish failed: {}",
                    e
                ),
            }
        }
        published
    }

    /// Drop everything staged.
    pub fn discard(&mut self) {
        self.staged.clear();
    }
}

/// Behaviour of a pipeline item.
///
/// Ports and parameters are declared once in [`ItemType::build`]; the item
/// keeps the typed handles it needs and reads them from `iterate`.
pub trait Item: Send + 'static {
    /// One unit of work. Returning `Err` discards this iteration's publishes.
    fn iterate(&mut self, ctx: &mut IterationContext) -> anyhow::Result<()>;

    /// Called on the item thread before the first iteration.
    fn on_start(&mut self) {}

    /// Called on the item thread after the last iteration.
    fn on_stop(&mut self) {}

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Retry
    }

    /// Fixed pacing between iterations. `None` means "wake on new input".
    fn period(&self) -> Option<Duration> {
        None
    }

    fn widget(&self) -> Option<WidgetHandle> {
        None
    }

    /// Item-specific context menu entries.
    fn context_menu(&self) -> Vec<MenuEntry> {
        Vec::new()
    }
}

/// An item that can be constructed by name.
pub trait ItemType: Item + Sized {
    const TYPE_NAME: &'static str;

    /// Short help text shown next to the type name in the host's item list.
    const DESCRIPTION: &'static str = "";

    fn build(builder: &mut ItemBuilder) -> Self;
}

/// Collects an item's ports and parameters while it is being built.
#[derive(Default)]
pub struct ItemBuilder {
    inputs: Vec<AnyInput>,
    outputs: Vec<AnyOutput>,
    params: ParamStore,
}

impl ItemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input<T: StreamType>(&mut self, name: &str) -> Input<T> {
        let input = Input::new(name);
        self.inputs.push(input.erased());
        input
    }

    pub fn add_output<T: StreamType>(&mut self, name: &str) -> Output<T> {
        let output = Output::new(name);
        self.outputs.push(output.erased());
        output
    }

    pub fn params(&mut self) -> &mut ParamStore {
        &mut self.params
    }
}

/// Settings shared by every execution context of a graph.
#[derive(Debug, Clone)]
pub struct ItemOptions {
    /// Wait between iterations of items that have inputs but no period.
    pub idle_interval: Duration,
    /// Wait between iterations of items with neither inputs nor a period.
    pub source_period: Duration,
    pub thread_name_prefix: String,
}

impl Default for ItemOptions {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(10),
            source_period: Duration::from_millis(33),
            thread_name_prefix: "item".to_string(),
        }
    }
}

/// Constructor used by the registry.
pub type ItemFactory = fn(&mut ItemBuilder) -> Box<dyn Item>;

pub(crate) fn build_boxed<I: ItemType>(builder: &mut ItemBuilder) -> Box<dyn Item> {
    Box::new(I::build(builder))
}

struct Worker {
    join: JoinHandle<()>,
}

struct ItemShared {
    id: ItemId,
    type_name: String,
    item: Mutex<Box<dyn Item>>,
    inputs: Vec<AnyInput>,
    outputs: Vec<AnyOutput>,
    params: ParamStore,
    widget: Option<WidgetHandle>,
    menu: Vec<MenuEntry>,
    options: ItemOptions,
    events: Option<EventSink>,

    doorbell_tx: Sender<()>,
    doorbell_rx: Receiver<()>,
    control: Mutex<Option<Worker>>,
    worker_thread: Mutex<Option<ThreadId>>,

    running: AtomicBool,
    faulted: AtomicBool,
    in_flight: AtomicBool,
    stop_requested: AtomicBool,
    /// `stop` was called from the item's own thread.
    stop_from_item: AtomicBool,
    /// The worker already ran the stop transition itself; its slot in
    /// `control` only needs joining.
    self_stopped: AtomicBool,
    restart_requested: AtomicBool,
    iterations: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ItemShared {
    fn emit(&self, event: ItemEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    fn ring(&self) {
        let _ = self.doorbell_tx.try_send(());
    }

    fn on_own_thread(&self) -> bool {
        *self.worker_thread.lock() == Some(thread::current().id())
    }

    fn reset_run_counters(&self) {
        self.faulted.store(false, Ordering::SeqCst);
        self.iterations.store(0, Ordering::SeqCst);
        *self.last_error.lock() = None;
    }

    fn reset_outputs(&self) {
        for output in &self.outputs {
            output.reset();
        }
    }

    /// Stop transition run by the worker after a `stop` from its own thread.
    fn finish_self_stop(&self) {
        *self.worker_thread.lock() = None;
        self.in_flight.store(false, Ordering::SeqCst);
        self.reset_outputs();
        self.self_stopped.store(true, Ordering::SeqCst);
        self.faulted.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.emit(ItemEvent::Stopped { item: self.id });
        tracing::info!(item = %self.id, "item stopped from its own thread");
    }
}

impl Drop for ItemShared {
    // Last handle gone: the worker only holds a weak reference and exits on
    // its next wake-up.
    fn drop(&mut self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        self.ring();
        if !self.faulted.load(Ordering::SeqCst) {
            self.item.get_mut().on_stop();
        }
        self.running.store(false, Ordering::SeqCst);
        self.reset_outputs();
        self.emit(ItemEvent::Stopped { item: self.id });
        tracing::debug!(item = %self.id, "last handle dropped, item stopped");
    }
}

/// Owner-side handle of one item and its execution context.
#[derive(Clone)]
pub struct ItemHandle {
    shared: Arc<ItemShared>,
}

impl ItemHandle {
    /// Build an item of type `I`.
    pub fn new<I: ItemType>(id: ItemId, options: ItemOptions, events: Option<EventSink>) -> Self {
        Self::from_factory(id, I::TYPE_NAME, build_boxed::<I>, options, events)
    }

    /// Build an item through an arbitrary constructor.
    pub fn from_factory(
        id: ItemId,
        type_name: &str,
        factory: impl FnOnce(&mut ItemBuilder) -> Box<dyn Item>,
        options: ItemOptions,
        events: Option<EventSink>,
    ) -> Self {
        let mut builder = ItemBuilder::new();
        let item = factory(&mut builder);
        let ItemBuilder {
            inputs,
            outputs,
            params,
        } = builder;

        let (doorbell_tx, doorbell_rx) = bounded(1);
        for input in &inputs {
            input.set_waker(doorbell_tx.clone());
        }

        let shared = Arc::new(ItemShared {
            id,
            type_name: type_name.to_string(),
            widget: item.widget(),
            menu: item.context_menu(),
            item: Mutex::new(item),
            inputs,
            outputs,
            params,
            options,
            events,
            doorbell_tx,
            doorbell_rx,
            control: Mutex::new(None),
            worker_thread: Mutex::new(None),
            running: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_from_item: AtomicBool::new(false),
            self_stopped: AtomicBool::new(false),
            restart_requested: AtomicBool::new(false),
            iterations: AtomicU64::new(0),
            last_error: Mutex::new(None),
        });

        let weak: Weak<ItemShared> = Arc::downgrade(&shared);
        shared.params.install_restart_hook(move || {
            if let Some(shared) = weak.upgrade() {
                if let Err(e) = (ItemHandle { shared }).restart() {
                    tracing::error!("restart after parameter change failed: {}", e);
                }
            }
        });

        tracing::debug!(item = %id, type_name, "item created");
        Self { shared }
    }

    pub fn id(&self) -> ItemId {
        self.shared.id
    }

    pub fn type_name(&self) -> &str {
        &self.shared.type_name
    }

    pub fn state(&self) -> ItemState {
        if !self.shared.running.load(Ordering::SeqCst) {
            ItemState::Stopped
        } else if self.shared.faulted.load(Ordering::SeqCst) {
            ItemState::Faulted
        } else {
            ItemState::Running
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ItemState::Running
    }

    /// Whether an iteration is executing right now.
    pub fn is_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Successful iterations since the last start.
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    /// Begin iterating. No-op when already running.
    pub fn start(&self) -> PipelineResult<()> {
        if self.shared.on_own_thread() {
            return Ok(());
        }
        let mut control = self.shared.control.lock();
        self.start_locked(&mut control)
    }

    /// Stop iterating and wait for the thread to exit. No-op when stopped.
    ///
    /// Called from the item's own thread, the request is honoured once the
    /// current iteration returns and the call does not block.
    pub fn stop(&self) {
        if self.shared.on_own_thread() {
            self.shared.stop_from_item.store(true, Ordering::SeqCst);
            self.shared.stop_requested.store(true, Ordering::SeqCst);
            return;
        }
        let mut control = self.shared.control.lock();
        self.stop_locked(&mut control);
    }

    /// Stop and start again. Does nothing when the item is stopped.
    pub fn restart(&self) -> PipelineResult<()> {
        if self.shared.on_own_thread() {
            self.shared.restart_requested.store(true, Ordering::SeqCst);
            return Ok(());
        }
        let mut control = self.shared.control.lock();
        self.reap_self_stopped(&mut control);
        if control.is_none() {
            tracing::trace!(item = %self.shared.id, "restart ignored, item is stopped");
            return Ok(());
        }
        tracing::info!(item = %self.shared.id, "restarting item");
        self.stop_locked(&mut control);
        self.start_locked(&mut control)
    }

    /// Join a worker that already stopped itself.
    fn reap_self_stopped(&self, control: &mut Option<Worker>) {
        if !self.shared.self_stopped.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = control.take() {
            if worker.join.join().is_err() {
                tracing::error!(item = %self.shared.id, "item thread panicked outside an iteration");
            }
        }
    }

    fn start_locked(&self, control: &mut Option<Worker>) -> PipelineResult<()> {
        self.reap_self_stopped(control);
        if control.is_some() {
            return Ok(());
        }

        let shared = &self.shared;
        shared.stop_requested.store(false, Ordering::SeqCst);
        shared.stop_from_item.store(false, Ordering::SeqCst);
        shared.restart_requested.store(false, Ordering::SeqCst);
        shared.reset_run_counters();
        while shared.doorbell_rx.try_recv().is_ok() {}

        let name = format!(
            "{}-{}-{}",
            shared.options.thread_name_prefix, shared.type_name, shared.id
        );
        let worker_shared = Arc::downgrade(shared);
        let doorbell = shared.doorbell_rx.clone();
        // The worker waits until the start transition is recorded.
        let (go_tx, go_rx) = bounded::<()>(1);
        let join = thread::Builder::new().name(name).spawn(move || {
            if go_rx.recv().is_ok() {
                run_item(worker_shared, doorbell);
            }
        })?;

        shared.running.store(true, Ordering::SeqCst);
        *control = Some(Worker { join });
        shared.emit(ItemEvent::Started { item: shared.id });
        tracing::info!(item = %shared.id, type_name = %shared.type_name, "item started");
        let _ = go_tx.send(());
        Ok(())
    }

    fn stop_locked(&self, control: &mut Option<Worker>) {
        self.reap_self_stopped(control);
        let Some(worker) = control.take() else {
            return;
        };

        let shared = &self.shared;
        shared.stop_requested.store(true, Ordering::SeqCst);
        shared.ring();
        if worker.join.join().is_err() {
            tracing::error!(item = %shared.id, "item thread panicked outside an iteration");
        }
        // The worker may have honoured an own-thread stop while we joined.
        if shared.self_stopped.swap(false, Ordering::SeqCst) {
            return;
        }

        *shared.worker_thread.lock() = None;
        shared.in_flight.store(false, Ordering::SeqCst);
        shared.running.store(false, Ordering::SeqCst);
        shared.faulted.store(false, Ordering::SeqCst);
        shared.reset_outputs();

        shared.emit(ItemEvent::Stopped { item: shared.id });
        tracing::info!(item = %shared.id, "item stopped");
    }

    pub fn inputs(&self) -> &[AnyInput] {
        &self.shared.inputs
    }

    pub fn outputs(&self) -> &[AnyOutput] {
        &self.shared.outputs
    }

    pub fn input(&self, name: &str) -> Option<&AnyInput> {
        self.shared.inputs.iter().find(|i| i.name() == name)
    }

    pub fn output(&self, name: &str) -> Option<&AnyOutput> {
        self.shared.outputs.iter().find(|o| o.name() == name)
    }

    pub fn port_descriptors(&self) -> Vec<PortDescriptor> {
        self.shared
            .inputs
            .iter()
            .map(AnyInput::descriptor)
            .chain(self.shared.outputs.iter().map(AnyOutput::descriptor))
            .collect()
    }

    pub fn params(&self) -> &ParamStore {
        &self.shared.params
    }

    /// Write a parameter from the control surface.
    pub fn set_param(&self, name: &str, value: ParamValue) -> PipelineResult<bool> {
        self.shared.params.set(name, value).map_err(|e| {
            tracing::warn!(item = %self.shared.id, "rejected parameter write: {}", e);
            e
        })
    }

    pub fn param_descriptors(&self) -> Vec<ParamDescriptor> {
        self.shared.params.descriptors()
    }

    pub fn widget(&self) -> Option<WidgetHandle> {
        self.shared.widget.clone()
    }

    /// The item's own menu entries, plus "Configure" when it has configs.
    pub fn context_menu(&self) -> Vec<MenuEntry> {
        let mut entries = self.shared.menu.clone();
        if self.shared.params.has_config() {
            let weak = Arc::downgrade(&self.shared);
            entries.push(MenuEntry::new("Configure", move || {
                if let Some(shared) = weak.upgrade() {
                    shared.emit(ItemEvent::ConfigureRequested { item: shared.id });
                }
            }));
        }
        entries
    }

    pub fn ptr_eq(&self, other: &ItemHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemHandle")
            .field("id", &self.shared.id)
            .field("type_name", &self.shared.type_name)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Worker loop. Holds the item only weakly between iterations, so dropping
/// every handle ends the thread.
fn run_item(weak: Weak<ItemShared>, doorbell: Receiver<()>) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let id = shared.id;
    *shared.worker_thread.lock() = Some(thread::current().id());
    tracing::debug!(item = %id, "item thread started");

    let wait = {
        let mut item = shared.item.lock();
        item.on_start();
        item.period().unwrap_or(if shared.inputs.is_empty() {
            shared.options.source_period
        } else {
            shared.options.idle_interval
        })
    };
    drop(shared);

    let mut started = Instant::now();
    let mut last = started;
    let mut iteration = 0u64;

    loop {
        let Some(shared) = weak.upgrade() else {
            tracing::debug!(item = %id, "item dropped, thread exiting");
            return;
        };
        if shared.stop_requested.load(Ordering::SeqCst) {
            exit_item(&shared);
            return;
        }

        if shared.restart_requested.swap(false, Ordering::SeqCst) {
            tracing::info!(item = %id, "restarting item at iteration boundary");
            {
                let mut item = shared.item.lock();
                item.on_stop();
                shared.reset_outputs();
                shared.emit(ItemEvent::Stopped { item: id });
                shared.reset_run_counters();
                item.on_start();
            }
            shared.emit(ItemEvent::Started { item: id });
            started = Instant::now();
            last = started;
            iteration = 0;
        }

        let now = Instant::now();
        let mut ctx = IterationContext::new(
            id,
            now.duration_since(started),
            now.duration_since(last),
            iteration,
        );
        last = now;

        shared.in_flight.store(true, Ordering::SeqCst);
        let result = {
            let mut item = shared.item.lock();
            catch_unwind(AssertUnwindSafe(|| item.iterate(&mut ctx)))
                .unwrap_or_else(|payload| Err(anyhow::anyhow!("panicked: {}", panic_message(payload))))
        };

        match result {
            Ok(()) => {
                ctx.commit();
                shared.iterations.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                ctx.discard();
                let message = format!("{:#}", e);
                tracing::warn!(item = %id, iteration, "iteration failed: {}", message);
                *shared.last_error.lock() = Some(message.clone());
                shared.emit(ItemEvent::IterationFailed {
                    item: id,
                    message: message.clone(),
                });

                let policy = shared.item.lock().failure_policy();
                if policy == FailurePolicy::Halt {
                    shared.faulted.store(true, Ordering::SeqCst);
                    shared.in_flight.store(false, Ordering::SeqCst);
                    shared.emit(ItemEvent::Faulted { item: id, message });
                    tracing::error!(item = %id, "item halted after failure");
                    shared.item.lock().on_stop();
                    return;
                }
            }
        }
        shared.in_flight.store(false, Ordering::SeqCst);
        iteration += 1;

        if shared.stop_requested.load(Ordering::SeqCst) {
            exit_item(&shared);
            return;
        }
        drop(shared);
        let _ = doorbell.recv_timeout(wait);
    }
}

fn exit_item(shared: &ItemShared) {
    shared.item.lock().on_stop();
    if shared.stop_from_item.load(Ordering::SeqCst) {
        shared.finish_self_stop();
    }
    tracing::debug!(item = %shared.id, "item thread exiting");
}
