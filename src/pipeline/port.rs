//! Typed ports and the connection protocol.
//!
//! An [`Output<T>`] is an item's publish point: it keeps the last published
//! [`StreamObject`] and an ordered list of subscriber callbacks. An
//! [`Input<T>`] is a subscription point connected to at most one output at a
//! time. Reads are non-blocking and latest-wins: an unconnected input, or one
//! whose output has not published yet, reads as `None`.
//!
//! Rewiring is expressed as a source change on the input
//! ([`AnyInput::set_source`]): `None` disconnects, `Some(output)` tears down
//! the previous link and subscribes to the new output under the input's lock,
//! so a concurrent read sees either the old link or the new one, never a
//! half-torn state.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::SubscriberId;
use crate::pipeline::stream::{StreamObject, StreamType, TypeTag};
use arc_swap::ArcSwapOption;
use crossbeam_channel::Sender;
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// Descriptor of one of an item's ports, for host display and wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortDescriptor {
    pub name: String,
    pub direction: PortDirection,
    pub type_name: &'static str,
}

impl PortDescriptor {
    pub fn input(name: impl Into<String>, type_name: &'static str) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Input,
            type_name,
        }
    }

    pub fn output(name: impl Into<String>, type_name: &'static str) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Output,
            type_name,
        }
    }
}

/// Callback invoked synchronously for every publish on an output.
pub type NotifyFn = Arc<dyn Fn(&StreamObject) + Send + Sync>;

struct Subscriber {
    id: SubscriberId,
    notify: NotifyFn,
}

pub(crate) struct OutputCore {
    name: String,
    tag: TypeTag,
    latest: ArcSwapOption<StreamObject>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber: AtomicU64,
    sequence: AtomicU64,
    /// Serialises publishes across threads; the flag catches same-thread reentry.
    publishing: ReentrantMutex<Cell<bool>>,
}

struct PublishingFlag<'a>(&'a Cell<bool>);

impl Drop for PublishingFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl OutputCore {
    fn new(name: String, tag: TypeTag) -> Self {
        Self {
            name,
            tag,
            latest: ArcSwapOption::empty(),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
            publishing: ReentrantMutex::new(Cell::new(false)),
        }
    }

    fn subscribe(&self, notify: NotifyFn) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push(Subscriber { id, notify });
        id
    }

    fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    fn latest(&self) -> Option<StreamObject> {
        self.latest.load_full().map(|obj| (*obj).clone())
    }

    fn publish(&self, object: StreamObject) -> PipelineResult<u64> {
        if object.tag() != self.tag {
            return Err(PipelineError::TypeMismatch {
                expected: self.tag.name(),
                found: object.tag().name(),
            });
        }

        let guard = self.publishing.lock();
        if guard.get() {
            return Err(PipelineError::ReentrantPublish {
                output: self.name.clone(),
            });
        }
        guard.set(true);
        let _flag = PublishingFlag(&guard);

        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let object = object.sealed_with_sequence(sequence);
        self.latest.store(Some(Arc::new(object.clone())));

        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let targets: Vec<NotifyFn> = self
            .subscribers
            .lock()
            .iter()
            .map(|s| Arc::clone(&s.notify))
            .collect();

        for notify in &targets {
            notify(&object);
        }

        tracing::trace!(
            output = %self.name,
            sequence,
            subscribers = targets.len(),
            "published"
        );
        Ok(sequence)
    }
}

/// Typed publish point of an item.
pub struct Output<T> {
    core: Arc<OutputCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: StreamType> Output<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: Arc::new(OutputCore::new(name.into(), TypeTag::of::<T>())),
            _marker: PhantomData,
        }
    }

    /// Replace the last published value and notify every subscriber in
    /// registration order. Returns the publish sequence number.
    ///
    /// Calling this from inside one of this output's own subscriber
    /// callbacks fails with [`PipelineError::ReentrantPublish`].
    pub fn publish(&self, value: T) -> PipelineResult<u64> {
        self.core.publish(StreamObject::new(value))
    }

    pub fn publish_arc(&self, value: Arc<T>) -> PipelineResult<u64> {
        self.core.publish(StreamObject::from_arc(value))
    }

    /// Last published value, if any.
    pub fn latest(&self) -> Option<Arc<T>> {
        self.core.latest().and_then(|obj| obj.downcast::<T>().ok())
    }

    pub fn latest_object(&self) -> Option<StreamObject> {
        self.core.latest()
    }

    /// Register a callback for every future publish.
    pub fn subscribe<F>(&self, notify: F) -> SubscriberId
    where
        F: Fn(&StreamObject) + Send + Sync + 'static,
    {
        self.core.subscribe(Arc::new(notify))
    }

    pub fn erased(&self) -> AnyOutput {
        AnyOutput {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Output<T> {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.core.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.subscribers.lock().len()
    }

    /// Drop the last published value. Consumers keep what they already hold.
    pub fn reset(&self) {
        self.core.latest.store(None);
    }
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("name", &self.core.name)
            .field("type", &self.core.tag)
            .finish()
    }
}

/// Type-erased output handle used for wiring by the graph host.
#[derive(Clone)]
pub struct AnyOutput {
    core: Arc<OutputCore>,
}

impl AnyOutput {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn tag(&self) -> TypeTag {
        self.core.tag
    }

    pub fn latest_object(&self) -> Option<StreamObject> {
        self.core.latest()
    }

    /// Checked publish of an already-erased object.
    pub fn publish_object(&self, object: StreamObject) -> PipelineResult<u64> {
        self.core.publish(object)
    }

    /// Register a callback for every future publish, e.g. a display widget.
    pub fn subscribe<F>(&self, notify: F) -> SubscriberId
    where
        F: Fn(&StreamObject) + Send + Sync + 'static,
    {
        self.core.subscribe(Arc::new(notify))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.core.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.subscribers.lock().len()
    }

    pub fn reset(&self) {
        self.core.latest.store(None);
    }

    pub fn ptr_eq(&self, other: &AnyOutput) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    pub fn descriptor(&self) -> PortDescriptor {
        PortDescriptor::output(self.core.name.clone(), self.core.tag.name())
    }
}

impl fmt::Debug for AnyOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyOutput")
            .field("name", &self.core.name)
            .field("type", &self.core.tag)
            .finish()
    }
}

struct Connection {
    output: Arc<OutputCore>,
    subscriber: SubscriberId,
    epoch: u64,
}

#[derive(Default)]
struct InputState {
    connection: Option<Connection>,
    latest: Option<StreamObject>,
    taken_sequence: u64,
}

pub(crate) struct InputCore {
    name: String,
    tag: TypeTag,
    state: Mutex<InputState>,
    epoch: AtomicU64,
    waker: Mutex<Option<Sender<()>>>,
}

impl InputCore {
    fn new(name: String, tag: TypeTag) -> Self {
        Self {
            name,
            tag,
            state: Mutex::new(InputState::default()),
            epoch: AtomicU64::new(0),
            waker: Mutex::new(None),
        }
    }

    fn attach(self: &Arc<Self>, output: &Arc<OutputCore>) {
        let mut state = self.state.lock();
        if let Some(old) = state.connection.take() {
            old.output.unsubscribe(old.subscriber);
        }

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let weak: Weak<InputCore> = Arc::downgrade(self);
        let subscriber = output.subscribe(Arc::new(move |obj: &StreamObject| {
            if let Some(input) = weak.upgrade() {
                input.deliver(epoch, obj);
            }
        }));

        state.connection = Some(Connection {
            output: Arc::clone(output),
            subscriber,
            epoch,
        });
        state.latest = output.latest();
        state.taken_sequence = 0;
        let seeded = state.latest.is_some();
        drop(state);

        tracing::debug!(input = %self.name, output = %output.name, "input connected");
        if seeded {
            self.wake();
        }
    }

    fn detach(&self) -> bool {
        let mut state = self.state.lock();
        state.latest = None;
        state.taken_sequence = 0;
        match state.connection.take() {
            Some(old) => {
                old.output.unsubscribe(old.subscriber);
                tracing::debug!(input = %self.name, output = %old.output.name, "input disconnected");
                true
            }
            None => false,
        }
    }

    fn deliver(&self, epoch: u64, object: &StreamObject) {
        {
            let mut state = self.state.lock();
            let current = state.connection.as_ref().map(|c| c.epoch);
            if current != Some(epoch) {
                // Stale notification from a link that was torn down meanwhile.
                return;
            }
            let newer = state
                .latest
                .as_ref()
                .map_or(true, |held| object.sequence() > held.sequence());
            if !newer {
                return;
            }
            state.latest = Some(object.clone());
        }
        self.wake();
    }

    fn wake(&self) {
        if let Some(waker) = self.waker.lock().as_ref() {
            let _ = waker.try_send(());
        }
    }

    fn latest(&self) -> Option<StreamObject> {
        self.state.lock().latest.clone()
    }

    fn take_new(&self) -> Option<StreamObject> {
        let mut state = self.state.lock();
        let sequence = state.latest.as_ref()?.sequence();
        if sequence <= state.taken_sequence {
            return None;
        }
        state.taken_sequence = sequence;
        state.latest.clone()
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connection.is_some()
    }

    fn source(&self) -> Option<AnyOutput> {
        self.state.lock().connection.as_ref().map(|c| AnyOutput {
            core: Arc::clone(&c.output),
        })
    }
}

impl Drop for InputCore {
    fn drop(&mut self) {
        if let Some(old) = self.state.get_mut().connection.take() {
            old.output.unsubscribe(old.subscriber);
        }
    }
}

/// Typed subscription point of an item.
pub struct Input<T> {
    core: Arc<InputCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: StreamType> Input<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: Arc::new(InputCore::new(name.into(), TypeTag::of::<T>())),
            _marker: PhantomData,
        }
    }

    /// Subscribe to `output`, tearing down any previous link first.
    pub fn connect(&self, output: &Output<T>) {
        self.core.attach(&output.core);
    }

    /// Latest object from the connected output, or `None` when unconnected
    /// or nothing has been published yet.
    pub fn latest(&self) -> Option<Arc<T>> {
        self.core.latest().and_then(|obj| obj.downcast::<T>().ok())
    }

    /// Like [`latest`](Self::latest), but only once per published object.
    pub fn take_new(&self) -> Option<Arc<T>> {
        self.core.take_new().and_then(|obj| obj.downcast::<T>().ok())
    }

    pub fn erased(&self) -> AnyInput {
        AnyInput {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Input<T> {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Unsubscribe; subsequent reads yield `None`. Returns whether a link existed.
    pub fn disconnect(&self) -> bool {
        self.core.detach()
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    pub fn latest_object(&self) -> Option<StreamObject> {
        self.core.latest()
    }

    /// The output currently feeding this input.
    pub fn source(&self) -> Option<AnyOutput> {
        self.core.source()
    }
}

impl<T> Clone for Input<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Input<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Input")
            .field("name", &self.core.name)
            .field("type", &self.core.tag)
            .field("connected", &self.core.is_connected())
            .finish()
    }
}

/// Type-erased input handle used for wiring by the graph host.
#[derive(Clone)]
pub struct AnyInput {
    core: Arc<InputCore>,
}

impl AnyInput {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn tag(&self) -> TypeTag {
        self.core.tag
    }

    /// React to the host changing which output feeds this input:
    /// `None` disconnects, `Some` rewires to the given output.
    pub fn set_source(&self, source: Option<&AnyOutput>) -> PipelineResult<()> {
        match source {
            None => {
                self.core.detach();
                Ok(())
            }
            Some(output) => {
                if output.tag() != self.core.tag {
                    return Err(PipelineError::TypeMismatch {
                        expected: self.core.tag.name(),
                        found: output.tag().name(),
                    });
                }
                self.core.attach(&output.core);
                Ok(())
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    pub fn source(&self) -> Option<AnyOutput> {
        self.core.source()
    }

    pub fn latest_object(&self) -> Option<StreamObject> {
        self.core.latest()
    }

    pub fn descriptor(&self) -> PortDescriptor {
        PortDescriptor::input(self.core.name.clone(), self.core.tag.name())
    }

    /// Ring `waker` whenever new data lands on this input.
    pub(crate) fn set_waker(&self, waker: Sender<()>) {
        *self.core.waker.lock() = Some(waker);
    }
}

impl fmt::Debug for AnyInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyInput")
            .field("name", &self.core.name)
            .field("type", &self.core.tag)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, PartialEq)]
    struct Frame(u32);
    impl StreamType for Frame {
        fn type_name() -> &'static str {
            "Frame"
        }
    }

    #[derive(Debug)]
    struct Other;
    impl StreamType for Other {}

    #[test]
    fn test_publish_notifies_in_registration_order() {
        let out = Output::<Frame>::new("out");
        let log = Arc::new(Mutex::new(Vec::new()));

        let l1 = Arc::clone(&log);
        out.subscribe(move |obj| l1.lock().push(("s1", obj.sequence())));
        let l2 = Arc::clone(&log);
        out.subscribe(move |obj| l2.lock().push(("s2", obj.sequence())));

        let seq = out.publish(Frame(1)).unwrap();
        assert_eq!(*log.lock(), vec![("s1", seq), ("s2", seq)]);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let out = Output::<Frame>::new("out");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = out.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        out.publish(Frame(1)).unwrap();
        assert!(out.unsubscribe(id));
        assert!(!out.unsubscribe(id));
        out.publish(Frame(2)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_publish_fails_fast() {
        let out = Output::<Frame>::new("loop");
        let inner = out.clone();
        let result = Arc::new(Mutex::new(None));
        let r = Arc::clone(&result);
        out.subscribe(move |_| {
            *r.lock() = Some(inner.publish(Frame(99)));
        });

        out.publish(Frame(1)).unwrap();
        let inner_result = result.lock().take().unwrap();
        assert!(matches!(
            inner_result,
            Err(PipelineError::ReentrantPublish { .. })
        ));

        // the flag is cleared once the outer publish returns
        assert!(out.publish(Frame(2)).is_ok());
    }

    #[test]
    fn test_publish_object_checks_tag() {
        let out = Output::<Frame>::new("out");
        let err = out
            .erased()
            .publish_object(StreamObject::new(Other))
            .unwrap_err();
        assert!(matches!(err, PipelineError::TypeMismatch { .. }));
    }

    #[test]
    fn test_latest_and_reset() {
        let out = Output::<Frame>::new("out");
        assert!(out.latest().is_none());
        out.publish(Frame(5)).unwrap();
        assert_eq!(*out.latest().unwrap(), Frame(5));
        out.reset();
        assert!(out.latest().is_none());
    }

    #[test]
    fn test_connect_seeds_latest() {
        let out = Output::<Frame>::new("out");
        out.publish(Frame(3)).unwrap();

        let input = Input::<Frame>::new("in");
        input.connect(&out);
        assert_eq!(*input.latest().unwrap(), Frame(3));
    }

    #[test]
    fn test_rewire_ignores_previous_output() {
        let a = Output::<Frame>::new("a");
        let b = Output::<Frame>::new("b");
        let input = Input::<Frame>::new("in");

        input.connect(&a);
        input.connect(&b);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);

        a.publish(Frame(1)).unwrap();
        assert!(input.latest().is_none());

        b.publish(Frame(2)).unwrap();
        assert_eq!(*input.latest().unwrap(), Frame(2));
    }

    #[test]
    fn test_disconnect_yields_no_data() {
        let out = Output::<Frame>::new("out");
        let input = Input::<Frame>::new("in");
        input.connect(&out);
        out.publish(Frame(1)).unwrap();
        assert!(input.latest().is_some());

        assert!(input.disconnect());
        assert!(!input.disconnect());
        assert!(input.latest().is_none());
        out.publish(Frame(2)).unwrap();
        assert!(input.latest().is_none());
        assert_eq!(out.subscriber_count(), 0);
    }

    #[test]
    fn test_take_new_only_once_per_object() {
        let out = Output::<Frame>::new("out");
        let input = Input::<Frame>::new("in");
        input.connect(&out);

        assert!(input.take_new().is_none());
        out.publish(Frame(1)).unwrap();
        assert_eq!(*input.take_new().unwrap(), Frame(1));
        assert!(input.take_new().is_none());
        assert!(input.latest().is_some());
    }

    #[test]
    fn test_set_source_checks_type() {
        let out = Output::<Other>::new("out");
        let input = Input::<Frame>::new("in");
        let err = input.erased().set_source(Some(&out.erased())).unwrap_err();
        assert!(matches!(err, PipelineError::TypeMismatch { .. }));
        assert!(!input.is_connected());
    }

    #[test]
    fn test_set_source_none_disconnects() {
        let out = Output::<Frame>::new("out");
        let input = Input::<Frame>::new("in");
        let erased = input.erased();
        erased.set_source(Some(&out.erased())).unwrap();
        assert!(erased.source().unwrap().ptr_eq(&out.erased()));
        erased.set_source(None).unwrap();
        assert!(!input.is_connected());
    }

    #[test]
    fn test_dropping_input_unsubscribes() {
        let out = Output::<Frame>::new("out");
        {
            let input = Input::<Frame>::new("in");
            input.connect(&out);
            assert_eq!(out.subscriber_count(), 1);
        }
        assert_eq!(out.subscriber_count(), 0);
    }

    #[test]
    fn test_payload_released_by_last_holder() {
        let out = Output::<Frame>::new("out");
        let input = Input::<Frame>::new("in");
        input.connect(&out);
        out.publish(Frame(1)).unwrap();

        let held = input.latest_object().unwrap();
        // producer slot + consumer slot + `held`
        assert_eq!(held.holders(), 3);
        out.reset();
        input.disconnect();
        assert_eq!(held.holders(), 1);
    }

    #[test]
    fn test_waker_rings_on_delivery() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let out = Output::<Frame>::new("out");
        let input = Input::<Frame>::new("in");
        input.erased().set_waker(tx);
        input.connect(&out);
        assert!(rx.try_recv().is_err());

        out.publish(Frame(1)).unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
