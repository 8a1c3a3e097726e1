//! Integration tests for the output → input connection protocol

mod common;

use common::items::{Relay, Tick, Ticker};
use common::{builders::GraphBuilder, wait_until};
use itemflow::pipeline::{
    Image, Input, Output, PipelineError, Point, SourceId, Sparse, StreamObject, StreamType,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn tick(origin: &'static str, seq: u64) -> Tick {
    Tick { origin, seq }
}

#[test]
fn test_fan_out_shares_one_object() {
    let out = Output::<Tick>::new("out");
    let inputs: Vec<Input<Tick>> = (0..3)
        .map(|i| {
            let input = Input::<Tick>::new(format!("in{}", i));
            input.connect(&out);
            input
        })
        .collect();

    out.publish(tick("a", 1)).unwrap();

    let first = inputs[0].latest_object().unwrap();
    for input in &inputs[1..] {
        assert!(input.latest_object().unwrap().ptr_eq(&first));
    }
    // producer slot + three consumer slots + `first`
    assert_eq!(first.holders(), 5);
}

#[test]
fn test_rewire_never_delivers_from_previous_output() {
    let a = Output::<Tick>::new("a");
    let b = Output::<Tick>::new("b");
    let input = Input::<Tick>::new("in");
    input.connect(&a);

    let running = Arc::new(AtomicBool::new(true));
    let publisher = {
        let a = a.clone();
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let mut seq = 0;
            while running.load(Ordering::SeqCst) {
                seq += 1;
                let _ = a.publish(tick("a", seq));
            }
        })
    };

    assert!(wait_until(|| input.latest().is_some()));
    input.connect(&b);

    for _ in 0..2000 {
        if let Some(value) = input.latest() {
            assert_eq!(value.origin, "b", "delivery from a after rewiring");
        }
    }
    b.publish(tick("b", 1)).unwrap();
    assert_eq!(*input.latest().unwrap(), tick("b", 1));

    running.store(false, Ordering::SeqCst);
    publisher.join().unwrap();
    assert_eq!(a.subscriber_count(), 0);
}

#[test]
fn test_disconnect_while_publishing() {
    let out = Output::<Tick>::new("out");
    let input = Input::<Tick>::new("in");
    input.connect(&out);

    let running = Arc::new(AtomicBool::new(true));
    let publisher = {
        let out = out.clone();
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let mut seq = 0;
            while running.load(Ordering::SeqCst) {
                seq += 1;
                let _ = out.publish(tick("out", seq));
            }
        })
    };

    assert!(wait_until(|| input.latest().is_some()));
    assert!(input.disconnect());
    for _ in 0..1000 {
        assert!(input.latest().is_none());
    }

    running.store(false, Ordering::SeqCst);
    publisher.join().unwrap();
}

#[test]
fn test_latest_is_monotonic_under_concurrent_publishers() {
    let out = Output::<Tick>::new("out");
    let input = Input::<Tick>::new("in");
    input.connect(&out);

    let publishers: Vec<_> = (0..4)
        .map(|_| {
            let out = out.clone();
            thread::spawn(move || {
                for seq in 0..500 {
                    out.publish(tick("out", seq)).unwrap();
                }
            })
        })
        .collect();

    let mut last = 0;
    let mut reads = 0;
    while reads < 5000 {
        if let Some(obj) = input.latest_object() {
            assert!(obj.sequence() >= last, "input went back in time");
            last = obj.sequence();
        }
        reads += 1;
    }
    for p in publishers {
        p.join().unwrap();
    }
    assert_eq!(input.latest_object().unwrap().sequence(), 2000);
}

#[test]
fn test_reentrant_publish_from_subscriber_is_rejected() {
    let out = Output::<Tick>::new("loop");
    let rejected = Arc::new(AtomicUsize::new(0));
    let (inner, r) = (out.clone(), Arc::clone(&rejected));
    out.subscribe(move |_| {
        if let Err(PipelineError::ReentrantPublish { output }) = inner.publish(tick("loop", 0)) {
            assert_eq!(output, "loop");
            r.fetch_add(1, Ordering::SeqCst);
        }
    });

    out.publish(tick("loop", 1)).unwrap();
    out.publish(tick("loop", 2)).unwrap();
    assert_eq!(rejected.load(Ordering::SeqCst), 2);
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl StreamType for DropFlag {}

#[test]
fn test_payload_released_by_last_holder() {
    let dropped = Arc::new(AtomicBool::new(false));
    let out = Output::<DropFlag>::new("out");
    let input = Input::<DropFlag>::new("in");
    input.connect(&out);

    out.publish(DropFlag(Arc::clone(&dropped))).unwrap();
    let held = input.latest().unwrap();

    out.reset();
    input.disconnect();
    assert!(!dropped.load(Ordering::SeqCst));
    drop(held);
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn test_sparse_view_sees_producer_appends_before_publish() {
    let base = Image::filled(16, 16, [0, 0, 0]);
    let mut producer = Sparse::<Point>::new(base.clone(), &[SourceId(7)]);
    let object = StreamObject::new(producer.clone());

    let view = Sparse::<Point>::from_stream_object(&object).unwrap();
    producer.add(Point::new(1.0, 2.0));
    assert_eq!(view.size(), 1);
    assert_eq!(view.at(0), Point::new(1.0, 2.0));
    assert!(view.base_image().ptr_eq(&base));
}

#[test]
fn test_published_sparse_is_frozen_for_readers() {
    let out = Output::<Sparse<Point>>::new("spots");
    let input = Input::<Sparse<Point>>::new("overlay");
    input.connect(&out);

    let mut producer = Sparse::<Point>::new(Image::filled(4, 4, [0, 0, 0]), &[]);
    producer.add(Point::new(1.0, 1.0));
    out.publish(producer.clone()).unwrap();

    producer.add(Point::new(2.0, 2.0));
    let received = input.latest().unwrap();
    assert_eq!(received.size(), 1);
    assert_eq!(producer.size(), 2);
    assert_eq!(received.at(1), Point::default());
}

#[test]
fn test_typed_view_of_wrong_type_fails() {
    let object = StreamObject::new(tick("x", 0));
    assert!(matches!(
        object.downcast::<Image>(),
        Err(PipelineError::TypeMismatch { .. })
    ));
    assert!(Sparse::<Point>::from_stream_object(&object).is_err());
}

#[test]
fn test_graph_chain_delivers_end_to_end() {
    let (mut graph, _bridge) = GraphBuilder::new().build();
    let source = graph.add_item::<Ticker>().unwrap();
    let relay = graph.add_item::<Relay>().unwrap();
    graph.connect((source, "out"), (relay, "in")).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    graph
        .item(relay)
        .unwrap()
        .output("out")
        .unwrap()
        .subscribe(move |obj| {
            if let Ok(t) = obj.downcast::<Tick>() {
                s.lock().push(t.seq);
            }
        });

    graph.start_all().unwrap();
    assert!(wait_until(|| seen.lock().len() >= 5));
    graph.stop_all();

    let seen = seen.lock();
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "relay reordered ticks");
}

#[test]
fn test_removed_producer_leaves_consumer_unconnected() {
    let (mut graph, _bridge) = GraphBuilder::new().build();
    let source = graph.add_item::<Ticker>().unwrap();
    let relay = graph.add_item::<Relay>().unwrap();
    graph.connect((source, "out"), (relay, "in")).unwrap();
    graph.start_all().unwrap();

    let relay_out = graph.item(relay).unwrap().output("out").unwrap().clone();
    assert!(wait_until(|| relay_out.latest_object().is_some()));

    graph.remove_item(source).unwrap();
    let relay_in = graph.item(relay).unwrap().input("in").unwrap().clone();
    assert!(!relay_in.is_connected());
    assert!(relay_in.latest_object().is_none());

    // the consumer keeps running without data
    thread::sleep(Duration::from_millis(10));
    assert!(graph.item(relay).unwrap().is_running());
    graph.stop_all();
}
