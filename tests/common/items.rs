//! Small items used to drive the graph in tests

use itemflow::pipeline::{
    AnyOutput, FailurePolicy, Input, Item, ItemBuilder, ItemType, IterationContext, Output, StreamType,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Payload carrying where and when it was produced
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub origin: &'static str,
    pub seq: u64,
}

impl StreamType for Tick {
    fn type_name() -> &'static str {
        "Tick"
    }
}

/// Emits a `Tick` every iteration
pub struct Ticker {
    pub out: Output<Tick>,
}

impl Item for Ticker {
    fn iterate(&mut self, ctx: &mut IterationContext) -> anyhow::Result<()> {
        ctx.emit(
            &self.out,
            Tick {
                origin: "ticker",
                seq: ctx.iteration,
            },
        );
        Ok(())
    }
}

impl ItemType for Ticker {
    const TYPE_NAME: &'static str = "Ticker";

    fn build(builder: &mut ItemBuilder) -> Self {
        Self {
            out: builder.add_output("out"),
        }
    }
}

/// Forwards each new `Tick` unchanged
pub struct Relay {
    pub input: Input<Tick>,
    pub out: Output<Tick>,
}

impl Item for Relay {
    fn iterate(&mut self, ctx: &mut IterationContext) -> anyhow::Result<()> {
        if let Some(tick) = self.input.take_new() {
            ctx.emit_arc(&self.out, tick);
        }
        Ok(())
    }
}

impl ItemType for Relay {
    const TYPE_NAME: &'static str = "Relay";

    fn build(builder: &mut ItemBuilder) -> Self {
        Self {
            input: builder.add_input("in"),
            out: builder.add_output("out"),
        }
    }
}

/// Fails on every iteration that sees new input
pub struct Exploder {
    pub input: Input<Tick>,
    pub out: Output<Tick>,
}

impl Item for Exploder {
    fn iterate(&mut self, ctx: &mut IterationContext) -> anyhow::Result<()> {
        if let Some(tick) = self.input.take_new() {
            ctx.emit_arc(&self.out, tick);
            anyhow::bail!("cannot handle tick");
        }
        Ok(())
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Retry
    }
}

impl ItemType for Exploder {
    const TYPE_NAME: &'static str = "Exploder";

    fn build(builder: &mut ItemBuilder) -> Self {
        Self {
            input: builder.add_input("in"),
            out: builder.add_output("out"),
        }
    }
}

/// Counts every object an output publishes
pub fn count_publishes(output: &AnyOutput) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    output.subscribe(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    counter
}

pub fn load(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
