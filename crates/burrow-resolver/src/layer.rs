//! The layer pipeline.
//!
//! A layer is a set of hooks over the resolution state machine. Hooks are
//! chained left to right: each receives the state produced so far and
//! returns the next one. The driver interprets the folded result:
//!
//! - `Produce` from a produce pass means "nothing short-circuited, keep
//!   going" — the next layer runs, and if every layer passes, the elected
//!   nameserver is queried.
//! - `Consume` from a produce pass means a packet was minted and is ready
//!   for I/O.
//! - `Noop` from a consume pass means the packet should be ignored
//!   outright (e.g. a spoof that failed the sanity checks).
//! - `Done` / `Fail` terminate the request.

use crate::resolve::{Context, Request};
use burrow_proto::Message;
use std::net::SocketAddr;

/// Resolution state threaded through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Ignore the input entirely.
    Noop,
    /// Waiting for (more) input.
    Consume,
    /// The plan has more work to produce.
    Produce,
    /// The request is complete.
    Done,
    /// The request failed.
    Fail,
}

/// One pipeline layer. Every hook defaults to passing the state through.
pub trait Layer: Send {
    /// Short identifier for logging.
    fn name(&self) -> &'static str;

    /// Called once when a request starts.
    fn begin(&mut self, _ctx: &Context, _req: &mut Request, state: State) -> State {
        state
    }

    /// Called when the request state is rewound (unused by the built-in
    /// layers, available to user layers).
    fn reset(&mut self, _ctx: &Context, _req: &mut Request, state: State) -> State {
        state
    }

    /// Called once when the request terminates.
    fn finish(&mut self, _ctx: &Context, _req: &mut Request, state: State) -> State {
        state
    }

    /// Called when the request is aborted.
    fn fail(&mut self, _ctx: &Context, _req: &mut Request, state: State) -> State {
        state
    }

    /// Feeds a received packet through the layer.
    fn consume(
        &mut self,
        _ctx: &Context,
        _req: &mut Request,
        _source: Option<SocketAddr>,
        _pkt: &Message,
        state: State,
    ) -> State {
        state
    }

    /// Gives the layer a chance to satisfy or advance the current query,
    /// or to write the next outbound packet into `pkt`.
    fn produce(
        &mut self,
        _ctx: &Context,
        _req: &mut Request,
        _pkt: &mut Message,
        state: State,
    ) -> State {
        state
    }
}

/// An ordered set of layers.
#[derive(Default)]
pub struct Pipeline {
    layers: Vec<Box<dyn Layer>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer; layers run in insertion order.
    pub fn push(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
    }

    /// Number of installed layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// True when no layers are installed.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs the begin hook of every layer.
    pub fn begin(&mut self, ctx: &Context, req: &mut Request) -> State {
        let mut state = State::Consume;
        for layer in &mut self.layers {
            state = layer.begin(ctx, req, state);
            if state == State::Fail {
                break;
            }
        }
        state
    }

    /// Rewinds every layer's per-request state.
    pub fn reset(&mut self, ctx: &Context, req: &mut Request) -> State {
        let mut state = State::Consume;
        for layer in &mut self.layers {
            state = layer.reset(ctx, req, state);
            if state == State::Fail {
                break;
            }
        }
        state
    }

    /// Runs the finish (or fail) hook of every layer.
    pub fn finish(&mut self, ctx: &Context, req: &mut Request, state: State) -> State {
        let mut state = state;
        for layer in &mut self.layers {
            state = if state == State::Fail {
                layer.fail(ctx, req, state)
            } else {
                layer.finish(ctx, req, state)
            };
        }
        state
    }

    /// Feeds a packet through the consume hooks.
    pub fn consume(
        &mut self,
        ctx: &Context,
        req: &mut Request,
        source: Option<SocketAddr>,
        pkt: &Message,
    ) -> State {
        let mut state = State::Consume;
        for layer in &mut self.layers {
            state = layer.consume(ctx, req, source, pkt, state);
            if matches!(state, State::Fail | State::Noop) {
                break;
            }
        }
        state
    }

    /// Runs the produce hooks until one short-circuits or mints a packet.
    pub fn produce(&mut self, ctx: &Context, req: &mut Request, pkt: &mut Message) -> State {
        let mut state = State::Produce;
        for layer in &mut self.layers {
            state = layer.produce(ctx, req, pkt, state);
            if state != State::Produce {
                break;
            }
        }
        state
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.layers.iter().map(|l| l.name()).collect();
        f.debug_struct("Pipeline").field("layers", &names).finish()
    }
}
