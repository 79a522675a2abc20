//! Activation stack: the attachment point between a transport and its effects.

use std::any::type_name;
use std::io;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Effect, Handler, Result, SegmentHandler};
use crate::errors::{EffectError, InvariantViolation};
use crate::segment::Segment;

/// Stand-in head while the real head is being rewrapped or after it was lost.
struct Detached;

impl Detached {
    fn error() -> EffectError {
        EffectError::Link(io::Error::other("effect chain detached"))
    }
}

impl SegmentHandler for Detached {
    fn send_segment(&mut self, _segment: Segment) -> Result<()> {
        Err(Self::error())
    }

    fn segment_received(&mut self, _segment: Segment) -> Result<()> {
        Err(Self::error())
    }

    fn tick(&mut self) -> Result<()> {
        Err(Self::error())
    }
}

struct Chain {
    head: Handler,
    /// Identifiers of the installed layers, innermost first
    layers: Vec<u64>,
    next_layer: u64,
    /// First invariant violation raised by any layer
    violation: Option<InvariantViolation>,
}

impl Chain {
    fn pop(&mut self) {
        let head = std::mem::replace(&mut self.head, Box::new(Detached));
        match head.into_inner() {
            Some(inner) => {
                self.head = inner;
                self.layers.pop();
            }
            None => {
                tracing::error!(
                    depth = self.layers.len(),
                    "effect layer returned no inner handler, chain detached"
                );
                self.layers.clear();
            }
        }
    }
}

/// Marks the chain detached if a layer constructor unwinds mid-rewrap.
///
/// The constructor consumed the previous head, so it cannot be restored.
struct Rewrap<'a> {
    chain: &'a mut Chain,
    installed: bool,
}

impl Drop for Rewrap<'_> {
    fn drop(&mut self) {
        if !self.installed {
            tracing::error!(
                depth = self.chain.layers.len(),
                "effect constructor panicked, chain detached"
            );
            self.chain.layers.clear();
        }
    }
}

/// Per-role stack of active effects wrapping the transport's base handler.
///
/// The transport routes every outbound segment, inbound segment and timer
/// tick through [`send_segment`](Self::send_segment),
/// [`segment_received`](Self::segment_received) and [`tick`](Self::tick).
/// Scenarios install effects with [`activate`](Self::activate). Clones share
/// the same chain and every event is serialised by one lock, so the base
/// handler must not call back into the stack.
#[derive(Clone)]
pub struct EffectStack {
    chain: Arc<Mutex<Chain>>,
}

impl EffectStack {
    /// Creates a stack whose chain consists only of `base`.
    pub fn new(base: Handler) -> Self {
        Self {
            chain: Arc::new(Mutex::new(Chain {
                head: base,
                layers: Vec::new(),
                next_layer: 0,
                violation: None,
            })),
        }
    }

    /// Routes a segment the protocol wants to transmit.
    ///
    /// # Errors
    /// Returns `EffectError` if an active effect rejects the segment.
    pub fn send_segment(&self, segment: Segment) -> Result<()> {
        self.dispatch(|head| head.send_segment(segment))
    }

    /// Routes a segment arriving from the peer.
    ///
    /// # Errors
    /// Returns `EffectError` if an active effect rejects the segment.
    pub fn segment_received(&self, segment: Segment) -> Result<()> {
        self.dispatch(|head| head.segment_received(segment))
    }

    /// Routes one tick of the protocol's timer loop.
    ///
    /// # Errors
    /// Returns `EffectError` if an active effect fails while releasing segments.
    pub fn tick(&self) -> Result<()> {
        self.dispatch(|head| head.tick())
    }

    fn dispatch(&self, event: impl FnOnce(&mut dyn SegmentHandler) -> Result<()>) -> Result<()> {
        let mut chain = self.chain.lock();
        let result = event(chain.head.as_mut());
        if let Err(EffectError::Invariant(violation)) = &result {
            if chain.violation.is_none() {
                tracing::error!("effect chain detected violation: {violation}");
                chain.violation = Some(violation.clone());
            }
        }
        result
    }

    /// Installs `make(current_head)` as the new head of the chain.
    ///
    /// The returned guard dereferences to the effect's control handle and
    /// restores the previous head when dropped or explicitly deactivated.
    ///
    /// # Panics
    /// Propagates a panic from `make`. The handler it was given is lost, so
    /// the chain stays detached and every later event fails with
    /// `EffectError::Link`.
    pub fn activate<E, F>(&self, make: F) -> Activation<E::Control>
    where
        E: Effect,
        F: FnOnce(Handler) -> E,
    {
        let mut chain = self.chain.lock();
        let mut rewrap = Rewrap {
            chain: &mut chain,
            installed: false,
        };
        let current = std::mem::replace(&mut rewrap.chain.head, Box::new(Detached));
        let effect = make(current);
        let control = effect.control();
        rewrap.chain.head = Box::new(effect);
        rewrap.installed = true;
        drop(rewrap);

        let layer = chain.next_layer;
        chain.next_layer += 1;
        chain.layers.push(layer);
        tracing::debug!(
            effect = type_name::<E>(),
            depth = chain.layers.len(),
            "activated effect"
        );

        Activation {
            stack: self.clone(),
            layer,
            control,
            active: true,
        }
    }

    /// Returns the number of installed effects.
    pub fn depth(&self) -> usize {
        self.chain.lock().layers.len()
    }

    /// Fails with the first violation any effect raised so far.
    ///
    /// # Errors
    /// Returns the latched `InvariantViolation`, if any.
    pub fn check(&self) -> std::result::Result<(), InvariantViolation> {
        match &self.chain.lock().violation {
            Some(violation) => Err(violation.clone()),
            None => Ok(()),
        }
    }

    /// Removes and returns the latched violation.
    pub fn take_violation(&self) -> Option<InvariantViolation> {
        self.chain.lock().violation.take()
    }

    fn deactivate_layer(&self, layer: u64) {
        let mut chain = self.chain.lock();
        let Some(position) = chain.layers.iter().position(|&id| id == layer) else {
            tracing::debug!(layer, "effect layer already unwound");
            return;
        };

        let above = chain.layers.len() - position - 1;
        if above > 0 {
            tracing::error!(
                layer,
                above,
                "deactivating an effect while inner activations are still installed, unwinding them first"
            );
        }
        while chain.layers.len() > position {
            chain.pop();
        }
        tracing::debug!(depth = chain.layers.len(), "deactivated effect");
    }
}

/// Scoped installation of an effect.
///
/// Dropping the guard restores the chain head that was active before the
/// effect was installed, on every exit path.
#[must_use = "the effect is deactivated as soon as the activation is dropped"]
pub struct Activation<C> {
    stack: EffectStack,
    layer: u64,
    control: C,
    active: bool,
}

impl<C> Activation<C> {
    /// Returns the effect's control handle.
    pub fn control(&self) -> &C {
        &self.control
    }

    /// Restores the previous head and reports any latched violation.
    ///
    /// # Errors
    /// Returns the first `InvariantViolation` raised on this stack.
    pub fn deactivate(mut self) -> std::result::Result<(), InvariantViolation> {
        self.detach();
        self.stack.check()
    }

    fn detach(&mut self) {
        if self.active {
            self.active = false;
            self.stack.deactivate_layer(self.layer);
        }
    }
}

impl<C> Deref for Activation<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.control
    }
}

impl<C> Drop for Activation<C> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_support::data;
    use crate::effects::{DropEveryOther, Passthrough, Probe, SegmentLengthGuard};

    /// Effect that tags outbound payloads so nesting order is observable.
    struct Tag {
        inner: Handler,
        marker: u8,
    }

    impl SegmentHandler for Tag {
        fn send_segment(&mut self, segment: Segment) -> Result<()> {
            let mut raw = segment.as_bytes().to_vec();
            raw.push(self.marker);
            self.inner.send_segment(Segment::from(raw))
        }

        fn segment_received(&mut self, segment: Segment) -> Result<()> {
            self.inner.segment_received(segment)
        }

        fn tick(&mut self) -> Result<()> {
            self.inner.tick()
        }

        fn into_inner(self: Box<Self>) -> Option<Handler> {
            Some(self.inner)
        }
    }

    impl Effect for Tag {
        type Control = u8;

        fn control(&self) -> u8 {
            self.marker
        }
    }

    fn tag(marker: u8) -> impl FnOnce(Handler) -> Tag {
        move |inner| Tag { inner, marker }
    }

    fn trailer(segment: &Segment) -> Vec<u8> {
        segment.as_bytes()[crate::segment::SEGMENT_SIZE..].to_vec()
    }

    #[test]
    fn test_activation_wraps_and_restores() {
        let (probe, log) = Probe::new();
        let stack = EffectStack::new(Box::new(probe));

        {
            let a = stack.activate(tag(1));
            assert_eq!(*a, 1);
            assert_eq!(stack.depth(), 1);
            stack.send_segment(data(1, b"x")).unwrap();
        }
        assert_eq!(stack.depth(), 0);
        stack.send_segment(data(2, b"x")).unwrap();

        let sent = log.sent();
        assert_eq!(trailer(&sent[0]), vec![1]);
        assert!(trailer(&sent[1]).is_empty());
    }

    #[test]
    fn test_nested_activation_composes() {
        let (probe, log) = Probe::new();
        let stack = EffectStack::new(Box::new(probe));

        let a = stack.activate(tag(1));
        {
            let _b = stack.activate(tag(2));
            stack.send_segment(data(1, b"x")).unwrap();
        }
        // B is gone, exactly A remains.
        assert_eq!(stack.depth(), 1);
        stack.send_segment(data(2, b"x")).unwrap();
        a.deactivate().unwrap();
        stack.send_segment(data(3, b"x")).unwrap();

        let sent = log.sent();
        // Outer effect B sees the segment first, then A.
        assert_eq!(trailer(&sent[0]), vec![2, 1]);
        assert_eq!(trailer(&sent[1]), vec![1]);
        assert!(trailer(&sent[2]).is_empty());
    }

    #[test]
    fn test_out_of_order_release_never_double_pops() {
        let (probe, _log) = Probe::new();
        let stack = EffectStack::new(Box::new(probe));

        let a = stack.activate(Passthrough::new);
        let b = stack.activate(Passthrough::new);
        drop(a);
        assert_eq!(stack.depth(), 0);

        let c = stack.activate(Passthrough::new);
        drop(b);
        assert_eq!(stack.depth(), 1);
        drop(c);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_restored_on_early_failure() {
        fn scenario(stack: &EffectStack) -> std::result::Result<(), EffectError> {
            let _guard = stack.activate(SegmentLengthGuard::new);
            stack.send_segment(Segment::from(vec![0u8; 12]))?;
            Ok(())
        }

        let (probe, log) = Probe::new();
        let stack = EffectStack::new(Box::new(probe));
        assert!(scenario(&stack).is_err());
        assert_eq!(stack.depth(), 0);
        assert!(log.sent().is_empty());
    }

    #[test]
    fn test_restored_on_panic() {
        let (probe, _log) = Probe::new();
        let stack = EffectStack::new(Box::new(probe));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = stack.activate(DropEveryOther::new);
            panic!("role body failed");
        }));
        assert!(result.is_err());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_panicking_constructor_detaches_chain() {
        let (probe, log) = Probe::new();
        let stack = EffectStack::new(Box::new(probe));
        let outer = stack.activate(tag(1));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = stack.activate(|_inner: Handler| -> Tag { panic!("bad effect") });
        }));
        assert!(result.is_err());
        assert_eq!(stack.depth(), 0);
        assert!(matches!(
            stack.send_segment(data(1, b"x")),
            Err(EffectError::Link(_))
        ));

        // The outer layer was lost with the chain; dropping it is a no-op.
        drop(outer);
        assert_eq!(stack.depth(), 0);
        assert!(stack.tick().is_err());
        assert!(log.sent().is_empty());
    }

    #[test]
    fn test_violation_latched_and_surfaced_on_deactivate() {
        let (probe, _log) = Probe::new();
        let stack = EffectStack::new(Box::new(probe));

        let guard = stack.activate(SegmentLengthGuard::new);
        let err = stack.tick().and_then(|_| stack.segment_received(Segment::from(vec![1u8; 3])));
        assert!(err.is_err());
        assert!(stack.check().is_err());

        let violation = guard.deactivate().unwrap_err();
        assert!(matches!(
            violation,
            InvariantViolation::SegmentLength { actual: 3, .. }
        ));
        assert!(stack.take_violation().is_some());
        assert!(stack.check().is_ok());
    }
}
