//! Mutable, thread-shared transaction recorder and its one-shot freeze into an
//! [`ImmutableTransaction`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{ApmError, Result};
use crate::ids::Guid;
use crate::model::segment::{MethodCall, Segment, SegmentData, SegmentId};
use crate::model::transaction::{
    ImmutableTransaction, TracingState, TransactionMetadata, TransactionName,
};

/// Supplies the logical parent for a new segment and tracks segment entry/exit.
pub trait CallStackProvider: Send + Sync {
    fn parent(&self) -> Option<SegmentId>;
    fn push(&self, id: SegmentId);
    fn pop(&self, id: SegmentId);
}

/// One call stack per OS thread. Each pushed id remembers the thread that
/// pushed it, so a segment ended on another thread still leaves its owner's stack.
#[derive(Debug, Default)]
pub struct ThreadCallStack {
    state: Mutex<CallStacks>,
}

#[derive(Debug, Default)]
struct CallStacks {
    stacks: HashMap<ThreadId, Vec<SegmentId>>,
    owners: HashMap<SegmentId, ThreadId>,
}

impl ThreadCallStack {
    fn state(&self) -> MutexGuard<'_, CallStacks> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CallStackProvider for ThreadCallStack {
    fn parent(&self) -> Option<SegmentId> {
        self.state()
            .stacks
            .get(&thread::current().id())
            .and_then(|s| s.last().copied())
    }

    fn push(&self, id: SegmentId) {
        let owner = thread::current().id();
        let mut state = self.state();
        state.stacks.entry(owner).or_default().push(id);
        state.owners.insert(id, owner);
    }

    fn pop(&self, id: SegmentId) {
        let mut state = self.state();
        let Some(owner) = state.owners.remove(&id) else {
            return;
        };
        if let Some(stack) = state.stacks.get_mut(&owner) {
            // Segments may end out of order; drop the id wherever it sits.
            if let Some(pos) = stack.iter().rposition(|s| *s == id) {
                stack.remove(pos);
            }
            if stack.is_empty() {
                state.stacks.remove(&owner);
            }
        }
    }
}

pub struct TransactionBuilder {
    guid: Guid,
    name: TransactionName,
    start_time: DateTime<Utc>,
    next_segment_id: AtomicU64,
    segments: Mutex<Vec<Segment>>,
    metadata: Mutex<TransactionMetadata>,
    call_stack: Box<dyn CallStackProvider>,
    priority: f32,
    sampled: bool,
    trace_id: String,
    tracing_state: Option<TracingState>,
}

impl TransactionBuilder {
    pub fn new(name: TransactionName, start_time: DateTime<Utc>) -> Self {
        let guid = Guid::generate();
        Self {
            trace_id: guid.as_str().to_string(),
            guid,
            name,
            start_time,
            next_segment_id: AtomicU64::new(0),
            segments: Mutex::new(Vec::new()),
            metadata: Mutex::new(TransactionMetadata::default()),
            call_stack: Box::new(ThreadCallStack::default()),
            priority: 0.0,
            sampled: false,
            tracing_state: None,
        }
    }

    pub fn with_call_stack(mut self, provider: Box<dyn CallStackProvider>) -> Self {
        self.call_stack = provider;
        self
    }

    pub fn with_sampling(mut self, priority: f32, sampled: bool) -> Self {
        self.priority = priority;
        self.sampled = sampled;
        self
    }

    /// Accepts an inbound payload; the trace id continues the caller's trace.
    pub fn with_inbound_trace(mut self, trace_id: impl Into<String>, state: TracingState) -> Self {
        self.trace_id = trace_id.into();
        self.tracing_state = Some(state);
        self
    }

    pub fn update_metadata(&self, f: impl FnOnce(&mut TransactionMetadata)) {
        let mut metadata = self.metadata.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut metadata);
    }

    /// Opens a segment as a child of the current call-stack top.
    pub fn start_segment(
        &self,
        data: SegmentData,
        method_call: MethodCall,
        relative_start: Duration,
    ) -> SegmentId {
        let parent = self.call_stack.parent();
        self.start_segment_with_parent(parent, data, method_call, relative_start)
    }

    /// Opens a segment under an explicit parent, for work that hopped threads.
    pub fn start_segment_with_parent(
        &self,
        parent_id: Option<SegmentId>,
        data: SegmentData,
        method_call: MethodCall,
        relative_start: Duration,
    ) -> SegmentId {
        let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let segment = Segment {
            id,
            parent_id,
            span_id: Guid::generate(),
            relative_start,
            duration: None,
            data,
            method_call,
        };
        self.segments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(segment);
        self.call_stack.push(id);
        id
    }

    pub fn end_segment(&self, id: SegmentId, relative_end: Duration) -> Result<()> {
        let mut segments = self.segments.lock().unwrap_or_else(|e| e.into_inner());
        let segment = segments
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ApmError::Segment(format!("unknown segment id {id}")))?;
        if segment.duration.is_some() {
            return Err(ApmError::Segment(format!("segment {id} already ended")));
        }
        segment.duration = Some(relative_end.saturating_sub(segment.relative_start));
        drop(segments);
        self.call_stack.pop(id);
        Ok(())
    }

    /// Consumes the builder. Segments keep creation order.
    pub fn freeze(
        self,
        duration: Duration,
        response_time: Option<Duration>,
    ) -> ImmutableTransaction {
        let segments = self
            .segments
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        let unfinished = segments.iter().filter(|s| !s.is_finished()).count();
        if unfinished > 0 {
            debug!(guid = %self.guid, unfinished, "freezing transaction with open segments");
        }

        ImmutableTransaction {
            guid: self.guid,
            name: self.name,
            metadata: self.metadata.into_inner().unwrap_or_else(|e| e.into_inner()),
            start_time: self.start_time,
            duration,
            response_time,
            priority: self.priority,
            sampled: self.sampled,
            trace_id: self.trace_id,
            tracing_state: self.tracing_state,
            segments,
            ignored: false,
        }
    }

    /// Freezes a builder shared across threads. Fails while other handles remain.
    pub fn freeze_shared(
        builder: Arc<Self>,
        duration: Duration,
        response_time: Option<Duration>,
    ) -> Result<ImmutableTransaction> {
        let builder = Arc::try_unwrap(builder).map_err(|_| {
            ApmError::InvalidArgument("transaction is still referenced elsewhere".to_string())
        })?;
        Ok(builder.freeze(duration, response_time))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;

    fn builder() -> TransactionBuilder {
        TransactionBuilder::new(
            TransactionName::web("foo", "bar"),
            Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
        )
    }

    fn simple(name: &str) -> SegmentData {
        SegmentData::Simple {
            name: name.to_string(),
        }
    }

    #[test]
    fn nested_segments_follow_call_stack() {
        let b = builder();
        let root = b.start_segment(simple("root"), MethodCall::new("t", "m"), Duration::ZERO);
        let child = b.start_segment(
            simple("child"),
            MethodCall::new("t", "m"),
            Duration::from_millis(1),
        );
        b.end_segment(child, Duration::from_millis(3)).unwrap();
        let sibling = b.start_segment(
            simple("sibling"),
            MethodCall::new("t", "m"),
            Duration::from_millis(4),
        );
        b.end_segment(sibling, Duration::from_millis(5)).unwrap();
        b.end_segment(root, Duration::from_millis(6)).unwrap();

        let tx = b.freeze(Duration::from_millis(6), None);
        let parents: Vec<_> = tx.segments.iter().map(|s| s.parent_id).collect();
        assert_eq!(parents, vec![None, Some(root), Some(root)]);
        assert_eq!(tx.segments[1].duration, Some(Duration::from_millis(2)));
    }

    struct FixedParent(SegmentId);

    impl CallStackProvider for FixedParent {
        fn parent(&self) -> Option<SegmentId> {
            Some(self.0)
        }
        fn push(&self, _id: SegmentId) {}
        fn pop(&self, _id: SegmentId) {}
    }

    #[test]
    fn custom_call_stack_supplies_parents() {
        let b = builder().with_call_stack(Box::new(FixedParent(7)));
        let id = b.start_segment(simple("a"), MethodCall::new("t", "m"), Duration::ZERO);
        let tx = b.freeze(Duration::from_millis(1), None);
        assert_eq!(tx.segments[0].id, id);
        assert_eq!(tx.segments[0].parent_id, Some(7));
    }

    #[test]
    fn ending_twice_is_rejected() {
        let b = builder();
        let id = b.start_segment(simple("a"), MethodCall::new("t", "m"), Duration::ZERO);
        b.end_segment(id, Duration::from_millis(1)).unwrap();
        assert!(b.end_segment(id, Duration::from_millis(2)).is_err());
        assert!(b.end_segment(99, Duration::from_millis(2)).is_err());
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let b = Arc::new(builder());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = Arc::clone(&b);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            let id = b.start_segment(
                                simple("w"),
                                MethodCall::new("t", "m"),
                                Duration::ZERO,
                            );
                            b.end_segment(id, Duration::from_millis(1)).unwrap();
                            id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id));
            }
        }

        let tx = TransactionBuilder::freeze_shared(b, Duration::from_secs(1), None).unwrap();
        assert_eq!(tx.segments.len(), 400);
        assert!(tx.segments.iter().all(|s| s.parent_id.is_none()));
    }

    #[test]
    fn freeze_shared_fails_while_referenced() {
        let b = Arc::new(builder());
        let _other = Arc::clone(&b);
        assert!(TransactionBuilder::freeze_shared(b, Duration::from_secs(1), None).is_err());
    }

    #[test]
    fn explicit_parent_survives_thread_hop() {
        let b = Arc::new(builder());
        let root = b.start_segment(simple("root"), MethodCall::new("t", "m"), Duration::ZERO);
        let worker = {
            let b = Arc::clone(&b);
            std::thread::spawn(move || {
                b.start_segment_with_parent(
                    Some(root),
                    simple("async"),
                    MethodCall::new("t", "m"),
                    Duration::from_millis(1),
                )
            })
        };
        let child = worker.join().unwrap();
        let tx = TransactionBuilder::freeze_shared(b, Duration::from_secs(1), None).unwrap();
        let child = tx.segments.iter().find(|s| s.id == child).unwrap();
        assert_eq!(child.parent_id, Some(root));
    }

    #[test]
    fn segment_ended_on_another_thread_leaves_the_owner_stack() {
        let b = Arc::new(builder());
        let first = b.start_segment(simple("first"), MethodCall::new("t", "m"), Duration::ZERO);
        {
            let b = Arc::clone(&b);
            std::thread::spawn(move || b.end_segment(first, Duration::from_millis(2)).unwrap())
                .join()
                .unwrap();
        }
        let second = b.start_segment(
            simple("second"),
            MethodCall::new("t", "m"),
            Duration::from_millis(3),
        );
        b.end_segment(second, Duration::from_millis(4)).unwrap();

        let tx = TransactionBuilder::freeze_shared(b, Duration::from_secs(1), None).unwrap();
        let second = tx.segments.iter().find(|s| s.id == second).unwrap();
        assert_eq!(second.parent_id, None);
    }

    #[test]
    fn hopped_child_nests_worker_segments_until_it_ends() {
        let b = Arc::new(builder());
        let root = b.start_segment(simple("root"), MethodCall::new("t", "m"), Duration::ZERO);
        let (hopped, nested) = {
            let b = Arc::clone(&b);
            std::thread::spawn(move || {
                let hopped = b.start_segment_with_parent(
                    Some(root),
                    simple("async"),
                    MethodCall::new("t", "m"),
                    Duration::from_millis(1),
                );
                let nested = b.start_segment(
                    simple("inner"),
                    MethodCall::new("t", "m"),
                    Duration::from_millis(2),
                );
                b.end_segment(nested, Duration::from_millis(3)).unwrap();
                (hopped, nested)
            })
            .join()
            .unwrap()
        };
        b.end_segment(hopped, Duration::from_millis(4)).unwrap();
        let after = b.start_segment(
            simple("after"),
            MethodCall::new("t", "m"),
            Duration::from_millis(5),
        );

        let tx = TransactionBuilder::freeze_shared(b, Duration::from_secs(1), None).unwrap();
        let parent_of = |id: SegmentId| {
            tx.segments.iter().find(|s| s.id == id).unwrap().parent_id
        };
        assert_eq!(parent_of(nested), Some(hopped));
        assert_eq!(parent_of(after), Some(root));
    }
}
