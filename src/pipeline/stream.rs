//! Type-erased stream payloads.
//!
//! Every value that travels over a connection is wrapped in a [`StreamObject`]:
//! an `Arc` around the payload plus a runtime [`TypeTag`]. Cloning a
//! `StreamObject` clones the `Arc`, so the producing output and every consumer
//! share one immutable payload. Typed views are recovered with
//! [`StreamObject::downcast`], which checks the tag and fails with
//! [`PipelineError::TypeMismatch`] instead of casting blindly.

use crate::pipeline::error::{PipelineError, PipelineResult};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// A payload type that can flow through ports.
///
/// Implementors are shared between threads once published, so they must be
/// `Send + Sync`. Interior state that may still change before publishing
/// (see `Sparse`) is frozen by [`seal`](StreamType::seal).
pub trait StreamType: Any + Send + Sync {
    /// Name used in type tags, port descriptors and error messages.
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }

    /// Called exactly once, right before the value is handed to subscribers.
    fn seal(&self) {}
}

/// Runtime type tag carried by every stream object and every port.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: StreamType>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: T::type_name(),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn is<T: StreamType>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.name)
    }
}

type SealFn = fn(&(dyn Any + Send + Sync));

/// Shared, immutable-after-publish payload.
#[derive(Clone)]
pub struct StreamObject {
    tag: TypeTag,
    payload: Arc<dyn Any + Send + Sync>,
    seal: SealFn,
    /// Publish sequence assigned by the output. Zero until published.
    sequence: u64,
}

impl StreamObject {
    pub fn new<T: StreamType>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: StreamType>(value: Arc<T>) -> Self {
        Self {
            tag: TypeTag::of::<T>(),
            payload: value,
            seal: |any| {
                if let Some(v) = any.downcast_ref::<T>() {
                    v.seal();
                }
            },
            sequence: 0,
        }
    }

    #[inline]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    #[inline]
    pub fn is<T: StreamType>(&self) -> bool {
        self.tag.is::<T>()
    }

    /// Publish sequence of this object on the output that published it.
    /// Zero for objects that were never published.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Recover a typed handle to the payload.
    pub fn downcast<T: StreamType>(&self) -> PipelineResult<Arc<T>> {
        if !self.is::<T>() {
            return Err(PipelineError::TypeMismatch {
                expected: T::type_name(),
                found: self.tag.name(),
            });
        }
        Arc::clone(&self.payload)
            .downcast::<T>()
            .map_err(|_| PipelineError::TypeMismatch {
                expected: T::type_name(),
                found: self.tag.name(),
            })
    }

    /// Whether both objects share the same payload allocation.
    pub fn ptr_eq(&self, other: &StreamObject) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }

    /// Number of live handles to the payload (producer slot, consumer slots, views).
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.payload)
    }

    pub(crate) fn sealed_with_sequence(mut self, sequence: u64) -> Self {
        (self.seal)(self.payload.as_ref());
        self.sequence = sequence;
        self
    }
}

impl fmt::Debug for StreamObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamObject")
            .field("tag", &self.tag)
            .field("sequence", &self.sequence)
            .finish()
    }
}
