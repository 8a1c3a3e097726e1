//! Sparse overlays anchored to a shared base image.
//!
//! A [`Sparse<T>`] is an append-only list of annotations (corners, contours,
//! poses, ...) plus the image they were detected on. Reads past the end return
//! the container's default value instead of failing, which lets overlay
//! consumers index by slot without bounds bookkeeping.
//!
//! # Sharing
//!
//! Handles are reference-like: cloning a `Sparse`, or building a view from
//! the `StreamObject` that carries it, yields a handle onto the same storage.
//! Appends through one handle are visible through the others until the value
//! is published. Publishing seals the storage; a later `add` on a sealed
//! handle first detaches that handle onto a private copy, so readers of the
//! published value never observe growth.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::image::Image;
use crate::pipeline::stream::{StreamObject, StreamType};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Display colours handed out to sources in declaration order.
pub const SOURCE_PALETTE: [[u8; 3]; 10] = [
    [255, 0, 0],   // red
    [0, 0, 255],   // blue
    [0, 255, 0],   // green
    [255, 0, 255], // magenta
    [0, 255, 255], // cyan
    [128, 0, 0],   // dark red
    [0, 0, 128],   // dark blue
    [0, 128, 0],   // dark green
    [128, 0, 128], // dark magenta
    [0, 128, 128], // dark cyan
];

/// Tag naming where a group of annotations came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u32);

/// A declared source and the colour the overlay renderer should use for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub id: SourceId,
    pub color: [u8; 3],
}

/// 2D image coordinate, the most common overlay annotation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

struct SparseStorage<T> {
    base_image: Image,
    sources: Vec<SourceInfo>,
    default_value: T,
    data: RwLock<Vec<T>>,
    sealed: AtomicBool,
}

impl<T: Clone> SparseStorage<T> {
    fn detached_copy(&self) -> Self {
        Self {
            base_image: self.base_image.clone(),
            sources: self.sources.clone(),
            default_value: self.default_value.clone(),
            data: RwLock::new(self.data.read().clone()),
            sealed: AtomicBool::new(false),
        }
    }
}

/// Append-only annotations over a shared base image.
pub struct Sparse<T> {
    storage: Arc<SparseStorage<T>>,
}

impl<T: Clone + Default> Sparse<T> {
    /// New, independent container; out-of-range reads return `T::default()`.
    pub fn new(base_image: Image, sources: &[SourceId]) -> Self {
        Self::with_default(base_image, sources, T::default())
    }
}

impl<T: Clone> Sparse<T> {
    /// New, independent container with an explicit fallback value.
    pub fn with_default(base_image: Image, sources: &[SourceId], default_value: T) -> Self {
        let sources = sources
            .iter()
            .enumerate()
            .map(|(i, &id)| SourceInfo {
                id,
                color: SOURCE_PALETTE[i % SOURCE_PALETTE.len()],
            })
            .collect();

        Self {
            storage: Arc::new(SparseStorage {
                base_image,
                sources,
                default_value,
                data: RwLock::new(Vec::new()),
                sealed: AtomicBool::new(false),
            }),
        }
    }

    /// Append one annotation.
    pub fn add(&mut self, value: T) {
        self.add_all(std::iter::once(value));
    }

    /// Append many annotations, preserving their order.
    pub fn add_all<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = T>,
    {
        {
            let mut data = self.storage.data.write();
            if !self.storage.sealed.load(Ordering::Acquire) {
                data.extend(values);
                return;
            }
        }

        let mut detached = self.storage.detached_copy();
        detached.data.get_mut().extend(values);
        self.storage = Arc::new(detached);
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.storage.data.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The element at `index`, or the default value when `index >= size()`.
    pub fn at(&self, index: usize) -> T {
        self.storage
            .data
            .read()
            .get(index)
            .cloned()
            .unwrap_or_else(|| self.storage.default_value.clone())
    }

    /// The element at `index` without a fallback.
    ///
    /// # Panics
    ///
    /// The caller must guarantee `index < size()`; anything else is a
    /// contract violation and panics.
    pub fn element(&self, index: usize) -> T {
        self.storage.data.read()[index].clone()
    }

    /// Copy of all annotations in append order.
    pub fn to_vec(&self) -> Vec<T> {
        self.storage.data.read().clone()
    }

    /// Borrow the annotations in append order without copying them.
    pub fn with_elements<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.storage.data.read())
    }

    #[inline]
    pub fn base_image(&self) -> &Image {
        &self.storage.base_image
    }

    #[inline]
    pub fn sources(&self) -> &[SourceInfo] {
        &self.storage.sources
    }

    #[inline]
    pub fn default_value(&self) -> &T {
        &self.storage.default_value
    }

    /// Whether the storage has been published and is now frozen.
    pub fn is_sealed(&self) -> bool {
        self.storage.sealed.load(Ordering::Acquire)
    }

    /// Whether both handles read and append through the same storage.
    pub fn shares_storage_with(&self, other: &Sparse<T>) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }
}

impl<T: Clone + Send + Sync + 'static> Sparse<T> {
    /// View onto the container carried by `object`.
    ///
    /// Fails with `TypeMismatch` when the object carries anything other
    /// than a `Sparse<T>`.
    pub fn from_stream_object(object: &StreamObject) -> PipelineResult<Self> {
        object.downcast::<Sparse<T>>().map(|s| (*s).clone())
    }
}

impl<T: Clone + Send + Sync + 'static> TryFrom<&StreamObject> for Sparse<T> {
    type Error = crate::pipeline::error::PipelineError;

    fn try_from(object: &StreamObject) -> PipelineResult<Self> {
        Self::from_stream_object(object)
    }
}

impl<T> Clone for Sparse<T> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<T: Clone + Default> Default for Sparse<T> {
    fn default() -> Self {
        Self::new(Image::default(), &[])
    }
}

impl<T: fmt::Debug> fmt::Debug for Sparse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sparse")
            .field("base_image", &self.storage.base_image)
            .field("len", &self.storage.data.read().len())
            .field("sealed", &self.storage.sealed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> StreamType for Sparse<T> {
    fn seal(&self) {
        let _data = self.storage.data.write();
        self.storage.sealed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Image {
        Image::filled(8, 8, [0, 0, 0])
    }

    #[test]
    fn test_at_falls_back_to_default() {
        let p1 = Point::new(1.0, 2.0);
        let p2 = Point::new(3.0, 4.0);
        let mut sparse = Sparse::<Point>::new(image(), &[SourceId(0)]);
        sparse.add_all(vec![p1, p2]);

        assert_eq!(sparse.size(), 2);
        assert_eq!(sparse.at(0), p1);
        assert_eq!(sparse.at(1), p2);
        assert_eq!(sparse.at(5), Point::default());
    }

    #[test]
    fn test_custom_default_value() {
        let mut sparse = Sparse::with_default(image(), &[], -1i32);
        sparse.add(3);
        assert_eq!(sparse.at(0), 3);
        assert_eq!(sparse.at(1), -1);
        assert_eq!(*sparse.default_value(), -1);
    }

    #[test]
    #[should_panic]
    fn test_element_out_of_range_panics() {
        let sparse = Sparse::<Point>::new(image(), &[]);
        sparse.element(0);
    }

    #[test]
    fn test_sources_get_palette_colours() {
        let ids: Vec<SourceId> = (0..12).map(SourceId).collect();
        let sparse = Sparse::<Point>::new(image(), &ids);
        let sources = sparse.sources();
        assert_eq!(sources.len(), 12);
        assert_eq!(sources[0].color, [255, 0, 0]);
        assert_eq!(sources[1].color, [0, 0, 255]);
        // wraps around after ten
        assert_eq!(sources[10].color, sources[0].color);
        assert_eq!(sources[11].id, SourceId(11));
    }

    #[test]
    fn test_clones_share_appends_before_publish() {
        let mut a = Sparse::<Point>::new(image(), &[]);
        let b = a.clone();
        a.add(Point::new(1.0, 1.0));
        assert_eq!(b.size(), 1);
        assert!(a.shares_storage_with(&b));
    }

    #[test]
    fn test_view_from_stream_object_shares_storage() {
        let sparse = Sparse::<Point>::new(image(), &[SourceId(1)]);
        let obj = StreamObject::new(sparse.clone());

        let mut view = Sparse::<Point>::from_stream_object(&obj).unwrap();
        view.add(Point::new(2.0, 2.0));

        let other = Sparse::<Point>::try_from(&obj).unwrap();
        assert_eq!(other.size(), 1);
        assert_eq!(sparse.size(), 1);
        assert!(other.base_image().ptr_eq(sparse.base_image()));
    }

    #[test]
    fn test_view_of_wrong_type_fails() {
        let obj = StreamObject::new(image());
        assert!(Sparse::<Point>::from_stream_object(&obj).is_err());

        let obj = StreamObject::new(Sparse::<i32>::new(image(), &[]));
        assert!(Sparse::<Point>::from_stream_object(&obj).is_err());
    }

    #[test]
    fn test_add_after_seal_detaches() {
        let mut producer = Sparse::<Point>::new(image(), &[]);
        producer.add(Point::new(1.0, 0.0));
        let published = producer.clone();
        published.seal();

        producer.add(Point::new(2.0, 0.0));

        assert!(published.is_sealed());
        assert_eq!(published.size(), 1);
        assert_eq!(producer.size(), 2);
        assert!(!producer.shares_storage_with(&published));
        assert!(!producer.is_sealed());
        assert!(producer.base_image().ptr_eq(published.base_image()));
    }

    #[test]
    fn test_with_elements_preserves_order() {
        let mut sparse = Sparse::<u32>::new(image(), &[]);
        sparse.add_all(0..5);
        let sum: u32 = sparse.with_elements(|e| e.iter().sum());
        assert_eq!(sum, 10);
        assert_eq!(sparse.to_vec(), vec![0, 1, 2, 3, 4]);
    }
}
