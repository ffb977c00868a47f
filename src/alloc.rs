use std::{alloc::Layout, ptr::NonNull};

#[cfg(feature = "pool")]
use crossbeam::channel;
#[cfg(feature = "pool")]
use std::{fmt, sync::OnceLock};

use crate::AllocError;

/// Source of storage for control blocks.
///
/// The requested layout is always the layout of a whole control block, never the layout of the
/// value alone. An allocator passed to [`allocate_shared`][crate::allocate_shared] or
/// [`SharedPtr::from_raw_in`][crate::SharedPtr::from_raw_in] is moved into the block it
/// allocated and is used again, from inside the block, to free it.
pub trait Allocator {
    /// Allocates memory fitting `layout`.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Frees memory previously returned by [`Allocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this allocator (or a clone of it) with the
    /// same `layout`, and must not have been freed yet.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The global allocator as registered with `#[global_allocator]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Global;

impl Allocator for Global {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            return Err(AllocError::new(layout));
        }

        NonNull::new(unsafe { std::alloc::alloc(layout) }).ok_or_else(|| {
            log::debug!("global allocator refused {layout:?}");
            AllocError::new(layout)
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        std::alloc::dealloc(ptr.as_ptr(), layout)
    }
}

impl<A> Allocator for &A
where
    A: Allocator,
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(ptr, layout)
    }
}

/// A recycling allocator. Blocks freed into a `Pool` are kept and handed out again for the next
/// request of the same layout.
///
/// A pool is meant to serve one kind of block, usually by being used with a single value type.
/// Parked blocks whose layout does not match a request are returned to [`Global`].
///
/// Pools are usually `static`, since the control block keeps a reference to its allocator:
///
/// ```
/// # use sharedptr::{allocate_shared, Pool};
/// static POOL: Pool = Pool::new();
///
/// let s = allocate_shared(&POOL, 5).unwrap();
/// drop(s);
/// assert!(POOL.parked() == 1);
///
/// let _s = allocate_shared(&POOL, 6).unwrap();
/// assert!(POOL.parked() == 0);
/// ```
#[cfg(feature = "pool")]
pub struct Pool {
    channel: OnceLock<(channel::Sender<Parked>, channel::Receiver<Parked>)>,
}

#[cfg(feature = "pool")]
struct Parked {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Parked memory is unowned: no value lives in it and no handle points to it.
#[cfg(feature = "pool")]
unsafe impl Send for Parked {}

#[cfg(feature = "pool")]
impl Pool {
    /// Creates an empty pool.
    pub const fn new() -> Self {
        Pool {
            channel: OnceLock::new(),
        }
    }

    /// Number of freed blocks waiting to be reused.
    pub fn parked(&self) -> usize {
        self.channel.get().map_or(0, |(_, recv)| recv.len())
    }

    /// Returns every parked block to the global allocator.
    pub fn clear(&self) {
        if let Some((_, recv)) = self.channel.get() {
            while let Ok(parked) = recv.try_recv() {
                unsafe { Global.deallocate(parked.ptr, parked.layout) }
            }
        }
    }

    fn channel(&self) -> &(channel::Sender<Parked>, channel::Receiver<Parked>) {
        self.channel.get_or_init(channel::unbounded)
    }
}

#[cfg(feature = "pool")]
impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "pool")]
impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("parked", &self.parked())
            .finish()
    }
}

#[cfg(feature = "pool")]
impl Drop for Pool {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(feature = "pool")]
impl Allocator for Pool {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let recv = &self.channel().1;
        while let Ok(parked) = recv.try_recv() {
            if parked.layout == layout {
                return Ok(parked.ptr);
            }

            unsafe { Global.deallocate(parked.ptr, parked.layout) }
        }

        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // the pool owns both ends of the channel, so the send cannot fail while `self` is alive
        let _ = self.channel().0.send(Parked { ptr, layout });
    }
}

/// Disposes of a value owned through a raw pointer.
///
/// Implemented for every `FnOnce(*mut T)`, so a closure can be passed wherever a deleter is
/// expected.
pub trait Deleter<T>
where
    T: ?Sized,
{
    /// Destroys the value behind `ptr` and releases its memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for whatever this deleter does with it, and is not used afterwards.
    unsafe fn delete(self, ptr: *mut T);
}

impl<T, F> Deleter<T> for F
where
    T: ?Sized,
    F: FnOnce(*mut T),
{
    unsafe fn delete(self, ptr: *mut T) {
        self(ptr)
    }
}

/// The deleter matching [`Box::into_raw`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T> Deleter<T> for DefaultDelete
where
    T: ?Sized,
{
    unsafe fn delete(self, ptr: *mut T) {
        drop(Box::from_raw(ptr));
    }
}
