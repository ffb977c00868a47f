//! Control blocks.
//!
//! Every allocation managed by a [`SharedPtr`][crate::SharedPtr] has exactly one control block.
//! All five block shapes start with the same [`Header`], so handles can hold a thin
//! `NonNull<Header>` without knowing which shape is behind it. The header carries a `Release`
//! table with the two operations a block has to provide:
//!
//! - `value` destroys the owned value. It runs once, when the strong count drops to zero.
//! - `storage` frees the block itself. It runs once, when both counts are zero.
//!
//! The set of shapes is closed. Nothing in here is reachable from outside the crate.

use std::{
    alloc::Layout,
    cell::{Cell, UnsafeCell},
    fmt,
    mem::{self, ManuallyDrop, MaybeUninit},
    ptr::{self, NonNull},
};

use crate::{AllocError, Allocator, ConstructError, Deleter, Global};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockKind {
    OwningPointer,
    PointerWithDeleter,
    EmbeddedValue,
    PointerWithDeleterAndAllocator,
    EmbeddedValueWithAllocator,
}

pub(crate) struct Release {
    value: unsafe fn(NonNull<Header>),
    storage: unsafe fn(NonNull<Header>),
}

#[repr(C)]
pub(crate) struct Header {
    strong: Cell<usize>,
    weak: Cell<usize>,
    kind: BlockKind,
    release: &'static Release,
}

impl Header {
    fn new(kind: BlockKind, release: &'static Release) -> Self {
        Header {
            strong: Cell::new(1),
            weak: Cell::new(0),
            kind,
            release,
        }
    }

    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    pub(crate) fn weak(&self) -> usize {
        self.weak.get()
    }

    pub(crate) fn inc_strong(&self) {
        self.strong.set(increment(self.strong.get()));
    }

    pub(crate) fn inc_weak(&self) {
        self.weak.set(increment(self.weak.get()));
    }
}

fn increment(n: usize) -> usize {
    let n = n.wrapping_add(1);
    if n == 0 {
        // same policy as `Rc`: a wrapped count would free a live value
        std::process::abort();
    }
    n
}

/// Gives up one strong reference. Destroys the value when it was the last one, and frees the block
/// too when no weak reference is left.
///
/// # Safety
///
/// `block` is live and the caller owned one strong reference, which it must not use again.
pub(crate) unsafe fn release_strong(block: NonNull<Header>) {
    let header = block.as_ref();
    let n = header.strong.get();
    debug_assert!(n > 0);
    header.strong.set(n - 1);
    if n != 1 {
        return;
    }

    // Pin the block while the value is torn down. The value may own weak handles to its own block.
    header.inc_weak();
    let release = header.release;
    log::trace!("{:?} block {:p}: releasing value", header.kind, block);
    (release.value)(block);
    release_weak(block);
}

/// Gives up one weak reference. Frees the block when it was the last reference of either kind.
///
/// # Safety
///
/// `block` is live and the caller owned one weak reference, which it must not use again.
pub(crate) unsafe fn release_weak(block: NonNull<Header>) {
    let header = block.as_ref();
    let n = header.weak.get();
    debug_assert!(n > 0);
    header.weak.set(n - 1);
    if n != 1 || header.strong.get() != 0 {
        return;
    }

    let release = header.release;
    log::trace!("{:?} block {:p}: releasing storage", header.kind, block);
    (release.storage)(block);
}

/// A value pointer together with the block that owns the value.
///
/// This is what a non-empty handle stores. The value pointer may be a projection of the owned
/// value (a field, or an unsized view of it); the block is what decides lifetime.
pub(crate) struct Raw<T>
where
    T: ?Sized,
{
    pub(crate) value: NonNull<T>,
    pub(crate) block: NonNull<Header>,
    /// Set once the value pointer was re-pointed by `SharedPtr::map`. It may then point outside
    /// the owned value, so it is never handed out mutably.
    pub(crate) mapped: bool,
}

impl<T> Raw<T>
where
    T: ?Sized,
{
    /// The caller holds a counted reference (strong or weak) on the block, so the header is live.
    pub(crate) fn header(&self) -> &Header {
        unsafe { self.block.as_ref() }
    }
}

impl<T> Clone for Raw<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Raw<T> where T: ?Sized {}

impl<T> fmt::Debug for Raw<T>
where
    T: ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.header();
        f.debug_struct("Block")
            .field("kind", &header.kind)
            .field("strong", &header.strong())
            .field("weak", &header.weak())
            .finish()
    }
}

fn created(header: NonNull<Header>) {
    log::trace!(
        "{:?} block {:p}: created",
        unsafe { header.as_ref() }.kind,
        header
    );
}

/// Raw memory for one `B`, handed back to its allocator unless [`Reserved::claim`]ed.
///
/// Keeps a failed or panicking value initializer from leaking the block.
struct Reserved<'a, B, A>
where
    A: Allocator,
{
    ptr: NonNull<B>,
    alloc: &'a A,
}

impl<'a, B, A> Reserved<'a, B, A>
where
    A: Allocator,
{
    fn new(alloc: &'a A) -> Result<Self, AllocError> {
        let ptr = alloc.allocate(Layout::new::<B>())?.cast();
        Ok(Reserved { ptr, alloc })
    }

    fn claim(self) -> NonNull<B> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }
}

impl<B, A> Drop for Reserved<'_, B, A>
where
    A: Allocator,
{
    fn drop(&mut self) {
        log::debug!("returning unused block storage {:p}", self.ptr);
        unsafe { self.alloc.deallocate(self.ptr.cast(), Layout::new::<B>()) }
    }
}

/// A value that came out of a `Box`.
#[repr(C)]
pub(crate) struct PtrBlock<T>
where
    T: ?Sized,
{
    header: Header,
    ptr: NonNull<T>,
}

impl<T> PtrBlock<T>
where
    T: ?Sized,
{
    const RELEASE: &'static Release = &Release {
        value: Self::release_value,
        storage: Self::release_storage,
    };

    pub(crate) fn create(value: Box<T>) -> Raw<T> {
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(value)) };
        let block = Box::new(PtrBlock {
            header: Header::new(BlockKind::OwningPointer, Self::RELEASE),
            ptr,
        });
        let block = NonNull::from(Box::leak(block)).cast();
        created(block);

        Raw {
            value: ptr,
            block,
            mapped: false,
        }
    }

    unsafe fn release_value(block: NonNull<Header>) {
        let block = block.cast::<Self>().as_ptr();
        drop(Box::from_raw((*block).ptr.as_ptr()));
    }

    unsafe fn release_storage(block: NonNull<Header>) {
        drop(Box::from_raw(block.cast::<Self>().as_ptr()));
    }
}

/// A raw pointer and the deleter that disposes of it.
#[repr(C)]
pub(crate) struct DeleterBlock<T, D>
where
    T: ?Sized,
{
    header: Header,
    ptr: NonNull<T>,
    deleter: ManuallyDrop<D>,
}

impl<T, D> DeleterBlock<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
{
    const RELEASE: &'static Release = &Release {
        value: Self::release_value,
        storage: Self::release_storage,
    };

    pub(crate) fn create(ptr: NonNull<T>, deleter: D) -> Raw<T> {
        let block = Box::new(DeleterBlock {
            header: Header::new(BlockKind::PointerWithDeleter, Self::RELEASE),
            ptr,
            deleter: ManuallyDrop::new(deleter),
        });
        let block = NonNull::from(Box::leak(block)).cast();
        created(block);

        Raw {
            value: ptr,
            block,
            mapped: false,
        }
    }

    unsafe fn release_value(block: NonNull<Header>) {
        let block = block.cast::<Self>().as_ptr();
        let deleter = ManuallyDrop::into_inner(ptr::read(ptr::addr_of!((*block).deleter)));
        deleter.delete((*block).ptr.as_ptr());
    }

    unsafe fn release_storage(block: NonNull<Header>) {
        // the deleter was moved out by `release_value`, and `ManuallyDrop` keeps it from dropping twice
        drop(Box::from_raw(block.cast::<Self>().as_ptr()));
    }
}

/// A raw pointer and its deleter, in a block obtained from `A`.
#[repr(C)]
pub(crate) struct DeleterAllocBlock<T, D, A>
where
    T: ?Sized,
{
    header: Header,
    ptr: NonNull<T>,
    deleter: ManuallyDrop<D>,
    alloc: ManuallyDrop<A>,
}

impl<T, D, A> DeleterAllocBlock<T, D, A>
where
    T: ?Sized,
    D: Deleter<T>,
    A: Allocator,
{
    const RELEASE: &'static Release = &Release {
        value: Self::release_value,
        storage: Self::release_storage,
    };

    /// Hands the deleter back if the block cannot be allocated.
    pub(crate) fn create(ptr: NonNull<T>, deleter: D, alloc: A) -> Result<Raw<T>, (AllocError, D)> {
        let reserved = match Reserved::<Self, A>::new(&alloc) {
            Ok(reserved) => reserved,
            Err(err) => return Err((err, deleter)),
        };
        let block = reserved.claim();
        unsafe {
            block.as_ptr().write(DeleterAllocBlock {
                header: Header::new(BlockKind::PointerWithDeleterAndAllocator, Self::RELEASE),
                ptr,
                deleter: ManuallyDrop::new(deleter),
                alloc: ManuallyDrop::new(alloc),
            });
        }
        let block = block.cast();
        created(block);

        Ok(Raw {
            value: ptr,
            block,
            mapped: false,
        })
    }

    unsafe fn release_value(block: NonNull<Header>) {
        let block = block.cast::<Self>().as_ptr();
        let deleter = ManuallyDrop::into_inner(ptr::read(ptr::addr_of!((*block).deleter)));
        deleter.delete((*block).ptr.as_ptr());
    }

    unsafe fn release_storage(block: NonNull<Header>) {
        let block = block.cast::<Self>();
        let alloc = ManuallyDrop::into_inner(ptr::read(ptr::addr_of!((*block.as_ptr()).alloc)));
        alloc.deallocate(block.cast(), Layout::new::<Self>());
    }
}

/// A value stored inside the block itself.
#[repr(C)]
pub(crate) struct InlineBlock<T> {
    header: Header,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> InlineBlock<T> {
    const RELEASE: &'static Release = &Release {
        value: Self::release_value,
        storage: Self::release_storage,
    };

    pub(crate) fn emplace<E>(
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<Raw<T>, ConstructError<E>> {
        let reserved = Reserved::<Self, Global>::new(&Global)?;
        let block = reserved.ptr.as_ptr();
        unsafe {
            ptr::addr_of_mut!((*block).header)
                .write(Header::new(BlockKind::EmbeddedValue, Self::RELEASE));
        }
        let value = unsafe { value_slot(ptr::addr_of!((*block).value)) };
        let initial = init().map_err(ConstructError::Init)?;
        unsafe { value.as_ptr().write(initial) };
        let block = reserved.claim().cast();
        created(block);

        Ok(Raw {
            value,
            block,
            mapped: false,
        })
    }

    unsafe fn release_value(block: NonNull<Header>) {
        let block = block.cast::<Self>().as_ptr();
        ptr::drop_in_place(value_slot(ptr::addr_of!((*block).value)).as_ptr());
    }

    unsafe fn release_storage(block: NonNull<Header>) {
        Global.deallocate(block.cast(), Layout::new::<Self>());
    }
}

/// A value stored inside a block obtained from `A`.
#[repr(C)]
pub(crate) struct InlineAllocBlock<T, A> {
    header: Header,
    value: UnsafeCell<MaybeUninit<T>>,
    alloc: ManuallyDrop<A>,
}

impl<T, A> InlineAllocBlock<T, A>
where
    A: Allocator,
{
    const RELEASE: &'static Release = &Release {
        value: Self::release_value,
        storage: Self::release_storage,
    };

    pub(crate) fn emplace<E>(
        alloc: A,
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<Raw<T>, ConstructError<E>> {
        let reserved = Reserved::<Self, A>::new(&alloc)?;
        let block = reserved.ptr.as_ptr();
        unsafe {
            ptr::addr_of_mut!((*block).header)
                .write(Header::new(BlockKind::EmbeddedValueWithAllocator, Self::RELEASE));
        }
        let value = unsafe { value_slot(ptr::addr_of!((*block).value)) };
        let initial = init().map_err(ConstructError::Init)?;
        unsafe { value.as_ptr().write(initial) };
        let block = reserved.claim();
        unsafe { ptr::addr_of_mut!((*block.as_ptr()).alloc).write(ManuallyDrop::new(alloc)) };
        let block = block.cast();
        created(block);

        Ok(Raw {
            value,
            block,
            mapped: false,
        })
    }

    unsafe fn release_value(block: NonNull<Header>) {
        let block = block.cast::<Self>().as_ptr();
        ptr::drop_in_place(value_slot(ptr::addr_of!((*block).value)).as_ptr());
    }

    unsafe fn release_storage(block: NonNull<Header>) {
        let block = block.cast::<Self>();
        let alloc = ManuallyDrop::into_inner(ptr::read(ptr::addr_of!((*block.as_ptr()).alloc)));
        alloc.deallocate(block.cast(), Layout::new::<Self>());
    }
}

unsafe fn value_slot<T>(cell: *const UnsafeCell<MaybeUninit<T>>) -> NonNull<T> {
    NonNull::new_unchecked(UnsafeCell::raw_get(cell).cast::<T>())
}
