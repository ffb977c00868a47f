use std::{
    alloc::handle_alloc_error,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::NonNull,
};

use crate::{
    block::{self, DeleterAllocBlock, DeleterBlock, InlineAllocBlock, InlineBlock, PtrBlock, Raw},
    AllocError, Allocator, ConstructError, Deleter, WeakPtr,
};

/// A shared, reference counted pointer.
///
/// Every clone adds one strong reference to the control block of the allocation. The value is
/// destroyed when the last strong reference goes away; the control block itself lives on for as
/// long as [`WeakPtr`]s observe it.
///
/// A `SharedPtr` can be empty. Dereferencing an empty pointer is a contract violation and panics;
/// use [`SharedPtr::get`] when emptiness is expected.
///
/// Reference counts are plain cells, so `SharedPtr` is neither `Send` nor `Sync`.
pub struct SharedPtr<T>
where
    T: ?Sized,
{
    raw: Option<Raw<T>>,
    _owns: PhantomData<T>,
}

impl<T> SharedPtr<T> {
    /// Same as [`make_shared`].
    pub fn new(value: T) -> Self {
        make_shared(value)
    }
}

impl<T> SharedPtr<T>
where
    T: ?Sized,
{
    /// Creates an empty pointer.
    pub const fn null() -> Self {
        SharedPtr {
            raw: None,
            _owns: PhantomData,
        }
    }

    pub(crate) fn from_raw_parts(raw: Raw<T>) -> Self {
        SharedPtr {
            raw: Some(raw),
            _owns: PhantomData,
        }
    }

    /// Takes ownership of a boxed value. The control block is allocated separately; prefer
    /// [`make_shared`] when the value is not boxed yet.
    ///
    /// ```
    /// # use std::fmt::Display;
    /// # use sharedptr::SharedPtr;
    /// let s: SharedPtr<dyn Display> = SharedPtr::from_box(Box::new(5));
    /// assert!(s.to_string() == "5");
    /// ```
    pub fn from_box(value: Box<T>) -> Self {
        Self::from_raw_parts(PtrBlock::create(value))
    }

    /// Takes ownership of a pointer obtained from [`Box::into_raw`]. A null pointer gives an empty
    /// `SharedPtr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from `Box::into_raw`, and must not be owned by anything else.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        match NonNull::new(ptr) {
            Some(ptr) => Self::from_box(Box::from_raw(ptr.as_ptr())),
            None => Self::null(),
        }
    }

    /// Takes ownership of `ptr`, which is disposed of by calling `deleter` once the last strong
    /// reference is gone.
    ///
    /// A null pointer gives an empty `SharedPtr`; the deleter is dropped without being called.
    ///
    /// ```
    /// # use std::{cell::Cell, rc::Rc};
    /// # use sharedptr::SharedPtr;
    /// let deleted = Rc::new(Cell::new(false));
    /// let flag = Rc::clone(&deleted);
    ///
    /// let ptr = Box::into_raw(Box::new(5));
    /// let s = unsafe {
    ///     SharedPtr::from_raw_with_deleter(ptr, move |p: *mut i32| {
    ///         flag.set(true);
    ///         drop(Box::from_raw(p));
    ///     })
    /// };
    ///
    /// drop(s);
    /// assert!(deleted.get());
    /// ```
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads for as long as strong references exist, and `deleter` must be
    /// sound to call with it.
    pub unsafe fn from_raw_with_deleter<D>(ptr: *mut T, deleter: D) -> Self
    where
        D: Deleter<T> + 'static,
    {
        match NonNull::new(ptr) {
            Some(ptr) => Self::from_raw_parts(DeleterBlock::create(ptr, deleter)),
            None => Self::null(),
        }
    }

    /// Like [`SharedPtr::from_raw_with_deleter`], but the control block is obtained from `alloc`
    /// and is returned to it once both reference counts are zero.
    ///
    /// If the block cannot be allocated, `deleter` is called on `ptr` before the error is returned.
    ///
    /// # Safety
    ///
    /// Same as [`SharedPtr::from_raw_with_deleter`].
    pub unsafe fn from_raw_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Result<Self, AllocError>
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(Self::null());
        };

        match DeleterAllocBlock::create(ptr, deleter, alloc) {
            Ok(raw) => Ok(Self::from_raw_parts(raw)),
            Err((err, deleter)) => {
                deleter.delete(ptr.as_ptr());
                Err(err)
            }
        }
    }

    /// Gets a reference to the value, or `None` if the pointer is empty.
    pub fn get(&self) -> Option<&T> {
        self.raw.map(|raw| unsafe { raw.value.as_ref() })
    }

    /// Gets a reference to the value without checking for emptiness.
    ///
    /// # Safety
    ///
    /// The pointer must not be empty.
    pub unsafe fn get_unchecked(&self) -> &T {
        self.raw.unwrap_unchecked().value.as_ref()
    }

    /// Gets a mutable reference to the value if no other strong or weak pointer shares it.
    ///
    /// Always `None` after [`SharedPtr::map`], since the mapped reference need not point into the
    /// owned value.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let raw = self.raw?;
        let header = raw.header();
        if !raw.mapped && header.strong() == 1 && header.weak() == 0 {
            Some(unsafe { &mut *raw.value.as_ptr() })
        } else {
            None
        }
    }

    /// Number of strong pointers sharing the value, `0` for an empty pointer.
    ///
    /// ```
    /// # use sharedptr::{make_shared, SharedPtr};
    /// let s1 = make_shared(5);
    /// assert!(s1.use_count() == 1);
    ///
    /// let s2 = s1.clone();
    /// assert!(s1.use_count() == 2);
    ///
    /// drop(s2);
    /// assert!(s1.use_count() == 1);
    /// assert!(SharedPtr::<i32>::null().use_count() == 0);
    /// ```
    pub fn use_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().strong())
    }

    /// Number of weak pointers observing the value, `0` for an empty pointer.
    pub fn weak_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().weak())
    }

    /// `true` if this is the only strong pointer to the value.
    pub fn unique(&self) -> bool {
        self.use_count() == 1
    }

    /// `true` if the pointer is empty.
    pub fn is_null(&self) -> bool {
        self.raw.is_none()
    }

    /// Gives up this pointer's strong reference and leaves it empty.
    pub fn reset(&mut self) {
        if let Some(raw) = self.raw.take() {
            unsafe { block::release_strong(raw.block) }
        }
    }

    /// Moves the reference out, leaving `self` empty. The counts do not change.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Exchanges the references held by two pointers.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other)
    }

    /// Creates a new weak pointer to the value.
    pub fn downgrade(&self) -> WeakPtr<T> {
        WeakPtr::from(self)
    }

    /// `true` if both pointers share one control block, or if both are empty. The viewed types
    /// may differ.
    pub fn ptr_eq<U>(&self, other: &SharedPtr<U>) -> bool
    where
        U: ?Sized,
    {
        self.block() == other.block()
    }

    /// Converts into a pointer to something reachable from the value: a field, or an unsized view
    /// such as a trait object. The control block and the counts are unchanged, so the result keeps
    /// the whole value alive.
    ///
    /// Combine with `clone` for a converting copy:
    ///
    /// ```
    /// # use std::fmt::Debug;
    /// # use sharedptr::{make_shared, SharedPtr};
    /// let pair = make_shared((1, String::from("one")));
    ///
    /// let name: SharedPtr<String> = pair.clone().map(|p| &p.1);
    /// let dbg: SharedPtr<dyn Debug> = pair.clone().map(|p| p as &(dyn Debug + 'static));
    ///
    /// assert!(*name == "one");
    /// assert!(pair.use_count() == 3);
    /// assert!(name.ptr_eq(&dbg));
    /// ```
    pub fn map<U, F>(mut self, f: F) -> SharedPtr<U>
    where
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let value = match self.get() {
            Some(value) => NonNull::from(f(value)),
            None => return SharedPtr::null(),
        };

        match self.raw.take() {
            Some(raw) => SharedPtr::from_raw_parts(Raw {
                value,
                block: raw.block,
                mapped: true,
            }),
            None => SharedPtr::null(),
        }
    }

    pub(crate) fn raw(&self) -> Option<Raw<T>> {
        self.raw
    }

    fn block(&self) -> Option<NonNull<block::Header>> {
        self.raw.map(|raw| raw.block)
    }
}

impl<T> Drop for SharedPtr<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> Clone for SharedPtr<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        match self.raw {
            Some(raw) => {
                raw.header().inc_strong();
                Self::from_raw_parts(raw)
            }
            None => Self::null(),
        }
    }
}

impl<T> Default for SharedPtr<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Deref for SharedPtr<T>
where
    T: ?Sized,
{
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty SharedPtr"),
        }
    }
}

impl<T> From<Box<T>> for SharedPtr<T>
where
    T: ?Sized,
{
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T> fmt::Debug for SharedPtr<T>
where
    T: ?Sized + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("(null)"),
        }
    }
}

impl<T> PartialEq for SharedPtr<T>
where
    T: ?Sized,
{
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for SharedPtr<T> where T: ?Sized {}

impl<T> Hash for SharedPtr<T>
where
    T: ?Sized,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        Hash::hash(&self.block(), state)
    }
}

/// Creates a `SharedPtr` whose value lives inside its control block: one allocation instead of
/// two. This is the recommended way to create a `SharedPtr`.
///
/// # Examples
///
/// ```
/// # use sharedptr::{make_shared, WeakPtr};
/// let a = make_shared(5);
/// let b = a.clone();
/// assert!(a.use_count() == 2);
///
/// drop(a);
/// assert!(*b == 5);
///
/// let w = WeakPtr::from(&b);
/// drop(b);
/// assert!(w.expired());
/// assert!(w.lock().is_null());
/// ```
pub fn make_shared<T>(value: T) -> SharedPtr<T> {
    make_shared_with(|| value)
}

/// Like [`make_shared`], but the value is produced by `init` after the block has been allocated.
/// If `init` panics, the block is freed before the panic continues.
pub fn make_shared_with<T, F>(init: F) -> SharedPtr<T>
where
    F: FnOnce() -> T,
{
    match try_make_shared_with(|| Ok::<T, std::convert::Infallible>(init())) {
        Ok(s) => s,
        Err(never) => match never {},
    }
}

/// Like [`make_shared_with`] for a fallible initializer. On `Err` the block is freed and the error
/// is returned unchanged.
///
/// ```
/// # use sharedptr::try_make_shared_with;
/// let s = try_make_shared_with(|| "42".parse::<u32>()).unwrap();
/// assert!(*s == 42);
///
/// assert!(try_make_shared_with(|| "x".parse::<u32>()).is_err());
/// ```
pub fn try_make_shared_with<T, E, F>(init: F) -> Result<SharedPtr<T>, E>
where
    F: FnOnce() -> Result<T, E>,
{
    match InlineBlock::emplace(init) {
        Ok(raw) => Ok(SharedPtr::from_raw_parts(raw)),
        Err(ConstructError::Init(err)) => Err(err),
        Err(ConstructError::Alloc(err)) => handle_alloc_error(err.layout()),
    }
}

/// Creates a `SharedPtr` whose value lives inside a control block obtained from `alloc`. The
/// allocator is kept in the block and frees it once both reference counts are zero.
///
/// ```
/// # use sharedptr::{allocate_shared, Global};
/// let s = allocate_shared(Global, String::from("pooled")).unwrap();
/// assert!(*s == "pooled");
/// ```
pub fn allocate_shared<T, A>(alloc: A, value: T) -> Result<SharedPtr<T>, AllocError>
where
    A: Allocator + 'static,
{
    allocate_shared_with(alloc, || value)
}

/// Like [`allocate_shared`], but the value is produced by `init` after the block has been
/// allocated. If `init` panics, the block is returned to `alloc` before the panic continues.
pub fn allocate_shared_with<T, A, F>(alloc: A, init: F) -> Result<SharedPtr<T>, AllocError>
where
    A: Allocator + 'static,
    F: FnOnce() -> T,
{
    match try_allocate_shared_with(alloc, || Ok::<T, std::convert::Infallible>(init())) {
        Ok(s) => Ok(s),
        Err(ConstructError::Alloc(err)) => Err(err),
        Err(ConstructError::Init(never)) => match never {},
    }
}

/// Like [`allocate_shared_with`] for a fallible initializer. Whichever step fails, the block is
/// returned to `alloc` before the error is.
pub fn try_allocate_shared_with<T, E, A, F>(
    alloc: A,
    init: F,
) -> Result<SharedPtr<T>, ConstructError<E>>
where
    A: Allocator + 'static,
    F: FnOnce() -> Result<T, E>,
{
    InlineAllocBlock::emplace(alloc, init).map(SharedPtr::from_raw_parts)
}
