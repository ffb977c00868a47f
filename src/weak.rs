use std::fmt;

use crate::{
    block::{self, Raw},
    SharedPtr,
};

/// A non-owning observer of a value managed by [`SharedPtr`].
///
/// A weak pointer keeps the control block alive but not the value. It never gives access to the
/// value directly: it has to be [`lock`][WeakPtr::lock]ed into a `SharedPtr` first, which fails
/// (returns an empty `SharedPtr`) once the value has been destroyed.
///
/// An empty `WeakPtr`, as created by [`WeakPtr::new`], observes nothing and counts as expired.
pub struct WeakPtr<T>
where
    T: ?Sized,
{
    raw: Option<Raw<T>>,
}

impl<T> WeakPtr<T>
where
    T: ?Sized,
{
    /// Creates an empty weak pointer.
    pub const fn new() -> Self {
        WeakPtr { raw: None }
    }

    /// Creates a strong pointer to the value, or an empty one if the value is gone.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sharedptr::make_shared;
    /// let s = make_shared(5);
    /// let w = s.downgrade();
    ///
    /// assert!(*w.lock() == 5);
    /// assert!(s.use_count() == 1);
    ///
    /// drop(s);
    /// assert!(w.lock().is_null());
    /// ```
    pub fn lock(&self) -> SharedPtr<T> {
        match self.raw {
            Some(raw) if raw.header().strong() > 0 => {
                raw.header().inc_strong();
                SharedPtr::from_raw_parts(raw)
            }
            _ => SharedPtr::null(),
        }
    }

    /// `true` once no strong pointer to the value is left. Always `true` for an empty weak pointer.
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Number of strong pointers to the observed value.
    pub fn use_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().strong())
    }

    /// Number of weak pointers observing the value, including `self`. `0` for an empty weak pointer.
    pub fn weak_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().weak())
    }

    /// Gives up this pointer's weak reference and leaves it empty.
    pub fn reset(&mut self) {
        if let Some(raw) = self.raw.take() {
            unsafe { block::release_weak(raw.block) }
        }
    }

    /// Moves the weak reference out, leaving `self` empty.
    pub fn take(&mut self) -> Self {
        WeakPtr {
            raw: self.raw.take(),
        }
    }

    /// `true` if both weak pointers observe the same control block, or if both are empty.
    pub fn ptr_eq<U>(&self, other: &WeakPtr<U>) -> bool
    where
        U: ?Sized,
    {
        self.raw.map(|raw| raw.block) == other.raw.map(|raw| raw.block)
    }
}

impl<T> Drop for WeakPtr<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> Clone for WeakPtr<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            raw.header().inc_weak();
        }

        WeakPtr { raw: self.raw }
    }
}

impl<T> Default for WeakPtr<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<&SharedPtr<T>> for WeakPtr<T>
where
    T: ?Sized,
{
    fn from(value: &SharedPtr<T>) -> Self {
        let raw = value.raw();
        if let Some(raw) = raw {
            raw.header().inc_weak();
        }

        WeakPtr { raw }
    }
}

impl<T> fmt::Debug for WeakPtr<T>
where
    T: ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw {
            Some(raw) if !self.expired() => f.debug_tuple("WeakPtr").field(&raw).finish(),
            _ => f.write_str("(expired)"),
        }
    }
}
