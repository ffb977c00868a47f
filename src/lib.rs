//! Single-threaded shared ownership: a strong [`SharedPtr`] and a non-owning [`WeakPtr`].
//!
//! Both pointer types are close relatives of [`std::rc::Rc`] and [`std::rc::Weak`]. The
//! differences are in how the value and its control block are allocated:
//!
//! - [`make_shared`] and [`allocate_shared`] put the value inside the control block, so a pointer
//!   costs a single allocation. With `allocate_shared` the block comes from a user supplied
//!   [`Allocator`], which is stored in the block and used again to free it.
//! - [`SharedPtr::from_box`] and [`SharedPtr::from_raw_with_deleter`] adopt a value that already
//!   lives somewhere else. The deleter decides how that value is disposed of;
//!   [`SharedPtr::from_raw_in`] additionally takes the control block from an allocator.
//!
//! Whatever the shape, destroying the value and freeing the control block are separate steps. The
//! value goes away with the last `SharedPtr`; the block stays until the last `WeakPtr` is gone, so
//! weak pointers can keep asking whether the value is still alive.
//!
//! ```
//! # use sharedptr::make_shared;
//! let s = make_shared(String::from("a"));
//! let w = s.downgrade();
//! assert!(*w.lock() == "a");
//!
//! drop(s);
//! assert!(w.expired());
//! ```
//!
//! Reference counts are not atomic. Neither pointer is `Send` or `Sync`, and ownership cycles
//! between `SharedPtr`s leak; break them with a `WeakPtr`.

mod alloc;
mod block;
mod error;
mod shared;
mod weak;

pub use crate::alloc::{Allocator, DefaultDelete, Deleter, Global};
#[cfg(feature = "pool")]
pub use crate::alloc::Pool;
pub use crate::error::{AllocError, ConstructError};
pub use crate::shared::{
    allocate_shared, allocate_shared_with, make_shared, make_shared_with, try_allocate_shared_with,
    try_make_shared_with, SharedPtr,
};
pub use crate::weak::WeakPtr;
