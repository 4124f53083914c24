//! Common memory reclaimers.
//!
//! Functions in this module can be passed to [`retire`](crate::hazard::Domain::retire)
//! to free allocated memory or run drop glue once no hazard slot guards it.

use std::ptr;

/// Reclaims memory allocated with [`Box`].
///
/// This function calls [`Box::from_raw`] on the retired pointer.
///
/// # Safety
///
/// Ensure that the correct type annotations are used when
/// passing this function to [`retire`](crate::hazard::Domain::retire):
/// the pointer passed must have been created from a **valid** `Box<T>`.
pub unsafe fn boxed<T>(ptr: *mut ()) {
    unsafe {
        let _ = Box::from_raw(ptr.cast::<T>());
    }
}

/// Reclaims memory by dropping the value in place.
///
/// This function calls [`ptr::drop_in_place`] on the retired pointer.
///
/// # Safety
///
/// Ensure that the correct type annotations are used when
/// passing this function to [`retire`](crate::hazard::Domain::retire):
/// the pointer passed must point to a **valid** `T`.
pub unsafe fn in_place<T>(ptr: *mut ()) {
    unsafe {
        ptr::drop_in_place(ptr.cast::<T>());
    }
}
