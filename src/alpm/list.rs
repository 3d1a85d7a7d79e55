// src/alpm/list.rs

//! Native list adapter
//!
//! Decodes an `alpm_list_t` chain into an owned sequence of element
//! pointers. The walk happens eagerly so the result survives any later
//! native call that rewrites the list.

use super::ffi::{alpm_list_t, string_from};
use libc::c_char;
use std::ptr::NonNull;

/// Collect the data pointers of a native list, in order
///
/// Nodes whose data pointer is null are skipped; traversal continues past
/// them. A null head yields an empty sequence.
///
/// # Safety
/// `head` must be null or the first node of a well-formed list whose nodes
/// stay valid for the duration of the call.
pub unsafe fn collect<T>(head: *const alpm_list_t) -> std::vec::IntoIter<NonNull<T>> {
    let mut items = Vec::new();
    let mut node = head;
    while !node.is_null() {
        // SAFETY: node is non-null and part of a valid list per the caller.
        let current = unsafe { &*node };
        if let Some(data) = NonNull::new(current.data.cast::<T>()) {
            items.push(data);
        }
        node = current.next;
    }
    items.into_iter()
}

/// Collect a list of C strings, skipping null entries
///
/// # Safety
/// Same as [`collect`]; every non-null element must be a NUL-terminated
/// string.
pub unsafe fn collect_strings(head: *const alpm_list_t) -> Vec<String> {
    // SAFETY: forwarded from the caller.
    unsafe { collect::<c_char>(head) }
        .filter_map(|ptr| unsafe { string_from(ptr.as_ptr()) })
        .collect()
}

/// Number of nodes with non-null data
///
/// # Safety
/// Same as [`collect`].
pub unsafe fn count(head: *const alpm_list_t) -> usize {
    // SAFETY: forwarded from the caller.
    unsafe { collect::<libc::c_void>(head) }.len()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::ffi::c_void;
    use std::ptr;

    /// Owns the nodes of a hand-built native list
    pub(crate) struct TestList {
        nodes: Vec<Box<alpm_list_t>>,
    }

    impl TestList {
        pub(crate) fn new(data: &[*mut c_void]) -> Self {
            let mut nodes: Vec<Box<alpm_list_t>> = data
                .iter()
                .map(|d| {
                    Box::new(alpm_list_t {
                        data: *d,
                        prev: ptr::null_mut(),
                        next: ptr::null_mut(),
                    })
                })
                .collect();
            for i in 1..nodes.len() {
                let prev: *mut alpm_list_t = &mut *nodes[i - 1];
                let next: *mut alpm_list_t = &mut *nodes[i];
                nodes[i].prev = prev;
                nodes[i - 1].next = next;
            }
            Self { nodes }
        }

        pub(crate) fn head(&mut self) -> *mut alpm_list_t {
            self.nodes
                .first_mut()
                .map_or(ptr::null_mut(), |node| &mut **node as *mut alpm_list_t)
        }
    }

    #[test]
    fn test_null_data_is_skipped() {
        let mut a = 1u32;
        let mut c = 3u32;
        let mut list = TestList::new(&[
            (&mut a as *mut u32).cast(),
            ptr::null_mut(),
            (&mut c as *mut u32).cast(),
        ]);

        let values: Vec<u32> = unsafe { collect::<u32>(list.head()) }
            .map(|p| unsafe { *p.as_ptr() })
            .collect();
        assert_eq!(values, vec![1, 3]);
    }

    #[test]
    fn test_null_head_is_empty() {
        assert_eq!(unsafe { collect::<u32>(ptr::null()) }.len(), 0);
        assert_eq!(unsafe { count(ptr::null()) }, 0);
    }

    #[test]
    fn test_strings() {
        let first = c"https://a.example/core";
        let second = c"https://b.example/core";
        let mut list = TestList::new(&[
            first.as_ptr() as *mut c_void,
            ptr::null_mut(),
            second.as_ptr() as *mut c_void,
        ]);
        assert_eq!(
            unsafe { collect_strings(list.head()) },
            vec!["https://a.example/core", "https://b.example/core"]
        );
    }
}
