use std::fmt::{self, Debug, Formatter};
use std::io::Error;
use std::ptr;

use libc::c_void;

use crate::util;

/// Size of the stack the trampoline runs on until the payload's image replaces it.
pub const CHILD_STACK_SIZE: usize = 8 * 1024;

const STACK_ALIGN: usize = 16;

/// Memory handed to `clone()` as the child's stack: a private anonymous mapping whose lowest
/// page is `PROT_NONE`, so running off the end faults instead of scribbling over the heap.
/// The mapping never moves and is unmapped on drop.
pub struct ChildStack {
    mapping: *mut c_void,
    guard_len: usize,
    len: usize,
}

// The mapping is owned exclusively by this value.
unsafe impl Send for ChildStack {}

impl ChildStack {
    pub fn new() -> Result<Self, Error> {
        let page = page_size();
        let guard_len = page;
        let len = (CHILD_STACK_SIZE + page - 1) / page * page;

        let mapping = unsafe {
            libc::mmap(
                ptr::null_mut(),
                guard_len + len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                -1,
                0,
            )
        };
        if mapping == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }

        let stack = ChildStack {
            mapping,
            guard_len,
            len,
        };
        util::check_syscall(unsafe { libc::mprotect(mapping, guard_len, libc::PROT_NONE) })?;
        Ok(stack)
    }

    /// Usable bytes above the guard page.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Stacks grow down on every architecture we target, so `clone()` wants the highest address,
    /// rounded down to the ABI alignment.
    pub fn top(&mut self) -> *mut c_void {
        let end = self.mapping as usize + self.guard_len + self.len;
        (end & !(STACK_ALIGN - 1)) as *mut c_void
    }

    fn bottom(&self) -> usize {
        self.mapping as usize + self.guard_len
    }
}

impl Drop for ChildStack {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.mapping, self.guard_len + self.len) };
    }
}

impl Debug for ChildStack {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        fmt.debug_struct("ChildStack")
            .field("base", &(self.bottom() as *const c_void))
            .field("len", &self.len)
            .finish()
    }
}

fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}
