use std::io::{Error, ErrorKind};

pub trait IsMinusOne: Copy {
    fn is_minus_one(self) -> bool;
}

macro_rules! impl_is_minus_one {
    ($($t:ty),*) => ($(impl IsMinusOne for $t {
        fn is_minus_one(self) -> bool {
            self == -1
        }
    })*)
}

impl_is_minus_one! { i32, i64, isize }

/// Turns a raw `-1`-on-failure return value into `errno` as an `io::Error`.
pub fn check_syscall<T: IsMinusOne>(ret: T) -> Result<T, Error> {
    if ret.is_minus_one() {
        Err(Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Same as [`check_syscall`], but re-issues the call while it fails with `EINTR`.
pub fn check_syscall_retry<T, F>(mut f: F) -> Result<T, Error>
where
    T: IsMinusOne,
    F: FnMut() -> T,
{
    loop {
        match check_syscall(f()) {
            Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}
