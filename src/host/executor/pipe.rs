//! Anonymous OS pipes with RAII ownership of both ends.

use crate::common::error::Result;
use std::fs::File;
use std::os::unix::io::{AsRawFd, FromRawFd};

/// One anonymous pipe. Each end is an owned [`File`], so dropping an end
/// closes it; the executor's close discipline (parent copies must be gone
/// the moment both children hold theirs) falls out of scoping.
///
/// [`File`]: https://doc.rust-lang.org/std/fs/struct.File.html
#[derive(Debug)]
pub struct Pipe {
    pub read: File,
    pub write: File,
}

/// Creates an anonymous pipe. Both ends are marked close-on-exec so stages
/// only ever inherit the single end that is deliberately wired into their
/// stdio; the dup2 performed at spawn clears the flag on that end.
pub fn pipe() -> Result<Pipe> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let pipe = unsafe {
        Pipe {
            read: File::from_raw_fd(fds[0]),
            write: File::from_raw_fd(fds[1]),
        }
    };
    set_cloexec(&pipe.read)?;
    set_cloexec(&pipe.write)?;
    Ok(pipe)
}

fn set_cloexec(file: &File) -> Result<()> {
    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}
