use std::os::unix::io::RawFd;

use libc::c_void;

pub(crate) fn read_into_buffer(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut c_void, buffer.len()) }
}
