//! Thin wrappers over the libc calls the providers need.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Number of bytes queued for reading on `fd` (`FIONREAD`).
pub(crate) fn bytes_available(fd: RawFd) -> io::Result<usize> {
    let mut count: libc::c_int = 0;

    // SAFETY: `count` is a valid writable c_int and `fd` is an open descriptor
    // owned by the caller for the duration of the call.
    let rc = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut count as *mut libc::c_int) };

    if rc == 0 {
        Ok(count.max(0) as usize)
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Put a tty into raw 8N1 mode at `baud_rate` with a poll-style read timeout.
///
/// `VMIN = 0` and `VTIME` set means a read returns as soon as any byte is
/// available, or with zero bytes once the timeout elapses.
pub(crate) fn configure_raw_tty(fd: RawFd, baud_rate: u32, read_timeout: Duration) -> io::Result<()> {
    let speed = baud_constant(baud_rate)?;

    // SAFETY: termios is a plain C struct; an all-zero value is a valid
    // starting point that tcgetattr overwrites.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` is an open tty descriptor and `tio` is valid for writes.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `tio` was initialized by tcgetattr above.
    unsafe { libc::cfmakeraw(&mut tio) };
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cflag &= !(libc::CSTOPB | libc::PARENB | libc::CRTSCTS);
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = vtime_deciseconds(read_timeout);

    // SAFETY: `tio` is a valid termios and `speed` a valid speed constant.
    let rc = unsafe { libc::cfsetispeed(&mut tio, speed) | libc::cfsetospeed(&mut tio, speed) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `fd` is an open tty descriptor and `tio` is fully initialized.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `fd` is an open tty descriptor.
    if unsafe { libc::tcflush(fd, libc::TCIOFLUSH) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

fn vtime_deciseconds(timeout: Duration) -> libc::cc_t {
    let tenths = timeout.as_millis().div_ceil(100);
    tenths.clamp(1, u8::MAX as u128) as libc::cc_t
}

fn baud_constant(baud_rate: u32) -> io::Result<libc::speed_t> {
    let speed = match baud_rate {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460_800 => libc::B460800,
        #[cfg(target_os = "linux")]
        921_600 => libc::B921600,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate {other}"),
            ))
        }
    };
    Ok(speed)
}
