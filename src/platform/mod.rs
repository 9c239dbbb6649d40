//! Platform-specific implementations for Windows and Unix

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub mod unix;

use crate::core::{HostError, HostResult};

/// File name of the native request handler
#[cfg(windows)]
pub const REQUEST_HANDLER_NAME: &str = "aspnetcorerh.dll";
#[cfg(target_os = "macos")]
pub const REQUEST_HANDLER_NAME: &str = "libaspnetcorerh.dylib";
#[cfg(not(any(windows, target_os = "macos")))]
pub const REQUEST_HANDLER_NAME: &str = "libaspnetcorerh.so";

/// File name of the hosting runtime library
#[cfg(windows)]
pub const HOSTFXR_NAME: &str = "hostfxr.dll";
#[cfg(target_os = "macos")]
pub const HOSTFXR_NAME: &str = "libhostfxr.dylib";
#[cfg(not(any(windows, target_os = "macos")))]
pub const HOSTFXR_NAME: &str = "libhostfxr.so";

/// Initial capacity of executable path reads, in characters
pub const INITIAL_PATH_CAPACITY: usize = 260;

/// Largest path the growing read loop will attempt
pub const MAX_PATH_CAPACITY: usize = 32_768;

/// Character type of the hosting runtime's native interface
#[cfg(windows)]
pub type PalChar = u16;
#[cfg(not(windows))]
pub type PalChar = std::os::raw::c_char;

/// Encode a string as a NUL-terminated runtime string
pub fn to_pal_string(s: &str) -> Vec<PalChar> {
    #[cfg(windows)]
    {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }
    #[cfg(not(windows))]
    {
        s.bytes()
            .map(|b| b as PalChar)
            .chain(std::iter::once(0))
            .collect()
    }
}

/// Decode a runtime string up to its first NUL (or the end of the buffer)
pub fn from_pal_buffer(buffer: &[PalChar]) -> String {
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    #[cfg(windows)]
    {
        String::from_utf16_lossy(&buffer[..len])
    }
    #[cfg(not(windows))]
    {
        let bytes: Vec<u8> = buffer[..len].iter().map(|&c| c as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Outcome of one attempt to read into a caller-sized buffer
#[derive(Debug)]
pub enum BufferRead {
    /// The value fit; holds the number of elements written
    Complete(usize),
    /// The buffer was too small and the value was truncated
    Insufficient,
    /// The read failed for another reason
    Failed(std::io::Error),
}

/// Run `read` with a buffer that doubles after every insufficient attempt.
///
/// Gives up with `BufferLimit` once the buffer would exceed `limit`.
pub fn read_growing_buffer<T, F>(initial: usize, limit: usize, mut read: F) -> HostResult<Vec<T>>
where
    T: Copy + Default,
    F: FnMut(&mut [T]) -> BufferRead,
{
    let mut size = initial.max(1);
    let mut buffer: Vec<T> = Vec::new();

    loop {
        if size > limit {
            return Err(HostError::BufferLimit { limit });
        }
        buffer.clear();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| HostError::OutOfMemory)?;
        buffer.resize(size, T::default());

        match read(&mut buffer) {
            BufferRead::Complete(written) => {
                buffer.truncate(written.min(size));
                return Ok(buffer);
            }
            BufferRead::Insufficient => size *= 2,
            BufferRead::Failed(e) => return Err(HostError::Io(e)),
        }
    }
}

/// Full path of the running executable
pub fn current_executable_path() -> HostResult<String> {
    #[cfg(windows)]
    {
        windows::module_file_name()
    }
    #[cfg(unix)]
    {
        unix::executable_path()
    }
    #[cfg(not(any(windows, unix)))]
    {
        let path = std::env::current_exe()?;
        Ok(path.to_string_lossy().into_owned())
    }
}
