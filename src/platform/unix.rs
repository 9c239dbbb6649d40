//! Unix-specific process introspection

use crate::core::HostResult;

#[cfg(target_os = "linux")]
use super::{read_growing_buffer, BufferRead, INITIAL_PATH_CAPACITY, MAX_PATH_CAPACITY};

/// Full path of the running executable, read from `/proc/self/exe`.
///
/// `readlink` truncates silently, so a result that fills the whole buffer is
/// treated as insufficient and retried with a larger one.
#[cfg(target_os = "linux")]
pub fn executable_path() -> HostResult<String> {
    let link = b"/proc/self/exe\0";

    let bytes = read_growing_buffer::<u8, _>(INITIAL_PATH_CAPACITY, MAX_PATH_CAPACITY, |buf| {
        let written = unsafe {
            libc::readlink(
                link.as_ptr() as *const libc::c_char,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
            )
        };
        if written < 0 {
            BufferRead::Failed(std::io::Error::last_os_error())
        } else if written as usize >= buf.len() {
            BufferRead::Insufficient
        } else {
            BufferRead::Complete(written as usize)
        }
    })?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(not(target_os = "linux"))]
pub fn executable_path() -> HostResult<String> {
    let path = std::env::current_exe()?;
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executable_path_matches_std() {
        let ours = executable_path().unwrap();
        let std_path = std::env::current_exe().unwrap();
        assert_eq!(
            std::fs::canonicalize(ours).unwrap(),
            std::fs::canonicalize(std_path).unwrap()
        );
    }
}
