//! Windows-specific process introspection

use tracing::trace;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::LibraryLoader::GetModuleFileNameW;

use super::{read_growing_buffer, BufferRead, INITIAL_PATH_CAPACITY, MAX_PATH_CAPACITY};
use crate::core::HostResult;

/// Full path of the running executable (`w3wp.exe`, `iisexpress.exe`, ...).
///
/// `GetModuleFileNameW` truncates and returns the buffer length when the
/// path does not fit, so that case doubles the buffer and retries.
pub fn module_file_name() -> HostResult<String> {
    let wide = read_growing_buffer::<u16, _>(INITIAL_PATH_CAPACITY, MAX_PATH_CAPACITY, |buf| {
        let written = unsafe { GetModuleFileNameW(HMODULE::default(), buf) } as usize;
        if written == 0 {
            BufferRead::Failed(std::io::Error::last_os_error())
        } else if written == buf.len() {
            trace!("Module file name buffer of {} too small", buf.len());
            BufferRead::Insufficient
        } else {
            BufferRead::Complete(written)
        }
    })?;

    Ok(String::from_utf16_lossy(&wide))
}
