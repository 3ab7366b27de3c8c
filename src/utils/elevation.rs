// Privilege checks for raw device access
//
// Reading \\.\PhysicalDriveN or a volume handle requires an elevated token on
// Windows and root (or disk group membership) on Linux.

#[cfg(windows)]
use windows_sys::Win32::{
    Foundation::{BOOL, CloseHandle, FALSE, HANDLE},
    Security::{
        CheckTokenMembership, CreateWellKnownSid, GetTokenInformation, TOKEN_ELEVATION,
        TOKEN_QUERY, TokenElevation, WinBuiltinAdministratorsSid,
    },
    System::Threading::{GetCurrentProcess, OpenProcessToken},
};

/// Check if the current process is running with administrator privileges
#[cfg(windows)]
pub fn is_elevated() -> bool {
    unsafe {
        let mut token: HANDLE = 0;
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == FALSE {
            return false;
        }

        let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
        let mut return_length = 0u32;
        let result = GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut _ as *mut _,
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        );
        CloseHandle(token);

        result != FALSE && elevation.TokenIsElevated != 0
    }
}

/// Check if the current user is a member of the Administrators group
#[cfg(windows)]
pub fn is_admin_user() -> bool {
    unsafe {
        let mut sid_size = 0u32;
        CreateWellKnownSid(
            WinBuiltinAdministratorsSid,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut sid_size,
        );

        let mut sid_buffer = vec![0u8; sid_size as usize];
        let admin_sid = sid_buffer.as_mut_ptr() as *mut _;
        if CreateWellKnownSid(
            WinBuiltinAdministratorsSid,
            std::ptr::null_mut(),
            admin_sid,
            &mut sid_size,
        ) == FALSE
        {
            return false;
        }

        let mut is_member: BOOL = FALSE;
        CheckTokenMembership(0, admin_sid, &mut is_member) != FALSE && is_member != FALSE
    }
}

#[cfg(target_os = "linux")]
pub fn is_elevated() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// One line describing the privileges the process runs with
pub fn elevation_status() -> String {
    #[cfg(windows)]
    {
        match (is_elevated(), is_admin_user()) {
            (true, _) => "Running with administrator privileges".to_string(),
            (false, true) => {
                "Not elevated. Use 'Run as administrator' to read raw devices.".to_string()
            }
            (false, false) => {
                "User is not an administrator. Raw device reads will be denied.".to_string()
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        if is_elevated() {
            "Running as root".to_string()
        } else {
            "Not running as root. Reading block devices may require sudo.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_status() {
        let status = elevation_status();
        assert!(!status.is_empty());
        if is_elevated() {
            assert!(status.starts_with("Running"));
        }
    }

    #[test]
    #[cfg(windows)]
    fn test_elevated_implies_admin() {
        if is_elevated() {
            assert!(is_admin_user());
        }
    }
}
