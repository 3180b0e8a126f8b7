#[cfg(target_os = "linux")]
pub mod linux;

/// Check if the process is running with elevated privileges
pub fn is_elevated() -> bool {
    #[cfg(target_os = "linux")]
    {
        linux::is_root()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Get instructions for elevating privileges on the current platform
pub fn get_elevation_instructions() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "Run with sudo: 'sudo hpcdiag'"
    }
    #[cfg(not(target_os = "linux"))]
    {
        "hpcdiag only supports Linux hosts"
    }
}
