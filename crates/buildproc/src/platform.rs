use crate::{GroupOptions, ManagedProcess, ProcessGroup, Result};
use std::sync::Arc;
use tracing::info;

/// Native process group for the target platform, selected at compile time
#[cfg(unix)]
pub type PlatformProcessGroup = buildproc_unix::UnixProcessGroup;

#[cfg(windows)]
pub type PlatformProcessGroup = buildproc_windows::WindowsProcessGroup;

#[cfg(not(any(unix, windows)))]
pub type PlatformProcessGroup = crate::PortableProcessGroup;

/// Managed process living in the native group
pub type PlatformProcess = ManagedProcess<PlatformProcessGroup>;

/// Create a native process group with default options
pub fn create_process_group() -> Result<Arc<PlatformProcessGroup>> {
    create_process_group_with(GroupOptions::default())
}

pub fn create_process_group_with(options: GroupOptions) -> Result<Arc<PlatformProcessGroup>> {
    info!(platform = platform_name(), "Creating process group");
    Ok(Arc::new(PlatformProcessGroup::create(options)?))
}

pub fn platform_name() -> &'static str {
    PlatformProcessGroup::platform_name()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_name_matches_target() {
        #[cfg(unix)]
        assert_eq!(platform_name(), "unix");

        #[cfg(windows)]
        assert_eq!(platform_name(), "windows");
    }

    #[tokio::test]
    async fn test_create_process_group() {
        let group = create_process_group().unwrap();
        assert!(!group.is_disposed());
        group.dispose();
        assert!(group.is_disposed());
    }
}
