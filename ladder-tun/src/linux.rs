//! Linux-specific TUN helpers

use std::ffi::CString;

use crate::error::{Error, Result};

/// Check if the TUN kernel module is loaded
pub fn is_tun_available() -> bool {
    std::path::Path::new("/dev/net/tun").exists()
}

/// Load the TUN kernel module if `/dev/net/tun` is missing
pub fn load_tun_module() -> Result<()> {
    use std::process::Command;

    if is_tun_available() {
        return Ok(());
    }

    let output = Command::new("modprobe")
        .arg("tun")
        .output()
        .map_err(|e| Error::DeviceCreation(format!("failed to load tun module: {}", e)))?;

    if !output.status.success() {
        return Err(Error::DeviceCreation(format!(
            "modprobe tun failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(())
}

/// Whether an interface with this name already exists
pub fn interface_exists(name: &str) -> Result<bool> {
    let c_name = CString::new(name).map_err(|_| Error::Config("invalid interface name".into()))?;

    // SAFETY: if_nametoindex only reads the NUL-terminated name
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    Ok(index != 0)
}
