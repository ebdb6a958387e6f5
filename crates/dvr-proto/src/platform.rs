use std::path::PathBuf;

/// Registry name of the capture service.
pub const SERVICE_NAME: &str = "sysdvr";

pub const SERVICE_TCP_PORT: u16 = 6668;
const SERVICE_TCP_HOST: &str = "127.0.0.1";

pub fn service_address() -> String {
    format!("{}:{}", SERVICE_TCP_HOST, SERVICE_TCP_PORT)
}

/// Where the service advertises itself while it runs.
pub fn service_pid_file(service: &str) -> PathBuf {
    data_dir().join(format!("{service}.pid"))
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/dvrctl on macOS too, for consistency with Linux
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("dvrctl")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dvrctl")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("dvrctl")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dvrctl")
    }
}
