/// Checks run before a service is launched: the target port must be free and
/// the service binary must be executable.
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpStream;

/// Upper bound for the port probe's connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors reported by preflight checks.
#[derive(Debug)]
pub enum PreflightError {
    /// Something is already listening on the service's port.
    PortInUse { port: u16 },
    /// The service binary is missing or lacks an execute bit.
    NotExecutable { service: String, path: PathBuf },
    /// The probe URL has no usable host or port.
    InvalidUrl { url: String, reason: String },
}

impl std::fmt::Display for PreflightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreflightError::PortInUse { port } => {
                write!(f, "The port {} is already in use.", port)
            }
            PreflightError::NotExecutable { service, path } => write!(
                f,
                "Could not start {}, binary {} is not executable.",
                service,
                path.display()
            ),
            PreflightError::InvalidUrl { url, reason } => {
                write!(f, "invalid probe URL '{}': {}", url, reason)
            }
        }
    }
}

impl std::error::Error for PreflightError {}

/// Host and port the probe URL points at, using the scheme's default port
/// when none is given.
pub fn target_addr(url: &str) -> Result<(String, u16), PreflightError> {
    let invalid = |reason: String| PreflightError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = reqwest::Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| invalid("missing host".to_string()))?;
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port".to_string()))?;
    // IPv6 literals come back bracketed
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}

/// Fail if something already accepts connections on `host:port`.
///
/// A refused or timed-out connection means the port is free.
pub async fn check_port_available(host: &str, port: u16) -> Result<(), PreflightError> {
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => {
            tracing::debug!(host, port, "port already accepting connections");
            Err(PreflightError::PortInUse { port })
        }
        Ok(Err(e)) => {
            tracing::trace!(host, port, error = %e, "port is free");
            Ok(())
        }
        Err(_) => {
            tracing::trace!(host, port, "port probe timed out, assuming free");
            Ok(())
        }
    }
}

/// Resolve `program` to an executable file.
///
/// Paths containing a `/` are checked as-is; bare names are looked up on `PATH`.
pub fn check_executable(program: &Path, service: &str) -> Result<PathBuf, PreflightError> {
    let not_executable = || PreflightError::NotExecutable {
        service: service.to_string(),
        path: program.to_path_buf(),
    };

    if program.components().count() > 1 || program.is_absolute() {
        return if is_executable(program) {
            Ok(program.to_path_buf())
        } else {
            Err(not_executable())
        };
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(not_executable)
}

fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_script(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_target_addr_explicit_port() {
        assert_eq!(
            target_addr("http://127.0.0.1:9080/health").unwrap(),
            ("127.0.0.1".to_string(), 9080)
        );
    }

    #[test]
    fn test_target_addr_default_ports() {
        assert_eq!(
            target_addr("http://localhost/").unwrap(),
            ("localhost".to_string(), 80)
        );
        assert_eq!(
            target_addr("https://example.com").unwrap(),
            ("example.com".to_string(), 443)
        );
    }

    #[test]
    fn test_target_addr_ipv6() {
        assert_eq!(
            target_addr("http://[::1]:4444/status").unwrap(),
            ("::1".to_string(), 4444)
        );
    }

    #[test]
    fn test_target_addr_invalid() {
        let err = target_addr("not a url").unwrap_err();
        assert!(matches!(err, PreflightError::InvalidUrl { .. }));
        assert!(err.to_string().starts_with("invalid probe URL 'not a url'"));
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = check_port_available("127.0.0.1", port).await.unwrap_err();
        assert_eq!(err.to_string(), format!("The port {port} is already in use."));
    }

    #[tokio::test]
    async fn test_port_free() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        check_port_available("127.0.0.1", port).await.unwrap();
    }

    #[test]
    fn test_executable_file_accepted() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "server", 0o755);
        assert_eq!(check_executable(&script, "web server").unwrap(), script);
    }

    #[test]
    fn test_non_executable_file_rejected() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "server", 0o644);
        let err = check_executable(&script, "web server").unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "Could not start web server, binary {} is not executable.",
                script.display()
            )
        );
    }

    #[test]
    fn test_missing_file_rejected() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(check_executable(&missing, "svc").is_err());
    }

    #[test]
    fn test_directory_rejected() {
        let dir = tempdir().unwrap();
        assert!(check_executable(dir.path(), "svc").is_err());
    }

    #[test]
    fn test_bare_name_resolved_on_path() {
        let resolved = check_executable(Path::new("sh"), "shell").unwrap();
        assert!(resolved.is_absolute() || resolved.components().count() > 1);
        assert!(resolved.ends_with("sh"));
    }

    #[test]
    fn test_bare_name_not_on_path() {
        let err = check_executable(Path::new("nonexistent-binary-xyz"), "svc").unwrap_err();
        assert!(matches!(err, PreflightError::NotExecutable { .. }));
    }
}
