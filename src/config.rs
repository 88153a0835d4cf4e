//! Configuration resolution for connector services.
//!
//! Values follow a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided function parameter (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CONNECTOR_OPERATION_TIMEOUT_MS` | 120000ms | Wait for exclusive connect/disconnect access |
//! | `CONNECTOR_CONNECT_TIMEOUT` | 30s | SSH transport connection timeout in seconds |
//! | `CONNECTOR_MAX_RETRIES` | 3 | SSH transport retry attempts |
//! | `CONNECTOR_RETRY_DELAY_MS` | 1000ms | Initial SSH retry delay in milliseconds |
//! | `CONNECTOR_COMPRESSION` | true | Enable zlib compression |
//! | `CONNECTOR_STORE_URL` | `file://rse` | Current credential store location |
//! | `CONNECTOR_CREDENTIALS_FILE` | unset | JSON file backing the credential store |
//! | `CONNECTOR_SSH_KEY_PATH` | unset | Private key tried after the password |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default wait for exclusive connect/disconnect access, in milliseconds
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 120_000;

/// Default SSH connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default maximum retry attempts for SSH connection
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry delay in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retry delay cap
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Location credentials are written to
pub const DEFAULT_STORE_URL: &str = "file://rse";

/// Older locations consulted, in order, when the current one has nothing
pub const LEGACY_STORE_URLS: &[&str] = &["file://org.eclipse.rse", "file://com.ibm.etools.systems"];

pub(crate) const OPERATION_TIMEOUT_ENV_VAR: &str = "CONNECTOR_OPERATION_TIMEOUT_MS";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "CONNECTOR_CONNECT_TIMEOUT";
pub(crate) const MAX_RETRIES_ENV_VAR: &str = "CONNECTOR_MAX_RETRIES";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "CONNECTOR_RETRY_DELAY_MS";
pub(crate) const COMPRESSION_ENV_VAR: &str = "CONNECTOR_COMPRESSION";
pub(crate) const STORE_URL_ENV_VAR: &str = "CONNECTOR_STORE_URL";
pub(crate) const CREDENTIALS_FILE_ENV_VAR: &str = "CONNECTOR_CREDENTIALS_FILE";
pub(crate) const SSH_KEY_PATH_ENV_VAR: &str = "CONNECTOR_SSH_KEY_PATH";

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the guard acquisition timeout with priority: parameter -> env var -> default
pub fn resolve_operation_timeout(timeout_ms_param: Option<u64>) -> Duration {
    let millis = timeout_ms_param
        .or_else(|| env_parsed(OPERATION_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS);
    Duration::from_millis(millis)
}

/// Resolve the SSH connection timeout with priority: parameter -> env var -> default
pub fn resolve_connect_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| env_parsed(CONNECT_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the max retries value with priority: parameter -> env var -> default
pub fn resolve_max_retries(max_retries_param: Option<u32>) -> u32 {
    max_retries_param
        .or_else(|| env_parsed(MAX_RETRIES_ENV_VAR))
        .unwrap_or(DEFAULT_MAX_RETRIES)
}

/// Resolve the initial retry delay with priority: parameter -> env var -> default
pub fn resolve_retry_delay(retry_delay_param: Option<u64>) -> Duration {
    let millis = retry_delay_param
        .or_else(|| env_parsed(RETRY_DELAY_MS_ENV_VAR))
        .unwrap_or(DEFAULT_RETRY_DELAY_MS);
    Duration::from_millis(millis)
}

/// Resolve the compression setting with priority: parameter -> env var -> default (true)
pub fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}

/// Resolve the current credential store location
pub fn resolve_store_url(url_param: Option<String>) -> String {
    url_param
        .or_else(|| env_non_empty(STORE_URL_ENV_VAR))
        .unwrap_or_else(|| DEFAULT_STORE_URL.to_string())
}

/// Resolve the credential file; `None` keeps credentials in memory only
pub fn resolve_credentials_file(path_param: Option<PathBuf>) -> Option<PathBuf> {
    path_param.or_else(|| env_non_empty(CREDENTIALS_FILE_ENV_VAR).map(PathBuf::from))
}

/// Resolve the private key offered after the password
pub fn resolve_ssh_key_path(path_param: Option<PathBuf>) -> Option<PathBuf> {
    path_param.or_else(|| env_non_empty(SSH_KEY_PATH_ENV_VAR).map(PathBuf::from))
}
