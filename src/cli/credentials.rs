//! Credential sources and certificate files for server connections
//!
//! A login is assembled from, in order: the command line or environment,
//! the userinfo part of the server URL, a `.netrc` entry for the host, and
//! finally an interactive password prompt.

use crate::shutdown::SharedShutdown;
use netrc_rs::Netrc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::CliError;

/// Credentials found in a `.netrc` file for one host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetrcEntry {
    /// `login` token
    pub login: Option<String>,
    /// `password` token
    pub password: Option<String>,
    /// `account` token, used as the identity provider
    pub account: Option<String>,
}

/// Entry for `host` in netrc `content`, falling back to the `default` entry
///
/// # Errors
/// [`CliError::InvalidArgument`] when the content is not valid netrc syntax.
pub fn lookup_netrc(content: String, host: &str) -> Result<Option<NetrcEntry>, CliError> {
    let netrc = Netrc::parse(content, false)
        .map_err(|_| CliError::InvalidArgument("netrc file could not be parsed".to_string()))?;

    let machine = netrc
        .machines
        .iter()
        .find(|m| m.name.as_deref() == Some(host))
        .or_else(|| netrc.machines.iter().find(|m| m.name.is_none()));

    Ok(machine.map(|m| NetrcEntry {
        login: m.login.clone(),
        password: m.password.clone(),
        account: m.account.clone(),
    }))
}

/// Read the netrc file and look up `host`
///
/// Without an explicit path, `$HOME/.netrc` is used when it exists. An
/// explicit path that cannot be read is an error.
pub fn read_netrc(explicit: Option<&Path>, host: &str) -> Result<Option<NetrcEntry>, CliError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".netrc"),
            None => return Ok(None),
        },
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => {
            return Ok(None);
        }
        Err(e) => {
            return Err(CliError::InvalidArgument(format!(
                "Cannot read {}: {e}",
                path.display()
            )))
        }
    };

    let entry = lookup_netrc(content, host)?;
    debug!(path = %path.display(), host = host, found = entry.is_some(), "Consulted netrc");
    Ok(entry)
}

/// Session API name of a provider given as `local`, `ad` or verbatim
pub fn provider_api_name(name: &str) -> String {
    match name.to_ascii_lowercase().as_str() {
        "local" | "default" => "DEFAULT".to_string(),
        "ad" | "active_directory" | "activedirectory" => "ACTIVE_DIRECTORY".to_string(),
        _ => name.to_string(),
    }
}

/// Ask for a password on the terminal; `None` for an empty answer
///
/// # Errors
/// [`CliError::Interrupted`] on Ctrl+C while waiting for input.
pub async fn prompt_password(
    username: &str,
    host: &str,
    shutdown: &SharedShutdown,
) -> Result<Option<String>, CliError> {
    eprintln!("No password found for {username}@{host}");
    let prompt = format!("Password for {username}@{host}: ");
    let reading = tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt));

    tokio::select! {
        read = reading => {
            let password = read
                .map_err(|e| CliError::ConfigurationError(format!("Password prompt failed: {e}")))?
                .map_err(|e| CliError::InvalidArgument(format!("Cannot read a password: {e}")))?;
            Ok(Some(password).filter(|p| !p.is_empty()))
        }
        _ = shutdown.wait_for_shutdown() => Err(CliError::Interrupted),
    }
}

/// Write a DER certificate to a new PEM file, returning the PEM text
///
/// # Errors
/// [`CliError::InvalidArgument`] when `path` already exists or cannot be
/// created.
pub fn save_certificate(path: &Path, der: &[u8]) -> Result<String, CliError> {
    let pem = pem::encode(&pem::Pem::new("CERTIFICATE", der.to_vec()));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| CliError::InvalidArgument(format!("Cannot create {}: {e}", path.display())))?;
    file.write_all(pem.as_bytes())
        .map_err(|e| CliError::ConfigurationError(format!("Cannot write {}: {e}", path.display())))?;
    Ok(pem)
}
