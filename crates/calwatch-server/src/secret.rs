//! Secret references in `config.toml`.
//!
//! `access_token` may name where the token lives instead of holding it:
//!
//! - `env::VAR_NAME`: read from the environment
//! - `pass::path/in/store`: first line of `pass show path/in/store`
//! - anything else: used verbatim

use crate::error::{ServerError, ServerResult};

/// Resolves a value that may be a secret reference.
pub fn resolve(value: &str) -> ServerResult<String> {
    if let Some(var) = value.strip_prefix("env::") {
        std::env::var(var).map_err(|_| {
            ServerError::config(format!("environment variable `{}` is not set", var))
        })
    } else if let Some(path) = value.strip_prefix("pass::") {
        resolve_pass(path)
    } else {
        Ok(value.to_string())
    }
}

fn resolve_pass(path: &str) -> ServerResult<String> {
    let output = std::process::Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| ServerError::config(format!("failed to run `pass show {}`: {}", path, e)))?;

    if !output.status.success() {
        return Err(ServerError::config(format!(
            "`pass show {}` failed ({}): {}",
            path,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .filter(|line| !line.is_empty())
        .ok_or_else(|| ServerError::config(format!("`pass show {}` produced no output", path)))
}
