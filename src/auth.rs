//! Registry credential resolution.
//!
//! Credentials for a pull come from three layered sources, tried in fixed
//! order: the per-build auth map attached to the job, the invoking user's
//! home-directory credential store, and registry-type credentials delivered
//! with the job. The first hit wins. Resolution is best-effort throughout:
//! a payload that fails to parse falls through silently to the next source,
//! and a miss everywhere means an anonymous pull.

use crate::client::RegistryAuth;
use crate::job::BuildJob;
use crate::reference;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Resolves credentials for pulling `image`, or `None` for anonymous.
///
/// `home_user` overrides whose home directory holds the credential store;
/// empty or absent selects the process owner's.
pub fn resolve_auth_for_image(
    image: &str,
    job: &BuildJob,
    home_user: Option<&str>,
) -> Option<RegistryAuth> {
    let index_name = reference::registry_index(image);

    let resolved = parse_auth_configs(&job.auth_config_json)
        .and_then(|configs| resolve_registry_auth(&index_name, &configs))
        .or_else(|| {
            read_home_dir_auth(home_user)
                .and_then(|configs| resolve_registry_auth(&index_name, &configs))
        })
        .or_else(|| {
            let configs = credential_auth_configs(job);
            resolve_registry_auth(&index_name, &configs)
        });

    match &resolved {
        Some(auth) => debug!(
            username = %auth.username,
            server = %auth.server_address,
            image,
            "using registry credentials"
        ),
        None => debug!(index = %index_name, "no registry credentials found"),
    }
    resolved
}

/// Parses a Docker-format auth payload into per-registry credentials.
///
/// Accepts both the modern `{"auths": {...}}` wrapper and the legacy bare
/// map. Entries may carry a base64 `auth` blob or explicit username and
/// password fields. Empty or malformed payloads resolve to `None` rather
/// than an empty map, so the caller falls through to the next source.
pub fn parse_auth_configs(payload: &str) -> Option<HashMap<String, RegistryAuth>> {
    if payload.trim().is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let map = value.as_object()?;

    let entries = match map.get("auths") {
        Some(auths) => auths.as_object()?,
        None => map,
    };

    let mut configs = HashMap::new();
    for (registry, entry) in entries {
        if let Some(auth) = parse_auth_entry(registry, entry) {
            configs.insert(registry.clone(), auth);
        }
    }

    if configs.is_empty() {
        None
    } else {
        Some(configs)
    }
}

fn parse_auth_entry(registry: &str, entry: &serde_json::Value) -> Option<RegistryAuth> {
    let entry = entry.as_object()?;

    if let Some(blob) = entry.get("auth").and_then(|v| v.as_str()) {
        let decoded = BASE64.decode(blob).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        return Some(RegistryAuth {
            username: username.to_string(),
            password: password.to_string(),
            server_address: registry.to_string(),
        });
    }

    let username = entry.get("username").and_then(|v| v.as_str())?;
    let password = entry.get("password").and_then(|v| v.as_str())?;
    Some(RegistryAuth {
        username: username.to_string(),
        password: password.to_string(),
        server_address: registry.to_string(),
    })
}

/// Reads the credential store from a home directory.
///
/// Looks for `.docker/config.json` first, then the legacy `.dockercfg`.
fn read_home_dir_auth(user: Option<&str>) -> Option<HashMap<String, RegistryAuth>> {
    let home = match user {
        Some(user) if !user.is_empty() => PathBuf::from("/home").join(user),
        _ => dirs::home_dir()?,
    };

    for candidate in [home.join(".docker/config.json"), home.join(".dockercfg")] {
        if let Ok(payload) = std::fs::read_to_string(&candidate) {
            if let Some(configs) = parse_auth_configs(&payload) {
                return Some(configs);
            }
        }
    }
    None
}

/// Builds an auth map from registry-type credentials attached to the job.
fn credential_auth_configs(job: &BuildJob) -> HashMap<String, RegistryAuth> {
    job.credentials
        .iter()
        .filter(|credential| credential.kind == "registry")
        .map(|credential| {
            (
                credential.url.clone(),
                RegistryAuth {
                    username: credential.username.clone(),
                    password: credential.password.clone(),
                    server_address: credential.url.clone(),
                },
            )
        })
        .collect()
}

/// Finds the entry for a registry index name, tolerating the usual key
/// spellings (scheme prefixes, trailing slashes, the Docker Hub v1 URL).
pub fn resolve_registry_auth(
    index_name: &str,
    configs: &HashMap<String, RegistryAuth>,
) -> Option<RegistryAuth> {
    if let Some(auth) = configs.get(index_name) {
        return Some(auth.clone());
    }

    configs
        .iter()
        .find(|(key, _)| normalize_index(key) == normalize_index(index_name))
        .map(|(_, auth)| auth.clone())
}

/// Canonicalizes a registry key: scheme and path stripped, lowercased,
/// with the Docker Hub index host folded onto `docker.io`.
fn normalize_index(key: &str) -> String {
    let key = key
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = key.split('/').next().unwrap_or_default().to_lowercase();
    if host == "index.docker.io" || host == "registry-1.docker.io" {
        "docker.io".to_string()
    } else {
        host
    }
}
