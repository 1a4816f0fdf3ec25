//! Image reference parsing.
//!
//! Parses Docker-style references (`registry[:port]/repo[:tag][@digest]`)
//! and derives the pieces the executor needs: the canonical service name,
//! the version, the image to pull, and the DNS aliases a sandbox can use to
//! reach a service container.
//!
//! The grammar tries to be format-compatible with Docker, including its
//! quirks. Only the repository component is mandatory; the tag always
//! begins with `:` and the digest with `@`.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Full reference grammar with `name`, `tag`, and `digest` captures.
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        "^",
        "(?P<name>", // name: optional domain plus path components
        /* */ "(?:",
        /* -- */ "(?:", // domain component
        /* -- -- */ "[a-zA-Z0-9]|",
        /* -- -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
        /* -- */ ")",
        /* -- */ "(?:", // further domain components
        /* -- -- */ "\\.",
        /* -- -- */ "(?:",
        /* -- -- -- */ "[a-zA-Z0-9]|",
        /* -- -- -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
        /* -- -- */ ")",
        /* -- */ ")*",
        /* -- */ "(?::[0-9]+)?", // optional port
        /* -- */ "/",
        /* */ ")?",
        /* */ "[a-z0-9]+(?:(?:[._]|__|[-]+)[a-z0-9]+)*", // first path component
        /* */ "(?:",                                     // further path components
        /* -- */ "/[a-z0-9]+(?:(?:[._]|__|[-]+)[a-z0-9]+)*",
        /* */ ")*",
        ")",
        "(?::(?P<tag>[\\w][\\w.-]{0,127}))?",
        "(?:@(?P<digest>",
        /* */ "[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*",
        /* */ ":[0-9a-fA-F]{32,}",
        "))?",
        "$",
    ))
    .unwrap()
});

/// Splits a name into host part (up to an optional port) and path part.
static HOST_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^(.*?)(:[0-9]+)?(/.*)?$").unwrap());

/// A service description resolved into its usable pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReference {
    /// Canonical service name: the reference's name with any registry port
    /// stripped, e.g. `registry.example.com/tools/postgres`.
    pub service: String,
    /// Explicit tag, or `latest` when the reference carried none.
    pub version: String,
    /// Reference to pull. Untouched when a tag was explicit; rewritten to
    /// `name:latest` when it was not.
    pub image_name: String,
    /// DNS aliases derived from the service name: `/` becomes `__`, plus
    /// the RFC 1123 variant with `-` when it differs.
    pub link_names: Vec<String>,
}

/// Parses a service description into name, version, image, and aliases.
pub fn split_service_and_version(description: &str) -> Result<ServiceReference> {
    let captures = REFERENCE
        .captures(description)
        .ok_or_else(|| Error::InvalidReference {
            reference: description.to_string(),
        })?;

    let name = captures.name("name").map(|m| m.as_str()).unwrap_or_default();

    // HOST_PORT matches any input; the fallback never fires in practice.
    let service = match HOST_PORT.captures(name) {
        Some(host_match) => format!(
            "{}{}",
            host_match.get(1).map(|m| m.as_str()).unwrap_or_default(),
            host_match.get(3).map(|m| m.as_str()).unwrap_or_default(),
        ),
        None => name.to_string(),
    };

    let (version, image_name) = match captures.name("tag") {
        Some(tag) => (tag.as_str().to_string(), description.to_string()),
        None => ("latest".to_string(), format!("{name}:latest")),
    };

    let link_name = service.replace('/', "__");
    let mut link_names = vec![link_name.clone()];

    // Alternative alias per RFC 1123, which allows only `a-zA-Z0-9-`.
    let alternative = service.replace('/', "-");
    if alternative != link_name {
        link_names.push(alternative);
    }

    Ok(ServiceReference {
        service,
        version,
        image_name,
        link_names,
    })
}

/// Appends `:latest` when the reference names neither a tag nor a digest.
/// Pulling an untagged name would otherwise fetch every tag.
pub fn with_default_tag(reference: &str) -> String {
    if reference.contains(':') || reference.contains('@') {
        reference.to_string()
    } else {
        format!("{reference}:latest")
    }
}

/// Extracts the registry index name credentials are keyed by.
///
/// References without an explicit registry host resolve to Docker Hub.
pub fn registry_index(reference: &str) -> String {
    let name = match REFERENCE.captures(reference) {
        Some(captures) => captures
            .name("name")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        None => reference.to_string(),
    };

    match name.split_once('/') {
        Some((host, _)) if host.contains('.') || host.contains(':') || host == "localhost" => {
            host.to_string()
        }
        _ => "docker.io".to_string(),
    }
}
