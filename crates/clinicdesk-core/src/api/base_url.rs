/// Backend used when the front end runs from a local development origin
pub const LOCAL_DEV_API: &str = "http://localhost:3001";

/// Hosting providers the production front end is deployed to.
const CLOUD_HOST_SUFFIXES: &[&str] = &[
    ".vercel.app",
    ".netlify.app",
    ".onrender.com",
    ".herokuapp.com",
    ".railway.app",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    LocalDevelopment,
    Cloud,
    Other,
}

/// Host part of an origin such as `https://app.example.com:8443`.
fn host_of(origin: &str) -> &str {
    let without_scheme = origin.split_once("://").map(|(_, rest)| rest).unwrap_or(origin);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    authority.split(':').next().unwrap_or(authority)
}

pub fn classify_origin(origin: &str) -> Deployment {
    let host = host_of(origin).to_ascii_lowercase();
    if host == "localhost" || host == "127.0.0.1" {
        Deployment::LocalDevelopment
    } else if CLOUD_HOST_SUFFIXES.iter().any(|suffix| host.ends_with(suffix)) {
        Deployment::Cloud
    } else {
        Deployment::Other
    }
}

/// Resolve the API base URL for a front end served from `origin`.
///
/// An explicit URL always wins. Local development origins talk to the
/// dev server on port 3001; every other origin is same-origin.
pub fn resolve_base_url(origin: &str, explicit: Option<&str>) -> String {
    if let Some(url) = explicit.filter(|u| !u.trim().is_empty()) {
        return url.trim_end_matches('/').to_string();
    }
    match classify_origin(origin) {
        Deployment::LocalDevelopment => LOCAL_DEV_API.to_string(),
        Deployment::Cloud | Deployment::Other => origin.trim_end_matches('/').to_string(),
    }
}
