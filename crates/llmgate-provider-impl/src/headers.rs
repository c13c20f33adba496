use crate::request::UpstreamRequest;

pub fn set_bearer(req: &mut UpstreamRequest, api_key: &str) {
    req.set_header("Authorization", format!("Bearer {api_key}"));
}

pub fn set_x_api_key(req: &mut UpstreamRequest, api_key: &str) {
    req.set_header("x-api-key", api_key);
}

pub fn set_x_goog_api_key(req: &mut UpstreamRequest, api_key: &str) {
    req.set_header("x-goog-api-key", api_key);
}

pub fn set_accept_json(req: &mut UpstreamRequest) {
    req.set_header("Accept", "application/json");
}

pub fn set_content_type_json(req: &mut UpstreamRequest) {
    req.set_header("Content-Type", "application/json");
}

/// Header precedence during request emission (highest wins, case-insensitive):
/// provider-config auth headers > binding custom headers > pass-through inbound
/// headers. `authorization`, `x-api-key`, `x-goog-api-key`, `content-length` and
/// `host` are never carried through from the inbound request.
pub const NEVER_PASSTHROUGH: &[&str] = &[
    "authorization",
    "x-api-key",
    "x-goog-api-key",
    "content-length",
    "host",
];

pub fn apply_custom_headers(req: &mut UpstreamRequest, custom: &[(String, String)]) {
    for (name, value) in custom {
        if NEVER_PASSTHROUGH.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        req.set_header(name.clone(), value.clone());
    }
}
