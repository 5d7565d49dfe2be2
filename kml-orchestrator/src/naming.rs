//! Deterministic resource names derived from a service/session pair (§4.6).

pub fn sandbox_name(service_name: &str, slug: &str) -> String {
    format!("kml-{service_name}-{slug}")
}

pub fn worker_name(service_name: &str, slug: &str) -> String {
    format!("kml-{service_name}-{slug}")
}

pub fn tunnel_name(service_name: &str, slug: &str) -> String {
    format!("kml-{service_name}-{slug}")
}

pub fn hostname(slug: &str, domain: &str) -> String {
    format!("{slug}.{domain}")
}

pub fn database_name(slug: &str) -> String {
    format!("{}_dev", slug.replace('-', "_"))
}

pub const CODE_PATH: &str = "/home/daytona/app";

pub const MISE_PATH_EXPORT: &str =
    r#"export PATH="$HOME/.local/share/mise/shims:$HOME/.local/bin:$PATH""#;
