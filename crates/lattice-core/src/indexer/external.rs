//! External-import classification.
//!
//! Curated package-to-category maps turn imports of well-known
//! third-party packages into `is_external` edges carrying
//! `package_name` and `boundary_category`. Anything that looks like a
//! relative or intra-repo path is internal.

/// Boundary category of an external package.
pub fn classify(module: &str) -> Option<(&'static str, String)> {
    if is_internal(module) {
        return None;
    }
    let package = root_package(module);
    let category = CATEGORY_MAP
        .iter()
        .find(|(name, _)| *name == package)
        .map(|(_, category)| *category)
        .unwrap_or("library");
    Some((category, package.to_string()))
}

/// Whether an import path points inside the repository.
pub fn is_internal(module: &str) -> bool {
    module.starts_with('.')
        || module.starts_with('/')
        || module.starts_with("crate::")
        || module.starts_with("self::")
        || module.starts_with("super::")
        || module.starts_with("@/")
        || module.starts_with("~/")
        || module.ends_with(".h")
        || module.ends_with(".hpp")
}

/// Root package of an import path (`react-dom/client` -> `react-dom`,
/// `@nestjs/common` -> `@nestjs/common`, `os.path` -> `os`).
fn root_package(module: &str) -> &str {
    if let Some(rest) = module.strip_prefix('@') {
        // Scoped npm package: keep scope/name.
        let mut parts = rest.splitn(3, '/');
        let scope = parts.next().unwrap_or("");
        let name = parts.next().unwrap_or("");
        let end = 1 + scope.len() + if name.is_empty() { 0 } else { 1 + name.len() };
        return &module[..end.min(module.len())];
    }
    module
        .split(['/', '.'])
        .next()
        .unwrap_or(module)
        .split("::")
        .next()
        .unwrap_or(module)
}

/// Curated package -> boundary category map, covering the common
/// framework/infrastructure packages across the ten supported languages.
const CATEGORY_MAP: &[(&str, &str)] = &[
    // HTTP clients & servers
    ("express", "http"),
    ("fastify", "http"),
    ("axios", "http"),
    ("requests", "http"),
    ("httpx", "http"),
    ("flask", "http"),
    ("fastapi", "http"),
    ("django", "http"),
    ("reqwest", "http"),
    ("axum", "http"),
    ("actix-web", "http"),
    ("gin-gonic", "http"),
    ("net", "http"),
    ("okhttp3", "http"),
    ("sinatra", "http"),
    ("rails", "http"),
    // Databases
    ("pg", "database"),
    ("mysql", "database"),
    ("mysql2", "database"),
    ("mongoose", "database"),
    ("mongodb", "database"),
    ("sqlalchemy", "database"),
    ("psycopg2", "database"),
    ("redis", "database"),
    ("sqlx", "database"),
    ("rusqlite", "database"),
    ("diesel", "database"),
    ("gorm", "database"),
    ("activerecord", "database"),
    ("prisma", "database"),
    ("typeorm", "database"),
    ("knex", "database"),
    // Messaging
    ("kafkajs", "queue"),
    ("amqplib", "queue"),
    ("pika", "queue"),
    ("celery", "queue"),
    ("bullmq", "queue"),
    ("nats", "queue"),
    ("rdkafka", "queue"),
    // Cloud SDKs
    ("aws-sdk", "cloud"),
    ("boto3", "cloud"),
    ("google-cloud", "cloud"),
    ("azure", "cloud"),
    ("stripe", "cloud"),
    ("twilio", "cloud"),
    // UI frameworks
    ("react", "ui"),
    ("react-dom", "ui"),
    ("vue", "ui"),
    ("svelte", "ui"),
    ("angular", "ui"),
    ("next", "ui"),
    // Testing
    ("jest", "testing"),
    ("vitest", "testing"),
    ("mocha", "testing"),
    ("pytest", "testing"),
    ("unittest", "testing"),
    ("rspec", "testing"),
    ("junit", "testing"),
    ("@testing-library/react", "testing"),
    // Logging & observability
    ("winston", "observability"),
    ("pino", "observability"),
    ("logging", "observability"),
    ("tracing", "observability"),
    ("log4j", "observability"),
    ("prometheus", "observability"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_imports_are_internal() {
        assert!(classify("./utils").is_none());
        assert!(classify("../shared/config").is_none());
        assert!(classify("crate::config").is_none());
        assert!(classify("@/components/Button").is_none());
    }

    #[test]
    fn test_known_packages_get_categories() {
        let (category, package) = classify("express").expect("external");
        assert_eq!(category, "http");
        assert_eq!(package, "express");

        let (category, _) = classify("sqlalchemy").expect("external");
        assert_eq!(category, "database");
    }

    #[test]
    fn test_subpath_resolves_to_root_package() {
        let (category, package) = classify("react-dom/client").expect("external");
        assert_eq!(category, "ui");
        assert_eq!(package, "react-dom");

        let (_, package) = classify("os.path").expect("external");
        assert_eq!(package, "os");
    }

    #[test]
    fn test_scoped_npm_package() {
        let (category, package) = classify("@testing-library/react").expect("external");
        assert_eq!(category, "testing");
        assert_eq!(package, "@testing-library/react");
    }

    #[test]
    fn test_unknown_external_defaults_to_library() {
        let (category, package) = classify("left-pad").expect("external");
        assert_eq!(category, "library");
        assert_eq!(package, "left-pad");
    }
}
