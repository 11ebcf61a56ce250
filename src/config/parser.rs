use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use job_harvester::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Workers: {}", config.harvester.workers);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    // Read the configuration file
    let content = std::fs::read_to_string(path)?;

    // Parse TOML
    let config: Config = toml::from_str(&content)?;

    // Validate the configuration
    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Recorded with every run so a resumed run can tell whether the
/// configuration changed since the interrupted one.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok((Config, String))` - Successfully loaded configuration and its hash
/// * `Err(ConfigError)` - Failed to load or parse the configuration
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID_CONFIG: &str = r##"
[harvester]
workers = 4
min-delay-ms = 500
max-delay-ms = 1500

[user-agent]
agents = ["TestAgent/1.0", "TestAgent/2.0"]

[output]
database-path = "./test.db"

[[site]]
name = "acme"
base-url = "https://jobs.acme.example/search"
identity = ["title", "location"]

[site.selectors]
job-list = ".card"
title = "h2"
location = [".location", "#job-location-name"]
link = "a"

[site.pagination]
url-template = "https://jobs.acme.example/search?pg={page}"

[[site]]
name = "globex"
base-url = "https://careers.globex.example/"
js-required = true
wait-for = ".job-card"
follow-details = true
max-pages = 5

[site.selectors]
job-list = ".job-card"
title = ".job-title"
link = "a.more@href"

[site.detail-selectors]
title = "h1"
description = [".jd-body", "article"]

[site.pagination]
next-selector = "a.next"
"##;

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.harvester.workers, 4);
        assert_eq!(config.harvester.max_attempts, 3);
        assert_eq!(config.harvester.seen_ttl_days, 30);
        assert_eq!(config.user_agent.agents.len(), 2);
        assert_eq!(config.sites.len(), 2);
        assert!(config.sites[1].follow_details);

        let acme = config.sites[0].selector_entries();
        assert_eq!(acme["location"].len(), 2);
        assert_eq!(acme["title"], vec!["h2".to_string()]);
        assert_eq!(config.sites[0].pagination.as_ref().unwrap().start, 1);
    }

    #[test]
    fn test_site_definitions_from_config() {
        let file = create_temp_config(VALID_CONFIG);
        let config = load_config(file.path()).unwrap();
        let sites = config.site_definitions().unwrap();

        assert_eq!(sites[0].name, "acme");
        assert_eq!(sites[0].max_pages, 50);
        assert!(!sites[0].follows_details());
        assert_eq!(
            sites[0].first_page_url().as_str(),
            "https://jobs.acme.example/search?pg=1"
        );

        assert_eq!(sites[1].max_pages, 5);
        assert!(sites[1].follows_details());
        assert!(sites[1].js_required);
        assert_eq!(sites[1].first_page_url().as_str(), "https://careers.globex.example/");
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let config_content = "this is not valid TOML {{{";
        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[harvester]
workers = 0

[output]
database-path = "./test.db"

[[site]]
name = "acme"
base-url = "https://jobs.acme.example/"

[site.selectors]
job-list = ".card"
title = "h2"
link = "a"
"#;

        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_load_config_with_hash() {
        let file = create_temp_config(VALID_CONFIG);
        let (config, hash) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(config.sites.len(), 2);
        assert_eq!(hash, compute_config_hash(file.path()).unwrap());
    }

    #[test]
    fn test_compute_config_hash() {
        let config_content = "test content";
        let file = create_temp_config(config_content);

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        // Same content should produce same hash
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA-256 produces 64 hex characters
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
