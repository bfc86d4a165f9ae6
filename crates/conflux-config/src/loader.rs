use std::collections::HashMap;
use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// The raw text has its `{{ env.VAR }}` placeholders expanded before it
    /// is parsed and validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a placeholder cannot be
    /// expanded, the TOML is invalid, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing or validation fails
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate backend names or ports, empty
    /// commands, or impossible tracking limits
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_backend_names()?;
        self.validate_services()?;
        self.validate_stdio()?;

        if self.tracking.max_size == 0 {
            anyhow::bail!("tracking.max_size must be greater than 0");
        }

        Ok(())
    }

    /// Names must be unique across the three backend tables
    fn validate_backend_names(&self) -> anyhow::Result<()> {
        let upstream = &self.upstream;
        let mut seen: HashMap<&str, &str> = HashMap::new();

        let names = upstream
            .http
            .keys()
            .map(|n| (n, "http"))
            .chain(upstream.stdio.keys().map(|n| (n, "stdio")))
            .chain(upstream.service.keys().map(|n| (n, "service")));

        for (name, kind) in names {
            if name.is_empty() {
                anyhow::bail!("{kind} backend name must not be empty");
            }
            if let Some(previous) = seen.insert(name.as_str(), kind) {
                anyhow::bail!("backend '{name}' is defined as both {previous} and {kind}");
            }
        }

        Ok(())
    }

    fn validate_services(&self) -> anyhow::Result<()> {
        let mut ports: HashMap<u16, &str> = HashMap::new();

        for (name, service) in &self.upstream.service {
            if service.command.trim().is_empty() {
                anyhow::bail!("service backend '{name}' has an empty command");
            }
            if !service.health_check_path.starts_with('/') {
                anyhow::bail!("service backend '{name}' health_check_path must start with '/'");
            }
            if let Some(owner) = ports.insert(service.port, name) {
                anyhow::bail!("port {} is used by both '{owner}' and '{name}'", service.port);
            }
        }

        Ok(())
    }

    fn validate_stdio(&self) -> anyhow::Result<()> {
        for (name, stdio) in &self.upstream.stdio {
            if stdio.command.trim().is_empty() {
                anyhow::bail!("stdio backend '{name}' has an empty command");
            }
        }

        Ok(())
    }
}
