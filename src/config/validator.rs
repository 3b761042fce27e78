use super::Config;
use anyhow::Result;

/// Validate config for correctness
pub fn validate_config(config: &Config) -> Result<()> {
    if config.settings.max_parallel == 0 {
        anyhow::bail!("settings.max_parallel must be at least 1");
    }

    if config.settings.max_passes == 0 {
        anyhow::bail!("settings.max_passes must be at least 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        validate_config(&Config::default()).expect("must be valid");
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = Config::default();
        config.settings.max_parallel = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("max_parallel"));
    }

    #[test]
    fn zero_passes_is_rejected() {
        let mut config = Config::default();
        config.settings.max_passes = 0;
        assert!(validate_config(&config).is_err());
    }
}
