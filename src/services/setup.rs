use crate::core::models::{ApiConfig, Model};
use crate::services::workflow::Studio;
use anyhow::Result;
use inquire::{Confirm, Password, PasswordDisplayMode, Text};

/// Providers that cannot be used yet because their key or base URL is missing.
pub fn missing_providers(config: &ApiConfig) -> Vec<Model> {
    Model::ALL
        .iter()
        .copied()
        .filter(|m| !config.provider(*m).is_configured())
        .collect()
}

/// Asks for the API keys that are still missing and saves them.
pub async fn run_setup(studio: &mut Studio) -> Result<()> {
    let missing = missing_providers(&studio.context().api_config);
    if missing.is_empty() {
        return Ok(());
    }

    let mut config = studio.context().api_config.clone();
    let mut needs_save = false;

    for model in missing {
        let wanted = Confirm::new(&format!("{} has no API key. Configure it now?", model.display_name()))
            .with_default(true)
            .prompt()?;
        if !wanted {
            continue;
        }

        let provider = config.provider_mut(model);
        provider.base_url = Text::new("Base URL:")
            .with_default(&provider.base_url)
            .prompt()?
            .trim()
            .trim_end_matches('/')
            .to_string();
        provider.api_key = Password::new("API key:")
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()?
            .trim()
            .to_string();
        needs_save = !provider.api_key.is_empty() || needs_save;
    }

    if needs_save && studio.save_api_config(config).await {
        println!("Configuration saved.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ProviderConfig;

    #[test]
    fn test_missing_providers() {
        assert_eq!(
            missing_providers(&ApiConfig::with_default_endpoints()),
            vec![Model::Seedream, Model::BananaPro]
        );

        let config = ApiConfig {
            seedream: ProviderConfig::new("https://a", "key"),
            banana_pro: ProviderConfig::new("https://b", "  "),
        };
        assert_eq!(missing_providers(&config), vec![Model::BananaPro]);
    }
}
