use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use broker_types::{AuthMode, BodyFormat, IntegrationConfig, Provider, ProviderRegistry, TokenRequestAuthMethod, VerificationProbe};
use dashmap::DashMap;
use serde::Deserialize;

/// One entry in `providers.yaml`: either a full provider descriptor or an
/// alias pointing at another entry, resolved transitively at load time.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProviderEntry {
    Alias { alias: String },
    Full(ProviderFile),
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderFile {
    auth_mode: AuthMode,
    authorization_url: Option<String>,
    token_url: Option<String>,
    refresh_url: Option<String>,
    access_token_url: Option<String>,
    #[serde(default)]
    authorization_params: HashMap<String, String>,
    #[serde(default)]
    token_params: HashMap<String, String>,
    #[serde(default)]
    refresh_params: HashMap<String, String>,
    #[serde(default)]
    authorization_url_replacements: HashMap<String, String>,
    #[serde(default)]
    token_url_encode: bool,
    #[serde(default)]
    authorization_url_encode: bool,
    #[serde(default)]
    disable_pkce: bool,
    #[serde(default)]
    authorization_url_fragment: bool,
    #[serde(default)]
    token_request_auth_method: TokenRequestAuthMethod,
    #[serde(default)]
    body_format: BodyFormat,
    scope_separator: Option<String>,
    #[serde(default)]
    verification: Option<VerificationProbe>,
    #[serde(default)]
    webhook_routing_script: Option<String>,
}

impl ProviderFile {
    fn into_provider(self, name: String) -> Provider {
        Provider {
            name,
            auth_mode: self.auth_mode,
            authorization_url: self.authorization_url,
            token_url: self.token_url,
            refresh_url: self.refresh_url,
            access_token_url: self.access_token_url,
            authorization_params: self.authorization_params,
            token_params: self.token_params,
            refresh_params: self.refresh_params,
            authorization_url_replacements: self.authorization_url_replacements,
            token_url_encode: self.token_url_encode,
            authorization_url_encode: self.authorization_url_encode,
            disable_pkce: self.disable_pkce,
            authorization_url_fragment: self.authorization_url_fragment,
            token_request_auth_method: self.token_request_auth_method,
            body_format: self.body_format,
            scope_separator: self.scope_separator,
            verification: self.verification,
            webhook_routing_script: self.webhook_routing_script,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct IntegrationFile {
    environment_id: String,
    provider_config_key: String,
    provider: String,
    oauth_client_id: Option<String>,
    oauth_client_secret: Option<String>,
    oauth_scopes: Option<String>,
    app_link: Option<String>,
    #[serde(default)]
    custom: HashMap<String, serde_json::Value>,
}

/// Read-only registry backed by a declarative `providers.yaml` and a
/// tenant-scoped `integrations.yaml`, both loaded once at process start.
/// Neither file is re-read afterwards; restart the process to pick up
/// changes, matching the design's "effectively read-only per process" note.
pub struct YamlProviderRegistry {
    providers: DashMap<String, Provider>,
    integrations: DashMap<(String, String), IntegrationConfig>,
}

impl YamlProviderRegistry {
    pub fn load(providers_path: impl AsRef<Path>, integrations_path: impl AsRef<Path>) -> Result<Self> {
        let providers = Self::load_providers(providers_path.as_ref())?;
        let integrations = Self::load_integrations(integrations_path.as_ref())?;
        Ok(Self {
            providers,
            integrations,
        })
    }

    fn load_providers(path: &Path) -> Result<DashMap<String, Provider>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read provider file '{}'", path.display()))?;
        let entries: HashMap<String, ProviderEntry> = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse provider file '{}'", path.display()))?;

        let resolved = DashMap::new();
        for name in entries.keys() {
            let provider = Self::resolve_alias(name, &entries, &mut Vec::new())?;
            resolved.insert(name.clone(), provider);
        }
        Ok(resolved)
    }

    fn resolve_alias(
        name: &str,
        entries: &HashMap<String, ProviderEntry>,
        seen: &mut Vec<String>,
    ) -> Result<Provider> {
        if seen.contains(&name.to_string()) {
            return Err(anyhow!("alias cycle detected starting at '{name}'"));
        }
        seen.push(name.to_string());

        match entries
            .get(name)
            .ok_or_else(|| anyhow!("unknown provider '{name}' referenced by alias"))?
        {
            ProviderEntry::Alias { alias } => Self::resolve_alias(alias, entries, seen),
            ProviderEntry::Full(file) => Ok(file.clone().into_provider(name.to_string())),
        }
    }

    fn load_integrations(path: &Path) -> Result<DashMap<(String, String), IntegrationConfig>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read integrations file '{}'", path.display()))?;
        let entries: Vec<IntegrationFile> = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse integrations file '{}'", path.display()))?;

        let map = DashMap::new();
        for entry in entries {
            let key = (entry.environment_id.clone(), entry.provider_config_key.clone());
            map.insert(
                key,
                IntegrationConfig {
                    provider_config_key: entry.provider_config_key,
                    provider: entry.provider,
                    oauth_client_id: entry.oauth_client_id,
                    oauth_client_secret: entry.oauth_client_secret,
                    oauth_scopes: entry.oauth_scopes,
                    app_link: entry.app_link,
                    custom: entry.custom,
                },
            );
        }
        Ok(map)
    }
}

#[async_trait]
impl ProviderRegistry for YamlProviderRegistry {
    async fn get_provider(&self, name: &str) -> Option<Provider> {
        self.providers.get(name).map(|p| p.clone())
    }

    async fn get_integration(&self, environment_id: &str, provider_config_key: &str) -> Option<IntegrationConfig> {
        self.integrations
            .get(&(environment_id.to_string(), provider_config_key.to_string()))
            .map(|i| i.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn aliases_resolve_transitively() {
        let providers = write_temp(
            r#"
github:
  auth_mode: OAUTH2
  authorization_url: "https://github.com/login/oauth/authorize"
  token_url: "https://github.com/login/oauth/access_token"
github-enterprise:
  alias: github
github-app:
  alias: github-enterprise
"#,
        );
        let integrations = write_temp("[]\n");

        let registry = YamlProviderRegistry::load(providers.path(), integrations.path()).unwrap();
        let resolved = registry.providers.get("github-app").unwrap();
        assert_eq!(resolved.name, "github-app");
        assert_eq!(resolved.auth_mode, AuthMode::Oauth2);
    }

    #[test]
    fn alias_cycle_is_rejected() {
        let providers = write_temp(
            r#"
a:
  alias: b
b:
  alias: a
"#,
        );
        let integrations = write_temp("[]\n");
        assert!(YamlProviderRegistry::load(providers.path(), integrations.path()).is_err());
    }
}
