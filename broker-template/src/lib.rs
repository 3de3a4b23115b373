use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_.]+)\}").unwrap());

/// `${dotted.path}` token substitution against a JSON context tree. The
/// legacy `${connectionConfig.X}` spelling is an alias for `${X}`; both
/// resolve against the same context.
pub struct Interpolator<'a> {
    ctx: &'a Value,
}

impl<'a> Interpolator<'a> {
    pub fn new(ctx: &'a Value) -> Self {
        Self { ctx }
    }

    /// Returns every `${...}` path in `template` that does not resolve
    /// against the context. An empty vec means the template is ready to
    /// interpolate.
    pub fn missing_keys(&self, template: &str) -> Vec<String> {
        TOKEN
            .captures_iter(template)
            .filter_map(|cap| {
                let path = &cap[1];
                if self.resolve(path).is_none() {
                    Some(path.to_string())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Substitutes every token in `template`. Fails with the set of unresolved
    /// paths rather than silently leaving a blank behind.
    pub fn interpolate(&self, template: &str, url_encode: bool) -> Result<String, Vec<String>> {
        let missing = self.missing_keys(template);
        if !missing.is_empty() {
            return Err(missing);
        }
        let replaced = TOKEN.replace_all(template, |cap: &regex::Captures| {
            let path = &cap[1];
            let value = self.resolve(path).expect("checked above");
            let rendered = render_scalar(&value);
            if url_encode {
                url::form_urlencoded::byte_serialize(rendered.as_bytes()).collect()
            } else {
                rendered
            }
        });
        Ok(replaced.into_owned())
    }

    /// Interpolates every value of a flat string map, collecting all missing
    /// keys across all entries before failing.
    pub fn interpolate_map(
        &self,
        map: &HashMap<String, String>,
        url_encode: bool,
    ) -> Result<HashMap<String, String>, Vec<String>> {
        let mut out = HashMap::with_capacity(map.len());
        let mut missing = Vec::new();
        for (k, template) in map {
            match self.interpolate(template, url_encode) {
                Ok(v) => {
                    out.insert(k.clone(), v);
                }
                Err(mut keys) => missing.append(&mut keys),
            }
        }
        if missing.is_empty() {
            Ok(out)
        } else {
            Err(missing)
        }
    }

    fn resolve(&self, path: &str) -> Option<Value> {
        let path = path
            .strip_prefix("connectionConfig.")
            .unwrap_or(path);
        let mut cur = self.ctx;
        for segment in path.split('.') {
            cur = cur.get(segment)?;
        }
        Some(cur.clone())
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_dotted_path() {
        let ctx = json!({"subdomain": "acme", "nested": {"id": "42"}});
        let interp = Interpolator::new(&ctx);
        assert_eq!(
            interp
                .interpolate("https://${subdomain}.api.com/v/${nested.id}", false)
                .unwrap(),
            "https://acme.api.com/v/42"
        );
    }

    #[test]
    fn legacy_connection_config_alias() {
        let ctx = json!({"subdomain": "acme"});
        let interp = Interpolator::new(&ctx);
        assert_eq!(
            interp
                .interpolate("${connectionConfig.subdomain}", false)
                .unwrap(),
            "acme"
        );
    }

    #[test]
    fn missing_key_is_reported_not_blanked() {
        let ctx = json!({});
        let interp = Interpolator::new(&ctx);
        let missing = interp.missing_keys("https://${subdomain}.api.com/oauth/token");
        assert_eq!(missing, vec!["subdomain".to_string()]);
        assert!(interp
            .interpolate("https://${subdomain}.api.com/oauth/token", false)
            .is_err());
    }

    #[test]
    fn url_encodes_substituted_value_only() {
        let ctx = json!({"q": "a b/c"});
        let interp = Interpolator::new(&ctx);
        assert_eq!(
            interp.interpolate("https://x.com/${q}/path", true).unwrap(),
            "https://x.com/a+b%2Fc/path"
        );
    }

    #[test]
    fn interpolation_is_idempotent() {
        let ctx = json!({"a": "1"});
        let interp = Interpolator::new(&ctx);
        let once = interp.interpolate("${a}-${a}", false).unwrap();
        let twice = interp.interpolate(&once, false).unwrap();
        assert_eq!(once, twice);
    }
}
