use crate::{
    Error, Result,
    store::{ClusterStore, ObjectKey, ResourceKind},
};
use k8s_openapi::api::core::v1::ConfigMap;
use std::time::Duration;
use tracing::*;

pub const OPERATOR_CONFIG_MAP: &str = "codewind-operator";
pub const DEFAULT_CONFIG_MAP: &str = include_str!("../../deploy/codewind-configmap.yaml");

/// Operator wide settings stored in the `codewind-operator` config map
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    pub ingress_domain: String,
    pub storage_codewind_size: String,
    pub storage_keycloak_size: String,
    pub default_realm: String,
}

impl OperatorConfig {
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self> {
        let data = cm.data.clone().unwrap_or_default();
        let get = |key: &str| -> Result<String> {
            match data.get(key) {
                Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
                Some(_) => Err(Error::InvalidConfig(
                    OPERATOR_CONFIG_MAP.to_string(),
                    format!("{key} is empty"),
                )),
                None => Err(Error::MissingConfig(OPERATOR_CONFIG_MAP.to_string(), key.to_string())),
            }
        };
        Ok(Self {
            ingress_domain: get("ingressDomain")?,
            storage_codewind_size: get("storageCodewindSize")?,
            storage_keycloak_size: get("storageKeycloakSize")?,
            default_realm: get("defaultRealm")?,
        })
    }

    /// Read the config map, a missing one stalls every reconcile until it is fixed
    pub async fn load(store: &dyn ClusterStore, namespace: &str) -> Result<Self> {
        let key = ObjectKey::namespaced(ResourceKind::ConfigMap, namespace, OPERATOR_CONFIG_MAP);
        match store.get(&key).await? {
            Some(value) => {
                let cm: ConfigMap = serde_json::from_value(value)?;
                Self::from_config_map(&cm)
            }
            None => Err(Error::MissingConfig(
                format!("{namespace}/{OPERATOR_CONFIG_MAP}"),
                "data".to_string(),
            )),
        }
    }
}

/// Create the operator config map from the bundled defaults when it does not exist yet
pub async fn ensure_config_map(store: &dyn ClusterStore, namespace: &str) -> Result<bool> {
    let key = ObjectKey::namespaced(ResourceKind::ConfigMap, namespace, OPERATOR_CONFIG_MAP);
    if store.get(&key).await?.is_some() {
        debug!("operator config map {key} already present");
        return Ok(false);
    }
    let mut cm: ConfigMap = serde_yaml::from_str(DEFAULT_CONFIG_MAP)?;
    cm.metadata.namespace = Some(namespace.to_string());
    cm.metadata.name = Some(OPERATOR_CONFIG_MAP.to_string());
    match store.create(&key, &serde_json::to_value(&cm)?).await {
        Ok(_) => {
            info!("created operator config map {key} from defaults");
            Ok(true)
        }
        Err(e) if e.is_already_exists() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Process settings read from the environment at start
#[derive(Clone, Debug)]
pub struct OperatorSettings {
    pub namespace: String,
    pub pod_name: String,
    pub concurrency: u16,
    pub wait_attempts: u32,
    pub wait_interval: Duration,
    /// Keycloak instances deployed by the operator serve a self signed certificate
    pub insecure_identity_tls: bool,
    pub listen_addr: String,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            namespace: "codewind".to_string(),
            pod_name: "unknown".to_string(),
            concurrency: 4,
            wait_attempts: 500,
            wait_interval: Duration::from_secs(1),
            insecure_identity_tls: true,
            listen_addr: "0.0.0.0:9000".to_string(),
        }
    }
}

impl OperatorSettings {
    pub fn from_env(default_namespace: &str) -> Result<Self> {
        Self::from_lookup(default_namespace, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(default_namespace: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
            match raw {
                None => Ok(default),
                Some(v) => v
                    .parse()
                    .map_err(|_| Error::Other(format!("{key}={v} is not a valid value"))),
            }
        }
        let defaults = Self::default();
        Ok(Self {
            namespace: lookup("POD_NAMESPACE").unwrap_or_else(|| default_namespace.to_string()),
            pod_name: lookup("POD_NAME").unwrap_or(defaults.pod_name),
            concurrency: parse("RECONCILE_CONCURRENCY", lookup("RECONCILE_CONCURRENCY"), defaults.concurrency)?,
            wait_attempts: parse(
                "KEYCLOAK_WAIT_ATTEMPTS",
                lookup("KEYCLOAK_WAIT_ATTEMPTS"),
                defaults.wait_attempts,
            )?,
            wait_interval: Duration::from_secs(parse(
                "KEYCLOAK_WAIT_INTERVAL_SECS",
                lookup("KEYCLOAK_WAIT_INTERVAL_SECS"),
                defaults.wait_interval.as_secs(),
            )?),
            insecure_identity_tls: parse(
                "KEYCLOAK_INSECURE_TLS",
                lookup("KEYCLOAK_INSECURE_TLS"),
                defaults.insecure_identity_tls,
            )?,
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storemock::MemoryStore;
    use std::collections::{BTreeMap, HashMap};

    fn config_map(entries: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..ConfigMap::default()
        }
    }

    #[test]
    fn test_from_config_map() {
        let cm = config_map(&[
            ("ingressDomain", "apps.example.com"),
            ("storageCodewindSize", "10Gi"),
            ("storageKeycloakSize", "1Gi"),
            ("defaultRealm", "codewind"),
        ]);
        let cfg = OperatorConfig::from_config_map(&cm).unwrap();
        assert_eq!(cfg.ingress_domain, "apps.example.com");
        assert_eq!(cfg.default_realm, "codewind");
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let cm = config_map(&[("ingressDomain", "apps.example.com")]);
        let err = OperatorConfig::from_config_map(&cm).unwrap_err();
        assert!(matches!(err, Error::MissingConfig(_, ref k) if k == "storageCodewindSize"));
    }

    #[test]
    fn test_bundled_defaults_need_a_domain() {
        let cm: ConfigMap = serde_yaml::from_str(DEFAULT_CONFIG_MAP).unwrap();
        assert_eq!(cm.metadata.name.as_deref(), Some(OPERATOR_CONFIG_MAP));
        assert!(matches!(
            OperatorConfig::from_config_map(&cm),
            Err(Error::InvalidConfig(_, _))
        ));
    }

    #[tokio::test]
    async fn test_ensure_config_map_creates_once() {
        let store = MemoryStore::new();
        assert!(ensure_config_map(&store, "codewind").await.unwrap());
        assert!(!ensure_config_map(&store, "codewind").await.unwrap());
        assert_eq!(store.created().len(), 1);
        let err = OperatorConfig::load(&store, "other").await.unwrap_err();
        assert!(matches!(err, Error::MissingConfig(_, _)));
    }

    #[test]
    fn test_settings_from_lookup() {
        let env: HashMap<&str, &str> = [("POD_NAMESPACE", "cw-operator"), ("KEYCLOAK_WAIT_ATTEMPTS", "3")]
            .into_iter()
            .collect();
        let settings = OperatorSettings::from_lookup("default", |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.namespace, "cw-operator");
        assert_eq!(settings.wait_attempts, 3);
        assert_eq!(settings.concurrency, 4);

        let bad = OperatorSettings::from_lookup("default", |k| {
            (k == "RECONCILE_CONCURRENCY").then(|| "many".to_string())
        });
        assert!(bad.is_err());
    }
}
