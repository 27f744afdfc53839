pub mod spotify;
pub mod youtube;
pub mod ytdl;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single playable item.
///
/// Every track is reconstructable by calling [`Registry::extract`] on its
/// `source_url`; string fields are empty when the source has no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub source_url: String,
    /// Direct media URL; may expire, see `expires`.
    pub stream_url: String,
    pub title: String,
    pub playlist_url: String,
    pub playlist_title: String,
    pub description: String,
    pub uploader: String,
    /// Seconds; -1 when unknown.
    pub duration: i64,
    /// Instant after which `stream_url` must be re-fetched.
    pub expires: DateTime<Utc>,
    /// Search results only: upload comes from a verified artist channel.
    pub official_artist: bool,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            stream_url: String::new(),
            title: String::new(),
            playlist_url: String::new(),
            playlist_title: String::new(),
            description: String::new(),
            uploader: String::new(),
            duration: -1,
            expires: DateTime::<Utc>::MIN_UTC,
            official_artist: false,
        }
    }
}

/// One dynamically-typed configuration entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl ConfigValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "boolean",
            ConfigValue::Int(_) => "integer",
            ConfigValue::String(_) => "string",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

/// Per-provider key/value settings.
pub type ProviderConfig = BTreeMap<String, ConfigValue>;
/// Provider name to its settings; the persisted extractor table.
pub type Config = BTreeMap<String, ProviderConfig>;

/// Common surface of every registered provider.
pub trait Provider: Send + Sync {
    fn default_config(&self) -> ProviderConfig {
        ProviderConfig::new()
    }
}

#[async_trait]
pub trait Extractor: Provider {
    /// Whether this provider understands `input`.
    fn matches(&self, cfg: &ProviderConfig, input: &str) -> bool;
    async fn extract(&self, cfg: &ProviderConfig, input: &str) -> Result<Vec<Track>>;
}

#[async_trait]
pub trait Searcher: Provider {
    async fn search(&self, cfg: &ProviderConfig, input: &str) -> Result<Vec<Track>>;
}

#[async_trait]
pub trait Suggester: Provider {
    async fn suggest(&self, cfg: &ProviderConfig, input: &str) -> Result<Vec<String>>;
}

struct Named<T: ?Sized> {
    name: String,
    imp: Arc<T>,
}

/// Ordered provider registry; registration order is dispatch priority.
///
/// Built once at program start and shared read-only afterwards.
#[derive(Default)]
pub struct Registry {
    providers: Vec<Named<dyn Provider>>,
    extractors: Vec<Named<dyn Extractor>>,
    searchers: Vec<Named<dyn Searcher>>,
    suggesters: Vec<Named<dyn Suggester>>,
}

impl Registry {
    pub fn register_extractor<E>(&mut self, name: impl Into<String>, provider: Arc<E>)
    where
        E: Extractor + 'static,
    {
        let name = name.into();
        self.providers.push(Named {
            name: name.clone(),
            imp: provider.clone(),
        });
        self.extractors.push(Named { name, imp: provider });
    }

    pub fn register_searcher<S>(&mut self, name: impl Into<String>, provider: Arc<S>)
    where
        S: Searcher + 'static,
    {
        let name = name.into();
        self.providers.push(Named {
            name: name.clone(),
            imp: provider.clone(),
        });
        self.searchers.push(Named { name, imp: provider });
    }

    pub fn register_suggester<S>(&mut self, name: impl Into<String>, provider: Arc<S>)
    where
        S: Suggester + 'static,
    {
        let name = name.into();
        self.providers.push(Named {
            name: name.clone(),
            imp: provider.clone(),
        });
        self.suggesters.push(Named { name, imp: provider });
    }

    /// The merged defaults of every registered provider.
    pub fn default_config(&self) -> Config {
        self.providers
            .iter()
            .map(|p| (p.name.clone(), p.imp.default_config()))
            .collect()
    }

    /// Verifies that `cfg` covers every registered provider with
    /// correctly-typed values for all default keys. Unknown providers in
    /// `cfg` are ignored.
    pub fn check_validity(&self, cfg: &Config) -> Result<()> {
        for p in &self.providers {
            let user = cfg
                .get(&p.name)
                .ok_or_else(|| Error::MissingProvider(p.name.clone()))?;
            for (key, want) in p.imp.default_config() {
                let got = match user.get(&key) {
                    Some(value) => value.kind(),
                    None => "nothing",
                };
                if got != want.kind() {
                    return Err(Error::ConfigType {
                        provider: p.name.clone(),
                        key,
                        expected: want.kind(),
                        got,
                    });
                }
            }
        }
        Ok(())
    }

    /// Routes `input` to the first matching Extractor, falling back to the
    /// search provider and returning its first hit as a singleton.
    pub async fn extract(&self, cfg: &Config, input: &str) -> Result<Vec<Track>> {
        self.check_validity(cfg)?;
        let empty = ProviderConfig::new();
        for e in &self.extractors {
            let pcfg = cfg.get(&e.name).unwrap_or(&empty);
            if e.imp.matches(pcfg, input) {
                return e
                    .imp
                    .extract(pcfg, input)
                    .await
                    .map_err(|err| Error::provider(&e.name, err));
            }
        }
        let found = self.search(cfg, input).await?;
        let first = found.into_iter().next().ok_or(Error::NoSearchResults)?;
        Ok(vec![first])
    }

    /// The first registered Searcher decides; its error is not skipped.
    pub async fn search(&self, cfg: &Config, input: &str) -> Result<Vec<Track>> {
        self.check_validity(cfg)?;
        let empty = ProviderConfig::new();
        let s = self.searchers.first().ok_or(Error::NoSearchProvider)?;
        s.imp
            .search(cfg.get(&s.name).unwrap_or(&empty), input)
            .await
            .map_err(|err| Error::provider(&s.name, err))
    }

    /// The first registered Suggester decides; its error is not skipped.
    pub async fn suggest(&self, cfg: &Config, input: &str) -> Result<Vec<String>> {
        self.check_validity(cfg)?;
        let empty = ProviderConfig::new();
        let s = self.suggesters.first().ok_or(Error::NoSuggestionProvider)?;
        s.imp
            .suggest(cfg.get(&s.name).unwrap_or(&empty), input)
            .await
            .map_err(|err| Error::provider(&s.name, err))
    }
}

/// Builds the standard provider set in dispatch-priority order.
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::default();
    registry.register_extractor("spotify", Arc::new(spotify::SpotifyExtractor::new()));
    registry.register_extractor("youtube", Arc::new(youtube::YoutubeExtractor::new()));
    registry.register_extractor("youtube-dl", Arc::new(ytdl::YtdlExtractor::new()));
    registry.register_searcher("youtube-search", Arc::new(youtube::YoutubeSearcher::new()));
    registry.register_suggester(
        "youtube-search-suggestions",
        Arc::new(youtube::YoutubeSuggester::new()),
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticExtractor {
        prefix: &'static str,
        tracks: Vec<Track>,
    }

    impl Provider for StaticExtractor {
        fn default_config(&self) -> ProviderConfig {
            ProviderConfig::from([("enabled".to_string(), ConfigValue::Bool(true))])
        }
    }

    #[async_trait]
    impl Extractor for StaticExtractor {
        fn matches(&self, _cfg: &ProviderConfig, input: &str) -> bool {
            input.starts_with(self.prefix)
        }

        async fn extract(&self, _cfg: &ProviderConfig, _input: &str) -> Result<Vec<Track>> {
            Ok(self.tracks.clone())
        }
    }

    struct FailingExtractor;

    impl Provider for FailingExtractor {}

    #[async_trait]
    impl Extractor for FailingExtractor {
        fn matches(&self, _cfg: &ProviderConfig, input: &str) -> bool {
            input.starts_with("fail:")
        }

        async fn extract(&self, _cfg: &ProviderConfig, _input: &str) -> Result<Vec<Track>> {
            Err(Error::InvalidInput)
        }
    }

    struct StaticSearcher {
        tracks: Vec<Track>,
    }

    impl Provider for StaticSearcher {}

    #[async_trait]
    impl Searcher for StaticSearcher {
        async fn search(&self, _cfg: &ProviderConfig, _input: &str) -> Result<Vec<Track>> {
            Ok(self.tracks.clone())
        }
    }

    fn track(title: &str) -> Track {
        Track {
            source_url: format!("test:{title}"),
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::default();
        registry.register_extractor(
            "first",
            Arc::new(StaticExtractor {
                prefix: "shared:",
                tracks: vec![track("from first")],
            }),
        );
        registry.register_extractor(
            "second",
            Arc::new(StaticExtractor {
                prefix: "shared:",
                tracks: vec![track("from second")],
            }),
        );
        registry.register_extractor("failing", Arc::new(FailingExtractor));
        registry.register_searcher(
            "finder",
            Arc::new(StaticSearcher {
                tracks: vec![track("hit one"), track("hit two")],
            }),
        );
        registry
    }

    #[tokio::test]
    async fn dispatches_in_registration_order() {
        let registry = registry();
        let cfg = registry.default_config();
        let tracks = registry.extract(&cfg, "shared:xyz").await.unwrap();
        assert_eq!(tracks[0].title, "from first");
    }

    #[tokio::test]
    async fn falls_back_to_search_with_a_singleton() {
        let registry = registry();
        let cfg = registry.default_config();
        let tracks = registry.extract(&cfg, "plain text query").await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "hit one");
    }

    #[tokio::test]
    async fn empty_search_results_are_an_error() {
        let mut registry = Registry::default();
        registry.register_searcher("finder", Arc::new(StaticSearcher { tracks: vec![] }));
        let cfg = registry.default_config();
        assert!(matches!(
            registry.extract(&cfg, "whatever").await,
            Err(Error::NoSearchResults)
        ));
    }

    #[tokio::test]
    async fn no_searcher_registered_is_an_error() {
        let registry = Registry::default();
        assert!(matches!(
            registry.search(&Config::new(), "x").await,
            Err(Error::NoSearchProvider)
        ));
    }

    #[tokio::test]
    async fn wraps_provider_errors_with_the_name() {
        let registry = registry();
        let cfg = registry.default_config();
        match registry.extract(&cfg, "fail:xyz").await {
            Err(Error::Provider { provider, source }) => {
                assert_eq!(provider, "failing");
                assert!(matches!(*source, Error::InvalidInput));
            }
            other => panic!("expected a wrapped provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_provider_fails_validity() {
        let registry = registry();
        let mut cfg = registry.default_config();
        cfg.remove("first");
        assert!(matches!(
            registry.extract(&cfg, "shared:x").await,
            Err(Error::MissingProvider(name)) if name == "first"
        ));
    }

    #[test]
    fn wrong_value_type_fails_validity() {
        let registry = registry();
        let mut cfg = registry.default_config();
        cfg.get_mut("first")
            .unwrap()
            .insert("enabled".to_string(), ConfigValue::Int(1));
        match registry.check_validity(&cfg) {
            Err(Error::ConfigType {
                provider,
                key,
                expected,
                got,
            }) => {
                assert_eq!(provider, "first");
                assert_eq!(key, "enabled");
                assert_eq!(expected, "boolean");
                assert_eq!(got, "integer");
            }
            other => panic!("expected a type error, got {other:?}"),
        }
    }

    #[test]
    fn missing_key_fails_validity() {
        let registry = registry();
        let mut cfg = registry.default_config();
        cfg.get_mut("second").unwrap().remove("enabled");
        assert!(matches!(
            registry.check_validity(&cfg),
            Err(Error::ConfigType { got: "nothing", .. })
        ));
    }

    #[test]
    fn unknown_user_providers_are_ignored() {
        let registry = registry();
        let mut cfg = registry.default_config();
        cfg.insert("someone-else".to_string(), ProviderConfig::new());
        assert!(registry.check_validity(&cfg).is_ok());
    }
}
