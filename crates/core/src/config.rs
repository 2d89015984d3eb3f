//! CloudQuery configuration model and normalization
//!
//! Callers hand the sync task a heterogeneous list of config sources: inline
//! YAML mappings or URI strings pointing at YAML documents. This module turns
//! that list into a uniform, ordered list of [`ConfigDocument`]s and injects
//! the incremental backend options into source-kind documents when requested.
//!
//! Documents are immutable values: injection produces a new document rather
//! than mutating shared state, so caller-owned mappings are never aliased.

use crate::errors::{ConfigError, Result};
use crate::fetch::ContentFetcher;
use crate::state::INCREMENTAL_DB_FILENAME;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, instrument};

/// Table name used by the sync tool to persist per-source cursor state.
///
/// Compatibility key shared with state persisted by earlier releases; renaming
/// it would orphan existing incremental cursors.
pub const BACKEND_TABLE_NAME: &str = "kestra_incremental_table";

/// Connection reference pointing at the synthetic incremental destination.
pub const BACKEND_CONNECTION: &str = "@@plugins.kestra_incremental_db.connection";

/// Plugin name of the synthetic sqlite destination (must match the plugin
/// segment of [`BACKEND_CONNECTION`]).
pub const INCREMENTAL_DESTINATION_NAME: &str = "kestra_incremental_db";

/// One element of the caller-supplied `configs` list.
///
/// The union is tagged at the type level instead of sniffing runtime types:
/// YAML strings deserialize as `Reference`, YAML mappings as `Inline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigSource {
    /// A URI to a YAML document (http(s), file://, or a plain path)
    Reference(String),
    /// An already-structured config document
    Inline(Mapping),
}

impl ConfigSource {
    /// Convert a loose YAML value into a `ConfigSource`.
    ///
    /// This is the boundary where the legacy "is it a string or a map" branch
    /// surfaces: anything else fails with [`ConfigError::InvalidType`],
    /// carrying the offending list index.
    pub fn from_value(index: usize, value: Value) -> Result<Self> {
        match value {
            Value::String(uri) => Ok(ConfigSource::Reference(uri)),
            Value::Mapping(mapping) => Ok(ConfigSource::Inline(mapping)),
            other => Err(ConfigError::InvalidType {
                index,
                found: value_type_name(&other).to_string(),
            }
            .into()),
        }
    }

    /// Parse a single CLI-supplied string into a `ConfigSource`.
    ///
    /// Inline YAML mappings become `Inline`; anything that parses as a bare
    /// YAML string (URIs, file paths) becomes `Reference`.
    pub fn from_yaml_str(index: usize, input: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(input).map_err(|e| ConfigError::Resolution {
            index,
            uri: input.to_string(),
            message: format!("not valid YAML: {}", e),
        })?;
        Self::from_value(index, value)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// A single CloudQuery configuration document.
///
/// A thin, order-preserving wrapper over a YAML mapping with at least a
/// `kind` field (`"source"` or `"destination"`) and a `spec` field. Unknown
/// keys pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDocument(Mapping);

impl ConfigDocument {
    /// Wrap an existing mapping
    pub fn new(mapping: Mapping) -> Self {
        Self(mapping)
    }

    /// The document's `kind` field, if present and a string
    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(Value::as_str)
    }

    /// The document's `spec` mapping, if present and a mapping
    pub fn spec(&self) -> Option<&Mapping> {
        self.0.get("spec").and_then(Value::as_mapping)
    }

    /// Access the underlying mapping
    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    /// Serialize the document as a YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.0).map_err(|e| {
            ConfigError::Serialization {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Return a new document with `spec.backend_options` set to `backend`.
    ///
    /// No-op (plain clone) unless the document is source-kind, has a `spec`
    /// mapping, and that mapping does not already carry `backend_options` —
    /// an existing key is never overwritten.
    pub fn with_backend_options(&self, backend: &BackendOptions) -> ConfigDocument {
        if self.kind() != Some("source") {
            return self.clone();
        }
        let Some(spec) = self.spec() else {
            return self.clone();
        };
        if spec.contains_key("backend_options") {
            return self.clone();
        }

        let mut new_spec = spec.clone();
        new_spec.insert("backend_options".into(), backend.to_value());
        let mut mapping = self.0.clone();
        mapping.insert("spec".into(), Value::Mapping(new_spec));
        ConfigDocument(mapping)
    }
}

/// Per-source settings telling the sync tool where to persist incremental
/// cursor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendOptions {
    pub table_name: String,
    pub connection: String,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            table_name: BACKEND_TABLE_NAME.to_string(),
            connection: BACKEND_CONNECTION.to_string(),
        }
    }
}

impl BackendOptions {
    fn to_value(&self) -> Value {
        let mut mapping = Mapping::new();
        mapping.insert("table_name".into(), Value::String(self.table_name.clone()));
        mapping.insert("connection".into(), Value::String(self.connection.clone()));
        Value::Mapping(mapping)
    }
}

/// The synthetic destination document appended in incremental mode.
///
/// Points the sync tool at an embedded sqlite database whose file lives in
/// the run workspace under the fixed incremental DB filename.
pub fn incremental_sqlite_destination() -> ConfigDocument {
    let mut inner = Mapping::new();
    inner.insert(
        "connection_string".into(),
        Value::String(INCREMENTAL_DB_FILENAME.to_string()),
    );

    let mut spec = Mapping::new();
    spec.insert(
        "name".into(),
        Value::String(INCREMENTAL_DESTINATION_NAME.to_string()),
    );
    spec.insert("path".into(), Value::String("cloudquery/sqlite".to_string()));
    spec.insert("version".into(), Value::String("v2.4.10".to_string()));
    spec.insert("spec".into(), Value::Mapping(inner));

    let mut mapping = Mapping::new();
    mapping.insert("kind".into(), Value::String("destination".to_string()));
    mapping.insert("spec".into(), Value::Mapping(spec));
    ConfigDocument(mapping)
}

/// Resolve a heterogeneous config list into a uniform document list.
///
/// Inline mappings are copied as-is; references are dereferenced through
/// `fetcher` and parsed as a single YAML document (only the first document of
/// a multi-document payload is taken). When `incremental` is set, source-kind
/// documents that lack `backend_options` gain `backend` in their `spec`.
///
/// Output order equals input order. No files are written and nothing is
/// executed; failures abort before any tool invocation.
#[instrument(skip(fetcher, sources, backend), fields(count = sources.len()))]
pub async fn normalize(
    fetcher: &dyn ContentFetcher,
    sources: &[ConfigSource],
    incremental: bool,
    backend: &BackendOptions,
) -> Result<Vec<ConfigDocument>> {
    let mut documents = Vec::with_capacity(sources.len());

    for (index, source) in sources.iter().enumerate() {
        let document = match source {
            ConfigSource::Inline(mapping) => ConfigDocument::new(mapping.clone()),
            ConfigSource::Reference(uri) => {
                let bytes =
                    fetcher
                        .dereference(uri)
                        .await
                        .map_err(|e| ConfigError::Resolution {
                            index,
                            uri: uri.clone(),
                            message: e.to_string(),
                        })?;
                parse_first_document(index, uri, &bytes)?
            }
        };

        let document = if incremental {
            document.with_backend_options(backend)
        } else {
            document
        };
        documents.push(document);
    }

    debug!(documents = documents.len(), incremental, "Normalized configs");
    Ok(documents)
}

/// Parse the first YAML document of a dereferenced payload.
///
/// Multi-document streams are not split here; trailing documents are ignored.
fn parse_first_document(index: usize, uri: &str, bytes: &[u8]) -> Result<ConfigDocument> {
    let resolution_error = |message: String| ConfigError::Resolution {
        index,
        uri: uri.to_string(),
        message,
    };

    let mut stream = serde_yaml::Deserializer::from_slice(bytes);
    let first = stream
        .next()
        .ok_or_else(|| resolution_error("empty document".to_string()))?;
    ConfigDocument::deserialize(first)
        .map_err(|e| resolution_error(format!("not a YAML mapping: {}", e)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CqTaskError;
    use crate::fetch::ContentFetcher;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// In-memory fetcher keyed by URI
    struct StubFetcher {
        content: HashMap<String, Vec<u8>>,
    }

    impl StubFetcher {
        fn new() -> Self {
            Self {
                content: HashMap::new(),
            }
        }

        fn with(mut self, uri: &str, body: &str) -> Self {
            self.content.insert(uri.to_string(), body.as_bytes().to_vec());
            self
        }
    }

    #[async_trait]
    impl ContentFetcher for StubFetcher {
        async fn dereference(&self, uri: &str) -> anyhow::Result<Vec<u8>> {
            self.content
                .get(uri)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unresolvable URI: {}", uri))
        }
    }

    fn source_doc() -> Mapping {
        serde_yaml::from_str(
            r#"
            kind: source
            spec:
              name: aws
              path: cloudquery/aws
              version: v22.14.0
              tables: ["aws_s3*"]
              destinations: ["file"]
              spec: {}
            "#,
        )
        .unwrap()
    }

    fn destination_doc() -> Mapping {
        serde_yaml::from_str(
            r#"
            kind: destination
            spec:
              name: file
              path: cloudquery/file
              version: v3.4.8
              spec:
                path: ./out.json
                format: json
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_normalize_inline_preserves_order_and_length() {
        let fetcher = StubFetcher::new();
        let sources = vec![
            ConfigSource::Inline(destination_doc()),
            ConfigSource::Inline(source_doc()),
        ];

        let documents = normalize(&fetcher, &sources, false, &BackendOptions::default())
            .await
            .unwrap();

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].kind(), Some("destination"));
        assert_eq!(documents[1].kind(), Some("source"));
        // Without incremental mode the documents pass through unchanged
        assert_eq!(documents[0].as_mapping(), &destination_doc());
        assert_eq!(documents[1].as_mapping(), &source_doc());
    }

    #[tokio::test]
    async fn test_normalize_injects_backend_options_into_sources() {
        let fetcher = StubFetcher::new();
        let sources = vec![
            ConfigSource::Inline(destination_doc()),
            ConfigSource::Inline(source_doc()),
        ];

        let documents = normalize(&fetcher, &sources, true, &BackendOptions::default())
            .await
            .unwrap();

        // Destination untouched
        assert_eq!(documents[0].as_mapping(), &destination_doc());

        // Source gains the backend_options block
        let spec = documents[1].spec().unwrap();
        let backend = spec.get("backend_options").unwrap().as_mapping().unwrap();
        assert_eq!(
            backend.get("table_name").unwrap().as_str(),
            Some(BACKEND_TABLE_NAME)
        );
        assert_eq!(
            backend.get("connection").unwrap().as_str(),
            Some(BACKEND_CONNECTION)
        );
    }

    #[tokio::test]
    async fn test_normalize_does_not_mutate_caller_input() {
        let fetcher = StubFetcher::new();
        let original = source_doc();
        let sources = vec![ConfigSource::Inline(original.clone())];

        let _ = normalize(&fetcher, &sources, true, &BackendOptions::default())
            .await
            .unwrap();

        // Caller's mapping is unchanged even though injection happened
        assert_eq!(sources, vec![ConfigSource::Inline(original)]);
    }

    #[test]
    fn test_existing_backend_options_not_overwritten() {
        let mapping: Mapping = serde_yaml::from_str(
            r#"
            kind: source
            spec:
              name: hackernews
              backend_options:
                table_name: my_cursor
                connection: elsewhere
            "#,
        )
        .unwrap();
        let document = ConfigDocument::new(mapping.clone());

        let injected = document.with_backend_options(&BackendOptions::default());
        assert_eq!(injected.as_mapping(), &mapping);
    }

    #[test]
    fn test_backend_options_noop_without_spec() {
        let mut mapping = Mapping::new();
        mapping.insert("kind".into(), Value::String("source".to_string()));
        let document = ConfigDocument::new(mapping.clone());

        let injected = document.with_backend_options(&BackendOptions::default());
        assert_eq!(injected.as_mapping(), &mapping);
    }

    #[tokio::test]
    async fn test_normalize_resolves_references() {
        let fetcher = StubFetcher::new().with(
            "https://example.com/destination.yml",
            "kind: destination\nspec:\n  name: file\n",
        );
        let sources = vec![ConfigSource::Reference(
            "https://example.com/destination.yml".to_string(),
        )];

        let documents = normalize(&fetcher, &sources, false, &BackendOptions::default())
            .await
            .unwrap();

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].kind(), Some("destination"));
    }

    #[tokio::test]
    async fn test_normalize_takes_first_document_of_multi_doc_payload() {
        let fetcher = StubFetcher::new().with(
            "configs.yml",
            "kind: source\nspec:\n  name: aws\n---\nkind: destination\nspec:\n  name: file\n",
        );
        let sources = vec![ConfigSource::Reference("configs.yml".to_string())];

        let documents = normalize(&fetcher, &sources, false, &BackendOptions::default())
            .await
            .unwrap();

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].kind(), Some("source"));
    }

    #[tokio::test]
    async fn test_normalize_unresolvable_reference_fails() {
        let fetcher = StubFetcher::new();
        let sources = vec![
            ConfigSource::Inline(destination_doc()),
            ConfigSource::Reference("not-a-valid-uri".to_string()),
        ];

        let error = normalize(&fetcher, &sources, false, &BackendOptions::default())
            .await
            .unwrap_err();

        match error {
            CqTaskError::Config(ConfigError::Resolution { index, uri, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(uri, "not-a-valid-uri");
            }
            other => panic!("expected resolution error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_normalize_unparseable_payload_fails() {
        let fetcher = StubFetcher::new().with("bad.yml", "- just\n- a\n- list\n");
        let sources = vec![ConfigSource::Reference("bad.yml".to_string())];

        let error = normalize(&fetcher, &sources, false, &BackendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            CqTaskError::Config(ConfigError::Resolution { index: 0, .. })
        ));
    }

    #[test]
    fn test_config_source_from_value() {
        let source = ConfigSource::from_value(0, Value::String("a.yml".to_string())).unwrap();
        assert_eq!(source, ConfigSource::Reference("a.yml".to_string()));

        let source = ConfigSource::from_value(0, Value::Mapping(source_doc())).unwrap();
        assert!(matches!(source, ConfigSource::Inline(_)));

        let error = ConfigSource::from_value(2, Value::Sequence(vec![])).unwrap_err();
        match error {
            CqTaskError::Config(ConfigError::InvalidType { index, found }) => {
                assert_eq!(index, 2);
                assert_eq!(found, "sequence");
            }
            other => panic!("expected invalid type error, got {:?}", other),
        }
    }

    #[test]
    fn test_config_source_from_yaml_str() {
        let source = ConfigSource::from_yaml_str(0, "sources.yml").unwrap();
        assert_eq!(source, ConfigSource::Reference("sources.yml".to_string()));

        let source = ConfigSource::from_yaml_str(0, "kind: source\nspec: {}").unwrap();
        assert!(matches!(source, ConfigSource::Inline(_)));
    }

    #[test]
    fn test_config_source_list_deserialization() {
        // Mixed YAML lists deserialize directly into the tagged union
        let sources: Vec<ConfigSource> =
            serde_yaml::from_str("- sources.yml\n- kind: destination\n  spec: {}\n").unwrap();
        assert_eq!(sources.len(), 2);
        assert!(matches!(sources[0], ConfigSource::Reference(_)));
        assert!(matches!(sources[1], ConfigSource::Inline(_)));
    }

    #[test]
    fn test_incremental_sqlite_destination_shape() {
        let document = incremental_sqlite_destination();
        assert_eq!(document.kind(), Some("destination"));

        let spec = document.spec().unwrap();
        assert_eq!(
            spec.get("name").unwrap().as_str(),
            Some(INCREMENTAL_DESTINATION_NAME)
        );
        assert_eq!(spec.get("path").unwrap().as_str(), Some("cloudquery/sqlite"));

        let inner = spec.get("spec").unwrap().as_mapping().unwrap();
        assert_eq!(
            inner.get("connection_string").unwrap().as_str(),
            Some(INCREMENTAL_DB_FILENAME)
        );
    }

    #[test]
    fn test_document_yaml_round_trip_preserves_key_order() {
        let document = ConfigDocument::new(source_doc());
        let yaml = document.to_yaml().unwrap();
        // `kind` was inserted first and serializes first
        assert!(yaml.trim_start().starts_with("kind:"));
    }
}
