//! Client configuration.
//!
//! The store endpoint always comes from configuration; nothing in the workspace carries a
//! default connection string.

use std::env;

use crate::error::{DocumentStoreError, DocumentStoreResult};

pub const URI_VAR: &str = "DOCSTORE_URI";
pub const DATABASE_VAR: &str = "DOCSTORE_DATABASE";
pub const COLLECTION_VAR: &str = "DOCSTORE_COLLECTION";
pub const APP_NAME_VAR: &str = "DOCSTORE_APP_NAME";
pub const STRICT_API_VAR: &str = "DOCSTORE_STRICT_API";

const DEFAULT_DATABASE: &str = "sample_restaurants";
const DEFAULT_COLLECTION: &str = "restaurants";

/// Connection settings for a remote document store.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Connection string of the store.
    pub uri: String,
    /// Database holding the collections.
    pub database: String,
    /// Collection used when the application does not name one.
    pub collection: String,
    /// Application name reported to the server.
    pub app_name: Option<String>,
    /// Pin the server API version and reject commands outside it.
    pub strict_api: bool,
}

impl ClientConfig {
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        ClientConfig {
            uri: uri.into(),
            database: database.into(),
            collection: DEFAULT_COLLECTION.to_string(),
            app_name: None,
            strict_api: true,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_strict_api(mut self, strict_api: bool) -> Self {
        self.strict_api = strict_api;
        self
    }

    /// Reads the configuration from the process environment, after loading a `.env` file
    /// if one is present.
    ///
    /// # Errors
    ///
    /// `Initialization` if `DOCSTORE_URI` is unset or a value cannot be parsed.
    pub fn from_env() -> DocumentStoreResult<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DocumentStoreResult<Self> {
        let uri = lookup(URI_VAR)
            .filter(|uri| !uri.trim().is_empty())
            .ok_or_else(|| DocumentStoreError::Initialization(format!("{URI_VAR} is not set")))?;

        let strict_api = match lookup(STRICT_API_VAR) {
            None => true,
            Some(value) => match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(DocumentStoreError::Initialization(format!(
                        "{STRICT_API_VAR} must be a boolean, got '{other}'"
                    )));
                }
            },
        };

        Ok(ClientConfig {
            uri,
            database: lookup(DATABASE_VAR).unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            collection: lookup(COLLECTION_VAR).unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            app_name: lookup(APP_NAME_VAR),
            strict_api,
        })
    }
}
