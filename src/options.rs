//! Audio stream options (C5): the query-string parameters attached to a
//! Deepgram live-transcription connect URL.

use crate::error::{DeepgramPoolError, Result};
use std::fmt::Write as _;

/// Audio stream options serialized into the connect URL's query string.
///
/// Every field is optional; only fields that were set are emitted. Setters
/// validate positive-integer fields and return `Self` for chaining, matching
/// the builder style used for the streaming request in this codebase's
/// WebSocket client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioStreamOptions {
    encoding: Option<String>,
    sample_rate: Option<u32>,
    channels: Option<u32>,
    language: Option<String>,
    model: Option<String>,
    punctuate: Option<bool>,
    interim_results: Option<bool>,
    diarize: Option<bool>,
    tier: Option<String>,
    version: Option<String>,
}

impl AudioStreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Result<Self> {
        let encoding = encoding.into();
        if encoding.is_empty() {
            return Err(DeepgramPoolError::InvalidArgument(
                "encoding must not be empty".to_string(),
            ));
        }
        self.encoding = Some(encoding);
        Ok(self)
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(DeepgramPoolError::InvalidArgument(
                "sample_rate must be positive".to_string(),
            ));
        }
        self.sample_rate = Some(sample_rate);
        Ok(self)
    }

    pub fn channels(mut self, channels: u32) -> Result<Self> {
        if channels == 0 {
            return Err(DeepgramPoolError::InvalidArgument(
                "channels must be positive".to_string(),
            ));
        }
        self.channels = Some(channels);
        Ok(self)
    }

    pub fn language(mut self, language: impl Into<String>) -> Result<Self> {
        let language = language.into();
        if language.is_empty() {
            return Err(DeepgramPoolError::InvalidArgument(
                "language must not be empty".to_string(),
            ));
        }
        self.language = Some(language);
        Ok(self)
    }

    pub fn model(mut self, model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        if model.is_empty() {
            return Err(DeepgramPoolError::InvalidArgument(
                "model must not be empty".to_string(),
            ));
        }
        self.model = Some(model);
        Ok(self)
    }

    pub fn punctuate(mut self, punctuate: bool) -> Self {
        self.punctuate = Some(punctuate);
        self
    }

    pub fn interim_results(mut self, interim_results: bool) -> Self {
        self.interim_results = Some(interim_results);
        self
    }

    pub fn diarize(mut self, diarize: bool) -> Self {
        self.diarize = Some(diarize);
        self
    }

    pub fn tier(mut self, tier: impl Into<String>) -> Result<Self> {
        let tier = tier.into();
        if tier.is_empty() {
            return Err(DeepgramPoolError::InvalidArgument(
                "tier must not be empty".to_string(),
            ));
        }
        self.tier = Some(tier);
        Ok(self)
    }

    pub fn version(mut self, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        if version.is_empty() {
            return Err(DeepgramPoolError::InvalidArgument(
                "version must not be empty".to_string(),
            ));
        }
        self.version = Some(version);
        Ok(self)
    }

    /// Serialize to a query string, order-agnostic and only including the
    /// fields that are present. Each pair is `key=value`, joined by `&`.
    pub fn to_query_string(&self) -> String {
        let mut pairs = Vec::new();

        if let Some(v) = &self.encoding {
            pairs.push(format!("encoding={v}"));
        }
        if let Some(v) = self.sample_rate {
            pairs.push(format!("sample_rate={v}"));
        }
        if let Some(v) = self.channels {
            pairs.push(format!("channels={v}"));
        }
        if let Some(v) = &self.language {
            pairs.push(format!("language={v}"));
        }
        if let Some(v) = &self.model {
            pairs.push(format!("model={v}"));
        }
        if let Some(v) = self.punctuate {
            pairs.push(format!("punctuate={v}"));
        }
        if let Some(v) = self.interim_results {
            pairs.push(format!("interim_results={v}"));
        }
        if let Some(v) = self.diarize {
            pairs.push(format!("diarize={v}"));
        }
        if let Some(v) = &self.tier {
            pairs.push(format!("tier={v}"));
        }
        if let Some(v) = &self.version {
            pairs.push(format!("version={v}"));
        }

        pairs.join("&")
    }

    /// Append this option set's query string onto `base_url`, prefixing with
    /// `?` if `base_url` has no query component yet, else `&`.
    pub fn append_to_url(&self, base_url: &str) -> Result<String> {
        let query = self.to_query_string();
        if query.is_empty() {
            return Ok(base_url.to_string());
        }

        let mut url = base_url.to_string();
        let sep = if base_url.contains('?') { '&' } else { '?' };
        write!(url, "{sep}{query}").expect("writing to a String cannot fail");
        Ok(url)
    }

    /// Parse a query string produced by [`Self::to_query_string`] back into
    /// an `AudioStreamOptions`.
    pub fn from_query_string(query: &str) -> Result<Self> {
        let mut options = Self::default();
        if query.is_empty() {
            return Ok(options);
        }

        for pair in query.trim_start_matches('?').split('&') {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            match key {
                "encoding" => options.encoding = Some(value.to_string()),
                "sample_rate" => {
                    options.sample_rate = Some(value.parse().map_err(|_| {
                        DeepgramPoolError::InvalidArgument(format!(
                            "invalid sample_rate: {value}"
                        ))
                    })?)
                }
                "channels" => {
                    options.channels = Some(value.parse().map_err(|_| {
                        DeepgramPoolError::InvalidArgument(format!("invalid channels: {value}"))
                    })?)
                }
                "language" => options.language = Some(value.to_string()),
                "model" => options.model = Some(value.to_string()),
                "punctuate" => options.punctuate = Some(value == "true"),
                "interim_results" => options.interim_results = Some(value == "true"),
                "diarize" => options.diarize = Some(value == "true"),
                "tier" => options.tier = Some(value.to_string()),
                "version" => options.version = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(options)
    }
}
