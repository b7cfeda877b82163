use std::time::Duration;

use reqwest::Client;
use url::Url;

use super::client::normalize_key;
use super::{StorageError, StorageResult};

/// Maps stored keys to URLs under the public bucket domain.
#[derive(Debug, Clone)]
pub struct PublicUrlResolver {
    base: Url,
    http: Client,
}

impl PublicUrlResolver {
    pub fn new(base_url: &str) -> StorageResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|err| StorageError::Configuration(format!("public_base_url {base_url}: {err}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|err| StorageError::Configuration(err.to_string()))?;
        Ok(Self { base, http })
    }

    pub fn url_for(&self, key: &str) -> StorageResult<Url> {
        self.base
            .join(normalize_key(key))
            .map_err(|err| StorageError::Configuration(format!("cannot join {key}: {err}")))
    }

    /// HEAD request against the public URL; true on any 2xx.
    pub async fn probe(&self, key: &str) -> StorageResult<bool> {
        let url = self.url_for(key)?;
        match self.http.head(url.clone()).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(err) if err.is_timeout() || err.is_connect() => Err(StorageError::Transient {
                operation: "probe",
                key: key.to_string(),
                cause: if err.is_timeout() {
                    super::TransientCause::Timeout
                } else {
                    super::TransientCause::Dispatch
                },
                message: err.to_string(),
            }),
            Err(err) => Err(StorageError::Permanent {
                operation: "probe",
                key: key.to_string(),
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_keys_under_base_path() {
        let resolver = PublicUrlResolver::new("https://media.example.org/quran").unwrap();
        let url = resolver
            .url_for("/clips/maher-al-muaiqly/hafs-an-asim/saheeh-international/s1/a1-7/high.mp4")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://media.example.org/quran/clips/maher-al-muaiqly/hafs-an-asim/saheeh-international/s1/a1-7/high.mp4"
        );
    }

    #[test]
    fn rejects_relative_base() {
        assert!(matches!(
            PublicUrlResolver::new("media/clips"),
            Err(StorageError::Configuration(_))
        ));
    }
}
