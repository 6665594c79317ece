//! Pluggable blob storage
//!
//! Documents are stored under an opaque storage key. Development uses the
//! local filesystem under the data directory; production targets any
//! S3-compatible endpoint (path-style requests, AWS Signature V4).

use std::path::PathBuf;

use chrono::Utc;
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use yiba_common::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Blob store seam; injected into app state as `Arc<dyn ObjectStore>`
pub trait ObjectStore: Send + Sync {
    fn put<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>>;
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

// =============================================================================
// Local filesystem store
// =============================================================================

/// Files under `<data_dir>/documents` keyed by relative path
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        // Keys are server-generated, but reject traversal anyway
        if key.is_empty() || key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(Error::InvalidInput(format!("invalid storage key: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

impl ObjectStore for LocalStore {
    fn put<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, bytes).await?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(Error::NotFound(format!("object {}", key)))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

// =============================================================================
// S3-compatible store
// =============================================================================

/// S3-compatible object store using path-style requests and SigV4
pub struct S3Store {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl S3Store {
    pub fn new(
        endpoint: String,
        bucket: String,
        region: String,
        access_key: String,
        secret_key: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
            region,
            access_key,
            secret_key,
        }
    }

    fn host(&self) -> Result<String> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("bad S3 endpoint: {}", e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config("S3 endpoint has no host".to_string()))?;
        Ok(match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    async fn request(&self, method: reqwest::Method, key: &str, body: Vec<u8>) -> Result<reqwest::Response> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let host = self.host()?;
        let canonical_uri = format!("/{}/{}", self.bucket, key);
        let payload_hash = sha256_hex(&body);

        let canonical_request = format!(
            "{}\n{}\n\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\nhost;x-amz-content-sha256;x-amz-date\n{}",
            method.as_str(),
            canonical_uri,
            host,
            payload_hash,
            amz_date,
            payload_hash
        );

        let scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(&self.secret_key, &date_stamp, &self.region, "s3");
        let signature = hex(&hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={}",
            self.access_key, scope, signature
        );

        let url = format!("{}{}", self.endpoint, canonical_uri);
        let response = self
            .client
            .request(method, &url)
            .header("host", &host)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .header("authorization", &authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("S3 request failed: {}", e)))?;
        Ok(response)
    }
}

impl ObjectStore for S3Store {
    fn put<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let response = self
                .request(reqwest::Method::PUT, key, bytes.to_vec())
                .await?;
            if !response.status().is_success() {
                return Err(Error::Internal(format!(
                    "S3 PUT {} returned {}",
                    key,
                    response.status()
                )));
            }
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let response = self.request(reqwest::Method::GET, key, Vec::new()).await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(Error::NotFound(format!("object {}", key)));
            }
            if !response.status().is_success() {
                return Err(Error::Internal(format!(
                    "S3 GET {} returned {}",
                    key,
                    response.status()
                )));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::Internal(format!("S3 body read failed: {}", e)))?;
            Ok(bytes.to_vec())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let response = self
                .request(reqwest::Method::DELETE, key, Vec::new())
                .await?;
            if !response.status().is_success()
                && response.status() != reqwest::StatusCode::NOT_FOUND
            {
                return Err(Error::Internal(format!(
                    "S3 DELETE {} returned {}",
                    key,
                    response.status()
                )));
            }
            Ok(())
        })
    }
}

// =============================================================================
// SigV4 primitives
// =============================================================================

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// AWS SigV4 signing key: HMAC chain over date, region, and service
fn derive_signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}
