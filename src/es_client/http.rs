//! reqwest-backed implementation of the Elasticsearch client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use super::types::{
    ClusterRoutingAllocation, Health, License, LicenseResponse, LicenseUpdateRequest,
    LicenseUpdateResponse, Nodes, Shard,
};
use super::{AllocationSetter, EsClient, EsClientFactory, ShardLister};
use crate::crd::{naming, Elasticsearch};
use crate::error::{Error, Result};

const ELASTIC_USER: &str = "elastic";
const HTTP_PORT: u16 = 9200;

/// Basic auth credentials
#[derive(Clone)]
pub struct EsCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for EsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Client for the Elasticsearch HTTP API
#[derive(Clone, Debug)]
pub struct HttpEsClient {
    http_client: reqwest::Client,
    base_url: String,
    credentials: Option<EsCredentials>,
    timeout: Duration,
}

impl HttpEsClient {
    /// Create a client for `base_url`
    ///
    /// `ca_pem` is trusted in addition to the system roots, which is what the
    /// operator-managed HTTP certificates need.
    pub fn new(
        base_url: &str,
        credentials: Option<EsCredentials>,
        ca_pem: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("elastic-operator/", env!("CARGO_PKG_VERSION")));
        if let Some(pem) = ca_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }

        Ok(Self {
            http_client: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> (RequestBuilder, String) {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http_client.request(method, &url);
        if let Some(creds) = &self.credentials {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }
        (req, url)
    }

    async fn send(&self, req: RequestBuilder, url: &str) -> Result<Response> {
        debug!("Sending request to {}", url);
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(self.timeout)
            } else {
                Error::HttpError(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!("Elasticsearch request to {} failed with status {}", url, status);
        Err(Error::ElasticsearchApi {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let (req, url) = self.request(Method::GET, path);
        let response = self.send(req.query(query), &url).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ShardLister for HttpEsClient {
    async fn get_shards(&self) -> Result<Vec<Shard>> {
        self.get_json("/_cat/shards", &[("format", "json")]).await
    }
}

#[async_trait]
impl AllocationSetter for HttpEsClient {
    async fn exclude_from_shard_allocation(&self, nodes: &str) -> Result<()> {
        let body = json!({
            "transient": {
                "cluster.routing.allocation.exclude._name": nodes
            }
        });
        let (req, url) = self.request(Method::PUT, "/_cluster/settings");
        self.send(req.json(&body), &url).await?;
        Ok(())
    }
}

#[async_trait]
impl EsClient for HttpEsClient {
    async fn get_nodes(&self) -> Result<Nodes> {
        self.get_json("/_nodes/_all/no-metrics", &[]).await
    }

    async fn get_cluster_health(&self, params: &[(&str, &str)]) -> Result<Health> {
        self.get_json("/_cluster/health", params).await
    }

    async fn get_cluster_routing_allocation(&self) -> Result<ClusterRoutingAllocation> {
        self.get_json("/_cluster/settings", &[]).await
    }

    async fn get_license(&self) -> Result<Option<License>> {
        let response: LicenseResponse = self.get_json("/_license", &[]).await?;
        Ok(response.license)
    }

    async fn update_license(
        &self,
        request: &LicenseUpdateRequest,
    ) -> Result<LicenseUpdateResponse> {
        let (req, url) = self.request(Method::PUT, "/_license");
        let response = self
            .send(req.query(&[("acknowledge", "true")]).json(request), &url)
            .await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Builds clients from the secrets the operator keeps next to each cluster
pub struct KubeEsClientFactory {
    client: Client,
    timeout: Duration,
}

impl KubeEsClientFactory {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
        secret.data.as_ref()?.get(key).map(|v| v.0.clone())
    }
}

#[async_trait]
impl EsClientFactory for KubeEsClientFactory {
    async fn client_for(&self, es: &Elasticsearch) -> Result<Arc<dyn EsClient>> {
        let namespace = es.namespace().unwrap_or_else(|| "default".to_string());
        let name = es.name_any();
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);

        let user_secret = secrets.get(&naming::elastic_user_secret(&name)).await?;
        let password = Self::secret_value(&user_secret, ELASTIC_USER).ok_or_else(|| {
            Error::ConfigError(format!(
                "secret {} has no {} entry",
                naming::elastic_user_secret(&name),
                ELASTIC_USER
            ))
        })?;
        let password = String::from_utf8(password)
            .map_err(|e| Error::ConfigError(format!("elastic user password is not UTF-8: {e}")))?;

        let ca = secrets
            .get_opt(&naming::http_certs_public_secret(&name))
            .await?
            .and_then(|s| Self::secret_value(&s, "ca.crt"));

        let url = format!(
            "https://{}.{}.svc:{}",
            naming::http_service(&name),
            namespace,
            HTTP_PORT
        );
        let client = HttpEsClient::new(
            &url,
            Some(EsCredentials {
                username: ELASTIC_USER.to_string(),
                password,
            }),
            ca.as_deref(),
            self.timeout,
        )?;
        Ok(Arc::new(client))
    }
}
