use async_trait::async_trait;
use log::{ debug, warn };
use serde::Deserialize;
use std::time::Duration;

use crate::error::ClientError;
use crate::models::ModelRef;
use crate::transport::{ ApiRequest, Transport };

/// Read access to the models installed on the server.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Installed models. Unreachable servers yield an empty list, not an error.
    async fn list_models(&self) -> Vec<ModelRef>;

    async fn is_available(&self, model: &ModelRef) -> bool {
        availability(model, &self.list_models().await).is_available()
    }
}

/// How a requested model resolved against the installed list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Exact,
    /// Same family under a different spelling, e.g. `llama3.2` vs `llama3.2:latest`.
    Family(ModelRef),
    Missing,
}

impl Availability {
    pub fn is_available(&self) -> bool {
        !matches!(self, Availability::Missing)
    }
}

/// Exact match first, then family match. Both directions of the family rule
/// go through [`ModelRef::same_family`] so a bare name and a tagged name
/// always resolve the same way.
pub fn availability(requested: &ModelRef, installed: &[ModelRef]) -> Availability {
    if installed.iter().any(|m| m == requested) {
        return Availability::Exact;
    }
    match installed.iter().find(|m| m.same_family(requested)) {
        Some(found) => {
            debug!("'{}' matched installed model '{}' by family", requested, found);
            Availability::Family(found.clone())
        }
        None => Availability::Missing,
    }
}

/// Installed names that look like `requested`, best first.
pub fn suggest(requested: &ModelRef, installed: &[ModelRef], limit: usize) -> Vec<ModelRef> {
    let mut scored: Vec<(f64, &ModelRef)> = installed
        .iter()
        .map(|m| (strsim::jaro_winkler(requested.name(), m.name()), m))
        .filter(|(score, _)| *score >= 0.8)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
        .into_iter()
        .take(limit)
        .map(|(_, m)| m.clone())
        .collect()
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// [`ModelCatalog`] over `GET /api/tags`.
#[derive(Clone)]
pub struct ModelRegistry {
    transport: Transport,
    timeout: Duration,
}

impl ModelRegistry {
    pub fn new(transport: Transport, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    async fn fetch_tags(&self) -> Result<TagsResponse, ClientError> {
        let request = ApiRequest::get("/api/tags", self.timeout);
        let response = self.transport.send(&request).await?.error_for_status().await?;
        response.json::<TagsResponse>().await
    }
}

#[async_trait]
impl ModelCatalog for ModelRegistry {
    async fn list_models(&self) -> Vec<ModelRef> {
        match self.fetch_tags().await {
            Ok(tags) =>
                tags.models
                    .into_iter()
                    .map(|m| ModelRef::new(m.name))
                    .filter(|m| !m.is_empty())
                    .collect(),
            Err(e) => {
                warn!("Error fetching models: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedExchange;
    use crate::transport::{ ApiResponse, ExchangeError, RetryPolicy };
    use std::sync::Arc;

    fn refs(names: &[&str]) -> Vec<ModelRef> {
        names.iter().map(|n| ModelRef::new(n)).collect()
    }

    fn registry_with(script: Vec<Result<ApiResponse, ExchangeError>>) -> ModelRegistry {
        let exchange = Arc::new(ScriptedExchange::new(script));
        let transport = Transport::new(exchange, RetryPolicy::no_retry());
        ModelRegistry::new(transport, Duration::from_secs(30))
    }

    #[test]
    fn bare_name_matches_tagged_listing() {
        let requested = ModelRef::new("llama3.2");
        assert_eq!(
            availability(&requested, &refs(&["llama3.2:latest"])),
            Availability::Family(ModelRef::new("llama3.2:latest"))
        );
        assert_eq!(availability(&requested, &refs(&["llama3.2"])), Availability::Exact);
    }

    #[test]
    fn tagged_name_matches_bare_listing() {
        let requested = ModelRef::new("llama3.2:latest");
        assert!(availability(&requested, &refs(&["llama3.2"])).is_available());
        assert!(!availability(&requested, &refs(&["llama3.1:latest", "mistral"])).is_available());
    }

    #[test]
    fn family_is_not_a_raw_string_prefix() {
        let requested = ModelRef::new("llama3");
        assert_eq!(availability(&requested, &refs(&["llama3.2:latest"])), Availability::Missing);
    }

    #[test]
    fn suggests_close_names() {
        let installed = refs(&["llama3.2:latest", "llama3.1:8b", "mistral:7b"]);
        let suggestions = suggest(&ModelRef::new("lama3.2"), &installed, 2);
        assert_eq!(suggestions.first(), Some(&ModelRef::new("llama3.2:latest")));
        assert!(!suggestions.contains(&ModelRef::new("mistral:7b")));
    }

    #[tokio::test]
    async fn lists_installed_models() {
        let registry = registry_with(
            vec![
                Ok(
                    ApiResponse::from_bytes(
                        200,
                        r#"{"models":[{"name":"llama3.2:latest","size":1},{"name":"deepseek-r1:7b"}]}"#
                    )
                )
            ]
        );

        assert_eq!(registry.list_models().await, refs(&["llama3.2:latest", "deepseek-r1:7b"]));
    }

    #[tokio::test]
    async fn unreachable_server_yields_empty_list() {
        let registry = registry_with(vec![Err(ExchangeError::Connect("refused".into()))]);
        assert!(registry.list_models().await.is_empty());

        let registry = registry_with(vec![Ok(ApiResponse::from_bytes(404, "not found"))]);
        assert!(registry.list_models().await.is_empty());

        let registry = registry_with(vec![Ok(ApiResponse::from_bytes(200, "not json"))]);
        assert!(registry.list_models().await.is_empty());
    }

    #[tokio::test]
    async fn is_available_queries_the_server() {
        let registry = registry_with(
            vec![Ok(ApiResponse::from_bytes(200, r#"{"models":[{"name":"llama3.2:latest"}]}"#))]
        );
        assert!(registry.is_available(&ModelRef::new("llama3.2")).await);
    }
}
