#![forbid(unsafe_code)]

use std::time::Instant;

use fleet_core::query::{QueryRequest, QueryResponse};
use fleet_core::{Collection, Row, RowId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{check_fuel_threshold, ApiConfig, ErrorBody, FleetApi, FleetError, FleetResult};

/// REST client for the fleet backend.
#[derive(Clone)]
pub struct HttpApi {
    cfg: ApiConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct Created {
    id: RowId,
}

#[derive(Deserialize)]
struct Count {
    count: u64,
}

impl HttpApi {
    pub fn new(cfg: ApiConfig) -> FleetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| FleetError::Transport(e.to_string()))?;
        Ok(Self { cfg, client })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.cfg
    }

    /// Send, map non-2xx to `FleetError`, return the raw body.
    async fn send(&self, op: &'static str, collection: Collection, req: reqwest::RequestBuilder) -> FleetResult<Vec<u8>> {
        let t0 = Instant::now();
        let resp = req.send().await.map_err(map_transport)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(map_transport)?;
        debug!(op, collection = %collection, status = status.as_u16(), took_ms = %t0.elapsed().as_millis(), "fleet api call");
        if status.is_success() {
            return Ok(body.to_vec());
        }
        let err = serde_json::from_slice::<ErrorBody>(&body).unwrap_or_default().into_error(status.as_u16());
        warn!(op, collection = %collection, error = %err, "fleet api call failed");
        Err(err)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        op: &'static str,
        collection: Collection,
        req: reqwest::RequestBuilder,
    ) -> FleetResult<T> {
        let body = self.send(op, collection, req).await?;
        serde_json::from_slice(&body).map_err(|e| FleetError::Decode(e.to_string()))
    }
}

fn map_transport(e: reqwest::Error) -> FleetError {
    if e.is_timeout() {
        FleetError::Timeout
    } else if e.is_decode() {
        FleetError::Decode(e.to_string())
    } else {
        FleetError::Transport(e.to_string())
    }
}

#[async_trait::async_trait]
impl FleetApi for HttpApi {
    async fn query_rows(&self, collection: Collection, req: &QueryRequest) -> FleetResult<QueryResponse> {
        let url = self.cfg.rest_url(collection, "/query");
        let t0 = Instant::now();
        let out: FleetResult<QueryResponse> = self.send_json("query", collection, self.client.post(url).json(req)).await;
        metrics::histogram!("fleet_api_query_ms", t0.elapsed().as_secs_f64() * 1000.0, "collection" => collection.rest_segment());
        out
    }

    async fn search(&self, collection: Collection, query: &str, limit: usize) -> FleetResult<Vec<Row>> {
        let url = self.cfg.rest_url(collection, "/search");
        let req = self.client.get(url).query(&[("q", query.to_string()), ("limit", limit.to_string())]);
        let items: Vec<Value> = self.send_json("search", collection, req).await?;
        // Anything that is not an object cannot be labelled or selected.
        Ok(items.into_iter().filter(|v| v.is_object()).map(Row::from).collect())
    }

    async fn get(&self, collection: Collection, id: RowId) -> FleetResult<Row> {
        let url = self.cfg.rest_url(collection, &format!("/{}", id));
        let v: Value = self.send_json("get", collection, self.client.get(url)).await?;
        if !v.is_object() {
            return Err(FleetError::Decode(format!("expected object for {} {}", collection, id)));
        }
        Ok(Row::from(v))
    }

    async fn create(&self, collection: Collection, body: &Value) -> FleetResult<RowId> {
        let url = self.cfg.rest_url(collection, "");
        let created: Created = self.send_json("create", collection, self.client.post(url).json(body)).await?;
        Ok(created.id)
    }

    async fn update(&self, collection: Collection, id: RowId, body: &Value) -> FleetResult<()> {
        let url = self.cfg.rest_url(collection, &format!("/{}", id));
        self.send("update", collection, self.client.put(url).json(body)).await.map(|_| ())
    }

    async fn delete(&self, collection: Collection, id: RowId, reassign_to: Option<RowId>) -> FleetResult<()> {
        let url = self.cfg.rest_url(collection, &format!("/{}", id));
        let mut req = self.client.delete(url);
        if let Some(target) = reassign_to {
            req = req.query(&[("reassignTo", target)]);
        }
        self.send("delete", collection, req).await.map(|_| ())
    }

    async fn min_distance_vehicle(&self) -> FleetResult<Option<Row>> {
        let url = self.cfg.rest_url(Collection::Vehicle, "/special/min-distance");
        let body = self.send("min_distance", Collection::Vehicle, self.client.get(url)).await?;
        // 204 No Content: no vehicle has a distance.
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        match serde_json::from_slice::<Value>(&body).map_err(|e| FleetError::Decode(e.to_string()))? {
            Value::Null => Ok(None),
            v @ Value::Object(_) => Ok(Some(Row::from(v))),
            other => Err(FleetError::Decode(format!("expected vehicle object, got {}", other))),
        }
    }

    async fn count_fuel_above(&self, threshold: f64) -> FleetResult<u64> {
        check_fuel_threshold(threshold)?;
        let url = self.cfg.rest_url(Collection::Vehicle, "/special/count-fuel-gt");
        let req = self.client.get(url).query(&[("v", threshold)]);
        let c: Count = self.send_json("count_fuel_gt", Collection::Vehicle, req).await?;
        Ok(c.count)
    }
}
