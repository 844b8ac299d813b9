//! Synchronization driver
//!
//! One run = one fetch of one entity type's feed, followed by an upsert and
//! relation pass over every entry in the envelope, in feed order.

use futures::future::join_all;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::error::SyncError;
use super::fields::{key_hint, split_value};
use super::registry::SchemaRegistry;
use super::resolver::RelationResolver;
use super::result::{SyncFailure, SyncRunResult};
use super::schema::{EntitySchema, FeedSpec};
use crate::api::{ConcurrencyLimiter, FetchRequest, Fetcher};
use crate::store::RecordStore;

/// What to synchronize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub entity_type: String,
    /// Used instead of the feed's own endpoint
    pub endpoint_override: Option<String>,
    /// Extra query parameters for the fetch
    pub params: BTreeMap<String, String>,
}

impl SyncRequest {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            endpoint_override: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_override = Some(url.into());
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params.extend(params);
        self
    }
}

/// Result of one entity type inside a `sync_many` batch
#[derive(Debug)]
pub struct SyncOutcome {
    pub entity_type: String,
    pub result: Result<SyncRunResult, SyncError>,
}

/// Fetches feeds and reconciles them into the record store
#[derive(Clone)]
pub struct SyncDriver {
    registry: Arc<SchemaRegistry>,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn RecordStore>,
    resolver: RelationResolver,
}

impl SyncDriver {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let resolver = RelationResolver::new(registry.clone(), store.clone());
        Self {
            registry,
            fetcher,
            store,
            resolver,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.resolver = self.resolver.with_max_depth(max_depth);
        self
    }

    /// Fetch one entity type's feed and reconcile every entry.
    ///
    /// Configuration and fetch problems abort before anything is written.
    /// Per-record and per-relation problems are collected in the result.
    pub async fn sync_entity_type(&self, request: &SyncRequest) -> Result<SyncRunResult, SyncError> {
        let started = Instant::now();
        let schema = self.registry.schema_for(&request.entity_type)?;

        let url = request
            .endpoint_override
            .clone()
            .or_else(|| schema.feed.as_ref().and_then(|f| f.endpoint.clone()))
            .ok_or_else(|| SyncError::NotSyncable(schema.name.clone()))?;

        let fetch = FetchRequest::new(url).with_params(request.params.clone());
        let full_url = fetch.full_url();
        let mut result = SyncRunResult::new(&schema.name, &full_url);

        info!("Fetching {} from {}", schema.name, full_url);
        let document = self.fetcher.fetch(&fetch).await.map_err(|source| {
            error!("Fetching {} failed: {}", schema.name, source);
            SyncError::FetchFailed {
                entity_type: schema.name.clone(),
                source,
            }
        })?;

        let (entries, reported) = unwrap_envelope(schema, schema.feed.as_ref(), &document)?;
        result.fetched = entries.len();
        result.reported = reported;

        info!("Fetched {} {}", entries.len(), schema.name);
        if let Some(reported) = reported {
            if reported != entries.len() as u64 {
                warn!(
                    "{} feed reports {} entries but contains {}",
                    schema.name,
                    reported,
                    entries.len()
                );
            }
        }

        for entry in entries {
            self.sync_entry(schema, entry, &mut result).await?;
        }

        result.elapsed = started.elapsed();
        info!(
            "Synced {} {} ({} created, {} updated, {} failures) in {:.2?}",
            result.upserted,
            schema.name,
            result.created,
            result.updated(),
            result.failures.len(),
            result.elapsed
        );

        Ok(result)
    }

    async fn sync_entry(
        &self,
        schema: &EntitySchema,
        entry: &Value,
        result: &mut SyncRunResult,
    ) -> Result<(), SyncError> {
        let key = key_hint(schema, entry);

        let split = match split_value(schema, entry) {
            Ok(split) => split,
            Err(e) => {
                warn!("Skipping {} [{}]: {}", schema.name, key, e);
                result.failures.push(SyncFailure::record(&schema.name, key, e.to_string()));
                return Ok(());
            }
        };

        let (record, created) = match self
            .store
            .upsert(schema.table_name(), split.unique, split.defaults)
            .await
        {
            Ok(upserted) => upserted,
            Err(e) => {
                warn!("Failed to upsert {} [{}]: {}", schema.name, key, e);
                result.failures.push(SyncFailure::record(&schema.name, key, e.to_string()));
                return Ok(());
            }
        };

        result.upserted += 1;
        if created {
            result.created += 1;
        }
        debug!(
            "{} {} [{}]",
            if created { "Created" } else { "Updated" },
            schema.name,
            record.describe_key()
        );

        if let Some(fields) = entry.as_object() {
            let failures = self.resolver.resolve(&record, schema, fields).await?;
            result.failures.extend(failures);
        }

        Ok(())
    }

    /// Run several entity types, at most as many at once as `limiter` allows.
    ///
    /// Outcomes come back in request order. A fatal error for one type does
    /// not stop the others.
    pub async fn sync_many(
        &self,
        requests: &[SyncRequest],
        limiter: &ConcurrencyLimiter,
    ) -> Vec<SyncOutcome> {
        let runs = requests.iter().map(|request| async move {
            // Only a closed semaphore fails to acquire; run unbounded then
            let _permit = limiter.acquire().await.ok();
            let result = self.sync_entity_type(request).await;
            SyncOutcome {
                entity_type: request.entity_type.clone(),
                result,
            }
        });

        join_all(runs).await
    }
}

/// Entries and the feed's own count, from a fetched document.
///
/// Without a feed descriptor the document itself must be the entry list.
fn unwrap_envelope<'a>(
    schema: &EntitySchema,
    feed: Option<&FeedSpec>,
    document: &'a Value,
) -> Result<(&'a [Value], Option<u64>), SyncError> {
    let malformed = |reason: String| SyncError::MalformedEnvelope {
        entity_type: schema.name.clone(),
        reason,
    };

    let Some(feed) = feed else {
        return document
            .as_array()
            .map(|entries| (entries.as_slice(), None))
            .ok_or_else(|| malformed("expected a JSON array of entries".to_string()));
    };

    let envelope = document
        .as_object()
        .ok_or_else(|| malformed("expected a JSON object".to_string()))?;

    let entries = match envelope.get(&feed.entries_key) {
        Some(Value::Array(entries)) => entries.as_slice(),
        Some(_) => {
            return Err(malformed(format!("'{}' is not a list", feed.entries_key)));
        }
        None => {
            return Err(malformed(format!("missing '{}'", feed.entries_key)));
        }
    };

    let reported = feed
        .count_key
        .as_ref()
        .and_then(|key| envelope.get(key))
        .and_then(Value::as_u64);

    Ok((entries, reported))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fetcher::testing::{RoutedFetcher, StaticFetcher};
    use crate::api::{ConcurrencyConfig, FetchError};
    use crate::store::memory::testing::{FlakyStore, StoreOp};
    use crate::store::{FieldMap, FieldValue, MemoryStore, SqliteStore};
    use crate::sync::result::FailureScope;
    use crate::sync::catalog::{self, airwatch_registry};
    use serde_json::json;

    fn key(attr: &str, value: Value) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert(attr.to_string(), FieldValue::Scalar(value));
        map
    }

    fn sites_document() -> Value {
        json!({
            "NumberOfSites": 1,
            "Sites": [{
                "SiteId": 10001,
                "Name": "Alphington",
                "Latitude": -37.7784,
                "Longitude": 145.0306,
                "FireHazardCategory": null,
                "IsStationOffline": false,
                "HasIncident": true,
                "IncidentType": "Fire",
                "SiteList": [{"Name": "Metro"}],
                "IncidentSite": {"EMVUrl": "http://emv.test/1", "IncidentIcon": "fire"}
            }]
        })
    }

    fn memory_driver(fetcher: impl Fetcher + 'static) -> (SyncDriver, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let driver = SyncDriver::new(
            Arc::new(airwatch_registry().unwrap()),
            Arc::new(fetcher),
            store.clone(),
        );
        (driver, store)
    }

    #[tokio::test]
    async fn test_site_scenario() {
        let (driver, store) = memory_driver(StaticFetcher::json(sites_document()));

        let result = driver
            .sync_entity_type(&SyncRequest::new(catalog::SITE))
            .await
            .unwrap();

        assert!(result.is_clean(), "{:?}", result.failures);
        assert_eq!(result.fetched, 1);
        assert_eq!(result.reported, Some(1));
        assert_eq!((result.upserted, result.created), (1, 1));
        assert_eq!(store.record_count(), 3);

        let site = store.find(catalog::SITE, &key("site_id", json!(10001))).unwrap();
        assert_eq!(site.field("name"), Some(&FieldValue::Scalar(json!("Alphington"))));

        let list = store.find(catalog::SITE_LIST, &key("name", json!("Metro"))).unwrap();
        assert_eq!(
            store.links_of(site.id, "site_list").into_iter().collect::<Vec<_>>(),
            vec![list.id]
        );

        let incidents = store.records_of(catalog::INCIDENT_SITE);
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].field("site").and_then(FieldValue::as_reference), Some(site.id));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let (driver, store) = memory_driver(StaticFetcher::json(sites_document()));
        let request = SyncRequest::new(catalog::SITE);

        driver.sync_entity_type(&request).await.unwrap();
        let records = store.record_count();
        let links = store.link_count();

        let second = driver.sync_entity_type(&request).await.unwrap();
        assert!(second.is_clean());
        assert_eq!((second.upserted, second.created), (1, 0));
        assert_eq!(store.record_count(), records);
        assert_eq!(store.link_count(), links);
    }

    #[tokio::test]
    async fn test_duplicate_unique_keys_converge_on_last_entry() {
        let document = json!({
            "NumberOfSites": 2,
            "Sites": [
                {"SiteId": 5, "Name": "First"},
                {"SiteId": 5, "Name": "Second"}
            ]
        });
        let (driver, store) = memory_driver(StaticFetcher::json(document));

        let result = driver.sync_entity_type(&SyncRequest::new(catalog::SITE)).await.unwrap();

        assert_eq!((result.upserted, result.created), (2, 1));
        let sites = store.records_of(catalog::SITE);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].field("name"), Some(&FieldValue::Scalar(json!("Second"))));
    }

    #[tokio::test]
    async fn test_many_to_many_union_is_monotonic() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(airwatch_registry().unwrap());
        let run = |lists: Value| {
            let document = json!({"Sites": [{"SiteId": 1, "Name": "A", "SiteList": lists}]});
            SyncDriver::new(registry.clone(), Arc::new(StaticFetcher::json(document)), store.clone())
        };

        run(json!([{"Name": "Metro"}]))
            .sync_entity_type(&SyncRequest::new(catalog::SITE))
            .await
            .unwrap();
        run(json!([{"Name": "Regional"}]))
            .sync_entity_type(&SyncRequest::new(catalog::SITE))
            .await
            .unwrap();

        let site = store.find(catalog::SITE, &key("site_id", json!(1))).unwrap();
        assert_eq!(store.links_of(site.id, "site_list").len(), 2);
    }

    #[tokio::test]
    async fn test_nested_child_is_not_clobbered() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(airwatch_registry().unwrap());

        let time_basis = json!({
            "NumberOfTimeBasis": 1,
            "TimeBasis": [{"TimeBaseId": "1HR_AV", "Description": "1 hour average"}]
        });
        SyncDriver::new(registry.clone(), Arc::new(StaticFetcher::json(time_basis)), store.clone())
            .sync_entity_type(&SyncRequest::new(catalog::TIME_BASIS))
            .await
            .unwrap();

        // A measurement embeds the same monitor time basis through its own schema,
        // which shares storage; get_or_create must leave the stored fields alone
        let monitor_time_basis = json!({
            "MonitorId": "PM10",
            "AQIPollutantStandard": "25",
            "IncidentType": "Fire",
            "PresentationOrder": 1,
            "CalcAQI": true,
            "CalcHealthCategory": true
        });
        let mtb_key: FieldMap = [
            ("aqi_pollutant_standard", json!("25")),
            ("incident_type", json!("Fire")),
            ("presentation_order", json!(1)),
            ("calc_aqi", json!(true)),
            ("calc_health_category", json!(true)),
            ("monitor_id", json!("PM10")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), FieldValue::Scalar(v)))
        .collect();

        let with_parent = json!({"TimeBasis": [{
            "TimeBaseId": "1HR_AV",
            "Description": "1 hour average",
            "MonitorTimeBasis": [monitor_time_basis.clone()]
        }]});
        SyncDriver::new(registry.clone(), Arc::new(StaticFetcher::json(with_parent)), store.clone())
            .sync_entity_type(
                &SyncRequest::new(catalog::TIME_BASIS).with_endpoint("http://example.test/tb"),
            )
            .await
            .unwrap();

        let stored = store.find(catalog::MONITOR_TIME_BASIS, &mtb_key).unwrap();
        let time_basis = store
            .find(catalog::TIME_BASIS, &key("time_base_id", json!("1HR_AV")))
            .unwrap();
        assert_eq!(stored.field("time_basis").and_then(FieldValue::as_reference), Some(time_basis.id));

        let measurements = json!({"Measurements": [{
            "DateTimeStart": "2019-01-01T00:00:00",
            "SiteId": 10001,
            "MonitorId": "PM10",
            "TimeBaseId": "1HR_AV",
            "Value": 12.5,
            "MonitorTimeBasis": monitor_time_basis
        }]});
        let result = SyncDriver::new(registry, Arc::new(StaticFetcher::json(measurements)), store.clone())
            .sync_entity_type(&SyncRequest::new(catalog::MEASUREMENT))
            .await
            .unwrap();
        assert!(result.is_clean(), "{:?}", result.failures);

        let after = store.find(catalog::MONITOR_TIME_BASIS, &mtb_key).unwrap();
        assert_eq!(after, stored);
        assert_eq!(store.records_of(catalog::MONITOR_TIME_BASIS).len(), 1);

        let measurement = &store.records_of(catalog::MEASUREMENT)[0];
        assert_eq!(
            measurement.field("monitor_time_basis").and_then(FieldValue::as_reference),
            Some(stored.id)
        );
    }

    #[tokio::test]
    async fn test_broken_relation_does_not_abort_batch() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(airwatch_registry().unwrap());

        let sites = json!({"Sites": [{"SiteId": 10001, "Name": "Alphington"}]});
        SyncDriver::new(registry.clone(), Arc::new(StaticFetcher::json(sites)), store.clone())
            .sync_entity_type(&SyncRequest::new(catalog::SITE))
            .await
            .unwrap();

        let monitors = json!({
            "NumberOfMonitors": 3,
            "Monitors": [
                {"MonitorId": "PM10", "ShortName": "PM10", "SiteId": [10001, 99999]},
                {"ShortName": "no key"},
                {"MonitorId": "O3", "ShortName": "O3", "SiteId": [10001],
                 "EquipmentType": {"IdNumber": 3, "Code": "TEOM", "Description": "Tapered element"}}
            ]
        });
        let result = SyncDriver::new(registry, Arc::new(StaticFetcher::json(monitors)), store.clone())
            .sync_entity_type(&SyncRequest::new(catalog::MONITOR))
            .await
            .unwrap();

        assert_eq!(result.fetched, 3);
        assert_eq!(result.upserted, 2);
        assert_eq!(result.record_failures().count(), 1);

        let relation_failures: Vec<_> = result.relation_failures().collect();
        assert_eq!(relation_failures.len(), 1);
        assert_eq!(relation_failures[0].key, "monitor_id=PM10");
        assert!(relation_failures[0].message.contains("site_id=99999"));

        let site = store.find(catalog::SITE, &key("site_id", json!(10001))).unwrap();
        let pm10 = store.find(catalog::MONITOR, &key("monitor_id", json!("PM10"))).unwrap();
        let o3 = store.find(catalog::MONITOR, &key("monitor_id", json!("O3"))).unwrap();
        assert!(store.links_of(pm10.id, "sites").contains(&site.id));
        assert!(store.links_of(o3.id, "sites").contains(&site.id));
        assert!(o3.field("equipment_type").and_then(FieldValue::as_reference).is_some());
    }

    fn three_monitors() -> Value {
        let monitor = |id: &str, equipment: i64| {
            json!({
                "MonitorId": id,
                "ShortName": id,
                "SiteId": [10001],
                "EquipmentType": {"IdNumber": equipment, "Code": "TEOM", "Description": "Tapered element"}
            })
        };
        json!({
            "NumberOfMonitors": 3,
            "Monitors": [monitor("A", 1), monitor("B", 2), monitor("C", 3)]
        })
    }

    async fn flaky_monitor_run(store: Arc<FlakyStore>) -> SyncRunResult {
        let registry = Arc::new(airwatch_registry().unwrap());

        let sites = json!({"Sites": [{"SiteId": 10001, "Name": "Alphington"}]});
        SyncDriver::new(registry.clone(), Arc::new(StaticFetcher::json(sites)), store.clone())
            .sync_entity_type(&SyncRequest::new(catalog::SITE))
            .await
            .unwrap();

        SyncDriver::new(registry, Arc::new(StaticFetcher::json(three_monitors())), store)
            .sync_entity_type(&SyncRequest::new(catalog::MONITOR))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_relation_integrity_error_is_isolated_to_its_entry() {
        let store = Arc::new(FlakyStore::new().failing(
            StoreOp::SetAttribute,
            catalog::MONITOR,
            "monitor_id=B",
        ));
        let result = flaky_monitor_run(store.clone()).await;

        assert_eq!(result.fetched, 3);
        assert_eq!(result.upserted, 3);
        assert_eq!(result.record_failures().count(), 0);

        let failures: Vec<_> = result.relation_failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "monitor_id=B");
        assert_eq!(
            failures[0].scope,
            FailureScope::Relation {
                source_key: "EquipmentType".to_string(),
                target: catalog::EQUIPMENT_TYPE.to_string(),
            }
        );

        let site = store.find(catalog::SITE, &key("site_id", json!(10001))).unwrap();
        for id in ["A", "C"] {
            let monitor = store.find(catalog::MONITOR, &key("monitor_id", json!(id))).unwrap();
            assert!(monitor.field("equipment_type").and_then(FieldValue::as_reference).is_some());
            assert!(store.links_of(monitor.id, "sites").contains(&site.id));
        }

        // B itself and its other relation are still written
        let b = store.find(catalog::MONITOR, &key("monitor_id", json!("B"))).unwrap();
        assert!(b.field("equipment_type").is_none());
        assert!(store.links_of(b.id, "sites").contains(&site.id));
    }

    #[tokio::test]
    async fn test_upsert_error_skips_only_that_entry() {
        let store = Arc::new(FlakyStore::new().failing(
            StoreOp::Upsert,
            catalog::MONITOR,
            "monitor_id=B",
        ));
        let result = flaky_monitor_run(store.clone()).await;

        assert_eq!(result.fetched, 3);
        assert_eq!(result.upserted, 2);
        assert_eq!(result.relation_failures().count(), 0);

        let failures: Vec<_> = result.record_failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "monitor_id=B");
        assert!(failures[0].message.contains("simulated"));

        assert!(store.find(catalog::MONITOR, &key("monitor_id", json!("B"))).is_none());
        assert!(store.find(catalog::MONITOR, &key("monitor_id", json!("C"))).is_some());
        assert_eq!(store.records_of(catalog::EQUIPMENT_TYPE).len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_without_writes() {
        let (driver, store) = memory_driver(StaticFetcher::failing(FetchError::Status {
            url: "http://example.test/Sites".to_string(),
            status: 503,
        }));

        let err = driver
            .sync_entity_type(&SyncRequest::new(catalog::SITE))
            .await
            .unwrap_err();

        assert!(err.is_fetch_failure());
        assert_eq!(err.status(), Some(503));
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_fatal() {
        let (driver, store) = memory_driver(StaticFetcher::json(json!({"NumberOfSites": 0})));
        let err = driver
            .sync_entity_type(&SyncRequest::new(catalog::SITE))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedEnvelope { .. }));

        let (driver, _) = memory_driver(StaticFetcher::json(json!({"Sites": {"SiteId": 1}})));
        let err = driver
            .sync_entity_type(&SyncRequest::new(catalog::SITE))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'Sites' is not a list"));
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_not_fatal() {
        let document = json!({"NumberOfSites": 10, "Sites": [{"SiteId": 1}]});
        let (driver, _) = memory_driver(StaticFetcher::json(document));

        let result = driver.sync_entity_type(&SyncRequest::new(catalog::SITE)).await.unwrap();
        assert_eq!(result.reported, Some(10));
        assert_eq!(result.fetched, 1);
    }

    #[tokio::test]
    async fn test_configuration_errors() {
        let (driver, _) = memory_driver(StaticFetcher::json(json!({})));

        let err = driver
            .sync_entity_type(&SyncRequest::new("Weather"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownEntityType(_)));

        let err = driver
            .sync_entity_type(&SyncRequest::new(catalog::SITE_LIST))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotSyncable(_)));
    }

    #[tokio::test]
    async fn test_override_without_feed_expects_bare_list() {
        let fetcher = StaticFetcher::json(json!([{"Name": "Metro"}, {"Name": "Regional"}]));
        let (driver, store) = memory_driver(fetcher);

        let request = SyncRequest::new(catalog::SITE_LIST).with_endpoint("http://example.test/lists");
        let result = driver.sync_entity_type(&request).await.unwrap();

        assert_eq!(result.created, 2);
        assert_eq!(result.reported, None);
        assert_eq!(store.records_of(catalog::SITE_LIST).len(), 2);
    }

    #[tokio::test]
    async fn test_request_url_carries_params() {
        let fetcher = Arc::new(StaticFetcher::json(json!({"Measurements": []})));
        let driver = SyncDriver::new(
            Arc::new(airwatch_registry().unwrap()),
            fetcher.clone(),
            Arc::new(MemoryStore::new()),
        );

        let mut params = BTreeMap::new();
        params.insert("siteId".to_string(), "10001".to_string());
        let result = driver
            .sync_entity_type(&SyncRequest::new(catalog::MEASUREMENT).with_params(params))
            .await
            .unwrap();

        let expected = "http://sciwebsvc.epa.vic.gov.au/aqapi/Measurements?siteId=10001";
        assert_eq!(fetcher.request_urls(), vec![expected.to_string()]);
        assert_eq!(result.url, expected);
    }

    #[tokio::test]
    async fn test_sync_many_isolates_failures() {
        let fetcher = RoutedFetcher::new()
            .route("http://sciwebsvc.epa.vic.gov.au/aqapi/Sites", sites_document())
            .route(
                "http://sciwebsvc.epa.vic.gov.au/aqapi/Timebasis",
                json!({"TimeBasis": [{"TimeBaseId": "24HR_AV", "SiteId": [10001]}]}),
            );
        let (driver, store) = memory_driver(fetcher);

        let requests = vec![
            SyncRequest::new(catalog::SITE),
            SyncRequest::new(catalog::MONITOR),
            SyncRequest::new(catalog::TIME_BASIS),
        ];
        let limiter = ConcurrencyLimiter::new(ConcurrencyConfig::sequential());
        let outcomes = driver.sync_many(&requests, &limiter).await;

        let names: Vec<_> = outcomes.iter().map(|o| o.entity_type.as_str()).collect();
        assert_eq!(names, vec![catalog::SITE, catalog::MONITOR, catalog::TIME_BASIS]);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[1].result.as_ref().unwrap_err().status(), Some(404));

        let time_basis = outcomes[2].result.as_ref().unwrap();
        assert!(time_basis.is_clean(), "{:?}", time_basis.failures);
        assert_eq!(store.records_of(catalog::TIME_BASIS).len(), 1);
    }

    #[tokio::test]
    async fn test_site_scenario_against_sqlite() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let driver = SyncDriver::new(
            Arc::new(airwatch_registry().unwrap()),
            Arc::new(StaticFetcher::json(sites_document())),
            store.clone(),
        );
        let request = SyncRequest::new(catalog::SITE);

        let first = driver.sync_entity_type(&request).await.unwrap();
        let second = driver.sync_entity_type(&request).await.unwrap();

        assert!(first.is_clean() && second.is_clean());
        assert_eq!((first.created, second.created), (1, 0));

        let site = store
            .find(catalog::SITE, &key("site_id", json!(10001)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.records_of(catalog::SITE_LIST).await.unwrap().len(), 1);
        assert_eq!(store.links_of(site.id, "site_list").await.unwrap().len(), 1);

        let incidents = store.records_of(catalog::INCIDENT_SITE).await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].field("site").and_then(FieldValue::as_reference), Some(site.id));
    }
}
