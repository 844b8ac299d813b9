//! Built-in schemas for the EPA Victoria AirWatch feed
//!
//! Entity types and field maps follow the public `aqapi` service. Types
//! without a feed only ever appear nested inside another type's payload.

use super::error::SchemaError;
use super::registry::SchemaRegistry;
use super::schema::{EntitySchema, FeedSpec, Relation};

pub const SITE: &str = "Site";
pub const SITE_LIST: &str = "SiteList";
pub const INCIDENT_SITE: &str = "IncidentSite";
pub const MONITOR: &str = "Monitor";
pub const EQUIPMENT_TYPE: &str = "EquipmentType";
pub const TIME_BASIS: &str = "TimeBasis";
pub const MONITOR_TIME_BASIS: &str = "MonitorTimeBasis";
pub const MEASUREMENT: &str = "Measurement";
pub const MEASUREMENT_MONITOR_TIME_BASIS: &str = "MeasurementMonitorTimeBasis";

const AQAPI_BASE: &str = "http://sciwebsvc.epa.vic.gov.au/aqapi";

fn endpoint(path: &str) -> String {
    format!("{}/{}", AQAPI_BASE, path)
}

fn monitor_time_basis_fields(schema: EntitySchema) -> EntitySchema {
    schema
        .field("AQIPollutantStandard", "aqi_pollutant_standard")
        .field("IncidentType", "incident_type")
        .field("PresentationOrder", "presentation_order")
        .field("CalcAQI", "calc_aqi")
        .field("CalcHealthCategory", "calc_health_category")
        .field("MonitorId", "monitor_id")
}

/// Every AirWatch schema, top-level feeds in the order they should be synced
pub fn airwatch_schemas() -> Vec<EntitySchema> {
    vec![
        EntitySchema::new(SITE)
            .field("SiteId", "site_id")
            .field("Name", "name")
            .field("Latitude", "latitude")
            .field("Longitude", "longitude")
            .field("FireHazardCategory", "fire_hazard_category")
            .field("IsStationOffline", "is_station_offline")
            .field("HasIncident", "has_incident")
            .field("IncidentType", "incident_type")
            .unique(["SiteId"])
            .relation(Relation::many_to_many("SiteList", SITE_LIST, "site_list"))
            .relation(Relation::child_references_parent(
                "IncidentSite",
                INCIDENT_SITE,
                "site",
            ))
            .feed(FeedSpec::new(endpoint("Sites"), "NumberOfSites", "Sites")),
        EntitySchema::new(MONITOR)
            .field("MonitorId", "monitor_id")
            .field("ShortName", "short_name")
            .field("CommonName", "common_name")
            .field("EPADescriptionURL", "epa_description_url")
            .field("UnitOfMeasure", "unit_of_measure")
            .field("PresentationPrecision", "presentation_precision")
            .unique(["MonitorId"])
            .relation(Relation::parent_references_child(
                "EquipmentType",
                EQUIPMENT_TYPE,
                "equipment_type",
            ))
            .relation(Relation::many_to_many("SiteId", SITE, "sites"))
            .feed(FeedSpec::new(endpoint("Monitors"), "NumberOfMonitors", "Monitors")),
        EntitySchema::new(TIME_BASIS)
            .field("TimeBaseId", "time_base_id")
            .field("Description", "description")
            .field("IsRollingAverage", "is_rolling_average")
            .field("RollingAveragePeriod", "rolling_average_period")
            .field("MinDataPercent", "min_data_percent")
            .field("TimeBasisDescURL", "time_basis_desc_url")
            .unique(["TimeBaseId"])
            .relation(Relation::many_to_many("SiteId", SITE, "sites"))
            .relation(Relation::child_references_parent(
                "MonitorTimeBasis",
                MONITOR_TIME_BASIS,
                "time_basis",
            ))
            .feed(FeedSpec::new(endpoint("Timebasis"), "NumberOfTimeBasis", "TimeBasis")),
        EntitySchema::new(MEASUREMENT)
            .field("DateTimeStart", "date_time_start")
            .field("DateTimeRecorded", "date_time_recorded")
            .field("Value", "value")
            .field("QualityStatus", "quality_status")
            .field("AQIIndex", "aqi_index")
            .field("AQICategoryAbbreviation", "aqi_category_threshold_id")
            .field("HealthCategoryLevel", "health_category_threshold_id")
            .field("SiteId", "site_id")
            .field("TimeBaseId", "time_basis_id")
            .field("MonitorId", "monitor_id")
            .unique(["DateTimeStart", "SiteId", "MonitorId", "TimeBaseId"])
            .relation(Relation::parent_references_child(
                "EquipmentType",
                EQUIPMENT_TYPE,
                "equipment_type",
            ))
            .relation(Relation::parent_references_child(
                "MonitorTimeBasis",
                MEASUREMENT_MONITOR_TIME_BASIS,
                "monitor_time_basis",
            ))
            .feed(FeedSpec::new(
                endpoint("Measurements"),
                "NumberOfMeasurements",
                "Measurements",
            )),
        EntitySchema::new(SITE_LIST)
            .field("Name", "name")
            .unique(["Name"]),
        EntitySchema::new(INCIDENT_SITE)
            .field("EMVUrl", "emv_url")
            .field("IncidentIcon", "incident_icon"),
        EntitySchema::new(EQUIPMENT_TYPE)
            .field("IdNumber", "id_number")
            .field("Code", "code")
            .field("Description", "description"),
        monitor_time_basis_fields(EntitySchema::new(MONITOR_TIME_BASIS)),
        // Same records as MonitorTimeBasis, reached from a measurement
        monitor_time_basis_fields(EntitySchema::new(MEASUREMENT_MONITOR_TIME_BASIS))
            .stored_as(MONITOR_TIME_BASIS),
    ]
}

/// Registry holding the built-in AirWatch schemas
pub fn airwatch_registry() -> Result<SchemaRegistry, SchemaError> {
    airwatch_schemas()
        .into_iter()
        .fold(SchemaRegistry::builder(), |builder, schema| builder.register(schema))
        .build()
}
