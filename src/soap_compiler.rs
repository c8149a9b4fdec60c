//! Compiles a [`ForecastRequest`] into a `getAvailabilityForecast` SOAP body.
//!
//! Output is built with a structured XML writer, so it is deterministic and
//! every text node is escaped. Element order follows the ForecastService
//! schema; the remote side rejects out-of-order sequences.

use chrono::{Datelike, NaiveDate};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt::Display;

use crate::config::ForecastSettings;
use crate::errors::CompileError;
use crate::forecast_models::{
    CustomOperator, ForecastRequest, FrequencyCap, GeoTargeting, StartDate,
};

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Checks the structural contract of a request.
///
/// Run before anything is queued; a request that passes always compiles.
pub fn validate(request: &ForecastRequest) -> Result<(), CompileError> {
    if request.creative_sizes.is_empty() {
        return Err(CompileError::NoCreativeSizes);
    }

    if let Some(start) = request.date_range.start.date() {
        if request.date_range.end < start {
            return Err(CompileError::EndBeforeStart {
                start: start.to_string(),
                end: request.date_range.end.to_string(),
            });
        }
    }

    for id in &request.audience_segment_ids {
        ensure_numeric("audienceSegmentIds", id)?;
    }

    for entry in &request.custom_targeting {
        if entry.value_ids.is_empty() {
            return Err(CompileError::EmptyCustomValues {
                key_id: entry.key_id,
            });
        }
        for value in &entry.value_ids {
            ensure_numeric("customTargeting.valueIds", value)?;
        }
    }

    Ok(())
}

fn ensure_numeric(field: &'static str, value: &str) -> Result<(), CompileError> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(CompileError::NonNumericId {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Compiles `request` into the SOAP envelope for `getAvailabilityForecast`.
///
/// # Arguments
///
/// * `request` - Flight dates, creative sizes and targeting.
/// * `settings` - Network header identity, schema version and time zone.
///
/// # Returns
///
/// * `Result<String, CompileError>` - The XML document, or the contract
///   violation that prevented compilation.
pub fn compile(
    request: &ForecastRequest,
    settings: &ForecastSettings,
) -> Result<String, CompileError> {
    validate(request)?;

    let mut xml = SoapWriter::new();
    xml.declaration()?;
    xml.start_with(
        "soapenv:Envelope",
        &[
            ("xmlns:soapenv", SOAP_ENV_NS),
            ("xmlns:xsi", XSI_NS),
            ("xmlns", settings.namespace().as_str()),
        ],
    )?;

    xml.start("soapenv:Header")?;
    xml.start("RequestHeader")?;
    xml.leaf("networkCode", &settings.network_code)?;
    xml.leaf("applicationName", &settings.application_name)?;
    xml.end("RequestHeader")?;
    xml.end("soapenv:Header")?;

    xml.start("soapenv:Body")?;
    xml.start("getAvailabilityForecast")?;
    xml.start("lineItem")?;
    xml.start("lineItem")?;
    write_line_item(&mut xml, request, &settings.time_zone_id)?;
    xml.end("lineItem")?;
    xml.end("lineItem")?;

    xml.start("forecastOptions")?;
    xml.leaf("includeTargetingCriteriaBreakdown", true)?;
    xml.leaf("includeContendingLineItems", true)?;
    xml.end("forecastOptions")?;

    xml.end("getAvailabilityForecast")?;
    xml.end("soapenv:Body")?;
    xml.end("soapenv:Envelope")?;

    xml.finish()
}

fn write_line_item(
    xml: &mut SoapWriter,
    request: &ForecastRequest,
    time_zone_id: &str,
) -> Result<(), CompileError> {
    match request.date_range.start {
        StartDate::Immediate => {
            xml.leaf("startDateTimeType", "IMMEDIATELY")?;
        }
        StartDate::On(date) => {
            write_date_time(xml, "startDateTime", date, (0, 0, 0), time_zone_id)?;
            xml.leaf("startDateTimeType", "USE_START_DATE_TIME")?;
        }
    }
    write_date_time(
        xml,
        "endDateTime",
        request.date_range.end,
        (23, 59, 59),
        time_zone_id,
    )?;

    if let Some(cap) = &request.frequency_cap {
        write_frequency_cap(xml, cap)?;
    }

    xml.leaf("lineItemType", "STANDARD")?;
    xml.leaf("costType", "CPM")?;

    for size in &request.creative_sizes {
        xml.start("creativePlaceholders")?;
        xml.start("size")?;
        xml.leaf("width", size.width)?;
        xml.leaf("height", size.height)?;
        xml.leaf("isAspectRatio", false)?;
        xml.end("size")?;
        xml.end("creativePlaceholders")?;
    }

    if let Some(goal) = request.goal_impressions {
        xml.start("primaryGoal")?;
        xml.leaf("goalType", "LIFETIME")?;
        xml.leaf("unitType", "IMPRESSIONS")?;
        xml.leaf("units", goal)?;
        xml.end("primaryGoal")?;
    }

    xml.start("targeting")?;
    if let Some(geo) = &request.geo_targeting {
        write_geo_targeting(xml, geo)?;
    }
    write_inventory_targeting(xml, request)?;
    write_custom_targeting(xml, request)?;
    xml.end("targeting")?;

    Ok(())
}

fn write_date_time(
    xml: &mut SoapWriter,
    element: &str,
    date: NaiveDate,
    (hour, minute, second): (u32, u32, u32),
    time_zone_id: &str,
) -> Result<(), CompileError> {
    xml.start(element)?;
    xml.start("date")?;
    xml.leaf("year", date.year())?;
    xml.leaf("month", date.month())?;
    xml.leaf("day", date.day())?;
    xml.end("date")?;
    xml.leaf("hour", hour)?;
    xml.leaf("minute", minute)?;
    xml.leaf("second", second)?;
    xml.leaf("timeZoneId", time_zone_id)?;
    xml.end(element)
}

fn write_frequency_cap(xml: &mut SoapWriter, cap: &FrequencyCap) -> Result<(), CompileError> {
    let Some(max_impressions) = cap.max_impressions else {
        return Ok(());
    };
    xml.start("frequencyCaps")?;
    xml.leaf("maxImpressions", max_impressions)?;
    xml.leaf("numTimeUnits", 1)?;
    xml.leaf("timeUnit", cap.time_unit.unwrap_or_default().as_str())?;
    xml.end("frequencyCaps")
}

fn write_geo_targeting(xml: &mut SoapWriter, geo: &GeoTargeting) -> Result<(), CompileError> {
    if geo.is_empty() {
        return Ok(());
    }
    xml.start("geoTargeting")?;
    for id in &geo.targeted_location_ids {
        xml.start("targetedLocations")?;
        xml.leaf("id", id)?;
        xml.end("targetedLocations")?;
    }
    for id in &geo.excluded_location_ids {
        xml.start("excludedLocations")?;
        xml.leaf("id", id)?;
        xml.end("excludedLocations")?;
    }
    xml.end("geoTargeting")
}

fn write_inventory_targeting(
    xml: &mut SoapWriter,
    request: &ForecastRequest,
) -> Result<(), CompileError> {
    xml.start("inventoryTargeting")?;
    for id in &request.targeted_ad_unit_ids {
        xml.start("targetedAdUnits")?;
        xml.leaf("adUnitId", id)?;
        xml.leaf("includeDescendants", true)?;
        xml.end("targetedAdUnits")?;
    }
    for id in &request.excluded_ad_unit_ids {
        xml.start("excludedAdUnits")?;
        xml.leaf("adUnitId", id)?;
        xml.leaf("includeDescendants", true)?;
        xml.end("excludedAdUnits")?;
    }
    for id in &request.targeted_placement_ids {
        xml.leaf("targetedPlacementIds", id)?;
    }
    xml.end("inventoryTargeting")
}

/// Audience segments and key/value pairs share one outer criteria set.
///
/// More than one group is joined with `AND`; a lone group gets `OR`. The same
/// `AND` applies however many groups there are.
fn write_custom_targeting(
    xml: &mut SoapWriter,
    request: &ForecastRequest,
) -> Result<(), CompileError> {
    let groups = request.custom_criteria_group_count();
    if groups == 0 {
        return Ok(());
    }
    let logical_operator = if groups > 1 { "AND" } else { "OR" };

    xml.start_with("customTargeting", &[("xsi:type", "CustomCriteriaSet")])?;
    xml.leaf("logicalOperator", logical_operator)?;

    if !request.audience_segment_ids.is_empty() {
        xml.start_with("children", &[("xsi:type", "AudienceSegmentCriteria")])?;
        xml.leaf("operator", CustomOperator::Is.as_str())?;
        for id in &request.audience_segment_ids {
            xml.leaf("audienceSegmentIds", id)?;
        }
        xml.end("children")?;
    }

    for entry in &request.custom_targeting {
        xml.start_with("children", &[("xsi:type", "CustomCriteria")])?;
        xml.leaf("keyId", entry.key_id)?;
        for value in &entry.value_ids {
            xml.leaf("valueIds", value)?;
        }
        xml.leaf("operator", entry.operator.unwrap_or_default().as_str())?;
        xml.end("children")?;
    }

    xml.end("customTargeting")
}

struct SoapWriter {
    writer: Writer<Vec<u8>>,
}

impl SoapWriter {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<(), CompileError> {
        self.writer
            .write_event(event)
            .map_err(|e| CompileError::Writer(e.to_string()))
    }

    fn declaration(&mut self) -> Result<(), CompileError> {
        self.write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    }

    fn start(&mut self, name: &str) -> Result<(), CompileError> {
        self.write(Event::Start(BytesStart::new(name)))
    }

    fn start_with(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), CompileError> {
        let mut element = BytesStart::new(name);
        for attribute in attributes {
            element.push_attribute(*attribute);
        }
        self.write(Event::Start(element))
    }

    fn end(&mut self, name: &str) -> Result<(), CompileError> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn leaf(&mut self, name: &str, value: impl Display) -> Result<(), CompileError> {
        self.start(name)?;
        let text = value.to_string();
        self.write(Event::Text(BytesText::new(&text)))?;
        self.end(name)
    }

    fn finish(self) -> Result<String, CompileError> {
        String::from_utf8(self.writer.into_inner()).map_err(|e| CompileError::Writer(e.to_string()))
    }
}
