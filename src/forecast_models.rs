use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Availability forecast request for a prospective line item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRequest {
    /// Flight dates of the prospective line item.
    pub date_range: DateRange,

    /// Creative sizes the line item would serve (at least one).
    pub creative_sizes: Vec<CreativeSize>,

    /// Lifetime impression goal, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_impressions: Option<u64>,

    /// Ad units to target (descendants included).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targeted_ad_unit_ids: Vec<i64>,

    /// Ad units to exclude (descendants included).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_ad_unit_ids: Vec<i64>,

    /// Placements to target.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targeted_placement_ids: Vec<i64>,

    /// Audience segments, combined with `IS`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audience_segment_ids: Vec<String>,

    /// Custom key/value criteria.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_targeting: Vec<CustomTargeting>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_cap: Option<FrequencyCap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_targeting: Option<GeoTargeting>,
}

impl ForecastRequest {
    /// Every ad unit id the request mentions, targeted first, without duplicates.
    pub fn referenced_ad_unit_ids(&self) -> Vec<i64> {
        let mut ids = Vec::new();
        for id in self
            .targeted_ad_unit_ids
            .iter()
            .chain(self.excluded_ad_unit_ids.iter())
        {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids
    }

    /// Number of criteria groups inside the custom targeting set.
    ///
    /// The audience segment list counts as one group; each custom key/value
    /// entry counts as one more.
    pub fn custom_criteria_group_count(&self) -> usize {
        let audience = usize::from(!self.audience_segment_ids.is_empty());
        audience + self.custom_targeting.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DateRange {
    pub start: StartDate,
    pub end: NaiveDate,
}

/// Line item start: as soon as possible, or at midnight of a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum StartDate {
    Immediate,
    On(NaiveDate),
}

impl StartDate {
    pub const IMMEDIATE: &'static str = "immediate";

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            StartDate::Immediate => None,
            StartDate::On(date) => Some(*date),
        }
    }
}

impl TryFrom<String> for StartDate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case(Self::IMMEDIATE) {
            return Ok(StartDate::Immediate);
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(StartDate::On)
            .map_err(|_| {
                format!(
                    "start must be \"immediate\" or a YYYY-MM-DD date, got \"{}\"",
                    value
                )
            })
    }
}

impl From<StartDate> for String {
    fn from(value: StartDate) -> Self {
        value.to_string()
    }
}

impl fmt::Display for StartDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartDate::Immediate => f.write_str(Self::IMMEDIATE),
            StartDate::On(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CreativeSize {
    pub width: u32,
    pub height: u32,
}

impl CreativeSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// One custom targeting key with the values it must (or must not) match.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTargeting {
    pub key_id: i64,
    pub value_ids: Vec<String>,
    /// Defaults to `IS` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<CustomOperator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomOperator {
    #[default]
    Is,
    IsNot,
}

impl CustomOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomOperator::Is => "IS",
            CustomOperator::IsNot => "IS_NOT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyCap {
    /// Cap is only applied when this is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_impressions: Option<u32>,
    /// Defaults to weekly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_unit: Option<FrequencyTimeUnit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrequencyTimeUnit {
    #[serde(alias = "minute")]
    Minute,
    #[serde(alias = "hour")]
    Hour,
    #[serde(alias = "day")]
    Day,
    #[default]
    #[serde(alias = "week")]
    Week,
    #[serde(alias = "month")]
    Month,
    #[serde(alias = "lifetime")]
    Lifetime,
}

impl FrequencyTimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrequencyTimeUnit::Minute => "MINUTE",
            FrequencyTimeUnit::Hour => "HOUR",
            FrequencyTimeUnit::Day => "DAY",
            FrequencyTimeUnit::Week => "WEEK",
            FrequencyTimeUnit::Month => "MONTH",
            FrequencyTimeUnit::Lifetime => "LIFETIME",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoTargeting {
    #[serde(default)]
    pub targeted_location_ids: Vec<i64>,
    #[serde(default)]
    pub excluded_location_ids: Vec<i64>,
}

impl GeoTargeting {
    pub fn is_empty(&self) -> bool {
        self.targeted_location_ids.is_empty() && self.excluded_location_ids.is_empty()
    }
}

/// Decoded availability forecast.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResult {
    pub available_units: i64,
    pub matched_units: i64,
    pub possible_units: i64,
    pub delivered_units: i64,
    pub reserved_units: i64,
    pub contending_line_items: Vec<ContendingLineItem>,
    pub targeting_breakdown: Vec<TargetingBreakdown>,

    /// Display names for the ad units named in the request (best-effort).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ad_unit_names: BTreeMap<i64, String>,
}

impl ForecastResult {
    /// Attach resolved ad unit names, consuming the decoded result.
    pub fn with_ad_unit_names(self, ad_unit_names: BTreeMap<i64, String>) -> Self {
        Self {
            ad_unit_names,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContendingLineItem {
    pub line_item_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    pub contending_impressions: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetingBreakdown {
    pub criterion: String,
    pub dimension: String,
    pub available_units: i64,
    pub matched_units: i64,
}

/// Structured rejection returned by the forecast service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoapFault {
    pub fault_string: String,
}

impl SoapFault {
    pub const UNKNOWN: &'static str = "Unknown fault";

    pub fn new(fault_string: impl Into<String>) -> Self {
        Self {
            fault_string: fault_string.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fault_string)
    }
}
