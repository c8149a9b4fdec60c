//! Decodes ForecastService responses.
//!
//! The body is first parsed into a small element tree in which every lookup
//! yields a list of children, so an element that occurs once and one that
//! repeats are read the same way. Namespace prefixes are dropped.

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::errors::DecodeError;
use crate::forecast_models::{ContendingLineItem, ForecastResult, SoapFault, TargetingBreakdown};

/// Outcome of decoding a forecast response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedResponse {
    Forecast(ForecastResult),
    Fault(SoapFault),
}

/// Decodes a response body according to its HTTP status.
///
/// A 200 response is read as a forecast (or as a fault, if the service put
/// one in the body anyway). Any other status is read as a fault envelope and
/// never fails: unreadable fault bodies become [`SoapFault::UNKNOWN`].
pub fn decode(xml: &str, http_status: u16) -> Result<DecodedResponse, DecodeError> {
    if http_status != 200 {
        return Ok(DecodedResponse::Fault(decode_fault(xml)));
    }

    let document = parse(xml).map_err(DecodeError::Malformed)?;
    let body = document
        .path(&["Envelope", "Body"])
        .ok_or_else(|| DecodeError::Malformed("missing SOAP Body".to_string()))?;

    if let Some(fault) = body.child("Fault") {
        let fault = fault
            .text_of("faultstring")
            .map(SoapFault::new)
            .unwrap_or_else(SoapFault::unknown);
        return Ok(DecodedResponse::Fault(fault));
    }

    let rval = body
        .path(&["getAvailabilityForecastResponse", "rval"])
        .ok_or(DecodeError::MissingResult)?;

    decode_forecast(rval).map(DecodedResponse::Forecast)
}

/// Extracts the fault string from a fault envelope.
pub fn decode_fault(xml: &str) -> SoapFault {
    let fault_string = parse(xml).and_then(|document| {
        document
            .path(&["Envelope", "Body", "Fault"])
            .and_then(|fault| fault.text_of("faultstring"))
            .map(str::to_string)
            .ok_or_else(|| "no faultstring in response".to_string())
    });

    match fault_string {
        Ok(fault_string) => SoapFault::new(fault_string),
        Err(e) => {
            warn!("Could not read SOAP fault ({}), reporting unknown fault", e);
            SoapFault::unknown()
        }
    }
}

fn decode_forecast(rval: &XmlNode) -> Result<ForecastResult, DecodeError> {
    let contending_line_items = rval
        .children("contendingLineItems")
        .map(|item| {
            Ok::<_, DecodeError>(ContendingLineItem {
                line_item_id: required(item, "lineItemId")?,
                name: item.text_of("name").map(str::to_string),
                priority: display_only(item, "priority"),
                contending_impressions: required(item, "contendingImpressions")?,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    let targeting_breakdown = rval
        .children("targetingCriteriaBreakdowns")
        .map(|breakdown| {
            Ok::<_, DecodeError>(TargetingBreakdown {
                criterion: breakdown
                    .text_of("targetingCriteriaName")
                    .or_else(|| breakdown.text_of("criteriaName"))
                    .unwrap_or_default()
                    .to_string(),
                dimension: breakdown
                    .text_of("targetingDimension")
                    .unwrap_or_default()
                    .to_string(),
                available_units: counter(breakdown, "availableUnits")?,
                matched_units: counter(breakdown, "matchedUnits")?,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    let result = ForecastResult {
        available_units: counter(rval, "availableUnits")?,
        matched_units: counter(rval, "matchedUnits")?,
        possible_units: counter(rval, "possibleUnits")?,
        delivered_units: counter(rval, "deliveredUnits")?,
        reserved_units: counter(rval, "reservedUnits")?,
        contending_line_items,
        targeting_breakdown,
        ad_unit_names: Default::default(),
    };

    debug!(
        "Decoded forecast: available={}, matched={}, contending={}",
        result.available_units,
        result.matched_units,
        result.contending_line_items.len()
    );
    Ok(result)
}

/// Integer counter that defaults to zero when absent.
fn counter(node: &XmlNode, field: &'static str) -> Result<i64, DecodeError> {
    Ok(optional(node, field)?.unwrap_or(0))
}

fn required(node: &XmlNode, field: &'static str) -> Result<i64, DecodeError> {
    optional(node, field)?.ok_or(DecodeError::MissingField(field))
}

/// Value of a field used only for display; an unreadable value is dropped.
fn display_only<T: std::str::FromStr>(node: &XmlNode, field: &'static str) -> Option<T> {
    optional(node, field).unwrap_or_else(|e| {
        warn!("Ignoring contending line item {}: {}", field, e);
        None
    })
}

fn optional<T: std::str::FromStr>(
    node: &XmlNode,
    field: &'static str,
) -> Result<Option<T>, DecodeError> {
    node.text_of(field)
        .map(|text| {
            text.parse().map_err(|_| DecodeError::InvalidNumber {
                field,
                value: text.to_string(),
            })
        })
        .transpose()
}

/// Element tree with prefix-free names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct XmlNode {
    name: String,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|child| child.name == name)
    }

    fn path(&self, names: &[&str]) -> Option<&XmlNode> {
        names
            .iter()
            .try_fold(self, |node, name| node.child(name))
    }

    /// Trimmed text of the first `name` child, if it has any.
    fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|child| child.text.trim())
            .filter(|text| !text.is_empty())
    }
}

/// Parses `xml` into a document node whose children are the root elements.
fn parse(xml: &str) -> Result<XmlNode, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack = vec![XmlNode::default()];
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(element) => {
                let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                stack.push(XmlNode::named(name));
            }
            Event::Empty(element) => {
                let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                current(&mut stack)?.children.push(XmlNode::named(name));
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .filter(|_| !stack.is_empty())
                    .ok_or_else(|| "unbalanced end tag".to_string())?;
                current(&mut stack)?.children.push(node);
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| e.to_string())?;
                current(&mut stack)?.text.push_str(&text);
            }
            Event::CData(data) => {
                let data = data.into_inner();
                current(&mut stack)?
                    .text
                    .push_str(&String::from_utf8_lossy(&data));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let document = match stack.pop() {
        Some(document) if stack.is_empty() => document,
        _ => return Err("unexpected end of document".to_string()),
    };
    if document.children.is_empty() {
        return Err("no root element".to_string());
    }
    Ok(document)
}

fn current(stack: &mut [XmlNode]) -> Result<&mut XmlNode, String> {
    stack
        .last_mut()
        .ok_or_else(|| "unbalanced document".to_string())
}
