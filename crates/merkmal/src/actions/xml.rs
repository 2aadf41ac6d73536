//! XML structural classification.
//!
//! Streams the source as XML events with `quick-xml` and matches configured
//! element/attribute rules. A hit assigns the coarse type/subtype and may
//! contribute a mime and PRONOM identifier; documents that parse as XML but
//! match no rule still carry the default `application/xml` candidate.
//!
//! Rules are keyed by lowercase element name. Attribute matchers are either
//! literal equality or regexes compiled at construction; a pattern that does
//! not compile is logged and skipped so one bad rule cannot take the whole
//! classifier down.

use crate::actions::{Action, ActionReader, Capabilities, extension_of};
use crate::core::sniff::clear_mime;
use crate::error::Result;
use crate::types::IndexResult;
use async_trait::async_trait;
use quick_xml::events::Event;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::io::BufReader;

/// One classification rule, keyed by the element name in configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlFormatRule {
    /// Attribute name to expected value (literal or pattern).
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Interpret attribute values as regexes instead of literals.
    #[serde(default)]
    pub regexp: bool,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub pronom: String,
}

/// Mime the classifier reports for any well-formed XML without a rule hit.
const XML_CARRIER_MIME: &str = "application/xml";

pub struct ActionXml {
    name: String,
    format: HashMap<String, XmlFormatRule>,
    compiled: HashMap<String, HashMap<String, Regex>>,
}

impl ActionXml {
    pub fn new(name: impl Into<String>, format: HashMap<String, XmlFormatRule>) -> Self {
        let format: HashMap<String, XmlFormatRule> = format
            .into_iter()
            .map(|(element, rule)| (element.to_ascii_lowercase(), rule))
            .collect();

        let mut compiled: HashMap<String, HashMap<String, Regex>> = HashMap::new();
        for (element, rule) in &format {
            if !rule.regexp {
                continue;
            }
            let entry = compiled.entry(element.clone()).or_default();
            for (attr, pattern) in &rule.attributes {
                match Regex::new(pattern) {
                    Ok(re) => {
                        entry.insert(attr.to_ascii_lowercase(), re);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "cannot compile xml rule pattern {}:{}: {}",
                            element,
                            pattern,
                            e
                        );
                    }
                }
            }
        }

        Self {
            name: name.into(),
            format,
            compiled,
        }
    }

    fn match_attribute(&self, element: &str, rule: &XmlFormatRule, attr: &str, value: &str) -> bool {
        let Some(expected) = rule.attributes.get(attr) else {
            return false;
        };
        if rule.regexp {
            self.compiled
                .get(element)
                .and_then(|attrs| attrs.get(attr))
                .map(|re| re.is_match(value))
                .unwrap_or(false)
        } else {
            value == expected
        }
    }

    /// Overwrite the running result with one rule hit. Later elements in
    /// the document replace what earlier ones assigned.
    fn apply_rule(
        &self,
        result: &mut IndexResult,
        rule: &XmlFormatRule,
        element: &str,
        attr: &str,
        value: &str,
    ) {
        result.kind = rule.kind.clone();
        result.subtype = rule.subtype.clone();
        if !rule.mime.is_empty() {
            result.mimetypes = vec![rule.mime.clone()];
            result.mimetype = rule.mime.clone();
        }
        if !rule.pronom.is_empty() {
            result.pronoms = vec![rule.pronom.clone()];
            result.pronom = rule.pronom.clone();
        }
        result.metadata.insert(
            self.name.clone(),
            serde_json::json!({
                "element": element,
                "attribute": format!("{attr}={value}"),
            }),
        );
    }
}

/// Local element name, lowercased, namespace prefix stripped.
fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    name.rsplit(':')
        .next()
        .unwrap_or(&name)
        .to_ascii_lowercase()
}

#[async_trait]
impl Action for ActionXml {
    fn name(&self) -> &str {
        &self.name
    }

    fn caps(&self) -> Capabilities {
        Capabilities::FILE_HEAD | Capabilities::STREAM
    }

    fn weight(&self) -> u32 {
        10
    }

    fn can_handle(&self, content_type: &str, filename: &str) -> bool {
        if extension_of(filename) == "xml" {
            return true;
        }
        matches!(
            clear_mime(content_type).as_str(),
            "application/xml" | "text/xml" | "text/plain"
        )
    }

    async fn stream(
        &self,
        _content_type: &str,
        reader: ActionReader<'_>,
        _filename: &str,
    ) -> Result<IndexResult> {
        let mut xml_reader = quick_xml::Reader::from_reader(BufReader::new(reader));
        xml_reader.config_mut().check_end_names = false;

        let mut result = IndexResult::new();
        let mut saw_element = false;
        let mut buf = Vec::new();
        loop {
            match xml_reader.read_event_into_async(&mut buf).await {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    saw_element = true;
                    let element = local_name(e.name().as_ref());
                    if let Some(rule) = self.format.get(&element) {
                        for attr in e.attributes().flatten() {
                            let key = local_name(attr.key.as_ref());
                            let value = match attr.unescape_value() {
                                Ok(v) => v.into_owned(),
                                Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
                            };
                            if self.match_attribute(&element, rule, &key, &value) {
                                self.apply_rule(&mut result, rule, &element, &key, &value);
                                break;
                            }
                        }
                    }
                }
                Ok(Event::Eof) => break,
                // a malformed document is not an action failure; report what
                // was classified up to this point
                Err(_) => break,
                Ok(_) => {}
            }
            buf.clear();
        }

        if saw_element && !result.mimetypes.iter().any(|m| m == XML_CARRIER_MIME) {
            result.mimetypes.push(XML_CARRIER_MIME.to_string());
        }
        Ok(result)
    }

    async fn run_file(&self, path: &Path) -> Result<IndexResult> {
        let mut file = tokio::fs::File::open(path).await?;
        self.stream("", &mut file, &path.to_string_lossy()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mods_rules() -> HashMap<String, XmlFormatRule> {
        let mut format = HashMap::new();
        format.insert(
            "mods".to_string(),
            XmlFormatRule {
                attributes: HashMap::from([("xmlns".to_string(), ".*mods.*".to_string())]),
                regexp: true,
                kind: "text".to_string(),
                subtype: "mods".to_string(),
                mime: "application/mods+xml".to_string(),
                pronom: String::new(),
            },
        );
        format
    }

    #[tokio::test]
    async fn test_rule_match_assigns_classification() {
        let action = ActionXml::new("xml", mods_rules());
        let mut data: &[u8] =
            b"<?xml version=\"1.0\"?><mods xmlns=\"http://www.loc.gov/mods/v3\"><titleInfo/></mods>";
        let result = action.stream("text/xml", &mut data, "record.xml").await.unwrap();
        assert_eq!(result.kind, "text");
        assert_eq!(result.subtype, "mods");
        assert_eq!(result.mimetype, "application/mods+xml");
        assert!(result.mimetypes.contains(&"application/mods+xml".to_string()));
        assert!(result.mimetypes.contains(&"application/xml".to_string()));
        let meta = result.metadata.get("xml").unwrap();
        assert_eq!(meta.get("element").unwrap(), "mods");
    }

    #[tokio::test]
    async fn test_unmatched_xml_keeps_carrier_mime() {
        let action = ActionXml::new("xml", mods_rules());
        let mut data: &[u8] = b"<root attr=\"v\"><child/></root>";
        let result = action.stream("application/xml", &mut data, "x.xml").await.unwrap();
        assert_eq!(result.mimetypes, vec!["application/xml"]);
        assert!(result.kind.is_empty());
    }

    #[tokio::test]
    async fn test_later_element_overwrites_earlier_match() {
        let mut format = mods_rules();
        format.insert(
            "mets".to_string(),
            XmlFormatRule {
                attributes: HashMap::from([("xmlns".to_string(), ".*mets.*".to_string())]),
                regexp: true,
                kind: "text".to_string(),
                subtype: "mets".to_string(),
                mime: "application/mets+xml".to_string(),
                pronom: String::new(),
            },
        );
        let action = ActionXml::new("xml", format);
        // the whole document is scanned; the inner mods record is the last
        // rule hit and replaces the mets assignment
        let mut data: &[u8] = b"<mets xmlns=\"http://www.loc.gov/METS/\">\
            <mods xmlns=\"http://www.loc.gov/mods/v3\"><titleInfo/></mods>\
            </mets>";
        let result = action.stream("text/xml", &mut data, "r.xml").await.unwrap();
        assert_eq!(result.subtype, "mods");
        assert_eq!(result.mimetype, "application/mods+xml");
        assert_eq!(
            result.mimetypes,
            vec!["application/mods+xml", "application/xml"]
        );
        let meta = result.metadata.get("xml").unwrap();
        assert_eq!(meta.get("element").unwrap(), "mods");
    }

    #[tokio::test]
    async fn test_literal_attribute_match() {
        let mut format = HashMap::new();
        format.insert(
            "premis".to_string(),
            XmlFormatRule {
                attributes: HashMap::from([(
                    "version".to_string(),
                    "3.0".to_string(),
                )]),
                regexp: false,
                kind: "text".to_string(),
                subtype: "premis".to_string(),
                mime: String::new(),
                pronom: "fmt/997".to_string(),
            },
        );
        let action = ActionXml::new("xml", format);
        let mut data: &[u8] = b"<premis version=\"3.0\"></premis>";
        let result = action.stream("text/xml", &mut data, "p.xml").await.unwrap();
        assert_eq!(result.pronom, "fmt/997");
        assert_eq!(result.subtype, "premis");
        let mut other: &[u8] = b"<premis version=\"2.2\"></premis>";
        let result = action.stream("text/xml", &mut other, "p.xml").await.unwrap();
        assert!(result.pronoms.is_empty());
    }

    #[tokio::test]
    async fn test_namespaced_element_and_attribute() {
        let action = ActionXml::new("xml", mods_rules());
        let mut data: &[u8] =
            b"<mods:mods xmlns:mods=\"http://www.loc.gov/mods/v3\"></mods:mods>";
        let result = action.stream("text/xml", &mut data, "r.xml").await.unwrap();
        assert_eq!(result.subtype, "mods");
    }

    #[test]
    fn test_can_handle() {
        let action = ActionXml::new("xml", HashMap::new());
        assert!(action.can_handle("application/octet-stream", "file.XML"));
        assert!(action.can_handle("text/xml; charset=utf-8", "whatever"));
        assert!(action.can_handle("text/plain", "maybe.txt"));
        assert!(!action.can_handle("image/png", "img.png"));
    }

    #[tokio::test]
    async fn test_non_xml_payload_yields_empty_result() {
        let action = ActionXml::new("xml", mods_rules());
        let mut data: &[u8] = b"just plain prose, no markup";
        let result = action.stream("text/plain", &mut data, "notes.txt").await.unwrap();
        assert!(result.mimetypes.is_empty());
        assert!(result.errors.is_empty());
    }
}
