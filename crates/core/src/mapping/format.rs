//! Format adapter dispatch: raw provider bodies into one generic value tree.
//!
//! All three wire formats land in `serde_json::Value` so path resolution and
//! normalization never see format-specific structures.
//!
//! - JSON parses as-is.
//! - XML becomes `{ "<root>": { ... } }`. Child elements are mapping keys,
//!   repeated siblings become sequences, attributes appear under `@name` and
//!   mixed text under `#text`. A text-only element is a string, an empty one null.
//! - CSV becomes `{ "rows": [ { "<header>": "<cell>", ... }, ... ] }` with empty
//!   cells as null.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::provider::ResponseFormat;

pub const XML_ATTRIBUTE_PREFIX: &str = "@";
pub const XML_TEXT_KEY: &str = "#text";
pub const CSV_ROWS_KEY: &str = "rows";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("malformed {format} response: {detail}")]
    MalformedResponse { format: ResponseFormat, detail: String },
    #[error("pre-parser `{adapter}` rejected the response: {detail}")]
    PreParse { adapter: String, detail: String },
}

fn malformed(format: ResponseFormat, detail: impl ToString) -> FormatError {
    FormatError::MalformedResponse { format, detail: detail.to_string() }
}

pub fn parse(body: &[u8], format: ResponseFormat) -> Result<Value, FormatError> {
    match format {
        ResponseFormat::Json => parse_json(body),
        ResponseFormat::Xml => parse_xml(body),
        ResponseFormat::Csv => parse_csv(body),
    }
}

fn parse_json(body: &[u8]) -> Result<Value, FormatError> {
    serde_json::from_slice(body).map_err(|error| malformed(ResponseFormat::Json, error))
}

struct XmlElement {
    name: String,
    entries: Map<String, Value>,
    // Names that occurred more than once, so a child whose own value is a
    // sequence is not mistaken for a group of siblings.
    repeated: HashSet<String>,
    has_children: bool,
    text: String,
}

impl XmlElement {
    fn open(start: &BytesStart<'_>) -> Result<Self, FormatError> {
        let name = decode_name(start.name().as_ref())?;
        let mut entries = Map::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|error| malformed(ResponseFormat::Xml, error))?;
            let key = decode_name(attribute.key.as_ref())?;
            let value =
                attribute.unescape_value().map_err(|error| malformed(ResponseFormat::Xml, error))?;
            entries.insert(format!("{XML_ATTRIBUTE_PREFIX}{key}"), Value::String(value.into_owned()));
        }

        Ok(Self { name, entries, repeated: HashSet::new(), has_children: false, text: String::new() })
    }

    fn add_child(&mut self, name: String, value: Value) {
        self.has_children = true;
        let repeated = self.repeated.contains(&name);
        match self.entries.get_mut(&name) {
            Some(Value::Array(siblings)) if repeated => siblings.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
                self.repeated.insert(name);
            }
            None => {
                self.entries.insert(name, value);
            }
        }
    }

    fn close(mut self) -> (String, Value) {
        let text = self.text.trim();

        let value = if self.entries.is_empty() && !self.has_children {
            if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            }
        } else {
            if !text.is_empty() {
                self.entries.insert(XML_TEXT_KEY.to_string(), Value::String(text.to_string()));
            }
            Value::Object(self.entries)
        };

        (self.name, value)
    }
}

fn decode_name(raw: &[u8]) -> Result<String, FormatError> {
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|error| malformed(ResponseFormat::Xml, format!("invalid UTF-8 in name: {error}")))
}

fn parse_xml(body: &[u8]) -> Result<Value, FormatError> {
    let text = std::str::from_utf8(body)
        .map_err(|error| malformed(ResponseFormat::Xml, format!("invalid UTF-8: {error}")))?;

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        let event = reader.read_event().map_err(|error| malformed(ResponseFormat::Xml, error))?;
        match event {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(malformed(ResponseFormat::Xml, "multiple root elements"));
                }
                stack.push(XmlElement::open(&start)?);
            }
            Event::Empty(start) => {
                if root.is_some() {
                    return Err(malformed(ResponseFormat::Xml, "multiple root elements"));
                }
                let element = XmlElement::open(&start)?;
                attach(&mut stack, &mut root, element.close());
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| malformed(ResponseFormat::Xml, "unexpected closing tag"))?;
                attach(&mut stack, &mut root, element.close());
            }
            Event::Text(content) => {
                let content =
                    content.unescape().map_err(|error| malformed(ResponseFormat::Xml, error))?;
                append_text(&mut stack, &content)?;
            }
            Event::CData(content) => {
                let content = content.into_inner();
                let content = std::str::from_utf8(&content)
                    .map_err(|error| malformed(ResponseFormat::Xml, error))?
                    .to_string();
                append_text(&mut stack, &content)?;
            }
            Event::Eof => break,
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(malformed(ResponseFormat::Xml, format!("unclosed element `{}`", open.name)));
    }

    let (name, value) = root.ok_or_else(|| malformed(ResponseFormat::Xml, "document has no root element"))?;
    let mut document = Map::new();
    document.insert(name, value);
    Ok(Value::Object(document))
}

fn attach(stack: &mut [XmlElement], root: &mut Option<(String, Value)>, closed: (String, Value)) {
    match stack.last_mut() {
        Some(parent) => parent.add_child(closed.0, closed.1),
        None => *root = Some(closed),
    }
}

fn append_text(stack: &mut [XmlElement], content: &str) -> Result<(), FormatError> {
    match stack.last_mut() {
        Some(element) => {
            element.text.push_str(content);
            Ok(())
        }
        None if content.trim().is_empty() => Ok(()),
        None => Err(malformed(ResponseFormat::Xml, "text outside of the root element")),
    }
}

fn parse_csv(body: &[u8]) -> Result<Value, FormatError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(body);

    let headers = reader.headers().map_err(|error| malformed(ResponseFormat::Csv, error))?.clone();
    if headers.is_empty() || headers.iter().all(str::is_empty) {
        return Err(malformed(ResponseFormat::Csv, "missing header row"));
    }

    let mut seen = Vec::with_capacity(headers.len());
    for header in headers.iter() {
        if header.is_empty() {
            return Err(malformed(ResponseFormat::Csv, "empty column name in header row"));
        }
        if seen.contains(&header) {
            return Err(malformed(ResponseFormat::Csv, format!("duplicate column `{header}`")));
        }
        seen.push(header);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|error| malformed(ResponseFormat::Csv, error))?;
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| {
                let cell =
                    if cell.is_empty() { Value::Null } else { Value::String(cell.to_string()) };
                (header.to_string(), cell)
            })
            .collect();
        rows.push(Value::Object(row));
    }

    let mut document = Map::new();
    document.insert(CSV_ROWS_KEY.to_string(), Value::Array(rows));
    Ok(Value::Object(document))
}

/// Transforms a raw body before format parsing, selected by a provider's `adapterRef`.
pub trait PreParser: Send + Sync {
    fn prepare(&self, body: Vec<u8>) -> Result<Vec<u8>, String>;
}

impl<F> PreParser for F
where
    F: Fn(Vec<u8>) -> Result<Vec<u8>, String> + Send + Sync,
{
    fn prepare(&self, body: Vec<u8>) -> Result<Vec<u8>, String> {
        self(body)
    }
}

pub struct PreParserRegistry {
    parsers: HashMap<String, Arc<dyn PreParser>>,
}

impl Default for PreParserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for PreParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.parsers.keys().collect();
        names.sort_unstable();
        f.debug_struct("PreParserRegistry").field("names", &names).finish()
    }
}

impl PreParserRegistry {
    pub fn empty() -> Self {
        Self { parsers: HashMap::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("strip-bom", strip_bom);
        registry.register("latin1", latin1_to_utf8);
        registry
    }

    pub fn register<P>(&mut self, name: impl Into<String>, parser: P)
    where
        P: PreParser + 'static,
    {
        self.parsers.insert(name.into(), Arc::new(parser));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PreParser>> {
        self.parsers.get(name).cloned()
    }
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

fn strip_bom(body: Vec<u8>) -> Result<Vec<u8>, String> {
    let without_bom = body.strip_prefix(UTF8_BOM).unwrap_or(&body);
    let start = without_bom.iter().position(|byte| !byte.is_ascii_whitespace());
    let end = without_bom.iter().rposition(|byte| !byte.is_ascii_whitespace());

    Ok(match (start, end) {
        (Some(start), Some(end)) => without_bom[start..=end].to_vec(),
        _ => Vec::new(),
    })
}

fn latin1_to_utf8(body: Vec<u8>) -> Result<Vec<u8>, String> {
    Ok(body.iter().map(|&byte| char::from(byte)).collect::<String>().into_bytes())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse, FormatError, PreParserRegistry};
    use crate::domain::provider::ResponseFormat;

    #[test]
    fn json_parses_into_nested_tree() {
        let tree = parse(br#"{"pricing":{"premium":"1199.99"},"terms":{"months":36}}"#, ResponseFormat::Json)
            .expect("valid json");

        assert_eq!(tree["pricing"]["premium"], json!("1199.99"));
        assert_eq!(tree["terms"]["months"], json!(36));
    }

    #[test]
    fn xml_elements_become_mapping_keys_under_the_root() {
        let body = br#"<?xml version="1.0"?>
            <Quote currency="USD">
              <ID>APCO-778</ID>
              <Premium>1199.99</Premium>
              <Coverage><Amount>25000</Amount></Coverage>
              <Term><Months>36</Months></Term>
              <Notes/>
            </Quote>"#;

        let tree = parse(body, ResponseFormat::Xml).expect("valid xml");

        assert_eq!(
            tree,
            json!({
                "Quote": {
                    "@currency": "USD",
                    "ID": "APCO-778",
                    "Premium": "1199.99",
                    "Coverage": { "Amount": "25000" },
                    "Term": { "Months": "36" },
                    "Notes": null
                }
            })
        );
    }

    #[test]
    fn xml_repeated_siblings_become_sequences() {
        let body = br#"<Quotes>
              <Option><Premium>100</Premium></Option>
              <Option><Premium>200</Premium></Option>
              <Option><Premium>300</Premium></Option>
            </Quotes>"#;

        let tree = parse(body, ResponseFormat::Xml).expect("valid xml");

        assert_eq!(
            tree["Quotes"]["Option"],
            json!([{ "Premium": "100" }, { "Premium": "200" }, { "Premium": "300" }])
        );
    }

    #[test]
    fn xml_mixed_text_and_attributes_use_reserved_keys() {
        let tree = parse(br#"<Premium currency="USD">1199.99</Premium>"#, ResponseFormat::Xml)
            .expect("valid xml");

        assert_eq!(tree, json!({ "Premium": { "@currency": "USD", "#text": "1199.99" } }));
    }

    #[test]
    fn xml_unescapes_entities_and_cdata() {
        let tree = parse(
            br#"<Quote><Name>A &amp; B</Name><Memo><![CDATA[<raw>]]></Memo></Quote>"#,
            ResponseFormat::Xml,
        )
        .expect("valid xml");

        assert_eq!(tree["Quote"]["Name"], json!("A & B"));
        assert_eq!(tree["Quote"]["Memo"], json!("<raw>"));
    }

    #[test]
    fn malformed_xml_never_returns_partial_data() {
        for body in [
            &b"<Quote><Premium>10</Quote>"[..],
            &b"<Quote><Premium>10</Premium>"[..],
            &b"<A/><B/>"[..],
            &b""[..],
        ] {
            let error = parse(body, ResponseFormat::Xml).expect_err("malformed xml");
            assert!(matches!(
                error,
                FormatError::MalformedResponse { format: ResponseFormat::Xml, .. }
            ));
        }
    }

    #[test]
    fn csv_rows_are_keyed_by_header() {
        let body = b"quote_id,premium,coverage_amt,term_months\nCL-1, 1199.99 ,25000,36\nCL-2,999.00,,24\n";

        let tree = parse(body, ResponseFormat::Csv).expect("valid csv");

        assert_eq!(
            tree,
            json!({
                "rows": [
                    { "quote_id": "CL-1", "premium": "1199.99", "coverage_amt": "25000", "term_months": "36" },
                    { "quote_id": "CL-2", "premium": "999.00", "coverage_amt": null, "term_months": "24" }
                ]
            })
        );
    }

    #[test]
    fn csv_with_ragged_rows_or_bad_header_is_malformed() {
        for body in [&b"a,b\n1,2,3\n"[..], &b"a,a\n1,2\n"[..], &b""[..]] {
            let error = parse(body, ResponseFormat::Csv).expect_err("malformed csv");
            assert!(matches!(
                error,
                FormatError::MalformedResponse { format: ResponseFormat::Csv, .. }
            ));
        }
    }

    #[test]
    fn malformed_json_is_reported_with_format() {
        let error = parse(b"{\"pricing\":", ResponseFormat::Json).expect_err("truncated json");
        assert!(matches!(error, FormatError::MalformedResponse { format: ResponseFormat::Json, .. }));
        assert!(error.to_string().starts_with("malformed JSON response"));
    }

    #[test]
    fn builtin_pre_parsers_normalize_raw_bytes() {
        let registry = PreParserRegistry::default();

        let strip = registry.get("strip-bom").expect("strip-bom registered");
        let stripped = strip.prepare(b"\xEF\xBB\xBF  {\"a\":1}\n".to_vec()).expect("strip");
        assert_eq!(stripped, b"{\"a\":1}".to_vec());

        let latin1 = registry.get("latin1").expect("latin1 registered");
        let decoded = latin1.prepare(b"caf\xE9".to_vec()).expect("decode");
        assert_eq!(String::from_utf8(decoded).expect("utf8"), "café");

        assert!(registry.get("soap").is_none());
    }
}
