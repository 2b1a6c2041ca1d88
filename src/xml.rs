//! XML Reader (C0) — walks a NEMSIS XML document into an ordered list of
//! [`Element`] records, fulfilling the parser interface assumed by the rest
//! of the pipeline (SPEC_FULL.md §6, "Parser interface (consumed)").
//!
//! Not part of the original hard problem — the distilled spec treats parsing
//! as an external collaborator specified only by its output shape — but a
//! complete, runnable crate needs one working implementation behind that
//! seam, so this module provides it.

use std::collections::BTreeMap;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::IngestError;

/// One XML element visited during a document walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub element_id: String,
    pub parent_element_id: Option<String>,
    pub pcr_uuid_context: Option<String>,
    pub element_tag: String,
    pub table_suggestion: String,
    pub parent_table_suggestion: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub text_content: Option<String>,
}

/// Controls how [`parse_file`]/[`parse_str`] recognize a PCR root element
/// and extract its UUID. See SPEC_FULL.md §4.0 and DESIGN.md open question (d).
#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// Sanitized tag name that opens a new PCR context (default `patientcarereport`).
    pub pcr_root_tag: String,
    /// Sanitized child-element tag name, or attribute name, holding the PCR's
    /// UUID (default `uuid`).
    pub uuid_tag: String,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            pcr_root_tag: "patientcarereport".to_string(),
            uuid_tag: "uuid".to_string(),
        }
    }
}

/// An element on the ancestor stack while its subtree is still open.
struct OpenFrame {
    element_id: String,
    table_suggestion: String,
    /// The PCR UUID this element's own subtree should inherit, if this frame
    /// is not itself a PCR root still waiting on its UUID.
    inherited_pcr: Option<String>,
    /// `true` if this frame is a PCR root; its UUID is resolved on close,
    /// once its whole subtree (and thus any direct-child `uuid` element) has
    /// been visited.
    is_unresolved_pcr_root: bool,
    /// The PCR root's own `uuid_tag`-named attribute, if any — used only as
    /// a fallback when no direct child `uuid_tag` element is found.
    pcr_from_attr: Option<String>,
    text: String,
}

/// Parse the NEMSIS XML file at `path` into an ordered `Vec<Element>`.
///
/// An empty document, or one that parses to zero elements, is reported as
/// [`IngestError::ParsingEmpty`] by the caller (this function simply returns
/// an empty vec in that case; the Pipeline is the layer that turns "empty"
/// into an audited failure, per SPEC_FULL.md §4.7).
pub async fn parse_file(path: &Path, config: &ParseConfig) -> Result<Vec<Element>, IngestError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let text = String::from_utf8_lossy(&bytes);
    parse_str(&text, config).map_err(|source| IngestError::XmlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse an in-memory XML document. Exposed separately from [`parse_file`]
/// so tests can exercise the walk without touching the filesystem.
pub fn parse_str(xml: &str, config: &ParseConfig) -> Result<Vec<Element>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut elements: Vec<Element> = Vec::new();
    let mut stack: Vec<OpenFrame> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(start) => {
                let frame = open_element(&reader, &start, &stack, config, &mut elements);
                stack.push(frame);
            }
            Event::Empty(start) => {
                // Self-closing tags never get a matching `Event::End`, so
                // open and immediately close them.
                let frame = open_element(&reader, &start, &stack, config, &mut elements);
                close_element(&mut elements, frame, &mut stack, config);
            }
            Event::Text(t) => {
                if let Some(frame) = stack.last_mut() {
                    let decoded = t.decode().unwrap_or_default();
                    frame.text.push_str(decoded.as_ref());
                }
            }
            Event::CData(t) => {
                if let Some(frame) = stack.last_mut() {
                    let decoded = String::from_utf8_lossy(t.as_ref()).into_owned();
                    frame.text.push_str(&decoded);
                }
            }
            Event::End(_) => {
                if let Some(frame) = stack.pop() {
                    close_element(&mut elements, frame, &mut stack, config);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(elements)
}

/// Record a newly-opened start/empty tag as an `Element` and return the
/// frame that tracks it until it closes.
fn open_element(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
    stack: &[OpenFrame],
    config: &ParseConfig,
    elements: &mut Vec<Element>,
) -> OpenFrame {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let table_suggestion = crate::sanitize::sanitize(&tag);

    let mut attributes = BTreeMap::new();
    for attr in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map(|v| v.into_owned())
            .unwrap_or_default();
        attributes.insert(key, value);
    }

    let element_id = uuid::Uuid::new_v4().to_string();
    let parent_element_id = stack.last().map(|f| f.element_id.clone());
    let parent_table_suggestion = stack.last().map(|f| f.table_suggestion.clone());
    let ambient_pcr = stack.last().and_then(|f| f.inherited_pcr.clone());

    let opens_pcr = table_suggestion == config.pcr_root_tag;
    let pcr_from_attr = if opens_pcr {
        attributes
            .iter()
            .find(|(k, _)| crate::sanitize::sanitize(k) == config.uuid_tag)
            .map(|(_, v)| v.clone())
    } else {
        None
    };

    // A PCR root's own attribute is only a fallback: per SPEC_FULL.md §4.0
    // the UUID is read from a direct child `uuid_tag` element first, and the
    // root attribute only "failing that". Until the root's subtree has been
    // fully walked we can't know whether such a child exists, so a PCR root
    // always starts unresolved; `close_element` settles it, preferring the
    // child and falling back to `pcr_from_attr` carried on the frame.
    let resolved_pcr = if opens_pcr { None } else { ambient_pcr.clone() };

    elements.push(Element {
        element_id: element_id.clone(),
        parent_element_id,
        pcr_uuid_context: resolved_pcr.clone(),
        element_tag: tag,
        table_suggestion: table_suggestion.clone(),
        parent_table_suggestion,
        attributes,
        text_content: None,
    });

    OpenFrame {
        element_id,
        table_suggestion,
        inherited_pcr: if opens_pcr { None } else { ambient_pcr },
        is_unresolved_pcr_root: opens_pcr,
        pcr_from_attr,
        text: String::new(),
    }
}

/// Finalize a frame on close: stamp its trimmed text content, and — if it is
/// an unresolved PCR root — look for a direct-child `uuid`-tagged element
/// among everything just recorded in its subtree and back-fill the PCR
/// context onto the whole subtree.
fn close_element(
    elements: &mut [Element],
    frame: OpenFrame,
    stack: &mut [OpenFrame],
    config: &ParseConfig,
) {
    let text = frame.text.trim();
    let text_content = if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    };
    if let Some(el) = elements.iter_mut().find(|e| e.element_id == frame.element_id) {
        el.text_content = text_content;
    }

    if !frame.is_unresolved_pcr_root {
        return;
    }

    // A direct child `uuid_tag` element wins over the root's own attribute;
    // the attribute is only consulted when no such child was found.
    let found_uuid = elements
        .iter()
        .find(|e| {
            e.parent_element_id.as_deref() == Some(frame.element_id.as_str())
                && e.table_suggestion == config.uuid_tag
        })
        .and_then(|e| e.text_content.clone())
        .or_else(|| frame.pcr_from_attr.clone());

    let Some(uuid) = found_uuid else { return };

    // Snapshot (element_id -> parent_element_id) before mutating so the
    // ancestry walk below doesn't need a live borrow of `elements`.
    let parents: BTreeMap<String, Option<String>> = elements
        .iter()
        .map(|e| (e.element_id.clone(), e.parent_element_id.clone()))
        .collect();

    for el in elements.iter_mut() {
        if el.pcr_uuid_context.is_none()
            && (el.element_id == frame.element_id
                || is_descendant(&parents, &el.element_id, &frame.element_id))
        {
            el.pcr_uuid_context = Some(uuid.clone());
        }
    }

    // If this PCR root is itself nested inside an ancestor's subtree (an
    // "inherited_pcr" chain still being built on the stack), there is
    // nothing further to propagate upward: an inner PCR root's UUID never
    // overrides an outer one for elements outside its own subtree.
    let _ = stack;
}

/// Walk `candidate_id`'s ancestor chain (via the `parents` snapshot) looking
/// for `ancestor_id`.
fn is_descendant(
    parents: &BTreeMap<String, Option<String>>,
    candidate_id: &str,
    ancestor_id: &str,
) -> bool {
    let mut current = candidate_id;
    loop {
        match parents.get(current) {
            Some(Some(parent)) if parent == ancestor_id => return true,
            Some(Some(parent)) => current = parent.as_str(),
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_element_with_attributes() {
        let xml = r#"<ePatient_01 CorrelationID="c1">Smith</ePatient_01>"#;
        let els = parse_str(xml, &ParseConfig::default()).unwrap();
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].table_suggestion, "epatient_01");
        assert_eq!(els[0].text_content.as_deref(), Some("Smith"));
        assert_eq!(els[0].attributes.get("CorrelationID").unwrap(), "c1");
    }

    #[test]
    fn parent_child_relationship_recorded() {
        let xml = r#"<eCase><eCase_Step>x</eCase_Step></eCase>"#;
        let els = parse_str(xml, &ParseConfig::default()).unwrap();
        assert_eq!(els.len(), 2);
        let parent = &els[0];
        let child = &els[1];
        assert_eq!(parent.table_suggestion, "ecase");
        assert_eq!(child.table_suggestion, "ecase_step");
        assert_eq!(
            child.parent_element_id.as_deref(),
            Some(parent.element_id.as_str())
        );
        assert_eq!(child.parent_table_suggestion.as_deref(), Some("ecase"));
    }

    #[test]
    fn empty_document_yields_no_elements() {
        let els = parse_str("", &ParseConfig::default()).unwrap();
        assert!(els.is_empty());
    }

    #[test]
    fn self_closing_tag_is_recorded_once() {
        let xml = r#"<eCase><dEmpty CorrelationID="c1"/></eCase>"#;
        let els = parse_str(xml, &ParseConfig::default()).unwrap();
        assert_eq!(els.len(), 2);
        assert_eq!(els[1].table_suggestion, "dempty");
        assert_eq!(els[1].text_content, None);
    }

    #[test]
    fn pcr_root_uuid_from_attribute_is_inherited_by_descendants() {
        let xml = r#"<PatientCareReport uuid="abc-123"><eCase><eCase_Step>x</eCase_Step></eCase></PatientCareReport>"#;
        let els = parse_str(xml, &ParseConfig::default()).unwrap();
        assert!(els.iter().all(|e| e.pcr_uuid_context.as_deref() == Some("abc-123")));
    }

    #[test]
    fn pcr_root_uuid_from_child_element_is_backfilled() {
        let xml = r#"<PatientCareReport><uuid>xyz-789</uuid><eCase>v</eCase></PatientCareReport>"#;
        let els = parse_str(xml, &ParseConfig::default()).unwrap();
        let root = els.iter().find(|e| e.table_suggestion == "patientcarereport").unwrap();
        let case = els.iter().find(|e| e.table_suggestion == "ecase").unwrap();
        assert_eq!(root.pcr_uuid_context.as_deref(), Some("xyz-789"));
        assert_eq!(case.pcr_uuid_context.as_deref(), Some("xyz-789"));
    }

    #[test]
    fn direct_child_uuid_element_wins_over_a_conflicting_root_attribute() {
        let xml = r#"<PatientCareReport uuid="wrong"><uuid>right</uuid><eCase>v</eCase></PatientCareReport>"#;
        let els = parse_str(xml, &ParseConfig::default()).unwrap();
        assert!(els.iter().all(|e| e.pcr_uuid_context.as_deref() == Some("right")));
    }
}
