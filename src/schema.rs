use crate::error::FormError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Checkbox,
    Radio,
    Image,
}

impl FieldKind {
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(FieldKind::Text),
            "checkbox" => Some(FieldKind::Checkbox),
            "radio" => Some(FieldKind::Radio),
            "image" => Some(FieldKind::Image),
            _ => None,
        }
    }
}

/// One positioned field of a template schema. Coordinates are millimeters
/// from the top-left corner of the page the field belongs to (or from the
/// top of page 1 when the schema was authored in continuous mode).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub key: String,
    pub kind: FieldKind,
    pub page: u32,
    pub x_mm: f32,
    pub y_mm: f32,
    pub width_mm: Option<f32>,
    pub height_mm: Option<f32>,
    pub radius_mm: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    key: Option<String>,
    label: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    x: f32,
    y: f32,
    page: Option<u32>,
    w: Option<f32>,
    h: Option<f32>,
    r: Option<f32>,
}

/// Load-once cache of parsed field schemas, keyed by resource path.
///
/// The cache is populated at most once per schema and entries are immutable
/// afterwards; concurrent renders share the same `Arc` slice.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    cache: Mutex<BTreeMap<String, Arc<[FieldDef]>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// First call reads and parses the resource; later calls return the
    /// cached sequence without touching the filesystem.
    pub fn load(&self, path: &Path) -> Result<Arc<[FieldDef]>, FormError> {
        let cache_key = path.to_string_lossy().into_owned();
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(fields) = cache.get(&cache_key) {
            log::debug!("schema cache hit: {}", cache_key);
            return Ok(Arc::clone(fields));
        }
        let raw = std::fs::read_to_string(path).map_err(|err| {
            FormError::SchemaLoad(format!("cannot read {}: {}", path.display(), err))
        })?;
        let fields: Arc<[FieldDef]> = parse_schema(&raw)
            .map_err(|message| {
                FormError::SchemaLoad(format!("{}: {}", path.display(), message))
            })?
            .into();
        cache.insert(cache_key, Arc::clone(&fields));
        Ok(fields)
    }
}

/// Parse a schema resource: a JSON array of field records, with `//` line
/// comments allowed for human annotation.
pub fn parse_schema(raw: &str) -> Result<Vec<FieldDef>, String> {
    let stripped = strip_line_comments(raw);
    let records: Vec<RawField> =
        serde_json::from_str(&stripped).map_err(|err| format!("malformed schema json: {}", err))?;

    let mut fields = Vec::with_capacity(records.len());
    let mut seen = std::collections::BTreeSet::new();
    for record in records {
        let key = match record.key {
            Some(key) if !key.trim().is_empty() => key,
            // Historic schemas carried only a human label.
            _ => slugify_label(record.label.as_deref().unwrap_or("")),
        };
        if !seen.insert(key.clone()) {
            return Err(format!("duplicate field key: {}", key));
        }
        let kind = FieldKind::from_str(&record.kind)
            .ok_or_else(|| format!("unknown field type for key {}: {}", key, record.kind))?;
        fields.push(FieldDef {
            key,
            kind,
            page: record.page.unwrap_or(1).max(1),
            x_mm: record.x,
            y_mm: record.y,
            width_mm: record.w,
            height_mm: record.h,
            radius_mm: record.r,
        });
    }
    Ok(fields)
}

/// Cut `//` comments to end of line, string-aware so a slash pair inside a
/// JSON string survives.
fn strip_line_comments(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        let mut in_string = false;
        let mut escaped = false;
        let mut cut = line.len();
        let mut prev_slash_at: Option<usize> = None;
        for (idx, ch) in line.char_indices() {
            if escaped {
                escaped = false;
                prev_slash_at = None;
                continue;
            }
            match ch {
                '\\' if in_string => escaped = true,
                '"' => {
                    in_string = !in_string;
                    prev_slash_at = None;
                }
                '/' if !in_string => {
                    if let Some(at) = prev_slash_at {
                        cut = at;
                        break;
                    }
                    prev_slash_at = Some(idx);
                }
                _ => prev_slash_at = None,
            }
        }
        out.push_str(&line[..cut]);
        out.push('\n');
    }
    out
}

fn slugify_label(label: &str) -> String {
    let mut slug = String::new();
    let mut last_was_sep = true;
    for ch in label.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        "field".to_string()
    } else {
        slug
    }
}
