use crate::binding::{FieldValue, ValueMap, truthy_token};
use crate::error::FormError;
use lopdf::{Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, StringFormat};

fn lopdf_err(err: lopdf::Error) -> FormError {
    FormError::TemplateParse(err.to_string())
}

fn deref<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> &'a LoObject {
    if let LoObject::Reference(id) = obj {
        doc.get_object(*id).unwrap_or(obj)
    } else {
        obj
    }
}

fn deref_dict<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> Option<&'a lopdf::Dictionary> {
    deref(doc, obj).as_dict().ok()
}

/// Planned mutation for one widget, computed in a read-only pass and
/// applied afterwards.
enum FieldWrite {
    Button { state: Vec<u8> },
    Text { value: String },
}

/// Where a widget annotation lives: its own indirect object, or inline
/// inside an annotation array. `holder` is the page object when the
/// array is direct, the array object when `/Annots` is a reference.
enum AnnotSlot {
    Indirect(LoObjectId),
    Inline { holder: LoObjectId, index: usize },
}

/// Fill the template's interactive form fields in place.
///
/// Every page's annotation list is walked; widgets whose field name
/// matches a provided key get their value set. Button widgets have their
/// value and appearance-state selector written in lockstep to the
/// discovered on-state (or `Off`), text widgets get the string value and
/// their cached appearance dropped. Names with no matching widget are
/// ignored, so callers may send a superset of fields across template
/// revisions. The form dictionary is flagged with `NeedAppearances` so
/// viewers regenerate text rendering.
pub fn fill_acroform(template_bytes: &[u8], values: &ValueMap) -> Result<Vec<u8>, FormError> {
    let mut doc = LoDocument::load_mem(template_bytes).map_err(lopdf_err)?;
    if doc.is_encrypted() {
        return Err(FormError::TemplateEncrypted);
    }

    let mut writes: Vec<(AnnotSlot, FieldWrite)> = Vec::new();
    for (_page_no, page_id) in doc.get_pages() {
        let Ok(page) = doc.get_object(page_id).and_then(LoObject::as_dict) else {
            continue;
        };
        for slot in page_annotation_slots(&doc, page_id, page) {
            let Some(annot) = slot_dict(&doc, &slot) else {
                continue;
            };
            let Some(name) = annot_field_name(&doc, annot) else {
                continue;
            };
            let Some(value) = values.get(&name) else {
                continue;
            };
            if widget_is_button(&doc, annot) {
                let state = if coerce_checked(value) {
                    discover_on_state(&doc, annot)
                } else {
                    b"Off".to_vec()
                };
                writes.push((slot, FieldWrite::Button { state }));
            } else {
                writes.push((
                    slot,
                    FieldWrite::Text {
                        value: coerce_string(value),
                    },
                ));
            }
        }
    }

    for (slot, write) in writes {
        let Some(annot) = slot_dict_mut(&mut doc, &slot) else {
            continue;
        };
        match write {
            FieldWrite::Button { state } => {
                // Value and appearance selector must move together or
                // viewers keep showing the stale check state.
                annot.set("V", LoObject::Name(state.clone()));
                annot.set("AS", LoObject::Name(state));
            }
            FieldWrite::Text { value } => {
                annot.set("V", encode_text_string(&value));
                annot.remove(b"AP");
            }
        }
    }

    set_need_appearances(&mut doc);

    doc.compress();
    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|err| FormError::OutputWrite(err.to_string()))?;
    Ok(out)
}

/// List the template's field names with their current values, in page
/// and annotation order. Used for mapping maintenance against revised
/// authority templates.
pub fn extract_fields(template_bytes: &[u8]) -> Result<Vec<(String, String)>, FormError> {
    let doc = LoDocument::load_mem(template_bytes).map_err(lopdf_err)?;
    if doc.is_encrypted() {
        return Err(FormError::TemplateEncrypted);
    }
    let mut out = Vec::new();
    for (_page_no, page_id) in doc.get_pages() {
        let Ok(page) = doc.get_object(page_id).and_then(LoObject::as_dict) else {
            continue;
        };
        for slot in page_annotation_slots(&doc, page_id, page) {
            let Some(annot) = slot_dict(&doc, &slot) else {
                continue;
            };
            let Some(name) = annot_field_name(&doc, annot) else {
                continue;
            };
            let value = match annot.get(b"V").map(|obj| deref(&doc, obj)) {
                Ok(LoObject::String(bytes, _)) => decode_pdf_string(bytes),
                Ok(LoObject::Name(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
                _ => String::new(),
            };
            out.push((name, value));
        }
    }
    Ok(out)
}

fn page_annotation_slots(
    doc: &LoDocument,
    page_id: LoObjectId,
    page: &lopdf::Dictionary,
) -> Vec<AnnotSlot> {
    let Ok(annots) = page.get(b"Annots") else {
        return Vec::new();
    };
    let (holder, array) = match annots {
        LoObject::Array(array) => (page_id, array),
        LoObject::Reference(array_id) => {
            match doc.get_object(*array_id).and_then(LoObject::as_array) {
                Ok(array) => (*array_id, array),
                Err(_) => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };
    array
        .iter()
        .enumerate()
        .filter_map(|(index, obj)| match obj {
            LoObject::Reference(id) => Some(AnnotSlot::Indirect(*id)),
            LoObject::Dictionary(_) => Some(AnnotSlot::Inline { holder, index }),
            _ => None,
        })
        .collect()
}

fn slot_dict<'a>(doc: &'a LoDocument, slot: &AnnotSlot) -> Option<&'a lopdf::Dictionary> {
    match slot {
        AnnotSlot::Indirect(id) => doc.get_object(*id).and_then(LoObject::as_dict).ok(),
        AnnotSlot::Inline { holder, index } => {
            let array = match doc.get_object(*holder).ok()? {
                LoObject::Dictionary(page) => page.get(b"Annots").ok()?.as_array().ok()?,
                LoObject::Array(array) => array,
                _ => return None,
            };
            array.get(*index)?.as_dict().ok()
        }
    }
}

fn slot_dict_mut<'a>(
    doc: &'a mut LoDocument,
    slot: &AnnotSlot,
) -> Option<&'a mut lopdf::Dictionary> {
    match slot {
        AnnotSlot::Indirect(id) => doc.get_object_mut(*id).and_then(LoObject::as_dict_mut).ok(),
        AnnotSlot::Inline { holder, index } => {
            let array = match doc.get_object_mut(*holder).ok()? {
                LoObject::Dictionary(page) => page.get_mut(b"Annots").ok()?.as_array_mut().ok()?,
                LoObject::Array(array) => array,
                _ => return None,
            };
            array.get_mut(*index)?.as_dict_mut().ok()
        }
    }
}

fn annot_field_name(doc: &LoDocument, annot: &lopdf::Dictionary) -> Option<String> {
    match deref(doc, annot.get(b"T").ok()?) {
        LoObject::String(bytes, _) => Some(decode_pdf_string(bytes)),
        _ => None,
    }
}

/// Field type may live on the widget itself or on an ancestor field node.
fn widget_is_button(doc: &LoDocument, annot: &lopdf::Dictionary) -> bool {
    let mut current = annot;
    for _ in 0..8 {
        if let Ok(ft) = current.get(b"FT") {
            return matches!(deref(doc, ft), LoObject::Name(name) if name == b"Btn");
        }
        match current.get(b"Parent").ok().and_then(|p| deref_dict(doc, p)) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    false
}

/// The checked appearance name is discovered, not configured: any key of
/// the normal-appearance dictionary other than `Off`. Falls back to
/// `Yes` for widgets without appearance streams.
fn discover_on_state(doc: &LoDocument, annot: &lopdf::Dictionary) -> Vec<u8> {
    let normal = annot
        .get(b"AP")
        .ok()
        .and_then(|ap| deref_dict(doc, ap))
        .and_then(|ap| ap.get(b"N").ok())
        .and_then(|n| deref_dict(doc, n));
    if let Some(normal) = normal {
        for (key, _) in normal.iter() {
            if !key.eq_ignore_ascii_case(b"Off") {
                return key.clone();
            }
        }
    }
    b"Yes".to_vec()
}

fn coerce_checked(value: &FieldValue) -> bool {
    match value {
        FieldValue::Bool(b) => *b,
        FieldValue::Text(s) => truthy_token(s),
        FieldValue::Null | FieldValue::Image(_) => false,
    }
}

fn coerce_string(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => s.clone(),
        FieldValue::Bool(true) => "true".to_string(),
        FieldValue::Bool(false) => "false".to_string(),
        FieldValue::Null | FieldValue::Image(_) => String::new(),
    }
}

/// PDF text string: plain literal when ASCII-safe, UTF-16BE with BOM
/// otherwise.
fn encode_text_string(value: &str) -> LoObject {
    if value.is_ascii() {
        return LoObject::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    LoObject::String(bytes, StringFormat::Hexadecimal)
}

fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

fn set_need_appearances(doc: &mut LoDocument) {
    let Ok(root_id) = doc.trailer.get(b"Root").and_then(LoObject::as_reference) else {
        return;
    };
    let acroform = doc
        .get_object(root_id)
        .ok()
        .and_then(|obj| obj.as_dict().ok())
        .and_then(|catalog| catalog.get(b"AcroForm").ok())
        .cloned();
    match acroform {
        Some(LoObject::Reference(form_id)) => {
            if let Ok(form) = doc.get_object_mut(form_id).and_then(LoObject::as_dict_mut) {
                form.set("NeedAppearances", LoObject::Boolean(true));
            }
        }
        Some(LoObject::Dictionary(_)) => {
            if let Ok(catalog) = doc.get_object_mut(root_id).and_then(LoObject::as_dict_mut) {
                if let Ok(LoObject::Dictionary(form)) = catalog.get_mut(b"AcroForm") {
                    form.set("NeedAppearances", LoObject::Boolean(true));
                }
            }
        }
        // No interactive form dictionary; nothing to flag.
        _ => {}
    }
}
