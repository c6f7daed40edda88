use crate::binding::RenderItem;
use crate::error::FormError;
use crate::geometry::resolve_for_page;
use crate::overlay;
use crate::types::Pt;
use lopdf::{
    Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, Stream as LoStream,
    dictionary,
};

fn lopdf_err(err: lopdf::Error) -> FormError {
    FormError::TemplateParse(err.to_string())
}

fn page_box(page: &lopdf::Dictionary) -> Vec<LoObject> {
    if let Ok(arr) = page.get(b"CropBox").and_then(LoObject::as_array) {
        return arr.clone();
    }
    if let Ok(arr) = page.get(b"MediaBox").and_then(LoObject::as_array) {
        return arr.clone();
    }
    vec![0.into(), 0.into(), 612.into(), 792.into()]
}

fn box_number(obj: &LoObject) -> f32 {
    match obj {
        LoObject::Integer(v) => *v as f32,
        LoObject::Real(v) => *v,
        _ => 0.0,
    }
}

fn box_dims(bbox: &[LoObject]) -> (f32, f32) {
    if bbox.len() != 4 {
        return (612.0, 792.0);
    }
    let width = box_number(&bbox[2]) - box_number(&bbox[0]);
    let height = box_number(&bbox[3]) - box_number(&bbox[1]);
    (width, height)
}

fn page_resources_object(doc: &LoDocument, page: &lopdf::Dictionary) -> LoObject {
    match page.get(b"Resources") {
        Ok(obj) => match obj {
            LoObject::Reference(id) => doc
                .get_object(*id)
                .map(|o| o.clone())
                .unwrap_or_else(|_| LoObject::Dictionary(lopdf::Dictionary::new())),
            LoObject::Dictionary(d) => LoObject::Dictionary(d.clone()),
            _ => LoObject::Dictionary(lopdf::Dictionary::new()),
        },
        Err(_) => LoObject::Dictionary(lopdf::Dictionary::new()),
    }
}

fn page_resources_dict(page: &lopdf::Dictionary, doc: &LoDocument) -> lopdf::Dictionary {
    match page.get(b"Resources") {
        Ok(LoObject::Dictionary(d)) => d.clone(),
        Ok(LoObject::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        _ => lopdf::Dictionary::new(),
    }
}

fn page_xobject_dict(resources: &lopdf::Dictionary, doc: &LoDocument) -> lopdf::Dictionary {
    match resources.get(b"XObject") {
        Ok(LoObject::Dictionary(d)) => d.clone(),
        Ok(LoObject::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        _ => lopdf::Dictionary::new(),
    }
}

/// Stamp bound items onto a template, page by page.
///
/// The template is never visually altered: each page that receives items
/// gets its rendered overlay appended as a Form XObject content layer on
/// top of the original stream. Pages with no applicable items pass
/// through untouched, and a page whose compositing fails is emitted as
/// the unmodified original. Output page count and order always match the
/// input.
pub fn merge_overlay(template_bytes: &[u8], items: &[RenderItem]) -> Result<Vec<u8>, FormError> {
    let mut template = LoDocument::load_mem(template_bytes).map_err(lopdf_err)?;
    if template.is_encrypted() {
        return Err(FormError::TemplateEncrypted);
    }

    let pages: Vec<(u32, LoObjectId)> = template.get_pages().into_iter().collect();
    for (page_no, page_id) in pages {
        let page_dict = match template.get_object(page_id).and_then(LoObject::as_dict) {
            Ok(dict) => dict.clone(),
            Err(err) => {
                log::warn!("page {}: unreadable page object ({}), left untouched", page_no, err);
                continue;
            }
        };
        let (width_pt, height_pt) = box_dims(&page_box(&page_dict));
        let page_height_mm = Pt::from_f32(height_pt).to_mm();
        let mut page_items = resolve_for_page(items, page_no, page_height_mm);
        // No layer for pages where nothing would be drawn.
        page_items.retain(|item| !item.value.is_blank());
        if page_items.is_empty() {
            continue;
        }
        if let Err(message) =
            stamp_page(&mut template, page_id, page_no, &page_items, width_pt, height_pt)
        {
            log::warn!(
                "page {}: overlay compositing failed ({}), page emitted unmodified",
                page_no,
                message
            );
        }
    }

    template.prune_objects();
    template.renumber_objects();
    template.compress();
    let mut out = Vec::new();
    template
        .save_to(&mut out)
        .map_err(|err| FormError::OutputWrite(err.to_string()))?;
    Ok(out)
}

/// Render the overlay for one page, import it into the template's object
/// graph and composite it as a top layer. All fallible work happens
/// before the page dictionary is touched, so a failure leaves the page in
/// its original state.
fn stamp_page(
    doc: &mut LoDocument,
    page_id: LoObjectId,
    page_no: u32,
    items: &[RenderItem],
    width_pt: f32,
    height_pt: f32,
) -> Result<(), String> {
    let mut overlay_doc = overlay::render_page(items, width_pt, height_pt);

    let start_id = doc.max_id + 1;
    overlay_doc.renumber_objects_with(start_id);
    let overlay_page_id = *overlay_doc
        .get_pages()
        .values()
        .next()
        .ok_or("overlay document has no pages")?;
    if overlay_doc.max_id > doc.max_id {
        doc.max_id = overlay_doc.max_id;
    }
    doc.objects.extend(overlay_doc.objects);

    let overlay_page = doc
        .get_object(overlay_page_id)
        .and_then(LoObject::as_dict)
        .map_err(|err| err.to_string())?
        .clone();
    let overlay_content = doc
        .get_page_content(overlay_page_id)
        .map_err(|err| err.to_string())?;
    let bbox = page_box(&overlay_page);
    let overlay_resources = page_resources_object(doc, &overlay_page);

    let form_id = doc.add_object(LoStream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "FormType" => 1,
            "BBox" => LoObject::Array(bbox),
            "Resources" => overlay_resources,
        },
        overlay_content,
    ));
    let form_name = format!("OVL{}", page_no);

    let page_dict = doc
        .get_object(page_id)
        .and_then(LoObject::as_dict)
        .map_err(|err| err.to_string())?
        .clone();
    let mut resources = page_resources_dict(&page_dict, doc);
    let mut xobjects = page_xobject_dict(&resources, doc);
    xobjects.set(form_name.as_bytes().to_vec(), LoObject::Reference(form_id));
    resources.set("XObject", LoObject::Dictionary(xobjects));

    {
        let page_mut = doc
            .get_object_mut(page_id)
            .and_then(LoObject::as_dict_mut)
            .map_err(|err| err.to_string())?;
        page_mut.set("Resources", LoObject::Dictionary(resources));
    }

    let do_content = format!("q /{} Do Q\n", form_name).into_bytes();
    doc.add_page_contents(page_id, do_content)
        .map_err(|err| err.to_string())
}
