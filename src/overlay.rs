use crate::binding::{DecodedImage, ItemValue, RenderItem};
use crate::types::{Pt, fmt_pt};
use lopdf::{Document as LoDocument, Object as LoObject, Stream as LoStream, dictionary};

const TEXT_FONT_SIZE: f32 = 9.0;
const CROSS_SIZE_MM: f32 = 2.0;
const DEFAULT_RADIUS_MM: f32 = 1.2;
const DEFAULT_IMAGE_WIDTH_MM: f32 = 40.0;

// Circle-from-beziers control point distance.
const K: f32 = 0.552_284_75;

/// Render the items resolved for one page onto a blank page of the given
/// size. Anchors are millimeters from the top-left corner; the emitted
/// content stream uses the PDF bottom-left origin.
///
/// A single bad item is skipped with a warning so it cannot blank the
/// rest of the page.
pub fn render_page(items: &[RenderItem], width_pt: f32, height_pt: f32) -> LoDocument {
    let mut content = String::new();
    let mut images: Vec<&DecodedImage> = Vec::new();

    for item in items {
        if let Err(reason) = draw_item(&mut content, &mut images, item, height_pt) {
            log::warn!("field {}: not drawn ({})", item.key, reason);
        }
    }

    assemble_document(content.into_bytes(), &images, width_pt, height_pt)
}

fn draw_item<'a>(
    content: &mut String,
    images: &mut Vec<&'a DecodedImage>,
    item: &'a RenderItem,
    height_pt: f32,
) -> Result<(), &'static str> {
    if !item.x_mm.is_finite() || !item.y_mm.is_finite() {
        return Err("non-finite anchor");
    }
    let x = Pt::from_mm(item.x_mm);
    // Schemas are authored top-left; flip onto the PDF origin.
    let y = Pt::from_f32(height_pt) - Pt::from_mm(item.y_mm);

    match &item.value {
        ItemValue::Text(text) => {
            if text.is_empty() {
                return Ok(());
            }
            let (encoded, replaced) = encode_winansi(text);
            if replaced > 0 {
                log::debug!("field {}: {} chars outside WinAnsi replaced", item.key, replaced);
            }
            content.push_str(&format!(
                "BT\n/F1 {} Tf\n{} {} Td\n({}) Tj\nET\n",
                fmt_pt(Pt::from_f32(TEXT_FONT_SIZE)),
                fmt_pt(x),
                fmt_pt(y),
                encoded
            ));
        }
        ItemValue::Checkmark(checked) => {
            if !*checked {
                return Ok(());
            }
            // Only the diagonal cross; the box itself is template art.
            let half = Pt::from_mm(CROSS_SIZE_MM) * 0.5;
            let (x0, y0) = (x - half, y - half);
            let (x1, y1) = (x + half, y + half);
            content.push_str(&format!(
                "q\n1 w\n{x0} {y0} m\n{x1} {y1} l\n{x0} {y1} m\n{x1} {y0} l\nS\nQ\n",
                x0 = fmt_pt(x0),
                y0 = fmt_pt(y0),
                x1 = fmt_pt(x1),
                y1 = fmt_pt(y1),
            ));
        }
        ItemValue::RadioDot(selected) => {
            if !*selected {
                return Ok(());
            }
            let r = Pt::from_mm(item.radius_mm.unwrap_or(DEFAULT_RADIUS_MM));
            push_filled_circle(content, x, y, r);
        }
        ItemValue::Image(image) => {
            if image.width == 0 || image.height == 0 {
                return Err("zero-sized image");
            }
            let (w_pt, h_pt) = image_box(item, image);
            let name = format!("Im{}", images.len() + 1);
            images.push(image);
            // Anchor the top-left corner of the image on the field anchor.
            content.push_str(&format!(
                "q\n{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
                fmt_pt(w_pt),
                fmt_pt(h_pt),
                fmt_pt(x),
                fmt_pt(y - h_pt),
                name
            ));
        }
    }
    Ok(())
}

/// Target box in points: declared millimeter sizes win, a missing edge is
/// derived from the intrinsic aspect ratio, and with neither declared the
/// image gets a default width.
fn image_box(item: &RenderItem, image: &DecodedImage) -> (Pt, Pt) {
    let aspect = image.height as f32 / image.width as f32;
    let (w_mm, h_mm) = match (item.width_mm, item.height_mm) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, w * aspect),
        (None, Some(h)) => (h / aspect, h),
        (None, None) => (DEFAULT_IMAGE_WIDTH_MM, DEFAULT_IMAGE_WIDTH_MM * aspect),
    };
    (Pt::from_mm(w_mm), Pt::from_mm(h_mm))
}

fn push_filled_circle(content: &mut String, cx: Pt, cy: Pt, r: Pt) {
    let k = r * K;
    content.push_str(&format!(
        "q\n{} {} m\n",
        fmt_pt(cx + r),
        fmt_pt(cy)
    ));
    content.push_str(&format!(
        "{} {} {} {} {} {} c\n",
        fmt_pt(cx + r),
        fmt_pt(cy + k),
        fmt_pt(cx + k),
        fmt_pt(cy + r),
        fmt_pt(cx),
        fmt_pt(cy + r)
    ));
    content.push_str(&format!(
        "{} {} {} {} {} {} c\n",
        fmt_pt(cx - k),
        fmt_pt(cy + r),
        fmt_pt(cx - r),
        fmt_pt(cy + k),
        fmt_pt(cx - r),
        fmt_pt(cy)
    ));
    content.push_str(&format!(
        "{} {} {} {} {} {} c\n",
        fmt_pt(cx - r),
        fmt_pt(cy - k),
        fmt_pt(cx - k),
        fmt_pt(cy - r),
        fmt_pt(cx),
        fmt_pt(cy - r)
    ));
    content.push_str(&format!(
        "{} {} {} {} {} {} c\nf\nQ\n",
        fmt_pt(cx + k),
        fmt_pt(cy - r),
        fmt_pt(cx + r),
        fmt_pt(cy - k),
        fmt_pt(cx + r),
        fmt_pt(cy)
    ));
}

fn assemble_document(
    content: Vec<u8>,
    images: &[&DecodedImage],
    width_pt: f32,
    height_pt: f32,
) -> LoDocument {
    let mut doc = LoDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut xobjects = lopdf::Dictionary::new();
    for (idx, image) in images.iter().enumerate() {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width as i64,
            "Height" => image.height as i64,
            "ColorSpace" => LoObject::Name(image.color_space.as_bytes().to_vec()),
            "BitsPerComponent" => 8,
        };
        let stream = if let Some(filter) = image.filter {
            dict.set("Filter", LoObject::Name(filter.as_bytes().to_vec()));
            LoStream::new(dict, image.data.clone()).with_compression(false)
        } else {
            // Raw rows; picked up by the flate pass at save time.
            LoStream::new(dict, image.data.clone())
        };
        let image_id = doc.add_object(stream);
        xobjects.set(format!("Im{}", idx + 1), LoObject::Reference(image_id));
    }

    let mut resources = dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    };
    if !xobjects.is_empty() {
        resources.set("XObject", LoObject::Dictionary(xobjects));
    }
    let resources_id = doc.add_object(resources);

    let content_id = doc.add_object(LoStream::new(dictionary! {}, content));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![
            0.into(),
            0.into(),
            LoObject::Real(width_pt),
            LoObject::Real(height_pt),
        ],
    });
    doc.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

/// WinAnsi (cp1252) encode plus PDF literal-string escaping. Characters
/// outside the codepage become `?` and are counted for the caller's log.
fn encode_winansi(input: &str) -> (String, usize) {
    let mut out = String::new();
    let mut replaced = 0usize;
    for ch in input.chars() {
        let byte = match ch {
            '\u{0000}'..='\u{007F}' => ch as u8,
            '\u{00A0}'..='\u{00FF}' => ch as u8,
            '\u{20AC}' => 0x80,
            '\u{201A}' => 0x82,
            '\u{0192}' => 0x83,
            '\u{201E}' => 0x84,
            '\u{2026}' => 0x85,
            '\u{2020}' => 0x86,
            '\u{2021}' => 0x87,
            '\u{02C6}' => 0x88,
            '\u{2030}' => 0x89,
            '\u{0160}' => 0x8A,
            '\u{2039}' => 0x8B,
            '\u{0152}' => 0x8C,
            '\u{017D}' => 0x8E,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{02DC}' => 0x98,
            '\u{2122}' => 0x99,
            '\u{0161}' => 0x9A,
            '\u{203A}' => 0x9B,
            '\u{0153}' => 0x9C,
            '\u{017E}' => 0x9E,
            '\u{0178}' => 0x9F,
            _ => {
                replaced += 1;
                b'?'
            }
        };
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if b < 0x20 || b >= 0x7f => out.push_str(&format!("\\{:03o}", b)),
            b => out.push(b as char),
        }
    }
    (out, replaced)
}
