use crate::schema::{FieldDef, FieldKind};
use base64::Engine;
use image::GenericImageView;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw caller-provided value for one field, before coercion.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Text(String),
    Image(ImageSource),
}

/// Closed set of image value shapes the binding layer accepts.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
    DataUri(String),
}

pub type ValueMap = BTreeMap<String, FieldValue>;

/// A schema field bound to a concrete value, ready for page resolution.
/// `page` is `None` for items authored in continuous-coordinate mode.
#[derive(Debug, Clone)]
pub struct RenderItem {
    pub key: String,
    pub page: Option<u32>,
    pub x_mm: f32,
    pub y_mm: f32,
    pub width_mm: Option<f32>,
    pub height_mm: Option<f32>,
    pub radius_mm: Option<f32>,
    pub value: ItemValue,
}

#[derive(Debug, Clone)]
pub enum ItemValue {
    Text(String),
    Checkmark(bool),
    RadioDot(bool),
    Image(DecodedImage),
}

impl ItemValue {
    /// True when drawing the value would leave no marks on the page.
    pub fn is_blank(&self) -> bool {
        match self {
            ItemValue::Text(text) => text.is_empty(),
            ItemValue::Checkmark(checked) => !checked,
            ItemValue::RadioDot(selected) => !selected,
            ItemValue::Image(_) => false,
        }
    }
}

/// Decoded, placement-ready image: JPEG bytes passed through untouched,
/// everything else flattened to raw RGB rows (compressed at save time).
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub filter: Option<&'static str>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoImage,
    UndecodableImage,
}

/// Case-insensitive truthy tokens, including the locale variants the
/// historic document payloads used.
pub fn truthy_token(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "oui" | "vrai"
    )
}

fn coerce_bool(value: &FieldValue) -> bool {
    match value {
        FieldValue::Bool(b) => *b,
        FieldValue::Text(s) => truthy_token(s),
        FieldValue::Null | FieldValue::Image(_) => false,
    }
}

fn coerce_text(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => s.clone(),
        FieldValue::Bool(true) => "true".to_string(),
        FieldValue::Bool(false) => "false".to_string(),
        FieldValue::Null | FieldValue::Image(_) => String::new(),
    }
}

/// Bind raw values onto a schema, producing render items in schema order.
/// Keys in `values` that no field declares are ignored; declared fields
/// with no value get their type default. Image fields degrade to "absent"
/// when the value cannot be decoded.
pub fn bind(fields: &[FieldDef], values: &ValueMap) -> Vec<RenderItem> {
    let mut items = Vec::with_capacity(fields.len());
    for def in fields {
        let value = values.get(&def.key).unwrap_or(&FieldValue::Null);
        match bind_field(def, value) {
            Ok(item) => items.push(item),
            Err(SkipReason::NoImage) => {
                log::debug!("field {}: no image value, omitted", def.key);
            }
            Err(SkipReason::UndecodableImage) => {
                log::warn!("field {}: image value could not be decoded, omitted", def.key);
            }
        }
    }
    items
}

fn bind_field(def: &FieldDef, value: &FieldValue) -> Result<RenderItem, SkipReason> {
    let item_value = match def.kind {
        FieldKind::Text => ItemValue::Text(coerce_text(value)),
        FieldKind::Checkbox => ItemValue::Checkmark(coerce_bool(value)),
        FieldKind::Radio => ItemValue::RadioDot(coerce_bool(value)),
        FieldKind::Image => {
            let source = match value {
                FieldValue::Image(source) => source.clone(),
                // Historic payloads sent the signature as a data URI string.
                FieldValue::Text(s) if s.trim_start().starts_with("data:") => {
                    ImageSource::DataUri(s.clone())
                }
                _ => return Err(SkipReason::NoImage),
            };
            let decoded = decode_image(&source).ok_or(SkipReason::UndecodableImage)?;
            ItemValue::Image(decoded)
        }
    };
    Ok(RenderItem {
        key: def.key.clone(),
        page: Some(def.page),
        x_mm: def.x_mm,
        y_mm: def.y_mm,
        width_mm: def.width_mm,
        height_mm: def.height_mm,
        radius_mm: def.radius_mm,
        value: item_value,
    })
}

/// Normalize any accepted image source to placement-ready pixel data.
/// Returns `None` for anything that cannot be read or sniffed; the caller
/// treats that as "no image", never as a render failure.
pub fn decode_image(source: &ImageSource) -> Option<DecodedImage> {
    let bytes: Vec<u8> = match source {
        ImageSource::Bytes(bytes) => bytes.clone(),
        ImageSource::Path(path) => std::fs::read(path).ok()?,
        ImageSource::DataUri(uri) => parse_data_uri(uri)?.1,
    };
    decode_image_bytes(&bytes)
}

fn decode_image_bytes(data: &[u8]) -> Option<DecodedImage> {
    let format = image::guess_format(data).ok();
    let decoded = image::load_from_memory(data).ok()?;
    let (width, height) = decoded.dimensions();

    if matches!(format, Some(image::ImageFormat::Jpeg)) {
        let color_space = match decoded.color() {
            image::ColorType::L8 | image::ColorType::La8 => "DeviceGray",
            _ => "DeviceRGB",
        };
        return Some(DecodedImage {
            width,
            height,
            color_space,
            filter: Some("DCTDecode"),
            data: data.to_vec(),
        });
    }

    // Flatten alpha over white: the overlay sits on printed template art,
    // and soft masks are not worth the object-graph cost here.
    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity(rgb_buffer_len(width, height));
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        let a = a as u16;
        rgb.push(((r as u16 * a + 255 * (255 - a)) / 255) as u8);
        rgb.push(((g as u16 * a + 255 * (255 - a)) / 255) as u8);
        rgb.push(((b as u16 * a + 255 * (255 - a)) / 255) as u8);
    }
    Some(DecodedImage {
        width,
        height,
        color_space: "DeviceRGB",
        filter: None,
        data: rgb,
    })
}

// Widened before multiplying; pixel counts near u32::MAX would overflow
// a u32 product.
fn rgb_buffer_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let uri = uri.trim_start();
    if !uri.starts_with("data:") {
        return None;
    }
    let parts: Vec<&str> = uri.splitn(2, ',').collect();
    if parts.len() != 2 {
        return None;
    }
    let header = parts[0];
    let data_part = parts[1];
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains("base64") {
        base64::engine::general_purpose::STANDARD
            .decode(data_part)
            .ok()?
    } else {
        data_part.as_bytes().to_vec()
    };
    Some((mime, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn field(key: &str, kind: FieldKind) -> FieldDef {
        FieldDef {
            key: key.to_string(),
            kind,
            page: 1,
            x_mm: 10.0,
            y_mm: 20.0,
            width_mm: None,
            height_mm: None,
            radius_mm: None,
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).expect("png");
        out.into_inner()
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).expect("jpeg");
        out.into_inner()
    }

    #[test]
    fn truthy_token_table() {
        for token in ["1", "true", "yes", "on", "TRUE", " On ", "oui", "Vrai"] {
            assert!(truthy_token(token), "expected truthy: {:?}", token);
        }
        for token in ["0", "false", "no", "off", "", "2", "onn"] {
            assert!(!truthy_token(token), "expected falsy: {:?}", token);
        }
    }

    #[test]
    fn bind_applies_type_defaults_for_missing_values() {
        let fields = vec![
            field("name", FieldKind::Text),
            field("agree", FieldKind::Checkbox),
            field("choice", FieldKind::Radio),
            field("sig", FieldKind::Image),
        ];
        let items = bind(&fields, &ValueMap::new());
        // The absent image is omitted entirely, not rendered as a default.
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0].value, ItemValue::Text(s) if s.is_empty()));
        assert!(matches!(items[1].value, ItemValue::Checkmark(false)));
        assert!(matches!(items[2].value, ItemValue::RadioDot(false)));
    }

    #[test]
    fn bind_coerces_string_booleans() {
        let fields = vec![field("agree", FieldKind::Checkbox)];
        let mut values = ValueMap::new();
        values.insert("agree".to_string(), FieldValue::Text("yes".to_string()));
        let items = bind(&fields, &values);
        assert!(matches!(items[0].value, ItemValue::Checkmark(true)));
    }

    #[test]
    fn bind_keeps_schema_order_and_ignores_unknown_keys() {
        let fields = vec![field("b", FieldKind::Text), field("a", FieldKind::Text)];
        let mut values = ValueMap::new();
        values.insert("a".to_string(), FieldValue::Text("A".to_string()));
        values.insert("zz".to_string(), FieldValue::Text("ignored".to_string()));
        let items = bind(&fields, &values);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, "b");
        assert_eq!(items[1].key, "a");
    }

    #[test]
    fn bind_omits_undecodable_image_without_failing_siblings() {
        let fields = vec![field("name", FieldKind::Text), field("sig", FieldKind::Image)];
        let mut values = ValueMap::new();
        values.insert("name".to_string(), FieldValue::Text("Doe".to_string()));
        values.insert(
            "sig".to_string(),
            FieldValue::Image(ImageSource::Bytes(b"not an image".to_vec())),
        );
        let items = bind(&fields, &values);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "name");
    }

    #[test]
    fn rgb_buffer_len_handles_extreme_dimensions() {
        assert_eq!(rgb_buffer_len(8, 4), 8 * 4 * 3);
        // Would overflow a u32 product.
        assert_eq!(
            rgb_buffer_len(u32::MAX, 2),
            u32::MAX as usize * 2 * 3
        );
    }

    #[test]
    fn decode_image_reads_png_dimensions() {
        let decoded = decode_image(&ImageSource::Bytes(png_bytes(8, 4))).expect("decode");
        assert_eq!((decoded.width, decoded.height), (8, 4));
        assert_eq!(decoded.color_space, "DeviceRGB");
        assert_eq!(decoded.filter, None);
        assert_eq!(decoded.data.len(), 8 * 4 * 3);
    }

    #[test]
    fn decode_image_passes_jpeg_bytes_through() {
        let bytes = jpeg_bytes(6, 3);
        let decoded = decode_image(&ImageSource::Bytes(bytes.clone())).expect("decode");
        assert_eq!(decoded.filter, Some("DCTDecode"));
        assert_eq!(decoded.data, bytes);
    }

    #[test]
    fn decode_image_accepts_base64_data_uri() {
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png_bytes(2, 2))
        );
        let decoded = decode_image(&ImageSource::DataUri(uri)).expect("decode");
        assert_eq!((decoded.width, decoded.height), (2, 2));
    }

    #[test]
    fn decode_image_reads_from_path() {
        let dir = std::env::temp_dir().join(format!(
            "formstamp_binding_path_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("sig.png");
        std::fs::write(&path, png_bytes(3, 5)).expect("write");
        let decoded = decode_image(&ImageSource::Path(path)).expect("decode");
        assert_eq!((decoded.width, decoded.height), (3, 5));
    }

    #[test]
    fn bind_accepts_data_uri_string_for_image_field() {
        let fields = vec![field("sig", FieldKind::Image)];
        let mut values = ValueMap::new();
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png_bytes(2, 2))
        );
        values.insert("sig".to_string(), FieldValue::Text(uri));
        let items = bind(&fields, &values);
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0].value, ItemValue::Image(_)));
    }
}
