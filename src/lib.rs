//! Overlay and form-fill rendering for fixed-layout administrative PDF
//! templates.
//!
//! Two fill strategies share one entry point. Overlay documents get field
//! values drawn onto a transparent layer positioned by a JSON schema and
//! stamped onto the template pages; interactive-form documents get their
//! AcroForm widgets filled directly. [`Engine::render`] picks the strategy
//! from the [`DocumentKind`].

mod acroform;
mod binding;
mod error;
mod geometry;
mod merge;
mod overlay;
mod schema;
mod types;

pub use acroform::{extract_fields, fill_acroform};
pub use binding::{
    DecodedImage, FieldValue, ImageSource, ItemValue, RenderItem, SkipReason, ValueMap, bind,
    decode_image, truthy_token,
};
pub use error::FormError;
pub use geometry::resolve_for_page;
pub use merge::merge_overlay;
pub use schema::{FieldDef, FieldKind, SchemaRegistry, parse_schema};
pub use types::{Pt, fmt_pt};

use std::path::PathBuf;

/// How a document kind gets its values into the output PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStrategy {
    /// Draw values on a transparent layer and stamp it onto the template.
    Overlay,
    /// Set widget values inside the template's interactive form.
    AcroForm,
}

/// The supported attestation and declaration templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Sc144a,
    Sc144b,
    Sc144c,
    Sc144c2,
    Cerfa16702,
}

impl DocumentKind {
    /// Parse a model tag as callers actually write them: `144a`, `SC144A`,
    /// `sc-144a` and so on all name the same template. Unknown tags fail
    /// before any resource is touched.
    pub fn parse(tag: &str) -> Result<Self, FormError> {
        let compact: String = tag
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();
        let core = compact
            .strip_prefix("SC")
            .or_else(|| compact.strip_prefix("CERFA"))
            .unwrap_or(&compact);
        match core {
            "144A" => Ok(DocumentKind::Sc144a),
            "144B" => Ok(DocumentKind::Sc144b),
            "144C" => Ok(DocumentKind::Sc144c),
            "144C2" => Ok(DocumentKind::Sc144c2),
            "16702" => Ok(DocumentKind::Cerfa16702),
            _ => Err(FormError::UnsupportedKind(tag.to_string())),
        }
    }

    /// Canonical tag, also the stem of the kind's resource files.
    pub fn tag(&self) -> &'static str {
        match self {
            DocumentKind::Sc144a => "SC-144A",
            DocumentKind::Sc144b => "SC-144B",
            DocumentKind::Sc144c => "SC-144C",
            DocumentKind::Sc144c2 => "SC-144C2",
            DocumentKind::Cerfa16702 => "CERFA-16702",
        }
    }

    pub fn strategy(&self) -> FillStrategy {
        match self {
            DocumentKind::Sc144a
            | DocumentKind::Sc144b
            | DocumentKind::Sc144c
            | DocumentKind::Sc144c2 => FillStrategy::Overlay,
            DocumentKind::Cerfa16702 => FillStrategy::AcroForm,
        }
    }
}

/// Renders filled documents from a resource directory holding the blank
/// templates (`pdf/<TAG>.pdf`) and, for overlay kinds, the field schemas
/// (`json/<TAG>.json`).
///
/// The engine is cheap to share: schemas are parsed once and cached, and
/// every render call is otherwise stateless.
#[derive(Debug)]
pub struct Engine {
    resource_root: PathBuf,
    registry: SchemaRegistry,
}

impl Engine {
    pub fn new(resource_root: impl Into<PathBuf>) -> Self {
        Engine {
            resource_root: resource_root.into(),
            registry: SchemaRegistry::new(),
        }
    }

    pub fn schema_path(&self, kind: DocumentKind) -> PathBuf {
        self.resource_root
            .join("json")
            .join(format!("{}.json", kind.tag()))
    }

    pub fn template_path(&self, kind: DocumentKind) -> PathBuf {
        self.resource_root
            .join("pdf")
            .join(format!("{}.pdf", kind.tag()))
    }

    /// Render `kind` with the bundled template.
    pub fn render(&self, kind: DocumentKind, values: &ValueMap) -> Result<Vec<u8>, FormError> {
        let template = std::fs::read(self.template_path(kind))?;
        self.render_with_template(kind, &template, values)
    }

    /// Render `kind` onto a caller-supplied template, for revised authority
    /// templates that have not been bundled yet.
    pub fn render_with_template(
        &self,
        kind: DocumentKind,
        template_bytes: &[u8],
        values: &ValueMap,
    ) -> Result<Vec<u8>, FormError> {
        log::info!("rendering {} ({} values)", kind.tag(), values.len());
        match kind.strategy() {
            FillStrategy::AcroForm => fill_acroform(template_bytes, values),
            FillStrategy::Overlay => {
                let fields = self.registry.load(&self.schema_path(kind))?;
                let items = bind(&fields, values);
                merge_overlay(template_bytes, &items)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Document as LoDocument, Object as LoObject, Stream as LoStream, dictionary};

    fn temp_resource_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "formstamp_engine_{}_{}_{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(dir.join("json")).expect("mkdir json");
        std::fs::create_dir_all(dir.join("pdf")).expect("mkdir pdf");
        dir
    }

    /// Single blank A4-ish page.
    fn make_template_bytes() -> Vec<u8> {
        let mut doc = LoDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(LoStream::new(dictionary! {}, b"0 0 m 10 10 l S".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {},
            "MediaBox" => vec![
                0.into(),
                0.into(),
                LoObject::Real(595.276),
                LoObject::Real(841.89),
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
        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save");
        out
    }

    fn overlay_streams(bytes: &[u8]) -> Vec<String> {
        let doc = LoDocument::load_mem(bytes).expect("load");
        doc.objects
            .values()
            .filter_map(|obj| obj.as_stream().ok())
            .filter(|s| {
                s.dict
                    .get(b"Subtype")
                    .and_then(LoObject::as_name)
                    .map(|name| name == b"Form")
                    .unwrap_or(false)
            })
            .map(|s| {
                // Small streams are saved filterless; read them as-is.
                let bytes = s
                    .decompressed_content()
                    .unwrap_or_else(|_| s.content.clone());
                String::from_utf8_lossy(&bytes).into_owned()
            })
            .collect()
    }

    #[test]
    fn parse_accepts_model_tag_variants() {
        for tag in ["144a", "SC144A", "SC-144A", " sc_144a "] {
            assert_eq!(DocumentKind::parse(tag).expect(tag), DocumentKind::Sc144a);
        }
        assert_eq!(
            DocumentKind::parse("144c2").expect("144c2"),
            DocumentKind::Sc144c2
        );
        for tag in ["cerfa16702", "CERFA-16702", "16702"] {
            assert_eq!(
                DocumentKind::parse(tag).expect(tag),
                DocumentKind::Cerfa16702
            );
        }
    }

    #[test]
    fn parse_rejects_unknown_tag() {
        let err = DocumentKind::parse("SC-999Z").expect_err("unknown");
        assert!(matches!(err, FormError::UnsupportedKind(_)));
        assert!(err.to_string().contains("SC-999Z"));
    }

    #[test]
    fn strategy_per_kind() {
        assert_eq!(DocumentKind::Sc144a.strategy(), FillStrategy::Overlay);
        assert_eq!(DocumentKind::Sc144c2.strategy(), FillStrategy::Overlay);
        assert_eq!(DocumentKind::Cerfa16702.strategy(), FillStrategy::AcroForm);
    }

    #[test]
    fn render_missing_template_is_io_error() {
        let root = temp_resource_root("missing");
        let engine = Engine::new(&root);
        let err = engine
            .render(DocumentKind::Sc144a, &ValueMap::new())
            .expect_err("missing template");
        assert!(matches!(err, FormError::Io(_)));
    }

    #[test]
    fn render_overlay_end_to_end() {
        let root = temp_resource_root("e2e");
        std::fs::write(
            root.join("json/SC-144A.json"),
            br#"[
                {"key": "name", "type": "text", "x": 20.0, "y": 30.0, "page": 1},
                {"key": "agree", "type": "checkbox", "x": 20.0, "y": 60.0, "page": 1}
            ]"#,
        )
        .expect("schema");
        std::fs::write(root.join("pdf/SC-144A.pdf"), make_template_bytes()).expect("template");

        let engine = Engine::new(&root);
        let mut values = ValueMap::new();
        values.insert("name".to_string(), FieldValue::Text("Doe".to_string()));
        values.insert("agree".to_string(), FieldValue::Text("oui".to_string()));
        let out = engine.render(DocumentKind::Sc144a, &values).expect("render");

        let doc = LoDocument::load_mem(&out).expect("load");
        assert_eq!(doc.get_pages().len(), 1);
        let streams = overlay_streams(&out);
        assert_eq!(streams.len(), 1);
        assert!(streams[0].contains("(Doe) Tj"));
        // The checkbox cross is stroked, not typeset.
        assert!(streams[0].contains(" l\nS\n"));
    }

    #[test]
    fn render_isolates_a_bad_value_to_its_field() {
        let root = temp_resource_root("isolate");
        std::fs::write(
            root.join("json/SC-144A.json"),
            br#"[
                {"key": "name", "type": "text", "x": 20.0, "y": 30.0, "page": 1},
                {"key": "photo", "type": "image", "x": 20.0, "y": 80.0, "page": 1}
            ]"#,
        )
        .expect("schema");
        std::fs::write(root.join("pdf/SC-144A.pdf"), make_template_bytes()).expect("template");

        let engine = Engine::new(&root);
        let mut values = ValueMap::new();
        values.insert("name".to_string(), FieldValue::Text("Doe".to_string()));
        values.insert(
            "photo".to_string(),
            FieldValue::Image(ImageSource::Bytes(b"not an image".to_vec())),
        );
        let out = engine.render(DocumentKind::Sc144a, &values).expect("render");
        let streams = overlay_streams(&out);
        assert_eq!(streams.len(), 1);
        assert!(streams[0].contains("(Doe) Tj"));
        assert!(!streams[0].contains("/Im"));
    }

    #[test]
    fn render_with_unbound_values_passes_template_through() {
        let root = temp_resource_root("passthrough");
        std::fs::write(
            root.join("json/SC-144B.json"),
            br#"[{"key": "name", "type": "text", "x": 20.0, "y": 30.0, "page": 1}]"#,
        )
        .expect("schema");
        let template = make_template_bytes();

        let engine = Engine::new(&root);
        let mut values = ValueMap::new();
        values.insert("unrelated".to_string(), FieldValue::Text("x".to_string()));
        let out = engine
            .render_with_template(DocumentKind::Sc144b, &template, &values)
            .expect("render");
        let doc = LoDocument::load_mem(&out).expect("load");
        assert_eq!(doc.get_pages().len(), 1);
        assert!(overlay_streams(&out).is_empty());
    }
}
