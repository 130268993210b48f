//! Label + fiscal document compositing
//!
//! One quadrant page (the label) and one rendered fiscal document are drawn
//! side by side on a page the size of the quadrant. Both are laid out in a
//! frame that is then rotated about the page center, so portrait templates
//! come out in the printer's landscape feed direction.
//!
//! The horizontal offsets push the label past the left edge and the document
//! past the right edge of the unrotated frame. After rotation this lines both
//! up against the printed edges.

use crate::canvas::OutputDocument;
use crate::error::{LabelMergeError, Result};
use crate::geometry::{PageSize, Rect};
use crate::template::Template;
use lopdf::ObjectId;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeLayout {
    /// Rotation applied around the page center, in degrees
    pub rotation_degrees: f64,
    /// Fraction of the page the label box occupies
    pub label_scale: f64,
    /// Label x position in the unrotated frame (mm)
    pub label_offset_x: f64,
    /// Added to the document's right-aligned x position (mm)
    pub document_offset_x: f64,
}

impl Default for CompositeLayout {
    fn default() -> Self {
        Self {
            rotation_degrees: 270.0,
            label_scale: 0.72,
            label_offset_x: -20.0,
            document_offset_x: 20.0,
        }
    }
}

/// Resolved placements for one composited page, in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LayoutPlan {
    pub page: PageSize,
    pub rotation_degrees: f64,
    pub pivot: (f64, f64),
    pub label: Rect,
    pub document: Option<Rect>,
    pub document_scale: Option<f64>,
}

impl CompositeLayout {
    pub fn validate(&self) -> Result<()> {
        if !(self.label_scale > 0.0 && self.label_scale.is_finite()) {
            return Err(LabelMergeError::InvalidTemplateSize {
                width: self.label_scale,
                height: self.label_scale,
            });
        }
        Ok(())
    }

    /// Compute placements for a label of size `label` and an optional
    /// document of intrinsic size `document`.
    pub fn plan(&self, label: PageSize, document: Option<PageSize>) -> Result<LayoutPlan> {
        self.validate()?;
        let page = PageSize::new(label.width, label.height)?;
        let (w, h) = (page.width, page.height);

        let label_w = w * self.label_scale;
        let label_h = h * self.label_scale;
        let label_rect = Rect::new(self.label_offset_x, (h - label_h) / 2.0, label_w, label_h);

        let (document_rect, document_scale) = match document {
            Some(size) => {
                let size = PageSize::new(size.width, size.height)?;
                let scale = fit_scale(label_w, label_h, size);
                let doc_w = size.width * scale;
                let doc_h = size.height * scale;
                let rect = Rect::new(
                    w - doc_w + self.document_offset_x,
                    (h - doc_h) / 2.0,
                    doc_w,
                    doc_h,
                );
                (Some(rect), Some(scale))
            }
            None => (None, None),
        };

        Ok(LayoutPlan {
            page,
            rotation_degrees: self.rotation_degrees,
            pivot: (w / 2.0, h / 2.0),
            label: label_rect,
            document: document_rect,
            document_scale,
        })
    }
}

/// Largest uniform scale that fits `size` inside `box_w` x `box_h`.
pub fn fit_scale(box_w: f64, box_h: f64, size: PageSize) -> f64 {
    (box_w / size.width).min(box_h / size.height)
}

#[derive(Debug, Clone, Default)]
pub struct Compositor {
    layout: CompositeLayout,
    require_document: bool,
}

impl Compositor {
    pub fn new(layout: CompositeLayout) -> Self {
        Self {
            layout,
            require_document: false,
        }
    }

    /// Fail with `MissingDocumentTemplate` instead of emitting a label-only
    /// page when no document is given.
    pub fn require_document(mut self, required: bool) -> Self {
        self.require_document = required;
        self
    }

    pub fn layout(&self) -> &CompositeLayout {
        &self.layout
    }

    /// Append one composited page to `output`. `position` is only used for
    /// error reporting.
    pub fn compose(
        &self,
        output: &mut OutputDocument,
        position: usize,
        label: &Template<'_>,
        document: Option<&Template<'_>>,
    ) -> Result<ObjectId> {
        if document.is_none() && self.require_document {
            return Err(LabelMergeError::MissingDocumentTemplate { position });
        }

        let plan = self
            .layout
            .plan(label.size(), document.map(|d| d.size()))?;

        let mut canvas = output.begin_page(plan.page)?;
        canvas.set_rotation(plan.rotation_degrees, plan.pivot.0, plan.pivot.1);
        canvas.place(label, plan.label)?;
        if let (Some(document), Some(rect)) = (document, plan.document) {
            canvas.place(document, rect)?;
        }
        canvas.set_rotation(0.0, 0.0, 0.0);
        let page_id = canvas.finish()?;

        debug!(
            position,
            width = plan.page.width,
            height = plan.page.height,
            document_scale = ?plan.document_scale,
            "composited page"
        );
        Ok(page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mm_to_pt;
    use crate::template::TemplateSource;
    use lopdf::{content::Content, Dictionary, Document, Object, Stream};
    use pretty_assertions::assert_eq;

    const EPS: f64 = 1e-9;

    fn single_page_pdf(width_mm: f64, height_mm: f64) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            b"0 0 m 100 100 l S".to_vec(),
        ));
        let page_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(mm_to_pt(width_mm) as f32),
                    Object::Real(mm_to_pt(height_mm) as f32),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
        ]));
        doc.objects.insert(
            pages_id,
            Object::Dictionary(Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Count", Object::Integer(1)),
                ("Kids", Object::Array(vec![Object::Reference(page_id)])),
            ])),
        );
        let catalog_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_default_layout_constants() {
        let layout = CompositeLayout::default();
        assert_eq!(layout.rotation_degrees, 270.0);
        assert_eq!(layout.label_scale, 0.72);
        assert_eq!(layout.label_offset_x, -20.0);
        assert_eq!(layout.document_offset_x, 20.0);
    }

    #[test]
    fn test_plan_for_a6_quadrant() {
        let label = PageSize::new(210.0, 148.5).unwrap();
        let document = PageSize::new(100.0, 150.0).unwrap();
        let plan = CompositeLayout::default()
            .plan(label, Some(document))
            .unwrap();

        assert_eq!(plan.pivot, (105.0, 74.25));
        assert!((plan.label.x + 20.0).abs() < EPS);
        assert!((plan.label.width - 151.2).abs() < EPS);
        assert!((plan.label.height - 106.92).abs() < EPS);
        assert!((plan.label.y - (148.5 - 106.92) / 2.0).abs() < EPS);

        // Height bound: 106.92 / 150
        let scale = plan.document_scale.unwrap();
        assert!((scale - 106.92 / 150.0).abs() < EPS);
        let doc = plan.document.unwrap();
        assert!((doc.height - 106.92).abs() < EPS);
        assert!((doc.x - (210.0 - doc.width + 20.0)).abs() < EPS);
        assert!((doc.y - (148.5 - doc.height) / 2.0).abs() < EPS);
    }

    #[test]
    fn test_plan_width_bound_document() {
        let label = PageSize::new(210.0, 148.5).unwrap();
        let wide = PageSize::new(400.0, 50.0).unwrap();
        let plan = CompositeLayout::default().plan(label, Some(wide)).unwrap();
        let doc = plan.document.unwrap();
        assert!((doc.width - 151.2).abs() < EPS);
        assert!(doc.height <= 106.92 + EPS);
    }

    #[test]
    fn test_plan_without_document() {
        let plan = CompositeLayout::default()
            .plan(PageSize::new(100.0, 100.0).unwrap(), None)
            .unwrap();
        assert_eq!(plan.document, None);
        assert_eq!(plan.document_scale, None);
    }

    #[test]
    fn test_plan_rejects_degenerate_document() {
        let result = CompositeLayout::default().plan(
            PageSize::new(100.0, 100.0).unwrap(),
            Some(PageSize {
                width: 0.0,
                height: 10.0,
            }),
        );
        assert!(matches!(
            result,
            Err(LabelMergeError::InvalidTemplateSize { .. })
        ));
    }

    #[test]
    fn test_layout_deserializes_partial_config() {
        let layout: CompositeLayout = serde_json::from_str(r#"{"label_scale":0.5}"#).unwrap();
        assert_eq!(layout.label_scale, 0.5);
        assert_eq!(layout.rotation_degrees, 270.0);
    }

    #[test]
    fn test_compose_emits_balanced_rotated_page() {
        let label_pdf = single_page_pdf(210.0, 148.5);
        let doc_pdf = single_page_pdf(100.0, 150.0);
        let labels = TemplateSource::open(&label_pdf).unwrap();
        let documents = TemplateSource::open(&doc_pdf).unwrap();
        let label = labels.import_template(0).unwrap();
        let document = documents.import_template(0).unwrap();

        let mut output = OutputDocument::new();
        Compositor::default()
            .compose(&mut output, 0, &label, Some(&document))
            .unwrap();
        assert_eq!(output.page_count(), 1);

        let bytes = output.to_bytes().unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let ops = Content::decode(&doc.get_page_content(page_id).unwrap())
            .unwrap()
            .operations;
        let operators: Vec<&str> = ops.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(
            operators,
            vec!["q", "cm", "cm", "q", "cm", "Do", "Q", "q", "cm", "Do", "Q", "Q"]
        );

        let operands = |index: usize| -> Vec<f64> {
            ops[index]
                .operands
                .iter()
                .map(|o| match o {
                    Object::Integer(i) => *i as f64,
                    Object::Real(r) => *r as f64,
                    other => panic!("non-numeric operand {:?}", other),
                })
                .collect()
        };
        let assert_close = |actual: Vec<f64>, expected: [f64; 6]| {
            for (a, e) in actual.iter().zip(expected) {
                assert!((a - e).abs() < 1e-2, "{:?} vs {:?}", actual, expected);
            }
        };

        // Pivot at the page center: (105, 74.25) mm, y flipped into PDF space
        assert_close(operands(1), [0.0, -1.0, 1.0, 0.0, 297.638, 210.472]);
        assert_close(operands(2), [1.0, 0.0, 0.0, 1.0, -297.638, -210.472]);
        // Label box at x = -20 mm, scaled to 0.72 of the page
        assert_close(operands(4), [0.72, 0.0, 0.0, 0.72, -56.693, 58.932]);
        // Document fit to 106.92 mm tall, at x = 210 - 71.28 + 20 mm
        assert_close(operands(8), [0.7128, 0.0, 0.0, 0.7128, 449.915, 58.932]);
    }

    #[test]
    fn test_compose_requires_document_when_configured() {
        let label_pdf = single_page_pdf(210.0, 148.5);
        let labels = TemplateSource::open(&label_pdf).unwrap();
        let label = labels.import_template(0).unwrap();

        let mut output = OutputDocument::new();
        let err = Compositor::default()
            .require_document(true)
            .compose(&mut output, 3, &label, None)
            .unwrap_err();
        assert!(matches!(
            err,
            LabelMergeError::MissingDocumentTemplate { position: 3 }
        ));
        assert_eq!(output.page_count(), 0);
    }

    #[test]
    fn test_compose_label_only() {
        let label_pdf = single_page_pdf(210.0, 148.5);
        let labels = TemplateSource::open(&label_pdf).unwrap();
        let label = labels.import_template(0).unwrap();

        let mut output = OutputDocument::new();
        Compositor::default()
            .compose(&mut output, 0, &label, None)
            .unwrap();
        assert_eq!(output.page_count(), 1);
    }
}
