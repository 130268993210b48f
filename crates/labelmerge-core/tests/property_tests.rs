//! Property-based tests for labelmerge-core
//!
//! Exercises the split → composite pipeline end to end with proptest.

use labelmerge_core::composite::fit_scale;
use labelmerge_core::geometry::mm_to_pt;
use labelmerge_core::{
    BatchOrchestrator, CompositeLayout, ContentSink, LabelJob, PageSize, PageSplitter,
    RotationContext, TemplateSource,
};
use lopdf::{Dictionary, Document, Object, Stream};
use proptest::prelude::*;

const EPS: f64 = 1e-6;

fn create_test_pdf(num_pages: u32, width_mm: f64, height_mm: f64) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let mut page_ids = Vec::new();

    for i in 0..num_pages {
        let content = format!("0 0 m {} {} l S", i * 10, i * 10);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let page = Dictionary::from_iter(vec![
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
        ]);
        page_ids.push(doc.add_object(page));
    }

    let pages = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Count", Object::Integer(num_pages as i64)),
        (
            "Kids",
            Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
        ),
    ]);
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

fn page_sizes(bytes: &[u8]) -> Vec<PageSize> {
    let source = TemplateSource::open(bytes).unwrap();
    (0..source.page_count())
        .map(|i| source.import_template(i).unwrap().size())
        .collect()
}

// ============================================================
// Scenarios
// ============================================================

#[test]
fn a3_sheets_with_eight_documents() {
    let sheet = create_test_pdf(2, 420.0, 297.0);
    let danfe = create_test_pdf(1, 100.0, 150.0);
    let output = BatchOrchestrator::default()
        .process(vec![LabelJob::new(sheet, vec![danfe; 8])])
        .unwrap();

    let sizes = page_sizes(&output);
    assert_eq!(sizes.len(), 8);
    for size in &sizes {
        // Page boxes round-trip through f32 reals
        assert!(size.is_close_to(&PageSize::new(210.0, 148.5).unwrap(), 1e-2));
    }

    let plan = CompositeLayout::default()
        .plan(
            PageSize::new(210.0, 148.5).unwrap(),
            Some(PageSize::new(100.0, 150.0).unwrap()),
        )
        .unwrap();
    assert!((plan.label.width - 151.2).abs() < EPS);
    assert!((plan.label.height - 106.92).abs() < EPS);
    assert!((plan.label.x + 20.0).abs() < EPS);
    let doc = plan.document.unwrap();
    assert!((doc.x - (210.0 - doc.width + 20.0)).abs() < EPS);
}

#[test]
fn invalid_encoding_is_reported() {
    let err = labelmerge_core::decode_artifact("not base64!!").unwrap_err();
    assert!(matches!(
        err,
        labelmerge_core::LabelMergeError::InvalidEncoding(_)
    ));
}

// ============================================================
// Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn document_fit_never_overflows_box(
        w in 1.0f64..1000.0,
        h in 1.0f64..1000.0,
        dw in 1.0f64..2000.0,
        dh in 1.0f64..2000.0,
    ) {
        let layout = CompositeLayout::default();
        let plan = layout
            .plan(PageSize::new(w, h).unwrap(), Some(PageSize::new(dw, dh).unwrap()))
            .unwrap();
        let doc = plan.document.unwrap();
        prop_assert!(doc.width <= plan.label.width + EPS);
        prop_assert!(doc.height <= plan.label.height + EPS);

        // One side always touches the box
        let s = fit_scale(plan.label.width, plan.label.height, PageSize::new(dw, dh).unwrap());
        let touches = (dw * s - plan.label.width).abs() < EPS
            || (dh * s - plan.label.height).abs() < EPS;
        prop_assert!(touches);
    }

    #[test]
    fn reopening_rotation_never_compounds(
        a in -720.0f64..720.0,
        b in -720.0f64..720.0,
        px in 0.0f64..600.0,
        py in 0.0f64..600.0,
    ) {
        let mut direct = ContentSink::new();
        let mut ctx = RotationContext::new();
        ctx.set(&mut direct, a, (px, py));
        ctx.set(&mut direct, b, (py, px));
        prop_assert!(direct.depth() <= 1);

        let mut explicit = ContentSink::new();
        let mut ctx = RotationContext::new();
        ctx.set(&mut explicit, a, (px, py));
        ctx.close(&mut explicit);
        ctx.set(&mut explicit, b, (py, px));

        let render = |sink: &ContentSink| {
            sink.operations()
                .iter()
                .map(|op| format!("{} {:?}", op.operator, op.operands))
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(render(&direct), render(&explicit));
    }
}

proptest! {
    // Each case builds and parses real PDFs
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn split_yields_four_half_pages(
        pages in 1u32..4,
        w in 20.0f64..600.0,
        h in 20.0f64..600.0,
    ) {
        let pdf = create_test_pdf(pages, w, h);
        let split = PageSplitter::split_bytes(&pdf).unwrap();
        let sizes = page_sizes(&split);
        prop_assert_eq!(sizes.len(), pages as usize * 4);
        let half = PageSize::new(w / 2.0, h / 2.0).unwrap();
        for size in sizes {
            prop_assert!(size.is_close_to(&half, 1e-2));
        }
    }

    #[test]
    fn output_count_is_shorter_of_labels_and_documents(
        pages in 1u32..3,
        documents in 0usize..10,
    ) {
        let sheet = create_test_pdf(pages, 200.0, 300.0);
        let danfe = create_test_pdf(1, 80.0, 120.0);
        let output = BatchOrchestrator::default()
            .process(vec![LabelJob::new(sheet, vec![danfe; documents])])
            .unwrap();
        let expected = documents.min(pages as usize * 4);
        prop_assert_eq!(page_sizes(&output).len(), expected);
    }
}
