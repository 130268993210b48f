//! Output page sequence
//!
//! [`OutputDocument`] accumulates pages in order and serializes them into one
//! PDF. Each page is drawn through a [`PageCanvas`], which owns the page's
//! content operations and its [`RotationContext`]. Rotation state therefore
//! lives and dies with the page.

use crate::error::{LabelMergeError, Result};
use crate::geometry::{mm_to_pt, Matrix, PageSize, Rect};
use crate::rotation::RotationContext;
use crate::template::{SourceId, Template, TemplateSource};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use tracing::debug;

/// Ordered content operations for one page.
#[derive(Debug, Default, Clone)]
pub struct ContentSink {
    operations: Vec<Operation>,
}

impl ContentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_state(&mut self) {
        self.operations.push(Operation::new("q", vec![]));
    }

    pub fn restore_state(&mut self) {
        self.operations.push(Operation::new("Q", vec![]));
    }

    pub fn concat(&mut self, matrix: &Matrix) {
        self.operations
            .push(Operation::new("cm", matrix.to_operands()));
    }

    pub fn paint_xobject(&mut self, name: &str) {
        self.operations.push(Operation::new(
            "Do",
            vec![Object::Name(name.as_bytes().to_vec())],
        ));
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Operator names in order, e.g. `["q", "cm", "Do", "Q"]`.
    pub fn operators(&self) -> Vec<&str> {
        self.operations.iter().map(|op| op.operator.as_str()).collect()
    }

    /// Current `q`/`Q` nesting depth.
    pub fn depth(&self) -> usize {
        self.operations.iter().fold(0usize, |depth, op| match op.operator.as_str() {
            "q" => depth + 1,
            "Q" => depth.saturating_sub(1),
            _ => depth,
        })
    }

    fn encode(self) -> Result<Vec<u8>> {
        Content {
            operations: self.operations,
        }
        .encode()
        .map_err(|e| LabelMergeError::OperationError(format!("Content encode failed: {}", e)))
    }
}

/// Page sequence under construction.
pub struct OutputDocument {
    doc: Document,
    pages_id: ObjectId,
    pages: Vec<ObjectId>,
    forms: HashMap<(SourceId, usize), ObjectId>,
    copied: HashMap<SourceId, HashMap<ObjectId, ObjectId>>,
}

impl Default for OutputDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDocument {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            pages: Vec::new(),
            forms: HashMap::new(),
            copied: HashMap::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Start a new page of `size` millimeters. The page joins the sequence
    /// only when [`PageCanvas::finish`] is called.
    pub fn begin_page(&mut self, size: PageSize) -> Result<PageCanvas<'_>> {
        let size = PageSize::new(size.width, size.height)?;
        Ok(PageCanvas {
            output: self,
            size,
            sink: ContentSink::new(),
            rotation: RotationContext::new(),
            xobjects: Dictionary::new(),
        })
    }

    /// Marker for [`rollback`](Self::rollback).
    pub fn checkpoint(&self) -> usize {
        self.pages.len()
    }

    /// Drop every page appended after `checkpoint`. Objects they referenced
    /// are pruned on serialization.
    pub fn rollback(&mut self, checkpoint: usize) {
        self.pages.truncate(checkpoint);
    }

    /// Serialize the sequence into one PDF.
    pub fn to_bytes(mut self) -> Result<Vec<u8>> {
        let kids = self
            .pages
            .iter()
            .map(|&id| Object::Reference(id))
            .collect::<Vec<_>>();
        let pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(self.pages.len() as i64)),
            ("Kids", Object::Array(kids)),
        ]);
        self.doc
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));

        let catalog = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(self.pages_id)),
        ]);
        let catalog_id = self.doc.add_object(catalog);
        self.doc.trailer.set("Root", Object::Reference(catalog_id));

        // Pages removed by rollback leave unreachable objects behind
        self.doc.prune_objects();
        self.doc.compress();

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| LabelMergeError::OperationError(format!("Save failed: {}", e)))?;
        Ok(buffer)
    }

    /// Form XObject for `template`, importing it on first use.
    fn form_for(&mut self, template: &Template<'_>) -> Result<ObjectId> {
        let source = template.source();
        let key = (source.id(), template.page_index());
        if let Some(&id) = self.forms.get(&key) {
            return Ok(id);
        }

        let frame = template.frame();
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"XObject".to_vec()));
        dict.set("Subtype", Object::Name(b"Form".to_vec()));
        dict.set("FormType", Object::Integer(1));
        dict.set(
            "BBox",
            Object::Array(frame.bbox.iter().map(|v| Object::Real(*v as f32)).collect()),
        );
        if let Some(matrix) = frame.matrix() {
            dict.set("Matrix", Object::Array(matrix.to_operands()));
        }

        if let Some(resources) = source.inherited(template.page_id(), b"Resources")? {
            let cache = self.copied.entry(source.id()).or_default();
            let copied = copy_object_deep(&mut self.doc, source, resources, cache)?;
            dict.set("Resources", copied);
        }

        let content = source.page_content(template.page_id())?;
        let form_id = self.doc.add_object(Stream::new(dict, content));
        self.forms.insert(key, form_id);
        debug!(
            source = ?source.id(),
            page = template.page_index(),
            "imported template as form XObject"
        );
        Ok(form_id)
    }
}

/// One page being drawn. Dropping it without [`finish`](Self::finish)
/// discards the page.
pub struct PageCanvas<'d> {
    output: &'d mut OutputDocument,
    size: PageSize,
    sink: ContentSink,
    rotation: RotationContext,
    xobjects: Dictionary,
}

impl PageCanvas<'_> {
    pub fn size(&self) -> PageSize {
        self.size
    }

    pub fn sink(&self) -> &ContentSink {
        &self.sink
    }

    pub fn rotation(&self) -> &RotationContext {
        &self.rotation
    }

    /// Rotate everything drawn afterwards by `degrees` around the pivot
    /// (millimeters, top-left origin). Zero closes the active rotation.
    pub fn set_rotation(&mut self, degrees: f64, pivot_x: f64, pivot_y: f64) {
        let pivot = self.to_pdf_space(pivot_x, pivot_y);
        self.rotation.set(&mut self.sink, degrees, pivot);
    }

    /// Draw `template` stretched into `rect` (millimeters, top-left origin).
    pub fn place(&mut self, template: &Template<'_>, rect: Rect) -> Result<()> {
        if !(rect.width > 0.0 && rect.height > 0.0) {
            return Err(LabelMergeError::InvalidTemplateSize {
                width: rect.width,
                height: rect.height,
            });
        }

        let form_id = self.output.form_for(template)?;
        let name = self.xobject_name(form_id);

        let frame = template.frame();
        let (extent_w, extent_h) = frame.extent();
        let (origin_x, origin_y) = frame.origin();
        let sx = mm_to_pt(rect.width) / extent_w;
        let sy = mm_to_pt(rect.height) / extent_h;
        let (left, bottom) = self.to_pdf_space(rect.x, rect.y + rect.height);
        let matrix = Matrix::scale_translate(sx, sy, left - origin_x * sx, bottom - origin_y * sy);

        self.sink.save_state();
        self.sink.concat(&matrix);
        self.sink.paint_xobject(&name);
        self.sink.restore_state();
        debug!(
            template = template.page_index(),
            x = rect.x,
            y = rect.y,
            width = rect.width,
            height = rect.height,
            "placed template"
        );
        Ok(())
    }

    /// Seal the page and append it to the document. An active rotation is
    /// closed first.
    pub fn finish(mut self) -> Result<ObjectId> {
        self.rotation.close(&mut self.sink);

        let (width_pt, height_pt) = self.size.to_points();
        let content = self.sink.encode()?;
        let content_id = self
            .output
            .doc
            .add_object(Stream::new(Dictionary::new(), content));

        let mut resources = Dictionary::new();
        resources.set("XObject", Object::Dictionary(self.xobjects));

        let page = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(self.output.pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(width_pt as f32),
                    Object::Real(height_pt as f32),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
            ("Resources", Object::Dictionary(resources)),
        ]);
        let page_id = self.output.doc.add_object(page);
        self.output.pages.push(page_id);
        Ok(page_id)
    }

    fn xobject_name(&mut self, form_id: ObjectId) -> String {
        let name = format!("TPL{}", form_id.0);
        self.xobjects
            .set(name.as_bytes(), Object::Reference(form_id));
        name
    }

    /// Top-left millimeters to bottom-left points.
    fn to_pdf_space(&self, x: f64, y: f64) -> (f64, f64) {
        (mm_to_pt(x), mm_to_pt(self.size.height - y))
    }
}

/// Deep copy an object from `source` into `output`, following references.
/// `cache` maps source ids to ids already allocated in `output`.
fn copy_object_deep(
    output: &mut Document,
    source: &TemplateSource,
    obj: &Object,
    cache: &mut HashMap<ObjectId, ObjectId>,
) -> Result<Object> {
    match obj {
        Object::Reference(id) => {
            if let Some(&new_id) = cache.get(id) {
                return Ok(Object::Reference(new_id));
            }
            // Reserve the id before recursing so cycles terminate
            let new_id = output.new_object_id();
            cache.insert(*id, new_id);
            let referenced = source.resolve(obj)?.clone();
            let copied = copy_object_deep(output, source, &referenced, cache)?;
            output.objects.insert(new_id, copied);
            Ok(Object::Reference(new_id))
        }
        Object::Dictionary(dict) => Ok(Object::Dictionary(copy_dictionary(
            output, source, dict, cache,
        )?)),
        Object::Array(items) => {
            let mut copied = Vec::with_capacity(items.len());
            for item in items {
                copied.push(copy_object_deep(output, source, item, cache)?);
            }
            Ok(Object::Array(copied))
        }
        Object::Stream(stream) => {
            let mut copied = stream.clone();
            copied.dict = copy_dictionary(output, source, &stream.dict, cache)?;
            Ok(Object::Stream(copied))
        }
        other => Ok(other.clone()),
    }
}

fn copy_dictionary(
    output: &mut Document,
    source: &TemplateSource,
    dict: &Dictionary,
    cache: &mut HashMap<ObjectId, ObjectId>,
) -> Result<Dictionary> {
    let mut copied = Dictionary::new();
    for (key, value) in dict.iter() {
        // Back-references into the source page tree are not needed by a form
        if key.as_slice() == b"Parent" {
            continue;
        }
        copied.set(key.clone(), copy_object_deep(output, source, value, cache)?);
    }
    Ok(copied)
}
