//! Foreign pages as opaque drawable templates
//!
//! A [`TemplateSource`] owns one parsed page-description document. Importing a
//! page yields a [`Template`]: a back-reference to the source page plus its
//! visible size. Templates are never inspected beyond the page boxes; their
//! content stream and resources are copied verbatim into a form XObject the
//! first time an [`OutputDocument`](crate::canvas::OutputDocument) draws them.

use crate::error::{LabelMergeError, Result};
use crate::geometry::{Matrix, PageSize};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Inherited page attributes are looked up through at most this many parents.
const MAX_TREE_DEPTH: usize = 32;

/// Process-unique identity of an opened source, used to key import caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

pub struct TemplateSource {
    id: SourceId,
    doc: Document,
    pages: Vec<ObjectId>,
}

impl TemplateSource {
    /// Parse a raw PDF buffer. The bytes are only read.
    pub fn open(bytes: &[u8]) -> Result<Self> {
        let doc =
            Document::load_mem(bytes).map_err(|e| LabelMergeError::MalformedInput(e.to_string()))?;
        if doc.is_encrypted() {
            return Err(LabelMergeError::MalformedInput(
                "encrypted documents cannot be imported".into(),
            ));
        }
        let pages = doc.get_pages().into_values().collect();
        Ok(Self {
            id: SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)),
            doc,
            pages,
        })
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Import page `page_index` (0-based) as a template.
    pub fn import_template(&self, page_index: usize) -> Result<Template<'_>> {
        let page_id = *self
            .pages
            .get(page_index)
            .ok_or(LabelMergeError::PageIndexOutOfRange {
                index: page_index,
                count: self.pages.len(),
            })?;

        let bbox = self.page_box(page_id)?;
        let rotate = match self.inherited(page_id, b"Rotate")? {
            Some(obj) => number(obj).map(|r| r as i64).unwrap_or(0),
            None => 0,
        };
        let frame = FormFrame::new(bbox, rotate);
        let (width_pt, height_pt) = frame.extent();
        let size = PageSize::from_points(width_pt, height_pt)?;

        Ok(Template {
            source: self,
            page_index,
            page_id,
            frame,
            size,
        })
    }

    /// CropBox when present, MediaBox otherwise.
    fn page_box(&self, page_id: ObjectId) -> Result<[f64; 4]> {
        let media = self.inherited(page_id, b"MediaBox")?;
        let crop = self.inherited(page_id, b"CropBox")?;
        let chosen = crop.or(media).ok_or_else(|| {
            LabelMergeError::MalformedInput(format!("page {:?} has no MediaBox", page_id))
        })?;
        self.parse_box(chosen)
    }

    fn parse_box(&self, obj: &Object) -> Result<[f64; 4]> {
        let array = self
            .resolve(obj)?
            .as_array()
            .map_err(|_| LabelMergeError::MalformedInput("page box is not an array".into()))?;
        if array.len() != 4 {
            return Err(LabelMergeError::MalformedInput(format!(
                "page box has {} entries",
                array.len()
            )));
        }
        let mut values = [0.0; 4];
        for (slot, item) in values.iter_mut().zip(array) {
            *slot = number(self.resolve(item)?).ok_or_else(|| {
                LabelMergeError::MalformedInput("page box entry is not a number".into())
            })?;
        }
        let [x0, y0, x1, y1] = values;
        Ok([x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)])
    }

    /// Look up a page attribute, walking `/Parent` for inheritable keys.
    pub(crate) fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Result<Option<&Object>> {
        let mut node = self.dictionary(page_id)?;
        for _ in 0..MAX_TREE_DEPTH {
            if let Ok(value) = node.get(key) {
                return Ok(Some(self.resolve(value)?));
            }
            match node.get(b"Parent").and_then(Object::as_reference) {
                Ok(parent) => node = self.dictionary(parent)?,
                Err(_) => return Ok(None),
            }
        }
        Ok(None)
    }

    pub(crate) fn dictionary(&self, id: ObjectId) -> Result<&Dictionary> {
        self.doc
            .get_dictionary(id)
            .map_err(|e| LabelMergeError::MalformedInput(format!("object {:?}: {}", id, e)))
    }

    pub(crate) fn resolve<'a>(&'a self, obj: &'a Object) -> Result<&'a Object> {
        match obj {
            Object::Reference(id) => self
                .doc
                .get_object(*id)
                .map_err(|e| LabelMergeError::MalformedInput(format!("object {:?}: {}", id, e))),
            other => Ok(other),
        }
    }

    /// Concatenated, decoded content streams of a page.
    pub(crate) fn page_content(&self, page_id: ObjectId) -> Result<Vec<u8>> {
        let page = self.dictionary(page_id)?;
        let contents = match page.get(b"Contents") {
            Ok(obj) => self.resolve(obj)?,
            Err(_) => return Ok(Vec::new()),
        };

        let refs: Vec<&Object> = match contents {
            Object::Array(items) => items.iter().collect(),
            single => vec![single],
        };

        let mut result = Vec::new();
        for item in refs {
            let stream = match self.resolve(item)? {
                Object::Stream(stream) => stream,
                _ => continue,
            };
            let data = if stream.dict.get(b"Filter").is_ok() {
                stream.decompressed_content().map_err(|e| {
                    LabelMergeError::MalformedInput(format!(
                        "content stream uses an unsupported encoding: {}",
                        e
                    ))
                })?
            } else {
                stream.content.clone()
            };
            result.extend_from_slice(&data);
            result.push(b'\n');
        }
        Ok(result)
    }
}

/// Reference to one page of a [`TemplateSource`].
#[derive(Clone, Copy)]
pub struct Template<'s> {
    source: &'s TemplateSource,
    page_index: usize,
    page_id: ObjectId,
    frame: FormFrame,
    size: PageSize,
}

impl<'s> Template<'s> {
    pub fn size(&self) -> PageSize {
        self.size
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn source(&self) -> &'s TemplateSource {
        self.source
    }

    pub(crate) fn page_id(&self) -> ObjectId {
        self.page_id
    }

    pub(crate) fn frame(&self) -> &FormFrame {
        &self.frame
    }
}

impl std::fmt::Debug for Template<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("source", &self.source.id)
            .field("page_index", &self.page_index)
            .field("size", &self.size)
            .finish()
    }
}

/// Bounding box of an imported page in points, with the upright transform
/// implied by its `/Rotate` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormFrame {
    pub bbox: [f64; 4],
    pub rotate: i64,
}

impl FormFrame {
    pub fn new(bbox: [f64; 4], rotate: i64) -> Self {
        Self {
            bbox,
            rotate: rotate.rem_euclid(360) / 90 * 90,
        }
    }

    /// `/Matrix` for the form XObject so the page shows upright with its
    /// lower-left corner at the form origin. `None` for unrotated pages.
    pub fn matrix(&self) -> Option<Matrix> {
        let [x0, y0, x1, y1] = self.bbox;
        match self.rotate {
            90 => Some(Matrix([0.0, -1.0, 1.0, 0.0, -y0, x1])),
            180 => Some(Matrix([-1.0, 0.0, 0.0, -1.0, x1, y1])),
            270 => Some(Matrix([0.0, 1.0, -1.0, 0.0, y1, -x0])),
            _ => None,
        }
    }

    /// Lower-left corner of the visible area in form space after `/Matrix`.
    pub fn origin(&self) -> (f64, f64) {
        match self.rotate {
            0 => (self.bbox[0], self.bbox[1]),
            _ => (0.0, 0.0),
        }
    }

    /// Visible width and height in points.
    pub fn extent(&self) -> (f64, f64) {
        let [x0, y0, x1, y1] = self.bbox;
        let (w, h) = (x1 - x0, y1 - y0);
        match self.rotate {
            90 | 270 => (h, w),
            _ => (w, h),
        }
    }
}

pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}
