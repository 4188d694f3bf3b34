//! Canonical-document merging for units and courses.
//!
//! The same rule applies at both scopes: take the scope's documents in its
//! natural order (class ordinal, unit number), drop anything missing, empty
//! or non-canonical, and concatenate the rest. Nothing eligible means nothing
//! to merge, which is `Ok(None)` rather than an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};
use tracing::{debug, info, instrument, warn};

use lectern_shared::{CANONICAL_EXTENSION, ClassOutcome, LecternError, Result, UnitOutcome};

/// Merge the canonical documents of one unit's classes, in ordinal order.
#[instrument(skip_all, fields(classes = classes.len(), output = %output.display()))]
pub fn merge_unit(classes: &[ClassOutcome], output: &Path) -> Result<Option<PathBuf>> {
    let mut ordered: Vec<&ClassOutcome> = classes.iter().collect();
    ordered.sort_by_key(|c| c.ordinal);

    let inputs: Vec<PathBuf> = ordered
        .into_iter()
        .flat_map(|c| c.files.iter())
        .filter(|f| f.mime_kind.is_canonical())
        .map(|f| f.path.clone())
        .collect();

    merge_documents(&inputs, output)
}

/// Merge the unit-level artifacts of a course, in unit-number order.
/// Units without a merged artifact are skipped.
#[instrument(skip_all, fields(units = units.len(), output = %output.display()))]
pub fn merge_course(units: &[UnitOutcome], output: &Path) -> Result<Option<PathBuf>> {
    let mut ordered: Vec<&UnitOutcome> = units.iter().collect();
    ordered.sort_by_key(|u| u.unit_number);

    let inputs: Vec<PathBuf> = ordered
        .into_iter()
        .filter_map(|u| u.merged_artifact_path.clone())
        .collect();

    merge_documents(&inputs, output)
}

/// Concatenate `inputs` into `output`, in the given order.
///
/// Inputs that are missing, empty, not canonical by extension, or unreadable
/// are skipped with a warning. Returns `None` when no pages remain.
pub fn merge_documents(inputs: &[PathBuf], output: &Path) -> Result<Option<PathBuf>> {
    let mut documents = Vec::new();
    for path in inputs {
        if !is_eligible(path) {
            debug!(path = %path.display(), "skipping ineligible document");
            continue;
        }
        match Document::load(path) {
            Ok(doc) => documents.push(doc),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable document"),
        }
    }

    if documents.is_empty() {
        debug!("nothing to merge");
        return Ok(None);
    }

    let count = documents.len();
    let Some(mut merged) = concatenate(documents) else {
        debug!("inputs contained no pages");
        return Ok(None);
    };

    // Write next to the target, then rename into place.
    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "merged.pdf".into());
    let temp = output.with_file_name(format!(".{file_name}.tmp"));

    if let Err(e) = merged.save(&temp) {
        let _ = std::fs::remove_file(&temp);
        return Err(LecternError::Merge(format!("writing {}: {e}", temp.display())));
    }
    std::fs::rename(&temp, output).map_err(|e| LecternError::io(output, e))?;

    info!(documents = count, path = %output.display(), "merged");
    Ok(Some(output.to_path_buf()))
}

/// Present, non-empty, and carrying the canonical extension.
fn is_eligible(path: &Path) -> bool {
    let canonical = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(CANONICAL_EXTENSION));
    canonical && std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"Resources", b"CropBox", b"Rotate"];

/// Bound on `Parent` hops; malformed trees may loop.
const MAX_TREE_DEPTH: usize = 64;

/// Build one document whose page tree holds every page of `documents` in order.
///
/// Each page is flattened first: inheritable attributes it lacks are copied
/// down from its ancestors, so re-parenting under a fresh root keeps its
/// geometry and resources.
fn concatenate(documents: Vec<Document>) -> Option<Document> {
    let mut max_id = 1;
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for mut doc in documents {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for page_id in doc.get_pages().into_values() {
            if let Some(page) = flattened_page(&doc, page_id) {
                pages.push((page_id, page));
            }
        }
        objects.extend(doc.objects);
    }

    if pages.is_empty() {
        return None;
    }

    let mut merged = Document::with_version("1.5");
    for (id, object) in objects {
        match object.type_name() {
            // Rebuilt below; outlines would point at stale ids.
            Ok("Catalog" | "Pages" | "Page" | "Outlines" | "Outline") => {}
            _ => {
                merged.objects.insert(id, object);
            }
        }
    }

    let tree_id = (max_id, 0);
    let catalog_id = (max_id + 1, 0);

    let kids: Vec<Object> = pages.iter().map(|(id, _)| Object::Reference(*id)).collect();
    let page_count = pages.len();

    for (id, mut page) in pages {
        page.set("Parent", tree_id);
        merged.objects.insert(id, Object::Dictionary(page));
    }

    merged.objects.insert(
        tree_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(page_count as i64),
        }),
    );
    merged.objects.insert(
        catalog_id,
        Object::Dictionary(dictionary! {
            "Type" => "Catalog",
            "Pages" => tree_id,
        }),
    );

    merged.trailer.set("Root", catalog_id);
    merged.max_id = catalog_id.0;
    merged.renumber_objects();
    merged.compress();

    Some(merged)
}

/// A copy of the page dictionary with inherited attributes made explicit.
fn flattened_page(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    let mut page = match doc.get_dictionary(page_id) {
        Ok(page) => page.clone(),
        Err(e) => {
            warn!(?page_id, error = %e, "skipping page that is not a dictionary");
            return None;
        }
    };

    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;
    while let Some(node_id) = parent {
        let Ok(node) = doc.get_dictionary(node_id) else {
            break;
        };
        for key in INHERITABLE {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }

        depth += 1;
        if depth >= MAX_TREE_DEPTH {
            break;
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    Some(page)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lectern_shared::{CatalogEntry, CatalogLevel, DocumentReference, FetchedDocument, MimeKind};

    pub(crate) fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lectern-merge-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// A document with one page per label; each page carries its label so
    /// merged page order can be read back.
    pub(crate) fn pdf_bytes(labels: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let tree_id = doc.new_object_id();

        let kids: Vec<Object> = labels
            .iter()
            .map(|label| {
                let page = dictionary! {
                    "Type" => "Page",
                    "Parent" => tree_id,
                    "MediaBox" => vec![
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(595),
                        Object::Integer(842),
                    ],
                    "PieceLabel" => Object::string_literal(*label),
                };
                Object::Reference(doc.add_object(page))
            })
            .collect();

        let tree = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(labels.len() as i64),
        };
        doc.objects.insert(tree_id, Object::Dictionary(tree));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => tree_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    pub(crate) fn write_pdf(path: &Path, labels: &[&str]) {
        std::fs::write(path, pdf_bytes(labels)).unwrap();
    }

    pub(crate) fn page_labels(path: &Path) -> Vec<String> {
        let doc = Document::load(path).unwrap();
        doc.get_pages()
            .values()
            .map(|id| {
                let page = doc.get_object(*id).unwrap().as_dict().unwrap();
                let label = page.get(b"PieceLabel").unwrap().as_str().unwrap();
                String::from_utf8_lossy(label).into_owned()
            })
            .collect()
    }

    fn class_with(ordinal: usize, path: PathBuf, kind: MimeKind) -> ClassOutcome {
        let entry = CatalogEntry::new(format!("c{ordinal}"), format!("Class {ordinal}"), CatalogLevel::Class)
            .unwrap();
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(1).max(1);
        let doc = FetchedDocument::new(
            path,
            size,
            kind,
            DocumentReference {
                source_url: format!("https://portal.example.com/{ordinal}"),
                link_text: "Course Document".into(),
            },
        )
        .unwrap();
        ClassOutcome::new(ordinal, &entry, vec![doc], vec![])
    }

    fn unit_with(unit_number: usize, merged: Option<PathBuf>) -> UnitOutcome {
        UnitOutcome {
            unit_number,
            unit_id: format!("u{unit_number}"),
            unit_name: format!("Unit {unit_number}: Topic"),
            unit_directory: format!("unit_{unit_number}_Topic"),
            class_outcomes: Vec::new(),
            merged_artifact_path: merged,
        }
    }

    #[test]
    fn unit_merge_follows_class_ordinal() {
        let dir = temp_dir();
        for n in 1..=3 {
            write_pdf(&dir.join(format!("0{n}.pdf")), &[&format!("class-{n}")]);
        }

        // Completion order 3, 1, 2
        let classes = vec![
            class_with(3, dir.join("03.pdf"), MimeKind::Canonical),
            class_with(1, dir.join("01.pdf"), MimeKind::Canonical),
            class_with(2, dir.join("02.pdf"), MimeKind::Canonical),
        ];

        let out = dir.join("unit.pdf");
        let merged = merge_unit(&classes, &out).unwrap();
        assert_eq!(merged.as_deref(), Some(out.as_path()));
        assert_eq!(page_labels(&out), ["class-1", "class-2", "class-3"]);
        assert!(!dir.join(".unit.pdf.tmp").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn multi_page_documents_keep_internal_order() {
        let dir = temp_dir();
        write_pdf(&dir.join("a.pdf"), &["a1", "a2", "a3"]);
        write_pdf(&dir.join("b.pdf"), &["b1", "b2"]);

        let out = dir.join("merged.pdf");
        merge_documents(&[dir.join("a.pdf"), dir.join("b.pdf")], &out).unwrap();
        assert_eq!(page_labels(&out), ["a1", "a2", "a3", "b1", "b2"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn ineligible_documents_are_skipped() {
        let dir = temp_dir();
        write_pdf(&dir.join("01.pdf"), &["one"]);
        std::fs::write(dir.join("02.pptx"), b"PK\x03\x04").unwrap();
        write_pdf(&dir.join("03.pdf"), &["three"]);
        std::fs::write(dir.join("04.pdf"), b"not really a pdf").unwrap();

        let classes = vec![
            class_with(1, dir.join("01.pdf"), MimeKind::Canonical),
            class_with(2, dir.join("02.pptx"), MimeKind::Presentation),
            class_with(3, dir.join("03.pdf"), MimeKind::Canonical),
            class_with(4, dir.join("04.pdf"), MimeKind::Canonical),
        ];
        // Removed after fetch: missing at merge time.
        std::fs::remove_file(dir.join("03.pdf")).unwrap();

        let out = dir.join("unit.pdf");
        merge_unit(&classes, &out).unwrap();
        assert_eq!(page_labels(&out), ["one"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn nothing_eligible_is_not_an_error() {
        let dir = temp_dir();
        std::fs::write(dir.join("01.docx"), b"PK").unwrap();
        let classes = vec![class_with(1, dir.join("01.docx"), MimeKind::WordProcessor)];

        let out = dir.join("unit.pdf");
        assert_eq!(merge_unit(&classes, &out).unwrap(), None);
        assert_eq!(merge_unit(&[], &out).unwrap(), None);
        assert!(!out.exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn course_merge_uses_available_units_in_order() {
        let dir = temp_dir();
        write_pdf(&dir.join("u1.pdf"), &["unit-1"]);
        write_pdf(&dir.join("u3.pdf"), &["unit-3a", "unit-3b"]);

        let units = vec![
            unit_with(3, Some(dir.join("u3.pdf"))),
            unit_with(2, None),
            unit_with(1, Some(dir.join("u1.pdf"))),
            unit_with(4, None),
        ];

        let out = dir.join("course.pdf");
        let merged = merge_course(&units, &out).unwrap();
        assert!(merged.is_some());
        assert_eq!(page_labels(&out), ["unit-1", "unit-3a", "unit-3b"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    fn media_box(width: i64) -> Object {
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width),
            Object::Integer(842),
        ])
    }

    fn labelled_page(parent: ObjectId, label: &str) -> Dictionary {
        dictionary! {
            "Type" => "Page",
            "Parent" => parent,
            "PieceLabel" => Object::string_literal(label),
        }
    }

    /// Root holds the media box; an intermediate node holds the resources.
    fn write_nested_tree_pdf(path: &Path) {
        let mut doc = Document::with_version("1.5");
        let root_id = doc.new_object_id();
        let mid_id = doc.new_object_id();

        let a1 = doc.add_object(labelled_page(mid_id, "a1"));
        let mut rotated = labelled_page(mid_id, "a2");
        rotated.set("Rotate", Object::Integer(90));
        let a2 = doc.add_object(rotated);

        doc.objects.insert(
            mid_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Parent" => root_id,
                "Kids" => vec![Object::Reference(a1), Object::Reference(a2)],
                "Count" => Object::Integer(2),
                "Resources" => dictionary! { "Marker" => Object::Integer(1) },
            }),
        );
        doc.objects.insert(
            root_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(mid_id)],
                "Count" => Object::Integer(2),
                "MediaBox" => media_box(100),
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => root_id });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    /// Flat tree with media box and resources on the root; the second page
    /// overrides the media box itself.
    fn write_flat_tree_pdf(path: &Path) {
        let mut doc = Document::with_version("1.5");
        let root_id = doc.new_object_id();

        let b1 = doc.add_object(labelled_page(root_id, "b1"));
        let mut own_box = labelled_page(root_id, "b2");
        own_box.set("MediaBox", media_box(50));
        let b2 = doc.add_object(own_box);

        doc.objects.insert(
            root_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(b1), Object::Reference(b2)],
                "Count" => Object::Integer(2),
                "MediaBox" => media_box(200),
                "Resources" => dictionary! { "Marker" => Object::Integer(2) },
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => root_id });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    /// Value of `key` as a viewer sees it: on the page or its nearest ancestor.
    fn effective<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
        let mut node = doc.get_dictionary(page_id).ok()?;
        loop {
            if let Ok(value) = node.get(key) {
                return Some(value);
            }
            let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
            node = doc.get_dictionary(parent).ok()?;
        }
    }

    #[test]
    fn inherited_page_attributes_survive_merge() {
        let dir = temp_dir();
        write_nested_tree_pdf(&dir.join("a.pdf"));
        write_flat_tree_pdf(&dir.join("b.pdf"));

        let out = dir.join("merged.pdf");
        merge_documents(&[dir.join("a.pdf"), dir.join("b.pdf")], &out).unwrap();
        assert_eq!(page_labels(&out), ["a1", "a2", "b1", "b2"]);

        let doc = Document::load(&out).unwrap();
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

        let widths: Vec<i64> = page_ids
            .iter()
            .map(|id| effective(&doc, *id, b"MediaBox").unwrap().as_array().unwrap()[2].as_i64().unwrap())
            .collect();
        assert_eq!(widths, [100, 100, 200, 50]);

        let markers: Vec<i64> = page_ids
            .iter()
            .map(|id| {
                let resources = effective(&doc, *id, b"Resources").unwrap().as_dict().unwrap();
                resources.get(b"Marker").unwrap().as_i64().unwrap()
            })
            .collect();
        assert_eq!(markers, [1, 1, 2, 2]);

        let rotations: Vec<Option<i64>> = page_ids
            .iter()
            .map(|id| effective(&doc, *id, b"Rotate").map(|r| r.as_i64().unwrap()))
            .collect();
        assert_eq!(rotations, [None, Some(90), None, None]);

        // The new root carries nothing a page could inherit.
        let root_id = doc.catalog().unwrap().get(b"Pages").unwrap().as_reference().unwrap();
        let root = doc.get_dictionary(root_id).unwrap();
        assert_eq!(root.len(), 3);
        assert!(!root.has(b"MediaBox"));
        assert!(!root.has(b"Resources"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn course_merge_without_units_is_none() {
        let dir = temp_dir();
        let units = vec![unit_with(1, None), unit_with(2, None)];
        assert_eq!(merge_course(&units, &dir.join("course.pdf")).unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }
}
