//! End-to-end pipeline tests over real zip files.
//!
//! Run with: cargo test --test pipeline

use pretty_assertions::assert_eq;
use std::io::Write;
use std::path::Path;
use xlsx_mend::container::OoxmlContainer;
use xlsx_mend::content_types::ContentTypes;
use xlsx_mend::relationships::Relationships;
use xlsx_mend::xml::XmlDocument;
use xlsx_mend::{save_with_restoration, Error, PipelineOptions, RestoreMode};
use zip::write::SimpleFileOptions;

const SHEET_PART: &str = "xl/worksheets/sheet1.xml";
const SHEET_RELS: &str = "xl/worksheets/_rels/sheet1.xml.rels";

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const RICH_COMMENTS: &str = r#"<comments xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><authors><author>me</author></authors><commentList><comment ref="A1" authorId="0"><text><r><rPr><b/></rPr><t>bold</t></r></text></comment></commentList></comments>"#;

fn write_zip(path: &Path, parts: &[(&str, Vec<u8>)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in parts {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

fn manifest(overrides: &[(&str, &str)]) -> Vec<u8> {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    );
    for (part, content_type) in overrides {
        xml.push_str(&format!(r#"<Override PartName="{part}" ContentType="{content_type}"/>"#));
    }
    xml.push_str("</Types>");
    xml.into_bytes()
}

fn rels(entries: &[(&str, &str, &str)]) -> Vec<u8> {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for (id, kind, target) in entries {
        xml.push_str(&format!(
            r#"<Relationship Id="{id}" Type="{REL_NS}/{kind}" Target="{target}"/>"#
        ));
    }
    xml.push_str("</Relationships>");
    xml.into_bytes()
}

fn sheet(tail: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><sheetData><row r="1"><c r="A1"><v>1</v></c></row></sheetData>{tail}</worksheet>"#
    )
    .into_bytes()
}

fn common_parts() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("_rels/.rels", rels(&[("rId1", "officeDocument", "xl/workbook.xml")])),
        (
            "xl/workbook.xml",
            format!(
                r#"<workbook xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#
            )
            .into_bytes(),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            rels(&[("rId1", "worksheet", "worksheets/sheet1.xml")]),
        ),
    ]
}

/// One worksheet with a picture drawing and a rich comment.
fn original_parts() -> Vec<(&'static str, Vec<u8>)> {
    let mut parts = common_parts();
    parts.extend([
        ("[Content_Types].xml", manifest(&[
            ("/xl/worksheets/sheet1.xml", "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"),
        ])),
        (SHEET_PART, sheet(r#"<drawing r:id="rId3"/>"#)),
        (
            SHEET_RELS,
            rels(&[
                ("rId2", "comments", "../comments1.xml"),
                ("rId3", "drawing", "../drawings/drawing1.xml"),
            ]),
        ),
        (
            "xl/drawings/drawing1.xml",
            br#"<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing"/>"#.to_vec(),
        ),
        (
            "xl/drawings/_rels/drawing1.xml.rels",
            rels(&[("rId1", "image", "../media/image1.png")]),
        ),
        ("xl/media/image1.png", PNG.to_vec()),
        ("xl/comments1.xml", RICH_COMMENTS.as_bytes().to_vec()),
    ]);
    parts
}

/// What a lossy writer makes of the original: no drawing, no media, plain
/// comments in its own folder and layout.
fn lossy_parts() -> Vec<(&'static str, Vec<u8>)> {
    let mut parts = common_parts();
    parts.extend([
        ("[Content_Types].xml", manifest(&[])),
        (SHEET_PART, sheet(r#"<legacyDrawing r:id="rId2"/>"#)),
        (
            SHEET_RELS,
            rels(&[
                ("rId1", "comments", "/xl/comments/comment1.xml"),
                ("rId2", "vmlDrawing", "/xl/drawings/commentsDrawing1.vml"),
            ]),
        ),
        ("xl/comments/comment1.xml", b"<comments>plain</comments>".to_vec()),
        ("xl/drawings/commentsDrawing1.vml", b"<xml/>".to_vec()),
        ("xl/comments1.xml", b"<comments>lossy</comments>".to_vec()),
    ]);
    parts
}

fn lossy_saver(dest: &Path) -> xlsx_mend::Result<()> {
    write_zip(dest, &lossy_parts());
    Ok(())
}

fn read(container: &OoxmlContainer, part: &str) -> Vec<u8> {
    container.read_binary(part).unwrap()
}

#[test]
fn test_end_to_end_restoration() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("book.xlsx");
    let dest = dir.path().join("out.xlsx");
    write_zip(&src, &original_parts());

    let options = PipelineOptions::new().with_scratch_parent(dir.path().join("scratch"));
    let outcome = save_with_restoration(&lossy_saver, &src, &dest, &options).unwrap();
    let report = outcome.report.unwrap();
    assert_eq!(report.mode, RestoreMode::Comments);

    let out = OoxmlContainer::open(&dest).unwrap();

    // Spurious relationships are gone and the drawing is back under a fresh id.
    let sheet_rels = Relationships::parse(&read(&out, SHEET_RELS), SHEET_RELS).unwrap();
    assert!(sheet_rels.iter().all(|r| !r.target.starts_with("/xl/comments/")));
    assert!(sheet_rels.iter().all(|r| !r.target.contains("commentsDrawing")));
    let drawing_rel = sheet_rels
        .iter()
        .find(|r| r.target == "../drawings/drawing1.xml")
        .expect("drawing relationship restored");
    let numeric: u64 = drawing_rel.id.trim_start_matches("rId").parse().unwrap();
    assert!(numeric > 2, "{} must exceed the pre-merge maximum", drawing_rel.id);

    // Exactly one drawing element, pointing at that relationship.
    let body = XmlDocument::parse(&read(&out, SHEET_PART), SHEET_PART).unwrap();
    let drawings: Vec<_> = body
        .root
        .child_elements()
        .filter(|e| e.local_name() == "drawing")
        .collect();
    assert_eq!(drawings.len(), 1);
    assert_eq!(drawings[0].attribute("r:id"), Some(drawing_rel.id.as_str()));
    assert!(body.root.find_child("legacyDrawing").is_none());

    // Original comments and media are byte-identical.
    assert_eq!(read(&out, "xl/comments1.xml"), RICH_COMMENTS.as_bytes());
    assert!(!out.exists("xl/comments/comment1.xml"));
    assert_eq!(read(&out, "xl/media/image1.png"), PNG);
    assert!(out.exists("xl/drawings/_rels/drawing1.xml.rels"));

    // The manifest declares what is now present.
    let types = ContentTypes::parse(&read(&out, "[Content_Types].xml")).unwrap();
    assert_eq!(
        types.override_for("/xl/drawings/drawing1.xml"),
        Some("application/vnd.openxmlformats-officedocument.drawing+xml")
    );
    assert_eq!(types.override_count("/xl/drawings/drawing1.xml"), 1);
    assert!(types.has_default("png"));
    assert_eq!(
        types.override_for("/xl/comments1.xml"),
        Some("application/vnd.openxmlformats-officedocument.spreadsheetml.comments+xml")
    );

    // Scratch area was removed.
    let leftovers = std::fs::read_dir(dir.path().join("scratch")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_drawings_mode_leaves_comments_to_the_save() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("book.xlsx");
    let dest = dir.path().join("out.xlsx");
    write_zip(&src, &original_parts());

    let options = PipelineOptions::new().with_mode(RestoreMode::Drawings);
    save_with_restoration(&lossy_saver, &src, &dest, &options).unwrap();

    let out = OoxmlContainer::open(&dest).unwrap();
    assert_eq!(read(&out, "xl/comments1.xml"), b"<comments>lossy</comments>");
    assert!(out.exists("xl/comments/comment1.xml"));
    assert!(out.exists("xl/drawings/drawing1.xml"));
    assert!(out.exists("xl/drawings/commentsDrawing1.vml"));

    let sheet_rels = Relationships::parse(&read(&out, SHEET_RELS), SHEET_RELS).unwrap();
    assert_eq!(sheet_rels.len(), 3);
    let body = XmlDocument::parse(&read(&out, SHEET_PART), SHEET_PART).unwrap();
    let names: Vec<_> = body.root.child_elements().map(|e| e.local_name()).collect();
    assert_eq!(names, vec!["sheetData", "drawing", "legacyDrawing"]);
}

#[test]
fn test_in_place_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.xlsx");
    write_zip(&path, &original_parts());

    save_with_restoration(&lossy_saver, &path, &path, &PipelineOptions::new()).unwrap();

    let out = OoxmlContainer::open(&path).unwrap();
    assert_eq!(read(&out, "xl/comments1.xml"), RICH_COMMENTS.as_bytes());
    assert!(out.exists("xl/drawings/drawing1.xml"));
}

#[test]
fn test_unknown_diagram_role_leaves_saved_package() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("book.xlsx");
    let dest = dir.path().join("out.xlsx");
    let mut parts = original_parts();
    parts.push(("xl/diagrams/mystery1.xml", b"<x/>".to_vec()));
    write_zip(&src, &parts);

    let err = save_with_restoration(&lossy_saver, &src, &dest, &PipelineOptions::new()).unwrap_err();
    assert!(matches!(err, Error::UnknownDiagramRole { ref role, .. } if role == "mystery"));

    // The destination still holds what the save wrote.
    let out = OoxmlContainer::open(&dest).unwrap();
    assert!(!out.exists("xl/diagrams/mystery1.xml"));
    assert_eq!(read(&out, "xl/comments1.xml"), b"<comments>lossy</comments>");
}

#[test]
fn test_stamp_datetime_with_faithful_save() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("book.xlsx");
    let dest = dir.path().join("out.xlsx");
    write_zip(&src, &original_parts());

    let when = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    let outcome = xlsx_mend::stamp_datetime(&src, &dest, "B1", when, &PipelineOptions::new()).unwrap();
    let report = outcome.report.unwrap();
    assert_eq!(report.relationships_admitted(), 0);

    let out = OoxmlContainer::open(&dest).unwrap();
    let body = String::from_utf8(read(&out, SHEET_PART)).unwrap();
    assert!(body.contains(r#"<c r="B1">"#));
    assert!(body.contains("<v>45292.5</v>"));
    assert_eq!(body.matches("<drawing ").count(), 1);
    assert_eq!(read(&out, "xl/comments1.xml"), RICH_COMMENTS.as_bytes());
}

#[test]
fn test_rejects_non_spreadsheet_source() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("doc.docx");
    write_zip(
        &src,
        &[(
            "[Content_Types].xml",
            br#"<Types><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#.to_vec(),
        )],
    );

    let err = save_with_restoration(&lossy_saver, &src, dir.path().join("out.xlsx"), &PipelineOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(_)));
    assert!(!dir.path().join("out.xlsx").exists());
}
