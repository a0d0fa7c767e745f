//! Minimal workbook model: open a package, stamp a datetime into the first
//! worksheet, save it back.

use crate::container::{write_package, OoxmlContainer};
use crate::error::{Error, Result};
use crate::package::{MemoryStore, PartStore};
use crate::pipeline::PackageSaver;
use crate::relationships::{rels_for_part, resolve_path, Relationships, OFFICE_REL_NS};
use crate::xml::{Element, Node, XmlDocument};
use chrono::{NaiveDate, NaiveDateTime};
use std::path::Path;
use tracing::debug;

/// Maximum column number in Excel (XFD = 16384).
pub const MAX_COLUMN: u32 = 16384;
/// Maximum row number in Excel.
pub const MAX_ROW: u32 = 1_048_576;

/// Built-in number format `m/d/yy h:mm`.
const DATETIME_NUM_FMT_ID: &str = "22";

const OFFICE_DOCUMENT_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const STYLES_PART: &str = "xl/styles.xml";
const WORKSHEET_TYPE_SUFFIX: &str = "/worksheet";

/// Parse a cell reference such as `B1` into 1-based `(row, column)`.
pub fn parse_cell_reference(reference: &str) -> Result<(u32, u32)> {
    let invalid = || Error::InvalidCellReference(reference.to_string());
    let trimmed = reference.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_alphabetic())
        .ok_or_else(invalid)?;
    let (letters, digits) = trimmed.split_at(split);
    if letters.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let mut column: u32 = 0;
    for b in letters.bytes() {
        let value = u32::from(b.to_ascii_uppercase() - b'A' + 1);
        column = column
            .checked_mul(26)
            .and_then(|c| c.checked_add(value))
            .filter(|c| *c <= MAX_COLUMN)
            .ok_or_else(invalid)?;
    }
    let row: u32 = digits.parse().map_err(|_| invalid())?;
    if row == 0 || row > MAX_ROW {
        return Err(invalid());
    }
    Ok((row, column))
}

/// Convert a 1-based column number to letters (1 -> `A`, 28 -> `AB`).
pub fn column_letters(column: u32) -> String {
    let mut letters = Vec::new();
    let mut col = column;
    while col > 0 {
        col -= 1;
        letters.push(b'A' + (col % 26) as u8);
        col /= 26;
    }
    letters.iter().rev().map(|&b| b as char).collect()
}

/// Excel serial date in the 1900 date system.
///
/// Day zero is 1899-12-30, which absorbs the phantom 1900-02-29 for every
/// date from March 1900 on.
pub fn excel_serial(value: NaiveDateTime) -> Result<f64> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::InvalidData("invalid date epoch".to_string()))?;
    let millis = (value - epoch).num_milliseconds();
    Ok(millis as f64 / 86_400_000.0)
}

/// An opened spreadsheet package.
#[derive(Debug, Clone)]
pub struct Workbook {
    parts: MemoryStore,
    first_sheet: String,
}

impl Workbook {
    /// Open a workbook from a file path.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use xlsx_mend::workbook::Workbook;
    ///
    /// let mut workbook = Workbook::open("book.xlsx")?;
    /// workbook.set_datetime("B1", chrono::Local::now().naive_local())?;
    /// # Ok::<(), xlsx_mend::Error>(())
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut parts = MemoryStore::new();
        OoxmlContainer::open(path)?.extract_into(&mut parts)?;
        Self::from_parts(parts)
    }

    /// Build a workbook around already extracted parts.
    pub fn from_parts(parts: MemoryStore) -> Result<Self> {
        let first_sheet = locate_first_sheet(&parts)?;
        debug!(sheet = %first_sheet, "resolved first worksheet");
        Ok(Self { parts, first_sheet })
    }

    /// Part name of the first worksheet.
    pub fn first_sheet(&self) -> &str {
        &self.first_sheet
    }

    pub fn parts(&self) -> &MemoryStore {
        &self.parts
    }

    /// Write `value` into `cell` of the first worksheet as a date-formatted number.
    pub fn set_datetime(&mut self, cell: &str, value: NaiveDateTime) -> Result<()> {
        let (row, column) = parse_cell_reference(cell)?;
        let reference = format!("{}{}", column_letters(column), row);
        let serial = excel_serial(value)?;
        let style = self.datetime_style()?;

        let sheet_part = self.first_sheet.clone();
        let mut sheet = XmlDocument::parse(&self.parts.read_part(&sheet_part)?, &sheet_part)?;
        let prefix = sheet.root.prefix().map(str::to_string);
        let qualify = |local: &str| match &prefix {
            Some(p) => format!("{p}:{local}"),
            None => local.to_string(),
        };

        let sheet_data = sheet
            .root
            .find_child_mut("sheetData")
            .ok_or_else(|| Error::InvalidData(format!("{sheet_part}: no <sheetData>")))?;
        let row_element = child_in_order(sheet_data, "row", &qualify("row"), row, |e| {
            e.attribute("r").and_then(|r| r.parse().ok())
        })?;
        row_element.set_attribute("r", row.to_string());

        let cell_element = child_in_order(row_element, "c", &qualify("c"), column, |e| {
            e.attribute("r")
                .and_then(|r| parse_cell_reference(r).ok())
                .map(|(_, c)| c)
        })?;
        cell_element.set_attribute("r", reference.as_str());
        cell_element.remove_attribute("t");
        match &style {
            Some(index) => cell_element.set_attribute("s", index.as_str()),
            None => {
                cell_element.remove_attribute("s");
            }
        }
        let mut v = Element::new(qualify("v"));
        v.set_text(&serial.to_string());
        cell_element.children.clear();
        cell_element.append(v);

        self.parts.write_part(&sheet_part, &sheet.to_bytes()?)?;
        debug!(sheet = %sheet_part, cell = %reference, serial, "datetime written");
        Ok(())
    }

    /// Index of a cell style with the datetime number format, added to
    /// `xl/styles.xml` when missing. `None` when the package has no styles part.
    fn datetime_style(&mut self) -> Result<Option<String>> {
        let Some(bytes) = self.parts.read_part_opt(STYLES_PART)? else {
            return Ok(None);
        };
        let mut styles = XmlDocument::parse(&bytes, STYLES_PART)?;
        let prefix = styles.root.prefix().map(str::to_string);

        let cell_xfs = styles
            .root
            .find_child_mut("cellXfs")
            .ok_or_else(|| Error::InvalidData(format!("{STYLES_PART}: no <cellXfs>")))?;

        if let Some(index) = cell_xfs
            .child_elements()
            .position(|xf| xf.attribute("numFmtId") == Some(DATETIME_NUM_FMT_ID))
        {
            return Ok(Some(index.to_string()));
        }

        let name = match &prefix {
            Some(p) => format!("{p}:xf"),
            None => "xf".to_string(),
        };
        let xf = Element::new(name)
            .with_attribute("numFmtId", DATETIME_NUM_FMT_ID)
            .with_attribute("fontId", "0")
            .with_attribute("fillId", "0")
            .with_attribute("borderId", "0")
            .with_attribute("xfId", "0")
            .with_attribute("applyNumberFormat", "1");
        cell_xfs.append(xf);
        let count = cell_xfs.child_elements().count();
        cell_xfs.set_attribute("count", count.to_string());

        self.parts.write_part(STYLES_PART, &styles.to_bytes()?)?;
        Ok(Some((count - 1).to_string()))
    }
}

impl PackageSaver for Workbook {
    fn save(&self, dest: &Path) -> Result<()> {
        write_package(&self.parts, dest)
    }
}

/// The child of `parent` named `local` whose key equals `key`, inserted in
/// ascending key order when absent.
fn child_in_order<'a>(
    parent: &'a mut Element,
    local: &str,
    qualified: &str,
    key: u32,
    key_of: impl Fn(&Element) -> Option<u32>,
) -> Result<&'a mut Element> {
    let mut insert_at = parent.children.len();
    let mut found = None;
    for (idx, node) in parent.children.iter().enumerate() {
        let Node::Element(e) = node else {
            continue;
        };
        if e.local_name() != local {
            continue;
        }
        match key_of(e) {
            Some(k) if k == key => {
                found = Some(idx);
                break;
            }
            Some(k) if k > key => {
                insert_at = idx;
                break;
            }
            _ => {}
        }
    }

    let idx = found.unwrap_or_else(|| {
        parent
            .children
            .insert(insert_at, Node::Element(Element::new(qualified)));
        insert_at
    });
    parent
        .at_path_mut(&[idx])
        .ok_or_else(|| Error::InvalidData(format!("lost track of <{local}>")))
}

/// Resolve the first worksheet through the package and workbook relationships.
/// Sheets of other kinds (chartsheets, dialog sheets) are passed over.
fn locate_first_sheet(parts: &dyn PartStore) -> Result<String> {
    let workbook_part = match parts.read_part_opt("_rels/.rels")? {
        Some(bytes) => Relationships::parse(&bytes, "_rels/.rels")?
            .get_by_type(OFFICE_DOCUMENT_TYPE)
            .first()
            .map(|rel| resolve_path("", &rel.target))
            .unwrap_or_else(|| "xl/workbook.xml".to_string()),
        None => "xl/workbook.xml".to_string(),
    };

    let workbook = XmlDocument::parse(&parts.read_part(&workbook_part)?, &workbook_part)?;
    let sheets = workbook
        .root
        .find_child("sheets")
        .ok_or_else(|| Error::InvalidData(format!("{workbook_part}: workbook has no sheets")))?;

    let prefix = match workbook.root.namespace_prefix_for(OFFICE_REL_NS) {
        Some(Some(prefix)) => prefix,
        _ => "r".to_string(),
    };
    let id_attribute = format!("{prefix}:id");

    let rels_part = rels_for_part(&workbook_part);
    let rels = Relationships::parse(&parts.read_part(&rels_part)?, &rels_part)?;

    for sheet in sheets.child_elements().filter(|e| e.local_name() == "sheet") {
        let id = sheet
            .attribute(&id_attribute)
            .ok_or_else(|| Error::InvalidData(format!("{workbook_part}: sheet without relationship id")))?;
        let rel = rels
            .get(id)
            .ok_or_else(|| Error::MissingComponent(format!("{rels_part}#{id}")))?;
        if rel.rel_type.ends_with(WORKSHEET_TYPE_SUFFIX) {
            return Ok(resolve_path(&workbook_part, &rel.target));
        }
        debug!(sheet = ?sheet.attribute("name"), rel_type = %rel.rel_type, "skipping non-worksheet sheet");
    }

    Err(Error::InvalidData(format!("{workbook_part}: workbook has no worksheet")))
}
