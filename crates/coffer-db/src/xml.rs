//! XML import: build a fresh node tree from a trusted export
//!
//! Accepted shape:
//! ```xml
//! <Database>
//!   <Group name="Root">
//!     <Group name="Email">
//!       <Entry title="Gmail" username="me" password="..." url="" notes="">
//!         <Attribute key="pin" protected="true">1234</Attribute>
//!         <Attachment name="id_rsa">BASE64</Attachment>
//!       </Entry>
//!     </Group>
//!   </Group>
//! </Database>
//! ```
//!
//! The outermost `<Group>` becomes the database root. Any structural
//! problem aborts the import with `CorruptFile`; nothing is persisted
//! until the caller has a fully built tree.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use coffer_core::{CofferError, CofferResult};

use crate::entry::Entry;
use crate::group::Group;

/// Parse an XML export into a root group.
pub fn import_xml(xml: &str) -> CofferResult<Group> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut group_stack: Vec<Group> = Vec::new();
    let mut root: Option<Group> = None;
    let mut current_entry: Option<Entry> = None;
    // (kind, name/key, protected) of the element whose text we await
    let mut pending_field: Option<PendingField> = None;
    let mut seen_database = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Database" => {
                    if seen_database {
                        return Err(malformed("nested <Database>"));
                    }
                    seen_database = true;
                }
                b"Group" => {
                    if !seen_database {
                        return Err(malformed("<Group> outside <Database>"));
                    }
                    if current_entry.is_some() {
                        return Err(malformed("<Group> inside <Entry>"));
                    }
                    group_stack.push(Group::new(required_attr(e, "name")?));
                }
                b"Entry" => {
                    if current_entry.is_some() {
                        return Err(malformed("nested <Entry>"));
                    }
                    if group_stack.is_empty() {
                        return Err(malformed("<Entry> outside <Group>"));
                    }
                    current_entry = Some(parse_entry_element(e)?);
                }
                b"Attribute" => {
                    if current_entry.is_none() {
                        return Err(malformed("<Attribute> outside <Entry>"));
                    }
                    pending_field = Some(PendingField::Attribute {
                        key: required_attr(e, "key")?,
                        protected: optional_attr(e, "protected")?
                            .map(|v| v == "true")
                            .unwrap_or(false),
                    });
                }
                b"Attachment" => {
                    if current_entry.is_none() {
                        return Err(malformed("<Attachment> outside <Entry>"));
                    }
                    pending_field = Some(PendingField::Attachment {
                        name: required_attr(e, "name")?,
                    });
                }
                other => {
                    return Err(malformed(&format!(
                        "unexpected element <{}>",
                        String::from_utf8_lossy(other)
                    )));
                }
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"Entry" => {
                    if group_stack.is_empty() {
                        return Err(malformed("<Entry> outside <Group>"));
                    }
                    let entry = parse_entry_element(e)?;
                    push_entry(&mut group_stack, entry)?;
                }
                b"Group" => {
                    if !seen_database {
                        return Err(malformed("<Group> outside <Database>"));
                    }
                    let group = Group::new(required_attr(e, "name")?);
                    attach_group(&mut group_stack, &mut root, group)?;
                }
                b"Attribute" => {
                    let entry = current_entry
                        .as_mut()
                        .ok_or_else(|| malformed("<Attribute> outside <Entry>"))?;
                    entry.set_attribute(
                        required_attr(e, "key")?,
                        "",
                        optional_attr(e, "protected")?
                            .map(|v| v == "true")
                            .unwrap_or(false),
                    );
                }
                other => {
                    return Err(malformed(&format!(
                        "unexpected empty element <{}>",
                        String::from_utf8_lossy(other)
                    )));
                }
            },
            Ok(Event::Text(ref t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| malformed(&format!("bad text: {e}")))?
                    .into_owned();
                let entry = current_entry
                    .as_mut()
                    .ok_or_else(|| malformed("stray text outside <Entry>"))?;
                match pending_field.take() {
                    Some(PendingField::Attribute { key, protected }) => {
                        entry.set_attribute(key, text, protected);
                    }
                    Some(PendingField::Attachment { name }) => {
                        let data = BASE64
                            .decode(text.trim())
                            .map_err(|_| malformed("attachment is not valid base64"))?;
                        entry.set_attachment(name, data);
                    }
                    None => return Err(malformed("stray text")),
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"Database" => {}
                b"Group" => {
                    let finished = group_stack
                        .pop()
                        .ok_or_else(|| malformed("unbalanced </Group>"))?;
                    if let Some(parent) = group_stack.last_mut() {
                        parent.add_group(finished);
                    } else if root.is_none() {
                        root = Some(finished);
                    } else {
                        return Err(malformed("multiple top-level groups"));
                    }
                }
                b"Entry" => {
                    let entry = current_entry
                        .take()
                        .ok_or_else(|| malformed("unbalanced </Entry>"))?;
                    push_entry(&mut group_stack, entry)?;
                }
                b"Attribute" | b"Attachment" => {
                    // An empty value: <Attribute key="k"></Attribute>
                    if let Some(field) = pending_field.take() {
                        let entry = current_entry
                            .as_mut()
                            .ok_or_else(|| malformed("field outside <Entry>"))?;
                        match field {
                            PendingField::Attribute { key, protected } => {
                                entry.set_attribute(key, "", protected);
                            }
                            PendingField::Attachment { name } => {
                                entry.set_attachment(name, Vec::new());
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(malformed(&format!("XML parse error: {e}"))),
        }
    }

    if !group_stack.is_empty() || current_entry.is_some() {
        return Err(malformed("unexpected end of document"));
    }
    root.ok_or_else(|| malformed("no root <Group> found"))
}

enum PendingField {
    Attribute { key: String, protected: bool },
    Attachment { name: String },
}

fn parse_entry_element(e: &BytesStart<'_>) -> CofferResult<Entry> {
    let mut entry = Entry::new(required_attr(e, "title")?);
    if let Some(v) = optional_attr(e, "username")? {
        entry.set_username(v);
    }
    if let Some(v) = optional_attr(e, "password")? {
        entry.set_password(v);
    }
    if let Some(v) = optional_attr(e, "url")? {
        entry.set_url(v);
    }
    if let Some(v) = optional_attr(e, "notes")? {
        entry.set_notes(v);
    }
    Ok(entry)
}

fn push_entry(group_stack: &mut [Group], entry: Entry) -> CofferResult<()> {
    let group = group_stack
        .last_mut()
        .ok_or_else(|| malformed("<Entry> outside <Group>"))?;
    group.add_entry(entry);
    Ok(())
}

fn attach_group(
    group_stack: &mut [Group],
    root: &mut Option<Group>,
    group: Group,
) -> CofferResult<()> {
    if let Some(parent) = group_stack.last_mut() {
        parent.add_group(group);
    } else if root.is_none() {
        *root = Some(group);
    } else {
        return Err(malformed("multiple top-level groups"));
    }
    Ok(())
}

fn required_attr(e: &BytesStart<'_>, name: &str) -> CofferResult<String> {
    optional_attr(e, name)?.ok_or_else(|| {
        malformed(&format!(
            "<{}> missing required attribute {name}",
            String::from_utf8_lossy(e.name().as_ref())
        ))
    })
}

fn optional_attr(e: &BytesStart<'_>, name: &str) -> CofferResult<Option<String>> {
    let attr = e
        .try_get_attribute(name)
        .map_err(|err| malformed(&format!("bad attribute: {err}")))?;
    attr.map(|a| {
        a.unescape_value()
            .map(|v| v.into_owned())
            .map_err(|err| malformed(&format!("bad attribute value: {err}")))
    })
    .transpose()
}

fn malformed(detail: &str) -> CofferError {
    CofferError::CorruptFile(format!("XML import: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<Database>
  <Group name="Root">
    <Group name="Email">
      <Entry title="Gmail" username="me" password="s3cret" url="https://mail.google.com">
        <Attribute key="pin" protected="true">1234</Attribute>
        <Attachment name="id_rsa">a2V5IG1hdGVyaWFs</Attachment>
      </Entry>
    </Group>
    <Entry title="Standalone"/>
  </Group>
</Database>
"#;

    #[test]
    fn test_import_builds_tree() {
        let root = import_xml(SAMPLE).unwrap();

        assert_eq!(root.name(), "Root");
        let gmail = root.find_entry_by_path("Email/Gmail").unwrap();
        assert_eq!(gmail.username(), "me");
        assert_eq!(gmail.password(), "s3cret");
        assert_eq!(gmail.attribute("pin").unwrap().value, "1234");
        assert!(gmail.attribute("pin").unwrap().protected);
        assert_eq!(gmail.attachment("id_rsa").unwrap(), b"key material");
        assert!(root.find_entry_by_path("Standalone").is_some());
    }

    #[test]
    fn test_unbalanced_group_aborts() {
        let result = import_xml("<Database><Group name=\"Root\"></Database>");
        assert!(matches!(result, Err(CofferError::CorruptFile(_))));
    }

    #[test]
    fn test_entry_outside_group_aborts() {
        let result = import_xml("<Database><Entry title=\"x\"/></Database>");
        assert!(matches!(result, Err(CofferError::CorruptFile(_))));
    }

    #[test]
    fn test_missing_required_attribute_aborts() {
        let result = import_xml("<Database><Group name=\"R\"><Entry/></Group></Database>");
        assert!(matches!(result, Err(CofferError::CorruptFile(_))));
    }

    #[test]
    fn test_unknown_element_aborts() {
        let result = import_xml("<Database><Surprise/></Database>");
        assert!(matches!(result, Err(CofferError::CorruptFile(_))));
    }

    #[test]
    fn test_bad_attachment_base64_aborts() {
        let xml = r#"<Database><Group name="R"><Entry title="e">
            <Attachment name="a">!!not-base64!!</Attachment>
        </Entry></Group></Database>"#;
        let result = import_xml(xml);
        assert!(matches!(result, Err(CofferError::CorruptFile(_))));
    }

    #[test]
    fn test_no_root_group_aborts() {
        let result = import_xml("<Database></Database>");
        assert!(matches!(result, Err(CofferError::CorruptFile(_))));
    }
}
