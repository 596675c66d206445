//! A conservative SVG cleaner.
//!
//! Strips what editors leave behind: comments, the XML declaration, doctype
//! and processing instructions, `<metadata>`, Inkscape and Sodipodi elements
//! and attributes, whitespace between tags outside text content, and `<g>`
//! wrappers that carry no attributes. The `viewBox` is kept unless asked
//! otherwise.

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::config::SvgConfig;

const EDITOR_PREFIXES: [&[u8]; 2] = [b"sodipodi:", b"inkscape:"];

/// Elements whose whitespace is rendered.
const TEXT_ELEMENTS: [&[u8]; 3] = [b"text", b"tspan", b"textPath"];

#[derive(Debug, Error)]
pub enum SvgError {
    #[error("XML error at {0}: {1}")]
    Xml(u64, quick_xml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for SvgError {
    fn from(e: quick_xml::Error) -> Self {
        SvgError::Xml(0, e)
    }
}

pub fn optimize(svg: &[u8], config: &SvgConfig) -> Result<Vec<u8>, SvgError> {
    let mut reader = Reader::from_reader(svg);
    let mut writer = Writer::new(Vec::with_capacity(svg.len()));

    // depth inside an element being removed
    let mut skip = 0usize;
    // for every open <g>, whether its tags were dropped
    let mut groups: Vec<bool> = Vec::new();
    // depth inside an element whose whitespace must be kept
    let mut preserve = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SvgError::Xml(reader.error_position() as u64, e))?;

        if skip > 0 {
            match event {
                Event::Start(_) => skip += 1,
                Event::End(_) => skip -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match &event {
            Event::Start(e) if !is_editor_only(e) && (preserve > 0 || keeps_whitespace(e)) => {
                preserve += 1;
            }
            Event::End(_) if preserve > 0 => preserve -= 1,
            _ => {}
        }

        match event {
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Start(e) if is_editor_only(&e) => skip = 1,
            Event::Empty(e) if is_editor_only(&e) => {}
            Event::Start(e) if e.name().as_ref() == b"g" => {
                let e = clean(&e, config)?;
                let collapse = config.collapse_groups && e.attributes().next().is_none();
                groups.push(collapse);
                if !collapse {
                    writer.write_event(Event::Start(e))?;
                }
            }
            Event::End(e) if e.name().as_ref() == b"g" => {
                if !groups.pop().unwrap_or(false) {
                    writer.write_event(Event::End(e))?;
                }
            }
            Event::Start(e) => writer.write_event(Event::Start(clean(&e, config)?))?,
            Event::Empty(e) => {
                let e = clean(&e, config)?;
                let empty_group = e.name().as_ref() == b"g" && e.attributes().next().is_none();
                if !(config.collapse_groups && empty_group) {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::Text(text) if preserve == 0 && text.iter().all(u8::is_ascii_whitespace) => {}
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
    }

    Ok(writer.into_inner())
}

fn is_editor_only(e: &BytesStart) -> bool {
    let name = e.name();
    let name = name.as_ref();
    name == b"metadata" || EDITOR_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn keeps_whitespace(e: &BytesStart) -> bool {
    TEXT_ELEMENTS.contains(&e.name().as_ref())
        || e.attributes()
            .flatten()
            .any(|attr| attr.key.as_ref() == b"xml:space" && attr.value.as_ref() == b"preserve")
}

/// Copy of `e` without editor attributes and, when configured, without a
/// redundant `viewBox`.
fn clean(e: &BytesStart, config: &SvgConfig) -> Result<BytesStart<'static>, SvgError> {
    let attributes = e
        .attributes()
        .collect::<Result<Vec<Attribute>, _>>()
        .map_err(quick_xml::Error::from)?;

    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());

    for attr in attributes.iter() {
        let key = attr.key.as_ref();
        let editor = EDITOR_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
            || key == b"xmlns:sodipodi"
            || key == b"xmlns:inkscape";

        if editor {
            continue;
        }
        if key == b"viewBox" && config.remove_view_box && is_redundant_view_box(attr, &attributes)
        {
            continue;
        }

        out.push_attribute(attr.clone());
    }

    Ok(out)
}

/// A `viewBox` of `0 0 w h` says nothing the `width` and `height` don't.
fn is_redundant_view_box(view_box: &Attribute, attributes: &[Attribute]) -> bool {
    let get = |name: &[u8]| {
        attributes
            .iter()
            .find(|attr| attr.key.as_ref() == name)
            .map(|attr| String::from_utf8_lossy(&attr.value).trim_end_matches("px").to_string())
    };

    let (Some(width), Some(height)) = (get(b"width"), get(b"height")) else {
        return false;
    };

    let value = String::from_utf8_lossy(&view_box.value);
    let parts: Vec<_> = value.split([' ', ',']).filter(|s| !s.is_empty()).collect();
    parts == ["0", "0", width.as_str(), height.as_str()]
}

#[cfg(test)]
mod tests {
    use super::*;

    const INKSCAPE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- Created with Inkscape -->
<svg xmlns="http://www.w3.org/2000/svg" xmlns:sodipodi="http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd" xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape" width="24" height="24" viewBox="0 0 24 24" inkscape:version="1.0">
  <metadata>
    <title>nested</title>
  </metadata>
  <sodipodi:namedview id="base" inkscape:zoom="1"/>
  <g>
    <g id="layer" inkscape:label="Layer 1">
      <path d="M0 0h24v24H0z"/>
    </g>
  </g>
</svg>
"#;

    fn run(svg: &str, config: &SvgConfig) -> String {
        String::from_utf8(optimize(svg.as_bytes(), config).unwrap()).unwrap()
    }

    #[test]
    fn test_strips_editor_data() {
        assert_eq!(
            run(INKSCAPE, &SvgConfig::default()),
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="24" height="24" viewBox="0 0 24 24"><g id="layer"><path d="M0 0h24v24H0z"/></g></svg>"#
        );
    }

    #[test]
    fn test_keeps_groups_when_not_collapsing() {
        let config = SvgConfig {
            collapse_groups: false,
            ..SvgConfig::default()
        };
        let svg = run(r#"<svg><g><rect/></g><g/></svg>"#, &config);
        assert_eq!(svg, "<svg><g><rect/></g><g/></svg>");
    }

    #[test]
    fn test_removes_redundant_view_box_only_on_request() {
        let svg = r#"<svg width="24px" height="24" viewBox="0 0 24 24"/>"#;

        let kept = run(svg, &SvgConfig::default());
        assert!(kept.contains("viewBox"));

        let config = SvgConfig {
            remove_view_box: true,
            ..SvgConfig::default()
        };
        assert_eq!(run(svg, &config), r#"<svg width="24px" height="24"/>"#);

        // a viewBox that crops or scales is never redundant
        let svg = r#"<svg width="24" height="24" viewBox="0 0 48 48"/>"#;
        assert!(run(svg, &config).contains("viewBox"));
    }

    #[test]
    fn test_text_content_is_kept() {
        let svg = run("<svg><text>Hi &amp; bye</text></svg>", &SvgConfig::default());
        assert_eq!(svg, "<svg><text>Hi &amp; bye</text></svg>");
    }

    #[test]
    fn test_text_whitespace_is_kept() {
        let config = SvgConfig::default();

        let svg = "<svg>\n  <text x=\"0\"><tspan>A</tspan> <tspan>B</tspan></text>\n</svg>";
        assert_eq!(
            run(svg, &config),
            "<svg><text x=\"0\"><tspan>A</tspan> <tspan>B</tspan></text></svg>"
        );

        let svg = r#"<svg><g xml:space="preserve"> <rect/> </g> </svg>"#;
        assert_eq!(run(svg, &config), r#"<svg><g xml:space="preserve"> <rect/> </g></svg>"#);
    }
}
