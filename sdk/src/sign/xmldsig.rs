//! Enveloped XMLDSig.
//!
//! Produces a `ds:Signature` (RSA-SHA256, Canonical XML 1.1) placed
//! according to the caller's `xmlOptions.xpath`:
//!
//! - resolves to an element locally named `Signature`: treated as a
//!   placeholder and replaced by the generated signature
//! - resolves to any other element: the signature becomes its last
//!   child
//! - resolves to nothing, or omitted: appended to the document root
//!
//! `idAttribute` names the attribute used for reference-URI
//! resolution: when the target element carries it, the Reference URI
//! is `#<value>` and the digest covers that element's subtree.
//!
//! The document is held in a small DOM parsed with `xml-rs`. One
//! canonical serialization (namespace declarations first, remaining
//! attributes sorted, explicit end tags, comments dropped) is used
//! both for digesting and for the output document, so the emitted
//! digests verify against the emitted bytes.

use {
    super::{sha256, SignError, TokenKey},
    crate::token::certificate::CertificateRecord,
    base64::{engine::general_purpose::STANDARD as BASE64, Engine as _},
    xml::{
        name::OwnedName,
        namespace::Namespace,
        reader::{EventReader, ParserConfig, XmlEvent},
    },
};

const NS_XMLDSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
const ALG_C14N11: &str = "http://www.w3.org/2006/12/xml-c14n11";
const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const ALG_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

#[derive(Clone, Debug)]
enum Node {
    Element(Element),
    Text(String),
}

#[derive(Clone, Debug)]
struct Element {
    qname: String,
    local: String,
    /// Includes xmlns declarations, as (qualified name, value).
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

/// A location in the tree as indexes into `children` vectors,
/// starting from the root element.
type Path = Vec<usize>;

enum Placement {
    /// Replace the placeholder at `parent.children[index]`.
    Replace { parent: Path, index: usize },
    /// Append as last child of the element at the path.
    Append(Path),
}

/// Sign an XML document, returning the serialized signed document.
pub fn sign_xml(
    content: &[u8],
    xpath: Option<&str>,
    id_attribute: Option<&str>,
    key: &dyn TokenKey,
    cert: &CertificateRecord,
) -> Result<Vec<u8>, SignError> {
    let mut root = parse_document(content)?;

    let placement = match xpath.and_then(|xp| resolve_path(&root, xp)) {
        Some(path) => {
            let target = element_at(&root, &path)?;
            if target.local == "Signature" && !path.is_empty() {
                let (parent, index) = (path[..path.len() - 1].to_vec(), path[path.len() - 1]);
                Placement::Replace { parent, index }
            } else {
                Placement::Append(path)
            }
        }
        None => Placement::Append(Vec::new()),
    };

    // The placeholder never participates in the digest.
    if let Placement::Replace { parent, index } = &placement {
        element_at_mut(&mut root, parent)?.children.remove(*index);
    }

    let anchor = match &placement {
        Placement::Replace { parent, .. } => parent.clone(),
        Placement::Append(path) => path.clone(),
    };

    let (uri, scope) = match id_attribute {
        Some(attr_name) => {
            let anchor_el = element_at(&root, &anchor)?;
            match anchor_el.attributes.iter().find(|(n, _)| n == attr_name) {
                Some((_, value)) => (format!("#{value}"), anchor.clone()),
                None => (String::new(), Vec::new()),
            }
        }
        None => (String::new(), Vec::new()),
    };

    let digest = sha256(canonicalize(element_at(&root, &scope)?).as_bytes());
    let signed_info = build_signed_info(&uri, &BASE64.encode(digest));

    let signature_value = BASE64.encode(key.sign_sha256_rsa(canonicalize(&signed_info).as_bytes())?);
    let signature = build_signature(signed_info, &signature_value, &BASE64.encode(&cert.der));

    match placement {
        Placement::Replace { parent, index } => element_at_mut(&mut root, &parent)?
            .children
            .insert(index, Node::Element(signature)),
        Placement::Append(path) => element_at_mut(&mut root, &path)?
            .children
            .push(Node::Element(signature)),
    }

    log::info!("XML document signed");
    Ok(canonicalize(&root).into_bytes())
}

// == Parsing ==

fn qualify(name: &OwnedName) -> String {
    match name.prefix.as_deref() {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", name.local_name),
        _ => name.local_name.clone(),
    }
}

fn parse_document(content: &[u8]) -> Result<Element, SignError> {
    let config = ParserConfig::new()
        .trim_whitespace(false)
        .cdata_to_characters(true)
        .ignore_comments(true);
    let reader = EventReader::new_with_config(content, config);

    let mut stack: Vec<Element> = Vec::new();
    let mut ns_stack: Vec<Namespace> = vec![Namespace::empty()];
    let mut root: Option<Element> = None;

    for event in reader {
        let event = event.map_err(|e| SignError::failed(format!("XML parse error: {e}")))?;
        match event {
            XmlEvent::StartElement {
                name,
                attributes,
                namespace,
            } => {
                // Reconstruct the xmlns declarations introduced by
                // this element: bindings that differ from the parent
                // scope.
                let parent_ns = ns_stack.last().cloned().unwrap_or_else(Namespace::empty);
                let mut attrs = Vec::new();
                for (prefix, uri) in namespace.0.iter() {
                    if prefix == "xml" || prefix == "xmlns" {
                        continue;
                    }
                    if uri.is_empty() && parent_ns.get(prefix.as_str()).is_none() {
                        continue;
                    }
                    if parent_ns.get(prefix.as_str()) != Some(uri.as_str()) {
                        let decl = if prefix.is_empty() {
                            "xmlns".to_string()
                        } else {
                            format!("xmlns:{prefix}")
                        };
                        attrs.push((decl, uri.clone()));
                    }
                }
                for attr in &attributes {
                    attrs.push((qualify(&attr.name), attr.value.clone()));
                }

                stack.push(Element {
                    qname: qualify(&name),
                    local: name.local_name.clone(),
                    attributes: attrs,
                    children: Vec::new(),
                });
                ns_stack.push(namespace);
            }
            XmlEvent::EndElement { .. } => {
                ns_stack.pop();
                let element = stack
                    .pop()
                    .ok_or_else(|| SignError::failed("unbalanced XML document"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None => root = Some(element),
                }
            }
            XmlEvent::Characters(text) | XmlEvent::Whitespace(text) => {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(text));
                }
            }
            _ => {}
        }
    }

    root.ok_or_else(|| SignError::failed("XML document has no root element"))
}

// == Canonical serialization ==

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

fn attribute_rank(name: &str) -> u8 {
    // Namespace declarations sort before ordinary attributes.
    if name == "xmlns" || name.starts_with("xmlns:") {
        0
    } else {
        1
    }
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.qname);

    let mut attributes = element.attributes.clone();
    attributes.sort_by(|a, b| {
        attribute_rank(&a.0)
            .cmp(&attribute_rank(&b.0))
            .then_with(|| a.0.cmp(&b.0))
    });
    for (name, value) in &attributes {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attribute(value, out);
        out.push('"');
    }
    out.push('>');

    for child in &element.children {
        match child {
            Node::Element(el) => write_element(el, out),
            Node::Text(text) => escape_text(text, out),
        }
    }

    out.push_str("</");
    out.push_str(&element.qname);
    out.push('>');
}

fn canonicalize(element: &Element) -> String {
    let mut out = String::new();
    write_element(element, &mut out);
    out
}

// == Path resolution ==

fn element_at<'a>(root: &'a Element, path: &[usize]) -> Result<&'a Element, SignError> {
    let mut current = root;
    for &index in path {
        match current.children.get(index) {
            Some(Node::Element(el)) => current = el,
            _ => return Err(SignError::internal("stale element path")),
        }
    }
    Ok(current)
}

fn element_at_mut<'a>(root: &'a mut Element, path: &[usize]) -> Result<&'a mut Element, SignError> {
    let mut current = root;
    for &index in path {
        match current.children.get_mut(index) {
            Some(Node::Element(el)) => current = el,
            _ => return Err(SignError::internal("stale element path")),
        }
    }
    Ok(current)
}

fn split_predicate(segment: &str) -> Option<(&str, usize)> {
    match segment.find('[') {
        None => Some((segment, 1)),
        Some(open) => {
            let close = segment.find(']')?;
            let n = segment[open + 1..close].trim().parse().ok()?;
            Some((&segment[..open], n))
        }
    }
}

/// Resolve the supported location-path subset against local names:
/// absolute paths (`/Doc/Body[2]`) and descendant searches
/// (`//Signature`). Anything else resolves to nothing.
fn resolve_path(root: &Element, xpath: &str) -> Option<Path> {
    let xpath = xpath.trim();

    if let Some(name) = xpath.strip_prefix("//") {
        let (name, _) = split_predicate(name)?;
        if root.local == name {
            return Some(Vec::new());
        }
        return find_descendant(root, name, &mut Vec::new());
    }

    if xpath == "/" {
        return Some(Vec::new());
    }

    let mut segments = xpath.strip_prefix('/')?.split('/');
    let (name, index) = split_predicate(segments.next()?)?;
    if root.local != name || index != 1 {
        return None;
    }

    let mut path = Vec::new();
    let mut current = root;
    for segment in segments {
        let (name, want) = split_predicate(segment)?;
        let mut seen = 0;
        let mut found = None;
        for (i, child) in current.children.iter().enumerate() {
            if let Node::Element(el) = child {
                if el.local == name || name == "*" {
                    seen += 1;
                    if seen == want {
                        found = Some((i, el));
                        break;
                    }
                }
            }
        }
        let (i, el) = found?;
        path.push(i);
        current = el;
    }
    Some(path)
}

fn find_descendant(element: &Element, name: &str, path: &mut Path) -> Option<Path> {
    for (i, child) in element.children.iter().enumerate() {
        if let Node::Element(el) = child {
            path.push(i);
            if el.local == name {
                return Some(path.clone());
            }
            if let Some(found) = find_descendant(el, name, path) {
                return Some(found);
            }
            path.pop();
        }
    }
    None
}

// == Signature construction ==

fn ds(name: &str, attributes: &[(&str, &str)], children: Vec<Node>) -> Element {
    Element {
        qname: format!("ds:{name}"),
        local: name.to_string(),
        attributes: attributes
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect(),
        children,
    }
}

fn text(value: &str) -> Node {
    Node::Text(value.to_string())
}

/// SignedInfo declares `xmlns:ds` itself so its canonical form is the
/// same standalone (when signed) and inside the Signature element.
fn build_signed_info(uri: &str, digest_b64: &str) -> Element {
    ds(
        "SignedInfo",
        &[("xmlns:ds", NS_XMLDSIG)],
        vec![
            Node::Element(ds(
                "CanonicalizationMethod",
                &[("Algorithm", ALG_C14N11)],
                Vec::new(),
            )),
            Node::Element(ds(
                "SignatureMethod",
                &[("Algorithm", ALG_RSA_SHA256)],
                Vec::new(),
            )),
            Node::Element(ds(
                "Reference",
                &[("URI", uri)],
                vec![
                    Node::Element(ds(
                        "Transforms",
                        &[],
                        vec![
                            Node::Element(ds(
                                "Transform",
                                &[("Algorithm", ALG_ENVELOPED)],
                                Vec::new(),
                            )),
                            Node::Element(ds(
                                "Transform",
                                &[("Algorithm", ALG_C14N11)],
                                Vec::new(),
                            )),
                        ],
                    )),
                    Node::Element(ds("DigestMethod", &[("Algorithm", ALG_SHA256)], Vec::new())),
                    Node::Element(ds("DigestValue", &[], vec![text(digest_b64)])),
                ],
            )),
        ],
    )
}

fn build_signature(signed_info: Element, signature_b64: &str, cert_b64: &str) -> Element {
    ds(
        "Signature",
        &[("xmlns:ds", NS_XMLDSIG)],
        vec![
            Node::Element(signed_info),
            Node::Element(ds("SignatureValue", &[], vec![text(signature_b64)])),
            Node::Element(ds(
                "KeyInfo",
                &[],
                vec![Node::Element(ds(
                    "X509Data",
                    &[],
                    vec![Node::Element(ds(
                        "X509Certificate",
                        &[],
                        vec![text(cert_b64)],
                    ))],
                ))],
            )),
        ],
    )
}
